//! Semantic analysis for the C subset
//!
//! Two passes over the program: the first hoists struct shapes, function
//! signatures, and globals into the global scope; the second walks each
//! function body enforcing the typing rules. Findings accumulate into a
//! diagnostic list instead of aborting, so one run reports every type
//! error; the pipeline only lowers to IR when the list comes back empty.

use crate::ast::{
    self, CompoundStmt, Declaration, Expr, ForInit, FunctionDecl, Program, SizeofArg, Stmt,
    UnaryOp,
};
use crate::ast::BinaryOp;
use crate::builtins::{builtin_signature, BUILTIN_NAMES};
use crate::config::CompilerConfig;
use crate::symbols::{FunctionSignature, Symbol, SymbolKind, SymbolTable};
use crate::types::{BaseType, Type};
use std::collections::HashMap;
use std::fmt;

/// One semantic finding, anchored to the offending node.
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    pub message: String,
    pub line: usize,
    pub column: usize,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}:{}: {}", self.line, self.column, self.message)
    }
}

pub struct TypeChecker {
    table: SymbolTable,
    /// Struct tag -> ordered member (name, type) list
    structs: HashMap<String, Vec<(String, Type)>>,
    /// Functions that already have a body
    defined: std::collections::HashSet<String>,
    diagnostics: Vec<Diagnostic>,
    current_return: Option<Type>,
}

impl TypeChecker {
    /// Builds the global scope with the builtin registry and any
    /// config-supplied externals already registered.
    pub fn new(config: &CompilerConfig) -> Self {
        let mut table = SymbolTable::new();
        for name in BUILTIN_NAMES {
            let sig = builtin_signature(name).expect("builtin table out of sync");
            let _ = table.declare(function_symbol(name, sig, 0, 0));
        }
        for external in &config.external_functions {
            let _ = table.declare(function_symbol(&external.name, external.signature(), 0, 0));
        }
        TypeChecker {
            table,
            structs: HashMap::new(),
            defined: std::collections::HashSet::new(),
            diagnostics: Vec::new(),
            current_return: None,
        }
    }

    /// Analyze the whole program. An empty result means the program is
    /// well-typed and may be lowered.
    pub fn check_program(&mut self, program: &Program) -> Vec<Diagnostic> {
        // Pass 1: hoist shapes and signatures
        for s in &program.structs {
            let members = s
                .members
                .iter()
                .map(|m| (m.name.clone(), m.ty.resolve()))
                .collect();
            self.structs.insert(s.name.clone(), members);
        }
        for f in &program.functions {
            self.hoist_function(f);
        }
        for g in &program.globals {
            self.declare_variable(g, SymbolKind::Variable);
        }

        // Pass 2: analyze bodies in order
        for g in &program.globals {
            if let Some(init) = &g.init {
                let value_ty = self.check_expr(init);
                let target_ty = g.ty.resolve();
                if !self.assignable(&value_ty, &target_ty, init) {
                    self.error(
                        format!(
                            "Type mismatch in initializer of '{}': expected {}, got {}",
                            g.name, target_ty, value_ty
                        ),
                        g.line,
                        g.column,
                    );
                }
            }
        }
        for f in &program.functions {
            if f.body.is_some() {
                self.check_function(f);
            }
        }
        std::mem::take(&mut self.diagnostics)
    }

    fn error(&mut self, message: impl Into<String>, line: usize, column: usize) {
        self.diagnostics.push(Diagnostic {
            message: message.into(),
            line,
            column,
        });
    }

    fn hoist_function(&mut self, f: &FunctionDecl) {
        let signature = FunctionSignature {
            return_type: f.return_type.resolve(),
            params: f.params.iter().map(|p| p.ty.resolve()).collect(),
        };
        if let Some(existing) = self.table.lookup_function(&f.name) {
            // A prototype followed by its definition is fine; a second
            // body or a signature change is a duplicate
            let same = existing.signature.as_ref() == Some(&signature);
            let redefined = f.body.is_some() && self.defined.contains(&f.name);
            if !same || redefined {
                self.error(
                    format!("Duplicate declaration of '{}'", f.name),
                    f.line,
                    f.column,
                );
            }
            if f.body.is_some() {
                self.defined.insert(f.name.clone());
            }
            return;
        }
        if f.body.is_some() {
            self.defined.insert(f.name.clone());
        }
        let symbol = function_symbol(&f.name, signature, f.line, f.column);
        if self.table.declare(symbol).is_err() {
            self.error(
                format!("Duplicate declaration of '{}'", f.name),
                f.line,
                f.column,
            );
        }
    }

    fn declare_variable(&mut self, decl: &Declaration, kind: SymbolKind) {
        let symbol = Symbol {
            name: decl.name.clone(),
            ty: decl.ty.resolve(),
            kind,
            scope_level: 0,
            line: decl.line,
            column: decl.column,
            signature: None,
        };
        if self.table.declare(symbol).is_err() {
            self.error(
                format!("Duplicate declaration of '{}'", decl.name),
                decl.line,
                decl.column,
            );
        }
    }

    fn check_function(&mut self, f: &FunctionDecl) {
        self.current_return = Some(f.return_type.resolve());
        self.table.enter_scope();
        for p in &f.params {
            let symbol = Symbol {
                name: p.name.clone(),
                ty: p.ty.resolve(),
                kind: SymbolKind::Parameter,
                scope_level: 0,
                line: p.line,
                column: p.column,
                signature: None,
            };
            if self.table.declare(symbol).is_err() {
                self.error(
                    format!("Duplicate declaration of '{}'", p.name),
                    p.line,
                    p.column,
                );
            }
        }
        if let Some(body) = &f.body {
            self.check_compound(body);
        }
        self.table.exit_scope();
        self.current_return = None;
    }

    fn check_compound(&mut self, block: &CompoundStmt) {
        self.table.enter_scope();
        for stmt in &block.statements {
            self.check_stmt(stmt);
        }
        self.table.exit_scope();
    }

    fn check_stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::Compound(block) => self.check_compound(block),
            Stmt::If {
                cond,
                then_branch,
                else_branch,
                ..
            } => {
                self.check_expr(cond);
                self.check_stmt(then_branch);
                if let Some(else_branch) = else_branch {
                    self.check_stmt(else_branch);
                }
            }
            Stmt::While { cond, body, .. } => {
                self.check_expr(cond);
                self.check_stmt(body);
            }
            Stmt::For {
                init,
                cond,
                step,
                body,
                ..
            } => {
                // The induction variable lives in its own scope
                self.table.enter_scope();
                match init {
                    Some(ForInit::Declaration(decl)) => self.check_local_decl(decl),
                    Some(ForInit::Expression(expr)) => {
                        self.check_expr(expr);
                    }
                    None => {}
                }
                if let Some(cond) = cond {
                    self.check_expr(cond);
                }
                if let Some(step) = step {
                    self.check_expr(step);
                }
                self.check_stmt(body);
                self.table.exit_scope();
            }
            Stmt::Return { value, line, column } => self.check_return(value, *line, *column),
            Stmt::Expression(expr) => {
                self.check_expr(expr);
            }
            Stmt::Declaration(decl) => self.check_local_decl(decl),
            Stmt::Asm { .. } | Stmt::Empty => {}
        }
    }

    fn check_local_decl(&mut self, decl: &Declaration) {
        if decl.ty.resolve().is_void() {
            self.error(
                format!("Cannot declare '{}' with type void", decl.name),
                decl.line,
                decl.column,
            );
        }
        self.declare_variable(decl, SymbolKind::Variable);
        if let Some(init) = &decl.init {
            let value_ty = self.check_expr(init);
            let target_ty = decl.ty.resolve();
            if !self.assignable(&value_ty, &target_ty, init) {
                self.error(
                    format!(
                        "Type mismatch in initializer of '{}': expected {}, got {}",
                        decl.name, target_ty, value_ty
                    ),
                    decl.line,
                    decl.column,
                );
            }
        }
    }

    fn check_return(&mut self, value: &Option<Expr>, line: usize, column: usize) {
        let Some(expected) = self.current_return.clone() else {
            self.error("Return outside function", line, column);
            return;
        };
        match value {
            None => {
                if !expected.is_void() {
                    self.error(
                        format!("Return without a value in function returning {}", expected),
                        line,
                        column,
                    );
                }
            }
            Some(expr) => {
                let actual = self.check_expr(expr);
                if expected.is_void() {
                    self.error("Return with a value in void function", line, column);
                } else if !self.assignable(&actual, &expected, expr) {
                    self.error(
                        format!("Return type mismatch: expected {}, got {}", expected, actual),
                        line,
                        column,
                    );
                }
            }
        }
    }

    /// Type of an expression. Reported errors fall back to `int` so one
    /// mistake does not cascade through the enclosing expression.
    fn check_expr(&mut self, expr: &Expr) -> Type {
        match expr {
            Expr::Number { lexeme, .. } => ast::number_literal_type(lexeme),
            Expr::CharLit { .. } => Type::char_(),
            Expr::StringLit { .. } => Type::char_ptr(),
            Expr::Identifier { name, line, column } => match self.table.lookup(name) {
                Some(symbol) => symbol.ty.clone(),
                None => {
                    self.error(format!("Undeclared identifier '{}'", name), *line, *column);
                    Type::int()
                }
            },
            Expr::Binary {
                op,
                lhs,
                rhs,
                line,
                column,
            } => self.check_binary(*op, lhs, rhs, *line, *column),
            Expr::Unary {
                op,
                operand,
                line,
                column,
            } => self.check_unary(*op, operand, *line, *column),
            Expr::Assignment {
                target,
                value,
                line,
                column,
            } => self.check_assignment(target, value, *line, *column),
            Expr::Call {
                callee,
                args,
                line,
                column,
            } => self.check_call(callee, args, *line, *column),
            Expr::MemberAccess {
                base,
                member,
                through_pointer,
                line,
                column,
            } => self.check_member_access(base, member, *through_pointer, *line, *column),
            Expr::ArrayAccess {
                base,
                index,
                line,
                column,
            } => {
                let base_ty = self.check_expr(base);
                let index_ty = self.check_expr(index);
                if !index_ty.is_integer() {
                    self.error("Array index must be an integer", *line, *column);
                }
                match base_ty.dereferenced() {
                    Some(element) => element,
                    None => {
                        self.error(
                            format!("Cannot index non-pointer type {}", base_ty),
                            *line,
                            *column,
                        );
                        Type::int()
                    }
                }
            }
            Expr::Sizeof { arg, .. } => {
                if let SizeofArg::Expr(inner) = arg {
                    self.check_expr(inner);
                }
                Type::int()
            }
            Expr::Cast { target, operand, .. } => {
                self.check_expr(operand);
                target.resolve()
            }
        }
    }

    fn check_binary(
        &mut self,
        op: BinaryOp,
        lhs: &Expr,
        rhs: &Expr,
        line: usize,
        column: usize,
    ) -> Type {
        let lhs_ty = self.check_expr(lhs);
        let rhs_ty = self.check_expr(rhs);

        if op.is_logical() {
            return Type::int();
        }
        if op.is_comparison() {
            // Numeric-numeric, pointer-pointer, and pointer-integer
            // comparisons all produce int
            let ok = (lhs_ty.is_numeric() && rhs_ty.is_numeric())
                || (lhs_ty.is_pointer() && rhs_ty.is_pointer())
                || (lhs_ty.is_pointer() && rhs_ty.is_integer())
                || (lhs_ty.is_integer() && rhs_ty.is_pointer());
            if !ok {
                self.error(
                    format!("Cannot compare {} with {}", lhs_ty, rhs_ty),
                    line,
                    column,
                );
            }
            return Type::int();
        }
        match op {
            BinaryOp::Add | BinaryOp::Sub => {
                if lhs_ty.is_pointer() && rhs_ty.is_integer() {
                    return lhs_ty;
                }
                if op == BinaryOp::Add && lhs_ty.is_integer() && rhs_ty.is_pointer() {
                    return rhs_ty;
                }
                if lhs_ty.is_numeric() && rhs_ty.is_numeric() {
                    return Type::promote(&lhs_ty, &rhs_ty);
                }
                self.error(
                    format!("Invalid operands to binary operator: {} and {}", lhs_ty, rhs_ty),
                    line,
                    column,
                );
                Type::int()
            }
            _ => {
                // Mul/Div/Mod and the bitwise/shift family want numbers
                if lhs_ty.is_numeric() && rhs_ty.is_numeric() {
                    Type::promote(&lhs_ty, &rhs_ty)
                } else {
                    self.error(
                        format!(
                            "Invalid operands to binary operator: {} and {}",
                            lhs_ty, rhs_ty
                        ),
                        line,
                        column,
                    );
                    Type::int()
                }
            }
        }
    }

    fn check_unary(
        &mut self,
        op: UnaryOp,
        operand: &Expr,
        line: usize,
        column: usize,
    ) -> Type {
        let operand_ty = self.check_expr(operand);
        match op {
            UnaryOp::Not => Type::int(),
            UnaryOp::Neg | UnaryOp::BitNot => {
                if !operand_ty.is_numeric() {
                    self.error(
                        format!("Cannot apply unary operator to {}", operand_ty),
                        line,
                        column,
                    );
                    return Type::int();
                }
                operand_ty
            }
            UnaryOp::AddrOf => operand_ty.referenced(),
            UnaryOp::Deref => match operand_ty.dereferenced() {
                Some(inner) => inner,
                None => {
                    self.error(
                        format!("Cannot dereference non-pointer type {}", operand_ty),
                        line,
                        column,
                    );
                    Type::int()
                }
            },
            UnaryOp::PostInc | UnaryOp::PostDec => {
                if !operand_ty.is_numeric() && !operand_ty.is_pointer() {
                    self.error(
                        format!("Cannot increment value of type {}", operand_ty),
                        line,
                        column,
                    );
                }
                operand_ty
            }
        }
    }

    fn check_assignment(
        &mut self,
        target: &Expr,
        value: &Expr,
        line: usize,
        column: usize,
    ) -> Type {
        if !target.is_lvalue() {
            self.error("Invalid assignment target", line, column);
        }
        let target_ty = self.check_expr(target);
        let value_ty = self.check_expr(value);
        if !self.assignable(&value_ty, &target_ty, value) {
            self.error(
                format!(
                    "Type mismatch in assignment: expected {}, got {}",
                    target_ty, value_ty
                ),
                line,
                column,
            );
        }
        target_ty
    }

    fn check_call(
        &mut self,
        callee: &str,
        args: &[Expr],
        line: usize,
        column: usize,
    ) -> Type {
        let arg_types: Vec<Type> = args.iter().map(|a| self.check_expr(a)).collect();
        let Some(symbol) = self.table.lookup_function(callee) else {
            self.error(format!("Undeclared function '{}'", callee), line, column);
            return Type::int();
        };
        let signature = symbol
            .signature
            .clone()
            .expect("function symbol without signature");
        if signature.params.len() != arg_types.len() {
            self.error(
                format!(
                    "Function '{}' expects {} arguments, got {}",
                    callee,
                    signature.params.len(),
                    arg_types.len()
                ),
                line,
                column,
            );
            return signature.return_type;
        }
        for (i, (arg_ty, param_ty)) in arg_types.iter().zip(&signature.params).enumerate() {
            if !self.assignable(arg_ty, param_ty, &args[i]) {
                self.error(
                    format!(
                        "Argument {} to '{}' has type {}, expected {}",
                        i + 1,
                        callee,
                        arg_ty,
                        param_ty
                    ),
                    args[i].line(),
                    args[i].column(),
                );
            }
        }
        signature.return_type
    }

    fn check_member_access(
        &mut self,
        base: &Expr,
        member: &str,
        through_pointer: bool,
        line: usize,
        column: usize,
    ) -> Type {
        let base_ty = self.check_expr(base);
        let struct_ty = if through_pointer {
            match base_ty.dereferenced() {
                Some(inner) if inner.is_struct() => inner,
                _ => {
                    self.error(
                        format!("'->' applied to non-struct-pointer type {}", base_ty),
                        line,
                        column,
                    );
                    return Type::int();
                }
            }
        } else {
            if !base_ty.is_struct() {
                self.error(
                    format!("'.' applied to non-struct type {}", base_ty),
                    line,
                    column,
                );
                return Type::int();
            }
            base_ty
        };
        let Some(tag) = &struct_ty.struct_name else {
            return Type::int();
        };
        match self.structs.get(tag) {
            Some(members) => members
                .iter()
                .find(|(name, _)| name == member)
                .map(|(_, ty)| ty.clone())
                // Unknown members of known structs read as int; opaque
                // structs from headers we never saw do the same
                .unwrap_or_else(Type::int),
            None => Type::int(),
        }
    }

    /// Assignment compatibility, shared by assignments, initializers,
    /// arguments, and returns.
    fn assignable(&self, from: &Type, to: &Type, from_expr: &Expr) -> bool {
        if from == to {
            return true;
        }
        // Same-base numeric types convert implicitly
        if from.is_numeric() && to.is_numeric() {
            return true;
        }
        // Integer zero assigns to any pointer
        if to.is_pointer() && is_zero_literal(from_expr) {
            return true;
        }
        // void* interconverts with any pointer
        if from.is_pointer() && to.is_pointer() && (from.is_void_pointer() || to.is_void_pointer())
        {
            return true;
        }
        // Struct-to-struct and pointer-to-struct stay conservative to
        // accommodate opaque types
        if to.base == BaseType::Struct && (from.base == BaseType::Struct || from.is_pointer()) {
            return true;
        }
        false
    }
}

fn function_symbol(name: &str, signature: FunctionSignature, line: usize, column: usize) -> Symbol {
    Symbol {
        name: name.to_string(),
        ty: signature.return_type.clone(),
        kind: SymbolKind::Function,
        scope_level: 0,
        line,
        column,
        signature: Some(signature),
    }
}

fn is_zero_literal(expr: &Expr) -> bool {
    matches!(expr, Expr::Number { lexeme, .. } if ast::number_literal_value(lexeme) == 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Lexer;
    use crate::parser::Parser;

    fn check(source: &str) -> Vec<Diagnostic> {
        let tokens = Lexer::new(source).tokenize().unwrap();
        let program = Parser::new(tokens).parse().unwrap();
        TypeChecker::new(&CompilerConfig::default()).check_program(&program)
    }

    #[test]
    fn test_undeclared_identifier() {
        let diags = check("int main() { int x = undeclared_var; return 42; }");
        assert_eq!(diags.len(), 1);
        assert!(diags[0].message.contains("Undeclared identifier"));
        assert!(diags[0].message.contains("undeclared_var"));
        assert_eq!(diags[0].line, 1);
    }

    #[test]
    fn test_well_typed_program_is_clean() {
        let diags = check(
            "int add(int a, int b) { return a + b; }\n\
             int main() { int result = add(5, 3); return result; }",
        );
        assert!(diags.is_empty(), "{:?}", diags);
    }

    #[test]
    fn test_duplicate_declaration_in_scope() {
        let diags = check("int main() { int x; int x; return 0; }");
        assert_eq!(diags.len(), 1);
        assert!(diags[0].message.contains("Duplicate declaration"));
    }

    #[test]
    fn test_shadowing_in_inner_scope_is_fine() {
        let diags = check("int main() { int x = 1; { int x = 2; } return x; }");
        assert!(diags.is_empty(), "{:?}", diags);
    }

    #[test]
    fn test_arity_mismatch() {
        let diags = check(
            "int add(int a, int b) { return a + b; }\n\
             int main() { return add(1); }",
        );
        assert_eq!(diags.len(), 1);
        assert!(diags[0].message.contains("expects 2 arguments, got 1"));
    }

    #[test]
    fn test_undeclared_function() {
        let diags = check("int main() { return frobnicate(1); }");
        assert_eq!(diags.len(), 1);
        assert!(diags[0].message.contains("Undeclared function 'frobnicate'"));
    }

    #[test]
    fn test_return_mismatches() {
        let diags = check("void f() { return 1; }");
        assert!(diags[0].message.contains("void function"));

        let diags = check("int g() { return; }");
        assert!(diags[0].message.contains("Return without a value"));

        let diags = check("int *h(int x) { return x; }");
        assert!(diags[0].message.contains("Return type mismatch"));
    }

    #[test]
    fn test_zero_assigns_to_pointer_but_one_does_not() {
        let diags = check("int main() { int *p = 0; return 0; }");
        assert!(diags.is_empty(), "{:?}", diags);

        let diags = check("int main() { int *p = 1; return 0; }");
        assert_eq!(diags.len(), 1);
        assert!(diags[0].message.contains("Type mismatch"));
    }

    #[test]
    fn test_void_pointer_interconverts() {
        let diags = check(
            "void *alloc(int n);\n\
             int main() { int *p = alloc(8); void *q = p; return 0; }",
        );
        assert!(diags.is_empty(), "{:?}", diags);
    }

    #[test]
    fn test_pointer_plus_integer_keeps_pointer_type() {
        let diags = check("int f(int *p) { int *q = p + 1; return 0; }");
        assert!(diags.is_empty(), "{:?}", diags);
    }

    #[test]
    fn test_pointer_plus_pointer_rejected() {
        let diags = check("int f(int *p, int *q) { int n = p + q; return n; }");
        assert_eq!(diags.len(), 1);
        assert!(diags[0].message.contains("Invalid operands"));
    }

    #[test]
    fn test_second_definition_is_duplicate() {
        let diags = check("int f() { return 1; }\nint f() { return 2; }\nint main() { return f(); }");
        assert_eq!(diags.len(), 1);
        assert!(diags[0].message.contains("Duplicate declaration of 'f'"));
    }

    #[test]
    fn test_numeric_promotions_accepted() {
        let diags = check(
            "double scale(double d, int i) { return d * i; }\n\
             long widen(int x) { return x; }",
        );
        assert!(diags.is_empty(), "{:?}", diags);
    }

    #[test]
    fn test_builtins_are_preregistered() {
        let diags = check("long f(long x) { return __builtin_expect(x, 1); }");
        assert!(diags.is_empty(), "{:?}", diags);
    }

    #[test]
    fn test_config_externals_are_registered() {
        let config = CompilerConfig::from_toml(
            "[[external]]\nname = \"printk\"\nreturns = \"int\"\nparams = [\"char*\"]\n",
        )
        .unwrap();
        let tokens = Lexer::new("int main() { return printk(\"hi\"); }")
            .tokenize()
            .unwrap();
        let program = Parser::new(tokens).parse().unwrap();
        let diags = TypeChecker::new(&config).check_program(&program);
        assert!(diags.is_empty(), "{:?}", diags);
    }

    #[test]
    fn test_struct_member_types() {
        let diags = check(
            "struct point { int x; int y; };\n\
             int f(struct point *p) { return p->x + p->y; }",
        );
        assert!(diags.is_empty(), "{:?}", diags);

        let diags = check("int f(int x) { return x->y; }");
        assert_eq!(diags.len(), 1);
        assert!(diags[0].message.contains("'->'"));
    }

    #[test]
    fn test_struct_assignment_is_conservative() {
        let diags = check(
            "struct file { int fd; };\n\
             struct file g;\n\
             int f(struct file *src) { struct file local = g; return 0; }",
        );
        assert!(diags.is_empty(), "{:?}", diags);
    }

    #[test]
    fn test_batching_reports_multiple_errors() {
        let diags = check("int main() { int x = a; int y = b; return 0; }");
        assert_eq!(diags.len(), 2);
        for d in &diags {
            assert!(d.line >= 1);
        }
    }

    #[test]
    fn test_for_scope_confines_induction_variable() {
        let diags = check(
            "int main() { for (int i = 0; i < 3; i = i + 1) { } return i; }",
        );
        assert_eq!(diags.len(), 1);
        assert!(diags[0].message.contains("Undeclared identifier 'i'"));
    }

    #[test]
    fn test_prototype_then_definition_not_duplicate() {
        let diags = check("int f(int x);\nint f(int x) { return x; }\nint main() { return f(1); }");
        assert!(diags.is_empty(), "{:?}", diags);
    }
}
