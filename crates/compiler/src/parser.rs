//! Recursive-descent parser with precedence climbing
//!
//! Consumes the token vector once and produces a `Program`. The parser
//! fails fast: the first unexpected token aborts with a `ParseError`
//! naming what was expected. Kernel-flavored input is tolerated:
//! attribute-like identifiers (`__init`, `__user`, ...) are skipped in
//! declarator position, `EXPORT_SYMBOL(name);` is consumed as a no-op,
//! and `asm(...)` statements are kept as opaque nodes.
//!
//! Precedence ladder, lowest to highest: assignment, `||`, `&&`, `|`,
//! `^`, `&`, equality, relational, shift, additive, multiplicative,
//! unary prefix, postfix, primary (including casts).

use crate::ast::{
    CompoundStmt, Declaration, Expr, ForInit, FunctionDecl, Parameter, Program, SizeofArg, Stmt,
    StructDecl, TypeSpecifier, UnaryOp,
};
use crate::ast::BinaryOp;
use crate::lexer::{Token, TokenKind};
use std::fmt;

/// Unexpected token, with the construct the parser was looking for.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    pub message: String,
    pub line: usize,
    pub column: usize,
}

impl ParseError {
    fn new(message: impl Into<String>, token: &Token) -> Self {
        ParseError {
            message: message.into(),
            line: token.line,
            column: token.column,
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Parse error at line {}, column {}: {}",
            self.line, self.column, self.message
        )
    }
}

impl std::error::Error for ParseError {}

const TYPE_KEYWORDS: &[TokenKind] = &[
    TokenKind::KwInt,
    TokenKind::KwChar,
    TokenKind::KwVoid,
    TokenKind::KwLong,
    TokenKind::KwShort,
    TokenKind::KwUnsigned,
    TokenKind::KwSigned,
    TokenKind::KwFloat,
    TokenKind::KwDouble,
];

const QUALIFIER_KEYWORDS: &[TokenKind] = &[
    TokenKind::KwStatic,
    TokenKind::KwExtern,
    TokenKind::KwConst,
    TokenKind::KwVolatile,
    TokenKind::KwInline,
];

pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Parser { tokens, pos: 0 }
    }

    pub fn parse(&mut self) -> Result<Program, ParseError> {
        let mut program = Program::new();
        loop {
            self.skip_preprocessor_lines();
            if self.check(TokenKind::Eof) {
                break;
            }
            self.parse_top_level(&mut program)?;
        }
        Ok(program)
    }

    // ---- token plumbing ----

    fn current(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn kind(&self) -> TokenKind {
        self.current().kind
    }

    fn kind_at(&self, offset: usize) -> TokenKind {
        self.tokens
            .get(self.pos + offset)
            .map(|t| t.kind)
            .unwrap_or(TokenKind::Eof)
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.kind() == kind
    }

    fn advance(&mut self) -> Token {
        let token = self.current().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn matches(&mut self, kind: TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokenKind, what: &str) -> Result<Token, ParseError> {
        if self.check(kind) {
            Ok(self.advance())
        } else {
            Err(ParseError::new(
                format!("expected {}, found '{}'", what, self.current().lexeme),
                self.current(),
            ))
        }
    }

    fn skip_preprocessor_lines(&mut self) {
        while self.check(TokenKind::Preprocessor) {
            self.advance();
        }
    }

    fn skip_qualifiers(&mut self) {
        while QUALIFIER_KEYWORDS.contains(&self.kind()) {
            self.advance();
        }
    }

    /// Attribute-like markers such as `__init` sit between the type and
    /// the declared name; skip them when another identifier follows.
    fn skip_attribute_identifiers(&mut self) {
        while self.kind() == TokenKind::Identifier
            && self.current().lexeme.starts_with("__")
            && self.kind_at(1) == TokenKind::Identifier
        {
            self.advance();
        }
    }

    fn at_type_specifier(&self) -> bool {
        TYPE_KEYWORDS.contains(&self.kind()) || self.check(TokenKind::KwStruct)
    }

    fn at_declaration_start(&self) -> bool {
        self.at_type_specifier() || QUALIFIER_KEYWORDS.contains(&self.kind())
    }

    // ---- top level ----

    fn parse_top_level(&mut self, program: &mut Program) -> Result<(), ParseError> {
        self.skip_qualifiers();

        // EXPORT_SYMBOL(name); is accepted and dropped
        if self.check(TokenKind::Identifier) && self.current().lexeme == "EXPORT_SYMBOL" {
            self.advance();
            self.expect(TokenKind::LParen, "'(' after EXPORT_SYMBOL")?;
            self.expect(TokenKind::Identifier, "symbol name")?;
            self.expect(TokenKind::RParen, "')'")?;
            self.expect(TokenKind::Semicolon, "';'")?;
            return Ok(());
        }

        // struct definition (possibly followed by declarators)
        if self.check(TokenKind::KwStruct) && self.kind_at(2) == TokenKind::LBrace {
            let decl = self.parse_struct_decl(program)?;
            program.structs.push(decl);
            return Ok(());
        }

        if !self.at_type_specifier() {
            return Err(ParseError::new(
                format!(
                    "expected declaration, found '{}'",
                    self.current().lexeme
                ),
                self.current(),
            ));
        }

        let ty = self.parse_type_specifier()?;
        self.skip_attribute_identifiers();
        let name_token = self.expect(TokenKind::Identifier, "declared name")?;

        if self.check(TokenKind::LParen) {
            let func = self.parse_function_rest(ty, name_token)?;
            program.functions.push(func);
        } else {
            let decls = self.parse_variable_rest(ty, name_token)?;
            program.globals.extend(decls);
        }
        Ok(())
    }

    /// `struct Name { members } vars? ;`
    fn parse_struct_decl(&mut self, program: &mut Program) -> Result<StructDecl, ParseError> {
        let kw = self.expect(TokenKind::KwStruct, "'struct'")?;
        let name = self.expect(TokenKind::Identifier, "struct tag")?;
        self.expect(TokenKind::LBrace, "'{'")?;

        let mut members = Vec::new();
        while !self.check(TokenKind::RBrace) && !self.check(TokenKind::Eof) {
            self.skip_qualifiers();
            let member_ty = self.parse_type_specifier()?;
            loop {
                self.skip_attribute_identifiers();
                let member_name = self.expect(TokenKind::Identifier, "member name")?;
                let member_ty = self.parse_array_suffix(member_ty.clone())?;
                members.push(Parameter {
                    name: member_name.lexeme,
                    ty: member_ty,
                    line: member_name.line,
                    column: member_name.column,
                });
                if !self.matches(TokenKind::Comma) {
                    break;
                }
            }
            self.expect(TokenKind::Semicolon, "';' after struct member")?;
        }
        self.expect(TokenKind::RBrace, "'}'")?;

        // Optional declarators reusing the struct shape
        if !self.check(TokenKind::Semicolon) {
            let base = TypeSpecifier::structure(name.lexeme.clone(), 0);
            loop {
                let mut ty = base.clone();
                while self.matches(TokenKind::Star) {
                    ty.pointer_count += 1;
                }
                let var = self.expect(TokenKind::Identifier, "variable name")?;
                let ty = self.parse_array_suffix(ty)?;
                program.globals.push(Declaration {
                    name: var.lexeme,
                    ty,
                    init: None,
                    line: var.line,
                    column: var.column,
                });
                if !self.matches(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(TokenKind::Semicolon, "';' after struct declaration")?;

        Ok(StructDecl {
            name: name.lexeme,
            members,
            line: kw.line,
            column: kw.column,
        })
    }

    /// Base type keywords (one or more), optional struct tag, then `*`s.
    fn parse_type_specifier(&mut self) -> Result<TypeSpecifier, ParseError> {
        self.skip_qualifiers();

        if self.matches(TokenKind::KwStruct) {
            let tag = self.expect(TokenKind::Identifier, "struct tag")?;
            let mut ty = TypeSpecifier::structure(tag.lexeme, 0);
            while self.matches(TokenKind::Star) {
                ty.pointer_count += 1;
            }
            return Ok(ty);
        }

        if !TYPE_KEYWORDS.contains(&self.kind()) {
            return Err(ParseError::new(
                format!("expected type specifier, found '{}'", self.current().lexeme),
                self.current(),
            ));
        }

        // Collect a run of type keywords: `unsigned long`, `long long int`...
        let mut words = Vec::new();
        while TYPE_KEYWORDS.contains(&self.kind()) {
            words.push(self.advance().lexeme);
        }
        let base_name = if words.iter().any(|w| w == "double") {
            "double"
        } else if words.iter().any(|w| w == "float") {
            "float"
        } else if words.iter().any(|w| w == "char") {
            "char"
        } else if words.iter().any(|w| w == "void") {
            "void"
        } else if words.iter().any(|w| w == "long") {
            "long"
        } else {
            "int"
        };

        let mut ty = TypeSpecifier::new(base_name, 0);
        while self.matches(TokenKind::Star) {
            ty.pointer_count += 1;
        }
        Ok(ty)
    }

    /// `[size]` promotes the declared type by one pointer level.
    fn parse_array_suffix(&mut self, mut ty: TypeSpecifier) -> Result<TypeSpecifier, ParseError> {
        while self.matches(TokenKind::LBracket) {
            if self.check(TokenKind::Number) {
                self.advance();
            }
            self.expect(TokenKind::RBracket, "']'")?;
            ty.pointer_count += 1;
        }
        Ok(ty)
    }

    fn parse_function_rest(
        &mut self,
        return_type: TypeSpecifier,
        name: Token,
    ) -> Result<FunctionDecl, ParseError> {
        self.expect(TokenKind::LParen, "'('")?;
        let params = self.parse_parameter_list()?;
        self.expect(TokenKind::RParen, "')'")?;

        let body = if self.matches(TokenKind::Semicolon) {
            None
        } else {
            Some(self.parse_compound_stmt()?)
        };

        Ok(FunctionDecl {
            name: name.lexeme,
            return_type,
            params,
            body,
            line: name.line,
            column: name.column,
        })
    }

    fn parse_parameter_list(&mut self) -> Result<Vec<Parameter>, ParseError> {
        let mut params = Vec::new();
        if self.check(TokenKind::RParen) {
            return Ok(params);
        }
        // `(void)` means no parameters
        if self.check(TokenKind::KwVoid) && self.kind_at(1) == TokenKind::RParen {
            self.advance();
            return Ok(params);
        }
        loop {
            if self.matches(TokenKind::Ellipsis) {
                // Variadic marker accepted and dropped; call-site lowering
                // for varargs is out of scope
                break;
            }
            let ty = self.parse_type_specifier()?;
            self.skip_attribute_identifiers();
            let name = self.expect(TokenKind::Identifier, "parameter name")?;
            let ty = self.parse_array_suffix(ty)?;
            params.push(Parameter {
                name: name.lexeme,
                ty,
                line: name.line,
                column: name.column,
            });
            if !self.matches(TokenKind::Comma) {
                break;
            }
        }
        Ok(params)
    }

    /// Declarator tail for variables: array suffix, initializer, comma list.
    fn parse_variable_rest(
        &mut self,
        base: TypeSpecifier,
        first_name: Token,
    ) -> Result<Vec<Declaration>, ParseError> {
        let mut decls = Vec::new();
        let mut name = first_name;
        let mut ty = base.clone();
        loop {
            let declared = self.parse_array_suffix(ty)?;
            let init = if self.matches(TokenKind::Assign) {
                Some(self.parse_assignment()?)
            } else {
                None
            };
            decls.push(Declaration {
                name: name.lexeme.clone(),
                ty: declared,
                init,
                line: name.line,
                column: name.column,
            });
            if !self.matches(TokenKind::Comma) {
                break;
            }
            ty = TypeSpecifier {
                base_name: base.base_name.clone(),
                is_struct: base.is_struct,
                pointer_count: 0,
            };
            while self.matches(TokenKind::Star) {
                ty.pointer_count += 1;
            }
            name = self.expect(TokenKind::Identifier, "variable name")?;
        }
        self.expect(TokenKind::Semicolon, "';' after declaration")?;
        Ok(decls)
    }

    // ---- statements ----

    fn parse_compound_stmt(&mut self) -> Result<CompoundStmt, ParseError> {
        let open = self.expect(TokenKind::LBrace, "'{'")?;
        let mut statements = Vec::new();
        while !self.check(TokenKind::RBrace) && !self.check(TokenKind::Eof) {
            self.skip_preprocessor_lines();
            if self.check(TokenKind::RBrace) {
                break;
            }
            self.parse_statement_into(&mut statements)?;
        }
        self.expect(TokenKind::RBrace, "'}'")?;
        Ok(CompoundStmt {
            statements,
            line: open.line,
            column: open.column,
        })
    }

    /// A declaration statement may carry a comma list, so statements are
    /// appended rather than returned one at a time.
    fn parse_statement_into(&mut self, out: &mut Vec<Stmt>) -> Result<(), ParseError> {
        if self.at_declaration_start() {
            self.skip_qualifiers();
            if self.check(TokenKind::KwStruct) && self.kind_at(2) == TokenKind::LBrace {
                return Err(ParseError::new(
                    "struct definitions are not allowed inside functions",
                    self.current(),
                ));
            }
            let ty = self.parse_type_specifier()?;
            self.skip_attribute_identifiers();
            let name = self.expect(TokenKind::Identifier, "variable name")?;
            let decls = self.parse_variable_rest(ty, name)?;
            out.extend(decls.into_iter().map(Stmt::Declaration));
            return Ok(());
        }
        let stmt = self.parse_statement()?;
        out.push(stmt);
        Ok(())
    }

    fn parse_statement(&mut self) -> Result<Stmt, ParseError> {
        match self.kind() {
            TokenKind::LBrace => Ok(Stmt::Compound(self.parse_compound_stmt()?)),
            TokenKind::KwIf => self.parse_if_stmt(),
            TokenKind::KwWhile => self.parse_while_stmt(),
            TokenKind::KwFor => self.parse_for_stmt(),
            TokenKind::KwReturn => self.parse_return_stmt(),
            TokenKind::KwAsm => self.parse_asm_stmt(),
            TokenKind::Semicolon => {
                self.advance();
                Ok(Stmt::Empty)
            }
            _ => {
                let expr = self.parse_expression()?;
                self.expect(TokenKind::Semicolon, "';' after expression")?;
                Ok(Stmt::Expression(expr))
            }
        }
    }

    fn parse_if_stmt(&mut self) -> Result<Stmt, ParseError> {
        let kw = self.expect(TokenKind::KwIf, "'if'")?;
        self.expect(TokenKind::LParen, "'(' after if")?;
        let cond = self.parse_expression()?;
        self.expect(TokenKind::RParen, "')' after condition")?;
        let then_branch = Box::new(self.parse_statement()?);
        let else_branch = if self.matches(TokenKind::KwElse) {
            Some(Box::new(self.parse_statement()?))
        } else {
            None
        };
        Ok(Stmt::If {
            cond,
            then_branch,
            else_branch,
            line: kw.line,
            column: kw.column,
        })
    }

    fn parse_while_stmt(&mut self) -> Result<Stmt, ParseError> {
        let kw = self.expect(TokenKind::KwWhile, "'while'")?;
        self.expect(TokenKind::LParen, "'(' after while")?;
        let cond = self.parse_expression()?;
        self.expect(TokenKind::RParen, "')' after condition")?;
        let body = Box::new(self.parse_statement()?);
        Ok(Stmt::While {
            cond,
            body,
            line: kw.line,
            column: kw.column,
        })
    }

    fn parse_for_stmt(&mut self) -> Result<Stmt, ParseError> {
        let kw = self.expect(TokenKind::KwFor, "'for'")?;
        self.expect(TokenKind::LParen, "'(' after for")?;

        let init = if self.matches(TokenKind::Semicolon) {
            None
        } else if self.at_declaration_start() {
            self.skip_qualifiers();
            let ty = self.parse_type_specifier()?;
            let name = self.expect(TokenKind::Identifier, "variable name")?;
            let declared = self.parse_array_suffix(ty)?;
            let init_value = if self.matches(TokenKind::Assign) {
                Some(self.parse_assignment()?)
            } else {
                None
            };
            self.expect(TokenKind::Semicolon, "';' after for initializer")?;
            Some(ForInit::Declaration(Declaration {
                name: name.lexeme,
                ty: declared,
                init: init_value,
                line: name.line,
                column: name.column,
            }))
        } else {
            let expr = self.parse_expression()?;
            self.expect(TokenKind::Semicolon, "';' after for initializer")?;
            Some(ForInit::Expression(expr))
        };

        let cond = if self.check(TokenKind::Semicolon) {
            None
        } else {
            Some(self.parse_expression()?)
        };
        self.expect(TokenKind::Semicolon, "';' after for condition")?;

        let step = if self.check(TokenKind::RParen) {
            None
        } else {
            Some(self.parse_expression()?)
        };
        self.expect(TokenKind::RParen, "')' after for header")?;

        let body = Box::new(self.parse_statement()?);
        Ok(Stmt::For {
            init,
            cond,
            step,
            body,
            line: kw.line,
            column: kw.column,
        })
    }

    fn parse_return_stmt(&mut self) -> Result<Stmt, ParseError> {
        let kw = self.expect(TokenKind::KwReturn, "'return'")?;
        let value = if self.check(TokenKind::Semicolon) {
            None
        } else {
            Some(self.parse_expression()?)
        };
        self.expect(TokenKind::Semicolon, "';' after return")?;
        Ok(Stmt::Return {
            value,
            line: kw.line,
            column: kw.column,
        })
    }

    /// `asm [volatile] ( ... );` — the parenthesized body is collected
    /// verbatim with nesting balanced.
    fn parse_asm_stmt(&mut self) -> Result<Stmt, ParseError> {
        let kw = self.expect(TokenKind::KwAsm, "'asm'")?;
        self.matches(TokenKind::KwVolatile);
        self.expect(TokenKind::LParen, "'(' after asm")?;
        let mut depth = 1usize;
        let mut text = String::new();
        while depth > 0 {
            match self.kind() {
                TokenKind::Eof => {
                    return Err(ParseError::new("unterminated asm statement", self.current()));
                }
                TokenKind::LParen => {
                    depth += 1;
                    text.push('(');
                    self.advance();
                }
                TokenKind::RParen => {
                    depth -= 1;
                    if depth > 0 {
                        text.push(')');
                    }
                    self.advance();
                }
                _ => {
                    if !text.is_empty() {
                        text.push(' ');
                    }
                    text.push_str(&self.advance().lexeme);
                }
            }
        }
        self.expect(TokenKind::Semicolon, "';' after asm statement")?;
        Ok(Stmt::Asm {
            text,
            line: kw.line,
            column: kw.column,
        })
    }

    // ---- expressions, precedence climbing ----

    pub fn parse_expression(&mut self) -> Result<Expr, ParseError> {
        self.parse_assignment()
    }

    fn parse_assignment(&mut self) -> Result<Expr, ParseError> {
        let lhs = self.parse_logical_or()?;
        if self.check(TokenKind::Assign) {
            let eq = self.advance();
            if !lhs.is_lvalue() {
                return Err(ParseError {
                    message: "invalid assignment target".to_string(),
                    line: eq.line,
                    column: eq.column,
                });
            }
            // Right-associative
            let value = self.parse_assignment()?;
            return Ok(Expr::Assignment {
                target: Box::new(lhs),
                value: Box::new(value),
                line: eq.line,
                column: eq.column,
            });
        }
        Ok(lhs)
    }

    fn parse_logical_or(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_logical_and()?;
        while self.check(TokenKind::PipePipe) {
            let op = self.advance();
            let rhs = self.parse_logical_and()?;
            lhs = binary(BinaryOp::Or, lhs, rhs, &op);
        }
        Ok(lhs)
    }

    fn parse_logical_and(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_bit_or()?;
        while self.check(TokenKind::AmpAmp) {
            let op = self.advance();
            let rhs = self.parse_bit_or()?;
            lhs = binary(BinaryOp::And, lhs, rhs, &op);
        }
        Ok(lhs)
    }

    fn parse_bit_or(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_bit_xor()?;
        while self.check(TokenKind::Pipe) {
            let op = self.advance();
            let rhs = self.parse_bit_xor()?;
            lhs = binary(BinaryOp::BitOr, lhs, rhs, &op);
        }
        Ok(lhs)
    }

    fn parse_bit_xor(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_bit_and()?;
        while self.check(TokenKind::Caret) {
            let op = self.advance();
            let rhs = self.parse_bit_and()?;
            lhs = binary(BinaryOp::BitXor, lhs, rhs, &op);
        }
        Ok(lhs)
    }

    fn parse_bit_and(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_equality()?;
        while self.check(TokenKind::Amp) {
            let op = self.advance();
            let rhs = self.parse_equality()?;
            lhs = binary(BinaryOp::BitAnd, lhs, rhs, &op);
        }
        Ok(lhs)
    }

    fn parse_equality(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_relational()?;
        loop {
            let op_kind = match self.kind() {
                TokenKind::EqEq => BinaryOp::Eq,
                TokenKind::NotEq => BinaryOp::Ne,
                _ => break,
            };
            let op = self.advance();
            let rhs = self.parse_relational()?;
            lhs = binary(op_kind, lhs, rhs, &op);
        }
        Ok(lhs)
    }

    fn parse_relational(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_shift()?;
        loop {
            let op_kind = match self.kind() {
                TokenKind::Lt => BinaryOp::Lt,
                TokenKind::Gt => BinaryOp::Gt,
                TokenKind::LtEq => BinaryOp::Le,
                TokenKind::GtEq => BinaryOp::Ge,
                _ => break,
            };
            let op = self.advance();
            let rhs = self.parse_shift()?;
            lhs = binary(op_kind, lhs, rhs, &op);
        }
        Ok(lhs)
    }

    fn parse_shift(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_additive()?;
        loop {
            let op_kind = match self.kind() {
                TokenKind::Shl => BinaryOp::Shl,
                TokenKind::Shr => BinaryOp::Shr,
                _ => break,
            };
            let op = self.advance();
            let rhs = self.parse_additive()?;
            lhs = binary(op_kind, lhs, rhs, &op);
        }
        Ok(lhs)
    }

    fn parse_additive(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_multiplicative()?;
        loop {
            let op_kind = match self.kind() {
                TokenKind::Plus => BinaryOp::Add,
                TokenKind::Minus => BinaryOp::Sub,
                _ => break,
            };
            let op = self.advance();
            let rhs = self.parse_multiplicative()?;
            lhs = binary(op_kind, lhs, rhs, &op);
        }
        Ok(lhs)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op_kind = match self.kind() {
                TokenKind::Star => BinaryOp::Mul,
                TokenKind::Slash => BinaryOp::Div,
                TokenKind::Percent => BinaryOp::Mod,
                _ => break,
            };
            let op = self.advance();
            let rhs = self.parse_unary()?;
            lhs = binary(op_kind, lhs, rhs, &op);
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        let op_kind = match self.kind() {
            TokenKind::Not => Some(UnaryOp::Not),
            TokenKind::Minus => Some(UnaryOp::Neg),
            TokenKind::Tilde => Some(UnaryOp::BitNot),
            TokenKind::Amp => Some(UnaryOp::AddrOf),
            TokenKind::Star => Some(UnaryOp::Deref),
            _ => None,
        };
        if let Some(op_kind) = op_kind {
            let op = self.advance();
            let operand = self.parse_unary()?;
            return Ok(Expr::Unary {
                op: op_kind,
                operand: Box::new(operand),
                line: op.line,
                column: op.column,
            });
        }
        if self.check(TokenKind::KwSizeof) {
            return self.parse_sizeof();
        }
        self.parse_postfix()
    }

    fn parse_sizeof(&mut self) -> Result<Expr, ParseError> {
        let kw = self.expect(TokenKind::KwSizeof, "'sizeof'")?;
        if self.check(TokenKind::LParen) {
            let saved = self.pos;
            self.advance();
            if self.at_type_specifier() {
                let ty = self.parse_type_specifier()?;
                self.expect(TokenKind::RParen, "')' after sizeof type")?;
                return Ok(Expr::Sizeof {
                    arg: SizeofArg::Type(ty),
                    line: kw.line,
                    column: kw.column,
                });
            }
            self.pos = saved;
        }
        let operand = self.parse_unary()?;
        Ok(Expr::Sizeof {
            arg: SizeofArg::Expr(Box::new(operand)),
            line: kw.line,
            column: kw.column,
        })
    }

    fn parse_postfix(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.parse_primary()?;
        loop {
            match self.kind() {
                TokenKind::LParen => {
                    let open = self.advance();
                    let callee = match &expr {
                        Expr::Identifier { name, .. } => name.clone(),
                        _ => {
                            return Err(ParseError::new(
                                "expected function name before '('",
                                &open,
                            ));
                        }
                    };
                    let mut args = Vec::new();
                    if !self.check(TokenKind::RParen) {
                        loop {
                            args.push(self.parse_assignment()?);
                            if !self.matches(TokenKind::Comma) {
                                break;
                            }
                        }
                    }
                    self.expect(TokenKind::RParen, "')' after arguments")?;
                    expr = Expr::Call {
                        callee,
                        args,
                        line: open.line,
                        column: open.column,
                    };
                }
                TokenKind::LBracket => {
                    let open = self.advance();
                    let index = self.parse_expression()?;
                    self.expect(TokenKind::RBracket, "']' after index")?;
                    expr = Expr::ArrayAccess {
                        base: Box::new(expr),
                        index: Box::new(index),
                        line: open.line,
                        column: open.column,
                    };
                }
                TokenKind::Dot | TokenKind::Arrow => {
                    let through_pointer = self.kind() == TokenKind::Arrow;
                    let op = self.advance();
                    let member = self.expect(TokenKind::Identifier, "member name")?;
                    expr = Expr::MemberAccess {
                        base: Box::new(expr),
                        member: member.lexeme,
                        through_pointer,
                        line: op.line,
                        column: op.column,
                    };
                }
                TokenKind::PlusPlus | TokenKind::MinusMinus => {
                    let op_kind = if self.kind() == TokenKind::PlusPlus {
                        UnaryOp::PostInc
                    } else {
                        UnaryOp::PostDec
                    };
                    let op = self.advance();
                    expr = Expr::Unary {
                        op: op_kind,
                        operand: Box::new(expr),
                        line: op.line,
                        column: op.column,
                    };
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        match self.kind() {
            TokenKind::Number => {
                let t = self.advance();
                Ok(Expr::Number {
                    lexeme: t.lexeme,
                    line: t.line,
                    column: t.column,
                })
            }
            TokenKind::StringLit => {
                let t = self.advance();
                Ok(Expr::StringLit {
                    lexeme: t.lexeme,
                    line: t.line,
                    column: t.column,
                })
            }
            TokenKind::CharLit => {
                let t = self.advance();
                Ok(Expr::CharLit {
                    lexeme: t.lexeme,
                    line: t.line,
                    column: t.column,
                })
            }
            TokenKind::Identifier => {
                let t = self.advance();
                Ok(Expr::Identifier {
                    name: t.lexeme,
                    line: t.line,
                    column: t.column,
                })
            }
            TokenKind::LParen => {
                // Cast or parenthesized expression: try the cast shape,
                // rewind when the parenthesis does not open a type
                let saved = self.pos;
                let open = self.advance();
                if self.at_type_specifier() {
                    let ty = self.parse_type_specifier()?;
                    if self.check(TokenKind::RParen) {
                        self.advance();
                        let operand = self.parse_unary()?;
                        return Ok(Expr::Cast {
                            target: ty,
                            operand: Box::new(operand),
                            line: open.line,
                            column: open.column,
                        });
                    }
                    self.pos = saved;
                    self.advance();
                }
                let inner = self.parse_expression()?;
                self.expect(TokenKind::RParen, "')'")?;
                Ok(inner)
            }
            _ => Err(ParseError::new(
                format!("expected expression, found '{}'", self.current().lexeme),
                self.current(),
            )),
        }
    }
}

fn binary(op: BinaryOp, lhs: Expr, rhs: Expr, token: &Token) -> Expr {
    Expr::Binary {
        op,
        lhs: Box::new(lhs),
        rhs: Box::new(rhs),
        line: token.line,
        column: token.column,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Lexer;

    fn parse(source: &str) -> Program {
        let tokens = Lexer::new(source).tokenize().unwrap();
        Parser::new(tokens).parse().unwrap()
    }

    fn parse_err(source: &str) -> ParseError {
        let tokens = Lexer::new(source).tokenize().unwrap();
        Parser::new(tokens).parse().unwrap_err()
    }

    #[test]
    fn test_parse_minimal_function() {
        let program = parse("int main() { return 42; }");
        assert_eq!(program.functions.len(), 1);
        let main = &program.functions[0];
        assert_eq!(main.name, "main");
        assert_eq!(main.params.len(), 0);
        let body = main.body.as_ref().unwrap();
        assert!(matches!(body.statements[0], Stmt::Return { .. }));
    }

    #[test]
    fn test_parse_parameters() {
        let program = parse("int add(int a, int b) { return a + b; }");
        let add = &program.functions[0];
        assert_eq!(add.params.len(), 2);
        assert_eq!(add.params[0].name, "a");
        assert_eq!(add.params[1].name, "b");
    }

    #[test]
    fn test_void_parameter_list_is_empty() {
        let program = parse("int f(void) { return 0; }");
        assert!(program.functions[0].params.is_empty());
    }

    #[test]
    fn test_prototype_has_no_body() {
        let program = parse("int strlen(char *s);");
        assert!(program.functions[0].body.is_none());
    }

    #[test]
    fn test_precedence_mul_over_add() {
        let program = parse("int f() { return 1 + 2 * 3; }");
        let body = program.functions[0].body.as_ref().unwrap();
        let Stmt::Return { value: Some(e), .. } = &body.statements[0] else {
            panic!("expected return");
        };
        let Expr::Binary { op, rhs, .. } = e else {
            panic!("expected binary");
        };
        assert_eq!(*op, BinaryOp::Add);
        assert!(matches!(**rhs, Expr::Binary { op: BinaryOp::Mul, .. }));
    }

    #[test]
    fn test_assignment_right_associative() {
        let program = parse("int f() { int a; int b; a = b = 1; return a; }");
        let body = program.functions[0].body.as_ref().unwrap();
        let Stmt::Expression(Expr::Assignment { value, .. }) = &body.statements[2] else {
            panic!("expected assignment statement");
        };
        assert!(matches!(**value, Expr::Assignment { .. }));
    }

    #[test]
    fn test_assignment_target_shapes() {
        // Property: every assignment target is Identifier, MemberAccess,
        // or ArrayAccess
        let program = parse(
            "int f(struct point *p, int *a) { p->x = 1; a[0] = 2; return 0; }",
        );
        let body = program.functions[0].body.as_ref().unwrap();
        for stmt in &body.statements {
            if let Stmt::Expression(Expr::Assignment { target, .. }) = stmt {
                assert!(target.is_lvalue());
            }
        }
        let err = parse_err("int f() { 1 = 2; return 0; }");
        assert!(err.message.contains("invalid assignment target"));
    }

    #[test]
    fn test_cast_vs_parenthesized() {
        let program = parse("int f(long n) { return (int)n + (1 + 2); }");
        let body = program.functions[0].body.as_ref().unwrap();
        let Stmt::Return { value: Some(e), .. } = &body.statements[0] else {
            panic!("expected return");
        };
        let Expr::Binary { lhs, .. } = e else {
            panic!("expected binary");
        };
        assert!(matches!(**lhs, Expr::Cast { .. }));
    }

    #[test]
    fn test_array_declarator_promotes_to_pointer() {
        let program = parse("int buf[64]; int main() { return 0; }");
        assert_eq!(program.globals[0].ty.pointer_count, 1);
    }

    #[test]
    fn test_struct_declaration_records_members() {
        let program = parse("struct point { int x; int y; }; int main() { return 0; }");
        assert_eq!(program.structs.len(), 1);
        assert_eq!(program.structs[0].members.len(), 2);
        assert_eq!(program.structs[0].members[1].name, "y");
    }

    #[test]
    fn test_for_with_declared_induction_variable() {
        let program = parse("int f() { for (int i = 0; i < 5; i = i + 1) { } return 0; }");
        let body = program.functions[0].body.as_ref().unwrap();
        let Stmt::For { init, cond, step, .. } = &body.statements[0] else {
            panic!("expected for");
        };
        assert!(matches!(init, Some(ForInit::Declaration(_))));
        assert!(cond.is_some());
        assert!(step.is_some());
    }

    #[test]
    fn test_kernel_style_input() {
        let program = parse(
            "static int __init my_driver_init(void) { return 0; }\n\
             EXPORT_SYMBOL(my_driver_init);\n",
        );
        assert_eq!(program.functions[0].name, "my_driver_init");
    }

    #[test]
    fn test_asm_statement_is_opaque() {
        let program = parse("int f() { asm volatile (\"nop\"); return 0; }");
        let body = program.functions[0].body.as_ref().unwrap();
        assert!(matches!(body.statements[0], Stmt::Asm { .. }));
    }

    #[test]
    fn test_preprocessor_lines_are_skipped() {
        let program = parse("# 12 \"drv.c\"\nint f() { return 0; }");
        assert_eq!(program.functions[0].line, 12);
    }

    #[test]
    fn test_sizeof_type_and_expr() {
        let program = parse("int f(int x) { return sizeof(int) + sizeof x; }");
        let body = program.functions[0].body.as_ref().unwrap();
        let Stmt::Return { value: Some(e), .. } = &body.statements[0] else {
            panic!("expected return");
        };
        let Expr::Binary { lhs, rhs, .. } = e else {
            panic!("expected binary");
        };
        assert!(matches!(**lhs, Expr::Sizeof { arg: SizeofArg::Type(_), .. }));
        assert!(matches!(**rhs, Expr::Sizeof { arg: SizeofArg::Expr(_), .. }));
    }

    #[test]
    fn test_missing_semicolon_reports_location() {
        let err = parse_err("int f() { return 1 }");
        assert!(err.message.contains("';'"));
        assert_eq!(err.line, 1);
    }

    #[test]
    fn test_unexpected_top_level_token() {
        let err = parse_err("return 1;");
        assert!(err.message.contains("expected declaration"));
    }

    #[test]
    fn test_comma_separated_declarators() {
        let program = parse("int f() { int a = 1, b = 2; return a + b; }");
        let body = program.functions[0].body.as_ref().unwrap();
        assert!(matches!(body.statements[0], Stmt::Declaration(_)));
        assert!(matches!(body.statements[1], Stmt::Declaration(_)));
    }

    #[test]
    fn test_postfix_increment() {
        let program = parse("int f(int i) { i++; return i; }");
        let body = program.functions[0].body.as_ref().unwrap();
        let Stmt::Expression(Expr::Unary { op, .. }) = &body.statements[0] else {
            panic!("expected unary statement");
        };
        assert_eq!(*op, UnaryOp::PostInc);
    }
}
