//! AST to IR lowering
//!
//! Structured construction: every local gets an `alloca` hoisted into
//! the entry block, identifier uses load from their slot, and control
//! flow lowers into labeled blocks (`then_<k>`/`else_<k>`/`merge_<k>`,
//! `while.cond<k>`/`while.body<k>`/`while.after<k>`,
//! `for.cond<k>`/`for.body<k>`/`for.inc<k>`/`for.after<k>`). The block
//! builder drops anything emitted after a terminator, so dead code after
//! `return` silently disappears and the single-terminator invariant
//! holds by construction. `lower` validates the finished module before
//! handing it on.

use crate::ast::{
    self, CompoundStmt, Declaration, Expr, ForInit, Program, SizeofArg, Stmt, UnaryOp,
};
use crate::ast::BinaryOp;
use crate::builtins::builtin_signature;
use crate::config::CompilerConfig;
use crate::ir::{
    BasicBlock, BinOp, CastOp, Function, GlobalVar, Instruction, IrError, IrType, Module, Value,
    ValueId, ir_type_of,
};
use crate::types::{BaseType, Type};
use std::collections::HashMap;

/// Per-function builder state.
struct FunctionBuilder {
    blocks: Vec<BasicBlock>,
    current: usize,
    next_value: ValueId,
    /// Allocas collected here and prepended to the entry block when the
    /// function is sealed, so control flow never splits them
    entry_allocas: Vec<Instruction>,
    /// Scope stack: name -> (alloca id, semantic type)
    scopes: Vec<HashMap<String, (ValueId, Type)>>,
    label_counter: usize,
    return_type: Type,
}

impl FunctionBuilder {
    fn new(param_count: usize, return_type: Type) -> Self {
        FunctionBuilder {
            blocks: vec![BasicBlock::new("entry")],
            current: 0,
            next_value: param_count as ValueId + 1,
            entry_allocas: Vec::new(),
            scopes: vec![HashMap::new()],
            label_counter: 0,
            return_type,
        }
    }

    fn fresh_value(&mut self) -> ValueId {
        let id = self.next_value;
        self.next_value += 1;
        id
    }

    fn fresh_label(&mut self) -> usize {
        let k = self.label_counter;
        self.label_counter += 1;
        k
    }

    fn terminated(&self) -> bool {
        self.blocks[self.current].terminator().is_some()
    }

    fn emit(&mut self, instruction: Instruction) {
        if !self.terminated() {
            self.blocks[self.current].instructions.push(instruction);
        }
    }

    fn start_block(&mut self, label: String) {
        self.blocks.push(BasicBlock::new(label));
        self.current = self.blocks.len() - 1;
    }

    fn alloca(&mut self, ty: IrType) -> ValueId {
        let id = self.fresh_value();
        self.entry_allocas.push(Instruction::Alloca { dest: id, ty });
        id
    }

    fn enter_scope(&mut self) {
        self.scopes.push(HashMap::new());
    }

    fn exit_scope(&mut self) {
        self.scopes.pop();
    }

    fn declare_local(&mut self, name: &str, slot: ValueId, ty: Type) {
        self.scopes
            .last_mut()
            .expect("scope stack never empty")
            .insert(name.to_string(), (slot, ty));
    }

    fn lookup_local(&self, name: &str) -> Option<&(ValueId, Type)> {
        self.scopes.iter().rev().find_map(|scope| scope.get(name))
    }

    /// Seal the function: hoist allocas into entry and give every block
    /// that still falls off the end an explicit return.
    fn finish(mut self) -> Vec<BasicBlock> {
        let mut entry = std::mem::take(&mut self.blocks[0].instructions);
        let mut hoisted = std::mem::take(&mut self.entry_allocas);
        hoisted.append(&mut entry);
        self.blocks[0].instructions = hoisted;

        let fallthrough = if self.return_type.is_void() {
            Instruction::Ret { value: None }
        } else {
            Instruction::Ret {
                value: Some(Value::Const(0)),
            }
        };
        for block in &mut self.blocks {
            if block.terminator().is_none() {
                block.instructions.push(fallthrough.clone());
            }
        }
        self.blocks
    }
}

pub struct IrGen {
    /// Function name -> semantic return type, for typing call results
    signatures: HashMap<String, Type>,
    /// Struct tag -> ordered member (name, type) list
    structs: HashMap<String, Vec<(String, Type)>>,
    /// Global name -> semantic type
    globals: HashMap<String, Type>,
}

impl IrGen {
    pub fn new(config: &CompilerConfig) -> Self {
        let mut signatures = HashMap::new();
        for name in crate::builtins::BUILTIN_NAMES {
            if let Some(sig) = builtin_signature(name) {
                signatures.insert((*name).to_string(), sig.return_type);
            }
        }
        for external in &config.external_functions {
            signatures.insert(external.name.clone(), external.signature().return_type);
        }
        IrGen {
            signatures,
            structs: HashMap::new(),
            globals: HashMap::new(),
        }
    }

    /// Lower a validated program into an IR module. Errors here are
    /// generator bugs, not user mistakes; the semantic pass has already
    /// vetted the input.
    pub fn lower(&mut self, program: &Program) -> Result<Module, IrError> {
        for s in &program.structs {
            let members = s
                .members
                .iter()
                .map(|m| (m.name.clone(), m.ty.resolve()))
                .collect();
            self.structs.insert(s.name.clone(), members);
        }
        for f in &program.functions {
            self.signatures
                .insert(f.name.clone(), f.return_type.resolve());
        }

        let mut module = Module::default();
        for g in &program.globals {
            let ty = g.ty.resolve();
            self.globals.insert(g.name.clone(), ty.clone());
            module.globals.push(GlobalVar {
                name: g.name.clone(),
                ty: ir_type_of(&ty),
                init: g.init.as_ref().map(const_fold),
            });
        }
        for f in &program.functions {
            if f.body.is_some() {
                module.functions.push(self.lower_function(f)?);
            }
        }
        module.validate()?;
        Ok(module)
    }

    fn lower_function(&mut self, decl: &ast::FunctionDecl) -> Result<Function, IrError> {
        let return_type = decl.return_type.resolve();
        let mut f = FunctionBuilder::new(decl.params.len(), return_type.clone());

        // Parameters arrive as %1..%n; give each a slot like any local
        for (i, param) in decl.params.iter().enumerate() {
            let ty = param.ty.resolve();
            let slot = f.alloca(ir_type_of(&ty));
            f.emit(Instruction::Store {
                value: Value::Temp(i as ValueId + 1),
                dest: Value::Temp(slot),
            });
            f.declare_local(&param.name, slot, ty);
        }

        let body = decl.body.as_ref().expect("prototype reached lowering");
        self.lower_compound(&mut f, body)?;

        Ok(Function {
            name: decl.name.clone(),
            return_type: ir_type_of(&return_type),
            params: decl
                .params
                .iter()
                .map(|p| (p.name.clone(), ir_type_of(&p.ty.resolve())))
                .collect(),
            blocks: f.finish(),
        })
    }

    fn lower_compound(
        &mut self,
        f: &mut FunctionBuilder,
        block: &CompoundStmt,
    ) -> Result<(), IrError> {
        f.enter_scope();
        for stmt in &block.statements {
            if f.terminated() {
                break;
            }
            self.lower_stmt(f, stmt)?;
        }
        f.exit_scope();
        Ok(())
    }

    fn lower_stmt(&mut self, f: &mut FunctionBuilder, stmt: &Stmt) -> Result<(), IrError> {
        match stmt {
            Stmt::Compound(block) => self.lower_compound(f, block),
            Stmt::Declaration(decl) => self.lower_local_decl(f, decl),
            Stmt::Expression(expr) => {
                self.lower_expr(f, expr)?;
                Ok(())
            }
            Stmt::Return { value, .. } => {
                let value = match value {
                    Some(expr) => Some(self.lower_expr(f, expr)?.0),
                    None => None,
                };
                f.emit(Instruction::Ret { value });
                Ok(())
            }
            Stmt::If {
                cond,
                then_branch,
                else_branch,
                ..
            } => self.lower_if(f, cond, then_branch, else_branch.as_deref()),
            Stmt::While { cond, body, .. } => self.lower_while(f, cond, body),
            Stmt::For {
                init,
                cond,
                step,
                body,
                ..
            } => self.lower_for(f, init.as_ref(), cond.as_ref(), step.as_ref(), body),
            // Inline assembly and empty statements produce no IR
            Stmt::Asm { .. } | Stmt::Empty => Ok(()),
        }
    }

    fn lower_local_decl(
        &mut self,
        f: &mut FunctionBuilder,
        decl: &Declaration,
    ) -> Result<(), IrError> {
        let ty = decl.ty.resolve();
        let slot = f.alloca(ir_type_of(&ty));
        f.declare_local(&decl.name, slot, ty);
        if let Some(init) = &decl.init {
            let (value, _) = self.lower_expr(f, init)?;
            f.emit(Instruction::Store {
                value,
                dest: Value::Temp(slot),
            });
        }
        Ok(())
    }

    fn lower_if(
        &mut self,
        f: &mut FunctionBuilder,
        cond: &Expr,
        then_branch: &Stmt,
        else_branch: Option<&Stmt>,
    ) -> Result<(), IrError> {
        let k = f.fresh_label();
        let then_label = format!("then_{}", k);
        let merge_label = format!("merge_{}", k);
        let else_label = if else_branch.is_some() {
            format!("else_{}", k)
        } else {
            merge_label.clone()
        };

        let (cond_value, _) = self.lower_expr(f, cond)?;
        f.emit(Instruction::JumpIf {
            cond: cond_value,
            then_label: then_label.clone(),
            else_label: else_label.clone(),
        });

        f.start_block(then_label);
        self.lower_stmt(f, then_branch)?;
        f.emit(Instruction::Jump {
            target: merge_label.clone(),
        });

        if let Some(else_branch) = else_branch {
            f.start_block(else_label);
            self.lower_stmt(f, else_branch)?;
            f.emit(Instruction::Jump {
                target: merge_label.clone(),
            });
        }

        f.start_block(merge_label);
        Ok(())
    }

    fn lower_while(
        &mut self,
        f: &mut FunctionBuilder,
        cond: &Expr,
        body: &Stmt,
    ) -> Result<(), IrError> {
        let k = f.fresh_label();
        let cond_label = format!("while.cond{}", k);
        let body_label = format!("while.body{}", k);
        let after_label = format!("while.after{}", k);

        f.emit(Instruction::Jump {
            target: cond_label.clone(),
        });
        f.start_block(cond_label.clone());
        let (cond_value, _) = self.lower_expr(f, cond)?;
        f.emit(Instruction::JumpIf {
            cond: cond_value,
            then_label: body_label.clone(),
            else_label: after_label.clone(),
        });

        f.start_block(body_label);
        self.lower_stmt(f, body)?;
        f.emit(Instruction::Jump { target: cond_label });

        f.start_block(after_label);
        Ok(())
    }

    fn lower_for(
        &mut self,
        f: &mut FunctionBuilder,
        init: Option<&ForInit>,
        cond: Option<&Expr>,
        step: Option<&Expr>,
        body: &Stmt,
    ) -> Result<(), IrError> {
        f.enter_scope();
        match init {
            Some(ForInit::Declaration(decl)) => self.lower_local_decl(f, decl)?,
            Some(ForInit::Expression(expr)) => {
                self.lower_expr(f, expr)?;
            }
            None => {}
        }

        let k = f.fresh_label();
        let cond_label = format!("for.cond{}", k);
        let body_label = format!("for.body{}", k);
        let inc_label = format!("for.inc{}", k);
        let after_label = format!("for.after{}", k);

        f.emit(Instruction::Jump {
            target: cond_label.clone(),
        });
        f.start_block(cond_label.clone());
        match cond {
            Some(cond) => {
                let (cond_value, _) = self.lower_expr(f, cond)?;
                f.emit(Instruction::JumpIf {
                    cond: cond_value,
                    then_label: body_label.clone(),
                    else_label: after_label.clone(),
                });
            }
            None => {
                f.emit(Instruction::Jump {
                    target: body_label.clone(),
                });
            }
        }

        f.start_block(body_label);
        self.lower_stmt(f, body)?;
        f.emit(Instruction::Jump {
            target: inc_label.clone(),
        });

        f.start_block(inc_label);
        if let Some(step) = step {
            self.lower_expr(f, step)?;
        }
        f.emit(Instruction::Jump { target: cond_label });

        f.start_block(after_label);
        f.exit_scope();
        Ok(())
    }

    /// Lower an expression for its value. Returns the value and its
    /// semantic type, which drives pointer scaling and call typing.
    fn lower_expr(&mut self, f: &mut FunctionBuilder, expr: &Expr) -> Result<(Value, Type), IrError> {
        match expr {
            Expr::Number { lexeme, .. } => Ok((
                Value::Const(ast::number_literal_value(lexeme)),
                ast::number_literal_type(lexeme),
            )),
            Expr::CharLit { lexeme, .. } => {
                Ok((Value::Const(ast::char_literal_value(lexeme)), Type::char_()))
            }
            // String data has no home in the object layout; the literal
            // lowers to a null char pointer
            Expr::StringLit { .. } => Ok((Value::Const(0), Type::char_ptr())),
            Expr::Identifier { .. } | Expr::MemberAccess { .. } | Expr::ArrayAccess { .. } => {
                let (address, ty) = self.lower_address(f, expr)?;
                let dest = f.fresh_value();
                f.emit(Instruction::Load {
                    dest,
                    ty: ir_type_of(&ty),
                    src: address,
                });
                Ok((Value::Temp(dest), ty))
            }
            Expr::Assignment { target, value, .. } => {
                let (address, target_ty) = self.lower_address(f, target)?;
                let (value, _) = self.lower_expr(f, value)?;
                f.emit(Instruction::Store {
                    value: value.clone(),
                    dest: address,
                });
                Ok((value, target_ty))
            }
            Expr::Binary {
                op, lhs, rhs, ..
            } => self.lower_binary(f, *op, lhs, rhs),
            Expr::Unary { op, operand, .. } => self.lower_unary(f, *op, operand),
            Expr::Call { callee, args, .. } => self.lower_call(f, callee, args),
            Expr::Sizeof { arg, .. } => {
                let size = match arg {
                    SizeofArg::Type(specifier) => specifier.resolve().size_in_bytes(),
                    SizeofArg::Expr(inner) => self.static_expr_type(f, inner).size_in_bytes(),
                };
                Ok((Value::Const(size), Type::int()))
            }
            Expr::Cast { target, operand, .. } => self.lower_cast(f, target.resolve(), operand),
        }
    }

    fn lower_binary(
        &mut self,
        f: &mut FunctionBuilder,
        op: BinaryOp,
        lhs: &Expr,
        rhs: &Expr,
    ) -> Result<(Value, Type), IrError> {
        if op.is_logical() {
            return self.lower_short_circuit(f, op, lhs, rhs);
        }

        let (lhs_value, lhs_ty) = self.lower_expr(f, lhs)?;
        let (rhs_value, rhs_ty) = self.lower_expr(f, rhs)?;

        // Pointer arithmetic scales the integer side by the element size
        if matches!(op, BinaryOp::Add | BinaryOp::Sub) {
            if lhs_ty.is_pointer() && rhs_ty.is_integer() {
                let scaled = self.scale_index(f, rhs_value, &lhs_ty);
                let dest = f.fresh_value();
                f.emit(Instruction::Bin {
                    dest,
                    op: if op == BinaryOp::Add { BinOp::Add } else { BinOp::Sub },
                    ty: IrType::Ptr,
                    lhs: lhs_value,
                    rhs: scaled,
                });
                return Ok((Value::Temp(dest), lhs_ty));
            }
            if op == BinaryOp::Add && lhs_ty.is_integer() && rhs_ty.is_pointer() {
                let scaled = self.scale_index(f, lhs_value, &rhs_ty);
                let dest = f.fresh_value();
                f.emit(Instruction::Bin {
                    dest,
                    op: BinOp::Add,
                    ty: IrType::Ptr,
                    lhs: rhs_value,
                    rhs: scaled,
                });
                return Ok((Value::Temp(dest), rhs_ty));
            }
        }

        let result_ty = if op.is_comparison() {
            Type::int()
        } else {
            Type::promote(&lhs_ty, &rhs_ty)
        };
        let operand_ty = Type::promote(&lhs_ty, &rhs_ty);
        let ir_ty = ir_type_of(&operand_ty);
        let lhs_value = self.widen(f, lhs_value, &lhs_ty, &operand_ty);
        let rhs_value = self.widen(f, rhs_value, &rhs_ty, &operand_ty);

        let ir_op = match op {
            BinaryOp::Add => BinOp::Add,
            BinaryOp::Sub => BinOp::Sub,
            BinaryOp::Mul => BinOp::Mul,
            BinaryOp::Div => BinOp::Div,
            BinaryOp::Mod => BinOp::Mod,
            BinaryOp::Eq => BinOp::Eq,
            BinaryOp::Ne => BinOp::Ne,
            BinaryOp::Lt => BinOp::Lt,
            BinaryOp::Le => BinOp::Le,
            BinaryOp::Gt => BinOp::Gt,
            BinaryOp::Ge => BinOp::Ge,
            BinaryOp::BitAnd => BinOp::And,
            BinaryOp::BitOr => BinOp::Or,
            BinaryOp::BitXor => BinOp::Xor,
            BinaryOp::Shl => BinOp::Shl,
            BinaryOp::Shr => BinOp::Shr,
            BinaryOp::And | BinaryOp::Or => unreachable!("handled as short-circuit"),
        };
        let dest = f.fresh_value();
        f.emit(Instruction::Bin {
            dest,
            op: ir_op,
            ty: ir_ty,
            lhs: lhs_value,
            rhs: rhs_value,
        });
        Ok((Value::Temp(dest), result_ty))
    }

    /// `&&`/`||` lower into branch blocks writing 0/1 through a
    /// temporary slot, then a merge block loading the result.
    fn lower_short_circuit(
        &mut self,
        f: &mut FunctionBuilder,
        op: BinaryOp,
        lhs: &Expr,
        rhs: &Expr,
    ) -> Result<(Value, Type), IrError> {
        let k = f.fresh_label();
        let prefix = if op == BinaryOp::And { "land" } else { "lor" };
        let rhs_label = format!("{}.rhs{}", prefix, k);
        let short_label = format!("{}.short{}", prefix, k);
        let end_label = format!("{}.end{}", prefix, k);

        let slot = f.alloca(IrType::I32);
        let (lhs_value, _) = self.lower_expr(f, lhs)?;
        if op == BinaryOp::And {
            // False short-circuits
            f.emit(Instruction::JumpIf {
                cond: lhs_value,
                then_label: rhs_label.clone(),
                else_label: short_label.clone(),
            });
        } else {
            // True short-circuits
            f.emit(Instruction::JumpIf {
                cond: lhs_value,
                then_label: short_label.clone(),
                else_label: rhs_label.clone(),
            });
        }

        f.start_block(rhs_label);
        let (rhs_value, _) = self.lower_expr(f, rhs)?;
        let normalized = f.fresh_value();
        f.emit(Instruction::Bin {
            dest: normalized,
            op: BinOp::Ne,
            ty: IrType::I32,
            lhs: rhs_value,
            rhs: Value::Const(0),
        });
        f.emit(Instruction::Store {
            value: Value::Temp(normalized),
            dest: Value::Temp(slot),
        });
        f.emit(Instruction::Jump {
            target: end_label.clone(),
        });

        f.start_block(short_label);
        let short_value = if op == BinaryOp::And { 0 } else { 1 };
        f.emit(Instruction::Store {
            value: Value::Const(short_value),
            dest: Value::Temp(slot),
        });
        f.emit(Instruction::Jump {
            target: end_label.clone(),
        });

        f.start_block(end_label);
        let dest = f.fresh_value();
        f.emit(Instruction::Load {
            dest,
            ty: IrType::I32,
            src: Value::Temp(slot),
        });
        Ok((Value::Temp(dest), Type::int()))
    }

    fn lower_unary(
        &mut self,
        f: &mut FunctionBuilder,
        op: UnaryOp,
        operand: &Expr,
    ) -> Result<(Value, Type), IrError> {
        match op {
            UnaryOp::Not => {
                let (value, _) = self.lower_expr(f, operand)?;
                let dest = f.fresh_value();
                f.emit(Instruction::Not {
                    dest,
                    operand: value,
                });
                Ok((Value::Temp(dest), Type::int()))
            }
            UnaryOp::Neg => {
                let (value, ty) = self.lower_expr(f, operand)?;
                let dest = f.fresh_value();
                f.emit(Instruction::Bin {
                    dest,
                    op: BinOp::Sub,
                    ty: ir_type_of(&ty),
                    lhs: Value::Const(0),
                    rhs: value,
                });
                Ok((Value::Temp(dest), ty))
            }
            UnaryOp::BitNot => {
                let (value, ty) = self.lower_expr(f, operand)?;
                let dest = f.fresh_value();
                f.emit(Instruction::Bin {
                    dest,
                    op: BinOp::Xor,
                    ty: ir_type_of(&ty),
                    lhs: value,
                    rhs: Value::Const(-1),
                });
                Ok((Value::Temp(dest), ty))
            }
            UnaryOp::AddrOf => {
                let (address, ty) = self.lower_address(f, operand)?;
                Ok((address, ty.referenced()))
            }
            UnaryOp::Deref => {
                let (pointer, ty) = self.lower_expr(f, operand)?;
                let element = ty.dereferenced().ok_or_else(|| {
                    IrError::Lowering(format!("dereference of non-pointer type {}", ty))
                })?;
                let dest = f.fresh_value();
                f.emit(Instruction::Load {
                    dest,
                    ty: ir_type_of(&element),
                    src: pointer,
                });
                Ok((Value::Temp(dest), element))
            }
            UnaryOp::PostInc | UnaryOp::PostDec => {
                let (address, ty) = self.lower_address(f, operand)?;
                let old = f.fresh_value();
                f.emit(Instruction::Load {
                    dest: old,
                    ty: ir_type_of(&ty),
                    src: address.clone(),
                });
                let delta = if ty.is_pointer() {
                    ty.dereferenced()
                        .map(|e| e.size_in_bytes())
                        .unwrap_or(1)
                } else {
                    1
                };
                let new = f.fresh_value();
                f.emit(Instruction::Bin {
                    dest: new,
                    op: if op == UnaryOp::PostInc { BinOp::Add } else { BinOp::Sub },
                    ty: ir_type_of(&ty),
                    lhs: Value::Temp(old),
                    rhs: Value::Const(delta),
                });
                f.emit(Instruction::Store {
                    value: Value::Temp(new),
                    dest: address,
                });
                // The expression's value is the one before the bump
                Ok((Value::Temp(old), ty))
            }
        }
    }

    fn lower_call(
        &mut self,
        f: &mut FunctionBuilder,
        callee: &str,
        args: &[Expr],
    ) -> Result<(Value, Type), IrError> {
        let mut lowered = Vec::with_capacity(args.len());
        for arg in args {
            lowered.push(self.lower_expr(f, arg)?.0);
        }
        let return_type = self
            .signatures
            .get(callee)
            .cloned()
            .ok_or_else(|| IrError::Lowering(format!("call to unregistered function '{}'", callee)))?;
        let ir_ty = ir_type_of(&return_type);
        let dest = if ir_ty == IrType::Void {
            None
        } else {
            Some(f.fresh_value())
        };
        f.emit(Instruction::Call {
            dest,
            ty: ir_ty,
            name: callee.to_string(),
            args: lowered,
        });
        let value = match dest {
            Some(id) => Value::Temp(id),
            None => Value::Const(0),
        };
        Ok((value, return_type))
    }

    fn lower_cast(
        &mut self,
        f: &mut FunctionBuilder,
        target: Type,
        operand: &Expr,
    ) -> Result<(Value, Type), IrError> {
        let (value, from_ty) = self.lower_expr(f, operand)?;
        let from = ir_type_of(&from_ty);
        let to = ir_type_of(&target);
        if from == to || from.is_float() || to.is_float() {
            // Same width or a float involved: no integer conversion applies
            return Ok((value, target));
        }
        let op = if to.size_in_bytes() < from.size_in_bytes() {
            CastOp::Trunc
        } else if from == IrType::I8 && from_ty.base == BaseType::Char && !from_ty.is_pointer() {
            CastOp::Sext
        } else if to.size_in_bytes() > from.size_in_bytes() {
            CastOp::Sext
        } else {
            CastOp::Zext
        };
        let dest = f.fresh_value();
        f.emit(Instruction::Cast {
            dest,
            op,
            from,
            to,
            value,
        });
        Ok((Value::Temp(dest), target))
    }

    /// Address of an lvalue-shaped expression, plus the pointee type.
    fn lower_address(
        &mut self,
        f: &mut FunctionBuilder,
        expr: &Expr,
    ) -> Result<(Value, Type), IrError> {
        match expr {
            Expr::Identifier { name, .. } => {
                if let Some((slot, ty)) = f.lookup_local(name) {
                    return Ok((Value::Temp(*slot), ty.clone()));
                }
                if let Some(ty) = self.globals.get(name) {
                    return Ok((Value::Global(name.clone()), ty.clone()));
                }
                Err(IrError::Lowering(format!(
                    "identifier '{}' survived analysis without a slot",
                    name
                )))
            }
            Expr::ArrayAccess { base, index, .. } => {
                let (base_value, base_ty) = self.lower_expr(f, base)?;
                let element = base_ty.dereferenced().ok_or_else(|| {
                    IrError::Lowering(format!("indexing non-pointer type {}", base_ty))
                })?;
                let (index_value, _) = self.lower_expr(f, index)?;
                let scaled = self.scale_index(f, index_value, &base_ty);
                let dest = f.fresh_value();
                f.emit(Instruction::Bin {
                    dest,
                    op: BinOp::Add,
                    ty: IrType::Ptr,
                    lhs: base_value,
                    rhs: scaled,
                });
                Ok((Value::Temp(dest), element))
            }
            Expr::MemberAccess {
                base,
                member,
                through_pointer,
                ..
            } => {
                let (base_address, base_ty) = if *through_pointer {
                    self.lower_expr(f, base)?
                } else {
                    self.lower_address(f, base)?
                };
                let struct_ty = if *through_pointer {
                    base_ty.dereferenced().unwrap_or(base_ty)
                } else {
                    base_ty
                };
                let (offset, member_ty) = self.member_slot(&struct_ty, member);
                if offset == 0 {
                    return Ok((base_address, member_ty));
                }
                let dest = f.fresh_value();
                f.emit(Instruction::Bin {
                    dest,
                    op: BinOp::Add,
                    ty: IrType::Ptr,
                    lhs: base_address,
                    rhs: Value::Const(offset),
                });
                Ok((Value::Temp(dest), member_ty))
            }
            other => Err(IrError::Lowering(format!(
                "expression at line {} is not addressable",
                other.line()
            ))),
        }
    }

    /// Members occupy conservative 8-byte slots in declaration order.
    fn member_slot(&self, struct_ty: &Type, member: &str) -> (i64, Type) {
        if let Some(tag) = &struct_ty.struct_name {
            if let Some(members) = self.structs.get(tag) {
                if let Some(index) = members.iter().position(|(name, _)| name == member) {
                    return (index as i64 * 8, members[index].1.clone());
                }
            }
        }
        (0, Type::int())
    }

    /// Multiply an index by the pointee size when it is not 1.
    fn scale_index(&mut self, f: &mut FunctionBuilder, index: Value, pointer_ty: &Type) -> Value {
        let size = pointer_ty
            .dereferenced()
            .map(|e| e.size_in_bytes())
            .unwrap_or(1);
        if size == 1 {
            return index;
        }
        if let Value::Const(v) = index {
            return Value::Const(v * size);
        }
        let dest = f.fresh_value();
        f.emit(Instruction::Bin {
            dest,
            op: BinOp::Mul,
            ty: IrType::I64,
            lhs: index,
            rhs: Value::Const(size),
        });
        Value::Temp(dest)
    }

    /// Extend an integer operand up to the promoted width.
    fn widen(
        &mut self,
        f: &mut FunctionBuilder,
        value: Value,
        from: &Type,
        to: &Type,
    ) -> Value {
        let from_ir = ir_type_of(from);
        let to_ir = ir_type_of(to);
        if from_ir == to_ir
            || from_ir.is_float()
            || to_ir.is_float()
            || from_ir == IrType::Ptr
            || to_ir == IrType::Ptr
            || from_ir.size_in_bytes() >= to_ir.size_in_bytes()
        {
            return value;
        }
        if let Value::Const(_) = value {
            return value;
        }
        let dest = f.fresh_value();
        f.emit(Instruction::Cast {
            dest,
            op: CastOp::Sext,
            from: from_ir,
            to: to_ir,
            value,
        });
        Value::Temp(dest)
    }

    /// Type of an unevaluated expression, for `sizeof`.
    fn static_expr_type(&self, f: &FunctionBuilder, expr: &Expr) -> Type {
        match expr {
            Expr::Number { lexeme, .. } => ast::number_literal_type(lexeme),
            Expr::CharLit { .. } => Type::char_(),
            Expr::StringLit { .. } => Type::char_ptr(),
            Expr::Identifier { name, .. } => f
                .lookup_local(name)
                .map(|(_, ty)| ty.clone())
                .or_else(|| self.globals.get(name).cloned())
                .unwrap_or_else(Type::int),
            Expr::Binary { op, lhs, rhs, .. } => {
                if op.is_comparison() || op.is_logical() {
                    Type::int()
                } else {
                    Type::promote(
                        &self.static_expr_type(f, lhs),
                        &self.static_expr_type(f, rhs),
                    )
                }
            }
            Expr::Unary { op, operand, .. } => match op {
                UnaryOp::Not => Type::int(),
                UnaryOp::AddrOf => self.static_expr_type(f, operand).referenced(),
                UnaryOp::Deref => self
                    .static_expr_type(f, operand)
                    .dereferenced()
                    .unwrap_or_else(Type::int),
                _ => self.static_expr_type(f, operand),
            },
            Expr::Assignment { target, .. } => self.static_expr_type(f, target),
            Expr::Call { callee, .. } => self
                .signatures
                .get(callee)
                .cloned()
                .unwrap_or_else(Type::int),
            Expr::MemberAccess { .. } => Type::int(),
            Expr::ArrayAccess { base, .. } => self
                .static_expr_type(f, base)
                .dereferenced()
                .unwrap_or_else(Type::int),
            Expr::Sizeof { .. } => Type::int(),
            Expr::Cast { target, .. } => target.resolve(),
        }
    }
}

/// Best-effort constant folding for global initializers; anything the
/// object layout cannot hold becomes zero.
fn const_fold(expr: &Expr) -> i64 {
    match expr {
        Expr::Number { lexeme, .. } => ast::number_literal_value(lexeme),
        Expr::CharLit { lexeme, .. } => ast::char_literal_value(lexeme),
        Expr::Unary {
            op: UnaryOp::Neg,
            operand,
            ..
        } => -const_fold(operand),
        Expr::Binary { op, lhs, rhs, .. } => {
            let l = const_fold(lhs);
            let r = const_fold(rhs);
            match op {
                BinaryOp::Add => l.wrapping_add(r),
                BinaryOp::Sub => l.wrapping_sub(r),
                BinaryOp::Mul => l.wrapping_mul(r),
                BinaryOp::Div if r != 0 => l / r,
                BinaryOp::Shl => l.wrapping_shl(r as u32),
                BinaryOp::Shr => l.wrapping_shr(r as u32),
                BinaryOp::BitAnd => l & r,
                BinaryOp::BitOr => l | r,
                BinaryOp::BitXor => l ^ r,
                _ => 0,
            }
        }
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Lexer;
    use crate::parser::Parser;
    use crate::typechecker::TypeChecker;

    fn lower(source: &str) -> Module {
        let config = CompilerConfig::default();
        let tokens = Lexer::new(source).tokenize().unwrap();
        let program = Parser::new(tokens).parse().unwrap();
        let diags = TypeChecker::new(&config).check_program(&program);
        assert!(diags.is_empty(), "semantic errors: {:?}", diags);
        IrGen::new(&config).lower(&program).unwrap()
    }

    #[test]
    fn test_minimal_function_shape() {
        let module = lower("int main() { return 42; }");
        assert_eq!(module.functions.len(), 1);
        let main = &module.functions[0];
        assert_eq!(main.blocks[0].label, "entry");
        assert!(matches!(
            main.blocks[0].instructions.last(),
            Some(Instruction::Ret {
                value: Some(Value::Const(42))
            })
        ));
    }

    #[test]
    fn test_call_carries_two_args() {
        let module = lower(
            "int add(int a, int b) { return a + b; }\n\
             int main() { int result = add(5, 3); return result; }",
        );
        assert_eq!(module.functions.len(), 2);
        let main = module.functions.iter().find(|f| f.name == "main").unwrap();
        let call = main
            .blocks
            .iter()
            .flat_map(|b| &b.instructions)
            .find_map(|i| match i {
                Instruction::Call { args, name, .. } if name == "add" => Some(args),
                _ => None,
            })
            .expect("main must call add");
        assert_eq!(call.len(), 2);
    }

    #[test]
    fn test_if_else_block_labels() {
        let module = lower("int main() { int x = 5; if (x > 0) { return 1; } else { return 0; } }");
        let main = &module.functions[0];
        assert!(main.blocks.len() >= 3);
        let labels: Vec<&str> = main.blocks.iter().map(|b| b.label.as_str()).collect();
        assert!(labels.iter().any(|l| l.starts_with("then_")));
        assert!(labels.iter().any(|l| l.starts_with("else_")));
        assert!(labels.iter().any(|l| l.starts_with("merge_")));
    }

    #[test]
    fn test_if_without_else_has_no_else_block() {
        let module = lower("int main() { int x = 1; if (x) { x = 2; } return x; }");
        let labels: Vec<&str> = module.functions[0]
            .blocks
            .iter()
            .map(|b| b.label.as_str())
            .collect();
        assert!(labels.iter().any(|l| l.starts_with("then_")));
        assert!(!labels.iter().any(|l| l.starts_with("else_")));
    }

    #[test]
    fn test_while_and_for_label_families() {
        let module = lower(
            "int main() { int n = 0; while (n < 3) { n = n + 1; } \
             for (int i = 0; i < 5; i = i + 1) { n = n + i; } return n; }",
        );
        let labels: Vec<&str> = module.functions[0]
            .blocks
            .iter()
            .map(|b| b.label.as_str())
            .collect();
        for family in ["while.cond", "while.body", "while.after", "for.cond", "for.body", "for.inc", "for.after"] {
            assert!(
                labels.iter().any(|l| l.starts_with(family)),
                "missing {} in {:?}",
                family,
                labels
            );
        }
    }

    #[test]
    fn test_every_block_terminated_and_defs_precede_uses() {
        // validate() runs inside lower(); reaching here means the
        // invariants held for a control-heavy program
        let module = lower(
            "int factorial(int n) { if (n <= 1) { return 1; } else { return n * factorial(n - 1); } }\n\
             int main() { return factorial(5); }",
        );
        assert!(module.validate().is_ok());
        let factorial = &module.functions[0];
        assert!(factorial.blocks.len() > 2);
    }

    #[test]
    fn test_short_circuit_uses_slot_and_branches() {
        let module = lower("int main() { int a = 1; int b = 0; return a && b; }");
        let main = &module.functions[0];
        let labels: Vec<&str> = main.blocks.iter().map(|b| b.label.as_str()).collect();
        assert!(labels.iter().any(|l| l.starts_with("land.rhs")));
        assert!(labels.iter().any(|l| l.starts_with("land.short")));
        assert!(labels.iter().any(|l| l.starts_with("land.end")));
        assert!(module.validate().is_ok());
    }

    #[test]
    fn test_globals_lower_with_initializers() {
        let module = lower("int global_var = 12345; int main() { return global_var; }");
        assert_eq!(module.globals.len(), 1);
        assert_eq!(module.globals[0].name, "global_var");
        assert_eq!(module.globals[0].init, Some(12345));
        // main reads it through a module-level symbol
        let main = &module.functions[0];
        assert!(main.blocks.iter().flat_map(|b| &b.instructions).any(|i| {
            matches!(i, Instruction::Load { src: Value::Global(name), .. } if name == "global_var")
        }));
    }

    #[test]
    fn test_sizeof_folds_to_constant() {
        let module = lower("int main() { long x = 0; return sizeof(int) + sizeof x; }");
        let main = &module.functions[0];
        let consts: Vec<i64> = main
            .blocks
            .iter()
            .flat_map(|b| &b.instructions)
            .filter_map(|i| match i {
                Instruction::Bin { lhs: Value::Const(a), rhs: Value::Const(b), .. } => {
                    Some(*a + *b)
                }
                _ => None,
            })
            .collect();
        assert!(consts.contains(&12), "sizeof(int) + sizeof(long) folds to 4 + 8");
    }

    #[test]
    fn test_pointer_arithmetic_scales() {
        let module = lower("int f(int *p) { return *(p + 2); }");
        let f = &module.functions[0];
        // p + 2 on an int pointer advances by 8 bytes
        assert!(f.blocks.iter().flat_map(|b| &b.instructions).any(|i| {
            matches!(
                i,
                Instruction::Bin { op: BinOp::Add, ty: IrType::Ptr, rhs: Value::Const(8), .. }
            )
        }));
    }

    #[test]
    fn test_dead_code_after_return_is_dropped() {
        let module = lower("int main() { return 1; return 2; }");
        let entry = &module.functions[0].blocks[0];
        let rets = entry
            .instructions
            .iter()
            .filter(|i| matches!(i, Instruction::Ret { .. }))
            .count();
        assert_eq!(rets, 1);
    }

    #[test]
    fn test_value_ids_are_dense_and_fresh() {
        let module = lower("int main() { int a = 1; int b = 2; return a + b; }");
        let mut seen = std::collections::HashSet::new();
        for block in &module.functions[0].blocks {
            for instruction in &block.instructions {
                if let Some(dest) = instruction.dest() {
                    assert!(seen.insert(dest), "id %{} assigned twice", dest);
                }
            }
        }
    }

    #[test]
    fn test_member_access_through_pointer() {
        let module = lower(
            "struct point { int x; int y; };\n\
             int f(struct point *p) { return p->y; }",
        );
        let f = &module.functions[0];
        // y sits one 8-byte slot past the base
        assert!(f.blocks.iter().flat_map(|b| &b.instructions).any(|i| {
            matches!(
                i,
                Instruction::Bin { op: BinOp::Add, rhs: Value::Const(8), .. }
            )
        }));
    }
}
