//! x86-64 Assembly Emission
//!
//! Generates assembly as text in a single pass over the IR module. The
//! operand convention follows the project dialect throughout: `op src,
//! dst` ordering, `$` immediates, bare register names, and `[rbp-N]`
//! stack operands. Every IR temporary is given a spill slot in the
//! frame, so register pressure never exceeds the two scratch registers
//! (`rax`, `rbx`) plus `xmm0`/`xmm1` for floating point.
//!
//! Integer and pointer arguments follow the System V AMD64 order
//! (`rdi rsi rdx rcx r8 r9`); anything past the sixth is pushed on the
//! stack. Results return in `rax`, or `xmm0` for floating values.

use crate::ir::{BasicBlock, BinOp, CastOp, Function, Instruction, IrType, Module, Value, ValueId};
use std::collections::HashSet;
use std::fmt::Write as _;

/// Error type for assembly emission.
///
/// `Logic` marks violated emitter assumptions (an unknown opcode shape,
/// an operand with no slot); `Format` wraps failures from writing into
/// the output string so `?` works on both.
#[derive(Debug)]
pub enum CodegenError {
    Logic(String),
    Format(std::fmt::Error),
}

impl std::fmt::Display for CodegenError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CodegenError::Logic(s) => write!(f, "{}", s),
            CodegenError::Format(e) => write!(f, "assembly emission error: {}", e),
        }
    }
}

impl std::error::Error for CodegenError {}

impl From<String> for CodegenError {
    fn from(s: String) -> Self {
        CodegenError::Logic(s)
    }
}

impl From<std::fmt::Error> for CodegenError {
    fn from(e: std::fmt::Error) -> Self {
        CodegenError::Format(e)
    }
}

/// Integer/pointer argument registers, System V AMD64 order.
const ARG_REGISTERS: &[&str] = &["rdi", "rsi", "rdx", "rcx", "r8", "r9"];

pub struct Codegen {
    out: String,
    /// Value ids backed directly by a stack slot (allocas)
    allocas: HashSet<ValueId>,
    frame_size: u32,
}

impl Codegen {
    pub fn new() -> Self {
        Codegen {
            out: String::new(),
            allocas: HashSet::new(),
            frame_size: 0,
        }
    }

    /// Emit the whole module as one assembly text.
    pub fn emit(&mut self, module: &Module) -> Result<String, CodegenError> {
        self.out.clear();
        writeln!(self.out, ".text")?;
        for function in &module.functions {
            self.emit_function(function)?;
        }
        if !module.globals.is_empty() {
            writeln!(self.out, ".data")?;
            for global in &module.globals {
                writeln!(self.out, ".globl {}", global.name)?;
                writeln!(self.out, "{}:", global.name)?;
                let init = global.init.unwrap_or(0);
                match global.ty {
                    IrType::I8 => writeln!(self.out, "  .byte {}", init as i8)?,
                    IrType::I32 | IrType::F32 => writeln!(self.out, "  .long {}", init as i32)?,
                    _ => writeln!(self.out, "  .quad {}", init)?,
                }
            }
        }
        Ok(std::mem::take(&mut self.out))
    }

    fn emit_function(&mut self, function: &Function) -> Result<(), CodegenError> {
        self.allocas = function
            .blocks
            .iter()
            .flat_map(|b| &b.instructions)
            .filter_map(|i| match i {
                Instruction::Alloca { dest, .. } => Some(*dest),
                _ => None,
            })
            .collect();

        // Conservative frame: one 8-byte slot per value id ever defined
        // (parameters included), rounded up to 16
        let max_id = function
            .blocks
            .iter()
            .flat_map(|b| &b.instructions)
            .filter_map(|i| i.dest())
            .chain((0..function.params.len()).map(|i| function.param_id(i)))
            .max()
            .unwrap_or(0);
        self.frame_size = (max_id * 8).div_ceil(16) * 16;

        writeln!(self.out, ".globl {}", function.name)?;
        writeln!(self.out, "{}:", function.name)?;
        writeln!(self.out, "  push rbp")?;
        writeln!(self.out, "  mov rsp, rbp")?;
        if self.frame_size > 0 {
            writeln!(self.out, "  sub ${}, rsp", self.frame_size)?;
        }

        // Incoming register arguments spill to their parameter slots.
        // Arguments past the sixth arrive on the caller's stack; the
        // in-scope corpus never declares that many.
        for (i, _) in function.params.iter().enumerate().take(ARG_REGISTERS.len()) {
            let id = function.param_id(i);
            writeln!(self.out, "  mov {}, [rbp-{}]", ARG_REGISTERS[i], slot_offset(id))?;
        }

        for block in &function.blocks {
            self.emit_block(function, block)?;
        }
        Ok(())
    }

    fn emit_block(&mut self, function: &Function, block: &BasicBlock) -> Result<(), CodegenError> {
        writeln!(self.out, "{}:", block.label)?;
        for instruction in &block.instructions {
            self.emit_instruction(function, instruction)?;
        }
        Ok(())
    }

    fn emit_instruction(
        &mut self,
        function: &Function,
        instruction: &Instruction,
    ) -> Result<(), CodegenError> {
        match instruction {
            // Slot reservation happens in the prologue
            Instruction::Alloca { .. } => Ok(()),
            Instruction::Load { dest, src, .. } => self.emit_load(*dest, src),
            Instruction::Store { value, dest } => self.emit_store(value, dest),
            Instruction::Bin {
                dest,
                op,
                ty,
                lhs,
                rhs,
            } => self.emit_bin(*dest, *op, *ty, lhs, rhs),
            Instruction::Not { dest, operand } => {
                self.load_into(operand, "rax")?;
                writeln!(self.out, "  cmp $0, rax")?;
                writeln!(self.out, "  sete al")?;
                writeln!(self.out, "  movzx rax, al")?;
                self.spill("rax", *dest)
            }
            Instruction::Jump { target } => {
                writeln!(self.out, "  jmp {}", target)?;
                Ok(())
            }
            Instruction::JumpIf {
                cond,
                then_label,
                else_label,
            } => {
                self.load_into(cond, "rax")?;
                writeln!(self.out, "  cmp rax, 0")?;
                writeln!(self.out, "  jne {}", then_label)?;
                writeln!(self.out, "  jmp {}", else_label)?;
                Ok(())
            }
            Instruction::Call {
                dest,
                ty,
                name,
                args,
            } => self.emit_call(*dest, *ty, name, args),
            Instruction::Ret { value } => {
                if let Some(value) = value {
                    if function.return_type.is_float() {
                        self.load_float(value, "xmm0", function.return_type)?;
                    } else {
                        self.load_into(value, "rax")?;
                    }
                }
                writeln!(self.out, "  mov rbp, rsp")?;
                writeln!(self.out, "  pop rbp")?;
                writeln!(self.out, "  ret")?;
                Ok(())
            }
            Instruction::Cast {
                dest,
                op,
                from,
                to,
                value,
            } => {
                self.load_into(value, "rax")?;
                match op {
                    // Truncation masks to the destination width, zero
                    // extension masks away the bits above the source
                    CastOp::Trunc | CastOp::Zext => {
                        let width = if *op == CastOp::Trunc {
                            to.size_in_bytes()
                        } else {
                            from.size_in_bytes()
                        };
                        match width {
                            1 => writeln!(self.out, "  and $255, rax")?,
                            4 => writeln!(self.out, "  and $4294967295, rax")?,
                            _ => {}
                        }
                    }
                    CastOp::Sext => match from {
                        IrType::I8 => writeln!(self.out, "  movsx al, rax")?,
                        IrType::I32 => writeln!(self.out, "  cdqe")?,
                        _ => {}
                    },
                }
                self.spill("rax", *dest)
            }
        }
    }

    fn emit_load(&mut self, dest: ValueId, src: &Value) -> Result<(), CodegenError> {
        match src {
            Value::Temp(id) if self.allocas.contains(id) => {
                writeln!(self.out, "  mov [rbp-{}], rax", slot_offset(*id))?;
            }
            Value::Temp(id) => {
                // Computed pointer: fetch it, then read through it
                writeln!(self.out, "  mov [rbp-{}], rax", slot_offset(*id))?;
                writeln!(self.out, "  mov [rax-0], rax")?;
            }
            Value::Global(name) => {
                writeln!(self.out, "  mov {}, rax", name)?;
            }
            Value::Const(v) => {
                writeln!(self.out, "  mov ${}, rax", v)?;
            }
        }
        self.spill("rax", dest)
    }

    fn emit_store(&mut self, value: &Value, dest: &Value) -> Result<(), CodegenError> {
        self.load_into(value, "rax")?;
        match dest {
            Value::Temp(id) if self.allocas.contains(id) => {
                writeln!(self.out, "  mov rax, [rbp-{}]", slot_offset(*id))?;
            }
            Value::Temp(id) => {
                writeln!(self.out, "  mov [rbp-{}], rbx", slot_offset(*id))?;
                writeln!(self.out, "  mov rax, [rbx-0]")?;
            }
            Value::Global(name) => {
                writeln!(self.out, "  mov rax, {}", name)?;
            }
            Value::Const(_) => {
                return Err(CodegenError::Logic(
                    "store destination cannot be a constant".to_string(),
                ));
            }
        }
        Ok(())
    }

    fn emit_bin(
        &mut self,
        dest: ValueId,
        op: BinOp,
        ty: IrType,
        lhs: &Value,
        rhs: &Value,
    ) -> Result<(), CodegenError> {
        if ty.is_float() {
            return self.emit_float_bin(dest, op, ty, lhs, rhs);
        }
        self.load_into(lhs, "rax")?;
        self.load_into(rhs, "rbx")?;
        match op {
            BinOp::Add => writeln!(self.out, "  add rbx, rax")?,
            BinOp::Sub => writeln!(self.out, "  sub rbx, rax")?,
            BinOp::Mul => writeln!(self.out, "  imul rbx, rax")?,
            BinOp::Div => {
                writeln!(self.out, "  cqo")?;
                writeln!(self.out, "  idiv rbx")?;
            }
            BinOp::Mod => {
                writeln!(self.out, "  cqo")?;
                writeln!(self.out, "  idiv rbx")?;
                writeln!(self.out, "  mov rdx, rax")?;
            }
            BinOp::And => writeln!(self.out, "  and rbx, rax")?,
            BinOp::Or => writeln!(self.out, "  or rbx, rax")?,
            BinOp::Xor => writeln!(self.out, "  xor rbx, rax")?,
            BinOp::Shl => {
                writeln!(self.out, "  mov rbx, rcx")?;
                writeln!(self.out, "  shl cl, rax")?;
            }
            BinOp::Shr => {
                writeln!(self.out, "  mov rbx, rcx")?;
                writeln!(self.out, "  sar cl, rax")?;
            }
            BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
                writeln!(self.out, "  cmp rbx, rax")?;
                let set = match op {
                    BinOp::Eq => "sete",
                    BinOp::Ne => "setne",
                    BinOp::Lt => "setl",
                    BinOp::Le => "setle",
                    BinOp::Gt => "setg",
                    _ => "setge",
                };
                writeln!(self.out, "  {} al", set)?;
                writeln!(self.out, "  movzx rax, al")?;
            }
        }
        self.spill("rax", dest)
    }

    fn emit_float_bin(
        &mut self,
        dest: ValueId,
        op: BinOp,
        ty: IrType,
        lhs: &Value,
        rhs: &Value,
    ) -> Result<(), CodegenError> {
        self.load_float(lhs, "xmm0", ty)?;
        self.load_float(rhs, "xmm1", ty)?;
        let suffix = if ty == IrType::F32 { "ss" } else { "sd" };
        match op {
            BinOp::Add => writeln!(self.out, "  add{} xmm1, xmm0", suffix)?,
            BinOp::Sub => writeln!(self.out, "  sub{} xmm1, xmm0", suffix)?,
            BinOp::Mul => writeln!(self.out, "  mul{} xmm1, xmm0", suffix)?,
            BinOp::Div => writeln!(self.out, "  div{} xmm1, xmm0", suffix)?,
            BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
                writeln!(self.out, "  comi{} xmm1, xmm0", suffix)?;
                let set = match op {
                    BinOp::Eq => "sete",
                    BinOp::Ne => "setne",
                    BinOp::Lt => "setb",
                    BinOp::Le => "setbe",
                    BinOp::Gt => "seta",
                    _ => "setae",
                };
                writeln!(self.out, "  {} al", set)?;
                writeln!(self.out, "  movzx rax, al")?;
                return self.spill("rax", dest);
            }
            other => {
                return Err(CodegenError::Logic(format!(
                    "operation '{}' has no floating-point lowering",
                    other
                )));
            }
        }
        writeln!(self.out, "  mov{} xmm0, [rbp-{}]", suffix, slot_offset(dest))?;
        Ok(())
    }

    fn emit_call(
        &mut self,
        dest: Option<ValueId>,
        ty: IrType,
        name: &str,
        args: &[Value],
    ) -> Result<(), CodegenError> {
        for (i, arg) in args.iter().enumerate().take(ARG_REGISTERS.len()) {
            self.load_into(arg, ARG_REGISTERS[i])?;
        }
        // Arguments past the sixth go to the stack, last first
        let extra = args.len().saturating_sub(ARG_REGISTERS.len());
        for arg in args.iter().skip(ARG_REGISTERS.len()).rev() {
            self.load_into(arg, "rax")?;
            writeln!(self.out, "  push rax")?;
        }
        writeln!(self.out, "  call {}", name)?;
        if extra > 0 {
            writeln!(self.out, "  add ${}, rsp", extra * 8)?;
        }
        if let Some(dest) = dest {
            if ty.is_float() {
                let suffix = if ty == IrType::F32 { "ss" } else { "sd" };
                writeln!(self.out, "  mov{} xmm0, [rbp-{}]", suffix, slot_offset(dest))?;
            } else {
                self.spill("rax", dest)?;
            }
        }
        Ok(())
    }

    /// Bring an operand into an integer register.
    fn load_into(&mut self, value: &Value, reg: &str) -> Result<(), CodegenError> {
        match value {
            Value::Const(v) => writeln!(self.out, "  mov ${}, {}", v, reg)?,
            Value::Global(name) => writeln!(self.out, "  mov {}, {}", name, reg)?,
            Value::Temp(id) if self.allocas.contains(id) => {
                // An alloca used as a value is the address of its slot
                writeln!(self.out, "  lea [rbp-{}], {}", slot_offset(*id), reg)?;
            }
            Value::Temp(id) => writeln!(self.out, "  mov [rbp-{}], {}", slot_offset(*id), reg)?,
        }
        Ok(())
    }

    /// Bring an operand into an xmm register.
    fn load_float(&mut self, value: &Value, reg: &str, ty: IrType) -> Result<(), CodegenError> {
        let suffix = if ty == IrType::F32 { "ss" } else { "sd" };
        match value {
            Value::Const(v) => {
                writeln!(self.out, "  mov ${}, rax", v)?;
                writeln!(self.out, "  cvtsi2{} rax, {}", suffix, reg)?;
            }
            Value::Temp(id) => {
                writeln!(self.out, "  mov{} [rbp-{}], {}", suffix, slot_offset(*id), reg)?;
            }
            Value::Global(name) => {
                writeln!(self.out, "  mov{} {}, {}", suffix, name, reg)?;
            }
        }
        Ok(())
    }

    fn spill(&mut self, reg: &str, dest: ValueId) -> Result<(), CodegenError> {
        writeln!(self.out, "  mov {}, [rbp-{}]", reg, slot_offset(dest))?;
        Ok(())
    }
}

impl Default for Codegen {
    fn default() -> Self {
        Codegen::new()
    }
}

fn slot_offset(id: ValueId) -> u32 {
    id * 8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CompilerConfig;
    use crate::irgen::IrGen;
    use crate::lexer::Lexer;
    use crate::parser::Parser;
    use crate::typechecker::TypeChecker;

    fn emit(source: &str) -> String {
        let config = CompilerConfig::default();
        let tokens = Lexer::new(source).tokenize().unwrap();
        let program = Parser::new(tokens).parse().unwrap();
        let diags = TypeChecker::new(&config).check_program(&program);
        assert!(diags.is_empty(), "semantic errors: {:?}", diags);
        let module = IrGen::new(&config).lower(&program).unwrap();
        Codegen::new().emit(&module).unwrap()
    }

    #[test]
    fn test_minimal_program() {
        let asm = emit("int main() { return 42; }");
        for needle in [".text", ".globl main", "main:", "push rbp", "mov $42, rax", "pop rbp", "ret"]
        {
            assert!(asm.contains(needle), "missing `{}` in:\n{}", needle, asm);
        }
    }

    #[test]
    fn test_parameters_and_calls() {
        let asm = emit(
            "int add(int a, int b) { return a + b; }\n\
             int main() { int result = add(5, 3); return result; }",
        );
        for needle in [".globl add", "call add", "mov $5, rdi", "mov $3, rsi"] {
            assert!(asm.contains(needle), "missing `{}` in:\n{}", needle, asm);
        }
    }

    #[test]
    fn test_control_flow_mnemonics_and_labels() {
        let asm = emit("int main() { int x = 5; if (x > 0) { return 1; } else { return 0; } }");
        for needle in ["cmp", "jne", "jmp", "then_", "else_", "merge_"] {
            assert!(asm.contains(needle), "missing `{}` in:\n{}", needle, asm);
        }
    }

    #[test]
    fn test_loop_labels() {
        let asm = emit(
            "int main() { int sum = 0; \
             for (int i = 0; i < 5; i = i + 1) { sum = sum + i; } return sum; }",
        );
        for needle in ["for.cond", "for.body", "for.inc", "for.after"] {
            assert!(asm.contains(needle), "missing `{}` in:\n{}", needle, asm);
        }
    }

    #[test]
    fn test_global_data_directives() {
        let asm = emit("int global_var = 12345; int main() { return global_var; }");
        for needle in [".data", ".globl global_var", "global_var:", ".long 12345"] {
            assert!(asm.contains(needle), "missing `{}` in:\n{}", needle, asm);
        }
    }

    #[test]
    fn test_long_global_uses_quad() {
        let asm = emit("long big = 5000000000; int main() { return 0; }");
        assert!(asm.contains(".quad 5000000000"), "{}", asm);
    }

    #[test]
    fn test_char_global_uses_byte() {
        let asm = emit("char flag = 'x'; int main() { return 0; }");
        assert!(asm.contains(".byte 120"), "{}", asm);
    }

    #[test]
    fn test_recursion() {
        let asm = emit(
            "int factorial(int n) { if (n <= 1) { return 1; } \
             else { return n * factorial(n - 1); } }\n\
             int main() { return factorial(5); }",
        );
        for needle in ["factorial:", "call factorial", "imul", "sub"] {
            assert!(asm.contains(needle), "missing `{}` in:\n{}", needle, asm);
        }
    }

    #[test]
    fn test_frame_size_is_16_aligned() {
        let asm = emit("int main() { int a = 1; int b = 2; int c = 3; return a + b + c; }");
        for line in asm.lines() {
            let line = line.trim();
            if let Some(rest) = line.strip_prefix("sub $") {
                let n: u32 = rest
                    .split(',')
                    .next()
                    .unwrap()
                    .parse()
                    .expect("frame operand is an integer");
                assert_eq!(n % 16, 0, "frame {} not 16-aligned", n);
            }
        }
    }

    #[test]
    fn test_division_uses_idiv_sequence() {
        let asm = emit("int main() { int a = 7; int b = 2; return a / b; }");
        assert!(asm.contains("cqo"), "{}", asm);
        assert!(asm.contains("idiv rbx"), "{}", asm);
    }

    #[test]
    fn test_comparison_set_sequence() {
        let asm = emit("int main() { int a = 1; return a < 2; }");
        assert!(asm.contains("setl al"), "{}", asm);
        assert!(asm.contains("movzx rax, al"), "{}", asm);
    }

    #[test]
    fn test_float_operations_use_xmm() {
        let asm = emit("double scale(double d) { return d * 2.0; }\nint main() { return 0; }");
        assert!(asm.contains("mulsd xmm1, xmm0"), "{}", asm);
    }

    #[test]
    fn test_emission_is_idempotent() {
        let config = CompilerConfig::default();
        let source = "int main() { int x = 5; if (x > 0) { return 1; } return 0; }";
        let tokens = Lexer::new(source).tokenize().unwrap();
        let program = Parser::new(tokens).parse().unwrap();
        let diags = TypeChecker::new(&config).check_program(&program);
        assert!(diags.is_empty());
        let module = IrGen::new(&config).lower(&program).unwrap();
        let first = Codegen::new().emit(&module).unwrap();
        let second = Codegen::new().emit(&module).unwrap();
        assert_eq!(first, second);
    }
}
