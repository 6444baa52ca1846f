//! minicc compiler library
//!
//! Lowers a C subset into relocatable x86-64 ELF64 objects through a
//! fixed pipeline: lexer, parser, semantic analysis, IR generation,
//! assembly emission, and object encoding (the `minicc-object` crate).
//!
//! The stages hand off owned values and never share mutable state;
//! each intermediate form is available to embedders:
//!
//! ```rust,ignore
//! use minicc::{compile, compile_to_assembly, CompilerConfig};
//!
//! let config = CompilerConfig::default();
//! let object_bytes = compile("int main() { return 0; }", &config)?;
//! let listing = compile_to_assembly("int main() { return 0; }", &config)?;
//! ```
//!
//! Lexing and parsing fail fast on the first error; semantic analysis
//! collects its findings and reports them as a batch. IR generation
//! only runs on a clean analysis.

pub mod ast;
pub mod builtins;
pub mod codegen;
pub mod config;
pub mod ir;
pub mod irgen;
pub mod lexer;
pub mod parser;
pub mod symbols;
pub mod typechecker;
pub mod types;

pub use ast::Program;
pub use codegen::{Codegen, CodegenError};
pub use config::{CompilerConfig, ExternalFunction};
pub use ir::{IrError, Module};
pub use irgen::IrGen;
pub use lexer::{LexError, Lexer, Token, TokenKind};
pub use parser::{ParseError, Parser};
pub use typechecker::{Diagnostic, TypeChecker};
pub use types::{BaseType, Type};

use minicc_object::ElfError;
use std::fmt;

/// Any failure the pipeline can surface, stage-tagged.
#[derive(Debug)]
pub enum CompileError {
    Lex(LexError),
    Parse(ParseError),
    /// The collected semantic findings; never empty
    Semantic(Vec<Diagnostic>),
    Ir(IrError),
    Codegen(CodegenError),
    Object(ElfError),
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompileError::Lex(e) => write!(f, "{}", e),
            CompileError::Parse(e) => write!(f, "{}", e),
            CompileError::Semantic(diags) => {
                for (i, d) in diags.iter().enumerate() {
                    if i > 0 {
                        writeln!(f)?;
                    }
                    write!(f, "{}", d)?;
                }
                Ok(())
            }
            CompileError::Ir(e) => write!(f, "internal error: {}", e),
            CompileError::Codegen(e) => write!(f, "internal error: {}", e),
            CompileError::Object(e) => write!(f, "internal error: {}", e),
        }
    }
}

impl std::error::Error for CompileError {}

impl From<LexError> for CompileError {
    fn from(e: LexError) -> Self {
        CompileError::Lex(e)
    }
}

impl From<ParseError> for CompileError {
    fn from(e: ParseError) -> Self {
        CompileError::Parse(e)
    }
}

impl From<IrError> for CompileError {
    fn from(e: IrError) -> Self {
        CompileError::Ir(e)
    }
}

impl From<CodegenError> for CompileError {
    fn from(e: CodegenError) -> Self {
        CompileError::Codegen(e)
    }
}

impl From<ElfError> for CompileError {
    fn from(e: ElfError) -> Self {
        CompileError::Object(e)
    }
}

/// Front half of the pipeline: source to a validated, lowered module.
pub fn compile_to_ir(source: &str, config: &CompilerConfig) -> Result<Module, CompileError> {
    let tokens = Lexer::new(source).tokenize()?;
    let program = Parser::new(tokens).parse()?;
    let diagnostics = TypeChecker::new(config).check_program(&program);
    if !diagnostics.is_empty() {
        return Err(CompileError::Semantic(diagnostics));
    }
    let module = IrGen::new(config).lower(&program)?;
    Ok(module)
}

/// Source to assembly text.
pub fn compile_to_assembly(source: &str, config: &CompilerConfig) -> Result<String, CompileError> {
    let module = compile_to_ir(source, config)?;
    let asm = Codegen::new().emit(&module)?;
    Ok(asm)
}

/// Source to relocatable ELF64 object bytes.
pub fn compile(source: &str, config: &CompilerConfig) -> Result<Vec<u8>, CompileError> {
    let asm = compile_to_assembly(source, config)?;
    let bytes = minicc_object::assemble(&asm)?;
    Ok(bytes)
}
