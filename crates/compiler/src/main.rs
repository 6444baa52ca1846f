//! minicc CLI
//!
//! Command-line interface over the compiler library: compile C sources
//! to relocatable objects, run the semantic checker alone, or print an
//! intermediate form for debugging.

use clap::{CommandFactory, Parser as ClapParser, Subcommand, ValueEnum};
use clap_complete::{Shell, generate};
use minicc::{CompileError, CompilerConfig};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process;

#[derive(ClapParser)]
#[command(name = "minicc")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "C subset compiler producing x86-64 ELF64 relocatable objects", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a C source file to an object file
    Build {
        /// Input .c source file (already preprocessed)
        input: PathBuf,

        /// Output object path (defaults to the input with a .o extension)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Print the generated assembly to stderr
        #[arg(long)]
        emit_asm: bool,

        /// Print the IR module to stderr
        #[arg(long)]
        emit_ir: bool,

        /// Compiler configuration file (TOML)
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Type-check sources without producing output
    Check {
        /// Input .c source files
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        /// Compiler configuration file (TOML)
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Print one intermediate form of a source file
    Emit {
        /// Which form to print
        #[arg(value_enum)]
        form: EmitForm,

        /// Input .c source file
        input: PathBuf,

        /// Compiler configuration file (TOML)
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Generate shell completion scripts
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum EmitForm {
    Tokens,
    Ast,
    Ir,
    Asm,
}

fn main() {
    let cli = Cli::parse();
    match cli.command {
        Commands::Build {
            input,
            output,
            emit_asm,
            emit_ir,
            config,
        } => {
            let output = output.unwrap_or_else(|| input.with_extension("o"));
            run_build(&input, &output, emit_asm, emit_ir, config.as_deref());
        }
        Commands::Check { inputs, config } => run_check(&inputs, config.as_deref()),
        Commands::Emit { form, input, config } => run_emit(form, &input, config.as_deref()),
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "minicc", &mut io::stdout());
        }
    }
}

fn load_config(path: Option<&Path>) -> CompilerConfig {
    match path {
        Some(path) => CompilerConfig::load(path).unwrap_or_else(|e| {
            eprintln!("{}", e);
            process::exit(1);
        }),
        None => CompilerConfig::default(),
    }
}

fn read_source(path: &Path) -> String {
    fs::read_to_string(path).unwrap_or_else(|e| {
        eprintln!("Failed to read '{}': {}", path.display(), e);
        process::exit(1);
    })
}

fn report(path: &Path, error: &CompileError) {
    match error {
        CompileError::Semantic(diags) => {
            for d in diags {
                eprintln!("{}: {}", path.display(), d);
            }
        }
        other => eprintln!("{}: {}", path.display(), other),
    }
}

fn run_build(input: &Path, output: &Path, emit_asm: bool, emit_ir: bool, config: Option<&Path>) {
    let config = load_config(config);
    let source = read_source(input);

    if emit_ir {
        match minicc::compile_to_ir(&source, &config) {
            Ok(module) => eprint!("{}", module),
            Err(e) => {
                report(input, &e);
                process::exit(1);
            }
        }
    }
    let asm = match minicc::compile_to_assembly(&source, &config) {
        Ok(asm) => asm,
        Err(e) => {
            report(input, &e);
            process::exit(1);
        }
    };
    if emit_asm {
        eprint!("{}", asm);
    }
    let bytes = match minicc_object::assemble(&asm) {
        Ok(bytes) => bytes,
        Err(e) => {
            eprintln!("{}: internal error: {}", input.display(), e);
            process::exit(1);
        }
    };
    if let Err(e) = fs::write(output, &bytes) {
        eprintln!("Failed to write '{}': {}", output.display(), e);
        process::exit(1);
    }
}

fn run_check(inputs: &[PathBuf], config: Option<&Path>) {
    let config = load_config(config);
    let mut failed = false;
    for input in inputs {
        let source = read_source(input);
        match minicc::compile_to_ir(&source, &config) {
            Ok(_) => {}
            Err(e) => {
                report(input, &e);
                failed = true;
            }
        }
    }
    if failed {
        process::exit(1);
    }
}

fn run_emit(form: EmitForm, input: &Path, config: Option<&Path>) {
    let config = load_config(config);
    let source = read_source(input);
    let result = match form {
        EmitForm::Tokens => minicc::Lexer::new(&source)
            .tokenize()
            .map(|tokens| {
                tokens
                    .iter()
                    .map(|t| format!("{}:{} {:?} {}\n", t.line, t.column, t.kind, t.lexeme))
                    .collect::<String>()
            })
            .map_err(CompileError::from),
        EmitForm::Ast => minicc::Lexer::new(&source)
            .tokenize()
            .map_err(CompileError::from)
            .and_then(|tokens| {
                minicc::Parser::new(tokens)
                    .parse()
                    .map_err(CompileError::from)
            })
            .map(|program| format!("{:#?}\n", program)),
        EmitForm::Ir => minicc::compile_to_ir(&source, &config).map(|m| m.to_string()),
        EmitForm::Asm => minicc::compile_to_assembly(&source, &config),
    };
    match result {
        Ok(text) => print!("{}", text),
        Err(e) => {
            report(input, &e);
            process::exit(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    #[test]
    fn test_build_writes_an_object_file() {
        let dir = tempfile::tempdir().unwrap();
        let src_path = dir.path().join("ret.c");
        let obj_path = dir.path().join("ret.o");
        let mut f = fs::File::create(&src_path).unwrap();
        writeln!(f, "int main() {{ return 0; }}").unwrap();

        run_build(&src_path, &obj_path, false, false, None);
        let bytes = fs::read(&obj_path).unwrap();
        assert_eq!(&bytes[0..4], &[0x7F, b'E', b'L', b'F']);
    }

    #[test]
    fn test_default_output_path_swaps_extension() {
        let input = PathBuf::from("driver/main.c");
        assert_eq!(input.with_extension("o"), PathBuf::from("driver/main.o"));
    }
}
