//! ELF64 relocatable object writer
//!
//! Turns the compiler's textual assembly into an unlinked ELF64 object:
//! parse the listing into sections (`asm`), then lay out header,
//! payloads, and the section header table (`elf`). The output is
//! deterministic: identical input text yields bit-identical bytes.

pub mod asm;
pub mod elf;

pub use asm::{AsmProgram, Section};
pub use elf::{ElfHeader, SectionFlags, SectionHeader, EHDR_SIZE, SHDR_SIZE};

use std::fmt;

/// Failure while turning assembly text into an object.
#[derive(Debug)]
pub enum ElfError {
    /// A content line appeared before any section header
    StrayLine { line: usize, text: String },
    /// A malformed or incomplete directive
    Directive { line: usize, text: String },
    /// Underlying write failure (unreachable for in-memory buffers)
    Io(std::io::Error),
}

impl fmt::Display for ElfError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ElfError::StrayLine { line, text } => {
                write!(f, "line {}: '{}' appears outside any section", line, text)
            }
            ElfError::Directive { line, text } => {
                if *line > 0 {
                    write!(f, "line {}: malformed directive '{}'", line, text)
                } else {
                    write!(f, "malformed directive '{}'", text)
                }
            }
            ElfError::Io(e) => write!(f, "object write failed: {}", e),
        }
    }
}

impl std::error::Error for ElfError {}

impl From<std::io::Error> for ElfError {
    fn from(e: std::io::Error) -> Self {
        ElfError::Io(e)
    }
}

/// Assemble a listing into ELF64 relocatable object bytes.
pub fn assemble(asm_text: &str) -> Result<Vec<u8>, ElfError> {
    let program = asm::parse(asm_text)?;
    elf::build(&program)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assemble_minimal_object() {
        let bytes = assemble(".text\nmain:\npush rbp\nret\n").unwrap();
        assert_eq!(&bytes[0..4], &[0x7F, b'E', b'L', b'F']);
        let shnum = u16::from_le_bytes([bytes[60], bytes[61]]);
        let shstrndx = u16::from_le_bytes([bytes[62], bytes[63]]);
        assert!(shnum >= 2);
        assert!(shstrndx < shnum);
    }

    #[test]
    fn test_shstrtab_contains_names() {
        let bytes = assemble(".text\nret\n.data\n.long 1\n").unwrap();
        let text = b".text\0";
        let data = b".data\0";
        let strtab = b".shstrtab\0";
        for needle in [&text[..], &data[..], &strtab[..]] {
            assert!(
                bytes.windows(needle.len()).any(|w| w == needle),
                "missing {:?}",
                String::from_utf8_lossy(needle)
            );
        }
    }

    #[test]
    fn test_error_display() {
        let err = assemble("ret\n").unwrap_err();
        assert!(err.to_string().contains("outside any section"));
    }
}
