//! Assembly text parsing
//!
//! Splits a line-oriented assembly listing into a section table. A line
//! whose first token starts with `.` opens a new section unless it is
//! one of the data directives (`.globl`, `.long`, `.byte`, `.quad`),
//! which belong to the section body. `.globl` names are collected into
//! the exported-symbol list and carry no payload.

use crate::ElfError;

/// Directives that live inside a section rather than starting one.
const DATA_DIRECTIVES: &[&str] = &[".globl", ".long", ".byte", ".quad"];

#[derive(Debug, Clone, PartialEq)]
pub struct Section {
    /// Section name including the leading dot, e.g. `.text`
    pub name: String,
    /// Body lines, trimmed, in input order; blank lines are dropped
    pub lines: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AsmProgram {
    /// Sections in the order they appear in the input
    pub sections: Vec<Section>,
    /// Names declared `.globl`, in declaration order
    pub globals: Vec<String>,
}

/// Parse assembly text into sections. The input must open a section
/// before any content line.
pub fn parse(asm: &str) -> Result<AsmProgram, ElfError> {
    let mut program = AsmProgram::default();
    for (number, raw) in asm.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }
        let first = line.split_whitespace().next().unwrap_or("");
        if first.starts_with('.') && !DATA_DIRECTIVES.contains(&first) {
            program.sections.push(Section {
                name: first.to_string(),
                lines: Vec::new(),
            });
            continue;
        }
        if first == ".globl" {
            let name = line
                .split_whitespace()
                .nth(1)
                .ok_or_else(|| ElfError::Directive {
                    line: number + 1,
                    text: line.to_string(),
                })?;
            program.globals.push(name.to_string());
            continue;
        }
        let Some(section) = program.sections.last_mut() else {
            return Err(ElfError::StrayLine {
                line: number + 1,
                text: line.to_string(),
            });
        };
        section.lines.push(line.to_string());
    }
    Ok(program)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sections_split_on_dot_lines() {
        let program = parse(
            ".text\n\
             main:\n\
             \x20 push rbp\n\
             .data\n\
             .globl counter\n\
             counter:\n\
             \x20 .long 7\n",
        )
        .unwrap();
        assert_eq!(program.sections.len(), 2);
        assert_eq!(program.sections[0].name, ".text");
        assert_eq!(program.sections[1].name, ".data");
        assert_eq!(program.sections[1].lines, vec!["counter:", ".long 7"]);
        assert_eq!(program.globals, vec!["counter"]);
    }

    #[test]
    fn test_data_directives_stay_in_section() {
        let program = parse(".data\n.long 1\n.byte 2\n.quad 3\n").unwrap();
        assert_eq!(program.sections.len(), 1);
        assert_eq!(program.sections[0].lines.len(), 3);
    }

    #[test]
    fn test_content_before_section_is_an_error() {
        let err = parse("push rbp\n.text\n").unwrap_err();
        assert!(matches!(err, ElfError::StrayLine { line: 1, .. }));
    }

    #[test]
    fn test_blank_lines_ignored() {
        let program = parse(".text\n\n\nret\n").unwrap();
        assert_eq!(program.sections[0].lines, vec!["ret"]);
    }
}
