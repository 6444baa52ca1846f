//! ELF64 relocatable object emission
//!
//! Builds the byte-exact object: ELF header at offset 0, section
//! payloads in parse order, then the section header table. Text
//! sections encode a placeholder opcode stream (real prologue/ret
//! opcodes, width-faithful immediates) so ELF tooling recognizes code;
//! data sections encode their directives little-endian. Output is a
//! pure function of the input, so identical assembly produces identical
//! bytes.

use crate::asm::AsmProgram;
use crate::ElfError;
use bitflags::bitflags;
use byteorder::{LittleEndian, WriteBytesExt};
use std::io::Write;

/// ELF header size and section header entry size, both fixed for ELF64.
pub const EHDR_SIZE: u16 = 64;
pub const SHDR_SIZE: u16 = 64;

const ET_REL: u16 = 1;
const EM_X86_64: u16 = 0x3E;
const SHT_PROGBITS: u32 = 1;
const SHT_STRTAB: u32 = 3;

bitflags! {
    /// `sh_flags` bits for section headers.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SectionFlags: u64 {
        const WRITE = 0x1;
        const ALLOC = 0x2;
        const EXECINSTR = 0x4;
    }
}

/// ELF file header, one per object.
#[derive(Debug, Clone)]
pub struct ElfHeader {
    pub magic: [u8; 4],
    pub class: u8,
    pub data: u8,
    pub version: u8,
    pub os_abi: u8,
    pub abi_version: u8,
    pub e_type: u16,
    pub e_machine: u16,
    pub e_version: u32,
    pub e_entry: u64,
    pub e_phoff: u64,
    pub e_shoff: u64,
    pub e_flags: u32,
    pub e_ehsize: u16,
    pub e_phentsize: u16,
    pub e_phnum: u16,
    pub e_shentsize: u16,
    pub e_shnum: u16,
    pub e_shstrndx: u16,
}

impl Default for ElfHeader {
    fn default() -> Self {
        ElfHeader {
            magic: [0x7f, b'E', b'L', b'F'],
            class: 2,
            data: 1,
            version: 1,
            os_abi: 0,
            abi_version: 0,
            e_type: ET_REL,
            e_machine: EM_X86_64,
            e_version: 1,
            e_entry: 0,
            e_phoff: 0,
            e_shoff: 0,
            e_flags: 0,
            e_ehsize: EHDR_SIZE,
            e_phentsize: 0,
            e_phnum: 0,
            e_shentsize: SHDR_SIZE,
            e_shnum: 0,
            e_shstrndx: 0,
        }
    }
}

impl ElfHeader {
    pub fn write_to<W: Write>(&self, w: &mut W) -> std::io::Result<()> {
        w.write_all(&self.magic)?;
        w.write_u8(self.class)?;
        w.write_u8(self.data)?;
        w.write_u8(self.version)?;
        w.write_u8(self.os_abi)?;
        w.write_u8(self.abi_version)?;
        w.write_all(&[0u8; 7])?;
        w.write_u16::<LittleEndian>(self.e_type)?;
        w.write_u16::<LittleEndian>(self.e_machine)?;
        w.write_u32::<LittleEndian>(self.e_version)?;
        w.write_u64::<LittleEndian>(self.e_entry)?;
        w.write_u64::<LittleEndian>(self.e_phoff)?;
        w.write_u64::<LittleEndian>(self.e_shoff)?;
        w.write_u32::<LittleEndian>(self.e_flags)?;
        w.write_u16::<LittleEndian>(self.e_ehsize)?;
        w.write_u16::<LittleEndian>(self.e_phentsize)?;
        w.write_u16::<LittleEndian>(self.e_phnum)?;
        w.write_u16::<LittleEndian>(self.e_shentsize)?;
        w.write_u16::<LittleEndian>(self.e_shnum)?;
        w.write_u16::<LittleEndian>(self.e_shstrndx)?;
        Ok(())
    }
}

/// One section header table entry.
#[derive(Debug, Clone, Default)]
pub struct SectionHeader {
    pub sh_name: u32,
    pub sh_type: u32,
    pub sh_flags: u64,
    pub sh_addr: u64,
    pub sh_offset: u64,
    pub sh_size: u64,
    pub sh_link: u32,
    pub sh_info: u32,
    pub sh_addralign: u64,
    pub sh_entsize: u64,
}

impl SectionHeader {
    pub fn write_to<W: Write>(&self, w: &mut W) -> std::io::Result<()> {
        w.write_u32::<LittleEndian>(self.sh_name)?;
        w.write_u32::<LittleEndian>(self.sh_type)?;
        w.write_u64::<LittleEndian>(self.sh_flags)?;
        w.write_u64::<LittleEndian>(self.sh_addr)?;
        w.write_u64::<LittleEndian>(self.sh_offset)?;
        w.write_u64::<LittleEndian>(self.sh_size)?;
        w.write_u32::<LittleEndian>(self.sh_link)?;
        w.write_u32::<LittleEndian>(self.sh_info)?;
        w.write_u64::<LittleEndian>(self.sh_addralign)?;
        w.write_u64::<LittleEndian>(self.sh_entsize)?;
        Ok(())
    }
}

fn flags_for(name: &str) -> SectionFlags {
    match name {
        ".text" => SectionFlags::ALLOC | SectionFlags::EXECINSTR,
        ".data" | ".bss" => SectionFlags::ALLOC | SectionFlags::WRITE,
        _ => SectionFlags::ALLOC,
    }
}

fn align_for(name: &str) -> u64 {
    match name {
        ".text" => 16,
        ".data" => 4,
        _ => 1,
    }
}

/// Encode one body line of an executable section. Labels contribute no
/// bytes; mnemonics map to representative opcode sequences so the
/// payload reads as x86-64 code.
fn encode_text_line(line: &str, out: &mut Vec<u8>) -> Result<(), ElfError> {
    if line.ends_with(':') {
        return Ok(());
    }
    let mut tokens = line.split_whitespace();
    let Some(mnemonic) = tokens.next() else {
        return Ok(());
    };
    if let Some(value) = parse_data_directive(mnemonic, line)? {
        out.extend_from_slice(&value);
        return Ok(());
    }
    match mnemonic {
        "push" => out.push(0x55),
        "pop" => out.push(0x5D),
        "ret" => out.push(0xC3),
        "leave" => out.push(0xC9),
        "cqo" => out.extend_from_slice(&[0x48, 0x99]),
        "mov" => {
            let operand = tokens.next().unwrap_or("");
            if let Some(imm) = operand.strip_prefix('$') {
                // The 7-byte mov rax, imm32 form
                let imm = imm.trim_end_matches(',');
                let value = imm.parse::<i64>().unwrap_or(0) as i32;
                out.extend_from_slice(&[0x48, 0xC7, 0xC0]);
                out.extend_from_slice(&value.to_le_bytes());
            } else {
                out.extend_from_slice(&[0x48, 0x89, 0xC0]);
            }
        }
        "lea" => out.extend_from_slice(&[0x48, 0x8D, 0x45, 0x00]),
        "add" => out.extend_from_slice(&[0x48, 0x01, 0xD8]),
        "sub" => out.extend_from_slice(&[0x48, 0x29, 0xD8]),
        "imul" => out.extend_from_slice(&[0x48, 0x0F, 0xAF, 0xC3]),
        "idiv" => out.extend_from_slice(&[0x48, 0xF7, 0xFB]),
        "and" => out.extend_from_slice(&[0x48, 0x21, 0xD8]),
        "or" => out.extend_from_slice(&[0x48, 0x09, 0xD8]),
        "xor" => out.extend_from_slice(&[0x48, 0x31, 0xD8]),
        "cmp" => out.extend_from_slice(&[0x48, 0x39, 0xC3]),
        "call" => out.extend_from_slice(&[0xE8, 0x00, 0x00, 0x00, 0x00]),
        "jmp" => out.extend_from_slice(&[0xE9, 0x00, 0x00, 0x00, 0x00]),
        "jne" => out.extend_from_slice(&[0x0F, 0x85, 0x00, 0x00, 0x00, 0x00]),
        "je" => out.extend_from_slice(&[0x0F, 0x84, 0x00, 0x00, 0x00, 0x00]),
        "movzx" => out.extend_from_slice(&[0x48, 0x0F, 0xB6, 0xC0]),
        m if m.starts_with("set") => out.extend_from_slice(&[0x0F, 0x94, 0xC0]),
        // Anything else (shifts, sign extension, SSE) encodes as a nop
        // so offsets keep advancing deterministically
        _ => out.push(0x90),
    }
    Ok(())
}

/// Encode one body line of a data section.
fn encode_data_line(line: &str, out: &mut Vec<u8>) -> Result<(), ElfError> {
    if line.ends_with(':') {
        return Ok(());
    }
    let mut tokens = line.split_whitespace();
    let Some(directive) = tokens.next() else {
        return Ok(());
    };
    match parse_data_directive(directive, line)? {
        Some(bytes) => {
            out.extend_from_slice(&bytes);
            Ok(())
        }
        None => Err(ElfError::Directive {
            line: 0,
            text: line.to_string(),
        }),
    }
}

/// `.long`/`.byte`/`.quad` payload bytes, or `None` for other tokens.
fn parse_data_directive(directive: &str, line: &str) -> Result<Option<Vec<u8>>, ElfError> {
    let width = match directive {
        ".byte" => 1,
        ".long" => 4,
        ".quad" => 8,
        _ => return Ok(None),
    };
    let operand = line
        .split_whitespace()
        .nth(1)
        .ok_or_else(|| ElfError::Directive {
            line: 0,
            text: line.to_string(),
        })?;
    let value = operand.parse::<i64>().map_err(|_| ElfError::Directive {
        line: 0,
        text: line.to_string(),
    })?;
    let bytes = value.to_le_bytes();
    Ok(Some(bytes[..width].to_vec()))
}

/// Assemble the parsed program into the final object bytes.
pub fn build(program: &AsmProgram) -> Result<Vec<u8>, ElfError> {
    // Payloads first, so header offsets are known
    let mut payloads: Vec<Vec<u8>> = Vec::with_capacity(program.sections.len());
    for section in &program.sections {
        let mut payload = Vec::new();
        let executable = flags_for(&section.name).contains(SectionFlags::EXECINSTR);
        for line in &section.lines {
            if executable {
                encode_text_line(line, &mut payload)?;
            } else {
                encode_data_line(line, &mut payload)?;
            }
        }
        payloads.push(payload);
    }

    // Section name string table: leading NUL, then each name NUL-terminated
    let mut shstrtab = vec![0u8];
    let mut name_offsets = Vec::with_capacity(program.sections.len());
    for section in &program.sections {
        name_offsets.push(shstrtab.len() as u32);
        shstrtab.extend_from_slice(section.name.as_bytes());
        shstrtab.push(0);
    }
    let shstrtab_name_offset = shstrtab.len() as u32;
    shstrtab.extend_from_slice(b".shstrtab");
    shstrtab.push(0);

    let shnum = program.sections.len() as u16 + 2;

    // Layout: header, payloads, shstrtab, padded section header table
    let mut offset = EHDR_SIZE as u64;
    let mut section_offsets = Vec::with_capacity(payloads.len());
    for payload in &payloads {
        section_offsets.push(offset);
        offset += payload.len() as u64;
    }
    let shstrtab_offset = offset;
    offset += shstrtab.len() as u64;
    let e_shoff = offset.next_multiple_of(8);
    let padding = (e_shoff - offset) as usize;

    let header = ElfHeader {
        e_shoff,
        e_shnum: shnum,
        e_shstrndx: shnum - 1,
        ..ElfHeader::default()
    };

    let mut out = Vec::new();
    header.write_to(&mut out)?;
    for payload in &payloads {
        out.extend_from_slice(payload);
    }
    out.extend_from_slice(&shstrtab);
    out.extend_from_slice(&vec![0u8; padding]);

    // Index 0 is the mandatory null entry
    SectionHeader::default().write_to(&mut out)?;
    for (i, section) in program.sections.iter().enumerate() {
        SectionHeader {
            sh_name: name_offsets[i],
            sh_type: SHT_PROGBITS,
            sh_flags: flags_for(&section.name).bits(),
            sh_addr: 0,
            sh_offset: section_offsets[i],
            sh_size: payloads[i].len() as u64,
            sh_link: 0,
            sh_info: 0,
            sh_addralign: align_for(&section.name),
            sh_entsize: 0,
        }
        .write_to(&mut out)?;
    }
    SectionHeader {
        sh_name: shstrtab_name_offset,
        sh_type: SHT_STRTAB,
        sh_flags: 0,
        sh_addr: 0,
        sh_offset: shstrtab_offset,
        sh_size: shstrtab.len() as u64,
        sh_link: 0,
        sh_info: 0,
        sh_addralign: 1,
        sh_entsize: 0,
    }
    .write_to(&mut out)?;

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asm;

    fn object(source: &str) -> Vec<u8> {
        build(&asm::parse(source).unwrap()).unwrap()
    }

    #[test]
    fn test_header_constants() {
        let bytes = object(".text\nret\n");
        assert_eq!(&bytes[0..4], &[0x7F, b'E', b'L', b'F']);
        assert_eq!(bytes[4], 2, "ELFCLASS64");
        assert_eq!(bytes[5], 1, "little endian");
        assert_eq!(u16::from_le_bytes([bytes[16], bytes[17]]), 1, "ET_REL");
        assert_eq!(u16::from_le_bytes([bytes[18], bytes[19]]), 0x3E, "EM_X86_64");
        assert_eq!(u16::from_le_bytes([bytes[52], bytes[53]]), 64, "e_ehsize");
        assert_eq!(u16::from_le_bytes([bytes[58], bytes[59]]), 64, "e_shentsize");
    }

    #[test]
    fn test_shnum_and_shstrndx() {
        let bytes = object(".text\nret\n.data\n.long 1\n");
        let shnum = u16::from_le_bytes([bytes[60], bytes[61]]);
        let shstrndx = u16::from_le_bytes([bytes[62], bytes[63]]);
        assert_eq!(shnum, 4, "null + .text + .data + .shstrtab");
        assert_eq!(shstrndx, shnum - 1);
    }

    #[test]
    fn test_section_header_table_is_within_buffer() {
        let bytes = object(".text\npush rbp\nret\n");
        let shoff = u64::from_le_bytes(bytes[40..48].try_into().unwrap());
        let shnum = u16::from_le_bytes([bytes[60], bytes[61]]) as u64;
        assert_eq!(bytes.len() as u64, shoff + shnum * 64);
    }

    #[test]
    fn test_text_opcodes_present() {
        let bytes = object(".text\nmain:\npush rbp\nmov $42, rax\nret\n");
        let payload = &bytes[64..];
        assert!(payload.windows(1).any(|w| w == [0x55]));
        assert!(payload
            .windows(7)
            .any(|w| w == [0x48, 0xC7, 0xC0, 42, 0, 0, 0]));
        assert!(payload.contains(&0xC3));
    }

    #[test]
    fn test_data_little_endian() {
        let bytes = object(".data\ncounter:\n.long 12345\n");
        assert!(
            bytes.windows(4).any(|w| w == [0x39, 0x30, 0x00, 0x00]),
            "12345 encodes as 39 30 00 00"
        );
    }

    #[test]
    fn test_quad_and_byte_widths() {
        let bytes = object(".data\n.byte 7\n.quad 258\n");
        // Payload starts right after the header
        assert_eq!(bytes[64], 7);
        assert_eq!(&bytes[65..73], &[2, 1, 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn test_labels_emit_no_bytes() {
        let with_label = object(".text\nmain:\nret\n");
        let without = object(".text\nret\n");
        assert_eq!(with_label.len(), without.len());
    }

    #[test]
    fn test_determinism() {
        let source = ".text\nmain:\npush rbp\nmov $1, rax\nret\n.data\n.long 5\n";
        assert_eq!(object(source), object(source));
    }

    #[test]
    fn test_bad_data_directive() {
        let err = build(&asm::parse(".data\n.long nope\n").unwrap()).unwrap_err();
        assert!(matches!(err, ElfError::Directive { .. }));
    }
}
