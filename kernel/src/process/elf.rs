//! Minimal 64-bit ELF header / `PT_LOAD` program-header reader.
//!
//! Per SPEC_FULL.md §1, the raw ELF image byte-parsing sits just outside the
//! core's interface boundary (the core consumes *decoded* program headers);
//! this module is the thin decoder that produces them, grounded on the
//! teacher's `user/elf.rs` `ProgramHeaderEntry` layout and
//! `examples/original_source/kernel/k-loader.c`'s `program_load`
//! (`elf_header`/`elf_program` field reads).

use crate::error::{KernelError, KernelResult};
use alloc::vec::Vec;

const ELF_MAGIC: &[u8; 4] = b"\x7fELF";
const PT_LOAD: u32 = 1;

/// One `PT_LOAD` segment: covers `[offset, offset+filesz)` in the image,
/// loaded at virtual address `vaddr`, with `[filesz, memsz)` zero-filled.
#[derive(Debug, Clone, Copy)]
pub struct ProgramHeader {
    pub vaddr: u64,
    pub offset: u64,
    pub filesz: u64,
    pub memsz: u64,
    pub writable: bool,
    pub executable: bool,
}

#[derive(Debug, Clone)]
pub struct ElfImage {
    pub entry: u64,
    pub segments: Vec<ProgramHeader>,
}

/// Parses an ELF64 header and its `PT_LOAD` program headers out of a raw
/// image. Non-`PT_LOAD` segments (`PT_DYNAMIC`, `PT_INTERP`, ...) are
/// dropped; this kernel only ever loads static executables.
pub fn parse(image: &[u8]) -> KernelResult<ElfImage> {
    if image.len() < 64 || &image[0..4] != ELF_MAGIC {
        return Err(KernelError::InvalidArg);
    }
    if image[4] != 2 || image[5] != 1 {
        // not 64-bit, or not little-endian
        return Err(KernelError::InvalidArg);
    }

    let entry = read_u64(image, 0x18)?;
    let phoff = read_u64(image, 0x20)? as usize;
    let phentsize = read_u16(image, 0x36)? as usize;
    let phnum = read_u16(image, 0x38)? as usize;

    if phentsize < 56 {
        return Err(KernelError::InvalidArg);
    }

    let mut segments = Vec::with_capacity(phnum);
    for i in 0..phnum {
        let base = phoff + i * phentsize;
        let p_type = read_u32(image, base)?;
        if p_type != PT_LOAD {
            continue;
        }
        let flags = read_u32(image, base + 4)?;
        let offset = read_u64(image, base + 8)?;
        let vaddr = read_u64(image, base + 16)?;
        let filesz = read_u64(image, base + 32)?;
        let memsz = read_u64(image, base + 40)?;
        segments.push(ProgramHeader {
            vaddr,
            offset,
            filesz,
            memsz,
            writable: flags & 0x2 != 0,
            executable: flags & 0x1 != 0,
        });
    }

    Ok(ElfImage { entry, segments })
}

fn read_u64(buf: &[u8], off: usize) -> KernelResult<u64> {
    buf.get(off..off + 8)
        .and_then(|s| s.try_into().ok())
        .map(u64::from_le_bytes)
        .ok_or(KernelError::InvalidArg)
}

fn read_u32(buf: &[u8], off: usize) -> KernelResult<u32> {
    buf.get(off..off + 4)
        .and_then(|s| s.try_into().ok())
        .map(u32::from_le_bytes)
        .ok_or(KernelError::InvalidArg)
}

fn read_u16(buf: &[u8], off: usize) -> KernelResult<u16> {
    buf.get(off..off + 2)
        .and_then(|s| s.try_into().ok())
        .map(u16::from_le_bytes)
        .ok_or(KernelError::InvalidArg)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_minimal_elf(entry: u64, segments: &[(u64, u64, u32)]) -> Vec<u8> {
        // segments: (vaddr, size, flags); offset/filesz both equal `size`,
        // backed by that many zero bytes appended after the headers.
        let phoff = 64u64;
        let phentsize = 56u16;
        let phnum = segments.len() as u16;
        let mut buf = alloc::vec![0u8; 64 + segments.len() * 56];
        buf[0..4].copy_from_slice(ELF_MAGIC);
        buf[4] = 2;
        buf[5] = 1;
        buf[0x18..0x20].copy_from_slice(&entry.to_le_bytes());
        buf[0x20..0x28].copy_from_slice(&phoff.to_le_bytes());
        buf[0x36..0x38].copy_from_slice(&phentsize.to_le_bytes());
        buf[0x38..0x3A].copy_from_slice(&phnum.to_le_bytes());

        let mut data_offset = buf.len() as u64;
        for (i, (vaddr, size, flags)) in segments.iter().enumerate() {
            let base = 64 + i * 56;
            buf[base..base + 4].copy_from_slice(&1u32.to_le_bytes()); // PT_LOAD
            buf[base + 4..base + 8].copy_from_slice(&flags.to_le_bytes());
            buf[base + 8..base + 16].copy_from_slice(&data_offset.to_le_bytes());
            buf[base + 16..base + 24].copy_from_slice(&vaddr.to_le_bytes());
            buf[base + 32..base + 40].copy_from_slice(&size.to_le_bytes());
            buf[base + 40..base + 48].copy_from_slice(&size.to_le_bytes());
            data_offset += size;
        }
        buf.resize(data_offset as usize, 0);
        buf
    }

    #[test]
    fn parses_entry_and_load_segments() {
        let image = build_minimal_elf(0x1000, &[(0x1000, 4096, 0x5), (0x2000, 4096, 0x6)]);
        let elf = parse(&image).unwrap();
        assert_eq!(elf.entry, 0x1000);
        assert_eq!(elf.segments.len(), 2);
        assert_eq!(elf.segments[0].vaddr, 0x1000);
        assert!(elf.segments[0].executable);
        assert!(!elf.segments[0].writable);
        assert!(elf.segments[1].writable);
    }

    #[test]
    fn rejects_bad_magic() {
        let mut image = build_minimal_elf(0, &[]);
        image[0] = 0;
        assert_eq!(parse(&image), Err(KernelError::InvalidArg));
    }
}
