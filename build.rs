use std::fs;
use std::path::PathBuf;

/// User-space programs are out of scope for this kernel (they are callers of
/// the syscall surface only); what `process::spawn_initial` needs is just
/// *some* valid ELF64 image to load as PID 1. Rather than shelling out to an
/// external C toolchain for a program this repo doesn't implement, assemble
/// the smallest possible one directly: a single `PT_LOAD` segment containing
/// `getpid; exit(0)` via the syscall vectors in `syscall::numbers`, entered
/// at a fixed low virtual address.
fn build_init_stub() -> Vec<u8> {
    const ENTRY_VA: u64 = 0x0040_0000;
    const GETPID_VECTOR: u8 = 61;
    const EXIT_VECTOR: u8 = 64;

    let text: &[u8] = &[
        0xcd, GETPID_VECTOR, // int $GETPID
        0x31, 0xff, // xor edi, edi      ; exit(0)
        0xcd, EXIT_VECTOR, // int $EXIT
        0xeb, 0xfe, // jmp $             ; unreachable, belt-and-suspenders
    ];

    const EHDR_SIZE: u64 = 64;
    const PHDR_SIZE: u64 = 56;

    let mut image = vec![0u8; (EHDR_SIZE + PHDR_SIZE) as usize];
    image.extend_from_slice(text);

    // e_ident
    image[0..4].copy_from_slice(b"\x7fELF");
    image[4] = 2; // ELFCLASS64
    image[5] = 1; // ELFDATA2LSB
    image[6] = 1; // EV_CURRENT
    // e_type = ET_EXEC, e_machine = EM_X86_64, e_version = 1
    image[16..18].copy_from_slice(&2u16.to_le_bytes());
    image[18..20].copy_from_slice(&62u16.to_le_bytes());
    image[20..24].copy_from_slice(&1u32.to_le_bytes());
    // e_entry
    image[24..32].copy_from_slice(&ENTRY_VA.to_le_bytes());
    // e_phoff
    image[32..40].copy_from_slice(&EHDR_SIZE.to_le_bytes());
    // e_ehsize, e_phentsize, e_phnum
    image[52..54].copy_from_slice(&(EHDR_SIZE as u16).to_le_bytes());
    image[54..56].copy_from_slice(&(PHDR_SIZE as u16).to_le_bytes());
    image[56..58].copy_from_slice(&1u16.to_le_bytes());

    let phdr_off = EHDR_SIZE as usize;
    let filesz = text.len() as u64;
    image[phdr_off..phdr_off + 4].copy_from_slice(&1u32.to_le_bytes()); // PT_LOAD
    image[phdr_off + 4..phdr_off + 8].copy_from_slice(&5u32.to_le_bytes()); // PF_R|PF_X
    image[phdr_off + 8..phdr_off + 16].copy_from_slice(&(EHDR_SIZE + PHDR_SIZE).to_le_bytes()); // p_offset
    image[phdr_off + 16..phdr_off + 24].copy_from_slice(&ENTRY_VA.to_le_bytes()); // p_vaddr
    image[phdr_off + 24..phdr_off + 32].copy_from_slice(&ENTRY_VA.to_le_bytes()); // p_paddr
    image[phdr_off + 32..phdr_off + 40].copy_from_slice(&filesz.to_le_bytes()); // p_filesz
    image[phdr_off + 40..phdr_off + 48].copy_from_slice(&filesz.to_le_bytes()); // p_memsz
    image[phdr_off + 48..phdr_off + 56].copy_from_slice(&0x1000u64.to_le_bytes()); // p_align

    image
}

fn main() {
    let out_dir = PathBuf::from(std::env::var_os("OUT_DIR").unwrap());

    let init_path = out_dir.join("init.bin");
    fs::write(&init_path, build_init_stub()).expect("failed to write init stub");
    println!("cargo:rustc-env=INIT_PROGRAM_PATH={}", init_path.display());

    let kernel = PathBuf::from(std::env::var_os("CARGO_BIN_FILE_KERNEL_kernel").unwrap());
    let uefi_path = out_dir.join("uefi.img");
    bootloader::UefiBoot::new(&kernel)
        .create_disk_image(&uefi_path)
        .unwrap();

    println!("cargo:rustc-env=UEFI_PATH={}", uefi_path.display());
}
