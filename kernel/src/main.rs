#![feature(abi_x86_interrupt)]
#![no_std]
#![no_main]
extern crate alloc;

mod config;
mod console;
mod error;
mod fs;
mod gdt;
mod interrupts;
mod keyboard;
mod memory;
mod panic;
mod pic;
mod process;
mod rng;
mod scheduler;
mod syscall;

use bootloader_api::config::Mapping;
use bootloader_api::BootloaderConfig;

pub static BOOTLOADER_CONFIG: BootloaderConfig = {
    let mut config = BootloaderConfig::new_default();
    // A fixed physical-memory mapping, not a recursive page table slot: the
    // scheduler swaps `CR3` to arbitrary per-process roots (`scheduler::resume`),
    // so the kernel needs a stable way to reach *any* physical frame regardless
    // of which root is currently loaded (`memory::vmm`'s `phys_offset`-relative
    // walks), which a recursive slot tied to one root cannot provide.
    config.mappings.physical_memory = Some(Mapping::Dynamic);
    config
};

/// The shell/init program's ELF image, embedded at build time the same way
/// the original kernel's `initcode` binary was linked straight into `kernel.c`.
static INIT_PROGRAM: &[u8] = include_bytes!(env!("INIT_PROGRAM_PATH"));

bootloader_api::entry_point!(kernel_main, config = &BOOTLOADER_CONFIG);

fn kernel_main(boot_info: &'static mut bootloader_api::BootInfo) -> ! {
    let framebuffer = boot_info.framebuffer.as_mut().unwrap();
    unsafe { crate::panic::PANIC_FRAMEBUFFER = Some(&raw mut *framebuffer) };

    gdt::init();
    interrupts::init_idt();

    let phys_mem_offset = boot_info
        .physical_memory_offset
        .into_option()
        .expect("bootloader did not map all physical memory");
    memory::init(&boot_info.memory_regions, phys_mem_offset);

    debug_println!("frame table and kernel page table root ready");

    pic::init();
    keyboard::init();

    // Seed the kernel RNG from the CPU timestamp counter: not cryptographically
    // sound, but this is an xorshift stream feeding per-file AES keys in a
    // single-tenant teaching kernel, not a production entropy source.
    let seed = unsafe { core::arch::x86_64::_rdtsc() } as u32;
    rng::init(seed);

    let disk = unsafe { fs::disk::AtaDisk::new(fs::disk::AtaDisk::PRIMARY_IO_BASE) };
    fs::mount_or_format_global(disk).expect("failed to mount filesystem");
    debug_println!("filesystem mounted");

    process::init();
    scheduler::init_idle();

    let pid = process::spawn_initial(INIT_PROGRAM, &["init"]).expect("failed to spawn init process");
    debug_println!("spawned init process as pid {}", pid);

    x86_64::instructions::interrupts::enable();
    loop {
        x86_64::instructions::hlt();
    }
}
