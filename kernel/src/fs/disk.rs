//! Block device capability, replacing the source's `fs_disk_reader`/`fs_disk_writer`
//! function-pointer pair with a trait (SPEC_FULL.md §9's re-architecture note).

use crate::error::{KernelError, KernelResult};
use alloc::vec;
use alloc::vec::Vec;

pub trait BlockDevice {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> KernelResult<()>;
    fn write_at(&mut self, offset: u64, buf: &[u8]) -> KernelResult<()>;
}

/// A flat in-memory disk image, used by hosted tests and as the backing store
/// until a real port-IO disk driver is wired up.
pub struct MemoryDisk {
    bytes: Vec<u8>,
}

impl MemoryDisk {
    pub fn new(size: usize) -> MemoryDisk {
        MemoryDisk {
            bytes: vec![0u8; size],
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl BlockDevice for MemoryDisk {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> KernelResult<()> {
        let start = offset as usize;
        let end = start.checked_add(buf.len()).ok_or(KernelError::IoError)?;
        let src = self.bytes.get(start..end).ok_or(KernelError::IoError)?;
        buf.copy_from_slice(src);
        Ok(())
    }

    fn write_at(&mut self, offset: u64, buf: &[u8]) -> KernelResult<()> {
        let start = offset as usize;
        let end = start.checked_add(buf.len()).ok_or(KernelError::IoError)?;
        let dst = self.bytes.get_mut(start..end).ok_or(KernelError::IoError)?;
        dst.copy_from_slice(buf);
        Ok(())
    }
}

/// Minimal legacy ATA PIO disk, primary bus / master drive, 28-bit LBA.
///
/// Grounded on the original `fs_read_disk`/`fs_write_disk` wrappers in `kernel.c`,
/// which call through an opaque `readdisk`/`writedisk` pair at a fixed
/// `FILESYSTEM_DISK_OFFSET`; here that pair becomes port I/O against the disk
/// controller directly.
#[cfg(target_arch = "x86_64")]
pub struct AtaDisk {
    io_base: u16,
}

#[cfg(target_arch = "x86_64")]
impl AtaDisk {
    pub const PRIMARY_IO_BASE: u16 = 0x1F0;

    /// # Safety
    /// The caller must ensure no other driver is using the same ATA controller.
    pub const unsafe fn new(io_base: u16) -> AtaDisk {
        AtaDisk { io_base }
    }

    fn read_sector(&self, lba: u32, buf: &mut [u8; 512]) {
        use x86_64::instructions::port::Port;
        unsafe {
            let mut sector_count = Port::<u8>::new(self.io_base + 2);
            let mut lba_low = Port::<u8>::new(self.io_base + 3);
            let mut lba_mid = Port::<u8>::new(self.io_base + 4);
            let mut lba_high = Port::<u8>::new(self.io_base + 5);
            let mut drive_head = Port::<u8>::new(self.io_base + 6);
            let mut command = Port::<u8>::new(self.io_base + 7);
            let mut status = Port::<u8>::new(self.io_base + 7);
            let mut data = Port::<u16>::new(self.io_base);

            drive_head.write(0xE0 | (((lba >> 24) & 0x0F) as u8));
            sector_count.write(1u8);
            lba_low.write((lba & 0xFF) as u8);
            lba_mid.write(((lba >> 8) & 0xFF) as u8);
            lba_high.write(((lba >> 16) & 0xFF) as u8);
            command.write(0x20u8); // READ SECTORS

            while status.read() & 0x80 != 0 {}

            for chunk in buf.chunks_exact_mut(2) {
                let word = data.read();
                chunk.copy_from_slice(&word.to_le_bytes());
            }
        }
    }

    fn write_sector(&mut self, lba: u32, buf: &[u8; 512]) {
        use x86_64::instructions::port::Port;
        unsafe {
            let mut sector_count = Port::<u8>::new(self.io_base + 2);
            let mut lba_low = Port::<u8>::new(self.io_base + 3);
            let mut lba_mid = Port::<u8>::new(self.io_base + 4);
            let mut lba_high = Port::<u8>::new(self.io_base + 5);
            let mut drive_head = Port::<u8>::new(self.io_base + 6);
            let mut command = Port::<u8>::new(self.io_base + 7);
            let mut status = Port::<u8>::new(self.io_base + 7);
            let mut data = Port::<u16>::new(self.io_base);

            drive_head.write(0xE0 | (((lba >> 24) & 0x0F) as u8));
            sector_count.write(1u8);
            lba_low.write((lba & 0xFF) as u8);
            lba_mid.write(((lba >> 8) & 0xFF) as u8);
            lba_high.write(((lba >> 16) & 0xFF) as u8);
            command.write(0x30u8); // WRITE SECTORS

            while status.read() & 0x80 != 0 {}

            for chunk in buf.chunks_exact(2) {
                data.write(u16::from_le_bytes([chunk[0], chunk[1]]));
            }
        }
    }
}

#[cfg(target_arch = "x86_64")]
impl BlockDevice for AtaDisk {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> KernelResult<()> {
        let mut sector = [0u8; 512];
        let mut done = 0;
        while done < buf.len() {
            let abs = offset + done as u64;
            let lba = (abs / 512) as u32;
            let in_sector = (abs % 512) as usize;
            self.read_sector(lba, &mut sector);
            let n = core::cmp::min(512 - in_sector, buf.len() - done);
            buf[done..done + n].copy_from_slice(&sector[in_sector..in_sector + n]);
            done += n;
        }
        Ok(())
    }

    fn write_at(&mut self, offset: u64, buf: &[u8]) -> KernelResult<()> {
        let mut sector = [0u8; 512];
        let mut done = 0;
        while done < buf.len() {
            let abs = offset + done as u64;
            let lba = (abs / 512) as u32;
            let in_sector = (abs % 512) as usize;
            if in_sector != 0 || buf.len() - done < 512 {
                self.read_sector(lba, &mut sector);
            }
            let n = core::cmp::min(512 - in_sector, buf.len() - done);
            sector[in_sector..in_sector + n].copy_from_slice(&buf[done..done + n]);
            self.write_sector(lba, &sector);
            done += n;
        }
        Ok(())
    }
}
