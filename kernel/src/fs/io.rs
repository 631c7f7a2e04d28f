//! Data I/O: `read`, `write`, `truncate`.
//!
//! Grounded on `filesystem.c`'s `fs_read`/`fs_write` (in-place / extend /
//! relocate policy) with the Open Question resolutions from SPEC_FULL.md §9:
//! truncate is shrink-only (b), and the tail partial block is read-modify-written
//! exactly like the head partial block (c).

use super::crypto::{apply_keystream, fresh_key_iv};
use super::disk::BlockDevice;
use super::Filesystem;
use crate::config::{BLOCK_SIZE, FILESYSTEM_DISK_OFFSET, IO_MAX};
use crate::error::{KernelError, KernelResult};
use crate::rng::Rng;
use alloc::vec;

fn ceil_div(a: u64, b: u64) -> u64 {
    (a + b - 1) / b
}

impl<D: BlockDevice> Filesystem<D> {
    fn data_addr(&self, start_block: u32, file_byte_offset: u64) -> u64 {
        FILESYSTEM_DISK_OFFSET + self.data_offset() + start_block as u64 * BLOCK_SIZE as u64 + file_byte_offset
    }

    /// Reads `buf.len()` bytes starting at `offset`, clamped to EOF. Returns 0
    /// at or past end of file.
    pub fn read(&self, ino: u32, buf: &mut [u8], offset: u64) -> KernelResult<usize> {
        if buf.len() > IO_MAX {
            return Err(KernelError::InvalidArg);
        }
        let inode = self.read_inode(ino)?;
        if offset >= inode.size_bytes {
            return Ok(0);
        }
        let avail = (inode.size_bytes - offset) as usize;
        let len = core::cmp::min(buf.len(), avail);
        if len == 0 {
            return Ok(0);
        }

        self.disk
            .read_at(self.data_addr(inode.start_block, offset), &mut buf[..len])?;
        apply_keystream(&inode.cipher_key, &inode.cipher_iv, offset, &mut buf[..len]);
        Ok(len)
    }

    /// Writes `buf` at `offset`, growing and/or relocating the inode's extent
    /// as needed.
    pub fn write(
        &mut self,
        ino: u32,
        buf: &[u8],
        offset: u64,
        rng: &mut dyn Rng,
    ) -> KernelResult<usize> {
        if buf.len() > IO_MAX {
            return Err(KernelError::InvalidArg);
        }
        let mut inode = self.read_inode(ino)?;
        if offset > inode.size_bytes {
            return Err(KernelError::InvalidArg);
        }
        if buf.is_empty() {
            return Ok(0);
        }

        let need_blocks = ceil_div(offset + buf.len() as u64, BLOCK_SIZE as u64) as u32;

        let mut final_start = inode.start_block;
        let mut final_block_count = inode.block_count;
        let mut final_key = inode.cipher_key;
        let mut final_iv = inode.cipher_iv;

        if need_blocks <= inode.block_count {
            // In place: extent already large enough.
        } else if inode.block_count == 0 {
            final_start = self.alloc_blocks(need_blocks)?;
            final_block_count = need_blocks;
        } else if self.blocks_free(inode.start_block + inode.block_count, need_blocks - inode.block_count)? {
            self.mark_blocks(
                inode.start_block + inode.block_count,
                need_blocks - inode.block_count,
                true,
            )?;
            final_block_count = need_blocks;
        } else {
            let new_start = self.alloc_blocks(need_blocks)?;
            let (new_key, new_iv) = fresh_key_iv(rng);

            // Re-encrypt the entire existing extent into the new location.
            let mut block_buf = vec![0u8; BLOCK_SIZE];
            for b in 0..inode.block_count {
                let file_off = b as u64 * BLOCK_SIZE as u64;
                self.disk
                    .read_at(self.data_addr(inode.start_block, file_off), &mut block_buf)?;
                apply_keystream(&inode.cipher_key, &inode.cipher_iv, file_off, &mut block_buf);
                apply_keystream(&new_key, &new_iv, file_off, &mut block_buf);
                self.disk
                    .write_at(self.data_addr(new_start, file_off), &block_buf)?;
            }
            self.mark_blocks(inode.start_block, inode.block_count, false)?;

            final_start = new_start;
            final_block_count = need_blocks;
            final_key = new_key;
            final_iv = new_iv;
        }

        // Stage the write's span, block-aligned, read-modify-write style: head
        // and tail partial blocks preserve whatever bytes they carried before
        // (existing data, or zero past the old end of file).
        let write_start = offset;
        let write_end = offset + buf.len() as u64;
        let aligned_start = (write_start / BLOCK_SIZE as u64) * BLOCK_SIZE as u64;
        let aligned_end = ceil_div(write_end, BLOCK_SIZE as u64) * BLOCK_SIZE as u64;
        let staging_len = (aligned_end - aligned_start) as usize;
        let mut staging = vec![0u8; staging_len];

        let preserved_end = core::cmp::min(aligned_end, inode.size_bytes);
        if preserved_end > aligned_start && final_block_count > 0 {
            let preserved_len = (preserved_end - aligned_start) as usize;
            self.disk
                .read_at(self.data_addr(final_start, aligned_start), &mut staging[..preserved_len])?;
            apply_keystream(&final_key, &final_iv, aligned_start, &mut staging[..preserved_len]);
        }

        let dst_off = (write_start - aligned_start) as usize;
        staging[dst_off..dst_off + buf.len()].copy_from_slice(buf);

        apply_keystream(&final_key, &final_iv, aligned_start, &mut staging);
        self.disk.write_at(self.data_addr(final_start, aligned_start), &staging)?;

        inode.start_block = final_start;
        inode.block_count = final_block_count;
        inode.cipher_key = final_key;
        inode.cipher_iv = final_iv;
        inode.size_bytes = core::cmp::max(inode.size_bytes, write_end);
        self.write_inode(ino, &inode)?;

        Ok(buf.len())
    }

    /// Shrinks a file to `new_size`, freeing trailing blocks. Growing via
    /// truncate is rejected (SPEC_FULL.md Open Question (b)); only `write`
    /// extends a file.
    pub fn truncate(&mut self, ino: u32, new_size: u64) -> KernelResult<()> {
        let mut inode = self.read_inode(ino)?;
        if new_size > inode.size_bytes {
            return Err(KernelError::InvalidArg);
        }
        let new_block_count = ceil_div(new_size, BLOCK_SIZE as u64) as u32;
        if new_block_count < inode.block_count {
            let freed_start = inode.start_block + new_block_count;
            let freed_count = inode.block_count - new_block_count;
            self.mark_blocks(freed_start, freed_count, false)?;
            inode.block_count = new_block_count;
        }
        inode.size_bytes = new_size;
        self.write_inode(ino, &inode)
    }
}

#[cfg(test)]
mod tests {
    use super::super::disk::MemoryDisk;
    use super::super::Filesystem;
    use crate::error::KernelError;
    use crate::rng::XorShiftRng;
    use alloc::vec;

    fn fresh_fs() -> Filesystem<MemoryDisk> {
        let disk = MemoryDisk::new(1024 * 512 + 256 * 1024);
        Filesystem::format(disk).unwrap()
    }

    #[test]
    fn create_write_read_roundtrip() {
        let mut fs = fresh_fs();
        let ino = fs.alloc_inode().unwrap();
        let mut rng = XorShiftRng::new(1);
        let n = fs.write(ino, b"hello", 0, &mut rng).unwrap();
        assert_eq!(n, 5);
        let mut buf = [0u8; 5];
        let r = fs.read(ino, &mut buf, 0).unwrap();
        assert_eq!(r, 5);
        assert_eq!(&buf, b"hello");
    }

    #[test]
    fn non_overlapping_slice_writes_reassemble() {
        let mut fs = fresh_fs();
        let ino = fs.alloc_inode().unwrap();
        let mut rng = XorShiftRng::new(2);
        let data = b"ABCDEFGHIJKLMNOP";
        fs.write(ino, &data[8..16], 8, &mut rng).unwrap();
        fs.write(ino, &data[0..8], 0, &mut rng).unwrap();

        let mut buf = [0u8; 16];
        fs.read(ino, &mut buf, 0).unwrap();
        assert_eq!(&buf, data);
    }

    #[test]
    fn read_past_eof_clamped_to_zero() {
        let mut fs = fresh_fs();
        let ino = fs.alloc_inode().unwrap();
        let mut rng = XorShiftRng::new(3);
        fs.write(ino, b"hi", 0, &mut rng).unwrap();
        let mut buf = [0xFFu8; 8];
        assert_eq!(fs.read(ino, &mut buf, 2).unwrap(), 0);
        assert_eq!(fs.read(ino, &mut buf, 100).unwrap(), 0);
    }

    #[test]
    fn write_past_size_is_invalid_arg() {
        let mut fs = fresh_fs();
        let ino = fs.alloc_inode().unwrap();
        let mut rng = XorShiftRng::new(4);
        assert_eq!(
            fs.write(ino, b"x", 10, &mut rng),
            Err(KernelError::InvalidArg)
        );
    }

    #[test]
    fn relocation_preserves_content_and_frees_old_blocks() {
        let mut fs = fresh_fs();
        let mut rng = XorShiftRng::new(5);

        let a = fs.alloc_inode().unwrap();
        let b = fs.alloc_inode().unwrap();
        let c = fs.alloc_inode().unwrap();
        fs.write(a, &[1u8; crate::config::BLOCK_SIZE], 0, &mut rng).unwrap();
        fs.write(b, &[2u8; crate::config::BLOCK_SIZE], 0, &mut rng).unwrap();
        fs.write(c, &[3u8; crate::config::BLOCK_SIZE], 0, &mut rng).unwrap();

        let old_inode = fs.read_inode(a).unwrap();
        let old_start = old_inode.start_block;

        let mut x = vec![0xABu8; crate::config::BLOCK_SIZE + 1];
        for (i, b) in x.iter_mut().enumerate() {
            *b = (i % 251) as u8;
        }
        fs.write(a, &x, 0, &mut rng).unwrap();

        let mut readback = vec![0u8; x.len()];
        fs.read(a, &mut readback, 0).unwrap();
        assert_eq!(readback, x);

        let mut bbuf = [0u8; crate::config::BLOCK_SIZE];
        fs.read(b, &mut bbuf, 0).unwrap();
        assert_eq!(bbuf, [2u8; crate::config::BLOCK_SIZE]);
        let mut cbuf = [0u8; crate::config::BLOCK_SIZE];
        fs.read(c, &mut cbuf, 0).unwrap();
        assert_eq!(cbuf, [3u8; crate::config::BLOCK_SIZE]);

        assert!(fs.blocks_free(old_start, 1).unwrap());
    }

    #[test]
    fn truncate_shrinks_and_frees_trailing_blocks() {
        let mut fs = fresh_fs();
        let mut rng = XorShiftRng::new(6);
        let ino = fs.alloc_inode().unwrap();
        fs.write(ino, &[7u8; crate::config::BLOCK_SIZE * 2], 0, &mut rng)
            .unwrap();
        fs.truncate(ino, 10).unwrap();
        let inode = fs.read_inode(ino).unwrap();
        assert_eq!(inode.size_bytes, 10);
        assert_eq!(inode.block_count, 1);
        assert!(fs.blocks_free(inode.start_block + 1, 1).unwrap());
    }

    #[test]
    fn truncate_grow_rejected() {
        let mut fs = fresh_fs();
        let mut rng = XorShiftRng::new(7);
        let ino = fs.alloc_inode().unwrap();
        fs.write(ino, b"hi", 0, &mut rng).unwrap();
        assert_eq!(fs.truncate(ino, 100), Err(KernelError::InvalidArg));
    }

    #[test]
    fn raw_disk_bytes_are_ciphertext() {
        let mut fs = fresh_fs();
        let mut rng = XorShiftRng::new(8);
        let ino = fs.alloc_inode().unwrap();
        fs.write(ino, b"plaintext!", 0, &mut rng).unwrap();
        let inode = fs.read_inode(ino).unwrap();
        let disk_off = crate::config::FILESYSTEM_DISK_OFFSET
            + fs.data_offset()
            + inode.start_block as u64 * crate::config::BLOCK_SIZE as u64;
        let raw = &fs.disk().as_bytes()[disk_off as usize..disk_off as usize + 10];
        assert_ne!(raw, b"plaintext!");
    }
}
