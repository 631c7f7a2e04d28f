//! Per-file AES-CTR confidentiality.
//!
//! SPEC_FULL.md §9 fix: the counter for byte `n` of the plaintext is
//! `CTR0 + (n / 16)`, computed arithmetically rather than by pointer-offsetting
//! into the IV buffer (the source's bug). The `ctr` crate's `StreamCipherSeek`
//! already seeks by byte position and divides by the block size internally, so
//! seeking to the absolute file offset before applying the keystream gives
//! exactly this formula for free.

use crate::config::{FS_IV_SIZE, FS_KEY_SIZE};
use aes::Aes128;
use ctr::cipher::{KeyIvInit, StreamCipher, StreamCipherSeek};

type Aes128Ctr = ctr::Ctr128BE<Aes128>;

/// XORs `buf` with the AES-CTR keystream for a file keyed by `(key, iv)`, where
/// `buf` logically begins at absolute byte offset `file_offset` within the file.
/// AES-CTR is an involution under XOR, so this same function both encrypts and
/// decrypts.
pub fn apply_keystream(
    key: &[u8; FS_KEY_SIZE],
    iv: &[u8; FS_IV_SIZE],
    file_offset: u64,
    buf: &mut [u8],
) {
    let mut cipher = Aes128Ctr::new(key.into(), iv.into());
    cipher.seek(file_offset);
    cipher.apply_keystream(buf);
}

/// Generates a fresh random `(key, iv)` pair from an RNG source, used when a
/// write relocates a file to a new extent.
pub fn fresh_key_iv(rng: &mut dyn crate::rng::Rng) -> ([u8; FS_KEY_SIZE], [u8; FS_IV_SIZE]) {
    let mut key = [0u8; FS_KEY_SIZE];
    let mut iv = [0u8; FS_IV_SIZE];
    rng.fill(&mut key);
    rng.fill(&mut iv);
    (key, iv)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encrypt_then_decrypt_is_identity() {
        let key = [0x11u8; FS_KEY_SIZE];
        let iv = [0x22u8; FS_IV_SIZE];
        let mut data = b"hello, encrypted world!".to_vec();
        let original = data.clone();
        apply_keystream(&key, &iv, 0, &mut data);
        assert_ne!(data, original);
        apply_keystream(&key, &iv, 0, &mut data);
        assert_eq!(data, original);
    }

    #[test]
    fn keystream_is_position_independent_of_slicing() {
        let key = [0x55u8; FS_KEY_SIZE];
        let iv = [0x77u8; FS_IV_SIZE];
        let mut whole = [0u8; 64];
        apply_keystream(&key, &iv, 0, &mut whole);

        // Re-derive the same ciphertext by encrypting two slices separately,
        // each seeded with its own absolute file offset.
        let mut half_a = [0u8; 32];
        let mut half_b = [0u8; 32];
        apply_keystream(&key, &iv, 0, &mut half_a);
        apply_keystream(&key, &iv, 32, &mut half_b);

        assert_eq!(&whole[0..32], &half_a[..]);
        assert_eq!(&whole[32..64], &half_b[..]);
    }

    #[test]
    fn unaligned_offset_matches_full_stream() {
        let key = [0x99u8; FS_KEY_SIZE];
        let iv = [0xAAu8; FS_IV_SIZE];
        let mut whole = [0u8; 48];
        apply_keystream(&key, &iv, 0, &mut whole);

        let mut tail = [0u8; 20];
        apply_keystream(&key, &iv, 28, &mut tail);
        assert_eq!(&whole[28..48], &tail[..]);
    }
}
