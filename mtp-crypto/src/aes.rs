//! AES-256 in the two modes MTProto uses: IGE for message payloads and CTR
//! for the obfuscated transport.

use ::aes::Aes256;
use ::aes::cipher::generic_array::GenericArray;
use ::aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit, KeyIvInit, StreamCipher};

/// Encrypt `buffer` in place with AES-256-IGE.
///
/// `iv` is the usual 32-byte MTProto IV: the first half seeds the previous
/// ciphertext block, the second half the previous plaintext block.
/// `buffer.len()` must be a multiple of 16; a trailing partial block is left
/// untouched.
pub fn ige_encrypt(buffer: &mut [u8], key: &[u8; 32], iv: &[u8; 32]) {
    debug_assert_eq!(buffer.len() % 16, 0);
    let cipher = Aes256::new(GenericArray::from_slice(key));

    let mut prev_cipher = [0u8; 16];
    let mut prev_plain = [0u8; 16];
    prev_cipher.copy_from_slice(&iv[..16]);
    prev_plain.copy_from_slice(&iv[16..]);

    for chunk in buffer.chunks_exact_mut(16) {
        let mut plain = [0u8; 16];
        plain.copy_from_slice(chunk);

        let mut block = [0u8; 16];
        for i in 0..16 {
            block[i] = plain[i] ^ prev_cipher[i];
        }
        cipher.encrypt_block(GenericArray::from_mut_slice(&mut block));
        for i in 0..16 {
            block[i] ^= prev_plain[i];
        }

        chunk.copy_from_slice(&block);
        prev_cipher = block;
        prev_plain = plain;
    }
}

/// Decrypt `buffer` in place with AES-256-IGE. Inverse of [`ige_encrypt`].
pub fn ige_decrypt(buffer: &mut [u8], key: &[u8; 32], iv: &[u8; 32]) {
    debug_assert_eq!(buffer.len() % 16, 0);
    let cipher = Aes256::new(GenericArray::from_slice(key));

    let mut prev_cipher = [0u8; 16];
    let mut prev_plain = [0u8; 16];
    prev_cipher.copy_from_slice(&iv[..16]);
    prev_plain.copy_from_slice(&iv[16..]);

    for chunk in buffer.chunks_exact_mut(16) {
        let mut ciphertext = [0u8; 16];
        ciphertext.copy_from_slice(chunk);

        let mut block = [0u8; 16];
        for i in 0..16 {
            block[i] = ciphertext[i] ^ prev_plain[i];
        }
        cipher.decrypt_block(GenericArray::from_mut_slice(&mut block));
        for i in 0..16 {
            block[i] ^= prev_cipher[i];
        }

        chunk.copy_from_slice(&block);
        prev_cipher = ciphertext;
        prev_plain = block;
    }
}

/// AES-256-CTR keystream with a 128-bit big-endian counter.
///
/// The obfuscated transport keeps one per direction. Counter state
/// carries over between calls, so frames must be fed in order.
pub struct AesCtr(ctr::Ctr128BE<Aes256>);

impl AesCtr {
    pub fn new(key: &[u8; 32], iv: &[u8; 16]) -> Self {
        Self(ctr::Ctr128BE::<Aes256>::new(
            GenericArray::from_slice(key),
            GenericArray::from_slice(iv),
        ))
    }

    /// XOR the next `data.len()` keystream bytes into `data`.
    pub fn apply(&mut self, data: &mut [u8]) {
        self.0.apply_keystream(data);
    }
}

impl std::fmt::Debug for AesCtr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AesCtr(..)")
    }
}
