//! Cryptographic primitives for MTProto.
//!
//! Provides:
//! - AES-256-IGE and AES-256-CTR
//! - SHA-1 / SHA-256 hash macros
//! - Pollard-rho PQ factorization
//! - RSA padding (MTProto RSA-PAD scheme)
//! - `AuthKey`: 256-byte session key
//! - MTProto 2.0 message key derivation, encryption and decryption
//! - DH nonce→key derivation

#![deny(unsafe_code)]

pub mod aes;
mod auth_key;
mod deque_buffer;
mod factorize;
pub mod rsa;
#[doc(hidden)]
pub mod sha;

pub use auth_key::AuthKey;
pub use deque_buffer::DequeBuffer;
pub use factorize::factorize;

// ─── MTProto 2.0 encrypt / decrypt ───────────────────────────────────────────

/// Errors from [`decrypt_data_v2`].
#[derive(Clone, Debug, PartialEq)]
pub enum DecryptError {
    /// Ciphertext too short or not block-aligned.
    InvalidBuffer,
    /// The `auth_key_id` in the ciphertext does not match our key.
    AuthKeyMismatch,
    /// The `msg_key` in the ciphertext does not match our computed value.
    MessageKeyMismatch,
}

impl std::fmt::Display for DecryptError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidBuffer => write!(f, "invalid ciphertext buffer length"),
            Self::AuthKeyMismatch => write!(f, "auth_key_id mismatch"),
            Self::MessageKeyMismatch => write!(f, "msg_key mismatch"),
        }
    }
}
impl std::error::Error for DecryptError {}

/// Which end of the connection produced a message.
///
/// Selects the auth key offset `x` used in every MTProto 2.0 derivation:
/// 0 for messages from the client, 8 for messages from the server.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Side {
    Client,
    Server,
}

impl Side {
    fn x(self) -> usize {
        match self {
            Side::Client => 0,
            Side::Server => 8,
        }
    }
}

/// `msg_key = SHA256(auth_key[88+x .. 120+x] ‖ plaintext)[8..24]`.
///
/// `plaintext` includes the random padding.
pub fn compute_message_key(auth_key: &AuthKey, plaintext: &[u8], side: Side) -> [u8; 16] {
    let x = side.x();
    let large = sha256!(&auth_key.data[88 + x..88 + x + 32], plaintext);
    let mut msg_key = [0u8; 16];
    msg_key.copy_from_slice(&large[8..24]);
    msg_key
}

/// Derive the AES-256-IGE `(key, iv)` pair for one message from its `msg_key`.
pub fn derive_aes_key_iv(auth_key: &AuthKey, msg_key: &[u8; 16], side: Side) -> ([u8; 32], [u8; 32]) {
    let x = side.x();
    let sha_a = sha256!(msg_key, &auth_key.data[x..x + 36]);
    let sha_b = sha256!(&auth_key.data[40 + x..40 + x + 36], msg_key);

    let mut aes_key = [0u8; 32];
    aes_key[..8].copy_from_slice(&sha_a[..8]);
    aes_key[8..24].copy_from_slice(&sha_b[8..24]);
    aes_key[24..].copy_from_slice(&sha_a[24..]);

    let mut aes_iv = [0u8; 32];
    aes_iv[..8].copy_from_slice(&sha_b[..8]);
    aes_iv[8..24].copy_from_slice(&sha_a[8..24]);
    aes_iv[24..].copy_from_slice(&sha_b[24..]);

    (aes_key, aes_iv)
}

/// Padding for a plaintext of `len` bytes: 17..=32 bytes, ending on a block.
fn padding_len(len: usize) -> usize {
    16 + (16 - (len % 16))
}

/// Encrypt `buffer` (in-place, with prepended header) as the client.
///
/// After this call `buffer` contains `key_id || msg_key || ciphertext`.
pub fn encrypt_data_v2(buffer: &mut DequeBuffer, auth_key: &AuthKey) -> Result<(), getrandom::Error> {
    let mut rnd = [0u8; 32];
    getrandom::getrandom(&mut rnd)?;
    encrypt_with_padding(buffer, auth_key, Side::Client, &rnd);
    Ok(())
}

/// Deterministic core of [`encrypt_data_v2`]: the padding comes from `rnd`.
///
/// `side` is normally [`Side::Client`]; tests that play the server pass
/// [`Side::Server`].
pub fn encrypt_with_padding(buffer: &mut DequeBuffer, auth_key: &AuthKey, side: Side, rnd: &[u8; 32]) {
    let pad = padding_len(buffer.len());
    buffer.extend(rnd.iter().take(pad).copied());

    let msg_key = compute_message_key(auth_key, buffer.as_ref(), side);
    let (key, iv) = derive_aes_key_iv(auth_key, &msg_key, side);
    aes::ige_encrypt(buffer.as_mut(), &key, &iv);

    buffer.extend_front(&msg_key);
    buffer.extend_front(&auth_key.key_id);
}

/// Decrypt an MTProto 2.0 ciphertext produced by `side`.
///
/// `buffer` must start with `key_id || msg_key || ciphertext`.
/// On success returns a slice of `buffer` containing the plaintext
/// (header, body and padding).
pub fn decrypt_data_v2<'a>(
    buffer: &'a mut [u8],
    auth_key: &AuthKey,
    side: Side,
) -> Result<&'a mut [u8], DecryptError> {
    if buffer.len() < 24 || (buffer.len() - 24) % 16 != 0 {
        return Err(DecryptError::InvalidBuffer);
    }
    if auth_key.key_id != buffer[..8] {
        return Err(DecryptError::AuthKeyMismatch);
    }
    let mut msg_key = [0u8; 16];
    msg_key.copy_from_slice(&buffer[8..24]);

    let (key, iv) = derive_aes_key_iv(auth_key, &msg_key, side);
    aes::ige_decrypt(&mut buffer[24..], &key, &iv);

    if compute_message_key(auth_key, &buffer[24..], side) != msg_key {
        return Err(DecryptError::MessageKeyMismatch);
    }
    Ok(&mut buffer[24..])
}

/// Derive `(key, iv)` from nonces for decrypting `ServerDhParams.encrypted_answer`.
pub fn generate_key_data_from_nonce(server_nonce: &[u8; 16], new_nonce: &[u8; 32]) -> ([u8; 32], [u8; 32]) {
    let h1 = sha1!(new_nonce, server_nonce);
    let h2 = sha1!(server_nonce, new_nonce);
    let h3 = sha1!(new_nonce, new_nonce);

    let mut key = [0u8; 32];
    key[..20].copy_from_slice(&h1);
    key[20..].copy_from_slice(&h2[..12]);

    let mut iv = [0u8; 32];
    iv[..8].copy_from_slice(&h2[12..]);
    iv[8..28].copy_from_slice(&h3);
    iv[28..].copy_from_slice(&new_nonce[..4]);

    (key, iv)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> AuthKey {
        AuthKey::from_bytes(core::array::from_fn(|i| i as u8))
    }

    #[test]
    fn key_id_is_sha1_tail() {
        assert_eq!(test_key().key_id(), [50, 209, 88, 110, 164, 87, 223, 200]);
    }

    #[test]
    fn message_key_depends_on_side() {
        let key = test_key();
        let plain: Vec<u8> = (0..32).collect();
        assert_eq!(
            compute_message_key(&key, &plain, Side::Client),
            [14, 221, 20, 42, 245, 88, 236, 113, 187, 79, 2, 118, 29, 33, 190, 130]
        );
        assert_eq!(
            compute_message_key(&key, &plain, Side::Server),
            [217, 103, 44, 20, 151, 40, 38, 248, 189, 53, 127, 79, 192, 75, 215, 122]
        );
    }

    fn encrypted(side: Side) -> Vec<u8> {
        let mut buffer = DequeBuffer::with_capacity(64, 24);
        buffer.extend((0..40u8).collect::<Vec<_>>());
        encrypt_with_padding(&mut buffer, &test_key(), side, &[0xaa; 32]);
        buffer.as_ref().to_vec()
    }

    #[test]
    fn encrypt_then_decrypt() {
        let mut frame = encrypted(Side::Server);
        assert_eq!(frame[..8], test_key().key_id());
        assert_eq!((frame.len() - 24) % 16, 0);

        let plain = decrypt_data_v2(&mut frame, &test_key(), Side::Server).unwrap();
        assert_eq!(&plain[..40], (0..40u8).collect::<Vec<_>>().as_slice());
    }

    #[test]
    fn wrong_direction_fails_mac() {
        let mut frame = encrypted(Side::Client);
        assert_eq!(
            decrypt_data_v2(&mut frame, &test_key(), Side::Server),
            Err(DecryptError::MessageKeyMismatch)
        );
    }

    #[test]
    fn tampered_ciphertext_fails_mac() {
        let mut frame = encrypted(Side::Server);
        let last = frame.len() - 1;
        frame[last] ^= 1;
        assert_eq!(
            decrypt_data_v2(&mut frame, &test_key(), Side::Server),
            Err(DecryptError::MessageKeyMismatch)
        );
    }

    #[test]
    fn foreign_key_id_rejected() {
        let mut frame = encrypted(Side::Server);
        let other = AuthKey::from_bytes([3; 256]);
        assert_eq!(
            decrypt_data_v2(&mut frame, &other, Side::Server),
            Err(DecryptError::AuthKeyMismatch)
        );
    }

    #[test]
    fn short_or_misaligned_rejected() {
        let mut short = [0u8; 20];
        assert_eq!(
            decrypt_data_v2(&mut short, &test_key(), Side::Server),
            Err(DecryptError::InvalidBuffer)
        );
        let mut misaligned = vec![0u8; 24 + 15];
        assert_eq!(
            decrypt_data_v2(&mut misaligned, &test_key(), Side::Server),
            Err(DecryptError::InvalidBuffer)
        );
    }
}
