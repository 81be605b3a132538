//! Decryption of incoming MTProto 2.0 frames.
//!
//! Stateless on purpose: the read half of a connection decrypts with a key
//! snapshot and the session id alone, without touching the session counters
//! owned by the sender.

use mtp_crypto::{AuthKey, Side, decrypt_data_v2};

use crate::message::read_i64;

/// Errors that can occur when decrypting a server message.
#[derive(Clone, Debug, PartialEq)]
pub enum DecryptError {
    /// The underlying crypto layer rejected the message (including the MAC check).
    Crypto(mtp_crypto::DecryptError),
    /// The decrypted inner message was too short to contain a valid header.
    FrameTooShort,
    /// The declared body length runs past the plaintext or is not word aligned.
    BadLength { declared: usize, available: usize },
    /// Session-ID mismatch (possible replay or wrong connection).
    SessionMismatch { expected: i64, got: i64 },
}

impl std::fmt::Display for DecryptError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Crypto(e) => write!(f, "crypto: {e}"),
            Self::FrameTooShort => write!(f, "inner plaintext too short"),
            Self::BadLength { declared, available } => {
                write!(f, "declared body length {declared} with {available} bytes available")
            }
            Self::SessionMismatch { expected, got } => {
                write!(f, "session_id mismatch: expected {expected}, got {got}")
            }
        }
    }
}
impl std::error::Error for DecryptError {}

impl From<mtp_crypto::DecryptError> for DecryptError {
    fn from(e: mtp_crypto::DecryptError) -> Self { Self::Crypto(e) }
}

impl DecryptError {
    /// MAC or key-id failures: the connection cannot be trusted any more.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Crypto(_))
    }
}

/// The inner payload extracted from a successfully decrypted server frame.
#[derive(Clone, Debug, PartialEq)]
pub struct DecryptedMessage {
    /// `salt` sent by the server.
    pub salt:       i64,
    /// The `session_id` from the frame.
    pub session_id: i64,
    /// The `msg_id` of the inner message.
    pub msg_id:     i64,
    /// `seq_no` of the inner message.
    pub seq_no:     i32,
    /// Serialized body of the inner message.
    pub body:       Vec<u8>,
}

/// Decrypt a server frame with an explicit key and expected session id.
pub fn decrypt_frame(
    auth_key:   &AuthKey,
    session_id: i64,
    frame:      &mut [u8],
) -> Result<DecryptedMessage, DecryptError> {
    let plaintext = decrypt_data_v2(frame, auth_key, Side::Server)?;

    // salt(8) + session_id(8) + msg_id(8) + seq_no(4) + len(4) + body
    if plaintext.len() < 32 {
        return Err(DecryptError::FrameTooShort);
    }
    let salt     = read_i64(&plaintext[..8]);
    let sid      = read_i64(&plaintext[8..16]);
    let msg_id   = read_i64(&plaintext[16..24]);
    let seq_no   = i32::from_le_bytes([plaintext[24], plaintext[25], plaintext[26], plaintext[27]]);
    let body_len = u32::from_le_bytes([plaintext[28], plaintext[29], plaintext[30], plaintext[31]]) as usize;

    if sid != session_id {
        return Err(DecryptError::SessionMismatch { expected: session_id, got: sid });
    }
    let available = plaintext.len() - 32;
    if body_len > available || body_len % 4 != 0 {
        return Err(DecryptError::BadLength { declared: body_len, available });
    }

    let body = plaintext[32..32 + body_len].to_vec();
    Ok(DecryptedMessage { salt, session_id: sid, msg_id, seq_no, body })
}
