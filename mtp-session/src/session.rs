//! Per-connection MTProto session state.

use std::fmt;

use mtp_crypto::{AuthKey, DequeBuffer, encrypt_data_v2};
use mtp_tl::types;

use crate::dcenter::Dcenter;
use crate::encrypted::{DecryptError, DecryptedMessage, decrypt_frame};
use crate::message::{Message, MessageId, MsgIdGenerator};

/// Errors raised while packing outgoing messages.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionError {
    /// Encryption was requested before the DC has an auth key.
    KeyMissing,
    /// The OS random source failed.
    Rng(getrandom::Error),
    /// A plaintext frame is shorter than its header says.
    FrameTooShort { len: usize },
    /// A plaintext frame carried a non-zero auth key id.
    UnexpectedKeyId { key_id: i64 },
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::KeyMissing => write!(f, "no auth key for this DC"),
            Self::Rng(e) => write!(f, "random source failed: {e}"),
            Self::FrameTooShort { len } => write!(f, "plaintext frame too short ({len} bytes)"),
            Self::UnexpectedKeyId { key_id } => {
                write!(f, "expected plaintext frame, got auth_key_id {key_id}")
            }
        }
    }
}

impl std::error::Error for SessionError {}

impl From<getrandom::Error> for SessionError {
    fn from(e: getrandom::Error) -> Self { Self::Rng(e) }
}

/// One encrypted message ready for the transport.
#[derive(Clone, Debug)]
pub struct PackedMessage {
    pub msg_id: MessageId,
    pub seq_no: i32,
    /// `auth_key_id ‖ msg_key ‖ encrypted_data`.
    pub payload: Vec<u8>,
}

/// An outgoing body waiting to be placed in a container.
#[derive(Clone, Debug)]
pub struct OutgoingBody {
    pub body: Vec<u8>,
    pub content_related: bool,
}

/// Several messages batched into one encrypted `msg_container`.
#[derive(Clone, Debug)]
pub struct PackedContainer {
    /// Id of the container itself; never answered by the server.
    pub container_id: MessageId,
    /// Ids of the inner messages, in the order they were given.
    pub inner: Vec<MessageId>,
    pub payload: Vec<u8>,
}

/// Tracks per-connection MTProto session state.
///
/// The session id is random and the sequence counter starts at zero, so a
/// fresh `Session` is what the server sees as a new session.
#[derive(Debug)]
pub struct Session {
    session_id: i64,
    msg_ids:    MsgIdGenerator,
    /// Number of content-related messages sent so far.
    sequence:   i32,
}

impl Session {
    /// Create a session with a random id.
    pub fn new() -> Result<Self, SessionError> {
        let mut rnd = [0u8; 8];
        getrandom::getrandom(&mut rnd)?;
        Ok(Self::with_id(i64::from_le_bytes(rnd)))
    }

    pub fn with_id(session_id: i64) -> Self {
        Self { session_id, msg_ids: MsgIdGenerator::new(), sequence: 0 }
    }

    pub fn id(&self) -> i64 { self.session_id }

    /// Allocate a message id for this session.
    pub fn next_msg_id(&mut self, time_offset: i32) -> MessageId {
        self.msg_ids.next(time_offset)
    }

    /// Content-related messages get `sequence * 2 + 1` and advance the
    /// counter; service messages get `sequence * 2` and leave it alone.
    pub fn next_seq_no(&mut self, content_related: bool) -> i32 {
        if content_related {
            let n = self.sequence * 2 + 1;
            self.sequence += 1;
            n
        } else {
            self.sequence * 2
        }
    }

    /// Encrypt a single message for `dc`.
    ///
    /// Fails with [`SessionError::KeyMissing`] before any counter moves when
    /// the DC has no key yet.
    pub fn pack(
        &mut self,
        dc: &Dcenter,
        body: &[u8],
        content_related: bool,
    ) -> Result<PackedMessage, SessionError> {
        let key = dc.key.get().ok_or(SessionError::KeyMissing)?;
        let msg_id = self.next_msg_id(dc.time_offset);
        let seq_no = self.next_seq_no(content_related);
        let payload = self.encrypt(&key, dc.salt, msg_id, seq_no, body)?;
        Ok(PackedMessage { msg_id, seq_no, payload })
    }

    /// Encrypt several messages as one `msg_container`.
    ///
    /// Inner messages keep their own id and seq no; the container gets an id
    /// above all of them and a service seq no.
    pub fn pack_container(
        &mut self,
        dc: &Dcenter,
        bodies: &[OutgoingBody],
    ) -> Result<PackedContainer, SessionError> {
        let key = dc.key.get().ok_or(SessionError::KeyMissing)?;

        let mut inner = Vec::with_capacity(bodies.len());
        let mut messages = Vec::with_capacity(bodies.len());
        for item in bodies {
            let msg_id = self.next_msg_id(dc.time_offset);
            let seq_no = self.next_seq_no(item.content_related);
            inner.push(msg_id);
            messages.push(types::Message { msg_id: msg_id.0, seq_no, body: item.body.clone() });
        }
        let container = types::MsgContainer { messages: mtp_tl::RawVec(messages) };

        let container_id = self.next_msg_id(dc.time_offset);
        let seq_no = self.next_seq_no(false);
        let body = mtp_tl::Serializable::to_bytes(&container);
        let payload = self.encrypt(&key, dc.salt, container_id, seq_no, &body)?;
        Ok(PackedContainer { container_id, inner, payload })
    }

    /// Frame an unencrypted message (key exchange only).
    pub fn pack_plain(&mut self, time_offset: i32, body: Vec<u8>) -> (MessageId, Vec<u8>) {
        let id = self.next_msg_id(time_offset);
        (id, Message::plaintext(id, body).to_plaintext_bytes())
    }

    /// Decrypt a frame addressed to this session.
    pub fn decrypt(&self, key: &AuthKey, frame: &mut [u8]) -> Result<DecryptedMessage, DecryptError> {
        decrypt_frame(key, self.session_id, frame)
    }

    fn encrypt(
        &self,
        key: &AuthKey,
        salt: i64,
        msg_id: MessageId,
        seq_no: i32,
        body: &[u8],
    ) -> Result<Vec<u8>, SessionError> {
        // Layout of the plaintext before encryption:
        // salt:i64 session_id:i64 msg_id:i64 seq_no:i32 body_len:i32 body
        let inner_len = 8 + 8 + 8 + 4 + 4 + body.len();
        let mut buf = DequeBuffer::with_capacity(inner_len + 32, 24);
        buf.extend(salt.to_le_bytes());
        buf.extend(self.session_id.to_le_bytes());
        buf.extend(msg_id.0.to_le_bytes());
        buf.extend(seq_no.to_le_bytes());
        buf.extend((body.len() as u32).to_le_bytes());
        buf.extend(body.iter().copied());

        encrypt_data_v2(&mut buf, key)?;
        Ok(buf.as_ref().to_vec())
    }
}
