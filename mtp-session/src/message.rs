//! Message identifiers and plaintext (pre-auth) framing.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::SessionError;

/// A 64-bit MTProto message identifier.
///
/// The upper 32 bits are Unix seconds (server-adjusted), the lower 32 bits a
/// sub-second fraction. The two low bits are zero for client messages.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct MessageId(pub i64);

/// Issues strictly increasing client message ids.
#[derive(Clone, Debug, Default)]
pub struct MsgIdGenerator {
    last: i64,
}

impl MsgIdGenerator {
    pub fn new() -> Self { Self::default() }

    /// Next id from the system clock shifted by `time_offset` seconds.
    pub fn next(&mut self, time_offset: i32) -> MessageId {
        self.next_at(now(), time_offset)
    }

    /// Next id for an explicit wall-clock reading.
    ///
    /// If the clock would yield a value not above the previous id (clock
    /// stood still or went backwards) the previous id plus 4 is returned.
    pub fn next_at(&mut self, since_epoch: Duration, time_offset: i32) -> MessageId {
        let secs = (since_epoch.as_secs() as i64 + i64::from(time_offset)) as u64;
        let nanos = u64::from(since_epoch.subsec_nanos());
        let mut id = ((secs << 32) | (nanos << 2)) as i64 & !3;
        if id <= self.last {
            id = self.last + 4;
        }
        self.last = id;
        MessageId(id)
    }

    /// The most recently issued id, or 0.
    pub fn last(&self) -> i64 { self.last }
}

fn now() -> Duration {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default()
}

/// Server-minus-local clock skew in seconds implied by a server `msg_id`.
pub fn time_offset_from(server_msg_id: i64) -> i32 {
    time_offset_at(server_msg_id, now())
}

pub(crate) fn time_offset_at(server_msg_id: i64, since_epoch: Duration) -> i32 {
    let server_secs = server_msg_id >> 32;
    (server_secs - since_epoch.as_secs() as i64) as i32
}

/// A plaintext message, only valid before an auth key exists.
#[derive(Debug)]
pub struct Message {
    /// Unique identifier for this message.
    pub id: MessageId,
    /// The serialized body (constructor ID + fields).
    pub body: Vec<u8>,
}

impl Message {
    pub fn plaintext(id: MessageId, body: Vec<u8>) -> Self {
        Self { id, body }
    }

    /// Serialize the message into the plaintext wire format:
    ///
    /// ```text
    /// auth_key_id:long  (0 for plaintext)
    /// message_id:long
    /// message_data_length:int
    /// message_data:bytes
    /// ```
    pub fn to_plaintext_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(8 + 8 + 4 + self.body.len());
        buf.extend(0i64.to_le_bytes());
        buf.extend(self.id.0.to_le_bytes());
        buf.extend((self.body.len() as u32).to_le_bytes());
        buf.extend(&self.body);
        buf
    }

    /// Parse a plaintext frame received during key exchange.
    pub fn from_plaintext_bytes(frame: &[u8]) -> Result<Self, SessionError> {
        if frame.len() < 20 {
            return Err(SessionError::FrameTooShort { len: frame.len() });
        }
        let auth_key_id = read_i64(&frame[..8]);
        if auth_key_id != 0 {
            return Err(SessionError::UnexpectedKeyId { key_id: auth_key_id });
        }
        let id = read_i64(&frame[8..16]);
        let len = u32::from_le_bytes([frame[16], frame[17], frame[18], frame[19]]) as usize;
        if frame.len() - 20 < len {
            return Err(SessionError::FrameTooShort { len: frame.len() });
        }
        Ok(Self { id: MessageId(id), body: frame[20..20 + len].to_vec() })
    }
}

pub(crate) fn read_i64(b: &[u8]) -> i64 {
    let mut a = [0u8; 8];
    a.copy_from_slice(&b[..8]);
    i64::from_le_bytes(a)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_have_clear_low_bits() {
        let mut ids = MsgIdGenerator::new();
        let id = ids.next_at(Duration::new(1_700_000_000, 123_456_789), 0);
        assert_eq!(id.0 & 3, 0);
        assert_eq!(id.0 >> 32, 1_700_000_000);
    }

    #[test]
    fn frozen_clock_still_increases() {
        let mut ids = MsgIdGenerator::new();
        let t = Duration::new(1_700_000_000, 0);
        let a = ids.next_at(t, 0);
        let b = ids.next_at(t, 0);
        let c = ids.next_at(t, 0);
        assert!(a < b && b < c);
        assert_eq!(b.0 - a.0, 4);
    }

    #[test]
    fn clock_going_back_does_not_reuse() {
        let mut ids = MsgIdGenerator::new();
        let a = ids.next_at(Duration::new(1_700_000_100, 0), 0);
        let b = ids.next_at(Duration::new(1_700_000_000, 0), 0);
        assert!(b > a);
    }

    #[test]
    fn offset_shifts_seconds() {
        let mut ids = MsgIdGenerator::new();
        let id = ids.next_at(Duration::new(1_000, 0), -10);
        assert_eq!(id.0 >> 32, 990);
    }

    #[test]
    fn offset_from_server_id() {
        let server_id = (1_000_050i64 << 32) | 1;
        assert_eq!(time_offset_at(server_id, Duration::new(1_000_000, 0)), 50);
    }

    #[test]
    fn plaintext_roundtrip() {
        let msg = Message::plaintext(MessageId(0x1234_5678_0000_0004), vec![1, 2, 3, 4]);
        let wire = msg.to_plaintext_bytes();
        assert_eq!(&wire[..8], &[0u8; 8]);
        let back = Message::from_plaintext_bytes(&wire).unwrap();
        assert_eq!(back.id, msg.id);
        assert_eq!(back.body, msg.body);
    }

    #[test]
    fn plaintext_rejects_encrypted_frame() {
        let mut wire = Message::plaintext(MessageId(4), vec![0; 4]).to_plaintext_bytes();
        wire[0] = 1;
        assert!(matches!(
            Message::from_plaintext_bytes(&wire),
            Err(SessionError::UnexpectedKeyId { key_id: 1 })
        ));
    }
}
