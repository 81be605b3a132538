//! Classification of decrypted server messages.
//!
//! One decrypted frame can carry many logical messages: containers are
//! unwrapped in order, `gzip_packed` is inflated, and every resulting message
//! is turned into an [`Incoming`] item. A malformed message becomes an error
//! entry of its own; its siblings are still delivered.

use std::fmt;
use std::io::Read;

use mtp_tl::deserialize::{self, Cursor};
use mtp_tl::{Deserializable, Identifiable, types};

/// Errors for a single undecodable message.
#[derive(Debug)]
pub enum EnvelopeError {
    Decode(deserialize::Error),
    Inflate(std::io::Error),
    /// The answer to `req_msg_id` arrived but its payload is unreadable.
    /// The request still needs an outcome.
    RpcResult { req_msg_id: i64, source: Box<EnvelopeError> },
}

impl fmt::Display for EnvelopeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Decode(e) => write!(f, "decode: {e}"),
            Self::Inflate(e) => write!(f, "gzip: {e}"),
            Self::RpcResult { req_msg_id, source } => write!(f, "result for {req_msg_id}: {source}"),
        }
    }
}

impl std::error::Error for EnvelopeError {}

impl From<deserialize::Error> for EnvelopeError {
    fn from(e: deserialize::Error) -> Self { Self::Decode(e) }
}

/// What one logical server message means to the sender.
#[derive(Clone, Debug, PartialEq)]
pub enum Incoming {
    /// Answer to one of our requests. `Ok` holds the raw (inflated) result.
    RpcResult { req_msg_id: i64, outcome: Result<Vec<u8>, types::RpcError> },
    Pong { msg_id: i64, ping_id: i64 },
    BadServerSalt { bad_msg_id: i64, new_salt: i64 },
    BadMsgNotification { bad_msg_id: i64, error_code: i32 },
    NewSession { first_msg_id: i64, server_salt: i64 },
    Ack { msg_ids: Vec<i64> },
    /// `msg_detailed_info` / `msg_new_detailed_info`: the answer exists and
    /// only needs an ack.
    DetailedInfo { answer_msg_id: i64 },
    ResendRequest { msg_ids: Vec<i64> },
    FutureSalts(types::FutureSalts),
    /// Updates and anything else not handled by the core.
    Other { constructor: u32, body: Vec<u8> },
}

/// A classified message with the envelope fields it arrived with.
#[derive(Debug)]
pub struct Envelope {
    pub msg_id: i64,
    pub seq_no: i32,
    pub item: Result<Incoming, EnvelopeError>,
}

impl Envelope {
    /// Odd sequence numbers mark messages the server expects us to ack.
    pub fn is_content_related(&self) -> bool {
        self.seq_no & 1 == 1
    }
}

/// Classify the body of one decrypted message.
pub fn decode(msg_id: i64, seq_no: i32, body: &[u8]) -> Vec<Envelope> {
    let mut out = Vec::new();
    decode_into(msg_id, seq_no, body, &mut out);
    out
}

fn decode_into(msg_id: i64, seq_no: i32, body: &[u8], out: &mut Vec<Envelope>) {
    let mut cursor = Cursor::from_slice(body);
    let id = match cursor.peek_u32() {
        Ok(id) => id,
        Err(e) => {
            out.push(Envelope { msg_id, seq_no, item: Err(e.into()) });
            return;
        }
    };

    match id {
        types::MsgContainer::CONSTRUCTOR_ID => decode_container(&body[4..], out),
        types::GzipPacked::CONSTRUCTOR_ID => match inflate_packed(&body[4..]) {
            Ok(inner) => decode_into(msg_id, seq_no, &inner, out),
            Err(e) => out.push(Envelope { msg_id, seq_no, item: Err(e) }),
        },
        _ => out.push(Envelope { msg_id, seq_no, item: classify(id, body) }),
    }
}

fn decode_container(body: &[u8], out: &mut Vec<Envelope>) {
    let mut cursor = Cursor::from_slice(body);
    let count = match u32::deserialize(&mut cursor) {
        Ok(n) => n,
        Err(e) => {
            log::warn!("malformed msg_container: {e}");
            return;
        }
    };
    for _ in 0..count {
        match types::Message::deserialize(&mut cursor) {
            Ok(m) => decode_into(m.msg_id, m.seq_no, &m.body, out),
            Err(e) => {
                // Without a trustworthy length nothing after this point can
                // be located.
                log::warn!("truncated msg_container entry: {e}");
                return;
            }
        }
    }
}

fn classify(id: u32, body: &[u8]) -> Result<Incoming, EnvelopeError> {
    let mut cursor = Cursor::from_slice(&body[4..]);
    let buf = &mut cursor;
    Ok(match id {
        types::RpcResult::CONSTRUCTOR_ID => {
            let req_msg_id = i64::deserialize(buf)?;
            let mut result = Vec::new();
            buf.read_to_end(&mut result);
            match rpc_outcome(result) {
                Ok(outcome) => Incoming::RpcResult { req_msg_id, outcome },
                Err(e) => return Err(EnvelopeError::RpcResult { req_msg_id, source: Box::new(e) }),
            }
        }
        types::Pong::CONSTRUCTOR_ID => {
            let pong = types::Pong::deserialize(buf)?;
            Incoming::Pong { msg_id: pong.msg_id, ping_id: pong.ping_id }
        }
        types::BadServerSalt::CONSTRUCTOR_ID => {
            let bad = types::BadServerSalt::deserialize(buf)?;
            Incoming::BadServerSalt { bad_msg_id: bad.bad_msg_id, new_salt: bad.new_server_salt }
        }
        types::BadMsgNotification::CONSTRUCTOR_ID => {
            let bad = types::BadMsgNotification::deserialize(buf)?;
            Incoming::BadMsgNotification { bad_msg_id: bad.bad_msg_id, error_code: bad.error_code }
        }
        types::NewSessionCreated::CONSTRUCTOR_ID => {
            let new = types::NewSessionCreated::deserialize(buf)?;
            Incoming::NewSession { first_msg_id: new.first_msg_id, server_salt: new.server_salt }
        }
        types::MsgsAck::CONSTRUCTOR_ID => {
            Incoming::Ack { msg_ids: types::MsgsAck::deserialize(buf)?.msg_ids }
        }
        types::MsgDetailedInfo::CONSTRUCTOR_ID => {
            let info = types::MsgDetailedInfo::deserialize(buf)?;
            Incoming::DetailedInfo { answer_msg_id: info.answer_msg_id }
        }
        types::MsgNewDetailedInfo::CONSTRUCTOR_ID => {
            let info = types::MsgNewDetailedInfo::deserialize(buf)?;
            Incoming::DetailedInfo { answer_msg_id: info.answer_msg_id }
        }
        types::MsgResendReq::CONSTRUCTOR_ID => {
            Incoming::ResendRequest { msg_ids: types::MsgResendReq::deserialize(buf)?.msg_ids }
        }
        types::FutureSalts::CONSTRUCTOR_ID => {
            Incoming::FutureSalts(types::FutureSalts::deserialize(buf)?)
        }
        _ => Incoming::Other { constructor: id, body: body.to_vec() },
    })
}

/// Inflate `gzip_packed` when needed and split `rpc_error` from a success.
fn rpc_outcome(result: Vec<u8>) -> Result<Result<Vec<u8>, types::RpcError>, EnvelopeError> {
    let mut cursor = Cursor::from_slice(&result);
    let result = match cursor.peek_u32()? {
        types::GzipPacked::CONSTRUCTOR_ID => inflate_packed(&result[4..])?,
        _ => result,
    };

    let mut cursor = Cursor::from_slice(&result);
    if cursor.peek_u32()? == types::RpcError::CONSTRUCTOR_ID {
        deserialize::expect_constructor(&mut cursor, types::RpcError::CONSTRUCTOR_ID)?;
        return Ok(Err(types::RpcError::deserialize(&mut cursor)?));
    }
    Ok(Ok(result))
}

/// Decode the `packed_data:bytes` field of `gzip_packed` and inflate it.
fn inflate_packed(fields: &[u8]) -> Result<Vec<u8>, EnvelopeError> {
    let packed = Vec::<u8>::from_bytes(fields)?;
    gz_inflate(&packed).map_err(EnvelopeError::Inflate)
}

/// Gzip, falling back to a bare zlib stream.
pub fn gz_inflate(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut out = Vec::new();
    if flate2::read::GzDecoder::new(data).read_to_end(&mut out).is_ok() && !out.is_empty() {
        return Ok(out);
    }
    out.clear();
    flate2::read::ZlibDecoder::new(data).read_to_end(&mut out)?;
    Ok(out)
}
