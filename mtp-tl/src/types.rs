//! Concrete constructors.
//!
//! Key-exchange and service messages live at the top level; the handful of
//! API constructors the core needs live in [`auth`] or next to [`Config`].

use crate::deserialize::{self, Buffer};
use crate::{Blob, Deserializable, Identifiable, RawVec, Serializable};

// ─── Key exchange ─────────────────────────────────────────────────────────────

tl_type! {
    /// `resPQ#05162463`
    pub struct ResPq = 0x05162463 {
        pub nonce: [u8; 16],
        pub server_nonce: [u8; 16],
        pub pq: Vec<u8>,
        pub server_public_key_fingerprints: Vec<i64>,
    }
}

tl_type! {
    /// `p_q_inner_data#83c95aec`
    pub struct PQInnerData = 0x83c95aec {
        pub pq: Vec<u8>,
        pub p: Vec<u8>,
        pub q: Vec<u8>,
        pub nonce: [u8; 16],
        pub server_nonce: [u8; 16],
        pub new_nonce: [u8; 32],
    }
}

tl_type! {
    /// `p_q_inner_data_dc#a9f55f95`, which binds the generated key to a DC.
    pub struct PQInnerDataDc = 0xa9f55f95 {
        pub pq: Vec<u8>,
        pub p: Vec<u8>,
        pub q: Vec<u8>,
        pub nonce: [u8; 16],
        pub server_nonce: [u8; 16],
        pub new_nonce: [u8; 32],
        pub dc: i32,
    }
}

tl_type! {
    pub struct ServerDhParamsFail = 0x79cb045d {
        pub nonce: [u8; 16],
        pub server_nonce: [u8; 16],
        pub new_nonce_hash: [u8; 16],
    }
}

tl_type! {
    pub struct ServerDhParamsOk = 0xd0e8075c {
        pub nonce: [u8; 16],
        pub server_nonce: [u8; 16],
        pub encrypted_answer: Vec<u8>,
    }
}

tl_type! {
    /// `server_DH_inner_data#b5890dba`
    pub struct ServerDhInnerData = 0xb5890dba {
        pub nonce: [u8; 16],
        pub server_nonce: [u8; 16],
        pub g: i32,
        pub dh_prime: Vec<u8>,
        pub g_a: Vec<u8>,
        pub server_time: i32,
    }
}

tl_type! {
    /// `client_DH_inner_data#6643b654`
    pub struct ClientDhInnerData = 0x6643b654 {
        pub nonce: [u8; 16],
        pub server_nonce: [u8; 16],
        pub retry_id: i64,
        pub g_b: Vec<u8>,
    }
}

tl_type! {
    pub struct DhGenOk = 0x3bcbf734 {
        pub nonce: [u8; 16],
        pub server_nonce: [u8; 16],
        pub new_nonce_hash1: [u8; 16],
    }
}

tl_type! {
    pub struct DhGenRetry = 0x46dc1fb9 {
        pub nonce: [u8; 16],
        pub server_nonce: [u8; 16],
        pub new_nonce_hash2: [u8; 16],
    }
}

tl_type! {
    pub struct DhGenFail = 0xa69dae02 {
        pub nonce: [u8; 16],
        pub server_nonce: [u8; 16],
        pub new_nonce_hash3: [u8; 16],
    }
}

// ─── Service messages ─────────────────────────────────────────────────────────

tl_type! {
    /// `rpc_result#f35c6d01 req_msg_id:long result:Object`
    ///
    /// `result` is kept raw; the caller knows which type it asked for.
    pub struct RpcResult = 0xf35c6d01 {
        pub req_msg_id: i64,
        pub result: Blob,
    }
}

tl_type! {
    /// `rpc_error#2144ca19`
    pub struct RpcError = 0x2144ca19 {
        pub error_code: i32,
        pub error_message: String,
    }
}

tl_type! {
    pub struct MsgsAck = 0x62d6b459 {
        pub msg_ids: Vec<i64>,
    }
}

tl_type! {
    pub struct BadMsgNotification = 0xa7eff811 {
        pub bad_msg_id: i64,
        pub bad_msg_seqno: i32,
        pub error_code: i32,
    }
}

tl_type! {
    pub struct BadServerSalt = 0xedab447b {
        pub bad_msg_id: i64,
        pub bad_msg_seqno: i32,
        pub error_code: i32,
        pub new_server_salt: i64,
    }
}

tl_type! {
    pub struct NewSessionCreated = 0x9ec20908 {
        pub first_msg_id: i64,
        pub unique_id: i64,
        pub server_salt: i64,
    }
}

tl_type! {
    /// `msg_container#73f1f8dc messages:vector<%Message>`
    pub struct MsgContainer = 0x73f1f8dc {
        pub messages: RawVec<Message>,
    }
}

/// One entry of a [`MsgContainer`]: `msg_id:long seqno:int bytes:int body:Object`.
///
/// Always bare. `bytes` is not stored; it is the length of `body`.
#[derive(Clone, Debug, PartialEq)]
pub struct Message {
    pub msg_id: i64,
    pub seq_no: i32,
    pub body: Vec<u8>,
}

impl Serializable for Message {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        self.msg_id.serialize(buf);
        self.seq_no.serialize(buf);
        (self.body.len() as i32).serialize(buf);
        buf.extend(self.body.iter().copied());
    }
    fn serialized_len(&self) -> usize { 16 + self.body.len() }
}

impl Deserializable for Message {
    fn deserialize(buf: Buffer) -> deserialize::Result<Self> {
        let msg_id = i64::deserialize(buf)?;
        let seq_no = i32::deserialize(buf)?;
        // A negative length wraps to a huge count and fails the bounds check.
        let len = i32::deserialize(buf)? as u32 as usize;
        let body = buf.read_slice(len)?.to_vec();
        Ok(Self { msg_id, seq_no, body })
    }
}

tl_type! {
    /// `gzip_packed#3072cfa1 packed_data:bytes`
    pub struct GzipPacked = 0x3072cfa1 {
        pub packed_data: Vec<u8>,
    }
}

tl_type! {
    pub struct Pong = 0x347773c5 {
        pub msg_id: i64,
        pub ping_id: i64,
    }
}

tl_type! {
    pub struct MsgDetailedInfo = 0x276d3ec6 {
        pub msg_id: i64,
        pub answer_msg_id: i64,
        pub bytes: i32,
        pub status: i32,
    }
}

tl_type! {
    pub struct MsgNewDetailedInfo = 0x809db6df {
        pub answer_msg_id: i64,
        pub bytes: i32,
        pub status: i32,
    }
}

tl_type! {
    pub struct MsgResendReq = 0x7d861a08 {
        pub msg_ids: Vec<i64>,
    }
}

tl_type! {
    /// Only ever appears inside the bare vector of [`FutureSalts`].
    bare struct FutureSalt = 0x0949d9dc {
        pub valid_since: i32,
        pub valid_until: i32,
        pub salt: i64,
    }
}

tl_type! {
    pub struct FutureSalts = 0xae500895 {
        pub req_msg_id: i64,
        pub now: i32,
        pub salts: RawVec<FutureSalt>,
    }
}

tl_type! {
    pub struct DestroySessionOk = 0xe22045fc {
        pub session_id: i64,
    }
}

tl_type! {
    pub struct DestroySessionNone = 0x62d350c9 {
        pub session_id: i64,
    }
}

// ─── API constructors ─────────────────────────────────────────────────────────

/// `dcOption#18b7a10d`: one address a DC can be reached at.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DcOption {
    pub ipv6: bool,
    pub media_only: bool,
    pub tcpo_only: bool,
    pub cdn: bool,
    pub r#static: bool,
    pub this_port_only: bool,
    pub id: i32,
    pub ip_address: String,
    pub port: i32,
    /// MTProxy secret, present when flag bit 10 is set.
    pub secret: Option<Vec<u8>>,
}

impl Identifiable for DcOption {
    const CONSTRUCTOR_ID: u32 = 0x18b7a10d;
}

impl DcOption {
    fn flags(&self) -> u32 {
        (self.ipv6 as u32)
            | (self.media_only as u32) << 1
            | (self.tcpo_only as u32) << 2
            | (self.cdn as u32) << 3
            | (self.r#static as u32) << 4
            | (self.this_port_only as u32) << 5
            | (self.secret.is_some() as u32) << 10
    }
}

impl Serializable for DcOption {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        Self::CONSTRUCTOR_ID.serialize(buf);
        self.flags().serialize(buf);
        self.id.serialize(buf);
        self.ip_address.serialize(buf);
        self.port.serialize(buf);
        self.secret.serialize(buf);
    }
}

impl Deserializable for DcOption {
    fn deserialize(buf: Buffer) -> deserialize::Result<Self> {
        let flags = u32::deserialize(buf)?;
        let id = i32::deserialize(buf)?;
        let ip_address = String::deserialize(buf)?;
        let port = i32::deserialize(buf)?;
        let secret = if flags & (1 << 10) != 0 {
            Some(Vec::<u8>::deserialize(buf)?)
        } else {
            None
        };
        Ok(Self {
            ipv6: flags & 1 != 0,
            media_only: flags & (1 << 1) != 0,
            tcpo_only: flags & (1 << 2) != 0,
            cdn: flags & (1 << 3) != 0,
            r#static: flags & (1 << 4) != 0,
            this_port_only: flags & (1 << 5) != 0,
            id,
            ip_address,
            port,
            secret,
        })
    }
}

/// `config#cc1a241e`, decoded up to and including `dc_options`.
///
/// Everything after the DC list changes between layers and is kept as raw
/// bytes in `rest`, so re-serializing reproduces the server's bytes.
#[derive(Clone, Debug, PartialEq)]
pub struct Config {
    pub flags: i32,
    pub date: i32,
    pub expires: i32,
    pub test_mode: bool,
    pub this_dc: i32,
    pub dc_options: Vec<crate::enums::DcOption>,
    pub rest: Blob,
}

impl Identifiable for Config {
    const CONSTRUCTOR_ID: u32 = 0xcc1a241e;
}

impl Serializable for Config {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        Self::CONSTRUCTOR_ID.serialize(buf);
        self.flags.serialize(buf);
        self.date.serialize(buf);
        self.expires.serialize(buf);
        self.test_mode.serialize(buf);
        self.this_dc.serialize(buf);
        self.dc_options.serialize(buf);
        self.rest.serialize(buf);
    }
}

impl Deserializable for Config {
    fn deserialize(buf: Buffer) -> deserialize::Result<Self> {
        Ok(Self {
            flags: i32::deserialize(buf)?,
            date: i32::deserialize(buf)?,
            expires: i32::deserialize(buf)?,
            test_mode: bool::deserialize(buf)?,
            this_dc: i32::deserialize(buf)?,
            dc_options: Vec::deserialize(buf)?,
            rest: Blob::deserialize(buf)?,
        })
    }
}

pub mod auth {
    tl_type! {
        /// `auth.exportedAuthorization#b434e2b8`
        pub struct ExportedAuthorization = 0xb434e2b8 {
            pub id: i64,
            pub bytes: Vec<u8>,
        }
    }
}
