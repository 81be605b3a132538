//! RPC functions.
//!
//! Every function serializes as its constructor id followed by its fields,
//! and names the type the server answers with through [`RemoteCall`].

use crate::{enums, Blob, Identifiable, RemoteCall, Serializable};

// ─── Key exchange ─────────────────────────────────────────────────────────────

tl_function! {
    /// `req_pq_multi#be7e8ef1 nonce:int128 = ResPQ`
    pub struct ReqPqMulti = 0xbe7e8ef1 -> enums::ResPq {
        pub nonce: [u8; 16],
    }
}

tl_function! {
    pub struct ReqDhParams = 0xd712e4be -> enums::ServerDhParams {
        pub nonce: [u8; 16],
        pub server_nonce: [u8; 16],
        pub p: Vec<u8>,
        pub q: Vec<u8>,
        pub public_key_fingerprint: i64,
        pub encrypted_data: Vec<u8>,
    }
}

tl_function! {
    pub struct SetClientDhParams = 0xf5045f1f -> enums::SetClientDhParamsAnswer {
        pub nonce: [u8; 16],
        pub server_nonce: [u8; 16],
        pub encrypted_data: Vec<u8>,
    }
}

// ─── Service functions ────────────────────────────────────────────────────────

tl_function! {
    pub struct Ping = 0x7abe77ec -> enums::Pong {
        pub ping_id: i64,
    }
}

tl_function! {
    /// Ping that also asks the server to close the connection if nothing
    /// arrives within `disconnect_delay` seconds.
    pub struct PingDelayDisconnect = 0xf3427b8c -> enums::Pong {
        pub ping_id: i64,
        pub disconnect_delay: i32,
    }
}

tl_function! {
    pub struct GetFutureSalts = 0xb921bd04 -> enums::FutureSalts {
        pub num: i32,
    }
}

tl_function! {
    pub struct DestroySession = 0xe7512126 -> enums::DestroySessionRes {
        pub session_id: i64,
    }
}

// ─── Wrappers ─────────────────────────────────────────────────────────────────

/// `invokeWithLayer#da9b0d0d {X:Type} layer:int query:!X = X`
#[derive(Clone, Debug, PartialEq)]
pub struct InvokeWithLayer<X> {
    pub layer: i32,
    pub query: X,
}

impl<X> Identifiable for InvokeWithLayer<X> {
    const CONSTRUCTOR_ID: u32 = 0xda9b0d0d;
}

impl<X: Serializable> Serializable for InvokeWithLayer<X> {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        Self::CONSTRUCTOR_ID.serialize(buf);
        self.layer.serialize(buf);
        self.query.serialize(buf);
    }
}

impl<X: RemoteCall> RemoteCall for InvokeWithLayer<X> {
    type Return = X::Return;
}

/// `initConnection#c1cd5ea9` without the optional proxy and params fields.
///
/// The flags word is always zero.
#[derive(Clone, Debug, PartialEq)]
pub struct InitConnection<X> {
    pub api_id: i32,
    pub device_model: String,
    pub system_version: String,
    pub app_version: String,
    pub system_lang_code: String,
    pub lang_pack: String,
    pub lang_code: String,
    pub query: X,
}

impl<X> Identifiable for InitConnection<X> {
    const CONSTRUCTOR_ID: u32 = 0xc1cd5ea9;
}

impl<X: Serializable> Serializable for InitConnection<X> {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        Self::CONSTRUCTOR_ID.serialize(buf);
        0u32.serialize(buf);
        self.api_id.serialize(buf);
        self.device_model.serialize(buf);
        self.system_version.serialize(buf);
        self.app_version.serialize(buf);
        self.system_lang_code.serialize(buf);
        self.lang_pack.serialize(buf);
        self.lang_code.serialize(buf);
        self.query.serialize(buf);
    }
}

impl<X: RemoteCall> RemoteCall for InitConnection<X> {
    type Return = X::Return;
}

// ─── API ──────────────────────────────────────────────────────────────────────

pub mod help {
    use crate::enums;

    tl_function! {
        /// `help.getConfig#c4f9186b = Config`
        pub struct GetConfig = 0xc4f9186b -> enums::Config {}
    }
}

pub mod auth {
    use crate::{enums, Blob};

    tl_function! {
        pub struct ExportAuthorization = 0xe5bfffcd -> enums::auth::ExportedAuthorization {
            pub dc_id: i32,
        }
    }

    tl_function! {
        /// Returns `auth.Authorization`, which the core passes through undecoded.
        pub struct ImportAuthorization = 0xa57a7dad -> Blob {
            pub id: i64,
            pub bytes: Vec<u8>,
        }
    }
}

/// Any pre-serialized request, for callers that build bodies themselves.
///
/// The response is returned undecoded.
#[derive(Clone, Debug, PartialEq)]
pub struct Raw(pub Vec<u8>);

impl Serializable for Raw {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        buf.extend(self.0.iter().copied());
    }
    fn serialized_len(&self) -> usize { self.0.len() }
}

impl RemoteCall for Raw {
    type Return = Blob;
}
