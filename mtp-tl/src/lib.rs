//! MTProto wire codec and schema types.
//!
//! Everything that travels over an MTProto connection is a sequence of 32-bit
//! little-endian words. This crate converts between that flat form and typed
//! Rust values, and declares the boxed schema types the transport core needs.
//!
//! # Overview
//!
//! | Module        | Contents                                                   |
//! |---------------|------------------------------------------------------------|
//! | [`types`]     | Concrete constructors (bare types) as `struct`s            |
//! | [`functions`] | RPC functions as `struct`s implementing [`RemoteCall`]     |
//! | [`enums`]     | Boxed types as `enum`s implementing [`Deserializable`]     |
//!
//! # Raw usage
//!
//! ```rust
//! use mtp_tl::{functions, Serializable};
//!
//! let req = functions::Ping { ping_id: 42 };
//! let bytes = req.to_bytes();
//! assert_eq!(bytes.len() % 4, 0);
//! ```
//!
//! `types::*` serialize *with* their constructor id and deserialize the bare
//! body; `enums::*` read the constructor id and dispatch to the right variant.

#![deny(unsafe_code)]
#![allow(clippy::large_enum_variant)]

#[macro_use]
mod macros;

pub mod deserialize;
pub mod enums;
pub mod functions;
pub mod serialize;
pub mod types;

pub use deserialize::{Cursor, Deserializable};
pub use serialize::Serializable;

/// API layer announced through `invokeWithLayer`.
pub const LAYER: i32 = 224;

/// Constructor id of the boxed `Vector` type.
pub const VECTOR_ID: u32 = 0x1cb5c415;

/// Bare vector: `vector` (lowercase) as opposed to the boxed `Vector`.
///
/// Used where a length-prefixed list is sent without the usual
/// `0x1cb5c415` constructor ID header (e.g. inside `msg_container`).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RawVec<T>(pub Vec<T>);

/// Opaque blob of bytes that should be passed through without interpretation.
///
/// Serializes verbatim and deserializes everything left in the buffer, so it
/// is only valid as the last field of a length-delimited body (e.g. the
/// `result:Object` of `rpc_result`).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Blob(pub Vec<u8>);

impl From<Vec<u8>> for Blob {
    fn from(v: Vec<u8>) -> Self { Self(v) }
}

impl Serializable for Blob {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        buf.extend(self.0.iter().copied());
    }
    fn serialized_len(&self) -> usize { self.0.len() }
}

impl Deserializable for Blob {
    fn deserialize(buf: deserialize::Buffer) -> deserialize::Result<Self> {
        let mut out = Vec::with_capacity(buf.remaining());
        buf.read_to_end(&mut out);
        Ok(Self(out))
    }
}

/// Boxed `Int`: `int#a8509bda value:int`.
///
/// The bare `i32` carries no constructor; this wrapper is what appears where
/// the schema asks for a polymorphic `Int`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Int(pub i32);

impl Identifiable for Int {
    const CONSTRUCTOR_ID: u32 = 0xa8509bda;
}

impl Serializable for Int {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        Self::CONSTRUCTOR_ID.serialize(buf);
        self.0.serialize(buf);
    }
    fn serialized_len(&self) -> usize { 8 }
}

impl Deserializable for Int {
    fn deserialize(buf: deserialize::Buffer) -> deserialize::Result<Self> {
        deserialize::expect_constructor(buf, Self::CONSTRUCTOR_ID)?;
        Ok(Self(i32::deserialize(buf)?))
    }
}

// ─── Word view ────────────────────────────────────────────────────────────────

/// View a serialized buffer as its 32-bit little-endian words.
///
/// Trailing bytes that do not fill a whole word are ignored; buffers produced
/// by [`Serializable`] never have any.
pub fn to_words(bytes: &[u8]) -> Vec<u32> {
    bytes
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// Inverse of [`to_words`].
pub fn from_words(words: &[u32]) -> Vec<u8> {
    words.iter().flat_map(|w| w.to_le_bytes()).collect()
}

// ─── Core traits ──────────────────────────────────────────────────────────────

/// Every schema type has a unique 32-bit constructor ID.
pub trait Identifiable {
    /// The constructor ID as specified in the schema.
    const CONSTRUCTOR_ID: u32;
}

/// Marks a function type that can be sent as an RPC call.
///
/// `Return` is the type the server will respond with.
pub trait RemoteCall: Serializable {
    /// The deserialized response type.
    type Return: Deserializable;
}
