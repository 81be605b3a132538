//! Error types for mtp-sender.

use std::fmt;
use std::sync::Arc;

use mtp_session::SessionError;
use mtp_session::authentication;
use mtp_session::envelope::EnvelopeError;

use crate::connection::ConnectionError;

// ─── RpcError ─────────────────────────────────────────────────────────────────

/// An error returned by Telegram's servers in response to an RPC call.
///
/// Numeric values are stripped from the name and placed in [`RpcError::value`].
///
/// # Example
/// `FLOOD_WAIT_30` → `RpcError { code: 420, name: "FLOOD_WAIT", value: Some(30) }`
#[derive(Clone, Debug, PartialEq)]
pub struct RpcError {
    /// HTTP-like status code.
    pub code: i32,
    /// Error name in SCREAMING_SNAKE_CASE with digits removed.
    pub name: String,
    /// Numeric suffix extracted from the name, if any.
    pub value: Option<u32>,
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RPC {}: {}", self.code, self.name)?;
        if let Some(v) = self.value {
            write!(f, " (value: {v})")?;
        }
        Ok(())
    }
}

impl std::error::Error for RpcError {}

/// Where a `*_MIGRATE_X` error wants the request to go.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Migration {
    /// `PHONE_`, `NETWORK_` and `USER_MIGRATE`: the account lives on another
    /// DC, which becomes the main DC.
    Main(i32),
    /// `FILE_` and `STATS_MIGRATE`: only this request goes elsewhere.
    Request(i32),
}

impl RpcError {
    /// Parse a raw Telegram error message like `"FLOOD_WAIT_30"` into an `RpcError`.
    pub fn from_telegram(code: i32, message: &str) -> Self {
        if let Some(idx) = message.rfind('_') {
            let suffix = &message[idx + 1..];
            if !suffix.is_empty() && suffix.chars().all(|c| c.is_ascii_digit()) {
                if let Ok(v) = suffix.parse::<u32>() {
                    let name = message[..idx].to_string();
                    return Self { code, name, value: Some(v) };
                }
            }
        }
        Self { code, name: message.to_string(), value: None }
    }

    /// Match on the error name, with optional wildcard prefix/suffix `'*'`.
    ///
    /// # Examples
    /// - `err.is("FLOOD_WAIT")`: exact match
    /// - `err.is("PHONE_CODE_*")`: starts-with match
    /// - `err.is("*_INVALID")`: ends-with match
    pub fn is(&self, pattern: &str) -> bool {
        if let Some(prefix) = pattern.strip_suffix('*') {
            self.name.starts_with(prefix)
        } else if let Some(suffix) = pattern.strip_prefix('*') {
            self.name.ends_with(suffix)
        } else {
            self.name == pattern
        }
    }

    /// Returns the flood-wait duration in seconds for `FLOOD_WAIT_X` and
    /// `FLOOD_PREMIUM_WAIT_X`.
    pub fn flood_wait_seconds(&self) -> Option<u64> {
        if self.code == 420 && (self.name == "FLOOD_WAIT" || self.name == "FLOOD_PREMIUM_WAIT") {
            self.value.map(|v| v as u64)
        } else {
            None
        }
    }

    /// The DC a `*_MIGRATE_X` error points to, if this is one.
    pub fn migrate_dc(&self) -> Option<i32> {
        self.migration().map(|m| match m {
            Migration::Main(dc) | Migration::Request(dc) => dc,
        })
    }

    pub fn migration(&self) -> Option<Migration> {
        if self.code != 303 {
            return None;
        }
        let dc = i32::try_from(self.value?).ok()?;
        match self.name.as_str() {
            "PHONE_MIGRATE" | "NETWORK_MIGRATE" | "USER_MIGRATE" => Some(Migration::Main(dc)),
            "FILE_MIGRATE" | "STATS_MIGRATE" => Some(Migration::Request(dc)),
            _ => None,
        }
    }
}

// ─── InvocationError ──────────────────────────────────────────────────────────

/// The error type every request can end with.
#[derive(Clone, Debug)]
pub enum InvocationError {
    /// Telegram rejected the request.
    Rpc(RpcError),
    /// The connection could not be (re-)established within the reconnect
    /// budget, or the key exchange failed.
    Connection(Arc<ConnectionError>),
    /// Response deserialization failed.
    Deserialize(mtp_tl::deserialize::Error),
    /// The answer arrived but could not be unpacked (e.g. broken gzip).
    MalformedAnswer(Arc<EnvelopeError>),
    /// The server refused the message itself (`bad_msg_notification`).
    BadMessage { code: i32 },
    /// A migration pointed to a DC without a known address.
    UnknownDc(i32),
    /// The message could not be packed.
    Session(SessionError),
    /// The request was dropped (e.g. the instance shut down).
    Dropped,
}

impl fmt::Display for InvocationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rpc(e)              => write!(f, "{e}"),
            Self::Connection(e)       => write!(f, "connection failed: {e}"),
            Self::Deserialize(e)      => write!(f, "deserialize error: {e}"),
            Self::MalformedAnswer(e)  => write!(f, "malformed answer: {e}"),
            Self::BadMessage { code } => write!(f, "server rejected message (code {code})"),
            Self::UnknownDc(dc)       => write!(f, "no address known for DC{dc}"),
            Self::Session(e)          => write!(f, "{e}"),
            Self::Dropped             => write!(f, "request dropped"),
        }
    }
}

impl std::error::Error for InvocationError {}

impl From<mtp_tl::deserialize::Error> for InvocationError {
    fn from(e: mtp_tl::deserialize::Error) -> Self { Self::Deserialize(e) }
}

impl From<RpcError> for InvocationError {
    fn from(e: RpcError) -> Self { Self::Rpc(e) }
}

impl InvocationError {
    /// Returns `true` if this is the named RPC error (supports `'*'` wildcards).
    pub fn is(&self, pattern: &str) -> bool {
        match self {
            Self::Rpc(e) => e.is(pattern),
            _            => false,
        }
    }

    /// If this is a FLOOD_WAIT error, returns how many seconds to wait.
    pub fn flood_wait_seconds(&self) -> Option<u64> {
        match self {
            Self::Rpc(e) => e.flood_wait_seconds(),
            _            => None,
        }
    }

    /// The key exchange error behind a connection failure, if any.
    pub fn key_exchange_error(&self) -> Option<&authentication::Error> {
        match self {
            Self::Connection(e) => match e.as_ref() {
                ConnectionError::KeyExchange(e) => Some(e),
                _ => None,
            },
            _ => None,
        }
    }
}

// ─── StartError ───────────────────────────────────────────────────────────────

/// Fatal errors from [`crate::Instance::connect`].
#[derive(Debug)]
pub enum StartError {
    /// Config discovery failed on every known DC address.
    NoReachableDc,
    /// A DC answered but no auth key could be negotiated with it.
    KeyExchangeFailed { dc_id: i32, error: authentication::Error },
}

impl fmt::Display for StartError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoReachableDc => write!(f, "no data center reachable"),
            Self::KeyExchangeFailed { dc_id, error } => {
                write!(f, "key exchange with DC{dc_id} failed: {error}")
            }
        }
    }
}

impl std::error::Error for StartError {}
