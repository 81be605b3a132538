//! # mtp-sender
//!
//! Async multi-DC MTProto request core built on `mtp-session`.
//!
//! ## Features
//! - One connection per `(DC, main | media)`, each with its own session and a
//!   shared per-DC auth key; key exchange runs on demand
//! - Abridged, Intermediate, Full and Obfuscated2 transports, optional SOCKS5
//! - Requests survive reconnects, bad salts, clock skew and session resets
//! - `FLOOD_WAIT` and `*_MIGRATE` handled transparently within configurable limits
//! - DC discovery through `help.getConfig`, exportable session state
//! - Raw update stream
//!
//! ```rust,no_run
//! use mtp_sender::{Config, Instance, Target};
//! use mtp_tl::functions;
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let instance = Instance::connect(Config::default()).await?;
//! let pong = instance
//!     .invoke(&functions::Ping { ping_id: 1 }, Target::Main)
//!     .await?;
//! println!("{pong:?}");
//! # Ok(()) }
//! ```

#![deny(unsafe_code)]

mod config;
mod connection;
mod dispatcher;
mod errors;
mod instance;
pub mod retry;
pub mod socks5;

pub use config::{Config, ConfigSource, DcAddress, DcConfig, InitParams, TransportKind};
pub use connection::{ConnectionError, ConnectionId, ConnectionKind, ConnectionState};
pub use dispatcher::{RequestId, Target};
pub use errors::{InvocationError, Migration, RpcError, StartError};
pub use instance::{Instance, RequestHandle, UpdateStream};
pub use retry::{ReconnectConfig, RetryConfig, RetryContext};
pub use socks5::Socks5Config;
