//! MTProto session state, message framing and transports.
//!
//! This crate handles:
//! * Message ids, sequence numbers and per-DC salt/time offset
//! * Encryption and decryption of MTProto 2.0 frames
//! * Classification of decrypted server messages ([`envelope`])
//! * Sans-IO DH key exchange ([`authentication`])
//! * Packet framings for the socket ([`transport`])
//! * A versioned blob to persist keys between runs ([`persist`])
//!
//! Nothing here performs IO: bring your own socket.

#![deny(unsafe_code)]

pub mod authentication;
pub mod dcenter;
pub mod encrypted;
pub mod envelope;
pub mod message;
pub mod persist;
pub mod session;
pub mod transport;

pub use dcenter::{AuthKeyCell, Dcenter};
pub use encrypted::{DecryptError, DecryptedMessage};
pub use envelope::{Envelope, Incoming};
pub use message::{Message, MessageId, MsgIdGenerator};
pub use persist::{DcSnapshot, PersistError, PersistedState};
pub use session::{OutgoingBody, PackedContainer, PackedMessage, Session, SessionError};
pub use transport::{Framing, TransportError};
