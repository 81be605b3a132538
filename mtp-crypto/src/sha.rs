//! SHA-1 / SHA-256 over the concatenation of several slices.
//!
//! The macros expand against the re-exports below, so crates calling them
//! need no direct dependency on `sha1` or `sha2`.

#[doc(hidden)]
pub use sha1::{Digest, Sha1};
#[doc(hidden)]
pub use sha2::Sha256;

/// `SHA-1(a || b || ...)` as `[u8; 20]`.
#[macro_export]
macro_rules! sha1 {
    ( $( $part:expr ),+ $(,)? ) => {{
        let mut hasher = <$crate::sha::Sha1 as $crate::sha::Digest>::new();
        $( $crate::sha::Digest::update(&mut hasher, $part); )+
        let digest: [u8; 20] = $crate::sha::Digest::finalize(hasher).into();
        digest
    }};
}

/// `SHA-256(a || b || ...)` as `[u8; 32]`.
#[macro_export]
macro_rules! sha256 {
    ( $( $part:expr ),+ $(,)? ) => {{
        let mut hasher = <$crate::sha::Sha256 as $crate::sha::Digest>::new();
        $( $crate::sha::Digest::update(&mut hasher, $part); )+
        let digest: [u8; 32] = $crate::sha::Digest::finalize(hasher).into();
        digest
    }};
}
