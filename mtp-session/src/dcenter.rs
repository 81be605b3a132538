//! Per-DC state: the shared auth key plus salt and clock offset.

use std::sync::{Arc, RwLock};

use mtp_crypto::AuthKey;

use crate::message::time_offset_from;
use crate::persist::DcSnapshot;

#[derive(Debug, Default)]
struct KeySlot {
    key: Option<Arc<AuthKey>>,
    generation: u64,
}

/// The auth key of one DC, shared by every connection to it.
///
/// Readers take an `Arc` snapshot; writers replace the whole value. The
/// generation counter changes on every install or destroy so a holder of an
/// old snapshot can tell it has gone stale.
#[derive(Clone, Debug, Default)]
pub struct AuthKeyCell(Arc<RwLock<KeySlot>>);

impl AuthKeyCell {
    pub fn new(key: Option<AuthKey>) -> Self {
        Self(Arc::new(RwLock::new(KeySlot { key: key.map(Arc::new), generation: 0 })))
    }

    /// Current key, if any.
    pub fn get(&self) -> Option<Arc<AuthKey>> {
        self.read().key.clone()
    }

    /// Current key together with its generation.
    pub fn snapshot(&self) -> (Option<Arc<AuthKey>>, u64) {
        let slot = self.read();
        (slot.key.clone(), slot.generation)
    }

    pub fn generation(&self) -> u64 {
        self.read().generation
    }

    /// Swap in a freshly negotiated key. Returns the new generation.
    pub fn install(&self, key: AuthKey) -> u64 {
        let mut slot = self.write();
        slot.key = Some(Arc::new(key));
        slot.generation += 1;
        slot.generation
    }

    /// Forget the key. Returns the new generation.
    pub fn destroy(&self) -> u64 {
        let mut slot = self.write();
        slot.key = None;
        slot.generation += 1;
        slot.generation
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, KeySlot> {
        self.0.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, KeySlot> {
        self.0.write().unwrap_or_else(|e| e.into_inner())
    }
}

/// Everything the client knows about one data center's session parameters.
#[derive(Clone, Debug)]
pub struct Dcenter {
    pub dc_id: i32,
    /// Shared with every connection to this DC.
    pub key: AuthKeyCell,
    /// Server salt to stamp on outgoing messages.
    pub salt: i64,
    /// Server clock minus local clock, in seconds.
    pub time_offset: i32,
}

impl Dcenter {
    pub fn new(dc_id: i32) -> Self {
        Self { dc_id, key: AuthKeyCell::default(), salt: 0, time_offset: 0 }
    }

    pub fn has_key(&self) -> bool {
        self.key.get().is_some()
    }

    /// Snapshot of the current key.
    pub fn auth_key(&self) -> Option<Arc<AuthKey>> {
        self.key.get()
    }

    /// Adopt the result of a completed key exchange.
    pub fn install_key(&mut self, key: AuthKey, first_salt: i64, time_offset: i32) {
        self.key.install(key);
        self.salt = first_salt;
        self.time_offset = time_offset;
        log::debug!("[dc {}] auth key installed", self.dc_id);
    }

    /// Irreversibly drop the key. Connections holding an older snapshot
    /// notice through the generation counter and must re-authenticate.
    pub fn destroy_key(&mut self) {
        self.key.destroy();
        self.salt = 0;
        log::info!("[dc {}] auth key destroyed", self.dc_id);
    }

    /// Recompute the clock offset from a server message id (after
    /// `bad_msg_notification` codes 16/17).
    pub fn correct_time_offset(&mut self, server_msg_id: i64) {
        let offset = time_offset_from(server_msg_id);
        log::debug!("[dc {}] time offset {} -> {}", self.dc_id, self.time_offset, offset);
        self.time_offset = offset;
    }

    pub fn snapshot(&self) -> DcSnapshot {
        DcSnapshot {
            dc_id: self.dc_id,
            auth_key: self.key.get().map(|k| k.to_bytes()),
            salt: self.salt,
            time_offset: self.time_offset,
        }
    }

    pub fn restore(snapshot: &DcSnapshot) -> Self {
        Self {
            dc_id: snapshot.dc_id,
            key: AuthKeyCell::new(snapshot.auth_key.map(AuthKey::from_bytes)),
            salt: snapshot.salt,
            time_offset: snapshot.time_offset,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn old_snapshot_survives_destroy() {
        let mut dc = Dcenter::new(2);
        dc.install_key(AuthKey::from_bytes([1; 256]), 7, 0);
        let (held, generation) = dc.key.snapshot();

        dc.destroy_key();
        assert!(!dc.has_key());
        assert!(held.is_some());
        assert_ne!(dc.key.generation(), generation);
    }

    #[test]
    fn clones_share_the_key() {
        let dc = Dcenter::new(4);
        let media = dc.key.clone();
        dc.key.install(AuthKey::from_bytes([9; 256]));
        assert_eq!(media.get().map(|k| k.key_id()), dc.key.get().map(|k| k.key_id()));
    }

    #[test]
    fn snapshot_restore() {
        let mut dc = Dcenter::new(5);
        dc.install_key(AuthKey::from_bytes([3; 256]), -99, 12);
        let back = Dcenter::restore(&dc.snapshot());
        assert_eq!(back.dc_id, 5);
        assert_eq!(back.salt, -99);
        assert_eq!(back.time_offset, 12);
        assert_eq!(back.key.get().map(|k| k.to_bytes()), Some([3; 256]));
    }
}
