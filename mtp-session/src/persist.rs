//! Opaque, versioned blob holding everything needed to resume without a new
//! key exchange.
//!
//! Layout (wire codec, little-endian words):
//!
//! ```text
//! magic:int  version:int  main_dc:int
//! dcs:vector<dc_id:int has_key:Bool auth_key:bytes? salt:long time_offset:int>
//! ```

use std::fmt;

use mtp_tl::deserialize::{self, Buffer, Cursor};
use mtp_tl::{Deserializable, RawVec, Serializable};

const MAGIC: u32 = 0x5354_504d; // "MPTS"
const VERSION: u32 = 1;

#[derive(Clone, Debug, PartialEq)]
pub enum PersistError {
    BadMagic(u32),
    UnsupportedVersion(u32),
    BadKeyLength(usize),
    Decode(deserialize::Error),
}

impl fmt::Display for PersistError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadMagic(m) => write!(f, "not a session blob (magic {m:#010x})"),
            Self::UnsupportedVersion(v) => write!(f, "unsupported session blob version {v}"),
            Self::BadKeyLength(n) => write!(f, "stored auth key has {n} bytes, expected 256"),
            Self::Decode(e) => write!(f, "corrupt session blob: {e}"),
        }
    }
}

impl std::error::Error for PersistError {}

impl From<deserialize::Error> for PersistError {
    fn from(e: deserialize::Error) -> Self { Self::Decode(e) }
}

/// Saved state of one DC.
#[derive(Clone, Debug, PartialEq)]
pub struct DcSnapshot {
    pub dc_id: i32,
    pub auth_key: Option<[u8; 256]>,
    pub salt: i64,
    pub time_offset: i32,
}

impl Serializable for DcSnapshot {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        self.dc_id.serialize(buf);
        self.auth_key.is_some().serialize(buf);
        if let Some(key) = &self.auth_key {
            key.as_slice().serialize(buf);
        }
        self.salt.serialize(buf);
        self.time_offset.serialize(buf);
    }
}

/// A [`DcSnapshot`] as read from the wire, before the key length is checked.
struct StoredDc {
    dc_id: i32,
    auth_key: Option<Vec<u8>>,
    salt: i64,
    time_offset: i32,
}

impl Deserializable for StoredDc {
    fn deserialize(buf: Buffer) -> deserialize::Result<Self> {
        let dc_id = i32::deserialize(buf)?;
        let auth_key = if bool::deserialize(buf)? {
            Some(Vec::<u8>::deserialize(buf)?)
        } else {
            None
        };
        Ok(Self {
            dc_id,
            auth_key,
            salt: i64::deserialize(buf)?,
            time_offset: i32::deserialize(buf)?,
        })
    }
}

impl TryFrom<StoredDc> for DcSnapshot {
    type Error = PersistError;

    fn try_from(stored: StoredDc) -> Result<Self, PersistError> {
        let auth_key = match stored.auth_key {
            Some(bytes) => {
                let mut key = [0u8; 256];
                if bytes.len() != key.len() {
                    return Err(PersistError::BadKeyLength(bytes.len()));
                }
                key.copy_from_slice(&bytes);
                Some(key)
            }
            None => None,
        };
        Ok(Self { dc_id: stored.dc_id, auth_key, salt: stored.salt, time_offset: stored.time_offset })
    }
}

/// Everything an application stores between runs.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PersistedState {
    pub main_dc: i32,
    pub dcs: Vec<DcSnapshot>,
}

impl PersistedState {
    pub fn dc(&self, dc_id: i32) -> Option<&DcSnapshot> {
        self.dcs.iter().find(|d| d.dc_id == dc_id)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        MAGIC.serialize(&mut buf);
        VERSION.serialize(&mut buf);
        self.main_dc.serialize(&mut buf);
        RawVec(self.dcs.clone()).serialize(&mut buf);
        buf
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PersistError> {
        let mut cursor = Cursor::from_slice(bytes);
        let magic = u32::deserialize(&mut cursor)?;
        if magic != MAGIC {
            return Err(PersistError::BadMagic(magic));
        }
        let version = u32::deserialize(&mut cursor)?;
        if version != VERSION {
            return Err(PersistError::UnsupportedVersion(version));
        }
        let main_dc = i32::deserialize(&mut cursor)?;
        let dcs = RawVec::<StoredDc>::deserialize(&mut cursor)?
            .0
            .into_iter()
            .map(DcSnapshot::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { main_dc, dcs })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> PersistedState {
        PersistedState {
            main_dc: 2,
            dcs: vec![
                DcSnapshot { dc_id: 2, auth_key: Some([0xab; 256]), salt: -5, time_offset: 3 },
                DcSnapshot { dc_id: 4, auth_key: None, salt: 0, time_offset: 0 },
            ],
        }
    }

    #[test]
    fn bit_exact_roundtrip() {
        let state = sample();
        let bytes = state.to_bytes();
        assert_eq!(bytes.len() % 4, 0);
        let back = PersistedState::from_bytes(&bytes).unwrap();
        assert_eq!(back, state);
        assert_eq!(back.to_bytes(), bytes);
    }

    #[test]
    fn rejects_foreign_blob() {
        let mut bytes = sample().to_bytes();
        bytes[0] ^= 0xff;
        assert!(matches!(PersistedState::from_bytes(&bytes), Err(PersistError::BadMagic(_))));
    }

    #[test]
    fn rejects_future_version() {
        let mut bytes = sample().to_bytes();
        bytes[4] = 9;
        assert_eq!(PersistedState::from_bytes(&bytes), Err(PersistError::UnsupportedVersion(9)));
    }

    #[test]
    fn short_key_rejected() {
        let mut bytes = Vec::new();
        MAGIC.serialize(&mut bytes);
        VERSION.serialize(&mut bytes);
        2i32.serialize(&mut bytes);
        1u32.serialize(&mut bytes);
        2i32.serialize(&mut bytes);
        true.serialize(&mut bytes);
        vec![1u8; 10].serialize(&mut bytes);
        0i64.serialize(&mut bytes);
        0i32.serialize(&mut bytes);
        assert_eq!(PersistedState::from_bytes(&bytes), Err(PersistError::BadKeyLength(10)));
    }

    #[test]
    fn truncated_blob() {
        let bytes = sample().to_bytes();
        assert!(matches!(
            PersistedState::from_bytes(&bytes[..bytes.len() - 4]),
            Err(PersistError::Decode(_))
        ));
    }
}
