//! Sans-IO transport framings.
//!
//! A [`Framing`] turns whole MTProto packets into bytes for the socket and
//! back. It never touches the socket itself: the connection appends whatever
//! it read to a buffer and calls [`Framing::decode`] until it yields `None`.
//!
//! Supported framings:
//!
//! * [`Abridged`]: `0xef` once, then a 1- or 4-byte length in words.
//! * [`Intermediate`]: `0xeeeeeeee` once, then a 4-byte length in bytes.
//! * [`Full`]: length, sequence number and CRC-32 around every packet.
//! * [`Obfuscated`]: a random 64-byte header and AES-CTR over an inner framing.
//!
//! See <https://core.telegram.org/mtproto/mtproto-transports>.

use std::fmt;

use mtp_crypto::aes::AesCtr;
use mtp_crypto::sha256;

/// Upper bound on a single packet; larger lengths mean a corrupt stream.
pub const MAX_PACKET: usize = 16 * 1024 * 1024;

/// Errors from the framing layer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportError {
    /// The server answered with a bare negative error code instead of a
    /// packet: `-404` means the auth key is unknown, `-429` flood.
    Server(i32),
    /// CRC-32 of a `Full` packet did not match.
    ChecksumMismatch { expected: u32, got: u32 },
    /// A `Full` packet arrived out of order.
    SequenceMismatch { expected: u32, got: u32 },
    /// Declared length is impossible.
    BadLength(usize),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Server(code) => write!(f, "server transport error {code}"),
            Self::ChecksumMismatch { expected, got } => {
                write!(f, "CRC mismatch (got {got:#010x}, expected {expected:#010x})")
            }
            Self::SequenceMismatch { expected, got } => {
                write!(f, "packet sequence {got}, expected {expected}")
            }
            Self::BadLength(len) => write!(f, "invalid packet length {len}"),
        }
    }
}

impl std::error::Error for TransportError {}

/// A packet framing.
pub trait Framing: Send {
    /// Bytes to write once, right after the socket connects.
    fn init_bytes(&mut self) -> Vec<u8>;

    /// Append one framed packet to `out`.
    fn encode(&mut self, payload: &[u8], out: &mut Vec<u8>);

    /// Take one packet off the front of `buf`, or `None` if it is incomplete.
    fn decode(&mut self, buf: &mut Vec<u8>) -> Result<Option<Vec<u8>>, TransportError>;

    /// Protocol tag announced in an obfuscation header, if this framing can
    /// run obfuscated.
    fn obfuscation_tag(&self) -> Option<[u8; 4]> { None }
}

/// A complete packet of exactly one word that is negative is an error code.
fn finish(payload: Vec<u8>) -> Result<Option<Vec<u8>>, TransportError> {
    if payload.len() == 4 {
        let code = i32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]);
        if code < 0 {
            return Err(TransportError::Server(code));
        }
    }
    Ok(Some(payload))
}

fn check_len(len: usize) -> Result<(), TransportError> {
    if len > MAX_PACKET { Err(TransportError::BadLength(len)) } else { Ok(()) }
}

// ─── Abridged ─────────────────────────────────────────────────────────────────

/// [MTProto Abridged] framing.
///
/// [MTProto Abridged]: https://core.telegram.org/mtproto/mtproto-transports#abridged
#[derive(Debug, Default)]
pub struct Abridged;

impl Abridged {
    pub fn new() -> Self { Self }
}

impl Framing for Abridged {
    fn init_bytes(&mut self) -> Vec<u8> { vec![0xef] }

    fn encode(&mut self, payload: &[u8], out: &mut Vec<u8>) {
        let len = payload.len() / 4;
        if len < 0x7f {
            out.push(len as u8);
        } else {
            out.extend([0x7f, (len & 0xff) as u8, ((len >> 8) & 0xff) as u8, ((len >> 16) & 0xff) as u8]);
        }
        out.extend_from_slice(payload);
    }

    fn decode(&mut self, buf: &mut Vec<u8>) -> Result<Option<Vec<u8>>, TransportError> {
        let Some(&first) = buf.first() else { return Ok(None) };
        // The high bit only marks quick acks.
        let (header, words) = if first & 0x7f < 0x7f {
            (1, (first & 0x7f) as usize)
        } else {
            if buf.len() < 4 {
                return Ok(None);
            }
            (4, buf[1] as usize | (buf[2] as usize) << 8 | (buf[3] as usize) << 16)
        };
        let len = words * 4;
        check_len(len)?;
        if buf.len() < header + len {
            return Ok(None);
        }
        let payload = buf[header..header + len].to_vec();
        buf.drain(..header + len);
        finish(payload)
    }

    fn obfuscation_tag(&self) -> Option<[u8; 4]> { Some([0xef; 4]) }
}

// ─── Intermediate ─────────────────────────────────────────────────────────────

/// [MTProto Intermediate] framing.
///
/// [MTProto Intermediate]: https://core.telegram.org/mtproto/mtproto-transports#intermediate
#[derive(Debug, Default)]
pub struct Intermediate;

impl Intermediate {
    pub fn new() -> Self { Self }
}

impl Framing for Intermediate {
    fn init_bytes(&mut self) -> Vec<u8> { vec![0xee; 4] }

    fn encode(&mut self, payload: &[u8], out: &mut Vec<u8>) {
        out.extend((payload.len() as u32).to_le_bytes());
        out.extend_from_slice(payload);
    }

    fn decode(&mut self, buf: &mut Vec<u8>) -> Result<Option<Vec<u8>>, TransportError> {
        if buf.len() < 4 {
            return Ok(None);
        }
        let len = (u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) & 0x7fff_ffff) as usize;
        check_len(len)?;
        if buf.len() < 4 + len {
            return Ok(None);
        }
        let payload = buf[4..4 + len].to_vec();
        buf.drain(..4 + len);
        finish(payload)
    }

    fn obfuscation_tag(&self) -> Option<[u8; 4]> { Some([0xee; 4]) }
}

// ─── Full ─────────────────────────────────────────────────────────────────────

/// [MTProto Full] framing: `len:int seq:int payload crc32:int`.
///
/// No init bytes; the length covers all four parts.
///
/// [MTProto Full]: https://core.telegram.org/mtproto/mtproto-transports#full
#[derive(Debug, Default)]
pub struct Full {
    send_seqno: u32,
    recv_seqno: u32,
}

impl Full {
    pub fn new() -> Self { Self::default() }
}

impl Framing for Full {
    fn init_bytes(&mut self) -> Vec<u8> { Vec::new() }

    fn encode(&mut self, payload: &[u8], out: &mut Vec<u8>) {
        let start = out.len();
        let total_len = (payload.len() + 12) as u32;
        out.extend(total_len.to_le_bytes());
        out.extend(self.send_seqno.to_le_bytes());
        out.extend_from_slice(payload);
        let crc = crc32_ieee(&out[start..]);
        out.extend(crc.to_le_bytes());
        self.send_seqno = self.send_seqno.wrapping_add(1);
    }

    fn decode(&mut self, buf: &mut Vec<u8>) -> Result<Option<Vec<u8>>, TransportError> {
        if buf.len() < 4 {
            return Ok(None);
        }
        let total_len = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
        if total_len < 12 {
            return Err(TransportError::BadLength(total_len));
        }
        check_len(total_len)?;
        if buf.len() < total_len {
            return Ok(None);
        }

        let body_end = total_len - 4;
        let expected = u32::from_le_bytes([buf[body_end], buf[body_end + 1], buf[body_end + 2], buf[body_end + 3]]);
        let got = crc32_ieee(&buf[..body_end]);
        if got != expected {
            return Err(TransportError::ChecksumMismatch { expected, got });
        }

        let seq = u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]);
        if seq != self.recv_seqno {
            return Err(TransportError::SequenceMismatch { expected: self.recv_seqno, got: seq });
        }
        self.recv_seqno = self.recv_seqno.wrapping_add(1);

        let payload = buf[8..body_end].to_vec();
        buf.drain(..total_len);
        finish(payload)
    }
}

/// Compute CRC-32 using the standard IEEE 802.3 polynomial.
pub fn crc32_ieee(data: &[u8]) -> u32 {
    const POLY: u32 = 0xedb88320;
    let mut crc: u32 = 0xffffffff;
    for &byte in data {
        let mut b = byte as u32;
        for _ in 0..8 {
            let mix = (crc ^ b) & 1;
            crc >>= 1;
            if mix != 0 { crc ^= POLY; }
            b >>= 1;
        }
    }
    crc ^ 0xffffffff
}

// ─── Obfuscated ───────────────────────────────────────────────────────────────

/// AES-CTR keys for both directions of an obfuscated connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObfuscationKeys {
    pub enc_key: [u8; 32],
    pub enc_iv:  [u8; 16],
    pub dec_key: [u8; 32],
    pub dec_iv:  [u8; 16],
}

/// Derive both directions' keys from the 64-byte header.
///
/// Client-to-server uses `nonce[8..40]` / `nonce[40..56]`; the other
/// direction uses the same 48 bytes reversed. With an MTProxy secret each
/// key becomes `SHA256(key ‖ secret)`.
pub fn derive_keys(nonce: &[u8; 64], secret: Option<&[u8; 16]>) -> ObfuscationKeys {
    let mut reversed = [0u8; 48];
    reversed.copy_from_slice(&nonce[8..56]);
    reversed.reverse();

    let key = |src: &[u8]| -> [u8; 32] {
        match secret {
            Some(s) => sha256!(src, s),
            None => {
                let mut k = [0u8; 32];
                k.copy_from_slice(src);
                k
            }
        }
    };
    let iv = |src: &[u8]| -> [u8; 16] {
        let mut v = [0u8; 16];
        v.copy_from_slice(src);
        v
    };

    ObfuscationKeys {
        enc_key: key(&nonce[8..40]),
        enc_iv:  iv(&nonce[40..56]),
        dec_key: key(&reversed[..32]),
        dec_iv:  iv(&reversed[32..48]),
    }
}

/// Whether `nonce` is usable as an obfuscation header: it must not look
/// like the start of any other protocol the server accepts on the port.
fn acceptable_nonce(nonce: &[u8; 64]) -> bool {
    const FORBIDDEN: [[u8; 4]; 7] = [
        *b"HEAD", *b"POST", *b"GET ", *b"OPTI",
        [0xdd; 4], [0xee; 4], [0x16, 0x03, 0x01, 0x02],
    ];
    let first: [u8; 4] = [nonce[0], nonce[1], nonce[2], nonce[3]];
    nonce[0] != 0xef && !FORBIDDEN.contains(&first) && nonce[4..8] != [0; 4]
}

/// [MTProto Obfuscated2] over an inner framing.
///
/// [MTProto Obfuscated2]: https://core.telegram.org/mtproto/mtproto-transports#transport-obfuscation
pub struct Obfuscated<F> {
    inner:   F,
    header:  [u8; 64],
    enc:     AesCtr,
    dec:     AesCtr,
    /// Decrypted bytes not yet claimed by the inner framing.
    plain:   Vec<u8>,
}

impl<F: Framing> Obfuscated<F> {
    /// Pick a random header for `inner`, which must support obfuscation.
    pub fn new(inner: F, secret: Option<&[u8; 16]>) -> Result<Option<Self>, getrandom::Error> {
        let mut nonce = [0u8; 64];
        loop {
            getrandom::getrandom(&mut nonce)?;
            if acceptable_nonce(&nonce) {
                break;
            }
        }
        Ok(Self::with_nonce(inner, nonce, secret))
    }

    /// Use a caller-chosen header; bytes 56..60 are overwritten with the
    /// inner framing's tag.
    pub fn with_nonce(inner: F, mut nonce: [u8; 64], secret: Option<&[u8; 16]>) -> Option<Self> {
        nonce[56..60].copy_from_slice(&inner.obfuscation_tag()?);
        let keys = derive_keys(&nonce, secret);
        Some(Self {
            inner,
            header: nonce,
            enc: AesCtr::new(&keys.enc_key, &keys.enc_iv),
            dec: AesCtr::new(&keys.dec_key, &keys.dec_iv),
            plain: Vec::new(),
        })
    }
}

impl<F: Framing> Framing for Obfuscated<F> {
    /// The header goes out with its last 8 bytes encrypted; the inner
    /// framing's own init bytes are replaced by the tag.
    fn init_bytes(&mut self) -> Vec<u8> {
        let mut encrypted = self.header;
        self.enc.apply(&mut encrypted);
        let mut out = self.header.to_vec();
        out[56..].copy_from_slice(&encrypted[56..]);
        out
    }

    fn encode(&mut self, payload: &[u8], out: &mut Vec<u8>) {
        let start = out.len();
        self.inner.encode(payload, out);
        self.enc.apply(&mut out[start..]);
    }

    fn decode(&mut self, buf: &mut Vec<u8>) -> Result<Option<Vec<u8>>, TransportError> {
        if !buf.is_empty() {
            let start = self.plain.len();
            self.plain.append(buf);
            self.dec.apply(&mut self.plain[start..]);
        }
        self.inner.decode(&mut self.plain)
    }
}

impl<F> fmt::Debug for Obfuscated<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Obfuscated").field("buffered", &self.plain.len()).finish()
    }
}
