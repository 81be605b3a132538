//! The [`Deserializable`] trait, [`Cursor`] buffer, and primitive impls.

use std::fmt;

// ─── Error ───────────────────────────────────────────────────────────────────

/// Errors that can occur while decoding the wire format.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Error {
    /// Fewer bytes remain than the type being read requires.
    InsufficientData { needed: usize, remaining: usize },
    /// A specific constructor was required but a different one was read.
    UnexpectedConstructor { expected: u32, got: u32 },
    /// Boxed-type dispatch found no variant for this constructor id.
    BadTypeId { id: u32 },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InsufficientData { needed, remaining } => {
                write!(f, "insufficient data: need {needed} bytes, {remaining} remaining")
            }
            Self::UnexpectedConstructor { expected, got } => {
                write!(f, "expected constructor {expected:#010x}, got {got:#010x}")
            }
            Self::BadTypeId { id } => write!(f, "unknown constructor id: {id:#010x}"),
        }
    }
}

impl std::error::Error for Error {}

/// Specialized `Result` for deserialization.
pub type Result<T> = std::result::Result<T, Error>;

// ─── Cursor ──────────────────────────────────────────────────────────────────

/// A zero-copy cursor over an in-memory byte slice.
///
/// Avoids `std::io::Cursor` and its wide error surface; only the three error
/// cases above can ever occur while decoding.
#[derive(Clone, Debug)]
pub struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    /// Create a cursor positioned at the start of `buf`.
    pub fn from_slice(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Current byte offset.
    pub fn pos(&self) -> usize { self.pos }

    /// Remaining bytes.
    pub fn remaining(&self) -> usize { self.buf.len() - self.pos }

    /// Fail with [`Error::InsufficientData`] unless `n` more bytes are available.
    pub fn require(&self, n: usize) -> Result<()> {
        if self.remaining() < n {
            Err(Error::InsufficientData { needed: n, remaining: self.remaining() })
        } else {
            Ok(())
        }
    }

    /// Read a single byte.
    pub fn read_byte(&mut self) -> Result<u8> {
        self.require(1)?;
        let b = self.buf[self.pos];
        self.pos += 1;
        Ok(b)
    }

    /// Read exactly `out.len()` bytes.
    pub fn read_exact(&mut self, out: &mut [u8]) -> Result<()> {
        self.require(out.len())?;
        out.copy_from_slice(&self.buf[self.pos..self.pos + out.len()]);
        self.pos += out.len();
        Ok(())
    }

    /// Borrow the next `n` bytes without copying them.
    pub fn read_slice(&mut self, n: usize) -> Result<&'a [u8]> {
        self.require(n)?;
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    /// Look at the next constructor id without consuming it.
    pub fn peek_u32(&self) -> Result<u32> {
        self.require(4)?;
        let mut b = [0u8; 4];
        b.copy_from_slice(&self.buf[self.pos..self.pos + 4]);
        Ok(u32::from_le_bytes(b))
    }

    /// Consume all remaining bytes into `out`.
    pub fn read_to_end(&mut self, out: &mut Vec<u8>) -> usize {
        let slice = &self.buf[self.pos..];
        out.extend_from_slice(slice);
        self.pos = self.buf.len();
        slice.len()
    }
}

/// Alias used by schema code: `crate::deserialize::Buffer<'_, '_>`.
pub type Buffer<'a, 'b> = &'a mut Cursor<'b>;

// ─── Deserializable ──────────────────────────────────────────────────────────

/// Deserialize a value from the MTProto wire format.
pub trait Deserializable: Sized {
    /// Read `Self` from `buf`, advancing its position.
    fn deserialize(buf: Buffer) -> Result<Self>;

    /// Convenience: deserialize from a byte slice.
    fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::from_slice(bytes);
        Self::deserialize(&mut cursor)
    }
}

/// Read a constructor id and fail unless it equals `expected`.
pub fn expect_constructor(buf: Buffer, expected: u32) -> Result<()> {
    let got = u32::deserialize(buf)?;
    if got == expected {
        Ok(())
    } else {
        Err(Error::UnexpectedConstructor { expected, got })
    }
}

// ─── Primitives ───────────────────────────────────────────────────────────────

impl Deserializable for bool {
    fn deserialize(buf: Buffer) -> Result<Self> {
        match u32::deserialize(buf)? {
            0x997275b5 => Ok(true),
            0xbc799737 => Ok(false),
            id => Err(Error::BadTypeId { id }),
        }
    }
}

macro_rules! le_primitive {
    ($($ty:ty => $n:expr),* $(,)?) => {$(
        impl Deserializable for $ty {
            fn deserialize(buf: Buffer) -> Result<Self> {
                let mut b = [0u8; $n];
                buf.read_exact(&mut b)?;
                Ok(<$ty>::from_le_bytes(b))
            }
        }
    )*};
}

le_primitive!(i32 => 4, u32 => 4, i64 => 8, u64 => 8, f64 => 8);

impl Deserializable for [u8; 16] {
    fn deserialize(buf: Buffer) -> Result<Self> {
        let mut b = [0u8; 16];
        buf.read_exact(&mut b)?;
        Ok(b)
    }
}

impl Deserializable for [u8; 32] {
    fn deserialize(buf: Buffer) -> Result<Self> {
        let mut b = [0u8; 32];
        buf.read_exact(&mut b)?;
        Ok(b)
    }
}

// ─── Bytes / String ───────────────────────────────────────────────────────────

impl Deserializable for Vec<u8> {
    fn deserialize(buf: Buffer) -> Result<Self> {
        let first = buf.read_byte()?;
        let (len, header_len) = if first != 0xfe {
            (first as usize, 1)
        } else {
            let a = buf.read_byte()? as usize;
            let b = buf.read_byte()? as usize;
            let c = buf.read_byte()? as usize;
            (a | (b << 8) | (c << 16), 4)
        };

        let data = buf.read_slice(len)?.to_vec();

        // Padding is derived from the total length, never guessed.
        let total = header_len + len;
        let padding = (4 - (total % 4)) % 4;
        buf.read_slice(padding)?;

        Ok(data)
    }
}

impl Deserializable for String {
    fn deserialize(buf: Buffer) -> Result<Self> {
        let bytes = Vec::<u8>::deserialize(buf)?;
        Ok(match String::from_utf8(bytes) {
            Ok(s) => s,
            Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
        })
    }
}

// ─── Vectors ─────────────────────────────────────────────────────────────────

impl<T: Deserializable> Deserializable for Vec<T> {
    fn deserialize(buf: Buffer) -> Result<Self> {
        expect_constructor(buf, crate::VECTOR_ID)?;
        read_elements(buf)
    }
}

impl<T: Deserializable> Deserializable for crate::RawVec<T> {
    fn deserialize(buf: Buffer) -> Result<Self> {
        Ok(crate::RawVec(read_elements(buf)?))
    }
}

fn read_elements<T: Deserializable>(buf: Buffer) -> Result<Vec<T>> {
    let len = u32::deserialize(buf)? as usize;
    // Every element occupies at least one word; reject counts that cannot fit
    // before allocating.
    buf.require(len.saturating_mul(4))?;
    (0..len).map(|_| T::deserialize(buf)).collect()
}
