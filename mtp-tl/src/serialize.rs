//! The [`Serializable`] trait and its implementations for primitive wire types.
//!
//! Encoding follows the [MTProto Binary Serialization] spec. Every value
//! occupies a whole number of 32-bit little-endian words.
//!
//! [MTProto Binary Serialization]: https://core.telegram.org/mtproto/serialize

/// Serialize `self` into MTProto binary format.
pub trait Serializable {
    /// Appends the serialized form of `self` to `buf`.
    fn serialize(&self, buf: &mut impl Extend<u8>);

    /// Exact number of bytes [`Serializable::serialize`] will append.
    ///
    /// Used to pre-size buffers; runs the serializer against a counting sink.
    fn serialized_len(&self) -> usize {
        let mut counter = ByteCounter(0);
        self.serialize(&mut counter);
        counter.0
    }

    /// Convenience: allocate a fresh `Vec<u8>` and serialize into it.
    fn to_bytes(&self) -> Vec<u8> {
        let mut v = Vec::with_capacity(self.serialized_len());
        self.serialize(&mut v);
        v
    }
}

/// An `Extend<u8>` sink that only counts.
struct ByteCounter(usize);

impl Extend<u8> for ByteCounter {
    fn extend<I: IntoIterator<Item = u8>>(&mut self, iter: I) {
        self.0 += iter.into_iter().count();
    }
}

// ─── bool ────────────────────────────────────────────────────────────────────

/// `true`  → `boolTrue#997275b5`
/// `false` → `boolFalse#bc799737`
impl Serializable for bool {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        let id: u32 = if *self { 0x997275b5 } else { 0xbc799737 };
        id.serialize(buf);
    }
}

// ─── integers ────────────────────────────────────────────────────────────────

macro_rules! le_primitive {
    ($($ty:ty),* $(,)?) => {$(
        impl Serializable for $ty {
            fn serialize(&self, buf: &mut impl Extend<u8>) {
                buf.extend(self.to_le_bytes());
            }
            fn serialized_len(&self) -> usize { std::mem::size_of::<$ty>() }
        }
    )*};
}

le_primitive!(i32, u32, i64, u64, f64);

impl Serializable for [u8; 16] {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        buf.extend(self.iter().copied());
    }
    fn serialized_len(&self) -> usize { 16 }
}

impl Serializable for [u8; 32] {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        buf.extend(self.iter().copied());
    }
    fn serialized_len(&self) -> usize { 32 }
}

// ─── strings / bytes ─────────────────────────────────────────────────────────

/// Length of the prefix + payload of a byte string, before alignment padding.
pub fn bytes_inner_len(len: usize) -> usize {
    if len <= 253 { 1 + len } else { 4 + len }
}

/// Zero bytes needed to bring `len` up to a 4-byte boundary.
pub fn padding_for(len: usize) -> usize {
    (4 - (len % 4)) % 4
}

/// Wire string encoding: a length-prefixed, 4-byte aligned byte string.
///
/// * If `len ≤ 253`: `[len as u8][data][0-padding to align to 4 bytes]`
/// * If `len ≥ 254`: `[0xfe][len as 3 LE bytes][data][0-padding]`
impl Serializable for &[u8] {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        let len = self.len();
        if len <= 253 {
            buf.extend([len as u8]);
        } else {
            buf.extend([
                0xfe,
                (len & 0xff) as u8,
                ((len >> 8) & 0xff) as u8,
                ((len >> 16) & 0xff) as u8,
            ]);
        }

        buf.extend(self.iter().copied());
        let padding = padding_for(bytes_inner_len(len));
        buf.extend(std::iter::repeat_n(0u8, padding));
    }

    fn serialized_len(&self) -> usize {
        let inner = bytes_inner_len(self.len());
        inner + padding_for(inner)
    }
}

impl Serializable for Vec<u8> {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        self.as_slice().serialize(buf);
    }
    fn serialized_len(&self) -> usize { self.as_slice().serialized_len() }
}

impl Serializable for String {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        self.as_bytes().serialize(buf);
    }
    fn serialized_len(&self) -> usize { self.as_bytes().serialized_len() }
}

impl Serializable for &str {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        self.as_bytes().serialize(buf);
    }
}

// ─── vectors ─────────────────────────────────────────────────────────────────

/// Boxed `Vector<T>`: prefixed with constructor ID `0x1cb5c415`.
impl<T: Serializable> Serializable for Vec<T> {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        crate::VECTOR_ID.serialize(buf);
        (self.len() as u32).serialize(buf);
        for item in self { item.serialize(buf); }
    }
}

/// Bare `vector<T>`: just a count followed by items, no constructor ID.
impl<T: Serializable> Serializable for crate::RawVec<T> {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        (self.0.len() as u32).serialize(buf);
        for item in &self.0 { item.serialize(buf); }
    }
}

// ─── Option ──────────────────────────────────────────────────────────────────

/// Optional parameters are handled by flags; when `Some`, serialize the value.
/// When `None`, nothing is written (the flags word already encodes absence).
impl<T: Serializable> Serializable for Option<T> {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        if let Some(v) = self { v.serialize(buf); }
    }
}
