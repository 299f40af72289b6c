//! Little-endian binary serialization shared by the WAL, the shadow file
//! trailer and the checkpoint image.
//!
//! Writing always goes to an in-memory [`Serializer`]. Reading is generic
//! over a [`Reader`] so the same `Decode` impls work on a slice (checkpoint
//! image) and on a streaming, checksum-capturing file reader (WAL).
//!
//! ## Encoding
//!
//! ```text
//! integers   little-endian, fixed width
//! bool       1 byte (0 or 1)
//! string     [u64 len][utf-8 bytes]
//! bytes      [u64 len][bytes]
//! vector     [u64 count][elements]
//! option     [u8 present][element?]
//! ```

use crate::error::{CoreError, CoreResult};

/// Upper bound for a single length or count field.
///
/// A torn or garbled length is rejected here instead of driving a huge
/// allocation.
pub const MAX_FIELD_LEN: u64 = 1 << 32;

/// Types that can be written to a [`Serializer`].
pub trait Encode {
    /// Appends the encoding of `self`.
    fn encode(&self, s: &mut Serializer);
}

/// Types that can be read back from a [`Deserializer`].
pub trait Decode: Sized {
    /// Reads one value.
    ///
    /// # Errors
    ///
    /// Returns an error if the input ends early or is malformed.
    fn decode<R: Reader>(d: &mut Deserializer<R>) -> CoreResult<Self>;
}

/// Growable output buffer.
#[derive(Debug, Default, Clone)]
pub struct Serializer {
    buf: Vec<u8>,
}

impl Serializer {
    /// Creates an empty serializer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes a single byte.
    pub fn write_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    /// Writes a `u16`.
    pub fn write_u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    /// Writes a `u32`.
    pub fn write_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    /// Writes a `u64`.
    pub fn write_u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    /// Writes an `i64`.
    pub fn write_i64(&mut self, v: i64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    /// Writes an `f64` by its bit pattern.
    pub fn write_f64(&mut self, v: f64) {
        self.write_u64(v.to_bits());
    }

    /// Writes a bool as one byte.
    pub fn write_bool(&mut self, v: bool) {
        self.write_u8(u8::from(v));
    }

    /// Writes a length-prefixed string.
    pub fn write_str(&mut self, v: &str) {
        self.write_bytes(v.as_bytes());
    }

    /// Writes length-prefixed bytes.
    pub fn write_bytes(&mut self, v: &[u8]) {
        self.write_u64(v.len() as u64);
        self.buf.extend_from_slice(v);
    }

    /// Writes bytes without a length prefix.
    pub fn write_raw(&mut self, v: &[u8]) {
        self.buf.extend_from_slice(v);
    }

    /// Writes any encodable value.
    pub fn write<T: Encode + ?Sized>(&mut self, v: &T) {
        v.encode(self);
    }

    /// Writes a count-prefixed vector.
    pub fn write_vec<T: Encode>(&mut self, items: &[T]) {
        self.write_u64(items.len() as u64);
        for item in items {
            item.encode(self);
        }
    }

    /// Writes an optional value.
    pub fn write_option<T: Encode>(&mut self, v: Option<&T>) {
        match v {
            Some(v) => {
                self.write_u8(1);
                v.encode(self);
            }
            None => self.write_u8(0),
        }
    }

    /// Number of bytes written so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Returns true if nothing has been written.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Returns the bytes written so far.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Consumes the serializer and returns its bytes.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    /// Discards all written bytes, keeping the allocation.
    pub fn clear(&mut self) {
        self.buf.clear();
    }
}

/// A source of bytes for a [`Deserializer`].
pub trait Reader {
    /// Fills `buf` completely.
    ///
    /// # Errors
    ///
    /// Returns an error if fewer than `buf.len()` bytes remain.
    fn read_exact(&mut self, buf: &mut [u8]) -> CoreResult<()>;

    /// Returns true once every byte has been consumed.
    fn is_finished(&self) -> bool;

    /// Logical offset of the next byte to be read.
    fn offset(&self) -> u64;

    /// Fails, the way [`read_exact`](Self::read_exact) would, if fewer than
    /// `len` bytes remain. Lets length-prefixed reads reject a bogus length
    /// before allocating for it.
    ///
    /// # Errors
    ///
    /// Returns the reader's end-of-input error.
    fn ensure_available(&self, len: u64) -> CoreResult<()> {
        let _ = len;
        Ok(())
    }
}

impl<R: Reader + ?Sized> Reader for &mut R {
    fn read_exact(&mut self, buf: &mut [u8]) -> CoreResult<()> {
        (**self).read_exact(buf)
    }

    fn ensure_available(&self, len: u64) -> CoreResult<()> {
        (**self).ensure_available(len)
    }

    fn is_finished(&self) -> bool {
        (**self).is_finished()
    }

    fn offset(&self) -> u64 {
        (**self).offset()
    }
}

/// Reader over an in-memory slice.
#[derive(Debug)]
pub struct SliceReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> SliceReader<'a> {
    /// Creates a reader positioned at the start of `data`.
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }
}

impl Reader for SliceReader<'_> {
    fn read_exact(&mut self, buf: &mut [u8]) -> CoreResult<()> {
        self.ensure_available(buf.len() as u64)?;
        let end = self.pos + buf.len();
        buf.copy_from_slice(&self.data[self.pos..end]);
        self.pos = end;
        Ok(())
    }

    fn ensure_available(&self, len: u64) -> CoreResult<()> {
        let have = (self.data.len() - self.pos) as u64;
        if len > have {
            return Err(CoreError::invalid_format(format!(
                "unexpected end of input: need {len} bytes at {}, have {have}",
                self.pos
            )));
        }
        Ok(())
    }

    fn is_finished(&self) -> bool {
        self.pos >= self.data.len()
    }

    fn offset(&self) -> u64 {
        self.pos as u64
    }
}

/// Typed reads on top of a [`Reader`].
#[derive(Debug)]
pub struct Deserializer<R> {
    reader: R,
}

impl<'a> Deserializer<SliceReader<'a>> {
    /// Creates a deserializer over a byte slice.
    #[must_use]
    pub fn from_slice(data: &'a [u8]) -> Self {
        Self::new(SliceReader::new(data))
    }
}

impl<R: Reader> Deserializer<R> {
    /// Wraps a reader.
    pub fn new(reader: R) -> Self {
        Self { reader }
    }

    /// Returns the underlying reader.
    pub fn reader(&self) -> &R {
        &self.reader
    }

    /// Returns the underlying reader mutably.
    pub fn reader_mut(&mut self) -> &mut R {
        &mut self.reader
    }

    /// Consumes the deserializer and returns the reader.
    pub fn into_inner(self) -> R {
        self.reader
    }

    /// Returns true once the reader is exhausted.
    pub fn is_finished(&self) -> bool {
        self.reader.is_finished()
    }

    fn read_array<const N: usize>(&mut self) -> CoreResult<[u8; N]> {
        let mut buf = [0u8; N];
        self.reader.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// Reads one byte.
    pub fn read_u8(&mut self) -> CoreResult<u8> {
        Ok(self.read_array::<1>()?[0])
    }

    /// Reads a `u16`.
    pub fn read_u16(&mut self) -> CoreResult<u16> {
        Ok(u16::from_le_bytes(self.read_array()?))
    }

    /// Reads a `u32`.
    pub fn read_u32(&mut self) -> CoreResult<u32> {
        Ok(u32::from_le_bytes(self.read_array()?))
    }

    /// Reads a `u64`.
    pub fn read_u64(&mut self) -> CoreResult<u64> {
        Ok(u64::from_le_bytes(self.read_array()?))
    }

    /// Reads an `i64`.
    pub fn read_i64(&mut self) -> CoreResult<i64> {
        Ok(i64::from_le_bytes(self.read_array()?))
    }

    /// Reads an `f64`.
    pub fn read_f64(&mut self) -> CoreResult<f64> {
        Ok(f64::from_bits(self.read_u64()?))
    }

    /// Reads a bool, rejecting bytes other than 0 and 1.
    pub fn read_bool(&mut self) -> CoreResult<bool> {
        match self.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(CoreError::invalid_format(format!("invalid bool byte {other}"))),
        }
    }

    fn read_len(&mut self) -> CoreResult<usize> {
        let len = self.read_u64()?;
        if len > MAX_FIELD_LEN {
            return Err(CoreError::invalid_format(format!(
                "length {len} exceeds limit {MAX_FIELD_LEN}"
            )));
        }
        usize::try_from(len).map_err(|_| CoreError::invalid_format("length overflows usize"))
    }

    /// Reads length-prefixed bytes.
    pub fn read_bytes(&mut self) -> CoreResult<Vec<u8>> {
        let len = self.read_len()?;
        self.read_raw(len)
    }

    /// Reads exactly `len` bytes without a length prefix.
    pub fn read_raw(&mut self, len: usize) -> CoreResult<Vec<u8>> {
        self.reader.ensure_available(len as u64)?;
        let mut buf = vec![0u8; len];
        self.reader.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// Reads a length-prefixed UTF-8 string.
    pub fn read_string(&mut self) -> CoreResult<String> {
        let bytes = self.read_bytes()?;
        String::from_utf8(bytes).map_err(|_| CoreError::invalid_format("string is not UTF-8"))
    }

    /// Reads any decodable value.
    pub fn read<T: Decode>(&mut self) -> CoreResult<T> {
        T::decode(self)
    }

    /// Reads a count-prefixed vector.
    pub fn read_vec<T: Decode>(&mut self) -> CoreResult<Vec<T>> {
        let count = self.read_len()?;
        // Every element takes at least one byte.
        self.reader.ensure_available(count as u64)?;
        let mut items = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            items.push(T::decode(self)?);
        }
        Ok(items)
    }

    /// Reads an optional value.
    pub fn read_option<T: Decode>(&mut self) -> CoreResult<Option<T>> {
        if self.read_bool()? {
            Ok(Some(T::decode(self)?))
        } else {
            Ok(None)
        }
    }
}

impl Encode for u64 {
    fn encode(&self, s: &mut Serializer) {
        s.write_u64(*self);
    }
}

impl Decode for u64 {
    fn decode<R: Reader>(d: &mut Deserializer<R>) -> CoreResult<Self> {
        d.read_u64()
    }
}

impl Encode for String {
    fn encode(&self, s: &mut Serializer) {
        s.write_str(self);
    }
}

impl Decode for String {
    fn decode<R: Reader>(d: &mut Deserializer<R>) -> CoreResult<Self> {
        d.read_string()
    }
}

impl<T: Encode> Encode for Vec<T> {
    fn encode(&self, s: &mut Serializer) {
        s.write_vec(self);
    }
}

impl<T: Decode> Decode for Vec<T> {
    fn decode<R: Reader>(d: &mut Deserializer<R>) -> CoreResult<Self> {
        d.read_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primitives_round_trip() {
        let mut s = Serializer::new();
        s.write_u8(7);
        s.write_u32(0xdead_beef);
        s.write_i64(-42);
        s.write_f64(1.5);
        s.write_bool(true);
        s.write_str("arbor");

        let bytes = s.into_bytes();
        let mut d = Deserializer::from_slice(&bytes);
        assert_eq!(d.read_u8().unwrap(), 7);
        assert_eq!(d.read_u32().unwrap(), 0xdead_beef);
        assert_eq!(d.read_i64().unwrap(), -42);
        assert_eq!(d.read_f64().unwrap(), 1.5);
        assert!(d.read_bool().unwrap());
        assert_eq!(d.read_string().unwrap(), "arbor");
        assert!(d.is_finished());
    }

    #[test]
    fn string_layout_is_length_prefixed() {
        let mut s = Serializer::new();
        s.write_str("ab");
        assert_eq!(s.as_bytes(), &[2, 0, 0, 0, 0, 0, 0, 0, b'a', b'b']);
    }

    #[test]
    fn nested_vectors() {
        let data = vec![vec![1u64, 2], vec![], vec![3]];
        let mut s = Serializer::new();
        s.write(&data);

        let bytes = s.into_bytes();
        let decoded: Vec<Vec<u64>> = Deserializer::from_slice(&bytes).read().unwrap();
        assert_eq!(decoded, data);
    }

    #[test]
    fn short_input_fails() {
        let mut d = Deserializer::from_slice(&[1, 2, 3]);
        assert!(matches!(
            d.read_u64(),
            Err(CoreError::InvalidFormat { .. })
        ));
    }

    #[test]
    fn absurd_length_is_rejected() {
        let mut s = Serializer::new();
        s.write_u64(u64::MAX);
        let bytes = s.into_bytes();
        let mut d = Deserializer::from_slice(&bytes);
        assert!(d.read_bytes().is_err());
    }

    #[test]
    fn invalid_bool_rejected() {
        let mut d = Deserializer::from_slice(&[2]);
        assert!(d.read_bool().is_err());
    }
}
