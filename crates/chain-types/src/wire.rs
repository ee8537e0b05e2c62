//! Deterministic, little-endian binary encoding for the wire types in this
//! crate.
//!
//! Fixed-width integers are little-endian; variable-length quantities
//! (string/byte lengths) are ULEB128, delegated to [`prost::encoding`]'s
//! varint primitives rather than hand-rolled, since it is already a
//! workspace dependency and its varint implementation is exactly LEB128.

use bytes::{
    Buf,
    BufMut,
};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum WireError {
    #[error("unexpected end of buffer while decoding {0}")]
    UnexpectedEof(&'static str),
    #[error("length-prefixed field {0} declared {1} bytes but only {2} remained")]
    TruncatedField(&'static str, u64, usize),
    #[error("varint for {0} did not fit in memory (> usize::MAX)")]
    VarintOverflow(&'static str),
    #[error("invalid UTF-8 in field {0}")]
    InvalidUtf8(&'static str),
    #[error("unknown enum discriminant {1} for {0}")]
    UnknownDiscriminant(&'static str, u32),
}

pub type Result<T> = std::result::Result<T, WireError>;

/// Writes `value` as a ULEB128 varint.
pub fn put_varint(buf: &mut impl BufMut, value: u64) {
    prost::encoding::encode_varint(value, buf);
}

/// Reads a ULEB128 varint.
///
/// # Errors
/// Returns [`WireError::UnexpectedEof`] if `buf` is exhausted before the
/// varint terminates.
pub fn get_varint(buf: &mut impl Buf, field: &'static str) -> Result<u64> {
    prost::encoding::decode_varint(buf).map_err(|_| WireError::UnexpectedEof(field))
}

/// Writes a length-prefixed byte string: a ULEB128 length followed by the
/// raw bytes.
pub fn put_bytes(buf: &mut impl BufMut, bytes: &[u8]) {
    put_varint(buf, bytes.len() as u64);
    buf.put_slice(bytes);
}

/// Reads a length-prefixed byte string.
///
/// # Errors
/// Returns [`WireError::TruncatedField`] if fewer bytes remain than the
/// declared length.
pub fn get_bytes(buf: &mut impl Buf, field: &'static str) -> Result<Vec<u8>> {
    let len = get_varint(buf, field)?;
    let len_usize = usize::try_from(len).map_err(|_| WireError::VarintOverflow(field))?;
    if buf.remaining() < len_usize {
        return Err(WireError::TruncatedField(field, len, buf.remaining()));
    }
    let mut out = vec![0_u8; len_usize];
    buf.copy_to_slice(&mut out);
    Ok(out)
}

/// Writes a length-prefixed UTF-8 string.
pub fn put_string(buf: &mut impl BufMut, s: &str) {
    put_bytes(buf, s.as_bytes());
}

/// Reads a length-prefixed UTF-8 string.
///
/// # Errors
/// Returns [`WireError::InvalidUtf8`] if the decoded bytes are not valid
/// UTF-8, or any error from [`get_bytes`].
pub fn get_string(buf: &mut impl Buf, field: &'static str) -> Result<String> {
    let bytes = get_bytes(buf, field)?;
    String::from_utf8(bytes).map_err(|_| WireError::InvalidUtf8(field))
}

/// A type with a canonical, deterministic binary wire encoding.
pub trait Encode {
    fn encode(&self, buf: &mut impl BufMut);

    fn encode_to_vec(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.encode(&mut buf);
        buf
    }
}

/// The decoding half of [`Encode`].
pub trait Decode: Sized {
    /// # Errors
    /// Returns a [`WireError`] if `buf` does not contain a valid encoding
    /// of `Self`.
    fn decode(buf: &mut impl Buf) -> Result<Self>;
}
