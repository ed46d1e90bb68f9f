//! Big-endian binary codec shared by records and shuffle keys.
//!
//! Layout of the primitives:
//! - integers are fixed width, big-endian
//! - strings are a `u16` byte length followed by UTF-8 bytes
//! - blobs are an `i32` byte length followed by the raw bytes

use crate::error::FormatError;

/// A value with a fixed binary layout.
pub trait Wire: Sized {
    fn write_to(&self, out: &mut Vec<u8>) -> Result<(), FormatError>;
    fn read_from(reader: &mut WireReader<'_>) -> Result<Self, FormatError>;

    fn encode(&self) -> Result<Vec<u8>, FormatError> {
        let mut out = Vec::new();
        self.write_to(&mut out)?;
        Ok(out)
    }

    /// Decodes exactly one value; leftover bytes are an error.
    fn decode(bytes: &[u8]) -> Result<Self, FormatError> {
        let mut reader = WireReader::new(bytes);
        let value = Self::read_from(&mut reader)?;
        reader.finish()?;
        Ok(value)
    }
}

/// Cursor over a byte slice that never reads past the end.
pub struct WireReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> WireReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self { Self { buf, pos: 0 } }

    pub fn remaining(&self) -> usize { self.buf.len() - self.pos }

    pub fn finish(&self) -> Result<(), FormatError> {
        match self.remaining() {
            0 => Ok(()),
            n => Err(FormatError::TrailingBytes(n)),
        }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], FormatError> {
        if n > self.remaining() {
            return Err(FormatError::Truncated { needed: n, available: self.remaining() });
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N], FormatError> {
        let mut arr = [0u8; N];
        arr.copy_from_slice(self.take(N)?);
        Ok(arr)
    }

    pub fn read_u8(&mut self) -> Result<u8, FormatError> { Ok(self.take_array::<1>()?[0]) }
    pub fn read_u16(&mut self) -> Result<u16, FormatError> { Ok(u16::from_be_bytes(self.take_array()?)) }
    pub fn read_i32(&mut self) -> Result<i32, FormatError> { Ok(i32::from_be_bytes(self.take_array()?)) }
    pub fn read_u32(&mut self) -> Result<u32, FormatError> { Ok(u32::from_be_bytes(self.take_array()?)) }
    pub fn read_i64(&mut self) -> Result<i64, FormatError> { Ok(i64::from_be_bytes(self.take_array()?)) }

    pub fn read_str(&mut self) -> Result<String, FormatError> {
        let len = self.read_u16()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| FormatError::InvalidUtf8)
    }

    pub fn read_blob(&mut self) -> Result<Vec<u8>, FormatError> {
        let len = self.read_i32()?;
        if len < 0 {
            return Err(FormatError::NegativeLength(len));
        }
        Ok(self.take(len as usize)?.to_vec())
    }
}

pub fn write_str(out: &mut Vec<u8>, s: &str) -> Result<(), FormatError> {
    let len = u16::try_from(s.len()).map_err(|_| FormatError::StringTooLong(s.len()))?;
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(s.as_bytes());
    Ok(())
}

pub fn write_blob(out: &mut Vec<u8>, blob: &[u8]) -> Result<(), FormatError> {
    let len = i32::try_from(blob.len()).map_err(|_| FormatError::BlobTooLong(blob.len()))?;
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(blob);
    Ok(())
}

impl Wire for u32 {
    fn write_to(&self, out: &mut Vec<u8>) -> Result<(), FormatError> {
        out.extend_from_slice(&self.to_be_bytes());
        Ok(())
    }
    fn read_from(reader: &mut WireReader<'_>) -> Result<Self, FormatError> { reader.read_u32() }
}

impl Wire for i64 {
    fn write_to(&self, out: &mut Vec<u8>) -> Result<(), FormatError> {
        out.extend_from_slice(&self.to_be_bytes());
        Ok(())
    }
    fn read_from(reader: &mut WireReader<'_>) -> Result<Self, FormatError> { reader.read_i64() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_layout_is_u16_prefixed() {
        let mut out = Vec::new();
        write_str(&mut out, "ab").unwrap();
        assert_eq!(out, vec![0, 2, b'a', b'b']);
        let mut r = WireReader::new(&out);
        assert_eq!(r.read_str().unwrap(), "ab");
        r.finish().unwrap();
    }

    #[test]
    fn oversized_string_is_rejected() {
        let s = "x".repeat(u16::MAX as usize + 1);
        let mut out = Vec::new();
        assert_eq!(write_str(&mut out, &s), Err(FormatError::StringTooLong(s.len())));
    }

    #[test]
    fn blob_length_past_end_is_truncated() {
        let mut bytes = 10i32.to_be_bytes().to_vec();
        bytes.extend_from_slice(&[1, 2, 3]);
        let mut r = WireReader::new(&bytes);
        assert_eq!(r.read_blob(), Err(FormatError::Truncated { needed: 10, available: 3 }));
    }

    #[test]
    fn negative_blob_length() {
        let bytes = (-1i32).to_be_bytes();
        assert_eq!(WireReader::new(&bytes).read_blob(), Err(FormatError::NegativeLength(-1)));
    }

    #[test]
    fn invalid_utf8() {
        let bytes = [0u8, 2, 0xff, 0xfe];
        assert_eq!(WireReader::new(&bytes).read_str(), Err(FormatError::InvalidUtf8));
    }

    #[test]
    fn decode_rejects_trailing_bytes() {
        let bytes = [0u8, 0, 0, 7, 9];
        assert_eq!(u32::decode(&bytes), Err(FormatError::TrailingBytes(1)));
        assert_eq!(u32::decode(&bytes[..4]), Ok(7));
    }
}
