use bytes::Bytes;

use crate::format::{Format, FormatError};

/// Opaque payload bytes, passed through untouched.
#[derive(Debug)]
pub struct Raw;

impl Format for Raw {
    type Item = Bytes;

    fn serialize(v: &Self::Item) -> Result<Bytes, FormatError> {
        Ok(v.clone())
    }

    fn deserialize(v: &[u8]) -> Result<Self::Item, FormatError> {
        Ok(Bytes::copy_from_slice(v))
    }
}

/// UTF-8 string keys. Invalid sequences are replaced rather than rejected.
#[derive(Debug)]
pub struct Str;

impl Format for Str {
    type Item = String;

    fn serialize(v: &Self::Item) -> Result<Bytes, FormatError> {
        Ok(Bytes::copy_from_slice(v.as_bytes()))
    }

    fn deserialize(v: &[u8]) -> Result<Self::Item, FormatError> {
        Ok(String::from_utf8_lossy(v).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn str_replaces_invalid_utf8() {
        let key = Str::deserialize(&[b'a', 0xff, b'b']).unwrap();
        assert_eq!(key, "a\u{fffd}b");
    }

    #[test]
    fn raw_keeps_bytes() {
        let payload = Raw::deserialize(&[0, 159, 146, 150]).unwrap();
        assert_eq!(&payload[..], &[0, 159, 146, 150]);
    }
}
