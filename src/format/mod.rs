use bytes::Bytes;
use thiserror::Error;

pub mod json;
pub mod raw;

#[derive(Debug, Error)]
pub enum FormatError {
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid windowed key: {0}")]
    WindowedKey(String),
}

/// Serialization of record keys and values to and from wire bytes.
pub trait Format {
    type Item;
    fn serialize(v: &Self::Item) -> Result<Bytes, FormatError>;
    fn deserialize(v: &[u8]) -> Result<Self::Item, FormatError>;
}
