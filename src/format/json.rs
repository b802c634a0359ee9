use std::marker::PhantomData;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::format::{Format, FormatError};

#[derive(Debug)]
pub struct JSON<T>(pub(crate) PhantomData<T>);

impl<T: Serialize + DeserializeOwned> Format for JSON<T> {
    type Item = T;

    fn serialize(v: &Self::Item) -> Result<Bytes, FormatError> {
        Ok(Bytes::from(serde_json::to_vec(v)?))
    }

    fn deserialize(v: &[u8]) -> Result<Self::Item, FormatError> {
        Ok(serde_json::from_slice(v)?)
    }
}
