use bytes::Bytes;

use crate::model::{decode_object, OutcomeRecord, PrimaryRecord};

/// Keeps certificates that are not under manual review. Tombstones pass.
pub fn keep_primary(payload: Option<&Bytes>) -> Result<bool, serde_json::Error> {
    match payload {
        None => Ok(true),
        Some(bytes) => {
            let rec: PrimaryRecord = decode_object(bytes)?;
            Ok(!rec.under_review())
        }
    }
}

/// Keeps outcomes that are not under manual review. Tombstones are dropped.
pub fn keep_outcome(payload: Option<&Bytes>) -> Result<bool, serde_json::Error> {
    match payload {
        None => Ok(false),
        Some(bytes) => {
            let rec: OutcomeRecord = decode_object(bytes)?;
            Ok(!rec.under_review())
        }
    }
}
