//! On-disk JSON records.
//!
//! Key bundles use PascalCase field names; signed documents use snake_case.
//! Binary fields are standard base64 unless noted otherwise.

use base64::{Engine as _, engine::general_purpose::STANDARD};
use serde::{Serialize, de::DeserializeOwned};

use crate::error::{Error, Result};

pub mod document;
pub mod keys;

pub use document::{FREE_TEXT, PlaceholderEntry, SignedDocument, SignedRecord};
pub use keys::{HmacKeyRecord, PrivateKeyRecord, PublicKeyRecord, SealingRecord};

/// Parses a JSON record, reporting any shape error as a malformed record.
pub fn parse<T: DeserializeOwned>(data: &[u8]) -> Result<T> {
    serde_json::from_slice(data).map_err(|e| Error::record(e.to_string()))
}

/// Serializes a record as pretty-printed JSON.
pub fn serialize<T: Serialize>(record: &T) -> Result<Vec<u8>> {
    serde_json::to_vec_pretty(record)
        .map_err(|e| Error::GenericFailure(format!("failed to serialize record: {e}")))
}

pub(crate) fn encode_b64(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

pub(crate) fn decode_b64(field: &str, value: &str) -> Result<Vec<u8>> {
    STANDARD
        .decode(value.trim())
        .map_err(|e| Error::record(format!("{field} is not valid base64: {e}")))
}

pub(crate) fn decode_b64_array<const N: usize>(field: &str, value: &str) -> Result<[u8; N]> {
    let bytes = decode_b64(field, value)?;
    let len = bytes.len();
    bytes
        .try_into()
        .map_err(|_| Error::record(format!("{field} must be {N} bytes, got {len}")))
}
