//! Signed document record.
//!
//! ```json
//! {
//!   "original": "Dear [name], you are [role:Admin,User].",
//!   "placeholders": { "name": "Free Text", "role": ["Admin", "User"] },
//!   "signed_combinations": {
//!     "<lookup key>": { "text": "...", "signature": "...", "hash": "<b64 sha256>" }
//!   },
//!   "signature_algorithm": "RSA" | "HMAC-SHA256 (hex)",
//!   "salt": "<b64, HMAC only>",
//!   "kdf_iterations": 100000
//! }
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::{decode_b64, decode_b64_array, encode_b64};
use crate::crypto::KdfParams;
use crate::crypto::kdf::MIN_ITERATIONS;
use crate::error::{Error, Result};
use crate::sign::{self, HmacParams, SignatureAlgorithm, SignedEntry, SignedTable};
use crate::template::{PlaceholderKind, Template};

/// Marker written for free-text placeholders.
pub const FREE_TEXT: &str = "Free Text";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(untagged)]
pub enum PlaceholderEntry {
    Options(Vec<String>),
    FreeText(String),
}

impl PlaceholderEntry {
    fn from_kind(kind: &PlaceholderKind) -> Self {
        match kind {
            PlaceholderKind::FreeText => PlaceholderEntry::FreeText(FREE_TEXT.to_string()),
            PlaceholderKind::FixedOptions(options) => PlaceholderEntry::Options(options.clone()),
        }
    }

    fn matches(&self, kind: &PlaceholderKind) -> bool {
        match (self, kind) {
            (PlaceholderEntry::FreeText(_), PlaceholderKind::FreeText) => true,
            (PlaceholderEntry::Options(listed), PlaceholderKind::FreeText) => listed.is_empty(),
            (PlaceholderEntry::Options(listed), PlaceholderKind::FixedOptions(options)) => {
                listed == options
            }
            (PlaceholderEntry::FreeText(_), PlaceholderKind::FixedOptions(_)) => false,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SignedRecord {
    pub text: String,
    /// Base64 for RSA, lowercase hex for HMAC.
    #[serde(alias = "hmac")]
    pub signature: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SignedDocument {
    pub original: String,
    pub placeholders: BTreeMap<String, PlaceholderEntry>,
    pub signed_combinations: BTreeMap<String, SignedRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature_algorithm: Option<SignatureAlgorithm>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub salt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kdf_iterations: Option<u32>,
}

impl SignedDocument {
    pub fn new(template: &Template, table: &SignedTable) -> Self {
        let placeholders = template
            .placeholders()
            .iter()
            .map(|p| (p.name().to_string(), PlaceholderEntry::from_kind(p.kind())))
            .collect();

        let signed_combinations = table
            .iter()
            .map(|(key, entry)| {
                let record = SignedRecord {
                    text: entry.text().to_string(),
                    signature: entry.encoded_signature(),
                    hash: Some(encode_b64(entry.digest())),
                };
                (key.clone(), record)
            })
            .collect();

        let hmac = table.hmac_params();
        Self {
            original: template.text().to_string(),
            placeholders,
            signed_combinations,
            signature_algorithm: Some(table.algorithm()),
            salt: hmac.map(|p| encode_b64(&p.salt)),
            kdf_iterations: hmac.map(|p| p.kdf.iterations()),
        }
    }

    /// Parses a document and checks it is consistent with its own template.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let document: Self = super::parse(data)?;
        document.template()?;
        Ok(document)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        super::serialize(self)
    }

    /// Explicit algorithm, or HMAC when a salt is present and RSA otherwise.
    pub fn algorithm(&self) -> SignatureAlgorithm {
        self.signature_algorithm.unwrap_or(if self.salt.is_some() {
            SignatureAlgorithm::HmacSha256
        } else {
            SignatureAlgorithm::RsaSha256
        })
    }

    /// Re-parses `original` and checks the placeholder listing agrees with it.
    pub fn template(&self) -> Result<Template> {
        let template = Template::parse(self.original.as_str())?;

        for placeholder in template.placeholders() {
            match self.placeholders.get(placeholder.name()) {
                Some(entry) if entry.matches(placeholder.kind()) => {}
                Some(_) => {
                    return Err(Error::record(format!(
                        "placeholder '{}' does not match the template",
                        placeholder.name()
                    )));
                }
                None => {
                    return Err(Error::record(format!(
                        "placeholder '{}' is not listed",
                        placeholder.name()
                    )));
                }
            }
        }
        if self.placeholders.len() != template.placeholders().len() {
            return Err(Error::record("placeholders lists names not in the template"));
        }

        Ok(template)
    }

    /// Decodes the signed combinations into a lookup table.
    pub fn table(&self) -> Result<SignedTable> {
        let algorithm = self.algorithm();
        let hmac = match algorithm {
            SignatureAlgorithm::RsaSha256 => None,
            SignatureAlgorithm::HmacSha256 => {
                let salt = self
                    .salt
                    .as_deref()
                    .ok_or_else(|| Error::record("HMAC document has no salt"))?;
                Some(HmacParams {
                    salt: decode_b64_array("salt", salt)?,
                    kdf: KdfParams::new(self.kdf_iterations.unwrap_or(MIN_ITERATIONS))?,
                })
            }
        };

        let mut table = SignedTable::new(algorithm, hmac)?;
        for (key, record) in &self.signed_combinations {
            let digest = sign::digest(&record.text);
            if let Some(hash) = &record.hash {
                if decode_b64_array::<{ sign::DIGEST_LEN }>("hash", hash)? != digest {
                    return Err(Error::record(format!(
                        "hash of entry {key} does not match its text"
                    )));
                }
            }

            let signature = match algorithm {
                SignatureAlgorithm::RsaSha256 => {
                    if *key != encode_b64(&digest) {
                        return Err(Error::record(format!(
                            "entry {key} is not keyed by the digest of its text"
                        )));
                    }
                    decode_b64("signature", &record.signature)?
                }
                SignatureAlgorithm::HmacSha256 => hex::decode(&record.signature)
                    .map_err(|e| Error::record(format!("signature is not hex: {e}")))?,
            };

            table.insert_keyed(
                key.clone(),
                SignedEntry::new(record.text.clone(), digest, signature, algorithm),
            )?;
        }

        Ok(table)
    }
}
