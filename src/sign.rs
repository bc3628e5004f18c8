//! Per-variant signing.
//!
//! Every variant is hashed with SHA-256 over its exact UTF-8 bytes. The
//! result is stored in a table keyed by the value a verifier can recompute
//! from the holder's answers:
//!
//! ```text
//! RSA  : key = base64(sha256(text))      signature = RSA-PKCS#1v1.5(sha256(text))
//! HMAC : key = hex(hmac(k, text))        signature = hmac(k, text)
//!        k = PBKDF2(secret, salt), salt fresh per signing call
//! ```

use std::collections::BTreeMap;

use base64::{Engine as _, engine::general_purpose::STANDARD};
use hmac::{Hmac, Mac};
use rsa::{Pkcs1v15Sign, RsaPrivateKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info};
use zeroize::Zeroizing;

use crate::crypto::{KEY_LEN, KdfParams, SALT_LEN, derive_key, generate_salt};
use crate::error::{Error, Result};
use crate::template::{FreeTextPolicy, Template, Variant};

type HmacSha256 = Hmac<Sha256>;

/// Length of a SHA-256 digest.
pub const DIGEST_LEN: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignatureAlgorithm {
    #[serde(rename = "RSA", alias = "RSA-SHA256")]
    RsaSha256,
    #[serde(rename = "HMAC-SHA256 (hex)", alias = "HMAC-SHA256")]
    HmacSha256,
}

impl SignatureAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignatureAlgorithm::RsaSha256 => "RSA-SHA256",
            SignatureAlgorithm::HmacSha256 => "HMAC-SHA256",
        }
    }

    /// RSA signs free-text markers verbatim; HMAC signs with them removed.
    pub fn free_text_policy(&self) -> FreeTextPolicy {
        match self {
            SignatureAlgorithm::RsaSha256 => FreeTextPolicy::Keep,
            SignatureAlgorithm::HmacSha256 => FreeTextPolicy::Strip,
        }
    }
}

/// Salt and KDF cost an HMAC table was signed with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HmacParams {
    pub salt: [u8; SALT_LEN],
    pub kdf: KdfParams,
}

/// SHA-256 of the variant text, no normalisation.
pub fn digest(text: &str) -> [u8; DIGEST_LEN] {
    Sha256::digest(text.as_bytes()).into()
}

pub(crate) fn hmac_sha256(key: &[u8], text: &str) -> Result<[u8; DIGEST_LEN]> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(key)
        .map_err(|_| Error::KeyDerivationFailure("HMAC key rejected".into()))?;
    mac.update(text.as_bytes());
    Ok(mac.finalize().into_bytes().into())
}

pub enum Signer {
    Rsa(RsaPrivateKey),
    Hmac {
        secret: Zeroizing<String>,
        kdf: KdfParams,
    },
}

impl Signer {
    pub fn hmac(secret: impl Into<String>, kdf: KdfParams) -> Result<Self> {
        let secret = Zeroizing::new(secret.into());
        if secret.is_empty() {
            return Err(Error::KeyUnavailable("HMAC secret is empty".into()));
        }
        Ok(Signer::Hmac { secret, kdf })
    }

    pub fn algorithm(&self) -> SignatureAlgorithm {
        match self {
            Signer::Rsa(_) => SignatureAlgorithm::RsaSha256,
            Signer::Hmac { .. } => SignatureAlgorithm::HmacSha256,
        }
    }

    /// Prepares key material for one signing call. For HMAC this draws the
    /// call's salt and derives the MAC key once.
    pub fn session(&self) -> Result<SigningSession<'_>> {
        let key = match self {
            Signer::Rsa(key) => SessionKey::Rsa(key),
            Signer::Hmac { secret, kdf } => {
                let salt = generate_salt()?;
                let key = derive_key(secret, &salt, *kdf)?;
                SessionKey::Hmac {
                    key,
                    params: HmacParams { salt, kdf: *kdf },
                }
            }
        };
        Ok(SigningSession { key })
    }
}

enum SessionKey<'a> {
    Rsa(&'a RsaPrivateKey),
    Hmac {
        key: Zeroizing<[u8; KEY_LEN]>,
        params: HmacParams,
    },
}

pub struct SigningSession<'a> {
    key: SessionKey<'a>,
}

impl SigningSession<'_> {
    pub fn algorithm(&self) -> SignatureAlgorithm {
        match self.key {
            SessionKey::Rsa(_) => SignatureAlgorithm::RsaSha256,
            SessionKey::Hmac { .. } => SignatureAlgorithm::HmacSha256,
        }
    }

    pub fn hmac_params(&self) -> Option<HmacParams> {
        match &self.key {
            SessionKey::Hmac { params, .. } => Some(*params),
            SessionKey::Rsa(_) => None,
        }
    }

    pub fn sign(&self, variant_text: &str) -> Result<SignedEntry> {
        let digest = digest(variant_text);
        let signature = match &self.key {
            SessionKey::Rsa(key) => key
                .sign(Pkcs1v15Sign::new::<Sha256>(), &digest)
                .map_err(|e| Error::KeyUnavailable(format!("private key cannot sign: {e}")))?,
            SessionKey::Hmac { key, .. } => hmac_sha256(key.as_ref(), variant_text)?.to_vec(),
        };

        Ok(SignedEntry {
            text: variant_text.to_string(),
            digest,
            signature,
            algorithm: self.algorithm(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedEntry {
    text: String,
    digest: [u8; DIGEST_LEN],
    signature: Vec<u8>,
    algorithm: SignatureAlgorithm,
}

impl SignedEntry {
    pub fn new(
        text: String,
        digest: [u8; DIGEST_LEN],
        signature: Vec<u8>,
        algorithm: SignatureAlgorithm,
    ) -> Self {
        Self {
            text,
            digest,
            signature,
            algorithm,
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn digest(&self) -> &[u8; DIGEST_LEN] {
        &self.digest
    }

    pub fn signature(&self) -> &[u8] {
        &self.signature
    }

    pub fn algorithm(&self) -> SignatureAlgorithm {
        self.algorithm
    }

    /// Key under which this entry is stored and looked up.
    pub fn lookup_key(&self) -> String {
        match self.algorithm {
            SignatureAlgorithm::RsaSha256 => STANDARD.encode(self.digest),
            SignatureAlgorithm::HmacSha256 => hex::encode(&self.signature),
        }
    }

    /// Signature as persisted: base64 for RSA, lowercase hex for HMAC.
    pub fn encoded_signature(&self) -> String {
        match self.algorithm {
            SignatureAlgorithm::RsaSha256 => STANDARD.encode(&self.signature),
            SignatureAlgorithm::HmacSha256 => hex::encode(&self.signature),
        }
    }
}

/// Signed variants of one template, keyed by digest (RSA) or MAC (HMAC).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTable {
    algorithm: SignatureAlgorithm,
    hmac: Option<HmacParams>,
    entries: BTreeMap<String, SignedEntry>,
}

impl SignedTable {
    pub fn new(algorithm: SignatureAlgorithm, hmac: Option<HmacParams>) -> Result<Self> {
        match (algorithm, hmac.is_some()) {
            (SignatureAlgorithm::HmacSha256, false) => {
                Err(Error::record("HMAC table requires a salt"))
            }
            (SignatureAlgorithm::RsaSha256, true) => {
                Err(Error::record("RSA table must not carry HMAC parameters"))
            }
            _ => Ok(Self {
                algorithm,
                hmac,
                entries: BTreeMap::new(),
            }),
        }
    }

    /// Stores `entry` under its own lookup key.
    pub fn insert(&mut self, entry: SignedEntry) -> Result<()> {
        let key = entry.lookup_key();
        self.insert_keyed(key, entry)
    }

    /// Stores `entry` under an explicit key, as read back from a record.
    pub fn insert_keyed(&mut self, key: String, entry: SignedEntry) -> Result<()> {
        if entry.algorithm != self.algorithm {
            return Err(Error::AlgorithmMismatch {
                expected: self.algorithm.as_str(),
                found: entry.algorithm.as_str(),
            });
        }
        if let Some(existing) = self.entries.get(&key) {
            if existing.text != entry.text {
                return Err(Error::GenericFailure(format!(
                    "two different variants share the lookup key {key}"
                )));
            }
        }
        self.entries.insert(key, entry);
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&SignedEntry> {
        self.entries.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &SignedEntry)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn algorithm(&self) -> SignatureAlgorithm {
        self.algorithm
    }

    pub fn hmac_params(&self) -> Option<&HmacParams> {
        self.hmac.as_ref()
    }
}

/// Signs one variant within an open session.
pub fn sign(variant_text: &str, session: &SigningSession<'_>) -> Result<SignedEntry> {
    session.sign(variant_text)
}

/// Signs every variant under one session. HMAC variants share one salt.
pub fn sign_all(variants: &[Variant], signer: &Signer) -> Result<SignedTable> {
    let session = signer.session()?;
    let mut table = SignedTable::new(session.algorithm(), session.hmac_params())?;

    for variant in variants {
        table.insert(session.sign(variant.text())?)?;
    }

    info!(
        algorithm = session.algorithm().as_str(),
        variants = variants.len(),
        entries = table.len(),
        "signed template variants"
    );
    Ok(table)
}

/// Parses and expands `text` with the signer's free-text convention, then signs
/// every variant. Template errors surface before any signing happens.
pub fn sign_template(text: &str, signer: &Signer) -> Result<(Template, SignedTable)> {
    let template = Template::parse(text)?;
    let variants = template.expand(signer.algorithm().free_text_policy());
    debug!(variants = variants.len(), "signing expanded template");
    let table = sign_all(&variants, signer)?;
    Ok((template, table))
}
