//! Key bundle records.
//!
//! ```text
//! private : { EncryptedSecretKey, Salt, CipherMode, Iv | Nonce, Iterations?, KeySize?, Created? }
//! hmac    : { EncryptedHmacKey,   Salt, CipherMode, Iv | Nonce, Iterations?, KeySize?, Created? }
//! public  : { PublicKey }
//! ```
//!
//! `Iterations` defaults to 100000 when absent.

use chrono::{DateTime, Utc};
use rsa::RsaPublicKey;
use serde::{Deserialize, Serialize};

use super::{decode_b64, decode_b64_array, encode_b64};
use crate::crypto::kdf::MIN_ITERATIONS;
use crate::crypto::{CipherMode, KdfParams, SealedSecret, Sealing};
use crate::error::{Error, Result};
use crate::keys::{
    HmacKeyBundle, HmacKeySize, KeyBundle, RsaKeySize, encode_public_key, parse_public_key,
};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct SealingRecord {
    #[serde(default, alias = "IV", skip_serializing_if = "Option::is_none")]
    pub iv: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
    pub salt: String,
    pub cipher_mode: CipherMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iterations: Option<u32>,
}

impl SealingRecord {
    fn from_sealed(sealed: &SealedSecret) -> Self {
        let encoded = encode_b64(sealed.sealing().iv_or_nonce());
        let (iv, nonce) = match sealed.sealing() {
            Sealing::Cbc { .. } => (Some(encoded), None),
            Sealing::Ctr { .. } => (None, Some(encoded)),
        };
        Self {
            iv,
            nonce,
            salt: encode_b64(sealed.salt()),
            cipher_mode: sealed.cipher_mode(),
            iterations: Some(sealed.kdf().iterations()),
        }
    }

    fn to_sealed(&self, ciphertext: &str) -> Result<SealedSecret> {
        let (field, value) = match self.cipher_mode {
            CipherMode::Aes256Cbc => ("Iv", self.iv.as_deref()),
            CipherMode::Aes256Ctr => ("Nonce", self.nonce.as_deref()),
        };
        let value = value.ok_or_else(|| {
            Error::record(format!("{} bundle is missing {field}", self.cipher_mode))
        })?;
        let sealing = Sealing::from_parts(self.cipher_mode, &decode_b64(field, value)?)?;
        let salt = decode_b64_array("Salt", &self.salt)?;
        let kdf = KdfParams::new(self.iterations.unwrap_or(MIN_ITERATIONS))?;

        SealedSecret::from_parts(kdf, salt, sealing, decode_b64("ciphertext", ciphertext)?)
    }
}

fn parse_created(created: Option<&str>) -> Result<Option<DateTime<Utc>>> {
    created
        .map(|s| {
            DateTime::parse_from_rfc3339(s)
                .map(|d| d.with_timezone(&Utc))
                .map_err(|e| Error::record(format!("Created is not RFC 3339: {e}")))
        })
        .transpose()
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct PrivateKeyRecord {
    #[serde(alias = "EncryptedPrivateKey")]
    pub encrypted_secret_key: String,
    #[serde(flatten)]
    pub sealing: SealingRecord,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_size: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<String>,
}

impl PrivateKeyRecord {
    pub fn from_bundle(bundle: &KeyBundle) -> Self {
        let sealed = bundle.sealed_private_key();
        Self {
            encrypted_secret_key: encode_b64(sealed.ciphertext()),
            sealing: SealingRecord::from_sealed(sealed),
            key_size: Some(bundle.key_size().bits() as u32),
            created: Some(bundle.created().to_rfc3339()),
        }
    }

    /// The recorded modulus size, if any, checked against the supported sizes.
    pub fn key_size(&self) -> Result<Option<RsaKeySize>> {
        self.key_size.map(RsaKeySize::try_from).transpose()
    }

    pub fn sealed_key(&self) -> Result<SealedSecret> {
        self.key_size()?;
        parse_created(self.created.as_deref())?;
        self.sealing.to_sealed(&self.encrypted_secret_key)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PublicKeyRecord {
    #[serde(rename = "PublicKey", alias = "publicKey")]
    pub public_key: String,
}

impl PublicKeyRecord {
    pub fn from_bundle(bundle: &KeyBundle) -> Self {
        Self {
            public_key: encode_b64(bundle.public_key_der()),
        }
    }

    pub fn from_key(key: &RsaPublicKey) -> Result<Self> {
        Ok(Self {
            public_key: encode_public_key(key)?,
        })
    }

    pub fn to_public_key(&self) -> Result<RsaPublicKey> {
        parse_public_key(&self.public_key)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct HmacKeyRecord {
    pub encrypted_hmac_key: String,
    #[serde(flatten)]
    pub sealing: SealingRecord,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_size: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<String>,
}

impl HmacKeyRecord {
    pub fn from_bundle(bundle: &HmacKeyBundle) -> Self {
        Self {
            encrypted_hmac_key: encode_b64(bundle.sealed().ciphertext()),
            sealing: SealingRecord::from_sealed(bundle.sealed()),
            key_size: bundle.key_size().map(|s| s.bits()),
            created: bundle.created().map(|c| c.to_rfc3339()),
        }
    }

    pub fn to_bundle(&self) -> Result<HmacKeyBundle> {
        let sealed = self.sealing.to_sealed(&self.encrypted_hmac_key)?;
        let key_size = self.key_size.map(HmacKeySize::try_from).transpose()?;
        let created = parse_created(self.created.as_deref())?;
        Ok(HmacKeyBundle::from_parts(sealed, key_size, created))
    }
}
