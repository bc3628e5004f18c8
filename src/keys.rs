//! RSA and HMAC key material: generation, sealing, unsealing and import.

use base64::{Engine as _, engine::general_purpose::STANDARD};
use chrono::{DateTime, Utc};
use rsa::pkcs1::{DecodeRsaPublicKey, EncodeRsaPublicKey};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey};
use rsa::traits::PublicKeyParts;
use rsa::{BigUint, RsaPrivateKey, RsaPublicKey};
use tracing::{info, warn};
use zeroize::Zeroizing;

use crate::crypto::cipher::secure_random;
use crate::crypto::{CipherMode, KdfParams, SealedSecret};
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RsaKeySize {
    Bits2048,
    Bits3072,
    Bits4096,
}

impl RsaKeySize {
    pub fn bits(&self) -> usize {
        match self {
            RsaKeySize::Bits2048 => 2048,
            RsaKeySize::Bits3072 => 3072,
            RsaKeySize::Bits4096 => 4096,
        }
    }
}

impl TryFrom<u32> for RsaKeySize {
    type Error = Error;

    fn try_from(bits: u32) -> Result<Self> {
        match bits {
            2048 => Ok(RsaKeySize::Bits2048),
            3072 => Ok(RsaKeySize::Bits3072),
            4096 => Ok(RsaKeySize::Bits4096),
            other => Err(Error::UnsupportedKeySize(other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HmacKeySize {
    Bits128,
    Bits256,
    Bits512,
}

impl HmacKeySize {
    pub fn bits(&self) -> u32 {
        match self {
            HmacKeySize::Bits128 => 128,
            HmacKeySize::Bits256 => 256,
            HmacKeySize::Bits512 => 512,
        }
    }

    pub fn bytes(&self) -> usize {
        self.bits() as usize / 8
    }

    fn from_byte_len(len: usize) -> Option<Self> {
        match len {
            16 => Some(HmacKeySize::Bits128),
            32 => Some(HmacKeySize::Bits256),
            64 => Some(HmacKeySize::Bits512),
            _ => None,
        }
    }
}

impl TryFrom<u32> for HmacKeySize {
    type Error = Error;

    fn try_from(bits: u32) -> Result<Self> {
        match bits {
            128 => Ok(HmacKeySize::Bits128),
            256 => Ok(HmacKeySize::Bits256),
            512 => Ok(HmacKeySize::Bits512),
            other => Err(Error::UnsupportedKeySize(other)),
        }
    }
}

/// A fresh RSA key pair: the public half as SPKI DER, the private half as
/// PKCS#8 DER sealed under the password.
#[derive(Debug, Clone)]
pub struct KeyBundle {
    public_key: Vec<u8>,
    private_key: SealedSecret,
    key_size: RsaKeySize,
    created: DateTime<Utc>,
}

impl KeyBundle {
    pub fn generate(size: RsaKeySize, password: &str, mode: CipherMode) -> Result<Self> {
        Self::generate_with_kdf(size, password, mode, KdfParams::default())
    }

    pub fn generate_with_kdf(
        size: RsaKeySize,
        password: &str,
        mode: CipherMode,
        kdf: KdfParams,
    ) -> Result<Self> {
        if password.is_empty() {
            return Err(Error::KeyDerivationFailure("password must not be empty".into()));
        }

        let private = RsaPrivateKey::new(&mut rand::rngs::OsRng, size.bits())
            .map_err(|e| Error::GenericFailure(format!("RSA key generation failed: {e}")))?;
        let public_key = private
            .to_public_key()
            .to_public_key_der()
            .map_err(|e| Error::GenericFailure(format!("public key encoding failed: {e}")))?
            .as_bytes()
            .to_vec();
        let pkcs8 = private
            .to_pkcs8_der()
            .map_err(|e| Error::GenericFailure(format!("private key encoding failed: {e}")))?;

        let private_key = SealedSecret::seal(pkcs8.as_bytes(), password, mode, kdf)?;

        info!(bits = size.bits(), mode = %mode, "generated RSA key pair");

        Ok(Self {
            public_key,
            private_key,
            key_size: size,
            created: Utc::now(),
        })
    }

    pub fn public_key_der(&self) -> &[u8] {
        &self.public_key
    }

    pub fn public_key(&self) -> Result<RsaPublicKey> {
        RsaPublicKey::from_public_key_der(&self.public_key)
            .map_err(|e| Error::KeyImportFailed(format!("public key: {e}")))
    }

    pub fn sealed_private_key(&self) -> &SealedSecret {
        &self.private_key
    }

    pub fn cipher_mode(&self) -> CipherMode {
        self.private_key.cipher_mode()
    }

    pub fn key_size(&self) -> RsaKeySize {
        self.key_size
    }

    pub fn created(&self) -> DateTime<Utc> {
        self.created
    }

    /// Recovers the PKCS#8 DER private key.
    pub fn decrypt(&self, password: &str) -> Result<Zeroizing<Vec<u8>>> {
        decrypt_private_key(&self.private_key, password)
    }
}

/// Reads an unsealed private key: raw PKCS#8 DER, or the UTF-8 base64 text
/// of it as older bundles store.
fn import_pkcs8(plaintext: &[u8]) -> Option<(RsaPrivateKey, Zeroizing<Vec<u8>>)> {
    if let Ok(key) = RsaPrivateKey::from_pkcs8_der(plaintext) {
        return Some((key, Zeroizing::new(plaintext.to_vec())));
    }

    let text = std::str::from_utf8(plaintext).ok()?;
    let der = Zeroizing::new(STANDARD.decode(text.trim()).ok()?);
    let key = RsaPrivateKey::from_pkcs8_der(&der).ok()?;
    Some((key, der))
}

/// Unseals a private key and checks it parses as PKCS#8 before returning its
/// DER encoding.
pub fn decrypt_private_key(sealed: &SealedSecret, password: &str) -> Result<Zeroizing<Vec<u8>>> {
    sealed.open_with(password, |plaintext| import_pkcs8(plaintext).map(|(_, der)| der))
}

/// Unseals and imports a private key ready for signing.
pub fn unlock_signing_key(sealed: &SealedSecret, password: &str) -> Result<RsaPrivateKey> {
    sealed
        .open_with(password, |plaintext| import_pkcs8(plaintext).map(|(key, _)| key))
        .inspect_err(|e| warn!(error = %e, "could not unlock private key"))
}

/// Checks an unlocked key against the modulus size its bundle records.
pub fn check_key_size(key: &RsaPrivateKey, expected: RsaKeySize) -> Result<()> {
    let bits = key.size() * 8;
    if bits != expected.bits() {
        return Err(Error::KeyImportFailed(format!(
            "bundle records a {}-bit key but holds a {bits}-bit key",
            expected.bits()
        )));
    }
    Ok(())
}

/// Imports a public key given as base64 SPKI DER, base64 PKCS#1 DER, PEM, or
/// an `<RSAKeyValue>` XML element.
pub fn parse_public_key(encoded: &str) -> Result<RsaPublicKey> {
    let encoded = encoded.trim();
    if encoded.is_empty() {
        return Err(Error::KeyImportFailed("public key is empty".into()));
    }

    if encoded.starts_with('<') {
        return parse_xml_public_key(encoded);
    }

    if encoded.starts_with("-----BEGIN") {
        if let Ok(key) = RsaPublicKey::from_public_key_pem(encoded) {
            return Ok(key);
        }
        return RsaPublicKey::from_pkcs1_pem(encoded)
            .map_err(|e| Error::KeyImportFailed(format!("unrecognised PEM public key: {e}")));
    }

    let compact: String = encoded.chars().filter(|c| !c.is_whitespace()).collect();
    let der = STANDARD
        .decode(compact)
        .map_err(|e| Error::KeyImportFailed(format!("public key is not base64: {e}")))?;

    if let Ok(key) = RsaPublicKey::from_public_key_der(&der) {
        return Ok(key);
    }
    RsaPublicKey::from_pkcs1_der(&der)
        .map_err(|e| Error::KeyImportFailed(format!("neither SPKI nor PKCS#1: {e}")))
}

/// Base64 SPKI DER, the default exchange encoding.
pub fn encode_public_key(key: &RsaPublicKey) -> Result<String> {
    let der = key
        .to_public_key_der()
        .map_err(|e| Error::GenericFailure(format!("public key encoding failed: {e}")))?;
    Ok(STANDARD.encode(der.as_bytes()))
}

/// Base64 PKCS#1 DER, for consumers that expect a bare `RSAPublicKey`.
pub fn encode_public_key_pkcs1(key: &RsaPublicKey) -> Result<String> {
    let der = key
        .to_pkcs1_der()
        .map_err(|e| Error::GenericFailure(format!("public key encoding failed: {e}")))?;
    Ok(STANDARD.encode(der.as_bytes()))
}

pub fn public_key_to_xml(key: &RsaPublicKey) -> String {
    format!(
        "<RSAKeyValue><Modulus>{}</Modulus><Exponent>{}</Exponent></RSAKeyValue>",
        STANDARD.encode(key.n().to_bytes_be()),
        STANDARD.encode(key.e().to_bytes_be())
    )
}

fn parse_xml_public_key(xml: &str) -> Result<RsaPublicKey> {
    let modulus = xml_field(xml, "Modulus")?;
    let exponent = xml_field(xml, "Exponent")?;
    RsaPublicKey::new(
        BigUint::from_bytes_be(&modulus),
        BigUint::from_bytes_be(&exponent),
    )
    .map_err(|e| Error::KeyImportFailed(format!("invalid XML public key: {e}")))
}

fn xml_field(xml: &str, tag: &str) -> Result<Vec<u8>> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let start = xml
        .find(&open)
        .map(|i| i + open.len())
        .ok_or_else(|| Error::KeyImportFailed(format!("XML public key has no <{tag}>")))?;
    let end = xml[start..]
        .find(&close)
        .map(|i| i + start)
        .ok_or_else(|| Error::KeyImportFailed(format!("XML public key has no </{tag}>")))?;

    STANDARD
        .decode(xml[start..end].trim())
        .map_err(|e| Error::KeyImportFailed(format!("<{tag}> is not base64: {e}")))
}

/// A sealed HMAC secret. The secret is the base64 text of random key bytes,
/// which is what signers and verifiers type or pass in.
#[derive(Debug, Clone)]
pub struct HmacKeyBundle {
    sealed: SealedSecret,
    key_size: Option<HmacKeySize>,
    created: Option<DateTime<Utc>>,
}

impl HmacKeyBundle {
    pub fn from_parts(
        sealed: SealedSecret,
        key_size: Option<HmacKeySize>,
        created: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            sealed,
            key_size,
            created,
        }
    }

    pub fn sealed(&self) -> &SealedSecret {
        &self.sealed
    }

    pub fn key_size(&self) -> Option<HmacKeySize> {
        self.key_size
    }

    pub fn created(&self) -> Option<DateTime<Utc>> {
        self.created
    }

    /// Unseals the secret and checks it decodes to a key of a supported size.
    pub fn reveal(&self, password: &str) -> Result<Zeroizing<String>> {
        let expected = self.key_size;
        self.sealed.open_with(password, |plaintext| {
            let text = std::str::from_utf8(plaintext).ok()?;
            let raw = Zeroizing::new(STANDARD.decode(text).ok()?);
            let size = HmacKeySize::from_byte_len(raw.len())?;
            if expected.is_some_and(|e| e != size) {
                return None;
            }
            Some(Zeroizing::new(text.to_string()))
        })
    }
}

/// Generates random HMAC key bytes and seals their base64 text. Returns the
/// bundle and the secret so it can be shown once.
pub fn generate_hmac_key(
    size: HmacKeySize,
    password: &str,
    mode: CipherMode,
    kdf: KdfParams,
) -> Result<(HmacKeyBundle, Zeroizing<String>)> {
    if password.is_empty() {
        return Err(Error::KeyDerivationFailure("password must not be empty".into()));
    }

    let mut raw = Zeroizing::new(vec![0u8; size.bytes()]);
    secure_random(&mut raw)?;
    let secret = Zeroizing::new(STANDARD.encode(raw.as_slice()));

    let sealed = SealedSecret::seal(secret.as_bytes(), password, mode, kdf)?;
    info!(bits = size.bits(), mode = %mode, "generated HMAC key");

    let bundle = HmacKeyBundle::from_parts(sealed, Some(size), Some(Utc::now()));
    Ok((bundle, secret))
}
