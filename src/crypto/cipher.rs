//! AES-256 codec for sealing key material.
//!
//! Two interchangeable modes are supported:
//!
//! ```text
//! aes-256-cbc : library CBC, random 16-byte IV, PKCS#7 padding
//! aes-256-ctr : NONCE (8) | COUNTER (8, big-endian) -> AES-ECB -> keystream XOR data
//! ```
//!
//! CTR output has the same length as its input. Encryption and decryption are
//! the same operation.

use std::fmt;
use std::str::FromStr;

use aes::Aes256;
use aes::cipher::block_padding::Pkcs7;
use aes::cipher::{BlockDecryptMut, BlockEncrypt, BlockEncryptMut, KeyInit, KeyIvInit};
use getrandom::fill;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use super::{BLOCK_LEN, IV_LEN, KEY_LEN, NONCE_LEN, SALT_LEN};
use crate::error::{Error, Result};

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum CipherMode {
    Aes256Cbc,
    Aes256Ctr,
}

impl CipherMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CipherMode::Aes256Cbc => "aes-256-cbc",
            CipherMode::Aes256Ctr => "aes-256-ctr",
        }
    }
}

impl fmt::Display for CipherMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CipherMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "aes-256-cbc" | "cbc" => Ok(CipherMode::Aes256Cbc),
            "aes-256-ctr" | "ctr" => Ok(CipherMode::Aes256Ctr),
            _ => Err(Error::UnsupportedCipherMode(s.to_string())),
        }
    }
}

impl TryFrom<String> for CipherMode {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<CipherMode> for String {
    fn from(mode: CipherMode) -> Self {
        mode.as_str().to_string()
    }
}

/// Cipher mode together with the IV or nonce it was used with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sealing {
    Cbc { iv: [u8; IV_LEN] },
    Ctr { nonce: [u8; NONCE_LEN] },
}

impl Sealing {
    /// Picks a fresh random IV or nonce for `mode`.
    pub fn generate(mode: CipherMode) -> Result<Self> {
        match mode {
            CipherMode::Aes256Cbc => {
                let mut iv = [0u8; IV_LEN];
                secure_random(&mut iv)?;
                Ok(Sealing::Cbc { iv })
            }
            CipherMode::Aes256Ctr => {
                let mut nonce = [0u8; NONCE_LEN];
                secure_random(&mut nonce)?;
                Ok(Sealing::Ctr { nonce })
            }
        }
    }

    /// Rebuilds the sealing from persisted metadata.
    pub fn from_parts(mode: CipherMode, iv_or_nonce: &[u8]) -> Result<Self> {
        match mode {
            CipherMode::Aes256Cbc => {
                let iv = iv_or_nonce.try_into().map_err(|_| {
                    Error::record(format!(
                        "CBC IV must be {IV_LEN} bytes, got {}",
                        iv_or_nonce.len()
                    ))
                })?;
                Ok(Sealing::Cbc { iv })
            }
            CipherMode::Aes256Ctr => {
                let nonce = iv_or_nonce.try_into().map_err(|_| {
                    Error::record(format!(
                        "CTR nonce must be {NONCE_LEN} bytes, got {}",
                        iv_or_nonce.len()
                    ))
                })?;
                Ok(Sealing::Ctr { nonce })
            }
        }
    }

    pub fn mode(&self) -> CipherMode {
        match self {
            Sealing::Cbc { .. } => CipherMode::Aes256Cbc,
            Sealing::Ctr { .. } => CipherMode::Aes256Ctr,
        }
    }

    pub fn iv_or_nonce(&self) -> &[u8] {
        match self {
            Sealing::Cbc { iv } => iv,
            Sealing::Ctr { nonce } => nonce,
        }
    }
}

/// Fill buffer with cryptographically secure random bytes
pub(crate) fn secure_random(buf: &mut [u8]) -> Result<()> {
    fill(buf).map_err(|_| Error::GenericFailure("OS random generator unavailable".into()))
}

/// Generate salt
pub fn generate_salt() -> Result<[u8; SALT_LEN]> {
    let mut salt = [0u8; SALT_LEN];
    secure_random(&mut salt)?;
    Ok(salt)
}

/// Encrypts `plaintext` under `key` with a fresh IV or nonce.
pub fn encrypt(mode: CipherMode, key: &[u8], plaintext: &[u8]) -> Result<(Vec<u8>, Sealing)> {
    let sealing = Sealing::generate(mode)?;
    let ciphertext = match &sealing {
        Sealing::Cbc { iv } => encrypt_cbc(key, iv, plaintext)?,
        Sealing::Ctr { nonce } => apply_ctr_keystream(key, nonce, plaintext)?,
    };
    Ok((ciphertext, sealing))
}

/// Reverses [`encrypt`]. CBC padding errors surface as [`Error::DecryptionFailed`].
pub fn decrypt(key: &[u8], sealing: &Sealing, ciphertext: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
    match sealing {
        Sealing::Cbc { iv } => decrypt_cbc(key, iv, ciphertext),
        Sealing::Ctr { nonce } => Ok(Zeroizing::new(apply_ctr_keystream(key, nonce, ciphertext)?)),
    }
}

pub fn encrypt_cbc(key: &[u8], iv: &[u8; IV_LEN], plaintext: &[u8]) -> Result<Vec<u8>> {
    let cipher = Aes256CbcEnc::new_from_slices(key, iv).map_err(|_| bad_key_len(key))?;
    Ok(cipher.encrypt_padded_vec_mut::<Pkcs7>(plaintext))
}

pub fn decrypt_cbc(key: &[u8], iv: &[u8; IV_LEN], ciphertext: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
    let cipher = Aes256CbcDec::new_from_slices(key, iv).map_err(|_| bad_key_len(key))?;
    cipher
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map(Zeroizing::new)
        .map_err(|_| Error::DecryptionFailed)
}

/// XORs `data` with the AES-256 keystream for `nonce`.
pub fn apply_ctr_keystream(key: &[u8], nonce: &[u8; NONCE_LEN], data: &[u8]) -> Result<Vec<u8>> {
    let cipher = Aes256::new_from_slice(key).map_err(|_| bad_key_len(key))?;

    let mut counter = [0u8; BLOCK_LEN];
    counter[..NONCE_LEN].copy_from_slice(nonce);

    let mut out = Vec::with_capacity(data.len());
    for chunk in data.chunks(BLOCK_LEN) {
        let mut keystream = aes::Block::from(counter);
        cipher.encrypt_block(&mut keystream);

        // a short final chunk only consumes the head of the keystream block
        out.extend(chunk.iter().zip(keystream.iter()).map(|(b, k)| b ^ k));

        increment_counter(&mut counter);
    }
    Ok(out)
}

/// Big-endian increment confined to the counter half of the block.
fn increment_counter(block: &mut [u8; BLOCK_LEN]) {
    for byte in block[NONCE_LEN..].iter_mut().rev() {
        *byte = byte.wrapping_add(1);
        if *byte != 0 {
            break;
        }
    }
}

fn bad_key_len(key: &[u8]) -> Error {
    Error::KeyDerivationFailure(format!(
        "cipher key must be {KEY_LEN} bytes, got {}",
        key.len()
    ))
}
