use tracing::debug;
use zeroize::Zeroizing;

use super::cipher::{self, CipherMode, Sealing};
use super::kdf::{KdfParams, derive_key};
use super::SALT_LEN;
use crate::error::{Error, Result};

/// A secret encrypted under a password-derived key, with everything needed to
/// open it again except the password.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedSecret {
    kdf: KdfParams,
    salt: [u8; SALT_LEN],
    sealing: Sealing,
    ciphertext: Vec<u8>,
}

impl SealedSecret {
    /// Encrypts `plaintext` under a key derived from `password` and a fresh salt.
    pub fn seal(
        plaintext: &[u8],
        password: &str,
        mode: CipherMode,
        kdf: KdfParams,
    ) -> Result<Self> {
        let salt = cipher::generate_salt()?;
        let key = derive_key(password, &salt, kdf)?;
        let (ciphertext, sealing) = cipher::encrypt(mode, key.as_ref(), plaintext)?;

        debug!(mode = %mode, iterations = kdf.iterations(), "sealed secret");

        Ok(Self {
            kdf,
            salt,
            sealing,
            ciphertext,
        })
    }

    pub fn from_parts(
        kdf: KdfParams,
        salt: [u8; SALT_LEN],
        sealing: Sealing,
        ciphertext: Vec<u8>,
    ) -> Result<Self> {
        if ciphertext.is_empty() {
            return Err(Error::record("sealed secret has no ciphertext"));
        }
        Ok(Self {
            kdf,
            salt,
            sealing,
            ciphertext,
        })
    }

    /// Re-derives the key from `password` and the stored salt and decrypts.
    ///
    /// CTR has no integrity check, so a wrong password yields garbage here;
    /// callers must validate the plaintext and report
    /// [`Error::DecryptionFailed`] when it does not parse.
    pub fn open(&self, password: &str) -> Result<Zeroizing<Vec<u8>>> {
        let key = derive_key(password, &self.salt, self.kdf)?;
        cipher::decrypt(key.as_ref(), &self.sealing, &self.ciphertext)
    }

    /// Like [`open`](Self::open), but runs `validate` over the plaintext and
    /// collapses any rejection to [`Error::DecryptionFailed`].
    pub fn open_with<T>(
        &self,
        password: &str,
        validate: impl FnOnce(&[u8]) -> Option<T>,
    ) -> Result<T> {
        let plaintext = self.open(password)?;
        validate(&plaintext).ok_or(Error::DecryptionFailed)
    }

    pub fn kdf(&self) -> &KdfParams {
        &self.kdf
    }

    pub fn salt(&self) -> &[u8; SALT_LEN] {
        &self.salt
    }

    pub fn sealing(&self) -> &Sealing {
        &self.sealing
    }

    pub fn cipher_mode(&self) -> CipherMode {
        self.sealing.mode()
    }

    pub fn ciphertext(&self) -> &[u8] {
        &self.ciphertext
    }
}
