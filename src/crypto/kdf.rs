use pbkdf2::pbkdf2_hmac;
use sha2::Sha256;
use zeroize::Zeroizing;

use super::KEY_LEN;
use crate::error::{Error, Result};

/// Lowest PBKDF2-HMAC-SHA256 round count accepted for sealing or HMAC keys.
pub const MIN_ITERATIONS: u32 = 100_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KdfParams {
    iterations: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            iterations: MIN_ITERATIONS,
        }
    }
}

impl KdfParams {
    pub fn new(iterations: u32) -> Result<Self> {
        let params = Self { iterations };
        params.validate()?;
        Ok(params)
    }

    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    pub fn validate(&self) -> Result<()> {
        if self.iterations < MIN_ITERATIONS {
            return Err(Error::KeyDerivationFailure(format!(
                "pbkdf2 iteration count {} is below the minimum of {MIN_ITERATIONS}",
                self.iterations
            )));
        }
        Ok(())
    }
}

/// Derives a 32-byte key from `password` and `salt` with PBKDF2-HMAC-SHA256.
pub fn derive_key(password: &str, salt: &[u8], kdf: KdfParams) -> Result<Zeroizing<[u8; KEY_LEN]>> {
    kdf.validate()?;
    if salt.is_empty() {
        return Err(Error::KeyDerivationFailure("salt must not be empty".into()));
    }

    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, kdf.iterations, key.as_mut());
    Ok(key)
}
