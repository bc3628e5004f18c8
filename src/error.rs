//! Error taxonomy for template signing and verification.
//!
//! Parsing and validation failures are reported immediately. Cryptographic
//! failures are never folded into "no match": a caller must be able to tell an
//! unsigned combination apart from a wrong key or password.

use thiserror::Error;

/// Result type alias for formseal operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// Malformed placeholder syntax or a resource limit was exceeded.
    #[error("invalid template: {0}")]
    InvalidTemplate(String),

    #[error("unsupported cipher mode '{0}' (expected aes-256-cbc or aes-256-ctr)")]
    UnsupportedCipherMode(String),

    #[error("unsupported key size: {0} bits")]
    UnsupportedKeySize(u32),

    #[error("key derivation failed: {0}")]
    KeyDerivationFailure(String),

    /// Deliberately coarse: never says which step failed.
    #[error("invalid password or corrupted data")]
    DecryptionFailed,

    /// A public or private key could not be parsed in any supported encoding.
    #[error("key import failed: {0}")]
    KeyImportFailed(String),

    #[error("key unavailable: {0}")]
    KeyUnavailable(String),

    /// The answers do not reproduce any signed variant.
    #[error("no signed variant matches the given answers")]
    SignatureNotFound,

    /// A variant was found but its signature does not check out.
    #[error("signature is invalid for the matched variant")]
    SignatureInvalid,

    #[error("malformed record: {0}")]
    MalformedRecord(String),

    #[error("algorithm mismatch: table is signed with {found}, verifier expects {expected}")]
    AlgorithmMismatch {
        expected: &'static str,
        found: &'static str,
    },

    #[error("{0}")]
    GenericFailure(String),
}

impl Error {
    pub(crate) fn template(msg: impl Into<String>) -> Self {
        Error::InvalidTemplate(msg.into())
    }

    pub(crate) fn record(msg: impl Into<String>) -> Self {
        Error::MalformedRecord(msg.into())
    }
}
