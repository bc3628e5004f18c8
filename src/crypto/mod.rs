//! Cryptographic primitives for key protection.
//!
//! Provides password-based key derivation, the CBC/CTR block cipher codec,
//! and the sealed-secret container that ties them together.

pub mod cipher;
pub mod kdf;
pub mod sealed;

pub use cipher::{CipherMode, Sealing, decrypt, encrypt, generate_salt};
pub use kdf::{KdfParams, derive_key};
pub use sealed::SealedSecret;

/// Length of the PBKDF2 salt (16 bytes).
pub const SALT_LEN: usize = 16;
/// Length of the CBC initialisation vector (one AES block).
pub const IV_LEN: usize = 16;
/// Length of the CTR nonce; the remaining 8 bytes of the counter block count blocks.
pub const NONCE_LEN: usize = 8;
/// Length of the AES-256 key (32 bytes / 256 bits).
pub const KEY_LEN: usize = 32;
/// AES block size.
pub const BLOCK_LEN: usize = 16;
