//! Error taxonomy shared by every layer of the vault. Decryption and structural
//! failures are always surfaced as typed results because they need a user
//! decision (re-authentication or recovery), never a silent default.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum VaultError {
    /// Wrong key or tampered ciphertext.
    #[error("authentication failed: wrong key or tampered data")]
    AuthenticationFailed,
    /// Decryption succeeded but the plaintext is not a valid document.
    #[error("corrupt data: {0}")]
    CorruptData(String),
    #[error("truncated stream: expected at least {expected} bytes, got {actual}")]
    TruncatedStream { expected: usize, actual: usize },
    #[error("invalid key length; expected 32 bytes, got {0}")]
    InvalidKeyLength(usize),
    #[error("record at index {index} carries an authenticator and cannot be removed")]
    RemovalBlocked { index: usize },
    #[error("index {index} out of range for vault of {len} records")]
    IndexOutOfRange { index: usize, len: usize },
    #[error("io failure: {0}")]
    Io(#[from] std::io::Error),
    #[error("no vault key has been established")]
    KeyNotSet,
    #[error("key derivation failed: {0}")]
    KeyDerivation(String),
}

pub type VaultResult<T> = Result<T, VaultError>;
