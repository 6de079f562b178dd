use thiserror::Error;

pub type CryptoResult<T> = Result<T, CryptoError>;

/// Every way a crypto primitive can fail.
///
/// Tag verification failures are reported as [`CryptoError::TamperedData`]
/// whether the cause is a wrong key or modified bytes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    #[error("invalid key length: {0} bytes (expected 32)")]
    InvalidKeyLength(usize),

    #[error("invalid IV length: {0} bytes (expected 12)")]
    InvalidIvLength(usize),

    #[error("invalid salt length: {0} bytes (minimum 16)")]
    InvalidSaltLength(usize),

    #[error("invalid data format: {0}")]
    InvalidDataFormat(String),

    #[error("unsupported envelope version: {0}")]
    UnsupportedVersion(u32),

    #[error("wrong key or corrupted data")]
    TamperedData,

    #[error("key derivation failed: {0}")]
    KeyDerivationFailed(String),

    #[error("decryption failed: {0}")]
    DecryptionFailed(String),

    #[error("encryption failed: {0}")]
    EncryptionFailed(String),
}
