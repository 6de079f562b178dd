use chrono::Duration;
use thiserror::Error;

use aowl_storage::RemoteError;

pub type AuthResult<T> = Result<T, AuthError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("wrong PIN ({0} attempts remaining)")]
    WrongPinError(u32),

    #[error("wrong password ({0} attempts remaining)")]
    WrongPasswordError(u32),

    #[error("too many failed attempts; try again in {}s", .0.num_seconds())]
    LockedOutError(Duration),

    #[error("credential store: {0}")]
    StorageError(String),

    #[error("key derivation failed: {0}")]
    KeyDerivationError(String),

    #[error("invalid setup: {0}")]
    SetupValidationError(String),

    /// PIN was right but this device holds no master key.
    #[error("no cached key on this device; unlock with your password")]
    PasswordRequired,

    #[error("vault is not set up on this device")]
    NotConfigured,

    #[error(transparent)]
    RemoteError(#[from] RemoteError),
}

impl From<anyhow::Error> for AuthError {
    fn from(e: anyhow::Error) -> Self {
        AuthError::StorageError(format!("{e:#}"))
    }
}
