use thiserror::Error;
use uuid::Uuid;

use aowl_crypto::CryptoError;
use aowl_storage::RemoteError;

pub type SyncResult<T> = Result<T, SyncError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    #[error("vault is not synced; run a sync first")]
    NotSynced,

    #[error("entry not found: {0}")]
    EntryNotFound(Uuid),

    #[error("entry already exists: {0}")]
    DuplicateEntry(Uuid),

    /// The remote index moved since the last sync. Re-sync, then resubmit.
    #[error("remote index changed since last sync")]
    Conflict,

    /// Decryption failed and no usable local backup exists.
    #[error("wrong password or corrupted vault")]
    DecryptionFailed,

    #[error("invalid index: {0}")]
    InvalidIndex(String),

    #[error("no rejected changes to resubmit")]
    NoPendingChanges,

    #[error("local cache: {0}")]
    Cache(String),

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),
}
