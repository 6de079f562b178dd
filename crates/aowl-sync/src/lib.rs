//! aowl-sync: encrypted index synchronisation for the aowl vault
//!
//! [`VaultSyncEngine`] pulls the encrypted catalog, applies mutations as
//! compare-and-swap index transactions and drives [`RetentionCleanup`].
//! Conflicts are surfaced, never silently overwritten.

pub mod cache;
pub mod engine;
pub mod error;
pub mod index;
pub mod retention;

pub use cache::{FileCache, LocalCache, MemoryCache};
pub use engine::{
    BatchDeleteReport, EngineOptions, OrphanReport, SyncPhase, SyncState, VaultSyncEngine,
};
pub use error::{SyncError, SyncResult};
pub use index::VaultIndex;
pub use retention::{CleanupReport, RetentionCleanup};
