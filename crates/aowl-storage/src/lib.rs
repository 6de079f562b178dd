//! aowl-storage: remote blob storage for the encrypted vault
//!
//! [`RemoteStore`] is the seam: [`RemoteStorageClient`] speaks the
//! Git-hosting contents API over HTTPS, [`MemoryStore`] keeps everything in
//! process. [`VaultBlobStore`] maps config, index and entry blobs onto
//! either.

pub mod blob_store;
pub mod client;
pub mod error;
pub mod health;
pub mod memory;
pub mod rate_limit;
pub mod retry;
pub mod store;

pub use blob_store::VaultBlobStore;
pub use client::RemoteStorageClient;
pub use error::{RemoteError, RemoteResult};
pub use health::{check_health, is_healthy};
pub use memory::MemoryStore;
pub use rate_limit::{RateLimitState, RateLimitTracker};
pub use retry::RetryPolicy;
pub use store::{RemoteListing, RemoteObject, RemoteStore};
