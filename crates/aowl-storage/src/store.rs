//! The remote content-store seam.
//!
//! Writes and deletes are compare-and-swap on an opaque version token (the
//! remote's content hash). `write` with no expected version only creates.

use async_trait::async_trait;

use crate::error::RemoteResult;
use crate::rate_limit::RateLimitState;

/// Object content plus the version token it was read at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteObject {
    pub content: Vec<u8>,
    pub version: String,
}

/// One entry of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteListing {
    pub name: String,
    pub path: String,
    pub version: String,
    pub size: u64,
}

#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn read(&self, path: &str) -> RemoteResult<RemoteObject>;

    /// Returns the new version token. Fails with `ConflictError` when the
    /// object changed since `expected_version` was read, or when
    /// `expected_version` is `None` and the object already exists.
    async fn write(
        &self,
        path: &str,
        content: &[u8],
        expected_version: Option<&str>,
    ) -> RemoteResult<String>;

    async fn delete(&self, path: &str, version: &str) -> RemoteResult<()>;

    /// Files directly under `dir`. A missing directory lists as empty.
    async fn list(&self, dir: &str) -> RemoteResult<Vec<RemoteListing>>;

    fn rate_limit(&self) -> RateLimitState;
}
