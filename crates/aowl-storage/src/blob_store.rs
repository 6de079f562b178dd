//! Vault layout on the remote store:
//!
//! ```text
//! .aowl/config.json      plaintext VaultConfig (salt is not secret)
//! .aowl/index.enc        envelope over the index JSON
//! .aowl/data/{id}.enc    envelope over entry content
//! ```

use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use aowl_core::types::{blob_name, VaultConfig};
use aowl_core::VAULT_PREFIX;

use crate::error::{RemoteError, RemoteResult};
use crate::rate_limit::RateLimitState;
use crate::store::{RemoteListing, RemoteObject, RemoteStore};

pub fn config_path() -> String {
    format!("{VAULT_PREFIX}/config.json")
}

pub fn index_path() -> String {
    format!("{VAULT_PREFIX}/index.enc")
}

pub fn data_dir() -> String {
    format!("{VAULT_PREFIX}/data")
}

pub fn entry_path(id: &Uuid) -> String {
    format!("{}/{}", data_dir(), blob_name(id))
}

/// Parse an entry id back out of a `data/` file name.
pub fn entry_id_from_name(name: &str) -> Option<Uuid> {
    name.strip_suffix(".enc")
        .and_then(|stem| Uuid::parse_str(stem).ok())
}

#[derive(Clone)]
pub struct VaultBlobStore {
    store: Arc<dyn RemoteStore>,
}

impl VaultBlobStore {
    pub fn new(store: Arc<dyn RemoteStore>) -> Self {
        Self { store }
    }

    pub fn remote(&self) -> &Arc<dyn RemoteStore> {
        &self.store
    }

    pub fn rate_limit(&self) -> RateLimitState {
        self.store.rate_limit()
    }

    pub async fn download_file(&self, path: &str) -> RemoteResult<RemoteObject> {
        self.store.read(path).await
    }

    pub async fn upload_file(
        &self,
        path: &str,
        content: &[u8],
        version: Option<&str>,
    ) -> RemoteResult<String> {
        self.store.write(path, content, version).await
    }

    pub async fn delete_file(&self, path: &str, version: &str) -> RemoteResult<()> {
        self.store.delete(path, version).await
    }

    /// Current version token, `None` when the object does not exist.
    pub async fn get_file_version(&self, path: &str) -> RemoteResult<Option<String>> {
        match self.store.read(path).await {
            Ok(obj) => Ok(Some(obj.version)),
            Err(RemoteError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Vault config and its version, `None` for a vault that was never set up.
    pub async fn fetch_config(&self) -> RemoteResult<Option<VaultConfig>> {
        let obj = match self.store.read(&config_path()).await {
            Ok(obj) => obj,
            Err(RemoteError::NotFound(_)) => return Ok(None),
            Err(e) => return Err(e),
        };
        VaultConfig::from_bytes(&obj.content)
            .map(Some)
            .map_err(|e| RemoteError::NetworkError(format!("malformed vault config: {e}")))
    }

    /// Create the vault config. Fails with `ConflictError` if another device
    /// created one first.
    pub async fn create_config(&self, config: &VaultConfig) -> RemoteResult<String> {
        let bytes = config
            .to_bytes()
            .map_err(|e| RemoteError::NetworkError(format!("encoding vault config: {e}")))?;
        let version = self.store.write(&config_path(), &bytes, None).await?;
        info!(version = %version, "created remote vault config");
        Ok(version)
    }

    /// Encrypted index bytes, `None` for an empty vault.
    pub async fn download_index(&self) -> RemoteResult<Option<RemoteObject>> {
        match self.store.read(&index_path()).await {
            Ok(obj) => Ok(Some(obj)),
            Err(RemoteError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// CAS upload of the encrypted index against the last observed version.
    pub async fn upload_index(&self, sealed: &[u8], version: Option<&str>) -> RemoteResult<String> {
        self.store.write(&index_path(), sealed, version).await
    }

    pub async fn upload_entry(&self, id: &Uuid, sealed: &[u8]) -> RemoteResult<String> {
        self.store.write(&entry_path(id), sealed, None).await
    }

    pub async fn download_entry(&self, id: &Uuid) -> RemoteResult<RemoteObject> {
        self.store.read(&entry_path(id)).await
    }

    /// Remove an entry blob. An already-absent blob counts as deleted.
    pub async fn delete_entry(&self, id: &Uuid, version: Option<&str>) -> RemoteResult<()> {
        let path = entry_path(id);
        let version = match version {
            Some(v) => v.to_string(),
            None => match self.get_file_version(&path).await? {
                Some(v) => v,
                None => {
                    debug!(%id, "entry blob already absent");
                    return Ok(());
                }
            },
        };
        match self.store.delete(&path, &version).await {
            Ok(()) => Ok(()),
            Err(RemoteError::NotFound(_)) => {
                debug!(%id, "entry blob already absent");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    pub async fn list_entry_blobs(&self) -> RemoteResult<Vec<RemoteListing>> {
        self.store.list(&data_dir()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use chrono::Utc;

    fn blob_store() -> (Arc<MemoryStore>, VaultBlobStore) {
        let mem = Arc::new(MemoryStore::new());
        (mem.clone(), VaultBlobStore::new(mem))
    }

    #[test]
    fn test_layout() {
        let id = Uuid::nil();
        assert_eq!(config_path(), ".aowl/config.json");
        assert_eq!(index_path(), ".aowl/index.enc");
        assert_eq!(
            entry_path(&id),
            ".aowl/data/00000000-0000-0000-0000-000000000000.enc"
        );
        assert_eq!(
            entry_id_from_name("00000000-0000-0000-0000-000000000000.enc"),
            Some(id)
        );
        assert_eq!(entry_id_from_name("README.md"), None);
    }

    #[tokio::test]
    async fn test_missing_objects_are_not_errors() {
        let (_, blobs) = blob_store();
        assert_eq!(blobs.fetch_config().await.unwrap(), None);
        assert_eq!(blobs.download_index().await.unwrap(), None);
        assert_eq!(blobs.get_file_version(".aowl/nope").await.unwrap(), None);
        assert!(blobs.list_entry_blobs().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_config_create_once() {
        let (_, blobs) = blob_store();
        let config = VaultConfig::new(vec![7u8; 16], Utc::now());

        blobs.create_config(&config).await.unwrap();
        let fetched = blobs.fetch_config().await.unwrap().unwrap();
        assert_eq!(fetched.salt, config.salt);

        let again = blobs.create_config(&config).await.unwrap_err();
        assert!(again.is_conflict());
    }

    #[tokio::test]
    async fn test_malformed_config() {
        let (mem, blobs) = blob_store();
        mem.put_raw(&config_path(), b"not json");
        assert!(matches!(
            blobs.fetch_config().await,
            Err(RemoteError::NetworkError(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_entry_tolerates_absence() {
        let (mem, blobs) = blob_store();
        let id = Uuid::new_v4();

        blobs.delete_entry(&id, None).await.unwrap();
        blobs.delete_entry(&id, Some("stale")).await.unwrap();

        let version = blobs.upload_entry(&id, b"sealed").await.unwrap();
        assert!(mem.contains(&entry_path(&id)));
        blobs.delete_entry(&id, Some(&version)).await.unwrap();
        assert!(!mem.contains(&entry_path(&id)));
    }

    #[tokio::test]
    async fn test_delete_entry_probes_version() {
        let (mem, blobs) = blob_store();
        let id = Uuid::new_v4();
        blobs.upload_entry(&id, b"sealed").await.unwrap();

        blobs.delete_entry(&id, None).await.unwrap();
        assert!(!mem.contains(&entry_path(&id)));
    }
}
