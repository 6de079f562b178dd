//! In-process [`RemoteStore`] with the same CAS rules as the HTTP backend.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::Mutex;

use crate::error::{RemoteError, RemoteResult};
use crate::rate_limit::RateLimitState;
use crate::store::{RemoteListing, RemoteObject, RemoteStore};

#[derive(Debug, Default)]
struct Inner {
    objects: BTreeMap<String, Vec<u8>>,
    failures: BTreeMap<String, RemoteError>,
    rate_limit: RateLimitState,
    writes: usize,
    deletes: usize,
}

/// Map-backed store. Version token = hex SHA-256 of the content.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

pub fn content_version(content: &[u8]) -> String {
    let digest = Sha256::digest(content);
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Make every operation on `path` fail with `err` until cleared.
    pub fn fail_path(&self, path: &str, err: RemoteError) {
        self.lock().failures.insert(path.to_string(), err);
    }

    pub fn clear_failures(&self) {
        self.lock().failures.clear();
    }

    pub fn set_rate_limit(&self, state: RateLimitState) {
        self.lock().rate_limit = state;
    }

    pub fn contains(&self, path: &str) -> bool {
        self.lock().objects.contains_key(path)
    }

    pub fn paths(&self) -> Vec<String> {
        self.lock().objects.keys().cloned().collect()
    }

    /// Successful writes so far
    pub fn write_count(&self) -> usize {
        self.lock().writes
    }

    /// Successful deletes so far
    pub fn delete_count(&self) -> usize {
        self.lock().deletes
    }

    /// Overwrite without CAS, for setting up corrupt or foreign state.
    pub fn put_raw(&self, path: &str, content: &[u8]) -> String {
        self.lock()
            .objects
            .insert(path.to_string(), content.to_vec());
        content_version(content)
    }

    fn check_failure(inner: &Inner, path: &str) -> RemoteResult<()> {
        match inner.failures.get(path) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn read(&self, path: &str) -> RemoteResult<RemoteObject> {
        let inner = self.lock();
        Self::check_failure(&inner, path)?;
        let content = inner
            .objects
            .get(path)
            .ok_or_else(|| RemoteError::NotFound(path.to_string()))?;
        Ok(RemoteObject {
            version: content_version(content),
            content: content.clone(),
        })
    }

    async fn write(
        &self,
        path: &str,
        content: &[u8],
        expected_version: Option<&str>,
    ) -> RemoteResult<String> {
        let mut inner = self.lock();
        Self::check_failure(&inner, path)?;

        let current = inner.objects.get(path).map(|c| content_version(c));
        match (current.as_deref(), expected_version) {
            (None, None) => {}
            (Some(cur), Some(expected)) if cur == expected => {}
            (Some(_), None) => {
                return Err(RemoteError::ConflictError(format!(
                    "{path} already exists"
                )))
            }
            (None, Some(_)) => {
                return Err(RemoteError::ConflictError(format!(
                    "{path} no longer exists"
                )))
            }
            (Some(_), Some(_)) => {
                return Err(RemoteError::ConflictError(format!(
                    "{path} changed since it was read"
                )))
            }
        }

        inner.objects.insert(path.to_string(), content.to_vec());
        inner.writes += 1;
        Ok(content_version(content))
    }

    async fn delete(&self, path: &str, version: &str) -> RemoteResult<()> {
        let mut inner = self.lock();
        Self::check_failure(&inner, path)?;

        let current = inner
            .objects
            .get(path)
            .map(|c| content_version(c))
            .ok_or_else(|| RemoteError::NotFound(path.to_string()))?;
        if current != version {
            return Err(RemoteError::ConflictError(format!(
                "{path} changed since it was read"
            )));
        }
        inner.objects.remove(path);
        inner.deletes += 1;
        Ok(())
    }

    async fn list(&self, dir: &str) -> RemoteResult<Vec<RemoteListing>> {
        let inner = self.lock();
        Self::check_failure(&inner, dir)?;

        let prefix = format!("{}/", dir.trim_end_matches('/'));
        Ok(inner
            .objects
            .iter()
            .filter_map(|(path, content)| {
                let name = path.strip_prefix(&prefix)?;
                if name.contains('/') {
                    return None;
                }
                Some(RemoteListing {
                    name: name.to_string(),
                    path: path.clone(),
                    version: content_version(content),
                    size: content.len() as u64,
                })
            })
            .collect())
    }

    fn rate_limit(&self) -> RateLimitState {
        self.lock().rate_limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_then_cas_update() {
        let store = MemoryStore::new();
        let v1 = store.write("a/b", b"one", None).await.unwrap();

        let err = store.write("a/b", b"two", None).await.unwrap_err();
        assert!(err.is_conflict());

        let v2 = store.write("a/b", b"two", Some(&v1)).await.unwrap();
        assert_ne!(v1, v2);

        let stale = store.write("a/b", b"three", Some(&v1)).await.unwrap_err();
        assert!(stale.is_conflict());

        let obj = store.read("a/b").await.unwrap();
        assert_eq!(obj.content, b"two");
        assert_eq!(obj.version, v2);
    }

    #[tokio::test]
    async fn test_delete_requires_current_version() {
        let store = MemoryStore::new();
        let v1 = store.write("x", b"1", None).await.unwrap();
        store.write("x", b"2", Some(&v1)).await.unwrap();

        assert!(store.delete("x", &v1).await.unwrap_err().is_conflict());
        let current = store.read("x").await.unwrap().version;
        store.delete("x", &current).await.unwrap();
        assert!(store.delete("x", &current).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_list_is_shallow() {
        let store = MemoryStore::new();
        store.put_raw(".aowl/data/a.enc", b"a");
        store.put_raw(".aowl/data/b.enc", b"bb");
        store.put_raw(".aowl/data/nested/c.enc", b"c");
        store.put_raw(".aowl/index.enc", b"i");

        let mut names: Vec<_> = store
            .list(".aowl/data")
            .await
            .unwrap()
            .into_iter()
            .map(|l| (l.name, l.size))
            .collect();
        names.sort();
        assert_eq!(
            names,
            vec![("a.enc".to_string(), 1), ("b.enc".to_string(), 2)]
        );
        assert!(store.list(".aowl/missing").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_injected_failure() {
        let store = MemoryStore::new();
        store.put_raw("p", b"x");
        store.fail_path("p", RemoteError::ServerError { status: 502 });

        assert_eq!(
            store.read("p").await.unwrap_err(),
            RemoteError::ServerError { status: 502 }
        );
        store.clear_failures();
        assert!(store.read("p").await.is_ok());
    }

    #[test]
    fn test_content_version_is_sha256_hex() {
        assert_eq!(
            content_version(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
