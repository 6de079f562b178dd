//! Vault sync engine
//!
//! Pull: download `index.enc` → decrypt → parse. Every mutation is an index
//! transaction: apply to the last pulled index → encrypt → CAS upload
//! against the version token observed at pull time.
//!
//! All operations queue on one async mutex so version tokens are never read
//! and written by interleaved calls. State changes are broadcast on a
//! `watch` channel.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use aowl_core::clock::{Clock, SystemClock};
use aowl_core::config::AowlConfig;
use aowl_core::{EntryType, RetentionPeriod, VaultEntry};
use aowl_crypto::{CryptoFacade, MasterKey};
use aowl_storage::blob_store::entry_id_from_name;
use aowl_storage::{RemoteError, VaultBlobStore};

use crate::cache::{LocalCache, INDEX_BACKUP_KEY, LAST_SYNC_KEY};
use crate::error::{SyncError, SyncResult};
use crate::index::VaultIndex;
use crate::retention::{CleanupReport, RetentionCleanup};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    Downloading,
    Decrypting,
    Encrypting,
    Uploading,
}

impl std::fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SyncPhase::Downloading => "downloading",
            SyncPhase::Decrypting => "decrypting",
            SyncPhase::Encrypting => "encrypting",
            SyncPhase::Uploading => "uploading",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone)]
pub enum SyncState {
    Idle,
    Syncing {
        phase: SyncPhase,
    },
    Synced {
        index: Arc<VaultIndex>,
        /// `None` until the vault has an index on the remote
        version_token: Option<String>,
        last_sync_at: DateTime<Utc>,
    },
    Error {
        cause: SyncError,
    },
}

impl SyncState {
    pub fn is_synced(&self) -> bool {
        matches!(self, SyncState::Synced { .. })
    }

    pub fn index(&self) -> Option<&Arc<VaultIndex>> {
        match self {
            SyncState::Synced { index, .. } => Some(index),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&SyncError> {
        match self {
            SyncState::Error { cause } => Some(cause),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EngineOptions {
    pub cleanup: RetentionCleanup,
    pub cleanup_after_sync: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            cleanup: RetentionCleanup::default(),
            cleanup_after_sync: true,
        }
    }
}

impl EngineOptions {
    pub fn from_config(cfg: &AowlConfig) -> Self {
        Self {
            cleanup: RetentionCleanup::from_config(
                &cfg.retention,
                cfg.remote.near_limit_threshold,
            ),
            cleanup_after_sync: cfg.retention.run_after_sync,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchDeleteReport {
    pub deleted: Vec<Uuid>,
    pub failed: Vec<(Uuid, SyncError)>,
    /// Not attempted because the rate limit got close
    pub deferred: Vec<Uuid>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrphanReport {
    pub scanned: usize,
    pub deleted: Vec<String>,
    pub failed: Vec<(String, SyncError)>,
}

#[derive(Debug, Clone)]
struct Snapshot {
    index: Arc<VaultIndex>,
    version_token: Option<String>,
    last_sync_at: DateTime<Utc>,
}

/// An index upload the remote rejected, kept for `resubmit_pending`.
struct Pending {
    base: Arc<VaultIndex>,
    candidate: VaultIndex,
}

/// What a failed index transaction does to the synced view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OnFailure {
    /// Drop the view and publish the error. The caller must sync again.
    Abort,
    /// Keep the last synced view and only return the error.
    KeepSnapshot,
}

#[derive(Default)]
struct Inner {
    current: Option<Snapshot>,
    pending: Option<Pending>,
}

pub struct VaultSyncEngine {
    blobs: VaultBlobStore,
    crypto: CryptoFacade,
    key: MasterKey,
    cache: Arc<dyn LocalCache>,
    clock: Arc<dyn Clock>,
    options: EngineOptions,
    state_tx: watch::Sender<SyncState>,
    inner: Mutex<Inner>,
    cleanup_handle: std::sync::Mutex<Option<JoinHandle<CleanupReport>>>,
}

impl VaultSyncEngine {
    pub fn new(
        blobs: VaultBlobStore,
        crypto: CryptoFacade,
        key: MasterKey,
        cache: Arc<dyn LocalCache>,
        options: EngineOptions,
    ) -> Self {
        let (state_tx, _) = watch::channel(SyncState::Idle);
        Self {
            blobs,
            crypto,
            key,
            cache,
            clock: Arc::new(SystemClock),
            options,
            state_tx,
            inner: Mutex::new(Inner::default()),
            cleanup_handle: std::sync::Mutex::new(None),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn state(&self) -> SyncState {
        self.state_tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SyncState> {
        self.state_tx.subscribe()
    }

    /// Catalog as of the last sync or transaction.
    pub async fn entries(&self) -> SyncResult<Vec<VaultEntry>> {
        let inner = self.inner.lock().await;
        let snapshot = require_synced(&inner)?;
        Ok(snapshot.index.entries().cloned().collect())
    }

    pub async fn current_index(&self) -> Option<Arc<VaultIndex>> {
        self.inner
            .lock()
            .await
            .current
            .as_ref()
            .map(|s| s.index.clone())
    }

    pub async fn has_pending(&self) -> bool {
        self.inner.lock().await.pending.is_some()
    }

    /// Timestamp written by the last successful pull or transaction on this
    /// device.
    pub fn cached_last_sync(&self) -> Option<DateTime<Utc>> {
        let bytes = self.cache.get(LAST_SYNC_KEY).ok()??;
        let text = String::from_utf8(bytes).ok()?;
        DateTime::parse_from_rfc3339(text.trim())
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
    }

    /// Handle of the retention run spawned by the last successful `sync`.
    pub fn take_cleanup_handle(&self) -> Option<JoinHandle<CleanupReport>> {
        self.cleanup_handle
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
    }

    /// Pull the remote index. This never merges: the result is exactly the
    /// remote catalog (or the local backup if the remote copy cannot be
    /// decrypted). A rejected upload survives a sync for `resubmit_pending`.
    pub async fn sync(self: &Arc<Self>) -> SyncResult<Arc<VaultIndex>> {
        let result = {
            let mut inner = self.inner.lock().await;
            match self.pull().await {
                Ok(snapshot) => {
                    info!(
                        entries = snapshot.index.len(),
                        version = ?snapshot.version_token,
                        "vault synced"
                    );
                    self.publish_synced(&snapshot);
                    let index = snapshot.index.clone();
                    inner.current = Some(snapshot);
                    Ok(index)
                }
                Err(err) => self.abort(&mut inner, err),
            }
        };

        if result.is_ok() && self.options.cleanup_after_sync {
            self.spawn_cleanup();
        }
        result
    }

    /// Encrypt and upload `content`, then add its entry to the index. The
    /// blob goes first so the index never points at a missing blob.
    pub async fn share_entry(
        &self,
        entry_type: EntryType,
        label: &str,
        content: &[u8],
        mime_type: Option<String>,
        retention: Option<RetentionPeriod>,
    ) -> SyncResult<VaultEntry> {
        let mut inner = self.inner.lock().await;
        let snapshot = require_synced(&inner)?;
        let now = self.clock.now();

        let mut entry = VaultEntry::new(
            entry_type,
            label,
            mime_type,
            content.len() as u64,
            retention,
            now,
        );

        self.publish(SyncState::Syncing {
            phase: SyncPhase::Encrypting,
        });
        let sealed = match self.crypto.seal(content, &self.key) {
            Ok(sealed) => sealed,
            Err(e) => return self.abort(&mut inner, e.into()),
        };

        self.publish(SyncState::Syncing {
            phase: SyncPhase::Uploading,
        });
        match self.blobs.upload_entry(&entry.id, &sealed).await {
            Ok(version) => entry.remote_version = Some(version),
            Err(e) => return self.abort(&mut inner, e.into()),
        }

        let candidate = match snapshot.index.add(entry.clone(), now) {
            Ok(candidate) => candidate,
            Err(e) => return self.abort(&mut inner, e),
        };
        self.commit(&mut inner, &snapshot, candidate, OnFailure::Abort)
            .await?;

        info!(id = %entry.id, bytes = entry.size_bytes, "shared entry");
        Ok(entry)
    }

    /// Delete the entry's blob, then drop it from the index. A blob that is
    /// already gone counts as deleted.
    pub async fn delete_entry(&self, id: &Uuid) -> SyncResult<()> {
        let mut inner = self.inner.lock().await;
        let snapshot = require_synced(&inner)?;
        let entry = snapshot
            .index
            .get(id)
            .cloned()
            .ok_or(SyncError::EntryNotFound(*id))?;

        self.publish(SyncState::Syncing {
            phase: SyncPhase::Uploading,
        });
        if let Err(e) = self
            .blobs
            .delete_entry(id, entry.remote_version.as_deref())
            .await
        {
            return self.abort(&mut inner, e.into());
        }

        let candidate = match snapshot.index.remove(id, self.clock.now()) {
            Ok(candidate) => candidate,
            Err(e) => return self.abort(&mut inner, e),
        };
        self.commit(&mut inner, &snapshot, candidate, OnFailure::Abort)
            .await?;

        info!(%id, "deleted entry");
        Ok(())
    }

    /// Delete several entries with one index upload. Blob failures are
    /// skipped and reported; only successfully deleted entries leave the
    /// index.
    pub async fn delete_entries(&self, ids: &[Uuid]) -> SyncResult<BatchDeleteReport> {
        let mut inner = self.inner.lock().await;
        self.delete_batch(&mut inner, ids, OnFailure::Abort).await
    }

    /// Change an entry's retention. Expiry stays anchored at `created_at`,
    /// so shortening the period can expire the entry immediately.
    pub async fn change_retention(
        &self,
        id: &Uuid,
        period: Option<RetentionPeriod>,
    ) -> SyncResult<VaultEntry> {
        let mut inner = self.inner.lock().await;
        let snapshot = require_synced(&inner)?;
        let now = self.clock.now();

        let updated = snapshot
            .index
            .get(id)
            .ok_or(SyncError::EntryNotFound(*id))?
            .with_retention(period, now);

        let candidate = match snapshot.index.update(updated.clone(), now) {
            Ok(candidate) => candidate,
            Err(e) => return self.abort(&mut inner, e),
        };
        self.commit(&mut inner, &snapshot, candidate, OnFailure::Abort)
            .await?;

        info!(%id, retention = ?period, expires_at = ?updated.expires_at(), "changed retention");
        Ok(updated)
    }

    /// Re-apply the upload rejected by the last conflict on top of the
    /// freshly synced remote index.
    ///
    /// Entries merge last-writer-wins; entries the rejected upload had
    /// removed stay removed.
    pub async fn resubmit_pending(&self) -> SyncResult<Arc<VaultIndex>> {
        let mut inner = self.inner.lock().await;
        let pending = inner.pending.take().ok_or(SyncError::NoPendingChanges)?;
        let snapshot = match inner.current.clone() {
            Some(snapshot) => snapshot,
            None => {
                inner.pending = Some(pending);
                return Err(SyncError::NotSynced);
            }
        };

        let removed: Vec<Uuid> = pending
            .base
            .ids()
            .filter(|id| !pending.candidate.contains(id))
            .copied()
            .collect();
        let merged = snapshot
            .index
            .merge(&pending.candidate)
            .remove_many(&removed, self.clock.now());

        debug!(
            remote = snapshot.index.len(),
            merged = merged.len(),
            removed = removed.len(),
            "resubmitting rejected index"
        );
        self.commit(&mut inner, &snapshot, merged, OnFailure::Abort)
            .await
    }

    /// Download and decrypt an entry's content.
    pub async fn read_entry(&self, id: &Uuid) -> SyncResult<Vec<u8>> {
        let inner = self.inner.lock().await;
        let snapshot = require_synced(&inner)?;
        if !snapshot.index.contains(id) {
            return Err(SyncError::EntryNotFound(*id));
        }

        let blob = self.blobs.download_entry(id).await?;
        let plaintext = self.crypto.decrypt(&blob.content, self.key.as_bytes())?;
        debug!(%id, bytes = plaintext.len(), "read entry");
        Ok(plaintext)
    }

    /// Delete `data/` blobs the current index does not reference, such as
    /// those left by a share whose index update failed.
    pub async fn collect_orphans(&self) -> SyncResult<OrphanReport> {
        let inner = self.inner.lock().await;
        let snapshot = require_synced(&inner)?;

        let listing = self.blobs.list_entry_blobs().await?;
        let mut report = OrphanReport {
            scanned: listing.len(),
            ..Default::default()
        };

        for item in listing {
            let Some(id) = entry_id_from_name(&item.name) else {
                debug!(name = %item.name, "skipping unrecognised file in data/");
                continue;
            };
            if snapshot.index.contains(&id) {
                continue;
            }
            match self.blobs.delete_file(&item.path, &item.version).await {
                Ok(()) | Err(RemoteError::NotFound(_)) => report.deleted.push(item.path),
                Err(e) => {
                    warn!(path = %item.path, error = %e, "could not delete orphaned blob");
                    report.failed.push((item.path, e.into()));
                }
            }
        }

        info!(
            scanned = report.scanned,
            deleted = report.deleted.len(),
            failed = report.failed.len(),
            "orphan collection finished"
        );
        Ok(report)
    }

    /// Delete up to one batch of expired entries. A rejected index update
    /// leaves the synced view in place and lands in `CleanupReport::error`.
    pub async fn run_retention_cleanup(&self) -> CleanupReport {
        let mut inner = self.inner.lock().await;
        let Some(snapshot) = inner.current.clone() else {
            return CleanupReport {
                error: Some(SyncError::NotSynced),
                ..Default::default()
            };
        };

        let plan =
            self.options
                .cleanup
                .plan(&snapshot.index, self.clock.now(), &self.blobs.rate_limit());
        let mut report = CleanupReport {
            expired_total: plan.expired_total,
            deferred: plan.deferred,
            ..Default::default()
        };
        if plan.batch.is_empty() {
            if plan.deferred > 0 {
                warn!(
                    deferred = plan.deferred,
                    "rate limit nearly exhausted, deferring retention cleanup"
                );
            }
            return report;
        }

        report.attempted = plan.batch.len();
        match self
            .delete_batch(&mut inner, &plan.batch, OnFailure::KeepSnapshot)
            .await
        {
            Ok(batch) => {
                report.attempted -= batch.deferred.len();
                report.deferred += batch.deferred.len();
                report.deleted = batch.deleted.len();
                report.failed = batch.failed.len();
            }
            Err(e) => {
                report.failed = report.attempted;
                report.error = Some(e);
            }
        }

        info!(
            expired = report.expired_total,
            deleted = report.deleted,
            failed = report.failed,
            deferred = report.deferred,
            "retention cleanup finished"
        );
        report
    }

    fn spawn_cleanup(self: &Arc<Self>) {
        let engine = Arc::clone(self);
        let handle = tokio::spawn(async move { engine.run_retention_cleanup().await });
        *self
            .cleanup_handle
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(handle);
    }

    async fn delete_batch(
        &self,
        inner: &mut Inner,
        ids: &[Uuid],
        on_failure: OnFailure,
    ) -> SyncResult<BatchDeleteReport> {
        let snapshot = require_synced(inner)?;
        let threshold = self.options.cleanup.near_limit_threshold;
        let mut report = BatchDeleteReport::default();

        self.publish(SyncState::Syncing {
            phase: SyncPhase::Uploading,
        });
        for (pos, id) in ids.iter().enumerate() {
            if self.blobs.rate_limit().is_near_limit(threshold) {
                warn!(
                    remaining = ids.len() - pos,
                    "rate limit nearly exhausted, deferring deletions"
                );
                report.deferred.extend_from_slice(&ids[pos..]);
                break;
            }
            let Some(entry) = snapshot.index.get(id) else {
                report.failed.push((*id, SyncError::EntryNotFound(*id)));
                continue;
            };
            match self
                .blobs
                .delete_entry(id, entry.remote_version.as_deref())
                .await
            {
                Ok(()) => report.deleted.push(*id),
                Err(e) => {
                    warn!(%id, error = %e, "skipping entry whose blob could not be deleted");
                    report.failed.push((*id, e.into()));
                }
            }
        }

        if report.deleted.is_empty() {
            self.publish_synced(&snapshot);
            return Ok(report);
        }

        let candidate = snapshot
            .index
            .remove_many(&report.deleted, self.clock.now());
        self.commit(inner, &snapshot, candidate, on_failure).await?;
        info!(
            deleted = report.deleted.len(),
            failed = report.failed.len(),
            "batch delete committed"
        );
        Ok(report)
    }

    /// The index transaction: encrypt `candidate` and CAS-upload it against
    /// the token `base` was pulled at. A conflict is surfaced, never retried.
    async fn commit(
        &self,
        inner: &mut Inner,
        base: &Snapshot,
        candidate: VaultIndex,
        on_failure: OnFailure,
    ) -> SyncResult<Arc<VaultIndex>> {
        self.publish(SyncState::Syncing {
            phase: SyncPhase::Encrypting,
        });
        let sealed = match candidate
            .to_bytes()
            .and_then(|plain| self.crypto.seal(&plain, &self.key).map_err(Into::into))
        {
            Ok(sealed) => sealed,
            Err(e) => return self.fail(inner, base, e, on_failure),
        };

        self.publish(SyncState::Syncing {
            phase: SyncPhase::Uploading,
        });
        match self
            .blobs
            .upload_index(&sealed, base.version_token.as_deref())
            .await
        {
            Ok(version) => {
                let snapshot = Snapshot {
                    index: Arc::new(candidate),
                    version_token: Some(version),
                    last_sync_at: self.clock.now(),
                };
                debug!(version = ?snapshot.version_token, entries = snapshot.index.len(), "index uploaded");
                self.store_backup(&snapshot);
                self.publish_synced(&snapshot);
                let index = snapshot.index.clone();
                inner.current = Some(snapshot);
                inner.pending = None;
                Ok(index)
            }
            Err(RemoteError::ConflictError(reason)) => {
                warn!(%reason, "index upload rejected: remote changed since last sync");
                if on_failure == OnFailure::Abort {
                    inner.pending = Some(Pending {
                        base: base.index.clone(),
                        candidate,
                    });
                }
                self.fail(inner, base, SyncError::Conflict, on_failure)
            }
            Err(e) => self.fail(inner, base, e.into(), on_failure),
        }
    }

    async fn pull(&self) -> SyncResult<Snapshot> {
        self.publish(SyncState::Syncing {
            phase: SyncPhase::Downloading,
        });
        let now = self.clock.now();

        let Some(remote) = self.blobs.download_index().await? else {
            debug!("no remote index yet, starting empty");
            let snapshot = Snapshot {
                index: Arc::new(VaultIndex::empty()),
                version_token: None,
                last_sync_at: now,
            };
            self.store_backup(&snapshot);
            return Ok(snapshot);
        };

        self.publish(SyncState::Syncing {
            phase: SyncPhase::Decrypting,
        });
        let index = match self.crypto.decrypt(&remote.content, self.key.as_bytes()) {
            Ok(plaintext) => VaultIndex::from_bytes(&plaintext)?,
            Err(e) => {
                warn!(error = %e, "remote index could not be decrypted, trying local backup");
                let backup = self.load_backup().ok_or(SyncError::DecryptionFailed)?;
                info!(entries = backup.len(), "recovered index from local backup");
                backup
            }
        };

        let snapshot = Snapshot {
            index: Arc::new(index),
            version_token: Some(remote.version),
            last_sync_at: now,
        };
        self.store_backup(&snapshot);
        Ok(snapshot)
    }

    fn load_backup(&self) -> Option<VaultIndex> {
        match self.cache.get(INDEX_BACKUP_KEY) {
            Ok(Some(bytes)) => match VaultIndex::from_bytes(&bytes) {
                Ok(index) => Some(index),
                Err(e) => {
                    warn!(error = %e, "local index backup is unreadable");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!(error = %e, "reading local index backup failed");
                None
            }
        }
    }

    /// Best effort: a failed backup never fails the operation.
    fn store_backup(&self, snapshot: &Snapshot) {
        let result = snapshot
            .index
            .to_bytes()
            .map_err(anyhow::Error::from)
            .and_then(|bytes| self.cache.put(INDEX_BACKUP_KEY, &bytes))
            .and_then(|()| {
                self.cache
                    .put(LAST_SYNC_KEY, snapshot.last_sync_at.to_rfc3339().as_bytes())
            });
        if let Err(e) = result {
            warn!(error = %e, "could not write local index backup");
        }
    }

    fn publish(&self, state: SyncState) {
        self.state_tx.send_replace(state);
    }

    fn publish_synced(&self, snapshot: &Snapshot) {
        self.publish(SyncState::Synced {
            index: snapshot.index.clone(),
            version_token: snapshot.version_token.clone(),
            last_sync_at: snapshot.last_sync_at,
        });
    }

    fn fail<T>(
        &self,
        inner: &mut Inner,
        base: &Snapshot,
        err: SyncError,
        on_failure: OnFailure,
    ) -> SyncResult<T> {
        match on_failure {
            OnFailure::Abort => self.abort(inner, err),
            OnFailure::KeepSnapshot => {
                warn!(error = %err, "background index update failed, keeping synced view");
                self.publish_synced(base);
                Err(err)
            }
        }
    }

    /// Drop the synced view and publish the failure. The caller must sync
    /// again before the next transaction.
    fn abort<T>(&self, inner: &mut Inner, err: SyncError) -> SyncResult<T> {
        warn!(error = %err, "vault operation failed");
        inner.current = None;
        self.publish(SyncState::Error { cause: err.clone() });
        Err(err)
    }
}

fn require_synced(inner: &Inner) -> SyncResult<Snapshot> {
    inner.current.clone().ok_or(SyncError::NotSynced)
}
