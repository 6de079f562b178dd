//! Time-based expiry of vault entries.
//!
//! A run selects entries with `now > expires_at`, oldest expiry first, and
//! deletes at most `batch_limit` of them. The rest wait for the next sync.
//! Per-entry failures are counted, never fatal.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use aowl_core::config::RetentionConfig;
use aowl_storage::RateLimitState;

use crate::error::SyncError;
use crate::index::VaultIndex;

pub const DEFAULT_BATCH_LIMIT: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionCleanup {
    pub batch_limit: usize,
    /// Skip the run entirely when `remaining` is at or below this
    pub near_limit_threshold: u32,
}

impl Default for RetentionCleanup {
    fn default() -> Self {
        Self {
            batch_limit: DEFAULT_BATCH_LIMIT,
            near_limit_threshold: 10,
        }
    }
}

impl RetentionCleanup {
    pub fn from_config(cfg: &RetentionConfig, near_limit_threshold: u32) -> Self {
        Self {
            batch_limit: cfg.batch_limit.max(1),
            near_limit_threshold,
        }
    }

    pub fn plan(
        &self,
        index: &VaultIndex,
        now: DateTime<Utc>,
        quota: &RateLimitState,
    ) -> CleanupPlan {
        let expired: Vec<Uuid> = index.expired_at(now).into_iter().map(|e| e.id).collect();
        let expired_total = expired.len();

        if quota.is_near_limit(self.near_limit_threshold) {
            return CleanupPlan {
                expired_total,
                batch: Vec::new(),
                deferred: expired_total,
            };
        }

        let batch: Vec<Uuid> = expired.into_iter().take(self.batch_limit).collect();
        CleanupPlan {
            expired_total,
            deferred: expired_total - batch.len(),
            batch,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupPlan {
    pub expired_total: usize,
    pub batch: Vec<Uuid>,
    /// Expired but left for a later run
    pub deferred: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub expired_total: usize,
    pub attempted: usize,
    pub deleted: usize,
    pub failed: usize,
    pub deferred: usize,
    /// Set when the batch could not run or its index update was rejected
    pub error: Option<SyncError>,
}

impl CleanupReport {
    pub fn is_clean(&self) -> bool {
        self.failed == 0 && self.deferred == 0 && self.error.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aowl_core::{EntryType, RetentionPeriod, VaultEntry};

    fn t(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    fn index_with_expired(count: usize, fresh: usize) -> VaultIndex {
        let mut index = VaultIndex::empty();
        for i in 0..count {
            let e = VaultEntry::new(
                EntryType::Text,
                format!("old-{i}"),
                None,
                1,
                Some(RetentionPeriod::OneMinute),
                t(-(i as i64) - 120),
            );
            index = index.add(e, t(0)).unwrap();
        }
        for i in 0..fresh {
            let e = VaultEntry::new(
                EntryType::Text,
                format!("new-{i}"),
                None,
                1,
                Some(RetentionPeriod::OneDay),
                t(0),
            );
            index = index.add(e, t(0)).unwrap();
        }
        index
    }

    #[test]
    fn test_plan_caps_batch() {
        let index = index_with_expired(60, 3);
        let plan = RetentionCleanup::default().plan(&index, t(0), &RateLimitState::default());

        assert_eq!(plan.expired_total, 60);
        assert_eq!(plan.batch.len(), 50);
        assert_eq!(plan.deferred, 10);

        // oldest expiry first
        let first = index.get(&plan.batch[0]).unwrap();
        assert_eq!(first.label, "old-59");
    }

    #[test]
    fn test_plan_nothing_expired() {
        let index = index_with_expired(0, 5);
        let plan = RetentionCleanup::default().plan(&index, t(0), &RateLimitState::default());
        assert_eq!(plan.expired_total, 0);
        assert!(plan.batch.is_empty());
    }

    #[test]
    fn test_plan_defers_everything_near_rate_limit() {
        let index = index_with_expired(5, 0);
        let quota = RateLimitState {
            limit: Some(5000),
            remaining: Some(3),
            reset_at: None,
        };
        let plan = RetentionCleanup::default().plan(&index, t(0), &quota);
        assert!(plan.batch.is_empty());
        assert_eq!(plan.deferred, 5);
    }

    #[test]
    fn test_from_config() {
        let cfg = RetentionConfig {
            batch_limit: 0,
            run_after_sync: true,
        };
        assert_eq!(RetentionCleanup::from_config(&cfg, 7).batch_limit, 1);
    }
}
