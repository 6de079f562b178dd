//! The vault catalog.
//!
//! Mutations are functional: each returns a new index and leaves `self`
//! untouched, so the caller still holds the previous version for merging.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use aowl_core::VaultEntry;

use crate::error::{SyncError, SyncResult};

pub const INDEX_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaultIndex {
    schema_version: u32,
    entries: BTreeMap<Uuid, VaultEntry>,
    updated_at: DateTime<Utc>,
}

/// Serialized form: `{version, entries[], updated_at}`
#[derive(Serialize, Deserialize)]
struct IndexWire {
    version: u32,
    entries: Vec<VaultEntry>,
    updated_at: DateTime<Utc>,
}

impl Default for VaultIndex {
    fn default() -> Self {
        Self::empty()
    }
}

impl VaultIndex {
    /// Index with no entries, stamped at the Unix epoch so it never wins a
    /// timestamp comparison.
    pub fn empty() -> Self {
        Self {
            schema_version: INDEX_SCHEMA_VERSION,
            entries: BTreeMap::new(),
            updated_at: DateTime::UNIX_EPOCH,
        }
    }

    pub fn schema_version(&self) -> u32 {
        self.schema_version
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, id: &Uuid) -> Option<&VaultEntry> {
        self.entries.get(id)
    }

    pub fn contains(&self, id: &Uuid) -> bool {
        self.entries.contains_key(id)
    }

    pub fn entries(&self) -> impl Iterator<Item = &VaultEntry> {
        self.entries.values()
    }

    pub fn ids(&self) -> impl Iterator<Item = &Uuid> {
        self.entries.keys()
    }

    fn stamped(&self, entries: BTreeMap<Uuid, VaultEntry>, now: DateTime<Utc>) -> Self {
        Self {
            schema_version: self.schema_version,
            entries,
            updated_at: now.max(self.updated_at),
        }
    }

    pub fn add(&self, entry: VaultEntry, now: DateTime<Utc>) -> SyncResult<Self> {
        if self.entries.contains_key(&entry.id) {
            return Err(SyncError::DuplicateEntry(entry.id));
        }
        let mut entries = self.entries.clone();
        entries.insert(entry.id, entry);
        Ok(self.stamped(entries, now))
    }

    /// Replace an existing entry, matched by id.
    pub fn update(&self, entry: VaultEntry, now: DateTime<Utc>) -> SyncResult<Self> {
        if !self.entries.contains_key(&entry.id) {
            return Err(SyncError::EntryNotFound(entry.id));
        }
        let mut entries = self.entries.clone();
        entries.insert(entry.id, entry);
        Ok(self.stamped(entries, now))
    }

    pub fn remove(&self, id: &Uuid, now: DateTime<Utc>) -> SyncResult<Self> {
        if !self.entries.contains_key(id) {
            return Err(SyncError::EntryNotFound(*id));
        }
        let mut entries = self.entries.clone();
        entries.remove(id);
        Ok(self.stamped(entries, now))
    }

    /// Remove every listed id that is present; absent ids are ignored.
    pub fn remove_many<'a>(
        &self,
        ids: impl IntoIterator<Item = &'a Uuid>,
        now: DateTime<Utc>,
    ) -> Self {
        let mut entries = self.entries.clone();
        for id in ids {
            entries.remove(id);
        }
        self.stamped(entries, now)
    }

    /// Last-writer-wins per entry: the copy with the later `updated_at`
    /// wins, `self` wins ties, and entries on only one side are kept.
    pub fn merge(&self, other: &VaultIndex) -> Self {
        let mut entries = self.entries.clone();
        for (id, theirs) in &other.entries {
            match entries.get(id) {
                Some(ours) if ours.updated_at >= theirs.updated_at => {}
                _ => {
                    entries.insert(*id, theirs.clone());
                }
            }
        }
        Self {
            schema_version: self.schema_version.max(other.schema_version),
            entries,
            updated_at: self.updated_at.max(other.updated_at),
        }
    }

    /// Entries past their expiry at `now`, soonest-expired first.
    pub fn expired_at(&self, now: DateTime<Utc>) -> Vec<&VaultEntry> {
        let mut expired: Vec<&VaultEntry> = self
            .entries
            .values()
            .filter(|e| e.is_expired_at(now))
            .collect();
        expired.sort_by_key(|e| (e.expires_at(), e.id));
        expired
    }

    pub fn to_bytes(&self) -> SyncResult<Vec<u8>> {
        let wire = IndexWire {
            version: self.schema_version,
            entries: self.entries.values().cloned().collect(),
            updated_at: self.updated_at,
        };
        serde_json::to_vec(&wire).map_err(|e| SyncError::InvalidIndex(e.to_string()))
    }

    pub fn from_bytes(data: &[u8]) -> SyncResult<Self> {
        let wire: IndexWire =
            serde_json::from_slice(data).map_err(|e| SyncError::InvalidIndex(e.to_string()))?;
        let mut entries = BTreeMap::new();
        for entry in wire.entries {
            let id = entry.id;
            if entries.insert(id, entry).is_some() {
                return Err(SyncError::InvalidIndex(format!("duplicate entry id {id}")));
            }
        }
        Ok(Self {
            schema_version: wire.version,
            entries,
            updated_at: wire.updated_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aowl_core::{EntryType, RetentionPeriod};
    use chrono::Duration;

    fn t(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    fn entry(label: &str, at: DateTime<Utc>) -> VaultEntry {
        VaultEntry::new(EntryType::Text, label, None, 4, None, at)
    }

    #[test]
    fn test_add_update_remove() {
        let e = entry("note", t(0));
        let v1 = VaultIndex::empty().add(e.clone(), t(0)).unwrap();
        assert_eq!(v1.len(), 1);
        assert_eq!(v1.updated_at(), t(0));

        let dup = v1.add(e.clone(), t(1)).unwrap_err();
        assert_eq!(dup, SyncError::DuplicateEntry(e.id));

        let mut renamed = e.clone();
        renamed.label = "renamed".into();
        renamed.touch(t(5));
        let v2 = v1.update(renamed, t(5)).unwrap();
        assert_eq!(v2.get(&e.id).unwrap().label, "renamed");
        // previous version untouched
        assert_eq!(v1.get(&e.id).unwrap().label, "note");

        let v3 = v2.remove(&e.id, t(6)).unwrap();
        assert!(v3.is_empty());
        assert_eq!(
            v3.remove(&e.id, t(7)).unwrap_err(),
            SyncError::EntryNotFound(e.id)
        );
    }

    #[test]
    fn test_update_missing() {
        let e = entry("ghost", t(0));
        assert_eq!(
            VaultIndex::empty().update(e.clone(), t(0)).unwrap_err(),
            SyncError::EntryNotFound(e.id)
        );
    }

    #[test]
    fn test_merge_keeps_later_entry() {
        let e = entry("v1", t(0));
        let base = VaultIndex::empty().add(e.clone(), t(0)).unwrap();

        let mut newer = e.clone();
        newer.label = "v2".into();
        newer.touch(t(10));
        let theirs = base.update(newer, t(10)).unwrap();

        assert_eq!(base.merge(&theirs).get(&e.id).unwrap().label, "v2");
        assert_eq!(theirs.merge(&base).get(&e.id).unwrap().label, "v2");
    }

    #[test]
    fn test_expired_sorted_by_expiry() {
        let short = VaultEntry::new(
            EntryType::Text,
            "short",
            None,
            1,
            Some(RetentionPeriod::OneMinute),
            t(0),
        );
        let hour = VaultEntry::new(
            EntryType::Text,
            "hour",
            None,
            1,
            Some(RetentionPeriod::OneHour),
            t(-7200),
        );
        let forever = entry("forever", t(-1_000_000));
        let index = VaultIndex::empty()
            .add(short.clone(), t(0))
            .unwrap()
            .add(hour.clone(), t(0))
            .unwrap()
            .add(forever, t(0))
            .unwrap();

        let labels: Vec<_> = index
            .expired_at(t(61))
            .into_iter()
            .map(|e| e.label.as_str())
            .collect();
        assert_eq!(labels, vec!["hour", "short"]);
        assert_eq!(index.expired_at(t(59)).len(), 1);
        assert_eq!(index.expired_at(t(0) + Duration::seconds(60)).len(), 1);
    }

    #[test]
    fn test_wire_format() {
        let e = entry("note", t(0));
        let index = VaultIndex::empty().add(e.clone(), t(3)).unwrap();
        let json: serde_json::Value = serde_json::from_slice(&index.to_bytes().unwrap()).unwrap();

        assert_eq!(json["version"], 1);
        assert_eq!(json["entries"][0]["label"], "note");
        assert_eq!(json["entries"][0]["type"], "text");
        assert!(json["updated_at"].is_string());

        assert_eq!(VaultIndex::from_bytes(&index.to_bytes().unwrap()).unwrap(), index);
    }

    #[test]
    fn test_rejects_duplicate_ids_on_parse() {
        let e = entry("note", t(0));
        let wire = serde_json::json!({
            "version": 1,
            "entries": [e, e],
            "updated_at": t(0),
        });
        let bytes = serde_json::to_vec(&wire).unwrap();
        assert!(matches!(
            VaultIndex::from_bytes(&bytes),
            Err(SyncError::InvalidIndex(_))
        ));
        assert!(matches!(
            VaultIndex::from_bytes(b"{}"),
            Err(SyncError::InvalidIndex(_))
        ));
    }

    mod proptest_suite {
        use super::*;
        use proptest::prelude::*;

        fn arb_entry() -> impl Strategy<Value = VaultEntry> {
            (0i64..10_000, 0i64..10_000, "[a-z]{1,8}").prop_map(|(created, delta, label)| {
                let mut e = entry(&label, t(created));
                e.touch(t(created + delta));
                e
            })
        }

        fn arb_index() -> impl Strategy<Value = VaultIndex> {
            prop::collection::vec(arb_entry(), 0..12).prop_map(|entries| {
                entries
                    .into_iter()
                    .fold(VaultIndex::empty(), |idx, e| {
                        let at = e.updated_at;
                        idx.add(e, at).unwrap()
                    })
            })
        }

        proptest! {
            #[test]
            fn merge_with_empty_is_identity(index in arb_index()) {
                prop_assert_eq!(index.merge(&VaultIndex::empty()), index.clone());
                prop_assert_eq!(VaultIndex::empty().merge(&index), index);
            }

            #[test]
            fn merge_commutes_on_disjoint_ids(a in arb_index(), b in arb_index()) {
                // fresh v4 ids never collide in practice
                prop_assert_eq!(a.merge(&b), b.merge(&a));
                prop_assert_eq!(a.merge(&b).len(), a.len() + b.len());
            }

            #[test]
            fn merge_keeps_later_updated_at(
                base in arb_entry(),
                d1 in 0i64..1000,
                d2 in 0i64..1000,
            ) {
                let mut left = base.clone();
                left.label = "left".into();
                left.touch(base.updated_at + Duration::seconds(d1));
                let mut right = base.clone();
                right.label = "right".into();
                right.touch(base.updated_at + Duration::seconds(d2));

                let l = VaultIndex::empty().add(left.clone(), left.updated_at).unwrap();
                let r = VaultIndex::empty().add(right.clone(), right.updated_at).unwrap();
                let merged = l.merge(&r);
                let winner = merged.get(&base.id).unwrap();

                prop_assert_eq!(winner.updated_at, left.updated_at.max(right.updated_at));
                if d1 >= d2 {
                    prop_assert_eq!(winner.label.as_str(), "left");
                } else {
                    prop_assert_eq!(winner.label.as_str(), "right");
                }
            }
        }
    }
}
