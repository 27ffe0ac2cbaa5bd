// Copyright 2025 Mnemo (https://github.com/mnemodb)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Durable attribute store for long-term memory records.
//!
//! Records have no TTL; they persist until deleted. An owner index keeps
//! cascading erasure proportional to the owner's footprint instead of the
//! whole store.

use dashmap::DashMap;
use mnemo_core::{MemoryError, MemoryResult, Micros};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::debug;

/// A long-term memory record.
///
/// The record id doubles as the vector index entry id for durable entries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredRecord {
    pub id: u128,
    pub owner_id: String,
    /// Coarse category such as "preference" or "fact".
    pub category: String,
    pub content: String,
    /// Caller-assigned weight in [0, 1].
    pub importance: f32,
    pub created_at_us: Micros,
    pub embedding: Vec<f32>,
}

/// Filter for scans over stored records.
///
/// All set conditions must hold (conjunction).
#[derive(Debug, Clone, Default)]
pub struct RecordQuery {
    pub owner_id: Option<String>,
    pub category: Option<String>,
    pub start_us: Option<Micros>,
    pub end_us: Option<Micros>,
    pub min_importance: Option<f32>,
    pub limit: Option<usize>,
    pub descending: bool,
}

impl RecordQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn owner(mut self, owner_id: impl Into<String>) -> Self {
        self.owner_id = Some(owner_id.into());
        self
    }

    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn time_range(mut self, start_us: Micros, end_us: Micros) -> Self {
        self.start_us = Some(start_us);
        self.end_us = Some(end_us);
        self
    }

    pub fn min_importance(mut self, min: f32) -> Self {
        self.min_importance = Some(min);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn descending(mut self) -> Self {
        self.descending = true;
        self
    }

    pub fn matches(&self, record: &StoredRecord) -> bool {
        if let Some(ref owner) = self.owner_id {
            if &record.owner_id != owner {
                return false;
            }
        }
        if let Some(ref category) = self.category {
            if &record.category != category {
                return false;
            }
        }
        if let Some(start) = self.start_us {
            if record.created_at_us < start {
                return false;
            }
        }
        if let Some(end) = self.end_us {
            if record.created_at_us > end {
                return false;
            }
        }
        if let Some(min) = self.min_importance {
            if record.importance < min {
                return false;
            }
        }
        true
    }
}

/// Point-in-time counters for observability.
#[derive(Debug, Clone, Serialize)]
pub struct RecordStoreStats {
    pub records: usize,
    pub owners: usize,
}

/// Keyed by record id, with a secondary owner index.
pub struct RecordStore {
    records: DashMap<u128, StoredRecord>,
    by_owner: DashMap<String, HashSet<u128>>,
    dimension: usize,
}

impl RecordStore {
    pub fn new(dimension: usize) -> Self {
        Self {
            records: DashMap::new(),
            by_owner: DashMap::new(),
            dimension,
        }
    }

    /// Insert a record, validating its embedding shape first. A mismatched
    /// embedding is rejected with no state change. Re-inserting an existing
    /// id replaces the record (and re-homes it if the owner changed).
    pub fn insert(&self, record: StoredRecord) -> MemoryResult<u128> {
        if record.embedding.len() != self.dimension {
            return Err(MemoryError::DimensionMismatch {
                expected: self.dimension,
                actual: record.embedding.len(),
            });
        }
        let id = record.id;
        let owner = record.owner_id.clone();
        if let Some(previous) = self.records.insert(id, record) {
            if previous.owner_id != owner {
                if let Some(mut ids) = self.by_owner.get_mut(&previous.owner_id) {
                    ids.remove(&id);
                }
            }
        }
        self.by_owner.entry(owner).or_default().insert(id);
        Ok(id)
    }

    pub fn get(&self, id: u128) -> MemoryResult<StoredRecord> {
        self.records
            .get(&id)
            .map(|r| r.clone())
            .ok_or_else(|| MemoryError::not_found(format!("record {id}")))
    }

    pub fn contains(&self, id: u128) -> bool {
        self.records.contains_key(&id)
    }

    /// Remove one record. Idempotent: false when already gone.
    pub fn delete(&self, id: u128) -> bool {
        let Some((_, record)) = self.records.remove(&id) else {
            return false;
        };
        let owner_empty = match self.by_owner.get_mut(&record.owner_id) {
            Some(mut ids) => {
                ids.remove(&id);
                ids.is_empty()
            }
            None => false,
        };
        if owner_empty {
            self.by_owner
                .remove_if(&record.owner_id, |_, ids| ids.is_empty());
        }
        true
    }

    /// Remove every record for one owner, returning the removed ids so the
    /// caller can unindex them.
    pub fn delete_by_owner(&self, owner_id: &str) -> Vec<u128> {
        let ids: Vec<u128> = match self.by_owner.remove(owner_id) {
            Some((_, ids)) => ids.into_iter().collect(),
            None => Vec::new(),
        };
        let mut removed = Vec::with_capacity(ids.len());
        for id in ids {
            if self.records.remove(&id).is_some() {
                removed.push(id);
            }
        }
        if !removed.is_empty() {
            debug!(owner_id, records = removed.len(), "record store erased owner");
        }
        removed
    }

    /// Filtered scan, ordered by `(created_at_us, id)`.
    ///
    /// When the query names an owner, only that owner's records are
    /// visited; otherwise this walks the whole store.
    pub fn query(&self, query: &RecordQuery) -> Vec<StoredRecord> {
        let mut results: Vec<StoredRecord> = match &query.owner_id {
            Some(owner) => match self.by_owner.get(owner) {
                Some(ids) => ids
                    .iter()
                    .filter_map(|id| self.records.get(id).map(|r| r.clone()))
                    .filter(|record| query.matches(record))
                    .collect(),
                None => Vec::new(),
            },
            None => self
                .records
                .iter()
                .filter(|entry| query.matches(entry.value()))
                .map(|entry| entry.value().clone())
                .collect(),
        };
        results.sort_by_key(|record| (record.created_at_us, record.id));
        if query.descending {
            results.reverse();
        }
        if let Some(limit) = query.limit {
            results.truncate(limit);
        }
        results
    }

    pub fn count(&self, owner_id: &str) -> usize {
        self.by_owner.get(owner_id).map(|ids| ids.len()).unwrap_or(0)
    }

    pub fn total_count(&self) -> usize {
        self.records.len()
    }

    pub fn stats(&self) -> RecordStoreStats {
        RecordStoreStats {
            records: self.records.len(),
            owners: self.by_owner.len(),
        }
    }

    pub fn clear(&self) {
        self.records.clear();
        self.by_owner.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DIM: usize = 4;

    fn test_record(id: u128, owner: &str, category: &str, created_at_us: u64) -> StoredRecord {
        StoredRecord {
            id,
            owner_id: owner.to_string(),
            category: category.to_string(),
            content: format!("record {id}"),
            importance: 0.5,
            created_at_us,
            embedding: vec![id as f32, 0.0, 0.0, 1.0],
        }
    }

    #[test]
    fn test_insert_get_round_trip() {
        let store = RecordStore::new(DIM);
        store.insert(test_record(1, "alice", "fact", 100)).unwrap();

        let record = store.get(1).unwrap();
        assert_eq!(record.owner_id, "alice");
        assert_eq!(record.content, "record 1");
        assert!(matches!(store.get(99), Err(MemoryError::NotFound(_))));
    }

    #[test]
    fn test_dimension_mismatch_leaves_no_state() {
        let store = RecordStore::new(DIM);
        let mut record = test_record(1, "alice", "fact", 100);
        record.embedding = vec![1.0, 2.0];

        let err = store.insert(record).unwrap_err();
        assert_eq!(
            err,
            MemoryError::DimensionMismatch {
                expected: DIM,
                actual: 2
            }
        );
        assert_eq!(store.total_count(), 0);
        assert_eq!(store.count("alice"), 0);
    }

    #[test]
    fn test_delete_is_idempotent() {
        let store = RecordStore::new(DIM);
        store.insert(test_record(1, "alice", "fact", 100)).unwrap();

        assert!(store.delete(1));
        assert!(!store.delete(1));
        assert_eq!(store.count("alice"), 0);
        assert_eq!(store.stats().owners, 0);
    }

    #[test]
    fn test_delete_by_owner_returns_removed_ids() {
        let store = RecordStore::new(DIM);
        store.insert(test_record(1, "alice", "fact", 100)).unwrap();
        store.insert(test_record(2, "alice", "fact", 200)).unwrap();
        store.insert(test_record(3, "bob", "fact", 300)).unwrap();

        let mut removed = store.delete_by_owner("alice");
        removed.sort();
        assert_eq!(removed, vec![1, 2]);
        assert_eq!(store.total_count(), 1);
        assert!(store.contains(3));
        assert!(store.delete_by_owner("nobody").is_empty());
    }

    #[test]
    fn test_reinsert_rehomes_owner() {
        let store = RecordStore::new(DIM);
        store.insert(test_record(1, "alice", "fact", 100)).unwrap();

        let mut moved = test_record(1, "bob", "fact", 150);
        moved.content = "now bob's".to_string();
        store.insert(moved).unwrap();

        assert_eq!(store.count("alice"), 0);
        assert_eq!(store.count("bob"), 1);
        assert_eq!(store.get(1).unwrap().content, "now bob's");
    }

    #[test]
    fn test_query_filters_and_orders() {
        let store = RecordStore::new(DIM);
        store.insert(test_record(1, "alice", "fact", 300)).unwrap();
        store.insert(test_record(2, "alice", "pref", 100)).unwrap();
        store.insert(test_record(3, "alice", "fact", 200)).unwrap();
        store.insert(test_record(4, "bob", "fact", 50)).unwrap();

        let results = store.query(&RecordQuery::new().owner("alice").category("fact"));
        let ids: Vec<u128> = results.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![3, 1]);

        let results = store.query(&RecordQuery::new().owner("alice").descending().limit(1));
        assert_eq!(results[0].id, 1);

        let results = store.query(&RecordQuery::new().time_range(50, 100));
        let ids: Vec<u128> = results.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![4, 2]);
    }

    #[test]
    fn test_query_min_importance() {
        let store = RecordStore::new(DIM);
        let mut high = test_record(1, "alice", "fact", 100);
        high.importance = 0.9;
        store.insert(high).unwrap();
        store.insert(test_record(2, "alice", "fact", 200)).unwrap();

        let results = store.query(&RecordQuery::new().min_importance(0.8));
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, 1);
    }
}
