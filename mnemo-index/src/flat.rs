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

//! Exact brute-force vector index.
//!
//! Scans every entry, applying the filter before scoring, so results are
//! exact under any predicate. O(n) per search; the right backend for small
//! corpora and for checking the graph index's answers.

use crate::filter::Filter;
use crate::vector::{distance, EntryAttributes, SearchHit, VectorIndex};
use mnemo_core::{DistanceMetric, MemoryError, MemoryResult};
use parking_lot::RwLock;
use std::collections::HashMap;

struct FlatEntry {
    vector: Vec<f32>,
    attributes: EntryAttributes,
}

/// Exhaustive-scan index behind the same contract as the graph index.
pub struct FlatIndex {
    metric: DistanceMetric,
    dimension: usize,
    entries: RwLock<HashMap<u128, FlatEntry>>,
}

impl FlatIndex {
    pub fn new(dimension: usize, metric: DistanceMetric) -> Self {
        Self {
            metric,
            dimension,
            entries: RwLock::new(HashMap::new()),
        }
    }

    fn check_dimension(&self, len: usize) -> MemoryResult<()> {
        if len != self.dimension {
            return Err(MemoryError::DimensionMismatch {
                expected: self.dimension,
                actual: len,
            });
        }
        Ok(())
    }
}

impl VectorIndex for FlatIndex {
    fn insert(
        &self,
        entry_id: u128,
        vector: Vec<f32>,
        attributes: EntryAttributes,
    ) -> MemoryResult<()> {
        self.check_dimension(vector.len())?;
        self.entries
            .write()
            .insert(entry_id, FlatEntry { vector, attributes });
        Ok(())
    }

    fn search(&self, query: &[f32], k: usize, filter: &Filter) -> MemoryResult<Vec<SearchHit>> {
        self.check_dimension(query.len())?;
        filter.validate()?;
        if k == 0 {
            return Ok(Vec::new());
        }

        let entries = self.entries.read();
        let mut hits: Vec<SearchHit> = entries
            .iter()
            .filter(|(_, entry)| filter.matches(&entry.attributes))
            .map(|(&entry_id, entry)| SearchHit {
                entry_id,
                distance: distance(self.metric, query, &entry.vector),
            })
            .collect();

        hits.sort_by(|a, b| {
            a.distance
                .total_cmp(&b.distance)
                .then(a.entry_id.cmp(&b.entry_id))
        });
        hits.truncate(k);
        Ok(hits)
    }

    fn remove(&self, entry_id: u128) -> bool {
        self.entries.write().remove(&entry_id).is_some()
    }

    fn contains(&self, entry_id: u128) -> bool {
        self.entries.read().contains_key(&entry_id)
    }

    fn len(&self) -> usize {
        self.entries.read().len()
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn compact(&self) -> usize {
        // Removals already reclaim immediately.
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector::EntrySource;

    const DIM: usize = 3;

    fn attrs(owner: &str) -> EntryAttributes {
        EntryAttributes {
            owner_id: owner.to_string(),
            category: "fact".to_string(),
            importance: 0.5,
            created_at_us: 100,
            source: EntrySource::Durable,
        }
    }

    fn index_with_axes() -> FlatIndex {
        let index = FlatIndex::new(DIM, DistanceMetric::Cosine);
        index.insert(1, vec![1.0, 0.0, 0.0], attrs("alice")).unwrap();
        index.insert(2, vec![0.0, 1.0, 0.0], attrs("alice")).unwrap();
        index.insert(3, vec![0.0, 0.0, 1.0], attrs("bob")).unwrap();
        index
    }

    #[test]
    fn test_search_ascending_and_capped() {
        let index = index_with_axes();
        let hits = index
            .search(&[1.0, 0.1, 0.0], 2, &Filter::new())
            .unwrap();

        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].entry_id, 1);
        assert!(hits[0].distance <= hits[1].distance);
    }

    #[test]
    fn test_self_similarity() {
        let index = index_with_axes();
        let hits = index.search(&[0.0, 1.0, 0.0], 1, &Filter::new()).unwrap();
        assert_eq!(hits[0].entry_id, 2);
        assert!(hits[0].distance.abs() < 1e-6);
    }

    #[test]
    fn test_filter_is_applied_before_scoring() {
        let index = index_with_axes();
        // Entry 1 is the nearest overall but belongs to alice; a bob-only
        // search must surface bob's entry, not clip it out post-hoc.
        let hits = index
            .search(&[1.0, 0.0, 0.1], 5, &Filter::new().owner("bob"))
            .unwrap();

        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].entry_id, 3);
    }

    #[test]
    fn test_equal_distances_tie_break_by_id() {
        let index = FlatIndex::new(DIM, DistanceMetric::Cosine);
        for id in [5u128, 2, 9] {
            index.insert(id, vec![1.0, 0.0, 0.0], attrs("alice")).unwrap();
        }

        let hits = index.search(&[1.0, 0.0, 0.0], 3, &Filter::new()).unwrap();
        let ids: Vec<u128> = hits.iter().map(|h| h.entry_id).collect();
        assert_eq!(ids, vec![2, 5, 9]);
    }

    #[test]
    fn test_dimension_validation() {
        let index = index_with_axes();
        assert!(matches!(
            index.search(&[1.0, 0.0], 1, &Filter::new()),
            Err(MemoryError::DimensionMismatch {
                expected: 3,
                actual: 2
            })
        ));
        assert!(index
            .insert(7, vec![1.0], attrs("alice"))
            .is_err());
        assert!(!index.contains(7));
    }

    #[test]
    fn test_malformed_filter_rejected() {
        let index = index_with_axes();
        let err = index
            .search(&[1.0, 0.0, 0.0], 1, &Filter::new().created_between(5, 1))
            .unwrap_err();
        assert!(matches!(err, MemoryError::Predicate(_)));
    }

    #[test]
    fn test_remove_and_replace() {
        let index = index_with_axes();
        assert!(index.remove(3));
        assert!(!index.remove(3));
        assert_eq!(index.len(), 2);

        // Replacing an id swaps its vector in place.
        index.insert(1, vec![0.0, 0.0, 1.0], attrs("alice")).unwrap();
        assert_eq!(index.len(), 2);
        let hits = index.search(&[0.0, 0.0, 1.0], 1, &Filter::new()).unwrap();
        assert_eq!(hits[0].entry_id, 1);
    }

    #[test]
    fn test_k_zero_reads_empty() {
        let index = index_with_axes();
        assert!(index
            .search(&[1.0, 0.0, 0.0], 0, &Filter::new())
            .unwrap()
            .is_empty());
    }
}
