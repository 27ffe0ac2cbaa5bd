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

//! The vector index contract and distance math.
//!
//! Both index implementations rank by distance, ascending, with ties broken
//! by ascending entry id so equal-distance results are deterministic across
//! runs and across implementations.

use crate::filter::Filter;
use mnemo_core::{DistanceMetric, MemoryResult, Micros};
use serde::{Deserialize, Serialize};

/// Which substructure an index entry came from.
///
/// Durable entries are backed by the record store; ephemeral entries are
/// backed by an expiring field and need a liveness check when they surface
/// in results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntrySource {
    Durable,
    Ephemeral,
}

/// Filterable attributes carried by every index entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryAttributes {
    pub owner_id: String,
    pub category: String,
    pub importance: f32,
    pub created_at_us: Micros,
    pub source: EntrySource,
}

/// One search result.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub entry_id: u128,
    pub distance: f32,
}

/// Pluggable nearest-neighbor index.
///
/// The filter is part of traversal, never a post-pass over an unfiltered
/// top-k: an implementation must be able to return k matching entries
/// whenever k matching entries exist in the index (subject to its recall
/// characteristics), regardless of how many non-matching entries rank
/// closer.
pub trait VectorIndex: Send + Sync {
    /// Add or replace one entry. Rejects vectors of the wrong length with
    /// `DimensionMismatch` before touching any state.
    fn insert(
        &self,
        entry_id: u128,
        vector: Vec<f32>,
        attributes: EntryAttributes,
    ) -> MemoryResult<()>;

    /// Up to k nearest entries satisfying the filter, ascending by
    /// `(distance, entry_id)`. Fewer than k results is normal when the
    /// matching corpus is small. k = 0 reads as empty.
    fn search(&self, query: &[f32], k: usize, filter: &Filter) -> MemoryResult<Vec<SearchHit>>;

    /// Remove one entry. Idempotent: false when already gone. A removed
    /// entry is never returned by search, even if the implementation
    /// defers physical reclamation.
    fn remove(&self, entry_id: u128) -> bool;

    fn contains(&self, entry_id: u128) -> bool;

    /// Live entries (removed ones excluded).
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn dimension(&self) -> usize;

    /// Reclaim storage deferred by `remove`. Returns entries reclaimed;
    /// implementations with immediate reclamation return 0.
    fn compact(&self) -> usize;
}

/// Cosine similarity over raw slices. Mismatched lengths and zero-norm
/// vectors score 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a < 1e-8 || norm_b < 1e-8 {
        return 0.0;
    }

    dot / (norm_a * norm_b)
}

/// Cosine distance: 1 - similarity, so identical directions score ~0.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    1.0 - cosine_similarity(a, b)
}

/// Straight-line distance.
pub fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

/// Distance under the configured metric. Smaller is closer for both.
pub fn distance(metric: DistanceMetric, a: &[f32], b: &[f32]) -> f32 {
    match metric {
        DistanceMetric::Cosine => cosine_distance(a, b),
        DistanceMetric::Euclidean => euclidean_distance(a, b),
    }
}
