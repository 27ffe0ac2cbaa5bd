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

//! Configuration for the memory store.
//!
//! One [`MemoryConfig`] covers all five components: embedding shape and
//! index tuning for recall, default TTLs for the expiring store, window
//! definitions for the rate counters, and the background sweep interval.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Distance metric used when ranking embeddings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistanceMetric {
    /// 1 - cosine similarity. Zero-norm vectors score as maximally distant.
    Cosine,
    /// Straight-line (L2) distance.
    Euclidean,
}

impl Default for DistanceMetric {
    fn default() -> Self {
        DistanceMetric::Cosine
    }
}

/// Which index implementation backs vector recall.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexKind {
    /// Exact brute-force scan. Right choice for small corpora and tests.
    Flat,
    /// Layered small-world graph with tunable accuracy/speed trade-off.
    Hnsw,
}

impl Default for IndexKind {
    fn default() -> Self {
        IndexKind::Hnsw
    }
}

/// Graph construction and search parameters for the HNSW index.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct HnswParams {
    /// Neighbors kept per node on upper layers (layer 0 keeps twice this).
    pub m: usize,
    /// Candidate breadth while building the graph.
    pub ef_construction: usize,
    /// Candidate breadth while searching. Clamped to at least k per query.
    pub ef_search: usize,
}

impl Default for HnswParams {
    fn default() -> Self {
        Self {
            m: 16,
            ef_construction: 200,
            ef_search: 100,
        }
    }
}

/// One fixed rate window: name, length, and the engine-enforced threshold.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateWindowConfig {
    /// Window label, e.g. "per-minute". Part of the counter key.
    pub name: String,
    /// Window length. Counters created in this window expire after it.
    pub length: Duration,
    /// Counts above this are reported as violations by the engine.
    pub threshold: u64,
}

impl RateWindowConfig {
    pub fn new(name: impl Into<String>, length: Duration, threshold: u64) -> Self {
        Self {
            name: name.into(),
            length,
            threshold,
        }
    }
}

/// Top-level configuration for the memory engine and its substructures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Embedding dimensionality every stored or queried vector must match.
    pub dimension: usize,

    /// Distance metric for the vector index.
    pub metric: DistanceMetric,

    /// Index implementation behind recall.
    pub index: IndexKind,

    /// HNSW tuning. Ignored by the flat index.
    pub hnsw: HnswParams,

    /// TTL applied to appended messages when the caller does not supply one.
    pub default_message_ttl: Duration,

    /// Upper bound on candidates fetched per recall before truncating to k.
    pub max_candidates: usize,

    /// Fixed rate windows enforced per subject.
    pub rate_windows: Vec<RateWindowConfig>,

    /// Interval between background maintenance passes.
    pub sweep_interval: Duration,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            dimension: 384,
            metric: DistanceMetric::default(),
            index: IndexKind::default(),
            hnsw: HnswParams::default(),
            default_message_ttl: Duration::from_secs(30 * 60),
            max_candidates: 1000,
            rate_windows: vec![
                RateWindowConfig::new("per-minute", Duration::from_secs(60), 120),
                RateWindowConfig::new("per-hour", Duration::from_secs(3600), 3600),
            ],
            sweep_interval: Duration::from_secs(60),
        }
    }
}

impl MemoryConfig {
    /// Small-dimension config with the exact flat index, for tests.
    pub fn for_testing() -> Self {
        Self {
            dimension: 4,
            index: IndexKind::Flat,
            default_message_ttl: Duration::from_secs(60),
            max_candidates: 64,
            rate_windows: vec![RateWindowConfig::new(
                "per-minute",
                Duration::from_secs(60),
                10,
            )],
            sweep_interval: Duration::from_secs(3600),
            ..Self::default()
        }
    }

    /// Production defaults at a given embedding dimensionality.
    pub fn with_dimension(dimension: usize) -> Self {
        Self {
            dimension,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = MemoryConfig::default();
        assert_eq!(config.dimension, 384);
        assert_eq!(config.metric, DistanceMetric::Cosine);
        assert_eq!(config.index, IndexKind::Hnsw);
        assert_eq!(config.hnsw.m, 16);
        assert_eq!(config.rate_windows.len(), 2);
    }

    #[test]
    fn test_testing_config() {
        let config = MemoryConfig::for_testing();
        assert_eq!(config.dimension, 4);
        assert_eq!(config.index, IndexKind::Flat);
        assert_eq!(config.rate_windows.len(), 1);
    }

    #[test]
    fn test_config_round_trips_through_json() {
        let config = MemoryConfig::with_dimension(768);
        let json = serde_json::to_string(&config).unwrap();
        let back: MemoryConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.dimension, 768);
        assert_eq!(back.metric, config.metric);
        assert_eq!(back.sweep_interval, config.sweep_interval);
    }
}
