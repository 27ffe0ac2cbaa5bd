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

//! Layered small-world graph index for approximate nearest neighbor search.
//!
//! Nodes are assigned a random top layer with an exponentially decaying
//! distribution; searches descend greedily through the sparse upper layers
//! and run a breadth-bounded scan at the base layer. Attribute filters are
//! fused into that scan: non-matching nodes still route the traversal but
//! are never collected, so a filtered search keeps filling toward k instead
//! of post-filtering an unfiltered top-k.
//!
//! Removals tombstone the slot. Tombstones keep routing (their links stay
//! traversable) but are never returned; `compact` rebuilds the graph once
//! they dominate the live entries.

use crate::filter::Filter;
use crate::vector::{distance, EntryAttributes, SearchHit, VectorIndex};
use mnemo_core::{DistanceMetric, HnswParams, MemoryError, MemoryResult};
use parking_lot::RwLock;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use smallvec::SmallVec;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};
use tracing::debug;

/// Hard cap on assigned layers. With m = 16 the draw almost never passes 6.
const MAX_LAYER: usize = 16;

/// Tombstones tolerated before `compact` rebuilds.
const COMPACT_MIN_TOMBSTONES: usize = 64;

/// Seed for the layer-assignment rng, so builds are reproducible.
const LAYER_RNG_SEED: u64 = 0x6d6e_656d_6f;

/// Neighbor slots, inline up to the default m.
type Neighbors = SmallVec<[u32; 16]>;

/// f32 distance with a total order so it can live in heaps and sort keys.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Dist(f32);

impl Eq for Dist {}

impl PartialOrd for Dist {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Dist {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.total_cmp(&other.0)
    }
}

struct Node {
    entry_id: u128,
    vector: Vec<f32>,
    attributes: EntryAttributes,
    /// Neighbor lists per layer; index 0 is the base layer.
    layers: Vec<Neighbors>,
    deleted: bool,
}

impl Node {
    fn top_layer(&self) -> usize {
        self.layers.len() - 1
    }
}

/// Point-in-time counters for observability.
#[derive(Debug, Clone, serde::Serialize)]
pub struct HnswStats {
    pub entries: usize,
    pub tombstones: usize,
    pub layers: usize,
    pub metric: DistanceMetric,
}

struct HnswGraph {
    metric: DistanceMetric,
    params: HnswParams,
    nodes: Vec<Node>,
    by_entry: HashMap<u128, u32>,
    /// Slot holding the highest live layer. May point at a tombstone
    /// transiently inside an insert; never between operations.
    entry_point: Option<u32>,
    tombstones: usize,
    /// Layer draw multiplier: 1 / ln(m).
    level_norm: f64,
    rng: StdRng,
}

impl HnswGraph {
    fn new(metric: DistanceMetric, params: HnswParams) -> Self {
        let m = params.m.max(2);
        Self {
            metric,
            params: HnswParams { m, ..params },
            nodes: Vec::new(),
            by_entry: HashMap::new(),
            entry_point: None,
            tombstones: 0,
            level_norm: 1.0 / (m as f64).ln(),
            rng: StdRng::seed_from_u64(LAYER_RNG_SEED),
        }
    }

    fn dist_to(&self, query: &[f32], slot: u32) -> Dist {
        Dist(distance(self.metric, query, &self.nodes[slot as usize].vector))
    }

    fn neighbors(&self, slot: u32, layer: usize) -> &[u32] {
        self.nodes[slot as usize]
            .layers
            .get(layer)
            .map(|list| list.as_slice())
            .unwrap_or(&[])
    }

    fn m_max(&self, layer: usize) -> usize {
        if layer == 0 {
            self.params.m * 2
        } else {
            self.params.m
        }
    }

    fn random_layer(&mut self) -> usize {
        // Draw from (0, 1] so ln never sees zero.
        let u: f64 = 1.0 - self.rng.gen::<f64>();
        (((-u.ln()) * self.level_norm) as usize).min(MAX_LAYER)
    }

    fn eligible(&self, slot: u32, filter: Option<&Filter>) -> bool {
        let node = &self.nodes[slot as usize];
        if node.deleted {
            return false;
        }
        match filter {
            Some(f) => f.matches(&node.attributes),
            None => true,
        }
    }

    /// Hill-climb to the closest node reachable at one layer.
    fn greedy_closest(&self, query: &[f32], mut best: u32, layer: usize) -> u32 {
        let mut best_dist = self.dist_to(query, best);
        loop {
            let mut improved = false;
            for &neighbor in self.neighbors(best, layer) {
                let d = self.dist_to(query, neighbor);
                if d < best_dist {
                    best = neighbor;
                    best_dist = d;
                    improved = true;
                }
            }
            if !improved {
                return best;
            }
        }
    }

    /// Breadth-bounded scan of one layer.
    ///
    /// Every discovered node joins the traversal frontier, but only
    /// eligible nodes (live, and matching the filter when one is given)
    /// are collected. Returns up to ef results, ascending by distance.
    fn search_layer(
        &self,
        query: &[f32],
        entry: u32,
        ef: usize,
        layer: usize,
        filter: Option<&Filter>,
    ) -> Vec<(Dist, u32)> {
        let mut visited: HashSet<u32> = HashSet::new();
        let mut frontier: BinaryHeap<Reverse<(Dist, u32)>> = BinaryHeap::new();
        let mut results: BinaryHeap<(Dist, u32)> = BinaryHeap::new();

        let d = self.dist_to(query, entry);
        visited.insert(entry);
        frontier.push(Reverse((d, entry)));
        if self.eligible(entry, filter) {
            results.push((d, entry));
        }

        while let Some(Reverse((current_dist, current))) = frontier.pop() {
            if results.len() >= ef {
                if let Some(&(worst, _)) = results.peek() {
                    if current_dist > worst {
                        break;
                    }
                }
            }
            for &neighbor in self.neighbors(current, layer) {
                if !visited.insert(neighbor) {
                    continue;
                }
                let d = self.dist_to(query, neighbor);
                let keep_exploring = match results.peek() {
                    Some(&(worst, _)) if results.len() >= ef => d < worst,
                    _ => true,
                };
                if keep_exploring {
                    frontier.push(Reverse((d, neighbor)));
                    if self.eligible(neighbor, filter) {
                        results.push((d, neighbor));
                        if results.len() > ef {
                            results.pop();
                        }
                    }
                }
            }
        }

        results.into_sorted_vec()
    }

    fn insert_node(&mut self, entry_id: u128, vector: Vec<f32>, attributes: EntryAttributes) {
        // Re-inserting an id replaces it: the old slot becomes a tombstone
        // before the search below, so the new node never links to it.
        if let Some(old_slot) = self.by_entry.remove(&entry_id) {
            self.nodes[old_slot as usize].deleted = true;
            self.tombstones += 1;
        }

        let level = self.random_layer();
        let new_slot = self.nodes.len() as u32;
        self.nodes.push(Node {
            entry_id,
            vector,
            attributes,
            layers: vec![Neighbors::new(); level + 1],
            deleted: false,
        });
        self.by_entry.insert(entry_id, new_slot);

        let Some(mut ep) = self.entry_point else {
            self.entry_point = Some(new_slot);
            return;
        };
        let max_layer = self.nodes[ep as usize].top_layer();
        let query = self.nodes[new_slot as usize].vector.clone();

        for layer in ((level + 1)..=max_layer).rev() {
            ep = self.greedy_closest(&query, ep, layer);
        }

        for layer in (0..=level.min(max_layer)).rev() {
            let candidates =
                self.search_layer(&query, ep, self.params.ef_construction, layer, None);
            if candidates.is_empty() {
                continue;
            }
            ep = candidates[0].1;

            let take = self.params.m.min(candidates.len());
            let selected: Vec<u32> = candidates.iter().take(take).map(|&(_, slot)| slot).collect();
            self.nodes[new_slot as usize].layers[layer] = selected.iter().copied().collect();

            let m_max = self.m_max(layer);
            for &neighbor in &selected {
                self.nodes[neighbor as usize].layers[layer].push(new_slot);
                if self.nodes[neighbor as usize].layers[layer].len() > m_max {
                    self.shrink_neighbors(neighbor, layer, m_max);
                }
            }
        }

        if level > max_layer {
            self.entry_point = Some(new_slot);
        } else if let Some(ep_slot) = self.entry_point {
            if self.nodes[ep_slot as usize].deleted {
                self.entry_point = self.pick_live_entry_point();
            }
        }
    }

    /// Cap a neighbor list at m_max, keeping the closest.
    fn shrink_neighbors(&mut self, slot: u32, layer: usize, m_max: usize) {
        let mut scored: Vec<(Dist, u32)> = {
            let base = &self.nodes[slot as usize].vector;
            self.nodes[slot as usize].layers[layer]
                .iter()
                .map(|&other| {
                    (
                        Dist(distance(
                            self.metric,
                            base,
                            &self.nodes[other as usize].vector,
                        )),
                        other,
                    )
                })
                .collect()
        };
        scored.sort();
        scored.truncate(m_max);
        self.nodes[slot as usize].layers[layer] =
            scored.into_iter().map(|(_, slot)| slot).collect();
    }

    fn remove_node(&mut self, entry_id: u128) -> bool {
        let Some(slot) = self.by_entry.remove(&entry_id) else {
            return false;
        };
        self.nodes[slot as usize].deleted = true;
        self.tombstones += 1;
        if self.entry_point == Some(slot) {
            self.entry_point = self.pick_live_entry_point();
        }
        true
    }

    /// Live node carrying the highest layer, if any.
    fn pick_live_entry_point(&self) -> Option<u32> {
        let mut best: Option<u32> = None;
        for (idx, node) in self.nodes.iter().enumerate() {
            if node.deleted {
                continue;
            }
            let replace = match best {
                Some(current) => node.top_layer() > self.nodes[current as usize].top_layer(),
                None => true,
            };
            if replace {
                best = Some(idx as u32);
            }
        }
        best
    }

    fn search_graph(&self, query: &[f32], k: usize, ef: usize, filter: &Filter) -> Vec<(Dist, u128)> {
        let Some(mut ep) = self.entry_point else {
            return Vec::new();
        };
        for layer in (1..=self.nodes[ep as usize].top_layer()).rev() {
            ep = self.greedy_closest(query, ep, layer);
        }
        self.search_layer(query, ep, ef.max(k), 0, Some(filter))
            .into_iter()
            .map(|(d, slot)| (d, self.nodes[slot as usize].entry_id))
            .collect()
    }
}

/// Approximate nearest-neighbor index over a layered graph.
///
/// Thread safety: searches share a read lock; inserts and removals take
/// the write lock.
pub struct HnswIndex {
    dimension: usize,
    metric: DistanceMetric,
    params: HnswParams,
    graph: RwLock<HnswGraph>,
}

impl HnswIndex {
    pub fn new(dimension: usize, metric: DistanceMetric, params: HnswParams) -> Self {
        Self {
            dimension,
            metric,
            params,
            graph: RwLock::new(HnswGraph::new(metric, params)),
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

    pub fn stats(&self) -> HnswStats {
        let graph = self.graph.read();
        let layers = graph
            .entry_point
            .map(|ep| graph.nodes[ep as usize].top_layer() + 1)
            .unwrap_or(0);
        HnswStats {
            entries: graph.by_entry.len(),
            tombstones: graph.tombstones,
            layers,
            metric: self.metric,
        }
    }

    /// Rebuild the graph from its live entries, dropping every tombstone.
    /// Returns tombstones reclaimed.
    pub fn rebuild(&self) -> usize {
        let mut graph = self.graph.write();
        let reclaimed = graph.tombstones;
        if reclaimed == 0 {
            return 0;
        }
        let live: Vec<(u128, Vec<f32>, EntryAttributes)> = graph
            .nodes
            .iter()
            .filter(|node| !node.deleted)
            .map(|node| (node.entry_id, node.vector.clone(), node.attributes.clone()))
            .collect();

        let mut fresh = HnswGraph::new(self.metric, self.params);
        for (entry_id, vector, attributes) in live {
            fresh.insert_node(entry_id, vector, attributes);
        }
        debug!(
            entries = fresh.by_entry.len(),
            reclaimed, "hnsw graph rebuilt"
        );
        *graph = fresh;
        reclaimed
    }
}

impl VectorIndex for HnswIndex {
    fn insert(
        &self,
        entry_id: u128,
        vector: Vec<f32>,
        attributes: EntryAttributes,
    ) -> MemoryResult<()> {
        self.check_dimension(vector.len())?;
        self.graph.write().insert_node(entry_id, vector, attributes);
        Ok(())
    }

    fn search(&self, query: &[f32], k: usize, filter: &Filter) -> MemoryResult<Vec<SearchHit>> {
        self.check_dimension(query.len())?;
        filter.validate()?;
        if k == 0 {
            return Ok(Vec::new());
        }

        let graph = self.graph.read();
        let ef = self.params.ef_search.max(k);
        let mut hits: Vec<SearchHit> = graph
            .search_graph(query, k, ef, filter)
            .into_iter()
            .map(|(d, entry_id)| SearchHit {
                entry_id,
                distance: d.0,
            })
            .collect();
        drop(graph);

        hits.sort_by(|a, b| {
            a.distance
                .total_cmp(&b.distance)
                .then(a.entry_id.cmp(&b.entry_id))
        });
        hits.truncate(k);
        Ok(hits)
    }

    fn remove(&self, entry_id: u128) -> bool {
        self.graph.write().remove_node(entry_id)
    }

    fn contains(&self, entry_id: u128) -> bool {
        self.graph.read().by_entry.contains_key(&entry_id)
    }

    fn len(&self) -> usize {
        self.graph.read().by_entry.len()
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn compact(&self) -> usize {
        let (tombstones, live) = {
            let graph = self.graph.read();
            (graph.tombstones, graph.by_entry.len())
        };
        if tombstones >= COMPACT_MIN_TOMBSTONES && tombstones >= live {
            self.rebuild()
        } else {
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flat::FlatIndex;
    use crate::vector::EntrySource;
    use std::sync::Arc;
    use std::thread;

    const DIM: usize = 8;

    fn attrs(owner: &str, category: &str) -> EntryAttributes {
        EntryAttributes {
            owner_id: owner.to_string(),
            category: category.to_string(),
            importance: 0.5,
            created_at_us: 100,
            source: EntrySource::Durable,
        }
    }

    fn random_vectors(n: usize, seed: u64) -> Vec<Vec<f32>> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..n)
            .map(|_| (0..DIM).map(|_| rng.gen::<f32>() * 2.0 - 1.0).collect())
            .collect()
    }

    fn test_index() -> HnswIndex {
        HnswIndex::new(DIM, DistanceMetric::Cosine, HnswParams::default())
    }

    #[test]
    fn test_insert_then_search_finds_self() {
        let index = test_index();
        let vectors = random_vectors(60, 7);
        for (i, v) in vectors.iter().enumerate() {
            index.insert(i as u128, v.clone(), attrs("alice", "fact")).unwrap();
        }

        for (i, v) in vectors.iter().take(10).enumerate() {
            let hits = index.search(v, 3, &Filter::new()).unwrap();
            assert_eq!(hits[0].entry_id, i as u128);
            assert!(hits[0].distance.abs() < 1e-4);
        }
    }

    #[test]
    fn test_matches_flat_scan_when_corpus_fits_in_ef() {
        let hnsw = test_index();
        let flat = FlatIndex::new(DIM, DistanceMetric::Cosine);
        for (i, v) in random_vectors(40, 11).into_iter().enumerate() {
            let owner = if i % 2 == 0 { "alice" } else { "bob" };
            hnsw.insert(i as u128, v.clone(), attrs(owner, "fact")).unwrap();
            flat.insert(i as u128, v, attrs(owner, "fact")).unwrap();
        }

        for query in random_vectors(5, 99) {
            for filter in [Filter::new(), Filter::new().owner("alice")] {
                let graph_hits = hnsw.search(&query, 5, &filter).unwrap();
                let exact_hits = flat.search(&query, 5, &filter).unwrap();
                let graph_ids: Vec<u128> = graph_hits.iter().map(|h| h.entry_id).collect();
                let exact_ids: Vec<u128> = exact_hits.iter().map(|h| h.entry_id).collect();
                assert_eq!(graph_ids, exact_ids);
            }
        }
    }

    #[test]
    fn test_filtered_search_never_violates_the_predicate() {
        let index = test_index();
        for (i, v) in random_vectors(50, 13).into_iter().enumerate() {
            let owner = if i % 2 == 0 { "alice" } else { "bob" };
            index.insert(i as u128, v, attrs(owner, "fact")).unwrap();
        }

        let filter = Filter::new().owner("bob");
        for query in random_vectors(4, 17) {
            let hits = index.search(&query, 10, &filter).unwrap();
            assert!(hits.len() <= 10);
            // Only odd ids belong to bob.
            for hit in &hits {
                assert_eq!(hit.entry_id % 2, 1);
            }
            for pair in hits.windows(2) {
                assert!(pair[0].distance <= pair[1].distance);
            }
        }
    }

    #[test]
    fn test_removed_entry_is_never_returned() {
        let index = test_index();
        let vectors = random_vectors(20, 19);
        for (i, v) in vectors.iter().enumerate() {
            index.insert(i as u128, v.clone(), attrs("alice", "fact")).unwrap();
        }

        assert!(index.remove(7));
        assert!(!index.remove(7));
        assert!(!index.contains(7));
        assert_eq!(index.len(), 19);

        // Even a search centered on the removed vector must skip it.
        let hits = index.search(&vectors[7], 20, &Filter::new()).unwrap();
        assert!(hits.iter().all(|h| h.entry_id != 7));
        assert_eq!(index.stats().tombstones, 1);
    }

    #[test]
    fn test_reinsert_replaces_the_vector() {
        let index = HnswIndex::new(4, DistanceMetric::Cosine, HnswParams::default());
        index
            .insert(1, vec![1.0, 0.0, 0.0, 0.0], attrs("alice", "fact"))
            .unwrap();
        index
            .insert(1, vec![0.0, 1.0, 0.0, 0.0], attrs("alice", "pref"))
            .unwrap();

        assert_eq!(index.len(), 1);
        let hits = index
            .search(&[0.0, 1.0, 0.0, 0.0], 1, &Filter::new())
            .unwrap();
        assert_eq!(hits[0].entry_id, 1);
        assert!(hits[0].distance.abs() < 1e-6);

        // The old direction now scores as far away; the tombstoned copy
        // must not resurface.
        let hits = index
            .search(&[1.0, 0.0, 0.0, 0.0], 1, &Filter::new())
            .unwrap();
        assert_eq!(hits[0].entry_id, 1);
        assert!(hits[0].distance > 0.5);
    }

    #[test]
    fn test_entry_point_removal_recovers() {
        let index = HnswIndex::new(4, DistanceMetric::Cosine, HnswParams::default());
        index
            .insert(1, vec![1.0, 0.0, 0.0, 0.0], attrs("alice", "fact"))
            .unwrap();
        assert!(index.remove(1));
        assert!(index
            .search(&[1.0, 0.0, 0.0, 0.0], 5, &Filter::new())
            .unwrap()
            .is_empty());

        index
            .insert(2, vec![0.0, 1.0, 0.0, 0.0], attrs("alice", "fact"))
            .unwrap();
        let hits = index
            .search(&[0.0, 1.0, 0.0, 0.0], 5, &Filter::new())
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].entry_id, 2);
    }

    #[test]
    fn test_rebuild_reclaims_tombstones() {
        let index = test_index();
        let vectors = random_vectors(10, 23);
        for (i, v) in vectors.iter().enumerate() {
            index.insert(i as u128, v.clone(), attrs("alice", "fact")).unwrap();
        }
        for id in 0..5u128 {
            index.remove(id);
        }
        assert_eq!(index.stats().tombstones, 5);

        assert_eq!(index.rebuild(), 5);
        let stats = index.stats();
        assert_eq!(stats.entries, 5);
        assert_eq!(stats.tombstones, 0);

        let hits = index.search(&vectors[8], 1, &Filter::new()).unwrap();
        assert_eq!(hits[0].entry_id, 8);
    }

    #[test]
    fn test_compact_waits_for_threshold() {
        let index = test_index();
        for (i, v) in random_vectors(10, 29).into_iter().enumerate() {
            index.insert(i as u128, v, attrs("alice", "fact")).unwrap();
        }
        index.remove(0);
        // One tombstone is far under the threshold; compact declines.
        assert_eq!(index.compact(), 0);
        assert_eq!(index.stats().tombstones, 1);
    }

    #[test]
    fn test_validation_errors() {
        let index = test_index();
        assert!(matches!(
            index.insert(1, vec![1.0], attrs("a", "c")),
            Err(MemoryError::DimensionMismatch { expected: 8, actual: 1 })
        ));
        assert!(matches!(
            index.search(&[1.0], 1, &Filter::new()),
            Err(MemoryError::DimensionMismatch { .. })
        ));
        let bad = Filter::new().created_between(10, 1);
        assert!(matches!(
            index.search(&[0.0; 8], 1, &bad),
            Err(MemoryError::Predicate(_))
        ));
    }

    #[test]
    fn test_concurrent_inserts_and_searches() {
        let index = Arc::new(test_index());
        let writer_count = 4;
        let per_writer = 50;

        let mut handles = Vec::new();
        for t in 0..writer_count {
            let index = Arc::clone(&index);
            handles.push(thread::spawn(move || {
                for (i, v) in random_vectors(per_writer, 100 + t as u64).into_iter().enumerate() {
                    let id = (t * 1000 + i) as u128;
                    index.insert(id, v, attrs("alice", "fact")).unwrap();
                }
            }));
        }
        for _ in 0..2 {
            let index = Arc::clone(&index);
            handles.push(thread::spawn(move || {
                for query in random_vectors(20, 555) {
                    let hits = index.search(&query, 5, &Filter::new()).unwrap();
                    for pair in hits.windows(2) {
                        assert!(pair[0].distance <= pair[1].distance);
                    }
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(index.len(), writer_count * per_writer);
    }
}
