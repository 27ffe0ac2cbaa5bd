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

//! Memory engine - main entry point for memory operations
//!
//! Orchestrates the expiring context store, the per-session order index,
//! the durable record store, the vector index, and the rate counters.

use crate::recall::{MemoryDraft, RecallHit, RecallOrigin, RecallQuery};
use crate::sweeper::{SweepStats, SweepTargets, Sweeper};
use dashmap::DashMap;
use mnemo_core::{Clock, IndexKind, MemoryConfig, MemoryError, MemoryResult, SystemClock};
use mnemo_index::{EntryAttributes, EntrySource, Filter, FlatIndex, HnswIndex, VectorIndex};
use mnemo_storage::{
    ContextStore, ContextStoreStats, GroupKey, OrderIndex, OrderIndexStats, OrderToken,
    RateCounter, RateCounterStats, RecordQuery, RecordStore, RecordStoreStats, StoredRecord,
};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

/// Category stamped on indexed session messages.
const MESSAGE_CATEGORY: &str = "message";

/// Erase passes before the engine reports the owner as still dirty.
const MAX_ERASE_PASSES: u32 = 3;

/// In-process hybrid memory store for conversational agents.
///
/// Session messages expire on a TTL and keep an insertion-order index;
/// durable memories persist until forgotten and are recallable by
/// embedding similarity with attribute filters; per-subject fixed
/// windows rate-limit whatever the caller meters.
///
/// Thread safety: every method takes `&self`; share the engine behind an
/// `Arc`. Compound mutations over the record store and the vector index
/// hold an internal write lock, so a concurrent recall sees either all
/// of such a change or none of it.
pub struct MemoryEngine {
    config: MemoryConfig,
    clock: Arc<dyn Clock>,
    /// Expiring session fields.
    context: Arc<ContextStore>,
    /// Insertion order per session. Pruned only by explicit reconcile.
    order: OrderIndex,
    /// Durable records.
    records: RecordStore,
    /// Similarity index over records and indexed messages.
    index: Arc<dyn VectorIndex>,
    /// Fixed-window counters.
    rate: Arc<RateCounter>,
    /// Last minted order score per group; scores only move forward.
    group_clocks: DashMap<GroupKey, u64>,
    /// Ephemeral index entries mapped to their backing field.
    ephemeral: Arc<DashMap<u128, (GroupKey, String)>>,
    /// One index entry per field: the field's current entry id.
    indexed_fields: Arc<DashMap<(GroupKey, String), u128>>,
    /// Write-held across record-plus-index mutations, read-held across
    /// recall hydration.
    visibility: RwLock<()>,
    sweeper: Mutex<Option<Sweeper>>,
}

impl MemoryEngine {
    /// Start an engine on the system clock.
    pub fn new(config: MemoryConfig) -> MemoryResult<Self> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Start an engine on an injected clock. Tests drive TTLs with a
    /// manual clock through here.
    pub fn with_clock(config: MemoryConfig, clock: Arc<dyn Clock>) -> MemoryResult<Self> {
        if config.dimension == 0 {
            return Err(MemoryError::unavailable("vector dimension must be positive"));
        }

        let index: Arc<dyn VectorIndex> = match config.index {
            IndexKind::Flat => Arc::new(FlatIndex::new(config.dimension, config.metric)),
            IndexKind::Hnsw => Arc::new(HnswIndex::new(
                config.dimension,
                config.metric,
                config.hnsw,
            )),
        };

        let engine = Self {
            context: Arc::new(ContextStore::new(clock.clone())),
            order: OrderIndex::new(),
            records: RecordStore::new(config.dimension),
            index,
            rate: Arc::new(RateCounter::new(clock.clone())),
            group_clocks: DashMap::new(),
            ephemeral: Arc::new(DashMap::new()),
            indexed_fields: Arc::new(DashMap::new()),
            visibility: RwLock::new(()),
            sweeper: Mutex::new(None),
            clock,
            config,
        };

        if !engine.config.sweep_interval.is_zero() {
            let sweeper = Sweeper::spawn(engine.config.sweep_interval, engine.sweep_targets());
            *engine.sweeper.lock() = Some(sweeper);
        }
        info!(
            dimension = engine.config.dimension,
            index = ?engine.config.index,
            "memory engine started"
        );
        Ok(engine)
    }

    /// Get the configuration
    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    fn sweep_targets(&self) -> SweepTargets {
        SweepTargets {
            context: Arc::clone(&self.context),
            rate: Arc::clone(&self.rate),
            index: Arc::clone(&self.index),
            ephemeral: Arc::clone(&self.ephemeral),
            indexed_fields: Arc::clone(&self.indexed_fields),
        }
    }

    // ========================================================================
    // Session message API
    // ========================================================================

    /// Append a message field with a TTL and record its position.
    ///
    /// Returns the minted order score. Scores within a group strictly
    /// increase even when the clock stalls, so equal-timestamp appends
    /// still have a defined order. A zero TTL is rejected before any
    /// state is touched.
    pub fn append_message(
        &self,
        group: &GroupKey,
        field_id: &str,
        value: impl Into<String>,
        ttl: Duration,
    ) -> MemoryResult<u64> {
        self.context.put(group, field_id, value, ttl)?;
        let score = self.mint_score(group);
        self.order.record(group, field_id, score);
        debug!(%group, field_id, score, "message appended");
        Ok(score)
    }

    /// Append a message with the configured default TTL.
    pub fn append_message_with_default(
        &self,
        group: &GroupKey,
        field_id: &str,
        value: impl Into<String>,
    ) -> MemoryResult<u64> {
        self.append_message(group, field_id, value, self.config.default_message_ttl)
    }

    /// Append a message and index its embedding in one call.
    ///
    /// Equivalent to [`append_message`] followed by [`index_message`],
    /// except the embedding is validated up front so a bad vector leaves
    /// no message behind either.
    ///
    /// [`append_message`]: MemoryEngine::append_message
    /// [`index_message`]: MemoryEngine::index_message
    pub fn append_indexed_message(
        &self,
        group: &GroupKey,
        field_id: &str,
        value: impl Into<String>,
        ttl: Duration,
        importance: f32,
        embedding: Vec<f32>,
    ) -> MemoryResult<(u64, u128)> {
        if embedding.len() != self.config.dimension {
            return Err(MemoryError::DimensionMismatch {
                expected: self.config.dimension,
                actual: embedding.len(),
            });
        }
        let score = self.append_message(group, field_id, value, ttl)?;
        let entry_id = self.index_message(group, field_id, importance, embedding)?;
        Ok((score, entry_id))
    }

    /// Read one live message. Expired and absent both report `NotFound`.
    pub fn get_message(&self, group: &GroupKey, field_id: &str) -> MemoryResult<String> {
        self.context.get(group, field_id)
    }

    /// All live messages in a group, sorted by field id.
    pub fn session_fields(&self, group: &GroupKey) -> Vec<(String, String)> {
        self.context.get_all(group)
    }

    /// Live messages in a score range, in insertion order.
    ///
    /// Resolves each order token against the message store and skips
    /// tokens whose message has expired, without pruning them. This is
    /// the usual conversation-replay read; [`ordered_fields`] exposes
    /// the raw tokens when the caller wants the unresolved view.
    ///
    /// [`ordered_fields`]: MemoryEngine::ordered_fields
    pub fn session_messages(
        &self,
        group: &GroupKey,
        min_score: u64,
        max_score: u64,
    ) -> Vec<OrderedMessage> {
        self.order
            .range(group, min_score, max_score)
            .into_iter()
            .filter_map(|token| {
                self.context
                    .get(group, &token.field_id)
                    .ok()
                    .map(|value| OrderedMessage {
                        score: token.score,
                        field_id: token.field_id,
                        value,
                    })
            })
            .collect()
    }

    /// Order tokens in an inclusive score range, ascending.
    ///
    /// Pure read over the order index: a token whose message has expired
    /// is still listed here until [`reconcile_session`] prunes it, and
    /// resolving it through [`get_message`] reports `NotFound`.
    ///
    /// [`reconcile_session`]: MemoryEngine::reconcile_session
    /// [`get_message`]: MemoryEngine::get_message
    pub fn ordered_fields(
        &self,
        group: &GroupKey,
        min_score: u64,
        max_score: u64,
    ) -> Vec<OrderToken> {
        self.order.range(group, min_score, max_score)
    }

    /// Drop order tokens whose message is gone, re-verifying each against
    /// the live store immediately before removal. Returns tokens removed.
    pub fn reconcile_session(&self, group: &GroupKey) -> usize {
        let removed = self
            .order
            .reconcile(group, |field_id| self.context.is_live(group, field_id));
        if removed > 0 {
            debug!(%group, removed, "session order reconciled");
        }
        removed
    }

    /// Delete a message, its order token, and its index entry if it had
    /// one. Returns true when a live message was removed.
    pub fn remove_message(&self, group: &GroupKey, field_id: &str) -> bool {
        let was_live = self.context.delete(group, field_id);
        self.order.remove(group, field_id);
        if let Some((_, entry_id)) = self
            .indexed_fields
            .remove(&(group.clone(), field_id.to_string()))
        {
            self.ephemeral.remove(&entry_id);
            self.index.remove(entry_id);
        }
        was_live
    }

    /// Make a live message reachable through recall.
    ///
    /// The entry shares the message's fate lazily: once the message
    /// expires, recall drops the entry on sight and unindexes it. Indexing
    /// the same field again replaces the previous entry.
    pub fn index_message(
        &self,
        group: &GroupKey,
        field_id: &str,
        importance: f32,
        embedding: Vec<f32>,
    ) -> MemoryResult<u128> {
        // The message must be readable right now.
        let entry = self
            .context
            .get_entry(group, field_id)
            .ok_or_else(|| MemoryError::not_found(format!("{group}/{field_id}")))?;

        let entry_id = Uuid::new_v4().as_u128();
        let attributes = EntryAttributes {
            owner_id: group.owner_id.clone(),
            category: MESSAGE_CATEGORY.to_string(),
            importance,
            created_at_us: entry.written_at_us,
            source: EntrySource::Ephemeral,
        };
        self.index.insert(entry_id, embedding, attributes)?;
        self.ephemeral
            .insert(entry_id, (group.clone(), field_id.to_string()));
        if let Some(previous) = self
            .indexed_fields
            .insert((group.clone(), field_id.to_string()), entry_id)
        {
            self.ephemeral.remove(&previous);
            self.index.remove(previous);
        }
        Ok(entry_id)
    }

    fn mint_score(&self, group: &GroupKey) -> u64 {
        let now = self.clock.now_us();
        let mut last = self.group_clocks.entry(group.clone()).or_insert(0);
        *last = last.saturating_add(1).max(now);
        *last
    }

    // ========================================================================
    // Durable memory API
    // ========================================================================

    /// Store a memory and index its embedding. Returns the assigned id.
    ///
    /// The record and its index entry become visible together: a recall
    /// racing this call sees both or neither.
    pub fn remember(&self, draft: MemoryDraft) -> MemoryResult<u128> {
        let id = Uuid::new_v4().as_u128();
        let record = StoredRecord {
            id,
            owner_id: draft.owner_id,
            category: draft.category,
            content: draft.content,
            importance: draft.importance,
            created_at_us: self.clock.now_us(),
            embedding: draft.embedding,
        };
        let attributes = EntryAttributes {
            owner_id: record.owner_id.clone(),
            category: record.category.clone(),
            importance: record.importance,
            created_at_us: record.created_at_us,
            source: EntrySource::Durable,
        };
        let embedding = record.embedding.clone();

        let _guard = self.visibility.write();
        self.records.insert(record)?;
        if let Err(err) = self.index.insert(id, embedding, attributes) {
            // Keep the pair consistent: a record the index rejected must
            // not stay queryable.
            self.records.delete(id);
            return Err(err);
        }
        debug!(%id, "memory stored");
        Ok(id)
    }

    /// Fetch a stored memory by id.
    pub fn get_memory(&self, id: u128) -> MemoryResult<StoredRecord> {
        self.records.get(id)
    }

    /// Filtered scan over stored memories, ordered by creation time.
    pub fn list_memories(&self, query: &RecordQuery) -> Vec<StoredRecord> {
        self.records.query(query)
    }

    /// Remove a memory from the store and the index together. Returns
    /// true when something was removed; absent ids are a no-op.
    pub fn forget(&self, id: u128) -> MemoryResult<bool> {
        let _guard = self.visibility.write();
        if let Some((_, (group, field_id))) = self.ephemeral.remove(&id) {
            self.indexed_fields
                .remove_if(&(group, field_id), |_, current| *current == id);
        }
        // Index first: an id the index can still rank must stay
        // resolvable until it is gone from there.
        let had_entry = self.index.remove(id);
        let had_record = self.records.delete(id);
        Ok(had_record || had_entry)
    }

    /// Nearest stored memories and live indexed messages for a query
    /// embedding, closest first, ties broken by entry id.
    ///
    /// The index is searched with a widened candidate count, then hits
    /// are hydrated: durable hits from the record store, ephemeral hits
    /// from the live context store. An ephemeral hit whose message has
    /// expired is dropped from the results and unindexed on the spot.
    pub fn recall(&self, query: &RecallQuery) -> MemoryResult<Vec<RecallHit>> {
        let mut filter = Filter::new();
        if let Some(owner) = &query.owner_id {
            filter = filter.owner(owner.clone());
        }
        if let Some(category) = &query.category {
            filter = filter.category(category.clone());
        }
        if let Some(min) = query.min_importance {
            filter = filter.min_importance(min);
        }
        filter.created_after_us = query.created_after_us;
        filter.created_before_us = query.created_before_us;
        if query.durable_only {
            filter = filter.source(EntrySource::Durable);
        }

        let k = query.limit;
        if k == 0 {
            return Ok(Vec::new());
        }
        let fan_out = (k.saturating_mul(10)).min(self.config.max_candidates).max(k);

        let guard = self.visibility.read();
        let candidates = self.index.search(&query.embedding, fan_out, &filter)?;

        let mut hits = Vec::with_capacity(k.min(candidates.len()));
        let mut dead: Vec<(u128, (GroupKey, String))> = Vec::new();
        for candidate in candidates {
            if hits.len() == k {
                break;
            }
            let backing = self
                .ephemeral
                .get(&candidate.entry_id)
                .map(|entry| entry.value().clone());
            match backing {
                Some((group, field_id)) => match self.context.get_entry(&group, &field_id) {
                    Some(entry) => hits.push(RecallHit {
                        entry_id: candidate.entry_id,
                        distance: candidate.distance,
                        owner_id: group.owner_id.clone(),
                        category: MESSAGE_CATEGORY.to_string(),
                        content: entry.value,
                        created_at_us: entry.written_at_us,
                        origin: RecallOrigin::Ephemeral {
                            session_id: group.session_id.clone(),
                            field_id,
                        },
                    }),
                    None => dead.push((candidate.entry_id, (group, field_id))),
                },
                None => match self.records.get(candidate.entry_id) {
                    Ok(record) => hits.push(RecallHit {
                        entry_id: candidate.entry_id,
                        distance: candidate.distance,
                        owner_id: record.owner_id,
                        category: record.category,
                        content: record.content,
                        created_at_us: record.created_at_us,
                        origin: RecallOrigin::Durable {
                            importance: record.importance,
                        },
                    }),
                    // The write lock orders forgets against this read;
                    // an unresolvable durable hit is already unindexed.
                    Err(_) => {}
                },
            }
        }
        drop(guard);

        for (entry_id, field_key) in dead {
            if self.ephemeral.remove(&entry_id).is_some() {
                self.index.remove(entry_id);
                self.indexed_fields
                    .remove_if(&field_key, |_, current| *current == entry_id);
                debug!(%entry_id, "unindexed expired message during recall");
            }
        }
        Ok(hits)
    }

    // ========================================================================
    // Rate API
    // ========================================================================

    /// Count one action against every configured window and report
    /// whether the subject stayed under all thresholds.
    ///
    /// The attempt is counted even when it is denied; fixed windows meter
    /// attempts, not admissions.
    pub fn check_rate(&self, subject: &str) -> MemoryResult<RateDecision> {
        let mut windows = Vec::with_capacity(self.config.rate_windows.len());
        let mut allowed = true;
        for window in &self.config.rate_windows {
            let count = self.rate.increment(subject, &window.name, window.length)?;
            let exceeded = count > window.threshold;
            allowed &= !exceeded;
            windows.push(WindowStatus {
                name: window.name.clone(),
                count,
                threshold: window.threshold,
                exceeded,
            });
        }
        if !allowed {
            debug!(subject, "rate limited");
        }
        Ok(RateDecision { allowed, windows })
    }

    /// Count one action against a single named window and return the new
    /// count. Unknown window names report `NotFound`.
    pub fn increment_rate(&self, subject: &str, window_name: &str) -> MemoryResult<u64> {
        let window = self
            .config
            .rate_windows
            .iter()
            .find(|window| window.name == window_name)
            .ok_or_else(|| MemoryError::not_found(format!("rate window {window_name}")))?;
        self.rate.increment(subject, &window.name, window.length)
    }

    /// Current counts without counting anything.
    pub fn peek_rate(&self, subject: &str) -> Vec<WindowStatus> {
        self.config
            .rate_windows
            .iter()
            .map(|window| {
                let count = self.rate.peek(subject, &window.name);
                WindowStatus {
                    name: window.name.clone(),
                    count,
                    threshold: window.threshold,
                    exceeded: count > window.threshold,
                }
            })
            .collect()
    }

    // ========================================================================
    // Erasure API
    // ========================================================================

    /// Erase everything stored for one owner: records, index entries,
    /// session fields, order tokens, and rate windows keyed by the owner
    /// id (exactly, or as a `{owner}/` prefix).
    ///
    /// Runs verification passes until one finds nothing left; if writers
    /// keep racing data in past the pass limit the error says so rather
    /// than returning a partial erase silently.
    pub fn erase_owner(&self, owner_id: &str) -> MemoryResult<EraseReport> {
        let mut report = EraseReport::default();
        for pass in 1..=MAX_ERASE_PASSES {
            report.passes = pass;
            let removed = self.erase_owner_pass(owner_id);
            if removed.is_clean() {
                info!(
                    owner_id,
                    records = report.records_removed,
                    groups = report.groups_removed,
                    passes = report.passes,
                    "owner data erased"
                );
                return Ok(report);
            }
            report.merge(&removed);
        }
        Err(MemoryError::unavailable(format!(
            "erase for owner {owner_id} still found data after {MAX_ERASE_PASSES} passes"
        )))
    }

    fn erase_owner_pass(&self, owner_id: &str) -> EraseReport {
        let _guard = self.visibility.write();
        let mut pass = EraseReport::default();

        let record_ids = self.records.delete_by_owner(owner_id);
        pass.records_removed = record_ids.len();
        for id in &record_ids {
            if self.index.remove(*id) {
                pass.index_entries_removed += 1;
            }
        }

        let stale: Vec<(u128, (GroupKey, String))> = self
            .ephemeral
            .iter()
            .filter(|entry| entry.value().0.owner_id == owner_id)
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();
        for (entry_id, field_key) in stale {
            if self.ephemeral.remove(&entry_id).is_some() {
                if self.index.remove(entry_id) {
                    pass.index_entries_removed += 1;
                }
                self.indexed_fields
                    .remove_if(&field_key, |_, current| *current == entry_id);
            }
        }

        pass.groups_removed = self.context.delete_by_owner(owner_id);
        pass.order_tokens_removed = self.order.delete_by_owner(owner_id);
        pass.counter_windows_removed = self.rate.delete_subject(owner_id)
            + self.rate.delete_prefixed(&format!("{owner_id}/"));
        self.group_clocks
            .retain(|group, _| group.owner_id != owner_id);

        pass
    }

    // ========================================================================
    // Maintenance API
    // ========================================================================

    /// Run one maintenance pass now, regardless of the background timer.
    pub fn sweep(&self) -> SweepStats {
        self.sweep_targets().sweep()
    }

    /// Point-in-time counters across every component.
    pub fn stats(&self) -> EngineStats {
        EngineStats {
            context: self.context.stats(),
            order: self.order.stats(),
            records: self.records.stats(),
            rate: self.rate.stats(),
            index_entries: self.index.len(),
            ephemeral_indexed: self.ephemeral.len(),
        }
    }

    /// Stop the background sweeper and join its thread. Idempotent;
    /// dropping the engine calls this too.
    pub fn shutdown(&self) {
        if let Some(mut sweeper) = self.sweeper.lock().take() {
            sweeper.stop();
            info!("memory engine stopped");
        }
    }
}

impl Drop for MemoryEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for MemoryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryEngine")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// A live message resolved through the order index.
#[derive(Debug, Clone, Serialize)]
pub struct OrderedMessage {
    pub score: u64,
    pub field_id: String,
    pub value: String,
}

/// One window's standing for a subject.
#[derive(Debug, Clone, Serialize)]
pub struct WindowStatus {
    pub name: String,
    pub count: u64,
    pub threshold: u64,
    pub exceeded: bool,
}

/// Outcome of counting one action against all configured windows.
#[derive(Debug, Clone, Serialize)]
pub struct RateDecision {
    /// True when no window's threshold was exceeded.
    pub allowed: bool,
    pub windows: Vec<WindowStatus>,
}

/// What an owner erase removed, summed over its passes.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EraseReport {
    pub records_removed: usize,
    pub groups_removed: usize,
    pub order_tokens_removed: usize,
    pub index_entries_removed: usize,
    pub counter_windows_removed: usize,
    /// Passes run, including the final clean verification pass.
    pub passes: u32,
}

impl EraseReport {
    fn is_clean(&self) -> bool {
        self.records_removed == 0
            && self.groups_removed == 0
            && self.order_tokens_removed == 0
            && self.index_entries_removed == 0
            && self.counter_windows_removed == 0
    }

    fn merge(&mut self, pass: &EraseReport) {
        self.records_removed += pass.records_removed;
        self.groups_removed += pass.groups_removed;
        self.order_tokens_removed += pass.order_tokens_removed;
        self.index_entries_removed += pass.index_entries_removed;
        self.counter_windows_removed += pass.counter_windows_removed;
    }
}

/// Point-in-time counters across all components.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    pub context: ContextStoreStats,
    pub order: OrderIndexStats,
    pub records: RecordStoreStats,
    pub rate: RateCounterStats,
    pub index_entries: usize,
    pub ephemeral_indexed: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use mnemo_core::ManualClock;

    fn test_engine() -> (MemoryEngine, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let engine = MemoryEngine::with_clock(MemoryConfig::for_testing(), clock.clone()).unwrap();
        (engine, clock)
    }

    #[test]
    fn test_scores_strictly_increase_within_a_group() {
        let (engine, _clock) = test_engine();
        let group = GroupKey::new("alice", "s-1");
        let ttl = Duration::from_secs(60);

        // The clock does not advance between appends; scores must still
        // be distinct and increasing.
        let a = engine.append_message(&group, "msg:1", "hi", ttl).unwrap();
        let b = engine.append_message(&group, "msg:2", "there", ttl).unwrap();
        let c = engine.append_message(&group, "msg:3", "friend", ttl).unwrap();
        assert!(a < b && b < c);

        let tokens = engine.ordered_fields(&group, 0, u64::MAX);
        let fields: Vec<&str> = tokens.iter().map(|t| t.field_id.as_str()).collect();
        assert_eq!(fields, vec!["msg:1", "msg:2", "msg:3"]);
    }

    #[test]
    fn test_default_ttl_append_follows_config() {
        let (engine, clock) = test_engine();
        let group = GroupKey::new("alice", "s-1");

        // The testing config's default TTL is 60 seconds.
        engine
            .append_message_with_default(&group, "msg:1", "hello")
            .unwrap();
        clock.advance(Duration::from_secs(59));
        assert!(engine.get_message(&group, "msg:1").is_ok());
        clock.advance(Duration::from_secs(2));
        assert!(engine.get_message(&group, "msg:1").is_err());
    }

    #[test]
    fn test_zero_dimension_config_is_rejected() {
        let config = MemoryConfig {
            dimension: 0,
            ..MemoryConfig::for_testing()
        };
        let err = MemoryEngine::new(config).unwrap_err();
        assert!(matches!(err, MemoryError::Unavailable(_)));
    }

    #[test]
    fn test_remove_message_cleans_order_and_index() {
        let (engine, _clock) = test_engine();
        let group = GroupKey::new("alice", "s-1");
        let ttl = Duration::from_secs(60);

        engine.append_message(&group, "msg:1", "hello", ttl).unwrap();
        engine
            .index_message(&group, "msg:1", 0.5, vec![1.0, 0.0, 0.0, 0.0])
            .unwrap();
        assert_eq!(engine.stats().index_entries, 1);

        assert!(engine.remove_message(&group, "msg:1"));
        let stats = engine.stats();
        assert_eq!(stats.index_entries, 0);
        assert_eq!(stats.ephemeral_indexed, 0);
        assert_eq!(stats.order.tokens, 0);
        assert!(engine.get_message(&group, "msg:1").is_err());
    }

    #[test]
    fn test_reindexing_a_field_keeps_one_entry() {
        let (engine, _clock) = test_engine();
        let group = GroupKey::new("alice", "s-1");
        let ttl = Duration::from_secs(60);

        engine.append_message(&group, "msg:1", "hello", ttl).unwrap();
        let first = engine
            .index_message(&group, "msg:1", 0.5, vec![1.0, 0.0, 0.0, 0.0])
            .unwrap();
        let second = engine
            .index_message(&group, "msg:1", 0.5, vec![0.0, 1.0, 0.0, 0.0])
            .unwrap();
        assert_ne!(first, second);

        let stats = engine.stats();
        assert_eq!(stats.index_entries, 1);
        assert_eq!(stats.ephemeral_indexed, 1);
    }

    #[test]
    fn test_index_message_requires_a_live_field() {
        let (engine, clock) = test_engine();
        let group = GroupKey::new("alice", "s-1");

        engine
            .append_message(&group, "msg:1", "hello", Duration::from_secs(5))
            .unwrap();
        clock.advance(Duration::from_secs(6));

        let err = engine
            .index_message(&group, "msg:1", 0.5, vec![1.0, 0.0, 0.0, 0.0])
            .unwrap_err();
        assert!(matches!(err, MemoryError::NotFound(_)));
        assert_eq!(engine.stats().index_entries, 0);
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let (engine, _clock) = test_engine();
        engine.shutdown();
        engine.shutdown();
    }
}
