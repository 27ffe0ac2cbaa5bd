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

//! Per-group write-order index.
//!
//! Records `(score, field_id)` tokens in an ordered set so a group's write
//! order can be scanned without touching the field store. The index is
//! deliberately decoupled from field liveness: a field expiring does NOT
//! remove its token. Stale tokens act as tombstones until an explicit
//! [`OrderIndex::reconcile`] pass removes them; [`OrderIndex::range`] never
//! reconciles on its own.

use crate::context_store::GroupKey;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use tracing::debug;

/// One ordering token. Ordered by `(score, field_id)`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OrderToken {
    pub score: u64,
    pub field_id: String,
}

impl OrderToken {
    pub fn new(score: u64, field_id: impl Into<String>) -> Self {
        Self {
            score,
            field_id: field_id.into(),
        }
    }
}

#[derive(Debug, Default)]
struct GroupOrder {
    tokens: BTreeSet<OrderToken>,
    /// Current score per field id. A field holds at most one token.
    by_field: HashMap<String, u64>,
}

/// Point-in-time counters for observability.
#[derive(Debug, Clone, Serialize)]
pub struct OrderIndexStats {
    pub groups: usize,
    pub tokens: usize,
}

/// Ordered token sets, one per group.
#[derive(Debug, Default)]
pub struct OrderIndex {
    groups: DashMap<GroupKey, GroupOrder>,
}

impl OrderIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a write position. O(log n) upsert: re-recording a field id
    /// replaces its previous token rather than adding a second one.
    pub fn record(&self, group: &GroupKey, field_id: impl Into<String>, score: u64) {
        let field_id = field_id.into();
        let mut guard = self.groups.entry(group.clone()).or_default();
        if let Some(old_score) = guard.by_field.insert(field_id.clone(), score) {
            guard.tokens.remove(&OrderToken {
                score: old_score,
                field_id: field_id.clone(),
            });
        }
        guard.tokens.insert(OrderToken { score, field_id });
    }

    /// Tokens with `min_score <= score <= max_score`, ascending.
    ///
    /// Pure index read: no liveness check, no mutation. Tokens whose field
    /// has expired are still returned here; callers that want live data
    /// resolve each token against the field store themselves. Inverted
    /// bounds and unknown groups read as empty.
    pub fn range(&self, group: &GroupKey, min_score: u64, max_score: u64) -> Vec<OrderToken> {
        if min_score > max_score {
            return Vec::new();
        }
        match self.groups.get(group) {
            Some(guard) => {
                let lower = OrderToken {
                    score: min_score,
                    field_id: String::new(),
                };
                guard
                    .tokens
                    .range(lower..)
                    .take_while(|token| token.score <= max_score)
                    .cloned()
                    .collect()
            }
            None => Vec::new(),
        }
    }

    /// Remove tokens whose field the probe reports dead.
    ///
    /// Liveness is re-checked immediately before each removal while the
    /// group's guard is held, so a field rewritten after the initial scan
    /// is never falsely evicted: its re-record call is ordered after the
    /// field write and lands once the guard is released.
    pub fn reconcile<F>(&self, group: &GroupKey, is_live: F) -> usize
    where
        F: Fn(&str) -> bool,
    {
        let Some(mut guard) = self.groups.get_mut(group) else {
            return 0;
        };
        let candidates: Vec<OrderToken> = guard
            .tokens
            .iter()
            .filter(|token| !is_live(&token.field_id))
            .cloned()
            .collect();

        let mut removed = 0;
        for token in candidates {
            if is_live(&token.field_id) {
                continue;
            }
            if guard.tokens.remove(&token) {
                guard.by_field.remove(&token.field_id);
                removed += 1;
            }
        }
        let now_empty = guard.tokens.is_empty();
        drop(guard);
        if now_empty {
            self.groups.remove_if(group, |_, g| g.tokens.is_empty());
        }
        if removed > 0 {
            debug!(group = %group, removed, "order index reconciled stale tokens");
        }
        removed
    }

    /// Drop one field's token. Returns false when the field has none.
    pub fn remove(&self, group: &GroupKey, field_id: &str) -> bool {
        let Some(mut guard) = self.groups.get_mut(group) else {
            return false;
        };
        match guard.by_field.remove(field_id) {
            Some(score) => {
                guard.tokens.remove(&OrderToken {
                    score,
                    field_id: field_id.to_string(),
                });
                true
            }
            None => false,
        }
    }

    /// Drop a whole group's tokens. Returns how many it held.
    pub fn remove_group(&self, group: &GroupKey) -> usize {
        self.groups
            .remove(group)
            .map(|(_, g)| g.tokens.len())
            .unwrap_or(0)
    }

    /// Drop every group belonging to one owner. Returns tokens removed.
    pub fn delete_by_owner(&self, owner_id: &str) -> usize {
        let mut removed = 0;
        self.groups.retain(|key, group| {
            if key.owner_id == owner_id {
                removed += group.tokens.len();
                false
            } else {
                true
            }
        });
        if removed > 0 {
            debug!(owner_id, tokens = removed, "order index erased owner groups");
        }
        removed
    }

    /// Tokens currently held for one group (stale ones included).
    pub fn group_len(&self, group: &GroupKey) -> usize {
        self.groups.get(group).map(|g| g.tokens.len()).unwrap_or(0)
    }

    pub fn stats(&self) -> OrderIndexStats {
        let tokens = self.groups.iter().map(|g| g.tokens.len()).sum();
        OrderIndexStats {
            groups: self.groups.len(),
            tokens,
        }
    }
}
