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

//! Expiring field store for short-term conversational state.
//!
//! Fields live inside groups (one group per owner + session) and carry a
//! per-field expiry stamp. Every read compares the stamp against the
//! injected clock, so an expired field becomes invisible the instant its
//! TTL passes; [`ContextStore::purge_expired`] only reclaims memory and is
//! never required for correctness.

use dashmap::DashMap;
use mnemo_core::{Clock, MemoryError, MemoryResult, Micros};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Names one container of expiring fields: one session for one owner.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupKey {
    pub owner_id: String,
    pub session_id: String,
}

impl GroupKey {
    pub fn new(owner_id: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            owner_id: owner_id.into(),
            session_id: session_id.into(),
        }
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner_id, self.session_id)
    }
}

/// One field value with its expiry stamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldEntry {
    pub value: String,
    pub written_at_us: Micros,
    pub expires_at_us: Micros,
}

impl FieldEntry {
    pub fn is_live(&self, now_us: Micros) -> bool {
        now_us < self.expires_at_us
    }
}

#[derive(Debug, Default)]
struct Group {
    fields: HashMap<String, FieldEntry>,
}

/// Point-in-time counters for observability.
#[derive(Debug, Clone, Serialize)]
pub struct ContextStoreStats {
    pub groups: usize,
    pub live_fields: usize,
    /// Expired fields the sweep has not reclaimed yet. Invisible to reads.
    pub expired_pending: usize,
}

/// Grouped fields with per-field TTLs.
///
/// Thread safety: fully concurrent. Operations on different groups never
/// touch the same lock; operations within one group serialize on its
/// DashMap shard entry.
pub struct ContextStore {
    groups: DashMap<GroupKey, Group>,
    clock: Arc<dyn Clock>,
}

impl ContextStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            groups: DashMap::new(),
            clock,
        }
    }

    /// Write a field with a required TTL.
    ///
    /// Overwriting an existing field (live or expired) replaces the value
    /// and resets the expiry to `now + ttl`. A zero TTL is rejected before
    /// any state is touched, so a failed put never creates its group.
    pub fn put(
        &self,
        group: &GroupKey,
        field_id: impl Into<String>,
        value: impl Into<String>,
        ttl: Duration,
    ) -> MemoryResult<()> {
        if ttl.is_zero() {
            return Err(MemoryError::InvalidTtl);
        }
        let now = self.clock.now_us();
        let entry = FieldEntry {
            value: value.into(),
            written_at_us: now,
            expires_at_us: now.saturating_add(ttl.as_micros() as u64),
        };
        self.groups
            .entry(group.clone())
            .or_default()
            .fields
            .insert(field_id.into(), entry);
        Ok(())
    }

    /// Read one live field value.
    ///
    /// Absent and expired fields report the same `NotFound`; callers cannot
    /// distinguish them.
    pub fn get(&self, group: &GroupKey, field_id: &str) -> MemoryResult<String> {
        self.get_entry(group, field_id)
            .map(|entry| entry.value)
            .ok_or_else(|| MemoryError::not_found(format!("{group}/{field_id}")))
    }

    /// Read one live field with its stamps. `None` when absent or expired.
    pub fn get_entry(&self, group: &GroupKey, field_id: &str) -> Option<FieldEntry> {
        let now = self.clock.now_us();
        let guard = self.groups.get(group)?;
        guard
            .fields
            .get(field_id)
            .filter(|entry| entry.is_live(now))
            .cloned()
    }

    /// True when the field exists and has not expired.
    pub fn is_live(&self, group: &GroupKey, field_id: &str) -> bool {
        let now = self.clock.now_us();
        self.groups
            .get(group)
            .map(|guard| {
                guard
                    .fields
                    .get(field_id)
                    .map(|entry| entry.is_live(now))
                    .unwrap_or(false)
            })
            .unwrap_or(false)
    }

    /// Snapshot of all live fields in one group, sorted by field id.
    ///
    /// The snapshot is taken under the group's shard guard, so a field
    /// cannot appear half-written. Missing groups yield an empty vec.
    pub fn get_all(&self, group: &GroupKey) -> Vec<(String, String)> {
        let now = self.clock.now_us();
        let mut fields: Vec<(String, String)> = match self.groups.get(group) {
            Some(guard) => guard
                .fields
                .iter()
                .filter(|(_, entry)| entry.is_live(now))
                .map(|(id, entry)| (id.clone(), entry.value.clone()))
                .collect(),
            None => Vec::new(),
        };
        fields.sort();
        fields
    }

    /// Remove one field. Returns true only when a live field was removed;
    /// deleting an absent or already-expired field is a no-op returning
    /// false, never an error.
    pub fn delete(&self, group: &GroupKey, field_id: &str) -> bool {
        let now = self.clock.now_us();
        let Some(mut guard) = self.groups.get_mut(group) else {
            return false;
        };
        let was_live = guard
            .fields
            .remove(field_id)
            .map(|entry| entry.is_live(now))
            .unwrap_or(false);
        let now_empty = guard.fields.is_empty();
        drop(guard);
        if now_empty {
            self.groups.remove_if(group, |_, g| g.fields.is_empty());
        }
        was_live
    }

    /// Reset a live field's expiry to `now + ttl` without rewriting it.
    pub fn touch(&self, group: &GroupKey, field_id: &str, ttl: Duration) -> MemoryResult<()> {
        if ttl.is_zero() {
            return Err(MemoryError::InvalidTtl);
        }
        let now = self.clock.now_us();
        let mut guard = self
            .groups
            .get_mut(group)
            .ok_or_else(|| MemoryError::not_found(format!("{group}/{field_id}")))?;
        match guard.fields.get_mut(field_id) {
            Some(entry) if entry.is_live(now) => {
                entry.expires_at_us = now.saturating_add(ttl.as_micros() as u64);
                Ok(())
            }
            _ => Err(MemoryError::not_found(format!("{group}/{field_id}"))),
        }
    }

    /// Drop a whole group. Returns how many live fields it still held.
    pub fn remove_group(&self, group: &GroupKey) -> usize {
        let now = self.clock.now_us();
        self.groups
            .remove(group)
            .map(|(_, g)| g.fields.values().filter(|e| e.is_live(now)).count())
            .unwrap_or(0)
    }

    /// Drop every group belonging to one owner. Returns groups removed.
    pub fn delete_by_owner(&self, owner_id: &str) -> usize {
        let mut removed = 0;
        self.groups.retain(|key, _| {
            if key.owner_id == owner_id {
                removed += 1;
                false
            } else {
                true
            }
        });
        if removed > 0 {
            debug!(owner_id, groups = removed, "context store erased owner groups");
        }
        removed
    }

    /// Reclaim expired fields and drop groups left empty. Purely an
    /// optimization; reads already treat expired fields as gone.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now_us();
        let mut reclaimed = 0;
        self.groups.retain(|_, group| {
            let before = group.fields.len();
            group.fields.retain(|_, entry| entry.is_live(now));
            reclaimed += before - group.fields.len();
            !group.fields.is_empty()
        });
        if reclaimed > 0 {
            debug!(fields = reclaimed, "context store reclaimed expired fields");
        }
        reclaimed
    }

    pub fn stats(&self) -> ContextStoreStats {
        let now = self.clock.now_us();
        let mut live_fields = 0;
        let mut expired_pending = 0;
        for group in self.groups.iter() {
            for entry in group.fields.values() {
                if entry.is_live(now) {
                    live_fields += 1;
                } else {
                    expired_pending += 1;
                }
            }
        }
        ContextStoreStats {
            groups: self.groups.len(),
            live_fields,
            expired_pending,
        }
    }

    /// Number of groups currently allocated (including swept-pending ones).
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}
