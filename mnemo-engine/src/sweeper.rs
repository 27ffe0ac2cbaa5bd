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

//! Background maintenance.
//!
//! The sweep reclaims memory that correctness never depends on: expired
//! context fields, expired rate windows, index entries whose backing
//! message is gone, and index tombstones. Order tokens are deliberately
//! left alone; pruning them is the caller's explicit reconcile step.

use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use dashmap::DashMap;
use mnemo_index::VectorIndex;
use mnemo_storage::{ContextStore, GroupKey, RateCounter};
use serde::Serialize;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, warn};

/// What one maintenance pass reclaimed.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepStats {
    /// Expired context fields physically removed.
    pub expired_fields: usize,
    /// Expired rate windows physically removed.
    pub expired_windows: usize,
    /// Index entries dropped because their backing message died.
    pub ephemeral_unindexed: usize,
    /// Index tombstones reclaimed by compaction.
    pub tombstones_reclaimed: usize,
}

impl SweepStats {
    pub fn reclaimed_anything(&self) -> bool {
        self.expired_fields > 0
            || self.expired_windows > 0
            || self.ephemeral_unindexed > 0
            || self.tombstones_reclaimed > 0
    }
}

/// Shared handles the sweep operates on, cloneable into the thread.
#[derive(Clone)]
pub(crate) struct SweepTargets {
    pub(crate) context: Arc<ContextStore>,
    pub(crate) rate: Arc<RateCounter>,
    pub(crate) index: Arc<dyn VectorIndex>,
    pub(crate) ephemeral: Arc<DashMap<u128, (GroupKey, String)>>,
    pub(crate) indexed_fields: Arc<DashMap<(GroupKey, String), u128>>,
}

impl SweepTargets {
    /// Run one maintenance pass.
    pub(crate) fn sweep(&self) -> SweepStats {
        // Unindex entries whose backing field expired or was deleted.
        // Collect first, then remove, so no shard guard is held across
        // the index call.
        let dead: Vec<(u128, (GroupKey, String))> = self
            .ephemeral
            .iter()
            .filter(|entry| !self.context.is_live(&entry.value().0, &entry.value().1))
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();

        let mut unindexed = 0;
        for (entry_id, field_key) in dead {
            if self.ephemeral.remove(&entry_id).is_some() {
                self.index.remove(entry_id);
                self.indexed_fields
                    .remove_if(&field_key, |_, current| *current == entry_id);
                unindexed += 1;
            }
        }

        let stats = SweepStats {
            expired_fields: self.context.purge_expired(),
            expired_windows: self.rate.purge_expired(),
            ephemeral_unindexed: unindexed,
            tombstones_reclaimed: self.index.compact(),
        };
        if stats.reclaimed_anything() {
            debug!(
                expired_fields = stats.expired_fields,
                expired_windows = stats.expired_windows,
                ephemeral_unindexed = stats.ephemeral_unindexed,
                tombstones_reclaimed = stats.tombstones_reclaimed,
                "sweep pass completed"
            );
        }
        stats
    }
}

/// Owns the background thread. Stopping is idempotent and joins the thread.
pub(crate) struct Sweeper {
    stop_tx: Sender<()>,
    handle: Option<JoinHandle<()>>,
}

impl Sweeper {
    pub(crate) fn spawn(interval: Duration, targets: SweepTargets) -> Self {
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let handle = std::thread::spawn(move || loop {
            match stop_rx.recv_timeout(interval) {
                Err(RecvTimeoutError::Timeout) => {
                    targets.sweep();
                }
                // Stop signal, or the engine was dropped without shutdown.
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }
        });
        Self {
            stop_tx,
            handle: Some(handle),
        }
    }

    pub(crate) fn stop(&mut self) {
        let _ = self.stop_tx.try_send(());
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("sweeper thread panicked before shutdown");
            }
        }
    }
}
