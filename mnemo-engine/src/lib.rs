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

//! Mnemo Engine
//!
//! An in-process hybrid memory store for conversational agents:
//! - **Session messages**: expiring fields with a per-session insertion
//!   order that survives expiry until explicitly reconciled
//! - **Durable memories**: records kept until forgotten, searchable by
//!   embedding similarity with attribute filters
//! - **Rate counters**: fixed per-subject windows with gap-free counts
//! - **Owner erasure**: one call removes an owner's data from every
//!   component, verified before it reports success
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                      Memory Engine                        │
//! │  ┌────────────┐ ┌────────────┐ ┌─────────┐ ┌──────────┐  │
//! │  │  Context   │ │   Order    │ │ Record  │ │   Rate   │  │
//! │  │  Store     │ │   Index    │ │ Store   │ │ Counters │  │
//! │  │  (TTL)     │ │ (per sess) │ │(durable)│ │ (window) │  │
//! │  └─────┬──────┘ └────────────┘ └────┬────┘ └──────────┘  │
//! │        │                            │                    │
//! │  ┌─────▼────────────────────────────▼─────────────────┐  │
//! │  │        Vector Index (flat scan or HNSW graph)       │  │
//! │  └─────────────────────────────────────────────────────┘  │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use mnemo_engine::{GroupKey, MemoryConfig, MemoryDraft, MemoryEngine, RecallQuery};
//! use std::time::Duration;
//!
//! let engine = MemoryEngine::new(MemoryConfig::with_dimension(384))?;
//!
//! // Session messages expire on their TTL.
//! let group = GroupKey::new("alice", "session-1");
//! engine.append_message(&group, "msg:1", "I moved to Lisbon", Duration::from_secs(1800))?;
//!
//! // Durable memories stay until forgotten.
//! let embedding = embed("lives in Lisbon");
//! engine.remember(MemoryDraft::new("alice", "lives in Lisbon", embedding.clone())
//!     .category("fact")
//!     .importance(0.8))?;
//!
//! // Recall is similarity search scoped by attributes.
//! let hits = engine.recall(&RecallQuery::new(embedding).owner("alice").limit(5))?;
//!
//! engine.shutdown();
//! ```

pub mod engine;
pub mod recall;
pub mod sweeper;

// Re-exports
pub use engine::{
    EngineStats, EraseReport, MemoryEngine, OrderedMessage, RateDecision, WindowStatus,
};
pub use recall::{MemoryDraft, RecallHit, RecallOrigin, RecallQuery};
pub use sweeper::SweepStats;

// The engine surface speaks in these component types.
pub use mnemo_core::{
    Clock, ManualClock, MemoryConfig, MemoryError, MemoryResult, SystemClock,
};
pub use mnemo_storage::{GroupKey, OrderToken, RecordQuery, StoredRecord};
