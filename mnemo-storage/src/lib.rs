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

//! Mnemo Storage
//!
//! The four stateful substructures of the memory store: the expiring field
//! store, the write-order index, the durable record store, and the
//! fixed-window rate counters. All are fully concurrent and keep their
//! locking no coarser than one group, record, or subject.

pub mod context_store;
pub mod order_index;
pub mod rate_counter;
pub mod record_store;

pub use context_store::{ContextStore, ContextStoreStats, FieldEntry, GroupKey};
pub use order_index::{OrderIndex, OrderIndexStats, OrderToken};
pub use rate_counter::{RateCounter, RateCounterStats};
pub use record_store::{RecordQuery, RecordStore, RecordStoreStats, StoredRecord};
