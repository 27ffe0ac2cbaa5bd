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

//! Mnemo Core
//!
//! Shared foundation for the mnemo memory store: the error taxonomy, the
//! injectable time source, and workspace-wide configuration.

pub mod clock;
pub mod config;
pub mod error;

pub use clock::{Clock, ManualClock, Micros, SystemClock};
pub use config::{DistanceMetric, HnswParams, IndexKind, MemoryConfig, RateWindowConfig};
pub use error::{MemoryError, MemoryResult};
