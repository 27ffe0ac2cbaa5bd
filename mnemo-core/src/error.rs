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

//! Error taxonomy shared by every mnemo crate.
//!
//! Validation failures (`InvalidTtl`, `DimensionMismatch`, `Predicate`) are
//! raised synchronously before any state is touched, so a failed call never
//! leaves a partial write behind.

use thiserror::Error;

/// Unified error type for all store operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MemoryError {
    /// The requested group, field, record, or index entry does not exist.
    /// An expired field reports the same error as a missing one.
    #[error("not found: {0}")]
    NotFound(String),

    /// A TTL or window length of zero was supplied.
    #[error("invalid ttl: duration must be greater than zero")]
    InvalidTtl,

    /// A vector's length does not match the configured dimensionality.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// A search predicate failed validation before traversal started.
    #[error("invalid predicate: {0}")]
    Predicate(String),

    /// An operation exceeded its deadline.
    #[error("operation timed out")]
    Timeout,

    /// The store cannot currently complete the request.
    #[error("unavailable: {0}")]
    Unavailable(String),
}

impl MemoryError {
    pub fn not_found(what: impl Into<String>) -> Self {
        MemoryError::NotFound(what.into())
    }

    pub fn predicate(reason: impl Into<String>) -> Self {
        MemoryError::Predicate(reason.into())
    }

    pub fn unavailable(reason: impl Into<String>) -> Self {
        MemoryError::Unavailable(reason.into())
    }
}

/// Convenience alias used across the workspace.
pub type MemoryResult<T> = Result<T, MemoryError>;
