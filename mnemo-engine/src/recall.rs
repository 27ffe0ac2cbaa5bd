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

//! Inputs and outputs of the engine's durable memory surface.

use mnemo_core::Micros;
use serde::{Deserialize, Serialize};

/// A memory waiting to be stored. The engine assigns the id and timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryDraft {
    pub owner_id: String,
    pub category: String,
    pub content: String,
    pub importance: f32,
    pub embedding: Vec<f32>,
}

impl MemoryDraft {
    pub fn new(
        owner_id: impl Into<String>,
        content: impl Into<String>,
        embedding: Vec<f32>,
    ) -> Self {
        Self {
            owner_id: owner_id.into(),
            category: "note".to_string(),
            content: content.into(),
            importance: 0.5,
            embedding,
        }
    }

    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    pub fn importance(mut self, importance: f32) -> Self {
        self.importance = importance;
        self
    }
}

/// Similarity query over everything indexed for recall.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecallQuery {
    pub embedding: Vec<f32>,

    /// Maximum hits returned.
    pub limit: usize,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_importance: Option<f32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_after_us: Option<Micros>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_before_us: Option<Micros>,

    /// Skip indexed session messages and return stored memories only.
    #[serde(default)]
    pub durable_only: bool,
}

impl RecallQuery {
    pub fn new(embedding: Vec<f32>) -> Self {
        Self {
            embedding,
            limit: 10,
            owner_id: None,
            category: None,
            min_importance: None,
            created_after_us: None,
            created_before_us: None,
            durable_only: false,
        }
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn owner(mut self, owner_id: impl Into<String>) -> Self {
        self.owner_id = Some(owner_id.into());
        self
    }

    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn min_importance(mut self, min: f32) -> Self {
        self.min_importance = Some(min);
        self
    }

    pub fn created_between(mut self, after_us: Micros, before_us: Micros) -> Self {
        self.created_after_us = Some(after_us);
        self.created_before_us = Some(before_us);
        self
    }

    pub fn durable_only(mut self) -> Self {
        self.durable_only = true;
        self
    }
}

/// Where a recall hit came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum RecallOrigin {
    /// A stored memory record.
    Durable { importance: f32 },
    /// A live session message. Gone from recall once its TTL passes.
    Ephemeral { session_id: String, field_id: String },
}

/// One recall result with its content hydrated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecallHit {
    pub entry_id: u128,
    pub distance: f32,
    pub owner_id: String,
    pub category: String,
    pub content: String,
    pub created_at_us: Micros,
    pub origin: RecallOrigin,
}
