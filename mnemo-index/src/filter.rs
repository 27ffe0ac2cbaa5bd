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

//! Attribute predicates for filtered search.
//!
//! A [`Filter`] is a conjunction: every set condition must hold. Tag
//! conditions (owner, category, source) match by membership; numeric
//! conditions (importance, creation time) match by range.

use crate::vector::{EntryAttributes, EntrySource};
use mnemo_core::{MemoryError, MemoryResult, Micros};
use serde::{Deserialize, Serialize};

/// Attribute filter applied during index traversal.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Filter {
    /// Match entries owned by any of these ids.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_ids: Option<Vec<String>>,

    /// Match entries in any of these categories.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub categories: Option<Vec<String>>,

    /// Match entries from any of these sources.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sources: Option<Vec<EntrySource>>,

    /// Lowest importance to match, inclusive.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_importance: Option<f32>,

    /// Highest importance to match, inclusive.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_importance: Option<f32>,

    /// Earliest creation time to match, inclusive.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_after_us: Option<Micros>,

    /// Latest creation time to match, inclusive.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_before_us: Option<Micros>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn owner(mut self, owner_id: impl Into<String>) -> Self {
        self.owner_ids
            .get_or_insert_with(Vec::new)
            .push(owner_id.into());
        self
    }

    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.categories
            .get_or_insert_with(Vec::new)
            .push(category.into());
        self
    }

    pub fn source(mut self, source: EntrySource) -> Self {
        self.sources.get_or_insert_with(Vec::new).push(source);
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

    /// Check if any conditions are set.
    pub fn has_any(&self) -> bool {
        self.owner_ids.is_some()
            || self.categories.is_some()
            || self.sources.is_some()
            || self.min_importance.is_some()
            || self.max_importance.is_some()
            || self.created_after_us.is_some()
            || self.created_before_us.is_some()
    }

    /// Reject malformed predicates before any traversal happens.
    pub fn validate(&self) -> MemoryResult<()> {
        for bound in [self.min_importance, self.max_importance].into_iter().flatten() {
            if !bound.is_finite() {
                return Err(MemoryError::predicate("importance bound must be finite"));
            }
        }
        if let (Some(min), Some(max)) = (self.min_importance, self.max_importance) {
            if min > max {
                return Err(MemoryError::predicate(format!(
                    "inverted importance range: {min} > {max}"
                )));
            }
        }
        if let (Some(after), Some(before)) = (self.created_after_us, self.created_before_us) {
            if after > before {
                return Err(MemoryError::predicate(format!(
                    "inverted time range: {after} > {before}"
                )));
            }
        }
        Ok(())
    }

    /// Check if an entry's attributes satisfy every set condition.
    pub fn matches(&self, attributes: &EntryAttributes) -> bool {
        if let Some(ref owners) = self.owner_ids {
            if !owners.contains(&attributes.owner_id) {
                return false;
            }
        }
        if let Some(ref categories) = self.categories {
            if !categories.contains(&attributes.category) {
                return false;
            }
        }
        if let Some(ref sources) = self.sources {
            if !sources.contains(&attributes.source) {
                return false;
            }
        }
        if let Some(min) = self.min_importance {
            if attributes.importance < min {
                return false;
            }
        }
        if let Some(max) = self.max_importance {
            if attributes.importance > max {
                return false;
            }
        }
        if let Some(after) = self.created_after_us {
            if attributes.created_at_us < after {
                return false;
            }
        }
        if let Some(before) = self.created_before_us {
            if attributes.created_at_us > before {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attrs(owner: &str, category: &str, importance: f32, at: u64) -> EntryAttributes {
        EntryAttributes {
            owner_id: owner.to_string(),
            category: category.to_string(),
            importance,
            created_at_us: at,
            source: EntrySource::Durable,
        }
    }

    #[test]
    fn test_empty_filter_matches_everything() {
        let filter = Filter::new();
        assert!(!filter.has_any());
        assert!(filter.matches(&attrs("alice", "fact", 0.5, 100)));
    }

    #[test]
    fn test_conjunction() {
        let filter = Filter::new()
            .owner("alice")
            .category("fact")
            .min_importance(0.4);
        assert!(filter.has_any());

        assert!(filter.matches(&attrs("alice", "fact", 0.5, 100)));
        assert!(!filter.matches(&attrs("bob", "fact", 0.5, 100)));
        assert!(!filter.matches(&attrs("alice", "pref", 0.5, 100)));
        assert!(!filter.matches(&attrs("alice", "fact", 0.3, 100)));
    }

    #[test]
    fn test_tag_membership_is_any_of() {
        let filter = Filter::new().owner("alice").owner("bob");
        assert!(filter.matches(&attrs("bob", "fact", 0.5, 100)));
        assert!(!filter.matches(&attrs("carol", "fact", 0.5, 100)));
    }

    #[test]
    fn test_source_filter() {
        let filter = Filter::new().source(EntrySource::Ephemeral);
        assert!(!filter.matches(&attrs("alice", "fact", 0.5, 100)));

        let mut ephemeral = attrs("alice", "fact", 0.5, 100);
        ephemeral.source = EntrySource::Ephemeral;
        assert!(filter.matches(&ephemeral));
    }

    #[test]
    fn test_time_range_inclusive() {
        let filter = Filter::new().created_between(100, 200);
        assert!(filter.matches(&attrs("a", "c", 0.5, 100)));
        assert!(filter.matches(&attrs("a", "c", 0.5, 200)));
        assert!(!filter.matches(&attrs("a", "c", 0.5, 99)));
        assert!(!filter.matches(&attrs("a", "c", 0.5, 201)));
    }

    #[test]
    fn test_validate_rejects_malformed() {
        let filter = Filter::new().created_between(200, 100);
        assert!(matches!(
            filter.validate(),
            Err(MemoryError::Predicate(_))
        ));

        let mut filter = Filter::new().min_importance(0.9);
        filter.max_importance = Some(0.1);
        assert!(matches!(filter.validate(), Err(MemoryError::Predicate(_))));

        let filter = Filter::new().min_importance(f32::NAN);
        assert!(matches!(filter.validate(), Err(MemoryError::Predicate(_))));

        assert!(Filter::new().owner("alice").validate().is_ok());
    }
}
