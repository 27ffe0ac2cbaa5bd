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

//! Mnemo Index
//!
//! Filtered vector similarity search. Two interchangeable backends sit
//! behind the [`VectorIndex`] trait: an exact brute-force scan
//! ([`FlatIndex`]) and a layered small-world graph ([`HnswIndex`]).
//! Both apply attribute predicates during the search itself, so filtered
//! queries return up to k matching entries rather than a post-filtered
//! remainder.

pub mod filter;
pub mod flat;
pub mod hnsw;
pub mod vector;

pub use filter::Filter;
pub use flat::FlatIndex;
pub use hnsw::{HnswIndex, HnswStats};
pub use vector::{
    cosine_similarity, distance, EntryAttributes, EntrySource, SearchHit, VectorIndex,
};
