//! Data structures for formation configuration.
//!
//! This module contains pure data structures that define how a formation
//! lays out and moves its members. All structs are designed to be
//! deserialized from RON files.
//!
//! **Note:** This module contains no IO - it only defines data types.
//! File loading is handled by `formation_tools`.

mod formation_data;

pub use formation_data::{AnimationRule, FormationShape, FormationTemplate, SortingOrder};
