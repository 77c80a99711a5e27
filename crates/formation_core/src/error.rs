//! Error types for the formation controller.
//!
//! Membership and layout operations never fail: they skip, default or
//! disband. Errors are reserved for host-level addressing mistakes,
//! template data and save games.

use thiserror::Error;

use crate::components::EntityId;

/// Result type alias using [`FormationError`].
pub type Result<T> = std::result::Result<T, FormationError>;

/// Top-level error type for the formation controller.
#[derive(Debug, Error)]
pub enum FormationError {
    /// A formation template failed validation.
    #[error("Invalid formation template '{name}': {reason}")]
    InvalidTemplate {
        /// Template name.
        name: String,
        /// What is wrong with it.
        reason: String,
    },

    /// A template file could not be parsed.
    #[error("Failed to parse formation template: {0}")]
    TemplateParse(String),

    /// Unit entity not found in the host.
    #[error("Unit not found: {0}")]
    UnitNotFound(EntityId),

    /// Formation controller not found in the host.
    #[error("Formation not found: {0}")]
    FormationNotFound(EntityId),

    /// `set_members` may only run once per controller.
    #[error("Formation {0} already has its initial member set")]
    AlreadyInitialized(EntityId),

    /// Not enough units to form a formation.
    #[error("Formation needs at least {required} members, got {provided}")]
    TooFewMembers {
        /// Configured minimum.
        required: usize,
        /// Units offered.
        provided: usize,
    },

    /// Save game written by an incompatible version.
    #[error("Save version mismatch: expected {expected}, got {found}")]
    SaveVersionMismatch {
        /// Version this build writes.
        expected: u32,
        /// Version found in the data.
        found: u32,
    },

    /// Encoding or decoding failed.
    #[error("Serialization failed: {0}")]
    Serialization(String),
}
