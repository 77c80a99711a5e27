//! Error types for the development tools.

use std::path::PathBuf;

use formation_core::error::FormationError;
use thiserror::Error;

/// Result type for tool commands.
pub type Result<T> = std::result::Result<T, ToolError>;

/// Errors reported by tool commands.
#[derive(Debug, Error)]
pub enum ToolError {
    /// A file or directory could not be read.
    #[error("Failed to read {path}: {source}")]
    Io {
        /// Offending path.
        path: PathBuf,
        /// Underlying IO error.
        source: std::io::Error,
    },

    /// A template file failed to parse or validate.
    #[error("Invalid template file {path}: {source}")]
    Template {
        /// Offending file.
        path: PathBuf,
        /// Parse or validation error.
        source: FormationError,
    },

    /// Two template files define the same name.
    #[error("Template '{name}' defined in both {first} and {second}")]
    DuplicateName {
        /// Template name.
        name: String,
        /// File that defined it first.
        first: PathBuf,
        /// File that defined it again.
        second: PathBuf,
    },

    /// A directory holds no template files.
    #[error("No .ron templates found in {0}")]
    NoTemplates(PathBuf),

    /// A template name is neither a preset nor a readable file.
    #[error("Unknown template: {0}")]
    UnknownTemplate(String),

    /// A preview was requested for fewer than one member.
    #[error("Preview needs at least one member")]
    NoMembers,

    /// JSON output failed.
    #[error("Failed to write JSON: {0}")]
    Json(#[from] serde_json::Error),
}
