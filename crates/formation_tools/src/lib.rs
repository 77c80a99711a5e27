//! # Formation Development Tools
//!
//! Command-line tools for template authors:
//! - Template validation for RON data directories
//! - Slot layout preview as ASCII art or JSON

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]

pub mod error;
pub mod preview;
pub mod validate;
