//! # Formation Core
//!
//! Deterministic formation controller for RTS unit groups.
//!
//! This crate contains **only** deterministic logic:
//! - No rendering
//! - No IO
//! - No system randomness
//! - No floating-point math (uses fixed-point)
//!
//! A formation groups independent units into one geometric arrangement
//! (box, line, column, wedge, scatter), gives every unit a slot, keeps the
//! group's motion parameters in line with its slowest member, switches to
//! a marching column on long walks and merges with twin formations that
//! drift together.
//!
//! ## Crate Structure
//!
//! - [`components`] - Host components the controller reads and writes
//! - [`data`] - Formation templates
//! - [`layout`] - Slot layout engine
//! - [`assignment`] - Member-to-slot matching
//! - [`aura`] - Formation aura ledger
//! - [`motion`] - Motion parameter aggregation
//! - [`formation`] - The formation controller
//! - [`simulation`] - Host arena and shape-update loop
//! - [`save`] - Versioned save format
//! - [`math`] - Fixed-point math utilities

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]

pub mod assignment;
pub mod aura;
pub mod components;
pub mod data;
pub mod error;
pub mod formation;
pub mod layout;
pub mod math;
pub mod motion;
pub mod save;
pub mod simulation;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::components::*;
    pub use crate::data::{AnimationRule, FormationShape, FormationTemplate, SortingOrder};
    pub use crate::error::{FormationError, Result};
    pub use crate::formation::{Formation, FormationState, MembershipOutcome};
    pub use crate::layout::{Slot, SlotRng};
    pub use crate::math::{Fixed, Vec2Fixed};
    pub use crate::motion::{FormationMotion, PassabilityClasses};
    pub use crate::simulation::{EntitySpawnParams, Simulation, TickEvents};
}
