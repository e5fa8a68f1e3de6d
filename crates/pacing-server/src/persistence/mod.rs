//! Persistence layer for the pacing server.
//!
//! Committed plans are mirrored to a single JSON file so external tools
//! (head units, plotting scripts) always see the latest plan.

pub mod plans;

pub use plans::{write_plan, PlanRecord};
