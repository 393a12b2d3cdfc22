//! # Utilities Module
//!
//! ## Sub-modules
//! - `threading`: thread budget planning
//! - `telemetry`: background progress monitor
//! - `events`: observer hooks for pipeline lifecycle events

pub mod events;
pub mod telemetry;
pub mod threading;
