//! # svpipe Library
//!
//! Thread-budgeted orchestration of a structural-variant calling toolchain.
//!
//! ## Modules
//! - `config`: CLI argument parsing and validation
//! - `error`: Error types and result aliases
//! - `pipelines`: Stage collaborators and the stage orchestrator
//! - `tools`: External-process implementation of the stage collaborators
//! - `utils`: Thread budgeting, progress monitor, observer hooks

pub mod config;
pub mod error;
pub mod pipelines;
pub mod tools;
pub mod utils;

// Re-export commonly used types
pub use config::Config;
pub use error::{Result, SvError, ToolError};
pub use pipelines::{PipelineOptions, RunResult, StageId, StageOrchestrator, Stages};
pub use tools::{Toolchain, ToolchainStages};
pub use utils::telemetry::{MonitorConfig, ProgressMonitor, ProgressSink};
pub use utils::threading::{plan, Budget, IndexPlan, BT_THREAD_CEILING};
