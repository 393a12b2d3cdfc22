//! # Pipeline Module
//!
//! High-level orchestration of the SV calling workflow.
//! Coordinates thread budgeting, the stage collaborators and progress output.

pub mod orchestrator;
pub mod stages;

pub use orchestrator::{PipelineOptions, RunResult, StageOrchestrator, StageTiming};
pub use stages::{AlignmentArtifact, AlignmentKind, DetectionState, Reference, StageId, Stages};
