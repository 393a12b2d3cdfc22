//! # Pipeline Observer
//!
//! Observability hooks invoked by the orchestrator. Control flow never depends
//! on an observer; it only sees what already happened.

use std::time::Duration;

use crate::error::SvError;
use crate::pipelines::stages::StageId;
use crate::utils::threading::{Budget, IndexPlan};

/// Receives pipeline lifecycle events
pub trait Observer: Send + Sync {
    fn budget_planned(&self, _budget: &Budget, _plan: IndexPlan) {}

    fn stage_started(&self, _stage: StageId) {}

    fn stage_finished(&self, _stage: StageId, _elapsed: Duration) {}

    /// Background index build spawned
    fn index_launched(&self, _threads: usize) {}

    /// Index is ready: background build joined, inline build done, or reused
    fn index_ready(&self, _plan: IndexPlan) {}

    fn monitor_started(&self, _stage: StageId) {}

    fn monitor_stopped(&self, _stage: StageId) {}

    fn run_failed(&self, _error: &SvError) {}
}

/// Emits every event through `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl Observer for TracingObserver {
    fn budget_planned(&self, budget: &Budget, plan: IndexPlan) {
        tracing::info!(
            mm_threads = budget.mm_threads,
            bt_threads = budget.bt_threads,
            index_threads = budget.index_threads,
            monitor = budget.monitor_enabled,
            index_plan = ?plan,
            "thread budget planned"
        );
    }

    fn stage_started(&self, stage: StageId) {
        tracing::debug!(stage = %stage, "stage started");
    }

    fn stage_finished(&self, stage: StageId, elapsed: Duration) {
        tracing::info!(
            stage = %stage,
            elapsed_secs = elapsed.as_secs_f64(),
            "{} finished",
            stage.label()
        );
    }

    fn index_launched(&self, threads: usize) {
        tracing::debug!(threads, "index build launched in background");
    }

    fn index_ready(&self, plan: IndexPlan) {
        tracing::debug!(index_plan = ?plan, "index ready");
    }

    fn monitor_started(&self, stage: StageId) {
        tracing::trace!(stage = %stage, "monitor started");
    }

    fn monitor_stopped(&self, stage: StageId) {
        tracing::trace!(stage = %stage, "monitor stopped");
    }

    fn run_failed(&self, error: &SvError) {
        tracing::error!(stage = ?error.stage(), "pipeline aborted: {}", error);
    }
}

/// Discards all events
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpObserver;

impl Observer for NoOpObserver {}
