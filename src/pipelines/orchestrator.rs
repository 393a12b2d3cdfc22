//! # Stage Orchestrator
//!
//! Runs the caller pipeline as a linear state machine:
//!
//! ```text
//! Init -> IndexAndAlign -> Detect -> Cluster -> Reevaluate
//!      -> SecondaryAlign -> Merge -> Report -> Done
//! ```
//!
//! The thread budget is planned once during `Init`. When the budget reserves an
//! index thread, the secondary aligner's index is built on a background thread
//! launched at `IndexAndAlign` and joined right before `SecondaryAlign`, the
//! first stage that reads it. Every working stage is bracketed by one progress
//! monitor (or a static status line when the budget disables animation).
//!
//! On failure the active monitor is stopped and any background index build is
//! joined before the error is returned; no thread outlives [`StageOrchestrator::run`].

use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{info_span, instrument};

use crate::error::{Result, SvError, ToolError};
use crate::pipelines::stages::{Reference, StageId, Stages};
use crate::utils::events::{Observer, TracingObserver};
use crate::utils::telemetry::{MonitorHandle, ProgressMonitor};
use crate::utils::threading::{plan, validate_quota, Budget, IndexPlan};

const INLINE_INDEX_LABEL: &str = "Building reference index";

/// Inputs of one pipeline run
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub reference: Reference,
    pub reads: PathBuf,
    /// Total thread quota
    pub threads: usize,
    /// Rebuild the index even if one exists
    pub force: bool,
    /// Static status lines instead of the animated monitor
    pub quiet: bool,
}

/// Wall time spent in one stage
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StageTiming {
    pub stage: StageId,
    pub elapsed: Duration,
}

/// Outcome of a successful run
#[derive(Debug, Clone)]
pub struct RunResult {
    pub budget: Budget,
    pub index_plan: IndexPlan,
    /// Report written by the `Report` stage
    pub report: PathBuf,
    pub timings: Vec<StageTiming>,
}

type IndexTask = JoinHandle<std::result::Result<(), ToolError>>;

/// Transient state of one run
struct PipelineState {
    stage: StageId,
    budget: Budget,
    index_plan: IndexPlan,
    index_task: Option<IndexTask>,
    index_ready: bool,
    monitor: Option<(StageId, MonitorHandle)>,
    timings: Vec<StageTiming>,
}

impl PipelineState {
    fn new(budget: Budget, index_plan: IndexPlan) -> Self {
        Self {
            stage: StageId::Init,
            budget,
            index_plan,
            index_task: None,
            index_ready: index_plan == IndexPlan::Reuse,
            monitor: None,
            timings: Vec::with_capacity(StageId::ALL.len()),
        }
    }

    /// Move to `next`, which must directly follow the current stage
    fn advance(&mut self, next: StageId) -> Result<()> {
        if self.stage.next() != Some(next) {
            return Err(SvError::internal(
                self.stage,
                format!("illegal transition {} -> {}", self.stage, next),
            ));
        }
        self.stage = next;
        Ok(())
    }
}

impl Drop for PipelineState {
    fn drop(&mut self) {
        // Only reached with a live task when unwinding from a panic
        if let Some(task) = self.index_task.take() {
            let _ = task.join();
        }
    }
}

/// Sequences the pipeline stages against a [`Stages`] collaborator
pub struct StageOrchestrator {
    options: PipelineOptions,
    stages: Arc<dyn Stages>,
    monitor: ProgressMonitor,
    observer: Arc<dyn Observer>,
}

impl StageOrchestrator {
    pub fn new(options: PipelineOptions, stages: Arc<dyn Stages>) -> Self {
        Self {
            options,
            stages,
            monitor: ProgressMonitor::terminal(),
            observer: Arc::new(TracingObserver),
        }
    }

    pub fn with_monitor(mut self, monitor: ProgressMonitor) -> Self {
        self.monitor = monitor;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn Observer>) -> Self {
        self.observer = observer;
        self
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    /// Plan the thread budget without running anything
    pub fn plan_budget(&self) -> Result<(Budget, IndexPlan)> {
        let quota = validate_quota(self.options.threads)?;
        let index_present = self.stages.index_present(&self.options.reference);
        let budget = plan(self.options.force, quota, self.options.quiet, index_present);
        let index_plan = IndexPlan::resolve(&budget, self.options.force, index_present);
        Ok((budget, index_plan))
    }

    /// Run every stage to completion, failing on the first collaborator error
    #[instrument(name = "pipeline", skip_all, fields(threads = self.options.threads, force = self.options.force))]
    pub fn run(&self) -> Result<RunResult> {
        let started = Instant::now();
        self.observer.stage_started(StageId::Init);
        let (budget, index_plan) = match self.plan_budget() {
            Ok(planned) => planned,
            Err(e) => {
                self.observer.run_failed(&e);
                return Err(e);
            }
        };
        self.observer.budget_planned(&budget, index_plan);

        let mut state = PipelineState::new(budget, index_plan);
        self.finish_stage(&mut state, StageId::Init, started.elapsed());

        match self.drive(&mut state) {
            Ok(report) => Ok(RunResult {
                budget,
                index_plan,
                report,
                timings: std::mem::take(&mut state.timings),
            }),
            Err(e) => {
                self.settle(&mut state);
                self.observer.run_failed(&e);
                Err(e)
            }
        }
    }

    fn drive(&self, state: &mut PipelineState) -> Result<PathBuf> {
        let reference = &self.options.reference;
        let budget = state.budget;

        state.advance(StageId::IndexAndAlign)?;
        if state.index_plan == IndexPlan::Background {
            self.launch_index(state)?;
        }
        let primary = self.run_stage(state, |stages| {
            stages.primary_align(reference, &self.options.reads, budget.mm_threads)
        })?;

        state.advance(StageId::Detect)?;
        let detected = self.run_stage(state, |stages| {
            stages.detect_variants(&primary, budget.mm_threads)
        })?;

        state.advance(StageId::Cluster)?;
        let clustered = self.run_stage(state, |stages| stages.cluster_and_extract(detected))?;

        state.advance(StageId::Reevaluate)?;
        let reevaluated = self.run_stage(state, |stages| {
            stages.reevaluate(clustered, budget.mm_threads)
        })?;

        self.await_index(state)?;
        state.advance(StageId::SecondaryAlign)?;
        if !state.index_ready {
            return Err(SvError::internal(
                StageId::SecondaryAlign,
                "entered without a completed index",
            ));
        }
        let secondary = self.run_stage(state, |stages| {
            stages.secondary_align(reference, budget.bt_threads)
        })?;

        state.advance(StageId::Merge)?;
        let merged = self.run_stage(state, |stages| {
            stages.merge_secondary(reevaluated, &secondary)
        })?;

        state.advance(StageId::Report)?;
        let report = self.run_stage(state, |stages| stages.emit_report(&merged))?;

        state.advance(StageId::Done)?;
        Ok(report)
    }

    /// Run the collaborator call for the current stage inside a status bracket
    fn run_stage<T>(
        &self,
        state: &mut PipelineState,
        work: impl FnOnce(&dyn Stages) -> std::result::Result<T, ToolError>,
    ) -> Result<T> {
        let stage = state.stage;
        let _span = info_span!("stage", stage = %stage).entered();
        self.observer.stage_started(stage);
        let started = Instant::now();

        let value = self.bracketed(state, stage, stage.label(), work)?;

        self.finish_stage(state, stage, started.elapsed());
        Ok(value)
    }

    /// Show status for `label` while `work` runs; the monitor is always
    /// stopped before this returns, whatever `work` produced.
    fn bracketed<T>(
        &self,
        state: &mut PipelineState,
        stage: StageId,
        label: &str,
        work: impl FnOnce(&dyn Stages) -> std::result::Result<T, ToolError>,
    ) -> Result<T> {
        self.begin_status(state, stage, label)?;
        let outcome = work(&*self.stages);
        self.end_status(state);
        outcome.map_err(|e| SvError::tool(stage, e))
    }

    fn finish_stage(&self, state: &mut PipelineState, stage: StageId, elapsed: Duration) {
        state.timings.push(StageTiming { stage, elapsed });
        self.observer.stage_finished(stage, elapsed);
    }

    fn begin_status(&self, state: &mut PipelineState, stage: StageId, label: &str) -> Result<()> {
        if let Some((active, _)) = &state.monitor {
            return Err(SvError::internal(
                stage,
                format!("monitor for {} still active", active),
            ));
        }

        if state.budget.monitor_enabled {
            let handle = self
                .monitor
                .start(label)
                .map_err(|e| spawn_failed(stage, "progress-monitor", e))?;
            state.monitor = Some((stage, handle));
            self.observer.monitor_started(stage);
        } else {
            self.monitor.static_line(label);
        }
        Ok(())
    }

    fn end_status(&self, state: &mut PipelineState) {
        if let Some((stage, handle)) = state.monitor.take() {
            self.monitor.stop(handle);
            self.observer.monitor_stopped(stage);
        }
    }

    fn launch_index(&self, state: &mut PipelineState) -> Result<()> {
        if state.index_task.is_some() {
            return Err(SvError::internal(state.stage, "index build already launched"));
        }

        let threads = state.budget.index_threads;
        let stages = Arc::clone(&self.stages);
        let reference = self.options.reference.clone();
        let task = thread::Builder::new()
            .name("index-build".to_string())
            .spawn(move || stages.build_index(&reference, threads))
            .map_err(|e| spawn_failed(state.stage, "index-build", e))?;

        state.index_task = Some(task);
        self.observer.index_launched(threads);
        Ok(())
    }

    /// Make the index usable before `SecondaryAlign`
    fn await_index(&self, state: &mut PipelineState) -> Result<()> {
        match state.index_plan {
            IndexPlan::Reuse => {}
            IndexPlan::Background => {
                let task = state.index_task.take().ok_or_else(|| {
                    SvError::internal(state.stage, "background index build was never launched")
                })?;
                let _span = info_span!("index_join").entered();
                join_index(task).map_err(|e| SvError::tool(StageId::IndexAndAlign, e))?;
            }
            IndexPlan::Inline => {
                let threads = state.budget.bt_threads;
                let reference = &self.options.reference;
                let _span = info_span!("index_inline", threads).entered();
                self.bracketed(state, StageId::IndexAndAlign, INLINE_INDEX_LABEL, |stages| {
                    stages.build_index(reference, threads)
                })?;
            }
        }

        state.index_ready = true;
        self.observer.index_ready(state.index_plan);
        Ok(())
    }

    /// Release everything a failed run still holds
    fn settle(&self, state: &mut PipelineState) {
        self.end_status(state);
        if let Some(task) = state.index_task.take() {
            if let Err(e) = join_index(task) {
                tracing::warn!("background index build also failed: {}", e);
            }
        }
    }
}

/// A helper thread that could not start fails the stage that needed it
fn spawn_failed(stage: StageId, task: &str, source: std::io::Error) -> SvError {
    SvError::tool(
        stage,
        ToolError::Spawn {
            program: format!("{} thread", task),
            source,
        },
    )
}

fn join_index(task: IndexTask) -> std::result::Result<(), ToolError> {
    task.join().unwrap_or_else(|_| {
        Err(ToolError::Panicked {
            task: "index build".to_string(),
        })
    })
}
