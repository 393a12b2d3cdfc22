//! Orchestrator behavior against scripted stage collaborators.
//!
//! The doubles record every call in a shared log so tests can assert ordering
//! between the background index build, the stages and the progress monitor.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use svpipe::error::{SvError, ToolError};
use svpipe::pipelines::stages::{AlignmentArtifact, DetectionState, Reference, StageId, Stages};
use svpipe::pipelines::{PipelineOptions, StageOrchestrator};
use svpipe::utils::events::Observer;
use svpipe::utils::telemetry::{MonitorConfig, ProgressMonitor, ProgressSink};
use svpipe::utils::threading::{Budget, IndexPlan};

// --- Helpers ---

#[derive(Debug, Clone, PartialEq)]
enum Call {
    IndexPresent,
    BuildIndexStart(usize),
    BuildIndexEnd,
    PrimaryAlign(usize),
    Detect(usize),
    Cluster,
    Reevaluate(usize),
    SecondaryAlign(usize),
    Merge,
    Report,
}

#[derive(Debug, Clone, Default)]
struct Script {
    index_present: bool,
    index_delay: Duration,
    index_fails: bool,
    fail_at: Option<StageId>,
}

struct ScriptedStages {
    script: Script,
    log: Mutex<Vec<Call>>,
}

impl ScriptedStages {
    fn new(script: Script) -> Self {
        Self {
            script,
            log: Mutex::new(Vec::new()),
        }
    }

    fn record(&self, call: Call) {
        self.log.lock().unwrap().push(call);
    }

    fn calls(&self) -> Vec<Call> {
        self.log.lock().unwrap().clone()
    }

    fn position(&self, pred: impl Fn(&Call) -> bool) -> Option<usize> {
        self.calls().iter().position(pred)
    }

    fn check(&self, stage: StageId) -> Result<(), ToolError> {
        if self.script.fail_at == Some(stage) {
            return Err(ToolError::failed(format!("scripted failure in {}", stage)));
        }
        Ok(())
    }
}

impl Stages for ScriptedStages {
    fn index_present(&self, _reference: &Reference) -> bool {
        self.record(Call::IndexPresent);
        self.script.index_present
    }

    fn build_index(&self, _reference: &Reference, threads: usize) -> Result<(), ToolError> {
        self.record(Call::BuildIndexStart(threads));
        thread::sleep(self.script.index_delay);
        self.record(Call::BuildIndexEnd);
        if self.script.index_fails {
            return Err(ToolError::failed("indexer out of disk"));
        }
        Ok(())
    }

    fn primary_align(
        &self,
        _reference: &Reference,
        _reads: &Path,
        threads: usize,
    ) -> Result<AlignmentArtifact, ToolError> {
        self.record(Call::PrimaryAlign(threads));
        self.check(StageId::IndexAndAlign)?;
        Ok(AlignmentArtifact::primary("primary.sam"))
    }

    fn detect_variants(
        &self,
        _alignment: &AlignmentArtifact,
        threads: usize,
    ) -> Result<DetectionState, ToolError> {
        self.record(Call::Detect(threads));
        self.check(StageId::Detect)?;
        Ok(DetectionState::new("signatures.tsv"))
    }

    fn cluster_and_extract(&self, state: DetectionState) -> Result<DetectionState, ToolError> {
        self.record(Call::Cluster);
        self.check(StageId::Cluster)?;
        Ok(state.advance("clusters.tsv"))
    }

    fn reevaluate(&self, state: DetectionState, threads: usize) -> Result<DetectionState, ToolError> {
        self.record(Call::Reevaluate(threads));
        self.check(StageId::Reevaluate)?;
        Ok(state.advance("reevaluated.tsv"))
    }

    fn secondary_align(
        &self,
        _reference: &Reference,
        threads: usize,
    ) -> Result<AlignmentArtifact, ToolError> {
        self.record(Call::SecondaryAlign(threads));
        self.check(StageId::SecondaryAlign)?;
        Ok(AlignmentArtifact::secondary("secondary.sam"))
    }

    fn merge_secondary(
        &self,
        state: DetectionState,
        secondary: &AlignmentArtifact,
    ) -> Result<DetectionState, ToolError> {
        self.record(Call::Merge);
        self.check(StageId::Merge)?;
        assert_eq!(secondary.path, PathBuf::from("secondary.sam"));
        assert_eq!(state.round, 2, "merge must receive the re-evaluated state");
        Ok(state.advance("merged.tsv"))
    }

    fn emit_report(&self, state: &DetectionState) -> Result<PathBuf, ToolError> {
        self.record(Call::Report);
        self.check(StageId::Report)?;
        assert_eq!(state.round, 3);
        Ok(PathBuf::from("variants.vcf"))
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Event {
    Planned(Budget, IndexPlan),
    StageStarted(StageId),
    StageFinished(StageId),
    IndexLaunched(usize),
    IndexReady(IndexPlan),
    MonitorStarted(StageId),
    MonitorStopped(StageId),
    Failed(Option<StageId>),
}

/// Observer that records events and checks the single-monitor invariant live
#[derive(Default)]
struct RecordingObserver {
    events: Mutex<Vec<Event>>,
    active_monitors: Mutex<usize>,
}

impl RecordingObserver {
    fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    fn push(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }

    fn count(&self, pred: impl Fn(&Event) -> bool) -> usize {
        self.events().iter().filter(|e| pred(e)).count()
    }
}

impl Observer for RecordingObserver {
    fn budget_planned(&self, budget: &Budget, plan: IndexPlan) {
        self.push(Event::Planned(*budget, plan));
    }

    fn stage_started(&self, stage: StageId) {
        self.push(Event::StageStarted(stage));
    }

    fn stage_finished(&self, stage: StageId, _elapsed: Duration) {
        self.push(Event::StageFinished(stage));
    }

    fn index_launched(&self, threads: usize) {
        self.push(Event::IndexLaunched(threads));
    }

    fn index_ready(&self, plan: IndexPlan) {
        self.push(Event::IndexReady(plan));
    }

    fn monitor_started(&self, stage: StageId) {
        let mut active = self.active_monitors.lock().unwrap();
        assert_eq!(*active, 0, "monitor started for {} while another is active", stage);
        *active += 1;
        self.push(Event::MonitorStarted(stage));
    }

    fn monitor_stopped(&self, stage: StageId) {
        let mut active = self.active_monitors.lock().unwrap();
        assert_eq!(*active, 1);
        *active -= 1;
        self.push(Event::MonitorStopped(stage));
    }

    fn run_failed(&self, error: &SvError) {
        self.push(Event::Failed(error.stage()));
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Frame {
    Frame(String),
    Clear(String),
    Static(String),
}

#[derive(Default)]
struct RecordingSink {
    frames: Mutex<Vec<Frame>>,
}

impl RecordingSink {
    fn frames(&self) -> Vec<Frame> {
        self.frames.lock().unwrap().clone()
    }

    fn statics(&self) -> Vec<String> {
        self.frames()
            .into_iter()
            .filter_map(|f| match f {
                Frame::Static(label) => Some(label),
                _ => None,
            })
            .collect()
    }
}

impl ProgressSink for RecordingSink {
    fn frame(&self, label: &str, _glyph: char, _elapsed: Duration) {
        self.frames.lock().unwrap().push(Frame::Frame(label.to_string()));
    }

    fn clear(&self, label: &str) {
        self.frames.lock().unwrap().push(Frame::Clear(label.to_string()));
    }

    fn static_line(&self, label: &str) {
        self.frames.lock().unwrap().push(Frame::Static(label.to_string()));
    }
}

struct Harness {
    orchestrator: StageOrchestrator,
    stages: Arc<ScriptedStages>,
    observer: Arc<RecordingObserver>,
    sink: Arc<RecordingSink>,
}

fn harness(threads: usize, force: bool, quiet: bool, script: Script) -> Harness {
    let stages = Arc::new(ScriptedStages::new(script));
    let observer = Arc::new(RecordingObserver::default());
    let sink = Arc::new(RecordingSink::default());

    let options = PipelineOptions {
        reference: Reference::new("/data/ref.fa", "/tmp/svpipe-test", "ref"),
        reads: PathBuf::from("/data/reads.fq"),
        threads,
        force,
        quiet,
    };
    let monitor = ProgressMonitor::new(
        MonitorConfig {
            interval: Duration::from_millis(2),
            jitter: 0.1,
            seed: Some(11),
        },
        sink.clone(),
    );
    let orchestrator = StageOrchestrator::new(options, stages.clone())
        .with_monitor(monitor)
        .with_observer(observer.clone());

    Harness {
        orchestrator,
        stages,
        observer,
        sink,
    }
}

fn slow_index() -> Script {
    Script {
        index_delay: Duration::from_millis(100),
        ..Script::default()
    }
}

/// Frames of one monitor never interleave with another's
fn assert_frames_not_interleaved(frames: &[Frame]) {
    let mut open: Option<&str> = None;
    for frame in frames {
        match frame {
            Frame::Frame(label) => match open {
                None => open = Some(label.as_str()),
                Some(current) => assert_eq!(current, label.as_str(), "interleaved monitor output"),
            },
            Frame::Clear(label) => {
                if let Some(current) = open {
                    assert_eq!(current, label.as_str());
                }
                open = None;
            }
            Frame::Static(_) => assert!(open.is_none(), "static line inside a monitor"),
        }
    }
}

// --- Tests ---

#[test]
fn test_end_to_end_background_index() {
    let h = harness(4, false, false, slow_index());
    let result = h.orchestrator.run().unwrap();

    assert_eq!(
        result.budget,
        Budget {
            mm_threads: 2,
            bt_threads: 3,
            index_threads: 1,
            monitor_enabled: true,
        }
    );
    assert_eq!(result.index_plan, IndexPlan::Background);
    assert_eq!(result.report, PathBuf::from("variants.vcf"));

    let calls = h.stages.calls();
    assert_eq!(calls[0], Call::IndexPresent);
    assert!(calls.contains(&Call::BuildIndexStart(1)));
    assert!(calls.contains(&Call::PrimaryAlign(2)));
    assert!(calls.contains(&Call::Detect(2)));
    assert!(calls.contains(&Call::Reevaluate(2)));
    assert!(calls.contains(&Call::SecondaryAlign(3)));

    // Launched at IndexAndAlign entry, joined right before SecondaryAlign
    let events = h.observer.events();
    let launched = events.iter().position(|e| *e == Event::IndexLaunched(1)).unwrap();
    assert_eq!(events[launched - 1], Event::StageFinished(StageId::Init));
    assert_eq!(events[launched + 1], Event::StageStarted(StageId::IndexAndAlign));

    let ready = events
        .iter()
        .position(|e| *e == Event::IndexReady(IndexPlan::Background))
        .unwrap();
    assert_eq!(events[ready - 1], Event::StageFinished(StageId::Reevaluate));
    assert_eq!(events[ready + 1], Event::StageStarted(StageId::SecondaryAlign));

    let build_end = h.stages.position(|c| *c == Call::BuildIndexEnd).unwrap();
    let secondary = h.stages.position(|c| matches!(c, Call::SecondaryAlign(_))).unwrap();
    assert!(build_end < secondary);

    let timed: Vec<StageId> = result.timings.iter().map(|t| t.stage).collect();
    assert_eq!(timed, &StageId::ALL[..8]);
}

#[test]
fn test_background_index_completes_before_secondary_align() {
    // Every configuration whose budget reserves an index thread
    let configs = [
        (2, true, false, false),
        (2, true, true, true),
        (5, true, true, false),
        (5, true, false, true),
        (2, false, false, false),
        (2, false, true, false),
        (3, false, false, false),
        (6, false, true, false),
    ];

    for (threads, force, quiet, present) in configs {
        let script = Script {
            index_present: present,
            ..slow_index()
        };
        let h = harness(threads, force, quiet, script);
        let result = h.orchestrator.run().unwrap();
        assert_eq!(result.budget.index_threads, 1, "threads={} force={}", threads, force);

        let build_end = h.stages.position(|c| *c == Call::BuildIndexEnd).unwrap();
        let secondary = h.stages.position(|c| matches!(c, Call::SecondaryAlign(_))).unwrap();
        assert!(
            build_end < secondary,
            "index joined late for threads={} force={} quiet={} present={}",
            threads,
            force,
            quiet,
            present
        );
        assert_eq!(h.observer.count(|e| matches!(e, Event::IndexLaunched(_))), 1);
        assert_eq!(h.stages.calls().iter().filter(|c| **c == Call::BuildIndexEnd).count(), 1);
    }
}

#[test]
fn test_single_monitor_across_full_run() {
    let h = harness(8, false, false, slow_index());
    h.orchestrator.run().unwrap();

    let started = h.observer.count(|e| matches!(e, Event::MonitorStarted(_)));
    let stopped = h.observer.count(|e| matches!(e, Event::MonitorStopped(_)));
    assert_eq!(started, 7);
    assert_eq!(stopped, 7);

    let frames = h.sink.frames();
    assert_frames_not_interleaved(&frames);
    assert_eq!(frames.iter().filter(|f| matches!(f, Frame::Clear(_))).count(), 7);
    assert!(h.sink.statics().is_empty());

    // Each stage's monitor is stopped before the next stage starts
    let events = h.observer.events();
    for stage in &StageId::ALL[1..8] {
        let stop = events.iter().position(|e| *e == Event::MonitorStopped(*stage)).unwrap();
        let finish = events.iter().position(|e| *e == Event::StageFinished(*stage)).unwrap();
        assert!(stop < finish);
    }
}

#[test]
fn test_detect_failure_aborts_before_cluster() {
    let script = Script {
        fail_at: Some(StageId::Detect),
        ..slow_index()
    };
    let h = harness(4, false, false, script);
    let err = h.orchestrator.run().unwrap_err();

    assert_eq!(err.stage(), Some(StageId::Detect));
    assert!(matches!(
        err,
        SvError::ToolFailure {
            stage: StageId::Detect,
            ..
        }
    ));
    assert!(err.to_string().starts_with("Detect stage failed"));

    let calls = h.stages.calls();
    assert!(!calls.contains(&Call::Cluster));
    assert!(!calls.iter().any(|c| matches!(c, Call::SecondaryAlign(_))));

    // Background build was let run to completion and joined before returning
    assert!(calls.contains(&Call::BuildIndexEnd));

    let events = h.observer.events();
    let stopped = events
        .iter()
        .position(|e| *e == Event::MonitorStopped(StageId::Detect))
        .unwrap();
    let failed = events
        .iter()
        .position(|e| *e == Event::Failed(Some(StageId::Detect)))
        .unwrap();
    assert!(stopped < failed);
    assert!(!events.contains(&Event::StageFinished(StageId::Detect)));
    assert!(!events.contains(&Event::StageStarted(StageId::Cluster)));

    // Nothing is rendered once run() has returned
    let frames = h.sink.frames();
    assert_eq!(frames.last(), Some(&Frame::Clear(StageId::Detect.label().to_string())));
    thread::sleep(Duration::from_millis(30));
    assert_eq!(h.sink.frames(), frames);
}

#[test]
fn test_background_index_failure_names_index_stage() {
    let script = Script {
        index_fails: true,
        ..slow_index()
    };
    let h = harness(4, false, true, script);
    let err = h.orchestrator.run().unwrap_err();

    assert!(matches!(
        err,
        SvError::ToolFailure {
            stage: StageId::IndexAndAlign,
            ..
        }
    ));
    let calls = h.stages.calls();
    assert!(calls.contains(&Call::Reevaluate(3)));
    assert!(!calls.iter().any(|c| matches!(c, Call::SecondaryAlign(_))));
}

#[test]
fn test_quiet_uses_static_lines() {
    let h = harness(8, false, true, Script::default());
    let result = h.orchestrator.run().unwrap();

    assert!(!result.budget.monitor_enabled);
    assert_eq!(h.observer.count(|e| matches!(e, Event::MonitorStarted(_))), 0);

    let expected: Vec<String> = StageId::ALL[1..8]
        .iter()
        .map(|s| s.label().to_string())
        .collect();
    assert_eq!(h.sink.statics(), expected);
    assert_eq!(h.sink.frames().len(), expected.len());
}

#[test]
fn test_existing_index_is_reused() {
    let script = Script {
        index_present: true,
        ..Script::default()
    };
    let h = harness(8, false, false, script);
    let result = h.orchestrator.run().unwrap();

    assert_eq!(result.index_plan, IndexPlan::Reuse);
    assert_eq!(result.budget.mm_threads, 7);
    assert_eq!(result.budget.bt_threads, 7);
    assert!(!h.stages.calls().iter().any(|c| matches!(c, Call::BuildIndexStart(_))));
    assert_eq!(h.observer.count(|e| matches!(e, Event::IndexLaunched(_))), 0);
    assert!(h.observer.events().contains(&Event::IndexReady(IndexPlan::Reuse)));
}

#[test]
fn test_single_thread_force_builds_inline_before_secondary_align() {
    let script = Script {
        index_present: true,
        ..slow_index()
    };
    let h = harness(1, true, false, script);
    let result = h.orchestrator.run().unwrap();

    assert_eq!(result.index_plan, IndexPlan::Inline);
    assert_eq!(h.observer.count(|e| matches!(e, Event::IndexLaunched(_))), 0);

    let calls = h.stages.calls();
    let reevaluate = calls.iter().position(|c| *c == Call::Reevaluate(1)).unwrap();
    let build_start = calls.iter().position(|c| *c == Call::BuildIndexStart(1)).unwrap();
    let build_end = calls.iter().position(|c| *c == Call::BuildIndexEnd).unwrap();
    let secondary = calls.iter().position(|c| *c == Call::SecondaryAlign(1)).unwrap();
    assert!(reevaluate < build_start);
    assert_eq!(build_end, build_start + 1);
    assert!(build_end < secondary);

    let statics = h.sink.statics();
    assert!(statics.contains(&"Building reference index".to_string()));
    assert_frames_not_interleaved(&h.sink.frames());
}

#[test]
fn test_single_thread_missing_index_builds_inline() {
    let h = harness(1, false, true, Script::default());
    let result = h.orchestrator.run().unwrap();
    assert_eq!(result.index_plan, IndexPlan::Inline);
    assert!(h.stages.calls().contains(&Call::BuildIndexStart(1)));
}

#[test]
fn test_zero_quota_is_config_error() {
    let h = harness(0, false, false, Script::default());
    let err = h.orchestrator.run().unwrap_err();
    assert!(matches!(err, SvError::Config { .. }));
    assert!(h.stages.calls().is_empty());
    assert_eq!(h.observer.events(), vec![
        Event::StageStarted(StageId::Init),
        Event::Failed(None),
    ]);
}

#[test]
fn test_report_failure_stops_monitor() {
    let script = Script {
        index_present: true,
        fail_at: Some(StageId::Report),
        ..Script::default()
    };
    let h = harness(6, false, false, script);
    let err = h.orchestrator.run().unwrap_err();

    assert_eq!(err.stage(), Some(StageId::Report));
    assert_eq!(
        h.observer.count(|e| matches!(e, Event::MonitorStarted(_))),
        h.observer.count(|e| matches!(e, Event::MonitorStopped(_)))
    );
    assert!(h.observer.events().contains(&Event::Planned(
        Budget {
            mm_threads: 5,
            bt_threads: 5,
            index_threads: 0,
            monitor_enabled: true,
        },
        IndexPlan::Reuse
    )));
}

#[test]
fn test_inline_index_failure_names_index_stage() {
    let script = Script {
        index_present: true,
        index_fails: true,
        ..Script::default()
    };
    let h = harness(1, true, false, script);
    let err = h.orchestrator.run().unwrap_err();

    assert!(matches!(
        err,
        SvError::ToolFailure {
            stage: StageId::IndexAndAlign,
            ..
        }
    ));
    let calls = h.stages.calls();
    assert!(calls.contains(&Call::Reevaluate(1)));
    assert!(calls.contains(&Call::BuildIndexEnd));
    assert!(!calls.iter().any(|c| matches!(c, Call::SecondaryAlign(_))));

    assert_eq!(h.sink.statics().last().map(String::as_str), Some("Building reference index"));
    assert!(!h.observer.events().iter().any(|e| matches!(e, Event::IndexReady(_))));
    assert_eq!(
        h.observer.events().last(),
        Some(&Event::Failed(Some(StageId::IndexAndAlign)))
    );
}

#[test]
fn test_index_lookup_happens_once_per_run() {
    let h = harness(4, false, false, Script::default());
    let result = h.orchestrator.run().unwrap();
    assert_eq!(result.index_plan, IndexPlan::Background);

    let lookups = |h: &Harness| h.stages.calls().iter().filter(|c| **c == Call::IndexPresent).count();
    assert_eq!(lookups(&h), 1);

    h.orchestrator.run().unwrap();
    assert_eq!(lookups(&h), 2);
}
