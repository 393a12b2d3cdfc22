//! # Stage Collaborators
//!
//! The pipeline drives an external caller toolchain through the [`Stages`]
//! trait. Everything behind the trait (aligners, statistics, the classifier,
//! report writing) is opaque to the orchestrator: it only sees file handles
//! ([`AlignmentArtifact`], [`DetectionState`]) and success or [`ToolError`].

use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::ToolError;

/// Pipeline phase, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum StageId {
    Init = 0,
    IndexAndAlign = 1,
    Detect = 2,
    Cluster = 3,
    Reevaluate = 4,
    SecondaryAlign = 5,
    Merge = 6,
    Report = 7,
    Done = 8,
}

impl StageId {
    /// Every stage in execution order, `Done` last
    pub const ALL: [StageId; 9] = [
        StageId::Init,
        StageId::IndexAndAlign,
        StageId::Detect,
        StageId::Cluster,
        StageId::Reevaluate,
        StageId::SecondaryAlign,
        StageId::Merge,
        StageId::Report,
        StageId::Done,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            StageId::Init => "Init",
            StageId::IndexAndAlign => "IndexAndAlign",
            StageId::Detect => "Detect",
            StageId::Cluster => "Cluster",
            StageId::Reevaluate => "Reevaluate",
            StageId::SecondaryAlign => "SecondaryAlign",
            StageId::Merge => "Merge",
            StageId::Report => "Report",
            StageId::Done => "Done",
        }
    }

    /// Status line shown while the stage runs
    pub fn label(self) -> &'static str {
        match self {
            StageId::Init => "Planning thread budget",
            StageId::IndexAndAlign => "Aligning reads to reference",
            StageId::Detect => "Detecting SV signatures",
            StageId::Cluster => "Clustering and extracting candidates",
            StageId::Reevaluate => "Re-evaluating candidates",
            StageId::SecondaryAlign => "Realigning candidate sequences",
            StageId::Merge => "Merging realigned candidates",
            StageId::Report => "Writing report",
            StageId::Done => "Done",
        }
    }

    /// Following stage; `Done` is terminal
    pub fn next(self) -> Option<StageId> {
        match self {
            StageId::Init => Some(StageId::IndexAndAlign),
            StageId::IndexAndAlign => Some(StageId::Detect),
            StageId::Detect => Some(StageId::Cluster),
            StageId::Cluster => Some(StageId::Reevaluate),
            StageId::Reevaluate => Some(StageId::SecondaryAlign),
            StageId::SecondaryAlign => Some(StageId::Merge),
            StageId::Merge => Some(StageId::Report),
            StageId::Report => Some(StageId::Done),
            StageId::Done => None,
        }
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reference sequence and the location of its index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    /// Reference FASTA
    pub path: PathBuf,
    /// Directory holding the index and all intermediate files
    pub work_dir: PathBuf,
    /// Index basename inside `work_dir`
    pub name: String,
}

impl Reference {
    pub fn new(path: impl Into<PathBuf>, work_dir: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            work_dir: work_dir.into(),
            name: name.into(),
        }
    }

    /// Index prefix, `<work_dir>/<name>`
    pub fn index_prefix(&self) -> PathBuf {
        self.work_dir.join(&self.name)
    }
}

/// Which aligner produced an artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlignmentKind {
    Primary,
    Secondary,
}

/// Alignment file produced by a collaborator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlignmentArtifact {
    pub path: PathBuf,
    pub kind: AlignmentKind,
}

impl AlignmentArtifact {
    pub fn primary(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            kind: AlignmentKind::Primary,
        }
    }

    pub fn secondary(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            kind: AlignmentKind::Secondary,
        }
    }
}

/// Running detection state, threaded through Detect..Merge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectionState {
    pub path: PathBuf,
    /// Number of transformations applied since detection
    pub round: u32,
}

impl DetectionState {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            round: 0,
        }
    }

    /// Successor state stored at `path`
    pub fn advance(&self, path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            round: self.round + 1,
        }
    }
}

/// External collaborator for every pipeline stage.
///
/// Implementations must be shareable across threads: `build_index` may run on
/// a background thread while `primary_align` runs on the caller's.
pub trait Stages: Send + Sync {
    /// Whether a usable index for `reference` already exists
    fn index_present(&self, reference: &Reference) -> bool;

    fn build_index(&self, reference: &Reference, threads: usize) -> Result<(), ToolError>;

    fn primary_align(
        &self,
        reference: &Reference,
        reads: &Path,
        threads: usize,
    ) -> Result<AlignmentArtifact, ToolError>;

    fn detect_variants(
        &self,
        alignment: &AlignmentArtifact,
        threads: usize,
    ) -> Result<DetectionState, ToolError>;

    fn cluster_and_extract(&self, state: DetectionState) -> Result<DetectionState, ToolError>;

    /// Classifier re-scoring of clustered candidates
    fn reevaluate(&self, state: DetectionState, threads: usize) -> Result<DetectionState, ToolError>;

    /// Realign extracted candidate sequences against the indexed reference
    fn secondary_align(
        &self,
        reference: &Reference,
        threads: usize,
    ) -> Result<AlignmentArtifact, ToolError>;

    /// Fold secondary-stage candidates into the primary clustering result
    fn merge_secondary(
        &self,
        state: DetectionState,
        secondary: &AlignmentArtifact,
    ) -> Result<DetectionState, ToolError>;

    /// Write the final report, returning its path
    fn emit_report(&self, state: &DetectionState) -> Result<PathBuf, ToolError>;
}
