//! # External Toolchain
//!
//! [`ToolchainStages`] implements [`Stages`] by running external executables:
//!
//! | Stage           | Tool            | Threads      |
//! |-----------------|-----------------|--------------|
//! | index           | `bowtie2-build` | index / bt   |
//! | primary align   | `minimap2`      | mm           |
//! | detect          | caller `detect` | mm           |
//! | cluster         | caller `cluster`| -            |
//! | reevaluate      | caller `reevaluate` | mm       |
//! | secondary align | `bowtie2`       | bt           |
//! | merge           | caller `merge`  | -            |
//! | report          | caller `report` | -            |
//!
//! All intermediate files live in the reference's work directory.

pub mod command;

use std::path::{Path, PathBuf};

use crate::error::ToolError;
use crate::pipelines::stages::{AlignmentArtifact, DetectionState, Reference, Stages};
use command::{all_exist, ToolCommand};

const BT2_SUFFIXES: [&str; 6] = ["1", "2", "3", "4", "rev.1", "rev.2"];

/// Executables used by the pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toolchain {
    pub minimap2: PathBuf,
    pub bowtie2: PathBuf,
    pub bowtie2_build: PathBuf,
    /// Detection / classification / reporting front-end
    pub caller: PathBuf,
}

impl Default for Toolchain {
    fn default() -> Self {
        Self {
            minimap2: PathBuf::from("minimap2"),
            bowtie2: PathBuf::from("bowtie2"),
            bowtie2_build: PathBuf::from("bowtie2-build"),
            caller: PathBuf::from("svcaller"),
        }
    }
}

/// Fixed file layout inside the work directory
#[derive(Debug, Clone)]
struct WorkFiles {
    primary: PathBuf,
    signatures: PathBuf,
    clusters: PathBuf,
    candidates: PathBuf,
    reevaluated: PathBuf,
    secondary: PathBuf,
    merged: PathBuf,
    report: PathBuf,
}

impl WorkFiles {
    fn new(work_dir: &Path) -> Self {
        Self {
            primary: work_dir.join("primary.sam"),
            signatures: work_dir.join("signatures.tsv"),
            clusters: work_dir.join("clusters.tsv"),
            candidates: work_dir.join("candidates.fa"),
            reevaluated: work_dir.join("reevaluated.tsv"),
            secondary: work_dir.join("secondary.sam"),
            merged: work_dir.join("merged.tsv"),
            report: work_dir.join("variants.vcf"),
        }
    }
}

/// [`Stages`] backed by child processes
#[derive(Debug, Clone)]
pub struct ToolchainStages {
    toolchain: Toolchain,
    files: WorkFiles,
}

impl ToolchainStages {
    pub fn new(toolchain: Toolchain, work_dir: &Path) -> Self {
        Self {
            toolchain,
            files: WorkFiles::new(work_dir),
        }
    }

    pub fn toolchain(&self) -> &Toolchain {
        &self.toolchain
    }

    fn caller(&self, subcommand: &str) -> ToolCommand {
        ToolCommand::new(&self.toolchain.caller).arg(subcommand)
    }
}

/// Paths of the bowtie2 index files for `prefix`, using `ext` (`bt2` or `bt2l`)
pub fn bowtie2_index_files(prefix: &Path, ext: &str) -> Vec<PathBuf> {
    BT2_SUFFIXES
        .iter()
        .map(|suffix| {
            let mut name = prefix.as_os_str().to_os_string();
            name.push(format!(".{}.{}", suffix, ext));
            PathBuf::from(name)
        })
        .collect()
}

/// True when every file of either the small (`bt2`) or large (`bt2l`) index exists
pub fn bowtie2_index_complete(prefix: &Path) -> bool {
    all_exist(bowtie2_index_files(prefix, "bt2")) || all_exist(bowtie2_index_files(prefix, "bt2l"))
}

impl Stages for ToolchainStages {
    fn index_present(&self, reference: &Reference) -> bool {
        bowtie2_index_complete(&reference.index_prefix())
    }

    fn build_index(&self, reference: &Reference, threads: usize) -> Result<(), ToolError> {
        let prefix = reference.index_prefix();
        ToolCommand::new(&self.toolchain.bowtie2_build)
            .opt("--threads", threads.to_string())
            .arg(&reference.path)
            .arg(&prefix)
            .run()?;

        // bowtie2-build picks the small or large layout by reference size
        if bowtie2_index_complete(&prefix) {
            return Ok(());
        }
        let missing = bowtie2_index_files(&prefix, "bt2")
            .into_iter()
            .find(|file| !file.exists())
            .unwrap_or(prefix);
        Err(ToolError::MissingOutput { path: missing })
    }

    fn primary_align(
        &self,
        reference: &Reference,
        reads: &Path,
        threads: usize,
    ) -> Result<AlignmentArtifact, ToolError> {
        ToolCommand::new(&self.toolchain.minimap2)
            .arg("-a")
            .opt("-t", threads.to_string())
            .opt("-o", &self.files.primary)
            .arg(&reference.path)
            .arg(reads)
            .expects(&self.files.primary)
            .run()?;
        Ok(AlignmentArtifact::primary(&self.files.primary))
    }

    fn detect_variants(
        &self,
        alignment: &AlignmentArtifact,
        threads: usize,
    ) -> Result<DetectionState, ToolError> {
        self.caller("detect")
            .opt("--alignment", &alignment.path)
            .opt("--threads", threads.to_string())
            .opt("--output", &self.files.signatures)
            .expects(&self.files.signatures)
            .run()?;
        Ok(DetectionState::new(&self.files.signatures))
    }

    fn cluster_and_extract(&self, state: DetectionState) -> Result<DetectionState, ToolError> {
        self.caller("cluster")
            .opt("--input", &state.path)
            .opt("--output", &self.files.clusters)
            .opt("--extract", &self.files.candidates)
            .expects(&self.files.clusters)
            .expects(&self.files.candidates)
            .run()?;
        Ok(state.advance(&self.files.clusters))
    }

    fn reevaluate(&self, state: DetectionState, threads: usize) -> Result<DetectionState, ToolError> {
        self.caller("reevaluate")
            .opt("--input", &state.path)
            .opt("--threads", threads.to_string())
            .opt("--output", &self.files.reevaluated)
            .expects(&self.files.reevaluated)
            .run()?;
        Ok(state.advance(&self.files.reevaluated))
    }

    fn secondary_align(
        &self,
        reference: &Reference,
        threads: usize,
    ) -> Result<AlignmentArtifact, ToolError> {
        ToolCommand::new(&self.toolchain.bowtie2)
            .opt("-p", threads.to_string())
            .arg("-f")
            .opt("-x", reference.index_prefix())
            .opt("-U", &self.files.candidates)
            .opt("-S", &self.files.secondary)
            .expects(&self.files.secondary)
            .run()?;
        Ok(AlignmentArtifact::secondary(&self.files.secondary))
    }

    fn merge_secondary(
        &self,
        state: DetectionState,
        secondary: &AlignmentArtifact,
    ) -> Result<DetectionState, ToolError> {
        self.caller("merge")
            .opt("--input", &state.path)
            .opt("--secondary", &secondary.path)
            .opt("--output", &self.files.merged)
            .expects(&self.files.merged)
            .run()?;
        Ok(state.advance(&self.files.merged))
    }

    fn emit_report(&self, state: &DetectionState) -> Result<PathBuf, ToolError> {
        self.caller("report")
            .opt("--input", &state.path)
            .opt("--output", &self.files.report)
            .expects(&self.files.report)
            .run()?;
        Ok(self.files.report.clone())
    }
}
