//! # Configuration
//!
//! CLI arguments (clap derive) and their validation.
//!
//! ## Example CLI
//! ```bash
//! svpipe --reference hg38.fa --reads sample.fq.gz --work-dir run1 --threads 16
//! ```

use std::fs;
use std::path::PathBuf;

use clap::Parser;

use crate::error::{Result, SvError};
use crate::pipelines::orchestrator::PipelineOptions;
use crate::pipelines::stages::Reference;
use crate::tools::Toolchain;
use crate::utils::threading::validate_quota;

/// Structural-variant calling pipeline
#[derive(Parser, Debug, Clone)]
#[command(name = "svpipe", version, about, long_about = None)]
pub struct Config {
    /// Reference FASTA
    #[arg(long, short = 'r', value_name = "REF.FA")]
    pub reference: PathBuf,

    /// Long-read input (FASTQ/FASTA, optionally gzipped)
    #[arg(long, value_name = "READS")]
    pub reads: PathBuf,

    /// Directory for the index and intermediate files
    #[arg(long, short = 'w', value_name = "DIR", default_value = "svpipe_work")]
    pub work_dir: PathBuf,

    /// Index basename (default: reference file stem)
    #[arg(long, value_name = "NAME")]
    pub ref_name: Option<String>,

    /// Total thread quota (default: all available cores)
    #[arg(long, short = 't', value_name = "INT")]
    pub threads: Option<usize>,

    /// Rebuild the reference index even if one exists
    #[arg(long, short = 'f')]
    pub force: bool,

    /// Print static status lines instead of the animated progress monitor
    #[arg(long, short = 'q')]
    pub quiet: bool,

    /// Emit span timings for every stage
    #[arg(long)]
    pub profile: bool,

    /// minimap2 executable
    #[arg(long, value_name = "PATH", default_value = "minimap2")]
    pub minimap2: PathBuf,

    /// bowtie2 executable
    #[arg(long, value_name = "PATH", default_value = "bowtie2")]
    pub bowtie2: PathBuf,

    /// bowtie2-build executable
    #[arg(long, value_name = "PATH", default_value = "bowtie2-build")]
    pub bowtie2_build: PathBuf,

    /// SV caller front-end executable
    #[arg(long, value_name = "PATH", default_value = "svcaller")]
    pub caller: PathBuf,
}

impl Config {
    /// Parse command line arguments and validate them
    pub fn parse_and_validate() -> Result<Self> {
        let config = Self::parse();
        config.validate()?;
        Ok(config)
    }

    /// Check the thread quota and create the work directory
    pub fn validate(&self) -> Result<()> {
        validate_quota(self.nthreads())?;
        if self.ref_name().is_empty() {
            return Err(SvError::config(format!(
                "cannot derive an index name from {}",
                self.reference.display()
            )));
        }
        fs::create_dir_all(&self.work_dir)?;
        Ok(())
    }

    /// Thread quota, defaulting to the number of available cores
    pub fn nthreads(&self) -> usize {
        self.threads.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        })
    }

    /// Index basename
    pub fn ref_name(&self) -> String {
        match &self.ref_name {
            Some(name) => name.clone(),
            None => self
                .reference
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default(),
        }
    }

    pub fn reference(&self) -> Reference {
        Reference::new(&self.reference, &self.work_dir, self.ref_name())
    }

    pub fn toolchain(&self) -> Toolchain {
        Toolchain {
            minimap2: self.minimap2.clone(),
            bowtie2: self.bowtie2.clone(),
            bowtie2_build: self.bowtie2_build.clone(),
            caller: self.caller.clone(),
        }
    }

    pub fn pipeline_options(&self) -> PipelineOptions {
        PipelineOptions {
            reference: self.reference(),
            reads: self.reads.clone(),
            threads: self.nthreads(),
            force: self.force,
            quiet: self.quiet,
        }
    }
}
