//! # svpipe: Structural-Variant Calling Pipeline
//!
//! Runs the alignment, detection and reporting toolchain under one thread quota.
//!
//! ## Usage
//! ```bash
//! # Reuse an existing index if present
//! svpipe --reference hg38.fa --reads sample.fq.gz --work-dir run1 -t 16
//!
//! # Rebuild the index, no animation
//! svpipe --reference hg38.fa --reads sample.fq.gz --force --quiet
//!
//! # With stage timings
//! SVPIPE_LOG=debug svpipe --reference hg38.fa --reads sample.fq.gz --profile
//! ```

use std::sync::Arc;
use std::time::Instant;

use svpipe::config::Config;
use svpipe::pipelines::StageOrchestrator;
use svpipe::tools::ToolchainStages;
use svpipe::Result;

fn main() {
    if let Err(e) = run() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

/// Initialize the tracing subscriber; `--profile` adds span-close timings
fn init_logging(profile: bool) {
    use tracing_subscriber::fmt::format::FmtSpan;
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_env("SVPIPE_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    let span_events = if profile { FmtSpan::CLOSE } else { FmtSpan::NONE };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_span_events(span_events)
                .with_target(false)
                .with_timer(fmt::time::uptime()),
        )
        .init();
}

fn run() -> Result<()> {
    let start = Instant::now();

    // Parse and validate configuration
    let config = Config::parse_and_validate()?;
    init_logging(config.profile);

    eprintln!("svpipe v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("Reference: {}", config.reference.display());
    eprintln!("Reads: {}", config.reads.display());

    let stages = Arc::new(ToolchainStages::new(config.toolchain(), &config.work_dir));
    let orchestrator = StageOrchestrator::new(config.pipeline_options(), stages);

    let result = orchestrator.run()?;
    let budget = result.budget;

    eprintln!(
        "Threads: {} (primary {}, secondary {}, background index {})",
        config.nthreads(),
        budget.mm_threads,
        budget.bt_threads,
        budget.index_threads
    );
    eprintln!("Report: {}", result.report.display());
    eprintln!("Completed in {:.2}s", start.elapsed().as_secs_f64());

    Ok(())
}
