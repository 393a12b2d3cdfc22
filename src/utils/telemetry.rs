//! # Progress Monitor
//!
//! Background status animation shown while a stage runs.
//!
//! The monitor owns one thread per active stage. The thread loops:
//! check the cancellation token, render one frame, sleep for a jittered
//! interval. Stopping is cooperative, so [`ProgressMonitor::stop`] waits at most
//! one iteration and then joins the thread; the status line has been cleared
//! by the time it returns.
//!
//! Rendering is behind [`ProgressSink`] so the orchestrator never writes to the
//! terminal directly and tests can observe every frame.

use std::io::{self, IsTerminal, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

const SPINNER: [char; 4] = ['|', '/', '-', '\\'];

/// Shared stop signal for a background task
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Destination for monitor output
pub trait ProgressSink: Send + Sync {
    /// Render one animation frame
    fn frame(&self, label: &str, glyph: char, elapsed: Duration);

    /// Erase the status line; called once when the monitor stops
    fn clear(&self, label: &str);

    /// Plain one-off status line, used when animation is disabled
    fn static_line(&self, label: &str);
}

/// Writes progress to stderr, animating only when stderr is a terminal.
///
/// Without a terminal the first frame of each label becomes one plain log
/// line, so redirected output still names every stage.
pub struct TerminalSink {
    is_tty: bool,
    out: Mutex<Box<dyn Write + Send>>,
    announced: AtomicBool,
}

impl TerminalSink {
    pub fn new() -> Self {
        Self::with_writer(io::stderr().is_terminal(), io::stderr())
    }

    pub fn with_writer(is_tty: bool, out: impl Write + Send + 'static) -> Self {
        Self {
            is_tty,
            out: Mutex::new(Box::new(out)),
            announced: AtomicBool::new(false),
        }
    }

    fn write_out(&self, args: std::fmt::Arguments<'_>) {
        let mut out = self.out.lock().unwrap_or_else(|e| e.into_inner());
        let _ = out.write_fmt(args);
        let _ = out.flush();
    }
}

impl Default for TerminalSink {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressSink for TerminalSink {
    fn frame(&self, label: &str, glyph: char, elapsed: Duration) {
        if self.is_tty {
            self.write_out(format_args!(
                "\r{} {} ({})\x1b[K",
                glyph,
                label,
                format_duration(elapsed.as_secs_f64())
            ));
        } else if !self.announced.swap(true, Ordering::SeqCst) {
            self.static_line(label);
        }
    }

    fn clear(&self, _label: &str) {
        if self.is_tty {
            self.write_out(format_args!("\r\x1b[K"));
        } else {
            self.announced.store(false, Ordering::SeqCst);
        }
    }

    fn static_line(&self, label: &str) {
        self.write_out(format_args!("{}...\n", label));
    }
}

/// Monitor cadence
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Base sleep between frames
    pub interval: Duration,
    /// Relative jitter applied to each sleep, in `[0, 1)`
    pub jitter: f64,
    /// Fixed RNG seed; entropy-seeded when `None`
    pub seed: Option<u64>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(50),
            jitter: 0.1,
            seed: None,
        }
    }
}

/// Starts and stops background status animations
pub struct ProgressMonitor {
    config: MonitorConfig,
    sink: Arc<dyn ProgressSink>,
}

impl ProgressMonitor {
    pub fn new(config: MonitorConfig, sink: Arc<dyn ProgressSink>) -> Self {
        Self { config, sink }
    }

    /// Monitor writing to stderr with the default cadence
    pub fn terminal() -> Self {
        Self::new(MonitorConfig::default(), Arc::new(TerminalSink::new()))
    }

    /// Spawn the animation thread for `label`
    pub fn start(&self, label: &str) -> io::Result<MonitorHandle> {
        let token = CancellationToken::new();
        let sink = Arc::clone(&self.sink);
        let config = self.config.clone();
        let thread_token = token.clone();
        let thread_label = label.to_string();

        let handle = thread::Builder::new()
            .name("progress-monitor".to_string())
            .spawn(move || monitor_loop(&thread_label, sink.as_ref(), &config, &thread_token))?;

        Ok(MonitorHandle {
            label: label.to_string(),
            token,
            handle: Some(handle),
        })
    }

    /// Cancel the animation and wait for its thread to exit
    pub fn stop(&self, handle: MonitorHandle) {
        handle.stop();
    }

    /// Print a static status line instead of animating
    pub fn static_line(&self, label: &str) {
        self.sink.static_line(label);
    }
}

/// Handle to a running monitor thread.
///
/// Dropping the handle cancels and joins the thread as well, so a monitor can
/// never outlive its owner.
pub struct MonitorHandle {
    label: String,
    token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl MonitorHandle {
    pub fn label(&self) -> &str {
        &self.label
    }

    /// True until the thread has been joined
    pub fn is_active(&self) -> bool {
        self.handle.is_some()
    }

    /// Signal shutdown and wait for the thread to finish
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.token.cancel();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::warn!(label = %self.label, "progress monitor thread panicked");
            }
        }
    }
}

impl Drop for MonitorHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Scale `base` by a uniform factor in `[1 - jitter, 1 + jitter]`
fn jittered(base: Duration, jitter: f64, rng: &mut SmallRng) -> Duration {
    let jitter = jitter.clamp(0.0, 0.99);
    if jitter == 0.0 {
        return base;
    }
    base.mul_f64(rng.random_range((1.0 - jitter)..=(1.0 + jitter)))
}

fn monitor_loop(label: &str, sink: &dyn ProgressSink, config: &MonitorConfig, token: &CancellationToken) {
    let mut rng = match config.seed {
        Some(seed) => SmallRng::seed_from_u64(seed),
        None => SmallRng::from_os_rng(),
    };
    let start = Instant::now();
    let mut tick = 0usize;

    loop {
        if token.is_cancelled() {
            break;
        }
        sink.frame(label, SPINNER[tick % SPINNER.len()], start.elapsed());
        tick += 1;
        thread::sleep(jittered(config.interval, config.jitter, &mut rng));
    }

    sink.clear(label);
}

/// Format duration in human-readable form
fn format_duration(secs: f64) -> String {
    if secs >= 3600.0 {
        return format!("{:.1}h", secs / 3600.0);
    }
    // Round first so 59.6s reads 1m0s, never 60s
    let total = secs.max(0.0).round() as u64;
    if total < 60 {
        format!("{}s", total)
    } else {
        format!("{}m{}s", total / 60, total % 60)
    }
}
