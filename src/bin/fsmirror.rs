#![deny(unsafe_code)]

//! Service entry point: wires the watcher, the engine, and signal handling
//! together and pumps events until told to stop.

use std::error::Error;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use clap::{Parser, ValueEnum};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use fsmirror_engine::{SyncConfig, SyncEngine};
use fsmirror_metrics::{MetricsRecorder, MetricsSink};
use fsmirror_verify::VerifyMethod;
use fsmirror_watch::{EventSource, NotifyEventSource};

/// Comparison strategy for post-copy verification.
#[derive(Debug, Clone, Copy, ValueEnum)]
enum VerifyMethodArg {
    /// Compare file sizes only.
    SizeOnly,
    /// Compare modification times within one second.
    Timestamp,
    /// Compare MD5 digests.
    FastHash,
    /// Compare SHA-256 digests.
    SecureHash,
    /// Compare every byte.
    FullCompare,
}

impl From<VerifyMethodArg> for VerifyMethod {
    fn from(arg: VerifyMethodArg) -> Self {
        match arg {
            VerifyMethodArg::SizeOnly => Self::SizeOnly,
            VerifyMethodArg::Timestamp => Self::Timestamp,
            VerifyMethodArg::FastHash => Self::FastHash,
            VerifyMethodArg::SecureHash => Self::SecureHash,
            VerifyMethodArg::FullCompare => Self::FullCompare,
        }
    }
}

/// Continuously mirror a source directory tree to a destination tree.
#[derive(Debug, Parser)]
#[command(name = "fsmirror", version, about)]
struct Args {
    /// Root of the tree to mirror.
    source_root: PathBuf,

    /// Root of the mirror.
    destination_root: PathBuf,

    /// Directory for the transaction log.
    #[arg(long, default_value = "/var/log/file_sync")]
    log_dir: PathBuf,

    /// Worker pool size.
    #[arg(long, default_value_t = 4)]
    threads: usize,

    /// Task queue capacity.
    #[arg(long, default_value_t = 10_000)]
    max_queue: usize,

    /// Failed attempts allowed per task.
    #[arg(long, default_value_t = 3)]
    max_retries: u32,

    /// Seconds between retry attempts.
    #[arg(long, default_value_t = 5)]
    retry_delay_secs: u64,

    /// Seconds between full-tree consistency sweeps.
    #[arg(long, default_value_t = 6 * 60 * 60)]
    consistency_interval_secs: u64,

    /// Seconds between stuck-transaction recovery sweeps.
    #[arg(long, default_value_t = 60)]
    recovery_interval_secs: u64,

    /// Seconds a transaction must sit unsettled before recovery re-drives it.
    #[arg(long, default_value_t = 5 * 60)]
    recovery_min_age_secs: u64,

    /// Post-copy verification strategy.
    #[arg(long, value_enum, default_value_t = VerifyMethodArg::FastHash)]
    verify_method: VerifyMethodArg,

    /// Transaction log rotation threshold in bytes.
    #[arg(long, default_value_t = 10 * 1024 * 1024)]
    log_rotate_bytes: u64,

    /// Seconds between metric drains into the log stream.
    #[arg(long, default_value_t = 60)]
    metrics_interval_secs: u64,
}

impl Args {
    fn into_config(self) -> (SyncConfig, Duration) {
        let metrics_interval = Duration::from_secs(self.metrics_interval_secs.max(1));
        let mut config = SyncConfig::new(self.source_root, self.destination_root);
        config.num_threads = self.threads.max(1);
        config.log_dir = self.log_dir;
        config.max_queue = self.max_queue;
        config.max_retries = self.max_retries;
        config.retry_delay = Duration::from_secs(self.retry_delay_secs);
        config.consistency_interval = Duration::from_secs(self.consistency_interval_secs.max(1));
        config.recovery_interval = Duration::from_secs(self.recovery_interval_secs.max(1));
        config.recovery_min_age = Duration::from_secs(self.recovery_min_age_secs);
        config.verify_method = self.verify_method.into();
        config.log_rotate_bytes = self.log_rotate_bytes;
        (config, metrics_interval)
    }
}

fn drain_metrics(metrics: &MetricsRecorder) {
    for sample in metrics.collect() {
        info!(target: "fsmirror::metrics", name = %sample.name, value = %sample.value);
    }
}

fn run() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let (config, metrics_interval) = Args::parse().into_config();
    let source_root = config.source_root.clone();

    let metrics = Arc::new(MetricsRecorder::new());
    let engine = SyncEngine::new(config, Arc::clone(&metrics) as Arc<dyn MetricsSink>)?;
    engine.start()?;

    let mut watcher = NotifyEventSource::new()?;
    watcher.add_watch(&source_root)?;
    info!(root = %source_root.display(), "watching source tree");

    let shutdown = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(signal_hook::consts::SIGINT, Arc::clone(&shutdown))?;
    signal_hook::flag::register(signal_hook::consts::SIGTERM, Arc::clone(&shutdown))?;

    // Heal whatever drifted while the service was down.
    engine.perform_consistency_check();

    let cancel = engine.cancel_token();
    let mut last_drain = Instant::now();
    while !shutdown.load(Ordering::SeqCst) && !cancel.is_cancelled() {
        while let Some(event) = watcher.next_event() {
            engine.apply_event(&event);
        }
        if last_drain.elapsed() >= metrics_interval {
            drain_metrics(&metrics);
            last_drain = Instant::now();
        }
        thread::sleep(Duration::from_millis(100));
    }

    info!("shutting down");
    watcher.stop();
    engine.stop();
    drain_metrics(&metrics);
    Ok(())
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "fsmirror failed");
            eprintln!("fsmirror: {err}");
            ExitCode::FAILURE
        }
    }
}
