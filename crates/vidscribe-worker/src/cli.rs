use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, EnvFilter, Layer};

use vidscribe::broadcast::JobPhase;
use vidscribe::db::Database;
use vidscribe::worker::Disposition;
use vidscribe::{
    load_config, Config, CoordinatorSettings, JobProgressBroadcaster, JobService, SqliteStateStore,
    SqliteWorkQueue, StageSet, SubmitRequest, WorkerPool, WorkerSettings,
};

#[derive(Parser, Debug)]
#[command(name = "vidscribe-worker")]
#[command(about = "Turns batches of videos into annotated DOCX transcripts")]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Command,

    /// Path to the JSON config file.
    #[arg(long, default_value = "vidscribe.json")]
    pub config: PathBuf,

    /// Override log level (trace/debug/info/warn/error).
    #[arg(long)]
    pub log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start workers and process queued jobs until interrupted.
    Run {
        /// Overrides `worker_count` from the config.
        #[arg(long)]
        workers: Option<usize>,
    },
    /// Validate and enqueue a job. Prints the initial record.
    Submit {
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
        /// Seconds between sampled frames.
        #[arg(long, allow_negative_numbers = true)]
        frame_interval: Option<i64>,
        #[arg(long)]
        output_dir: Option<PathBuf>,
        /// Lease length in seconds before a stuck job is redelivered.
        #[arg(long)]
        timeout_secs: Option<u64>,
    },
    /// Print a job's progress record.
    Status { job_id: String },
    /// Print the path of the document at INDEX in the job's results.
    Artifact { job_id: String, index: usize },
    /// Check the config file and exit.
    CheckConfig {},
}

pub fn dispatch(args: Args) -> Result<()> {
    let cfg = load_config(&args.config)
        .with_context(|| format!("load config: {}", args.config.display()))?;
    init_logging(&args, &cfg)?;

    match args.cmd {
        Command::Run { workers } => run(&cfg, workers),
        Command::Submit {
            inputs,
            frame_interval,
            output_dir,
            timeout_secs,
        } => {
            let service = open_service(&cfg)?;
            let request = SubmitRequest {
                input_files: inputs,
                frame_interval: frame_interval
                    .unwrap_or_else(|| i64::from(cfg.media.default_frame_interval)),
                output_directory: output_dir,
                timeout: timeout_secs.map(Duration::from_secs),
            };
            let record = service.submit(request)?;
            println!("{}", serde_json::to_string_pretty(&record)?);
            Ok(())
        }
        Command::Status { job_id } => {
            let service = open_service(&cfg)?;
            let record = service.read_status(&job_id)?;
            println!("{}", serde_json::to_string_pretty(&record)?);
            Ok(())
        }
        Command::Artifact { job_id, index } => {
            let service = open_service(&cfg)?;
            let path = service.resolve_artifact(&job_id, index)?;
            println!("{}", path.display());
            Ok(())
        }
        Command::CheckConfig {} => {
            info!(path = %args.config.display(), "config is valid");
            Ok(())
        }
    }
}

fn init_logging(args: &Args, cfg: &Config) -> Result<()> {
    let level = args
        .log_level
        .as_deref()
        .unwrap_or(cfg.logging.level.as_str());

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let stderr_layer = if cfg.logging.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_target(true)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .boxed()
    };

    let subscriber = tracing_subscriber::registry().with(filter).with(stderr_layer);
    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| anyhow!("install tracing subscriber: {e}"))?;
    // The library logs through `log`; forward those records into tracing.
    tracing_log::LogTracer::init().map_err(|e| anyhow!("install log bridge: {e}"))?;
    Ok(())
}

fn open_database(cfg: &Config) -> Result<Database> {
    let path = cfg
        .database_path()
        .ok_or_else(|| anyhow!("no database_path configured and no home directory found"))?;
    Database::open(&path).with_context(|| format!("open database: {}", path.display()))
}

fn open_service(cfg: &Config) -> Result<JobService> {
    let db = open_database(cfg)?;
    let store = Arc::new(SqliteStateStore::new(db.clone()));
    let queue = Arc::new(SqliteWorkQueue::new(db, cfg.queue.poll_interval()));
    Ok(JobService::from_config(cfg, store, queue))
}

fn run(cfg: &Config, workers: Option<usize>) -> Result<()> {
    let db = open_database(cfg)?;
    let store = Arc::new(SqliteStateStore::new(db.clone()));
    let queue = Arc::new(SqliteWorkQueue::new(db, cfg.queue.poll_interval()));

    let stages = StageSet::from_config(cfg);
    stages.warm_up().context("warm up models")?;

    let settings = WorkerSettings {
        worker_count: workers.unwrap_or(cfg.worker_count).max(1),
        poll_interval: cfg.queue.poll_interval(),
        max_attempts: cfg.queue.max_attempts,
        coordinator: CoordinatorSettings {
            document: cfg.document.clone(),
            keep_intermediates: cfg.media.keep_intermediates,
        },
    };

    let broadcaster = JobProgressBroadcaster::default();
    let feed = spawn_progress_logger(&broadcaster);

    let pool = WorkerPool::with_progress_sender(
        queue,
        store,
        stages.clone(),
        settings,
        Some(broadcaster.sender()),
    );

    let shutdown = pool.shutdown_flag();
    ctrlc::set_handler(move || {
        shutdown.store(true, Ordering::Relaxed);
    })
    .context("install Ctrl-C handler")?;

    info!(output_root = %cfg.output_root, "worker running; press Ctrl-C to stop");

    while !pool.is_shutdown() {
        if let Some(result) = pool.recv_result_timeout(Duration::from_secs(1)) {
            match result.disposition {
                Disposition::Completed | Disposition::AlreadyFinished => {
                    if let Some(summary) = result.summary {
                        info!(
                            job_id = %result.job_id,
                            status = %summary.status,
                            succeeded = summary.succeeded,
                            failed = summary.failed,
                            "job finished"
                        );
                    }
                }
                Disposition::Released => {
                    info!(job_id = %result.job_id, "job returned to queue")
                }
                Disposition::DeadLettered | Disposition::Failed | Disposition::Retry => error!(
                    job_id = %result.job_id,
                    attempts = result.attempts,
                    disposition = ?result.disposition,
                    error = result.error.as_deref().unwrap_or(""),
                    "job did not complete"
                ),
            }
        }
    }

    pool.shutdown();
    pool.wait();
    stages.shutdown();

    drop(broadcaster);
    if feed.join().is_err() {
        warn!("progress logger panicked");
    }
    Ok(())
}

/// Logs every broadcast event until all senders are gone.
fn spawn_progress_logger(broadcaster: &JobProgressBroadcaster) -> thread::JoinHandle<()> {
    let mut receiver = broadcaster.subscribe();
    thread::spawn(move || loop {
        match receiver.blocking_recv() {
            Ok(event) => match event.phase {
                JobPhase::FileFailed => warn!(
                    job_id = %event.job_id,
                    progress = event.progress,
                    error = event.error.as_deref().unwrap_or(""),
                    "{}",
                    event.message
                ),
                _ => info!(
                    job_id = %event.job_id,
                    phase = %event.phase,
                    progress = event.progress,
                    done = event.done_files,
                    total = event.total_files,
                    "{}",
                    event.message
                ),
            },
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "progress logger fell behind");
            }
            Err(RecvError::Closed) => break,
        }
    })
}
