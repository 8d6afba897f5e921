use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, Sender};
use log::{debug, error, info, warn};
use tokio::sync::broadcast;

use crate::broadcast::job_progress::JobProgressEvent;
use crate::error::StoreError;
use crate::job::{Job, JobStatus, RecordUpdate};
use crate::pipeline::{
    BroadcastProgress, Coordinator, CoordinatorError, CoordinatorSettings, NoopProgress,
    ProgressEvent, ProgressReporter,
};
use crate::queue::{Delivery, WorkQueue};
use crate::stages::StageSet;
use crate::store::JobStateStore;
use crate::worker::job::{Disposition, JobResult};

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub worker_count: usize,
    /// Longest a worker blocks on an empty queue before re-checking the
    /// shutdown flag.
    pub poll_interval: Duration,
    pub max_attempts: u32,
    pub coordinator: CoordinatorSettings,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            worker_count: 1,
            poll_interval: Duration::from_millis(500),
            max_attempts: 3,
            coordinator: CoordinatorSettings::default(),
        }
    }
}

/// Shared handles every worker thread needs.
#[derive(Clone)]
struct WorkerContext {
    queue: Arc<dyn WorkQueue>,
    store: Arc<dyn JobStateStore>,
    shutdown: Arc<AtomicBool>,
    progress_sender: Option<Arc<broadcast::Sender<JobProgressEvent>>>,
    poll_interval: Duration,
    max_attempts: u32,
}

pub struct WorkerPool {
    result_receiver: Receiver<JobResult>,
    workers: Vec<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
}

impl WorkerPool {
    pub fn start(
        queue: Arc<dyn WorkQueue>,
        store: Arc<dyn JobStateStore>,
        stages: StageSet,
        settings: WorkerSettings,
    ) -> Self {
        Self::with_progress_sender(queue, store, stages, settings, None)
    }

    /// Starts `worker_count` threads pulling from `queue`.
    ///
    /// # Panics
    /// Panics if `worker_count` is 0.
    pub fn with_progress_sender(
        queue: Arc<dyn WorkQueue>,
        store: Arc<dyn JobStateStore>,
        stages: StageSet,
        settings: WorkerSettings,
        progress_sender: Option<Arc<broadcast::Sender<JobProgressEvent>>>,
    ) -> Self {
        assert!(settings.worker_count > 0, "worker_count must be > 0");
        let (result_sender, result_receiver) = unbounded::<JobResult>();
        let shutdown = Arc::new(AtomicBool::new(false));

        let ctx = WorkerContext {
            queue,
            store,
            shutdown: Arc::clone(&shutdown),
            progress_sender,
            poll_interval: settings.poll_interval,
            max_attempts: settings.max_attempts,
        };

        let mut workers = Vec::with_capacity(settings.worker_count);
        for worker_id in 0..settings.worker_count {
            let ctx = ctx.clone();
            let result_tx = result_sender.clone();
            let coordinator = Coordinator::new(
                Arc::clone(&ctx.store),
                stages.clone(),
                settings.coordinator.clone(),
            );

            let handle = thread::spawn(move || {
                run_worker(worker_id, ctx, coordinator, result_tx);
            });
            workers.push(handle);
        }

        info!("Started {} workers", settings.worker_count);

        Self {
            result_receiver,
            workers,
            shutdown,
        }
    }

    pub fn try_recv_result(&self) -> Option<JobResult> {
        self.result_receiver.try_recv().ok()
    }

    pub fn recv_result(&self) -> Option<JobResult> {
        self.result_receiver.recv().ok()
    }

    pub fn recv_result_timeout(&self, timeout: Duration) -> Option<JobResult> {
        self.result_receiver.recv_timeout(timeout).ok()
    }

    /// Asks workers to stop. A running job stops before its next stage and
    /// is released back to the queue.
    pub fn shutdown(&self) {
        info!("Shutting down worker pool...");
        self.shutdown.store(true, Ordering::Relaxed);
    }

    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    pub fn wait(self) {
        for (i, worker) in self.workers.into_iter().enumerate() {
            if let Err(e) = worker.join() {
                error!("Worker {} panicked: {:?}", i, e);
            } else {
                debug!("Worker {} finished", i);
            }
        }

        info!("All workers have stopped");
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }
}

fn run_worker(
    worker_id: usize,
    ctx: WorkerContext,
    coordinator: Coordinator,
    result_sender: Sender<JobResult>,
) {
    debug!("Worker {} started", worker_id);

    loop {
        if ctx.shutdown.load(Ordering::Relaxed) {
            debug!("Worker {} received shutdown signal", worker_id);
            break;
        }

        match ctx.queue.dequeue(ctx.poll_interval) {
            Ok(Some(delivery)) => {
                debug!(
                    "Worker {} processing job {} (attempt {})",
                    worker_id, delivery.item.job_id, delivery.attempts
                );
                let result = handle_delivery(&ctx, &coordinator, &delivery);
                if let Err(e) = result_sender.send(result) {
                    debug!("Worker {} has no result listener: {}", worker_id, e);
                }
            }
            Ok(None) => continue,
            Err(e) => {
                error!("Worker {} failed to dequeue: {}", worker_id, e);
                thread::sleep(ctx.poll_interval);
            }
        }
    }

    debug!("Worker {} stopped", worker_id);
}

fn handle_delivery(ctx: &WorkerContext, coordinator: &Coordinator, delivery: &Delivery) -> JobResult {
    let job = Job::from_work_item(delivery.item.clone());

    if delivery.attempts > ctx.max_attempts {
        return dead_letter(ctx, &job, delivery);
    }

    let reporter: Box<dyn ProgressReporter> = match ctx.progress_sender {
        Some(ref sender) => Box::new(BroadcastProgress::new(
            &job.id,
            job.total_files() as u32,
            Arc::clone(sender),
        )),
        None => Box::new(NoopProgress),
    };

    match coordinator.run(&job, reporter.as_ref(), &ctx.shutdown) {
        Ok(summary) => {
            ack(ctx, delivery);
            JobResult::finished(delivery, summary)
        }
        Err(CoordinatorError::Cancelled) => {
            info!("Job {} interrupted, returning it to the queue", job.id);
            if let Err(e) = ctx.queue.release(delivery) {
                error!("Failed to release job {}: {}", job.id, e);
            }
            JobResult::failure(delivery, Disposition::Released, "cancelled".to_string())
        }
        Err(e) => {
            let message = format!("Job failed: {}", e);
            error!("Job {}: {}", job.id, e);
            let done_files = ctx
                .store
                .read(&job.id)
                .ok()
                .flatten()
                .map_or(0, |record| record.done_files);
            reporter.report(ProgressEvent::Finished {
                status: JobStatus::Failed,
                done_files,
                message: message.clone(),
            });
            match mark_failed(ctx.store.as_ref(), &job, &message) {
                Ok(()) => {
                    ack(ctx, delivery);
                    JobResult::failure(delivery, Disposition::Failed, e.to_string())
                }
                Err(store_err) => {
                    warn!(
                        "Could not record failure of job {} ({}); leaving it for redelivery",
                        job.id, store_err
                    );
                    JobResult::failure(delivery, Disposition::Retry, e.to_string())
                }
            }
        }
    }
}

fn dead_letter(ctx: &WorkerContext, job: &Job, delivery: &Delivery) -> JobResult {
    if let Ok(Some(record)) = ctx.store.read(&job.id) {
        if record.is_terminal() {
            ack(ctx, delivery);
            return JobResult::failure(
                delivery,
                Disposition::AlreadyFinished,
                format!("attempt limit reached after job finished as {}", record.status),
            );
        }
    }

    let message = format!(
        "Gave up after {} attempts (limit {})",
        delivery.attempts - 1,
        ctx.max_attempts
    );
    warn!("Job {}: {}", job.id, message);
    match mark_failed(ctx.store.as_ref(), job, &message) {
        Ok(()) => {
            ack(ctx, delivery);
            JobResult::failure(delivery, Disposition::DeadLettered, message)
        }
        Err(e) => {
            error!("Could not dead-letter job {}: {}", job.id, e);
            JobResult::failure(delivery, Disposition::Retry, message)
        }
    }
}

/// Best-effort terminal write; a terminal record always shows 100. A job whose record vanished is recreated so
/// pollers can still see why it stopped.
fn mark_failed(store: &dyn JobStateStore, job: &Job, message: &str) -> Result<(), StoreError> {
    let update = RecordUpdate::new()
        .status(JobStatus::Failed)
        .progress(100)
        .message(message);
    match store.update(&job.id, &update) {
        Err(StoreError::UnknownJob(_)) => {
            store.initialize(job)?;
            store.update(&job.id, &update)
        }
        other => other,
    }
}

fn ack(ctx: &WorkerContext, delivery: &Delivery) {
    match ctx.queue.ack(delivery) {
        Ok(true) => {}
        Ok(false) => warn!(
            "Lease for job {} expired before ack; it may run again",
            delivery.item.job_id
        ),
        Err(e) => error!("Failed to ack job {}: {}", delivery.item.job_id, e),
    }
}
