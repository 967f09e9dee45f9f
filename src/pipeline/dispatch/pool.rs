//! Bounded recognition worker pool.
//!
//! Jobs enter through a bounded queue. `worker_count` tasks drain it and run
//! each job on the blocking pool while holding a semaphore permit, so at most
//! `worker_count` recognitions are in flight even after a timeout.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot, Semaphore};
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::job::{record_failure, run_job, JobContext, JobHandle, JobOutcome, RecognitionRequest};
use crate::config::ScanConfig;
use crate::models::FieldKey;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("Recognition queue is full")]
    QueueFull,

    #[error("Recognition dispatcher is shut down")]
    QueueClosed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatcherConfig {
    pub worker_count: usize,
    pub queue_capacity: usize,
    pub job_timeout: Duration,
}

impl DispatcherConfig {
    /// Zero workers or a zero-length queue would stall every job; both are raised to 1.
    /// A zero timeout would fail every job and is raised to one second.
    pub fn new(worker_count: usize, queue_capacity: usize, job_timeout: Duration) -> Self {
        Self {
            worker_count: worker_count.max(1),
            queue_capacity: queue_capacity.max(1),
            job_timeout: if job_timeout.is_zero() {
                Duration::from_secs(1)
            } else {
                job_timeout
            },
        }
    }
}

impl From<&ScanConfig> for DispatcherConfig {
    fn from(config: &ScanConfig) -> Self {
        Self::new(
            config.worker_count,
            config.queue_capacity,
            Duration::from_secs(config.job_timeout_secs),
        )
    }
}

struct QueuedJob {
    request: RecognitionRequest,
    handle: JobHandle,
    done: oneshot::Sender<JobOutcome>,
}

/// Receipt for a submitted job.
#[derive(Debug)]
pub struct JobTicket {
    key: FieldKey,
    handle: JobHandle,
    done: oneshot::Receiver<JobOutcome>,
}

impl JobTicket {
    pub fn id(&self) -> Uuid {
        self.handle.id()
    }

    pub fn key(&self) -> &FieldKey {
        &self.key
    }

    pub fn handle(&self) -> &JobHandle {
        &self.handle
    }

    pub fn cancel(&self) -> bool {
        self.handle.cancel()
    }

    /// Wait for the job to end. A job dropped by a dying worker reads as cancelled.
    pub async fn wait(self) -> JobOutcome {
        self.done.await.unwrap_or(JobOutcome::Cancelled)
    }
}

pub struct RecognitionDispatcher {
    sender: Mutex<Option<mpsc::Sender<QueuedJob>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    config: DispatcherConfig,
}

impl RecognitionDispatcher {
    /// Spawn the workers. Must be called from inside a Tokio runtime.
    pub fn start(config: DispatcherConfig, ctx: JobContext) -> Self {
        let (tx, rx) = mpsc::channel(config.queue_capacity);
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let ctx = Arc::new(ctx);
        let permits = Arc::new(Semaphore::new(config.worker_count));

        let workers = (0..config.worker_count)
            .map(|worker_id| {
                tokio::spawn(worker_loop(
                    worker_id,
                    Arc::clone(&rx),
                    Arc::clone(&ctx),
                    Arc::clone(&permits),
                    config.job_timeout,
                ))
            })
            .collect();

        tracing::info!(
            workers = config.worker_count,
            queue = config.queue_capacity,
            timeout_secs = config.job_timeout.as_secs(),
            "Recognition dispatcher started"
        );

        Self {
            sender: Mutex::new(Some(tx)),
            workers: Mutex::new(workers),
            config,
        }
    }

    pub fn config(&self) -> DispatcherConfig {
        self.config
    }

    /// Queue a job, waiting for room when the queue is full.
    pub async fn submit(&self, request: RecognitionRequest) -> Result<JobTicket, DispatchError> {
        let sender = self.sender()?;
        let (job, ticket) = Self::package(request);
        sender
            .send(job)
            .await
            .map_err(|_| DispatchError::QueueClosed)?;
        tracing::debug!(job_id = %ticket.id(), field = %ticket.key(), "Recognition job queued");
        Ok(ticket)
    }

    /// Queue a job without waiting. Reports [`DispatchError::QueueFull`] instead.
    pub fn try_submit(&self, request: RecognitionRequest) -> Result<JobTicket, DispatchError> {
        let sender = self.sender()?;
        let (job, ticket) = Self::package(request);
        sender.try_send(job).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => DispatchError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => DispatchError::QueueClosed,
        })?;
        tracing::debug!(job_id = %ticket.id(), field = %ticket.key(), "Recognition job queued");
        Ok(ticket)
    }

    /// Stop accepting jobs, let queued ones drain and join the workers.
    pub async fn shutdown(&self) {
        let sender = self.sender.lock().unwrap_or_else(|e| e.into_inner()).take();
        drop(sender);
        let workers: Vec<_> = self
            .workers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
            .collect();
        for worker in workers {
            if let Err(e) = worker.await {
                tracing::error!(error = %e, "Recognition worker ended abnormally");
            }
        }
        tracing::info!("Recognition dispatcher stopped");
    }

    pub fn is_closed(&self) -> bool {
        self.sender
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_none()
    }

    fn sender(&self) -> Result<mpsc::Sender<QueuedJob>, DispatchError> {
        self.sender
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or(DispatchError::QueueClosed)
    }

    fn package(request: RecognitionRequest) -> (QueuedJob, JobTicket) {
        let handle = JobHandle::new();
        let (done_tx, done_rx) = oneshot::channel();
        let ticket = JobTicket {
            key: request.key.clone(),
            handle: handle.clone(),
            done: done_rx,
        };
        let job = QueuedJob {
            request,
            handle,
            done: done_tx,
        };
        (job, ticket)
    }
}

async fn worker_loop(
    worker_id: usize,
    rx: Arc<tokio::sync::Mutex<mpsc::Receiver<QueuedJob>>>,
    ctx: Arc<JobContext>,
    permits: Arc<Semaphore>,
    timeout: Duration,
) {
    loop {
        let job = { rx.lock().await.recv().await };
        let Some(job) = job else {
            break;
        };
        let outcome = execute(&job, &ctx, &permits, timeout).await;
        // The ticket may have been dropped; nobody is waiting then.
        let _ = job.done.send(outcome);
    }
    tracing::debug!(worker_id, "Recognition worker exiting");
}

async fn execute(
    job: &QueuedJob,
    ctx: &Arc<JobContext>,
    permits: &Arc<Semaphore>,
    timeout: Duration,
) -> JobOutcome {
    if job.handle.is_cancelled() {
        return JobOutcome::Cancelled;
    }
    let Ok(permit) = Arc::clone(permits).acquire_owned().await else {
        return JobOutcome::Cancelled;
    };

    let task_ctx = Arc::clone(ctx);
    let request = job.request.clone();
    let handle = job.handle.clone();
    let mut task = tokio::task::spawn_blocking(move || {
        // Held until the blocking work really ends, even past a timeout.
        let _permit = permit;
        run_job(&task_ctx, &request, &handle)
    });

    match tokio::time::timeout(timeout, &mut task).await {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(e)) => job_panicked(job, ctx, &e),
        Err(_) => {
            if job.handle.cancel() {
                tracing::warn!(
                    job_id = %job.handle.id(),
                    field = %job.request.key,
                    timeout_secs = timeout.as_secs(),
                    "Recognition timed out"
                );
                let error = format!("Recognition timed out after {}s", timeout.as_secs());
                record_failure(ctx, &job.request, &error);
                JobOutcome::TimedOut
            } else {
                // Already persisting; let it finish.
                match task.await {
                    Ok(outcome) => outcome,
                    Err(e) => job_panicked(job, ctx, &e),
                }
            }
        }
    }
}

fn job_panicked(job: &QueuedJob, ctx: &JobContext, e: &tokio::task::JoinError) -> JobOutcome {
    tracing::error!(job_id = %job.handle.id(), field = %job.request.key, error = %e, "Recognition task panicked");
    let error = format!("Recognition task panicked: {e}");
    record_failure(ctx, &job.request, &error);
    JobOutcome::Failed { error }
}
