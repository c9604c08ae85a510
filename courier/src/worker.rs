//! The queue-draining worker.
//!
//! One worker runs one job at a time under a per-job deadline, retries
//! transient failures up to the configured attempt budget, and sidelines
//! everything else. A termination signal lets the in-flight job finish (or
//! hit its deadline) before the loop returns.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::broadcast;

use courier_common::config::WorkerConfig;
use courier_common::{EventBus, MailEvent, Signal};
use courier_message::Message;
use courier_queue::{FailureInfo, Job, Queue};

use crate::mailer::Mailer;

#[derive(Debug)]
pub struct Worker {
    mailer: Arc<Mailer>,
    queue: Arc<Queue>,
    config: WorkerConfig,
    queue_name: Option<String>,
    events: EventBus,
    shutdown: broadcast::Receiver<Signal>,
}

impl Worker {
    pub fn new(
        mailer: Arc<Mailer>,
        queue: Arc<Queue>,
        config: WorkerConfig,
        queue_name: Option<String>,
        events: EventBus,
        shutdown: broadcast::Receiver<Signal>,
    ) -> Self {
        Self {
            mailer,
            queue,
            config,
            queue_name,
            events,
            shutdown,
        }
    }

    /// Drains the queue until a shutdown signal arrives or the memory
    /// ceiling is hit. Returns the number of jobs processed.
    pub async fn run(mut self) -> usize {
        tracing::info!(
            queue = self.queue_name.as_deref().unwrap_or("default"),
            max_tries = self.config.max_tries,
            timeout_secs = self.config.timeout_secs,
            "worker started"
        );

        let mut processed = 0_usize;
        loop {
            if let Some(resident_mb) = memory_usage_mb()
                && resident_mb >= self.config.memory_mb
            {
                tracing::warn!(
                    resident_mb,
                    limit_mb = self.config.memory_mb,
                    "memory limit reached, worker exiting"
                );
                break;
            }
            if self.stop_requested() {
                break;
            }

            match self.queue.pop(self.queue_name.as_deref()).await {
                Ok(Some(job)) => {
                    self.process(job).await;
                    processed += 1;
                }
                Ok(None) => {
                    if self.idle().await {
                        break;
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "queue poll failed, backing off");
                    if self.idle().await {
                        break;
                    }
                }
            }
        }

        tracing::info!(processed, "worker stopped");
        processed
    }

    /// Non-blocking check for a pending shutdown signal.
    fn stop_requested(&mut self) -> bool {
        loop {
            match self.shutdown.try_recv() {
                Ok(Signal::Shutdown) | Err(broadcast::error::TryRecvError::Closed) => {
                    return true;
                }
                Err(broadcast::error::TryRecvError::Lagged(_)) => {}
                Err(broadcast::error::TryRecvError::Empty) => return false,
            }
        }
    }

    /// Sleeps the idle interval; returns `true` when shutdown interrupted
    /// the nap.
    async fn idle(&mut self) -> bool {
        let nap = Duration::from_secs(self.config.sleep.max(1));
        tokio::select! {
            _ = tokio::time::sleep(nap) => false,
            signal = self.shutdown.recv() => !matches!(
                signal,
                Err(broadcast::error::RecvError::Lagged(_))
            ),
        }
    }

    /// Runs one job under the per-job deadline and routes the outcome.
    async fn process(&self, job: Job) {
        let message: Message = match serde_json::from_str(&job.message_payload) {
            Ok(message) => message,
            Err(e) => {
                // Nothing to deliver and nothing a retry could fix.
                tracing::warn!(job_id = %job.id, error = %e, "job payload unparseable");
                self.sideline(job, FailureInfo::new("PayloadInvalid", e.to_string()))
                    .await;
                return;
            }
        };
        let recipient = message.to_address().to_string();

        let deadline = Duration::from_secs(self.config.timeout_secs.max(1));
        let started = Instant::now();
        let outcome = tokio::time::timeout(deadline, self.mailer.deliver(&message)).await;

        match outcome {
            Ok(Ok(())) => {
                tracing::debug!(
                    job_id = %job.id,
                    attempts = job.attempts,
                    elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
                    "job delivered"
                );
            }
            Ok(Err(e)) => {
                let retryable = e.is_retryable() && !e.is_validation();
                let info = FailureInfo::new(e.kind(), e.to_string());
                self.handle_failure(job, recipient, info, retryable).await;
            }
            Err(_) => {
                let info = FailureInfo::new(
                    "JobTimeout",
                    format!("job exceeded its {deadline:?} deadline"),
                );
                self.handle_failure(job, recipient, info, true).await;
            }
        }
    }

    async fn handle_failure(
        &self,
        job: Job,
        recipient: String,
        info: FailureInfo,
        retryable: bool,
    ) {
        let attempts_after = job.attempts + 1;
        let will_retry = retryable && attempts_after < self.config.max_tries;

        tracing::warn!(
            job_id = %job.id,
            attempts = attempts_after,
            will_retry,
            error = %info.message,
            "job failed"
        );
        self.events.emit(MailEvent::MessageFailed {
            recipient,
            error: info.message.clone(),
            will_retry,
        });

        if will_retry {
            if let Err(e) = self.queue.requeue(self.queue_name.as_deref(), &job).await {
                // The popped envelope exists only in memory now; sideline
                // it rather than lose it.
                tracing::error!(job_id = %job.id, error = %e, "requeue failed, sidelining job");
                self.sideline(job, info).await;
            }
        } else {
            self.sideline(job, info).await;
        }
    }

    async fn sideline(&self, mut job: Job, info: FailureInfo) {
        job.attempts += 1;
        if let Err(e) = self.queue.push_failed(&job, info).await {
            tracing::error!(job_id = %job.id, error = %e, "failed to record job in failed queue");
        }
    }
}

/// Resident set size in MiB, read from procfs. `None` on platforms
/// without one; the memory ceiling is then simply not enforced.
#[cfg(target_os = "linux")]
fn memory_usage_mb() -> Option<u64> {
    // statm field 2 is the resident page count.
    let statm = std::fs::read_to_string("/proc/self/statm").ok()?;
    let resident_pages: u64 = statm.split_whitespace().nth(1)?.parse().ok()?;
    Some(resident_pages * 4096 / (1024 * 1024))
}

#[cfg(not(target_os = "linux"))]
fn memory_usage_mb() -> Option<u64> {
    None
}
