//! The durable queue.
//!
//! Active queues live at `<prefix><queue-name>`, the failed list at
//! `<prefix><failed-key>`. Envelopes are JSON. Everything here is
//! at-least-once: a crash between store operations can duplicate a job but
//! never lose one.

use std::sync::Arc;

use courier_common::Clock;
use courier_common::config::QueueConfig;

use crate::error::QueueError;
use crate::job::{FailedJob, FailureInfo, Job};
use crate::store::Store;

/// Pending and failed counts, for the CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueStats {
    pub pending: usize,
    pub failed: usize,
}

#[derive(Debug, Clone)]
pub struct Queue {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    default_queue: String,
    key_prefix: String,
    failed_key: String,
}

impl Queue {
    #[must_use]
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>, config: &QueueConfig) -> Self {
        Self {
            store,
            clock,
            default_queue: config.default_queue.clone(),
            key_prefix: config.key_prefix.clone(),
            failed_key: format!("{}{}", config.key_prefix, config.failed_jobs_key),
        }
    }

    fn active_key(&self, queue: Option<&str>) -> String {
        format!(
            "{}{}",
            self.key_prefix,
            queue.unwrap_or(&self.default_queue)
        )
    }

    /// Enqueues a fresh job and returns its id.
    pub async fn push(
        &self,
        job_class: &str,
        message_payload: String,
        queue: Option<&str>,
    ) -> Result<String, QueueError> {
        let job = Job::new(job_class, message_payload, self.clock.unix_seconds());
        let id = job.id.clone();
        self.store
            .push_back(&self.active_key(queue), serde_json::to_string(&job)?)
            .await?;
        tracing::debug!(job_id = %id, queue = queue.unwrap_or(&self.default_queue), "job enqueued");
        Ok(id)
    }

    /// Atomically takes the next job, if any. Non-blocking.
    pub async fn pop(&self, queue: Option<&str>) -> Result<Option<Job>, QueueError> {
        match self.store.pop_front(&self.active_key(queue)).await? {
            None => Ok(None),
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        }
    }

    /// Puts a failed job back on the tail of its queue for another try.
    ///
    /// Identity is preserved: same `id`, same `created_at`. The attempt
    /// counter goes up and `retried_at` is stamped. Returns the stored
    /// envelope.
    pub async fn requeue(&self, queue: Option<&str>, job: &Job) -> Result<Job, QueueError> {
        let mut retried = job.clone();
        retried.attempts += 1;
        retried.retried_at = Some(self.clock.unix_seconds());
        self.store
            .push_back(&self.active_key(queue), serde_json::to_string(&retried)?)
            .await?;
        tracing::debug!(
            job_id = %retried.id,
            attempts = retried.attempts,
            "job requeued for retry"
        );
        Ok(retried)
    }

    /// Pending jobs in the queue.
    pub async fn size(&self, queue: Option<&str>) -> Result<usize, QueueError> {
        self.store.len(&self.active_key(queue)).await
    }

    /// Drops every pending job. Returns whether anything existed.
    pub async fn clear(&self, queue: Option<&str>) -> Result<bool, QueueError> {
        self.store.delete(&self.active_key(queue)).await
    }

    /// Sidelines a job that will not be retried.
    pub async fn push_failed(&self, job: &Job, error: FailureInfo) -> Result<bool, QueueError> {
        let record = FailedJob {
            id: job.id.clone(),
            job: job.clone(),
            error,
            failed_at: self.clock.unix_seconds(),
        };
        self.store
            .push_back(&self.failed_key, serde_json::to_string(&record)?)
            .await?;
        tracing::warn!(job_id = %record.id, "job moved to failed queue");
        Ok(true)
    }

    /// The oldest failed jobs, up to `limit`. Unparseable records are
    /// skipped with a warning rather than poisoning the listing.
    pub async fn failed_jobs(&self, limit: usize) -> Result<Vec<FailedJob>, QueueError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        #[allow(clippy::cast_possible_wrap)]
        let stop = (limit as isize) - 1;
        let raw = self.store.range(&self.failed_key, 0, stop).await?;
        Ok(raw
            .iter()
            .filter_map(|entry| match serde_json::from_str(entry) {
                Ok(record) => Some(record),
                Err(e) => {
                    tracing::warn!(error = %e, "skipping malformed failed-job record");
                    None
                }
            })
            .collect())
    }

    /// How many jobs are sidelined.
    pub async fn failed_count(&self) -> Result<usize, QueueError> {
        self.store.len(&self.failed_key).await
    }

    /// Moves one failed job back onto the default active queue.
    ///
    /// The envelope is replayed verbatim. Removal happens before the push:
    /// a crash in between leaves the record in the failed list, where it
    /// can be retried again (duplicated, never lost).
    pub async fn retry_failed(&self, job_id: &str) -> Result<bool, QueueError> {
        let raw = self.store.range(&self.failed_key, 0, -1).await?;
        for entry in raw {
            let Ok(record) = serde_json::from_str::<FailedJob>(&entry) else {
                continue;
            };
            if record.id != job_id {
                continue;
            }

            if self.store.remove_value(&self.failed_key, &entry).await? == 0 {
                // Another worker replayed it concurrently.
                return Ok(false);
            }
            self.store
                .push_back(&self.active_key(None), serde_json::to_string(&record.job)?)
                .await?;
            tracing::info!(job_id = %job_id, "failed job moved back to active queue");
            return Ok(true);
        }
        Ok(false)
    }

    /// Moves every failed job back onto the default active queue,
    /// returning how many were replayed.
    pub async fn retry_all_failed(&self) -> Result<usize, QueueError> {
        let mut replayed = 0;
        loop {
            let raw = self.store.range(&self.failed_key, 0, 0).await?;
            let Some(entry) = raw.first() else {
                break;
            };
            if self.store.remove_value(&self.failed_key, entry).await? == 0 {
                continue;
            }
            match serde_json::from_str::<FailedJob>(entry) {
                Ok(record) => {
                    self.store
                        .push_back(&self.active_key(None), serde_json::to_string(&record.job)?)
                        .await?;
                    replayed += 1;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "dropping malformed failed-job record");
                }
            }
        }
        Ok(replayed)
    }

    /// Deletes the failed list. Returns whether any records were actually
    /// removed, so callers can tell "cleared" from "was already empty".
    pub async fn clear_failed(&self) -> Result<bool, QueueError> {
        self.store.delete(&self.failed_key).await
    }

    /// Counts for the default queue and the failed list.
    pub async fn stats(&self) -> Result<QueueStats, QueueError> {
        Ok(QueueStats {
            pending: self.size(None).await?,
            failed: self.failed_count().await?,
        })
    }
}
