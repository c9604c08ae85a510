//! The queue envelope and failed-job record.

use rand::Rng;
use serde::{Deserialize, Serialize};

/// One unit of deferred work.
///
/// `id` and `created_at` are assigned on first push and survive every
/// retry; `attempts` counts completed failed attempts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub job_class: String,
    /// The serialised message this job will deliver.
    pub message_payload: String,
    pub attempts: u32,
    pub created_at: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retried_at: Option<f64>,
}

impl Job {
    /// A fresh envelope with a newly minted id.
    #[must_use]
    pub fn new(job_class: impl Into<String>, message_payload: String, now: f64) -> Self {
        Self {
            id: generate_job_id(),
            job_class: job_class.into(),
            message_payload,
            attempts: 0,
            created_at: now,
            retried_at: None,
        }
    }
}

fn generate_job_id() -> String {
    let mut bytes = [0_u8; 8];
    rand::thread_rng().fill(&mut bytes);
    let suffix: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
    format!("job_{suffix}")
}

/// What went wrong on the final attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureInfo {
    pub message: String,
    /// A short classifier, e.g. the error variant name.
    pub kind: String,
}

impl FailureInfo {
    #[must_use]
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }
}

/// A sidelined envelope, kept for inspection and replay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedJob {
    /// Equals the originating job's id.
    pub id: String,
    pub job: Job,
    pub error: FailureInfo,
    pub failed_at: f64,
}
