//! Bulk maintenance of rate-limit state files.
//!
//! Expired entries accumulate in keys that stop being used; this sweep
//! walks a storage directory, drops stale timestamps, and deletes files
//! whose windows emptied out entirely. It needs only paths and a staleness
//! horizon, not any key's admission parameters.

use std::fs::{self, OpenOptions};
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use fs2::FileExt;

use crate::lock_path;

const DEFAULT_MAX_AGE_SECS: u64 = 3600;

/// What the sweep operates on.
#[derive(Debug, Clone)]
pub struct CleanupContext {
    /// Directory holding `ratelimit_*.json` files.
    pub dir: PathBuf,
    /// Entries older than this are stale regardless of any key's window.
    pub max_age_secs: u64,
}

impl CleanupContext {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            max_age_secs: DEFAULT_MAX_AGE_SECS,
        }
    }

    #[must_use]
    pub const fn with_max_age_secs(mut self, max_age_secs: u64) -> Self {
        self.max_age_secs = max_age_secs;
        self
    }
}

/// Outcome counters for one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    /// State files examined.
    pub processed: usize,
    /// Files rewritten with stale entries dropped.
    pub cleaned: usize,
    /// Files deleted because nothing live remained.
    pub deleted: usize,
    /// Files that could not be read, locked, or rewritten.
    pub errors: usize,
}

/// Sweeps every `ratelimit_*.json` file under the context's directory.
#[must_use]
pub fn cleanup_all(context: &CleanupContext) -> CleanupReport {
    let mut report = CleanupReport::default();

    let entries = match fs::read_dir(&context.dir) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!(dir = %context.dir.display(), error = %e, "cleanup sweep cannot read directory");
            report.errors += 1;
            return report;
        }
    };

    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64();
    let horizon = now - context.max_age_secs as f64;

    for entry in entries.flatten() {
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if !name.starts_with("ratelimit_") || !name.ends_with(".json") {
            continue;
        }

        report.processed += 1;
        match sweep_file(&path, horizon) {
            Ok(FileOutcome::Deleted) => report.deleted += 1,
            Ok(FileOutcome::Cleaned) => report.cleaned += 1,
            Ok(FileOutcome::Untouched) => {}
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "cleanup sweep failed for file");
                report.errors += 1;
            }
        }
    }

    tracing::debug!(
        processed = report.processed,
        cleaned = report.cleaned,
        deleted = report.deleted,
        errors = report.errors,
        "rate limit cleanup sweep finished"
    );
    report
}

enum FileOutcome {
    Untouched,
    Cleaned,
    Deleted,
}

fn sweep_file(path: &std::path::Path, horizon: f64) -> std::io::Result<FileOutcome> {
    // Same lock discipline as admission, so a sweep never tears a
    // concurrent read-filter-write cycle.
    let lock = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(lock_path(path))?;
    lock.lock_exclusive()?;

    let result = (|| {
        let raw = fs::read_to_string(path)?;
        let timestamps: Vec<f64> = serde_json::from_str(&raw).unwrap_or_default();
        let live: Vec<f64> = timestamps
            .iter()
            .copied()
            .filter(|&t| t > horizon)
            .collect();

        if live.is_empty() {
            fs::remove_file(path)?;
            let _ = fs::remove_file(lock_path(path));
            return Ok(FileOutcome::Deleted);
        }
        if live.len() == timestamps.len() {
            return Ok(FileOutcome::Untouched);
        }

        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_string(&live).unwrap_or_default())?;
        fs::rename(&tmp, path)?;
        Ok(FileOutcome::Cleaned)
    })();

    let _ = fs2::FileExt::unlock(&lock);
    result
}
