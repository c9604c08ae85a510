//! Sliding-window admission control, one JSON file per key.
//!
//! Each key's state is an ordered array of sub-second timestamps on disk.
//! `allow` holds an exclusive lock on a sidecar file across its whole
//! read-filter-write cycle, which is what makes the window bound hold
//! under concurrent writers (including other processes). Reads that only
//! produce hints (`remaining`, `reset_time`) skip the lock.

pub mod cleanup;

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use fs2::FileExt;
use thiserror::Error;

use courier_common::Clock;
use courier_common::config::RateLimiterConfig;

pub use cleanup::{CleanupContext, CleanupReport, cleanup_all};

#[derive(Debug, Error)]
pub enum RateLimitError {
    /// The storage directory could not be created. Fatal at construction.
    #[error("rate limiter storage unavailable at {path}: {source}")]
    Storage {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// A point-in-time snapshot of one key's window.
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimiterStats {
    pub key: String,
    pub limit: usize,
    pub window_secs: u64,
    pub used: usize,
    pub remaining: usize,
    pub reset_secs: u64,
}

#[derive(Debug, Clone)]
pub struct RateLimiter {
    key: String,
    limit: usize,
    window_secs: u64,
    file: PathBuf,
    lock_file: PathBuf,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    /// Builds a limiter, creating the storage directory.
    ///
    /// # Errors
    ///
    /// Returns [`RateLimitError::Storage`] when the directory cannot be
    /// created; a limiter without storage would silently admit everything.
    pub fn new(config: &RateLimiterConfig, clock: Arc<dyn Clock>) -> Result<Self, RateLimitError> {
        let dir = PathBuf::from(&config.storage_path);
        fs::create_dir_all(&dir).map_err(|source| RateLimitError::Storage {
            path: dir.clone(),
            source,
        })?;

        let file = dir.join(state_file_name(&config.key));
        let lock_file = lock_path(&file);
        Ok(Self {
            key: config.key.clone(),
            limit: config.limit,
            window_secs: config.seconds,
            file,
            lock_file,
            clock,
        })
    }

    /// Tries to take one slot in the window.
    ///
    /// Returns `true` and records the timestamp when a slot is free,
    /// `false` otherwise. Failure to acquire the lock refuses
    /// conservatively rather than over-admitting.
    #[must_use]
    pub fn allow(&self) -> bool {
        let Some(_guard) = self.lock() else {
            tracing::warn!(key = %self.key, "rate limit lock unavailable, refusing");
            return false;
        };

        let now = self.clock.unix_seconds();
        let mut timestamps = self.load();
        timestamps.retain(|&t| t > now - self.window_secs_f64());

        let admitted = timestamps.len() < self.limit;
        if admitted {
            timestamps.push(now);
        }
        if let Err(e) = self.persist(&timestamps) {
            tracing::warn!(key = %self.key, error = %e, "failed to persist rate limit state");
            return false;
        }
        admitted
    }

    /// Free slots right now. Unlocked read, so a racing writer can make
    /// this stale; it is a hint.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.limit.saturating_sub(self.live_timestamps().len())
    }

    /// Seconds until at least one slot frees up; zero when one is free
    /// already. Also a hint.
    #[must_use]
    pub fn reset_time(&self) -> u64 {
        let live = self.live_timestamps();
        if live.len() < self.limit {
            return 0;
        }
        let now = self.clock.unix_seconds();
        let oldest = live.iter().copied().fold(f64::INFINITY, f64::min);
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        {
            (oldest + self.window_secs_f64() - now).ceil().max(0.0) as u64
        }
    }

    /// Discards all recorded timestamps. Returns whether state existed.
    #[must_use]
    pub fn reset(&self) -> bool {
        let Some(_guard) = self.lock() else {
            return false;
        };
        fs::remove_file(&self.file).is_ok()
    }

    /// Drops expired entries without admitting anything. Returns `false`
    /// when the lock or the write failed.
    #[must_use]
    pub fn cleanup(&self) -> bool {
        let Some(_guard) = self.lock() else {
            return false;
        };
        let now = self.clock.unix_seconds();
        let mut timestamps = self.load();
        timestamps.retain(|&t| t > now - self.window_secs_f64());
        self.persist(&timestamps).is_ok()
    }

    /// A snapshot of the window, for operators.
    #[must_use]
    pub fn stats(&self) -> RateLimiterStats {
        let used = self.live_timestamps().len();
        RateLimiterStats {
            key: self.key.clone(),
            limit: self.limit,
            window_secs: self.window_secs,
            used,
            remaining: self.limit.saturating_sub(used),
            reset_secs: self.reset_time(),
        }
    }

    fn window_secs_f64(&self) -> f64 {
        self.window_secs as f64
    }

    fn live_timestamps(&self) -> Vec<f64> {
        let now = self.clock.unix_seconds();
        let mut timestamps = self.load();
        timestamps.retain(|&t| t > now - self.window_secs_f64());
        timestamps
    }

    /// Reads the state file. Missing or malformed state is an empty
    /// window; refusing service over a corrupt file would be worse than
    /// briefly over-admitting.
    fn load(&self) -> Vec<f64> {
        match fs::read_to_string(&self.file) {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_default(),
            Err(_) => Vec::new(),
        }
    }

    /// Writes the state via a temp file and rename, so a crash mid-write
    /// leaves either the old state or the new one, never a torn file.
    fn persist(&self, timestamps: &[f64]) -> std::io::Result<()> {
        let tmp = self.file.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_string(timestamps).unwrap_or_default())?;
        fs::rename(&tmp, &self.file)
    }

    /// Acquires the exclusive sidecar lock. The lock is released when the
    /// returned guard drops, on every exit path.
    fn lock(&self) -> Option<LockGuard> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&self.lock_file)
            .ok()?;
        file.lock_exclusive().ok()?;
        Some(LockGuard { file })
    }
}

struct LockGuard {
    file: File,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self.file);
    }
}

pub(crate) fn state_file_name(key: &str) -> String {
    let safe: String = key
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    format!("ratelimit_{safe}.json")
}

pub(crate) fn lock_path(state_file: &Path) -> PathBuf {
    let mut os = state_file.as_os_str().to_owned();
    os.push(".lock");
    PathBuf::from(os)
}
