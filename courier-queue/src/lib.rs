//! Durable at-least-once job queue.
//!
//! Envelopes carry their identity and attempt count across retries; the
//! backing store provides atomic pops so parallel workers never observe
//! the same job twice.

pub mod error;
pub mod job;
pub mod queue;
pub mod store;

pub use error::QueueError;
pub use job::{FailedJob, FailureInfo, Job};
pub use queue::{Queue, QueueStats};
pub use store::{MemoryStore, RedisStore, Store};
