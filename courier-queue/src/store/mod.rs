//! The list-store abstraction the queue is built on.
//!
//! The queue needs very little from its store: ordered lists keyed by
//! name, an atomic left-pop, and value removal for replaying failed jobs.
//! Redis provides these natively; the in-memory implementation exists for
//! hermetic tests.

pub mod memory;
pub mod redis;

use async_trait::async_trait;

use crate::error::QueueError;

pub use memory::MemoryStore;
pub use redis::RedisStore;

/// An ordered list store with atomic pops.
#[async_trait]
pub trait Store: Send + Sync + std::fmt::Debug {
    /// Appends a value to the tail of the list.
    async fn push_back(&self, key: &str, value: String) -> Result<(), QueueError>;

    /// Atomically removes and returns the head of the list. No two callers
    /// may observe the same element.
    async fn pop_front(&self, key: &str) -> Result<Option<String>, QueueError>;

    /// The number of elements in the list.
    async fn len(&self, key: &str) -> Result<usize, QueueError>;

    /// The elements from `start` to `stop` inclusive; negative indices
    /// count from the tail, Redis-style.
    async fn range(&self, key: &str, start: isize, stop: isize)
    -> Result<Vec<String>, QueueError>;

    /// Removes the first occurrence of `value`, returning how many were
    /// removed (zero or one).
    async fn remove_value(&self, key: &str, value: &str) -> Result<usize, QueueError>;

    /// Deletes the whole list. Returns whether it existed.
    async fn delete(&self, key: &str) -> Result<bool, QueueError>;
}
