//! In-memory store for tests and transient queues.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;

use crate::error::QueueError;
use crate::store::Store;

/// Lists in a mutex-guarded map. Pop atomicity comes directly from the
/// lock; clones share the same underlying lists.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    lists: Arc<Mutex<HashMap<String, VecDeque<String>>>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn with_lists<T>(&self, f: impl FnOnce(&mut HashMap<String, VecDeque<String>>) -> T) -> T {
        let mut lists = self
            .lists
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        f(&mut lists)
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn push_back(&self, key: &str, value: String) -> Result<(), QueueError> {
        self.with_lists(|lists| {
            lists.entry(key.to_string()).or_default().push_back(value);
        });
        Ok(())
    }

    async fn pop_front(&self, key: &str) -> Result<Option<String>, QueueError> {
        Ok(self.with_lists(|lists| lists.get_mut(key).and_then(VecDeque::pop_front)))
    }

    async fn len(&self, key: &str) -> Result<usize, QueueError> {
        Ok(self.with_lists(|lists| lists.get(key).map_or(0, VecDeque::len)))
    }

    async fn range(
        &self,
        key: &str,
        start: isize,
        stop: isize,
    ) -> Result<Vec<String>, QueueError> {
        Ok(self.with_lists(|lists| {
            let Some(list) = lists.get(key) else {
                return Vec::new();
            };
            let len = list.len() as isize;
            let resolve = |index: isize| -> isize {
                if index < 0 { len + index } else { index }
            };
            let from = resolve(start).max(0);
            let to = resolve(stop).min(len - 1);
            if from > to || len == 0 {
                return Vec::new();
            }
            #[allow(clippy::cast_sign_loss)]
            list.iter()
                .skip(from as usize)
                .take((to - from + 1) as usize)
                .cloned()
                .collect()
        }))
    }

    async fn remove_value(&self, key: &str, value: &str) -> Result<usize, QueueError> {
        Ok(self.with_lists(|lists| {
            let Some(list) = lists.get_mut(key) else {
                return 0;
            };
            list.iter()
                .position(|candidate| candidate == value)
                .map_or(0, |index| {
                    list.remove(index);
                    1
                })
        }))
    }

    async fn delete(&self, key: &str) -> Result<bool, QueueError> {
        Ok(self.with_lists(|lists| lists.remove(key).is_some()))
    }
}
