// In-process queue backend for tests and the single-binary mode.

use std::collections::VecDeque;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{Queue, QueueError};

/// FIFO queue backed by an in-process deque.
pub struct MemoryQueue {
    name: String,
    /// 0 = unbounded.
    capacity: usize,
    items: Mutex<VecDeque<String>>,
}

impl MemoryQueue {
    pub fn new(name: impl Into<String>, capacity: usize) -> Self {
        Self {
            name: name.into(),
            capacity,
            items: Mutex::new(VecDeque::new()),
        }
    }
}

#[async_trait]
impl Queue for MemoryQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn put(&self, message: String) -> Result<(), QueueError> {
        let mut items = self.items.lock().await;
        if self.capacity > 0 && items.len() >= self.capacity {
            return Err(QueueError::Full {
                name: self.name.clone(),
                capacity: self.capacity,
            });
        }
        items.push_back(message);
        Ok(())
    }

    async fn pop(&self, count: usize) -> Vec<String> {
        let mut items = self.items.lock().await;
        let take = count.min(items.len());
        items.drain(..take).collect()
    }

    async fn size(&self) -> usize {
        self.items.lock().await.len()
    }

    fn capacity(&self) -> usize {
        self.capacity
    }
}

// ============================================================================
// Tests
// ============================================================================
