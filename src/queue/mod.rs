//! Dispatch queue abstraction
//!
//! Work items travel from the dispatcher to workers over an at-least-once,
//! unordered channel. The queue owns retry and dead-letter policy; workers
//! signal a failed attempt by returning an error, never by retrying
//! themselves. Because every work item carries its expected outcome path,
//! redelivery is safe: a second attempt overwrites the same key.

use crate::types::{AppError, Result, WorkItem};
use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc};

/// Producer side of the work-item channel.
#[async_trait]
pub trait DispatchQueue: Send + Sync {
    /// Hand one work item to the queue. Delivery is at least once, in no
    /// particular order.
    async fn enqueue(&self, item: WorkItem) -> Result<()>;
}

/// In-process queue over an unbounded tokio channel.
///
/// Messages cross the channel as serialized JSON, matching the wire contract
/// of an external queue, so serialization bugs surface in tests.
pub struct InMemoryQueue {
    tx: mpsc::UnboundedSender<String>,
}

/// Consumer handle paired with an [`InMemoryQueue`].
pub struct QueueReceiver {
    rx: Mutex<mpsc::UnboundedReceiver<String>>,
    redeliver_tx: mpsc::UnboundedSender<String>,
}

impl InMemoryQueue {
    /// Create a linked producer/consumer pair.
    pub fn channel() -> (Self, QueueReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        let receiver = QueueReceiver {
            rx: Mutex::new(rx),
            redeliver_tx: tx.clone(),
        };
        (Self { tx }, receiver)
    }
}

#[async_trait]
impl DispatchQueue for InMemoryQueue {
    async fn enqueue(&self, item: WorkItem) -> Result<()> {
        let body = serde_json::to_string(&item)
            .map_err(|e| AppError::Queue(format!("Failed to serialize work item: {e}")))?;
        self.tx
            .send(body)
            .map_err(|e| AppError::Queue(format!("Queue closed: {e}")))
    }
}

impl QueueReceiver {
    /// Take the next available work item without waiting, or `None` when the
    /// queue is currently empty.
    pub async fn try_recv(&self) -> Result<Option<WorkItem>> {
        match self.rx.lock().await.try_recv() {
            Ok(body) => Ok(Some(Self::decode(&body)?)),
            Err(mpsc::error::TryRecvError::Empty) => Ok(None),
            Err(mpsc::error::TryRecvError::Disconnected) => Ok(None),
        }
    }

    /// Wait for the next work item; `None` when all producers are gone.
    pub async fn recv(&self) -> Result<Option<WorkItem>> {
        match self.rx.lock().await.recv().await {
            Some(body) => Ok(Some(Self::decode(&body)?)),
            None => Ok(None),
        }
    }

    /// Put a delivered item back on the queue, modeling at-least-once
    /// redelivery after a failed attempt.
    pub fn redeliver(&self, item: &WorkItem) -> Result<()> {
        let body = serde_json::to_string(item)
            .map_err(|e| AppError::Queue(format!("Failed to serialize work item: {e}")))?;
        self.redeliver_tx
            .send(body)
            .map_err(|e| AppError::Queue(format!("Queue closed: {e}")))
    }

    fn decode(body: &str) -> Result<WorkItem> {
        serde_json::from_str(body)
            .map_err(|e| AppError::Queue(format!("Malformed work item message: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::paths::{DatePartition, OutcomePath};
    use crate::types::{ProjectConfig, ResearchPrompts};
    use chrono::Utc;

    fn work_item(topic: &str) -> WorkItem {
        let ts = Utc::now();
        let date = DatePartition::from_timestamp(&ts);
        WorkItem {
            run_id: "run".to_string(),
            timestamp: ts,
            project_name: "proj".to_string(),
            sub_topic: topic.to_string(),
            search_queries: vec![format!("{topic} best practices")],
            search_params: serde_json::Map::new(),
            expected_path: OutcomePath::expected(date, "run", "proj", topic),
            project: ProjectConfig {
                name: "proj".to_string(),
                ..Default::default()
            },
            prompts: ResearchPrompts::default(),
            config_version: "test".to_string(),
        }
    }

    #[tokio::test]
    async fn test_enqueue_and_drain() {
        let (queue, receiver) = InMemoryQueue::channel();
        queue.enqueue(work_item("topic a")).await.unwrap();
        queue.enqueue(work_item("topic b")).await.unwrap();

        let first = receiver.try_recv().await.unwrap().unwrap();
        let second = receiver.try_recv().await.unwrap().unwrap();
        assert_ne!(first.sub_topic, second.sub_topic);
        assert!(receiver.try_recv().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_redelivery_preserves_expected_path() {
        let (queue, receiver) = InMemoryQueue::channel();
        queue.enqueue(work_item("flaky topic")).await.unwrap();

        let item = receiver.try_recv().await.unwrap().unwrap();
        receiver.redeliver(&item).unwrap();

        let again = receiver.try_recv().await.unwrap().unwrap();
        assert_eq!(again.expected_path, item.expected_path);
    }
}
