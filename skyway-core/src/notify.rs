use async_trait::async_trait;
use skyway_shared::NotificationTask;
use std::sync::Mutex;

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("failed to encode task: {0}")]
    Encode(String),
    #[error("failed to enqueue task: {0}")]
    Publish(String),
}

/// Hands notification work to the out-of-process worker. Only enqueues;
/// delivery happens elsewhere.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    async fn enqueue(&self, task: NotificationTask) -> Result<(), QueueError>;
}

/// Keeps every task in memory. Used by tests and local runs without a broker.
#[derive(Default)]
pub struct RecordingQueue {
    tasks: Mutex<Vec<NotificationTask>>,
}

impl RecordingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tasks(&self) -> Vec<NotificationTask> {
        self.tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl TaskQueue for RecordingQueue {
    async fn enqueue(&self, task: NotificationTask) -> Result<(), QueueError> {
        self.tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(task);
        Ok(())
    }
}
