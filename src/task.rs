//! Caller-supplied work executed against a claimed message.
//!
//! A task never owns the message lifecycle: the claim engine decides whether
//! the message becomes `PROCESSED` based on the task's result. Any state a
//! task keeps about what it ran lives on the task value itself.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use crate::model::{Message, MessageState};

/// Error type returned by tasks. Opaque to the engine.
pub type TaskError = Box<dyn std::error::Error + Send + Sync>;

/// Behavior run once per claimed message.
#[async_trait]
pub trait Task: Send + Sync {
    /// Execute against `message`, which is still `CREATED` and row-locked.
    ///
    /// Returning `Err` rolls the whole attempt back.
    async fn execute(&self, message: &Message) -> Result<(), TaskError>;

    /// The last message this task executed, if it keeps track.
    fn last_processed(&self) -> Option<Message> {
        None
    }
}

#[async_trait]
impl<T: Task + ?Sized> Task for std::sync::Arc<T> {
    async fn execute(&self, message: &Message) -> Result<(), TaskError> {
        (**self).execute(message).await
    }

    fn last_processed(&self) -> Option<Message> {
        (**self).last_processed()
    }
}

fn ensure_created(message: &Message) -> Result<(), TaskError> {
    if message.state() != MessageState::Created {
        return Err(format!(
            "error processing message {}: illegal state {}",
            message.id(),
            message.state()
        )
        .into());
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// RecordingTask
// ---------------------------------------------------------------------------

/// Accepts only `CREATED` messages and remembers the last one it ran.
#[derive(Debug, Default)]
pub struct RecordingTask {
    last: Mutex<Option<Message>>,
}

impl RecordingTask {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Task for RecordingTask {
    async fn execute(&self, message: &Message) -> Result<(), TaskError> {
        ensure_created(message)?;
        let mut last = self
            .last
            .lock()
            .map_err(|_| TaskError::from("recording task lock poisoned"))?;
        *last = Some(message.clone());
        Ok(())
    }

    fn last_processed(&self) -> Option<Message> {
        self.last.lock().ok().and_then(|last| last.clone())
    }
}

// ---------------------------------------------------------------------------
// DelayedTask
// ---------------------------------------------------------------------------

/// Sleeps for a fixed delay, then runs the inner task.
#[derive(Debug)]
pub struct DelayedTask<T> {
    delay: Duration,
    inner: T,
}

impl<T: Task> DelayedTask<T> {
    pub fn new(delay: Duration, inner: T) -> Self {
        Self { delay, inner }
    }
}

#[async_trait]
impl<T: Task> Task for DelayedTask<T> {
    async fn execute(&self, message: &Message) -> Result<(), TaskError> {
        tokio::time::sleep(self.delay).await;
        self.inner.execute(message).await
    }

    fn last_processed(&self) -> Option<Message> {
        self.inner.last_processed()
    }
}

// ---------------------------------------------------------------------------
// FailingTask
// ---------------------------------------------------------------------------

/// Always fails.
#[derive(Debug, Clone)]
pub struct FailingTask {
    reason: String,
}

impl FailingTask {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl Task for FailingTask {
    async fn execute(&self, _message: &Message) -> Result<(), TaskError> {
        Err(self.reason.clone().into())
    }
}

// ---------------------------------------------------------------------------
// LoggingTask
// ---------------------------------------------------------------------------

/// Logs each message body and succeeds.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingTask;

#[async_trait]
impl Task for LoggingTask {
    async fn execute(&self, message: &Message) -> Result<(), TaskError> {
        info!(
            message_id = %message.id(),
            queue = message.queue_name(),
            body = %message.body(),
            "executing message"
        );
        Ok(())
    }
}
