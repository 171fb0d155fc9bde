//! Worker: waits for work, then drains the queue through the claim engine.
//!
//! Wake-ups come from a LISTEN/NOTIFY subscription when a channel is
//! configured, and from a polling timer regardless. The timer is what makes
//! missed notifications harmless. Workers share nothing but the database;
//! run as many as you like, in one process or many.

use crate::db::Db;
use crate::error::{Error, Result};
use crate::listener::{Notification, Subscription};
use crate::model::{Channel, Message};
use crate::task::Task;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Notify, watch};
use tracing::{debug, error, info};

/// Configuration for a worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Only claim from this queue. `None` claims from every queue.
    pub queue_name: Option<String>,
    /// Channel to LISTEN on for wake-ups.
    pub channel: Option<Channel>,
    /// Poll interval fallback when no NOTIFY arrives.
    pub poll_interval: Duration,
    /// Upper bound on one attempt. Elapsing drops the attempt, which rolls
    /// back its transaction.
    pub task_timeout: Option<Duration>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            queue_name: None,
            channel: None,
            poll_interval: Duration::from_secs(5),
            task_timeout: None,
        }
    }
}

/// A claim loop bound to one task.
pub struct Worker<T: ?Sized> {
    db: Arc<Db>,
    task: Arc<T>,
    config: WorkerConfig,
    shutdown_tx: Arc<watch::Sender<bool>>,
    shutdown_rx: watch::Receiver<bool>,
    processed: Arc<AtomicU64>,
}

impl<T: ?Sized> Clone for Worker<T> {
    fn clone(&self) -> Self {
        Self {
            db: Arc::clone(&self.db),
            task: Arc::clone(&self.task),
            config: self.config.clone(),
            shutdown_tx: Arc::clone(&self.shutdown_tx),
            shutdown_rx: self.shutdown_rx.clone(),
            processed: Arc::clone(&self.processed),
        }
    }
}

impl<T> Worker<T>
where
    T: Task + ?Sized + 'static,
{
    pub fn new(db: Arc<Db>, task: Arc<T>, config: WorkerConfig) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            db,
            task,
            config,
            shutdown_tx: Arc::new(shutdown_tx),
            shutdown_rx,
            processed: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn task(&self) -> &Arc<T> {
        &self.task
    }

    /// Messages this worker (and its clones) committed as processed.
    pub fn processed_count(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    /// Signal the worker, and every running clone, to stop after the
    /// attempt in flight.
    pub fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
    }

    fn is_stopping(&self) -> bool {
        *self.shutdown_rx.borrow()
    }

    /// Run until [`shutdown`](Self::shutdown).
    ///
    /// Only subscription setup can fail; attempt failures are logged and the
    /// loop carries on, since a failed attempt leaves its message claimable.
    pub async fn run(&self) -> Result<()> {
        let mut stop = self.shutdown_rx.clone();
        let wake = Arc::new(Notify::new());

        let mut subscription = match &self.config.channel {
            Some(channel) => {
                let wake = Arc::clone(&wake);
                let handler = move |_: &Notification| wake.notify_one();
                Some(Subscription::subscribe(self.db.pool(), channel.clone(), handler).await?)
            }
            None => None,
        };

        info!(
            queue = self.config.queue_name.as_deref().unwrap_or("*"),
            channel = self.config.channel.as_ref().map(Channel::name),
            "worker started"
        );

        // Anything enqueued before the LISTEN was issued produced no wake-up.
        self.drain().await;

        while !self.is_stopping() {
            let notified = tokio::select! {
                _ = stop.changed() => continue,
                _ = wake.notified() => true,
                _ = tokio::time::sleep(self.config.poll_interval) => false,
            };
            debug!(notified, "worker woke");
            self.drain().await;
        }

        if let Some(subscription) = subscription.as_mut() {
            subscription.shutdown().await;
        }
        info!(processed = self.processed_count(), "worker stopped");
        Ok(())
    }

    /// Claim until the queue reports empty, an attempt fails, or shutdown.
    async fn drain(&self) {
        while !self.is_stopping() {
            match self.run_once().await {
                Ok(Some(_)) => continue,
                Ok(None) => break,
                Err(e) => {
                    // Retrying now would claim the same oldest message again.
                    error!(error = %e, "claim attempt failed");
                    break;
                }
            }
        }
    }

    /// One claim/execute/commit attempt under the configured timeout.
    pub async fn run_once(&self) -> Result<Option<Message>> {
        let attempt = async {
            match &self.config.queue_name {
                Some(queue) => {
                    self.db
                        .process_oldest_task_in(queue, self.task.as_ref())
                        .await
                }
                None => self.db.process_oldest_task(self.task.as_ref()).await,
            }
        };

        let outcome = match self.config.task_timeout {
            Some(limit) => tokio::time::timeout(limit, attempt)
                .await
                .map_err(|_| Error::Timeout(limit))?,
            None => attempt.await,
        };

        if let Ok(Some(message)) = &outcome {
            self.processed.fetch_add(1, Ordering::Relaxed);
            debug!(message_id = %message.id(), "worker processed message");
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::RecordingTask;
    use sqlx::postgres::PgPoolOptions;

    /// A pool whose every acquire fails fast, so drains end immediately.
    fn unreachable_db() -> Arc<Db> {
        let pool = PgPoolOptions::new()
            .acquire_timeout(Duration::from_millis(200))
            .connect_lazy("postgres://claimq@127.0.0.1:1/claimq")
            .unwrap();
        Arc::new(Db::from_pool(pool))
    }

    fn idle_worker() -> Worker<RecordingTask> {
        Worker::new(
            unreachable_db(),
            Arc::new(RecordingTask::new()),
            WorkerConfig {
                poll_interval: Duration::from_secs(30),
                ..WorkerConfig::default()
            },
        )
    }

    #[test]
    fn default_config_polls_every_queue() {
        let config = WorkerConfig::default();
        assert!(config.queue_name.is_none());
        assert!(config.channel.is_none());
        assert!(config.task_timeout.is_none());
        assert_eq!(config.poll_interval, Duration::from_secs(5));
    }

    #[tokio::test]
    async fn shutdown_stops_every_running_clone() {
        let worker = idle_worker();
        let first = {
            let worker = worker.clone();
            tokio::spawn(async move { worker.run().await })
        };
        let second = {
            let worker = worker.clone();
            tokio::spawn(async move { worker.run().await })
        };

        // Both clones are parked on the 30s poll timer by now.
        tokio::time::sleep(Duration::from_millis(500)).await;
        worker.shutdown();

        let both = async {
            first.await.unwrap().unwrap();
            second.await.unwrap().unwrap();
        };
        tokio::time::timeout(Duration::from_secs(3), both)
            .await
            .expect("every clone should stop promptly after shutdown");
    }

    #[tokio::test]
    async fn shutdown_before_run_returns_at_once() {
        let worker = idle_worker();
        worker.shutdown();

        tokio::time::timeout(Duration::from_secs(3), worker.run())
            .await
            .expect("run should not wait for the poll timer")
            .unwrap();
        assert_eq!(worker.processed_count(), 0);
    }
}
