//! LISTEN/NOTIFY subscriptions.
//!
//! Publishing happens inside [`Db::enqueue`](crate::db::Db::enqueue). This
//! module is the receiving side: a [`Subscription`] holds a dedicated
//! connection, outside the claim pool, that `LISTEN`s on one channel and
//! hands each event to a [`NotificationHandler`].
//!
//! Notifications are hints. They can be missed (subscriber down, connection
//! dropped) and say nothing about whether the message is still unclaimed, so
//! a subscriber reacts by attempting a claim, never by trusting the payload.

use opentelemetry::KeyValue;
use sqlx::PgPool;
use sqlx::postgres::{PgConnectOptions, PgListener, PgPoolOptions};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::model::{Channel, MessageId};
use crate::telemetry::metrics;

/// One event received on a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    channel: String,
    payload: String,
}

impl Notification {
    pub fn new(channel: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            payload: payload.into(),
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn payload(&self) -> &str {
        &self.payload
    }

    /// The enqueued message's id, when the payload is one.
    pub fn message_id(&self) -> Option<MessageId> {
        self.payload.parse().ok()
    }
}

/// Callback side of a subscription. Runs on the listener task, so it should
/// return quickly.
pub trait NotificationHandler: Send + Sync + 'static {
    fn on_message(&self, notification: &Notification);

    /// Called once when the listener connection fails for good.
    fn on_error(&self, error: &Error) {
        warn!(%error, "notification listener stopped");
    }
}

impl<F> NotificationHandler for F
where
    F: Fn(&Notification) + Send + Sync + 'static,
{
    fn on_message(&self, notification: &Notification) {
        self(notification)
    }
}

/// Logs every notification it receives.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingNotificationHandler;

impl NotificationHandler for LoggingNotificationHandler {
    fn on_message(&self, notification: &Notification) {
        info!(
            channel = notification.channel(),
            payload = notification.payload(),
            "received notification"
        );
    }
}

/// A live `LISTEN` on one channel.
///
/// Call [`shutdown`](Self::shutdown) to stop listening and release the
/// connection. Dropping the subscription without it aborts the listener
/// task, which also closes the connection.
pub struct Subscription {
    channel: Channel,
    stop: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Subscription {
    /// `LISTEN` on `channel` and start delivering events to `handler`.
    ///
    /// The listener connects with `pool`'s options but through its own
    /// single-connection pool, so it never occupies a slot claim attempts
    /// need.
    pub async fn subscribe<H>(pool: &PgPool, channel: Channel, handler: H) -> Result<Self>
    where
        H: NotificationHandler,
    {
        let dedicated = PgPoolOptions::new()
            .max_connections(1)
            .connect_with(PgConnectOptions::clone(&pool.connect_options()))
            .await?;
        let mut listener = PgListener::connect_with(&dedicated).await?;
        listener.listen(channel.name()).await?;

        let (stop_tx, stop_rx) = oneshot::channel();
        let handle = tokio::spawn(listen_loop(listener, channel.clone(), handler, stop_rx));

        info!(channel = %channel, "subscribed");
        Ok(Self {
            channel,
            stop: Some(stop_tx),
            handle: Some(handle),
        })
    }

    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    /// Whether the listener task is still running.
    pub fn is_active(&self) -> bool {
        self.handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Stop listening and release the connection. Safe to call repeatedly.
    pub async fn shutdown(&mut self) {
        if let Some(stop) = self.stop.take() {
            // The task may already have exited on a connection error.
            let _ = stop.send(());
        }
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                warn!(channel = %self.channel, error = %e, "listener task ended abnormally");
            }
            info!(channel = %self.channel, "unsubscribed");
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

async fn listen_loop<H>(
    mut listener: PgListener,
    channel: Channel,
    handler: H,
    mut stop: oneshot::Receiver<()>,
) where
    H: NotificationHandler,
{
    loop {
        tokio::select! {
            _ = &mut stop => break,
            received = listener.recv() => match received {
                Ok(event) => {
                    metrics::notifications_received()
                        .add(1, &[KeyValue::new("channel", channel.name().to_string())]);
                    let notification = Notification::new(event.channel(), event.payload());
                    debug!(
                        channel = notification.channel(),
                        payload = notification.payload(),
                        "notification received"
                    );
                    handler.on_message(&notification);
                }
                Err(e) => {
                    handler.on_error(&Error::Persistence(e));
                    return;
                }
            }
        }
    }

    if let Err(e) = listener.unlisten_all().await {
        debug!(channel = %channel, error = %e, "unlisten failed, dropping connection anyway");
    }
}
