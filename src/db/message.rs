//! Message store: enqueue with optional notification, read-back, diagnostics.

use crate::error::{Error, Result};
use crate::model::{Channel, Message, MessageId, MessageState};
use crate::telemetry::metrics;
use opentelemetry::KeyValue;
use tracing::{debug, instrument};
use uuid::Uuid;

/// Column list shared by every query that materializes a `Message`.
pub(crate) const MESSAGE_COLUMNS: &str = "id, queue_name, state, body, created_at";

impl super::Db {
    /// Insert `message`, and publish its id on `channel` if one is given.
    ///
    /// Insert and publish share one transaction: Postgres delivers the
    /// notification only on commit, so listeners never hear about a row that
    /// was rolled back. A duplicate id or an unreachable store is returned as
    /// [`Error::Persistence`].
    #[instrument(skip_all, err, fields(message_id = %message.id(), queue = message.queue_name()))]
    pub async fn enqueue(&self, message: &Message, channel: Option<&Channel>) -> Result<()> {
        let result = self.insert_and_notify(message, channel).await;

        metrics::messages_enqueued().add(
            1,
            &[
                KeyValue::new("queue", message.queue_name().to_string()),
                KeyValue::new("result", if result.is_ok() { "ok" } else { "error" }),
            ],
        );

        result
    }

    async fn insert_and_notify(&self, message: &Message, channel: Option<&Channel>) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO message (id, queue_name, state, body, created_at)
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(message.id().0)
        .bind(message.queue_name())
        .bind(message.state().as_str())
        .bind(message.body())
        .bind(message.created_at())
        .execute(&mut *tx)
        .await?;

        if let Some(channel) = channel {
            sqlx::query("SELECT pg_notify($1, $2)")
                .bind(channel.name())
                .bind(message.id().to_string())
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;

        debug!(
            channel = channel.map(Channel::name),
            "message enqueued"
        );
        Ok(())
    }

    /// Newest message of `queue`, whatever its state. Takes no locks.
    pub async fn peek_last(&self, queue: &str) -> Result<Option<Message>> {
        let row: Option<MessageRow> = sqlx::query_as(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM message
             WHERE queue_name = $1
             ORDER BY created_at DESC
             LIMIT 1"
        ))
        .bind(queue)
        .fetch_optional(&self.pool)
        .await?;

        row.map(MessageRow::try_into_message).transpose()
    }

    /// Get a message by ID.
    pub async fn get_message(&self, id: MessageId) -> Result<Message> {
        let row: Option<MessageRow> = sqlx::query_as(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM message WHERE id = $1"
        ))
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.ok_or_else(|| Error::NotFound(format!("message {id}")))?
            .try_into_message()
    }

    /// Number of messages in `queue` currently in `state`.
    pub async fn count_by_state(&self, queue: &str, state: MessageState) -> Result<i64> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM message WHERE queue_name = $1 AND state = $2")
                .bind(queue)
                .bind(state.as_str())
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }
}

/// Internal row type for sqlx::FromRow.
#[derive(sqlx::FromRow)]
pub(crate) struct MessageRow {
    id: Uuid,
    queue_name: String,
    state: String,
    body: serde_json::Value,
    created_at: chrono::DateTime<chrono::Utc>,
}

impl MessageRow {
    pub(crate) fn try_into_message(self) -> Result<Message> {
        Message::from_parts(
            MessageId(self.id),
            self.queue_name,
            self.state.parse()?,
            self.body,
            self.created_at,
        )
    }
}
