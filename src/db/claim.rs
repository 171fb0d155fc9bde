//! Claim/execute/commit: the only write path to `message.state`.
//!
//! One attempt is one transaction:
//!
//! 1. `SELECT ... FOR UPDATE SKIP LOCKED` picks the oldest `CREATED` row that
//!    no other transaction holds. Rows locked by concurrent workers are
//!    skipped, never waited on.
//! 2. The caller's [`Task`] runs while the row lock is held.
//! 3. The row is flipped to `PROCESSED` and the transaction commits.
//!
//! Any failure after the row is locked rolls the transaction back, which
//! releases the lock with the row still `CREATED`, so another attempt can pick
//! it up. Dropping an attempt's future part-way (a timeout, a cancelled task)
//! drops the open `sqlx::Transaction`, which also rolls back.
//!
//! The lock, and the pooled connection under it, are held for the whole task.
//! A slow task therefore caps throughput: at most `max_connections` tasks run
//! at once per pool, and a message's latency includes its task's latency.

use std::time::Instant;

use opentelemetry::KeyValue;
use sqlx::{Postgres, Transaction};
use tracing::{Instrument, debug, info, warn};

use super::message::{MESSAGE_COLUMNS, MessageRow};
use crate::error::{Error, Result};
use crate::model::{Message, MessageState};
use crate::task::Task;
use crate::telemetry::claim::{record_claimed, record_state_transition, start_claim_span};
use crate::telemetry::metrics;

fn claim_query(scoped: bool) -> String {
    let queue_filter = if scoped { "AND queue_name = $1" } else { "" };
    format!(
        "SELECT {MESSAGE_COLUMNS} FROM message
         WHERE state = 'CREATED' {queue_filter}
         ORDER BY created_at ASC
         LIMIT 1
         FOR UPDATE SKIP LOCKED"
    )
}

impl super::Db {
    /// Claim the oldest unclaimed message on any queue and run `task` on it.
    ///
    /// Returns `Ok(None)` when nothing is eligible, and the `PROCESSED`
    /// message once the attempt has committed. Task failures come back as
    /// [`Error::Task`] after the attempt has been rolled back.
    pub async fn process_oldest_task<T>(&self, task: &T) -> Result<Option<Message>>
    where
        T: Task + ?Sized,
    {
        self.claim_and_execute(None, task).await
    }

    /// Like [`process_oldest_task`](Self::process_oldest_task), limited to
    /// messages on `queue`.
    pub async fn process_oldest_task_in<T>(&self, queue: &str, task: &T) -> Result<Option<Message>>
    where
        T: Task + ?Sized,
    {
        self.claim_and_execute(Some(queue), task).await
    }

    async fn claim_and_execute<T>(&self, queue: Option<&str>, task: &T) -> Result<Option<Message>>
    where
        T: Task + ?Sized,
    {
        let span = start_claim_span(queue.unwrap_or("*"));

        let outcome = self
            .attempt(queue, task)
            .instrument(span.clone())
            .await;

        let result = match &outcome {
            Ok(Some(_)) => "processed",
            Ok(None) => "empty",
            Err(Error::Task { .. }) => "task_failed",
            Err(_) => "error",
        };
        metrics::claim_attempts().add(
            1,
            &[
                KeyValue::new("queue", queue.unwrap_or("*").to_string()),
                KeyValue::new("result", result),
            ],
        );

        if let Ok(Some(processed)) = &outcome {
            record_state_transition(
                &span,
                MessageState::Created.as_str(),
                processed.state().as_str(),
            );
        }

        outcome
    }

    async fn attempt<T>(&self, queue: Option<&str>, task: &T) -> Result<Option<Message>>
    where
        T: Task + ?Sized,
    {
        let mut tx = self.pool.begin().await?;

        let sql = claim_query(queue.is_some());
        let mut query = sqlx::query_as::<_, MessageRow>(&sql);
        if let Some(queue) = queue {
            query = query.bind(queue);
        }
        let row = query.fetch_optional(&mut *tx).await?;

        let Some(row) = row else {
            tx.rollback().await?;
            debug!("cancel attempt, queue is empty");
            return Ok(None);
        };

        match execute_claimed(&mut tx, row, task).await {
            Ok(processed) => {
                tx.commit().await?;
                Ok(Some(processed))
            }
            Err(cause) => {
                warn!(error = %cause, "attempt failed, rolling back");
                match tx.rollback().await {
                    Ok(()) => Err(cause),
                    Err(source) => Err(Error::RollbackFailed {
                        source,
                        cause: Box::new(cause),
                    }),
                }
            }
        }
    }
}

/// Run `task` against the locked row and mark it processed, inside `tx`.
async fn execute_claimed<T>(
    tx: &mut Transaction<'_, Postgres>,
    row: MessageRow,
    task: &T,
) -> Result<Message>
where
    T: Task + ?Sized,
{
    let message = row.try_into_message()?;
    record_claimed(&tracing::Span::current(), &message);
    info!(message_id = %message.id(), state = %message.state(), "start executing message");

    let started = Instant::now();
    let executed = task.execute(&message).await;
    metrics::task_duration_ms().record(
        started.elapsed().as_secs_f64() * 1_000.0,
        &[
            KeyValue::new("queue", message.queue_name().to_string()),
            KeyValue::new("success", executed.is_ok()),
        ],
    );
    executed.map_err(|source| Error::Task {
        id: message.id(),
        source,
    })?;

    let rows = sqlx::query("UPDATE message SET state = $1 WHERE id = $2 AND state = $3")
        .bind(MessageState::Processed.as_str())
        .bind(message.id().0)
        .bind(MessageState::Created.as_str())
        .execute(&mut **tx)
        .await?
        .rows_affected();

    if rows != 1 {
        return Err(Error::ConsistencyViolation {
            id: message.id(),
            rows,
        });
    }

    let processed = message.with_state(MessageState::Processed)?;
    info!(message_id = %processed.id(), state = %processed.state(), "finish executing message");
    Ok(processed)
}
