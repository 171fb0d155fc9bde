//! Message entity and its state machine.

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Longest queue name accepted, in bytes.
pub const MAX_QUEUE_NAME_LEN: usize = 255;

/// Fractional-second digits the store keeps for `timestamptz`.
const STORE_SUBSEC_DIGITS: u16 = 6;

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// A unit of work.
///
/// Values are immutable: a state change produces a new `Message` through
/// [`Message::with_state`]. Construction validates every field, so a
/// `Message` in hand is always well formed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawMessage")]
pub struct Message {
    id: MessageId,
    queue_name: String,
    state: MessageState,
    body: serde_json::Value,
    created_at: DateTime<Utc>,
}

impl Message {
    /// Create a fresh `Created` message on `queue_name`, stamped with the
    /// current time truncated to the store's resolution.
    pub fn new(queue_name: impl Into<String>, body: serde_json::Value) -> Result<Self> {
        Self::from_parts(
            MessageId::new(),
            queue_name,
            MessageState::Created,
            body,
            Utc::now(),
        )
    }

    /// Assemble a message from its fields, validating each one.
    ///
    /// `created_at` is truncated to microseconds here so that a value read
    /// back from the store compares equal to the one that was written.
    /// A JSON `null` body counts as a missing body and is rejected.
    pub fn from_parts(
        id: MessageId,
        queue_name: impl Into<String>,
        state: MessageState,
        body: serde_json::Value,
        created_at: DateTime<Utc>,
    ) -> Result<Self> {
        let queue_name = queue_name.into();
        validate_queue_name(&queue_name)?;
        if body.is_null() {
            return Err(Error::Validation("message.body is null".to_string()));
        }

        Ok(Self {
            id,
            queue_name,
            state,
            body,
            created_at: created_at.trunc_subsecs(STORE_SUBSEC_DIGITS),
        })
    }

    pub fn id(&self) -> MessageId {
        self.id
    }

    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    pub fn state(&self) -> MessageState {
        self.state
    }

    pub fn body(&self) -> &serde_json::Value {
        &self.body
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Produce the same message in state `to`.
    pub fn with_state(self, to: MessageState) -> Result<Self> {
        if !self.state.can_transition_to(to) {
            return Err(Error::InvalidTransition {
                from: self.state,
                to,
            });
        }
        Ok(Self { state: to, ..self })
    }
}

fn validate_queue_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(Error::Validation("message.queue_name is empty".to_string()));
    }
    if name.len() > MAX_QUEUE_NAME_LEN {
        return Err(Error::Validation(format!(
            "message.queue_name is longer than {MAX_QUEUE_NAME_LEN} bytes"
        )));
    }
    Ok(())
}

/// Unvalidated wire shape; deserialization funnels through `from_parts`.
#[derive(Deserialize)]
struct RawMessage {
    id: MessageId,
    queue_name: String,
    state: MessageState,
    body: serde_json::Value,
    created_at: DateTime<Utc>,
}

impl TryFrom<RawMessage> for Message {
    type Error = Error;

    fn try_from(raw: RawMessage) -> Result<Self> {
        Message::from_parts(raw.id, raw.queue_name, raw.state, raw.body, raw.created_at)
    }
}

// ---------------------------------------------------------------------------
// MessageId
// ---------------------------------------------------------------------------

/// Newtype for message IDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub Uuid);

impl MessageId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for MessageId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s.trim())
            .map(MessageId)
            .map_err(|e| Error::Validation(format!("invalid message id {s:?}: {e}")))
    }
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Lifecycle state of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageState {
    /// Enqueued, waiting for a worker. Failed attempts leave it here.
    Created,
    /// Executed and committed. Terminal.
    Processed,
}

impl MessageState {
    /// Can transition from self to `to`?
    pub fn can_transition_to(self, to: MessageState) -> bool {
        matches!((self, to), (MessageState::Created, MessageState::Processed))
    }

    /// Is this a terminal state?
    pub fn is_terminal(self) -> bool {
        matches!(self, MessageState::Processed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MessageState::Created => "CREATED",
            MessageState::Processed => "PROCESSED",
        }
    }
}

impl std::fmt::Display for MessageState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MessageState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "CREATED" => Ok(MessageState::Created),
            "PROCESSED" => Ok(MessageState::Processed),
            _ => Err(Error::Validation(format!("unknown message state: {s}"))),
        }
    }
}
