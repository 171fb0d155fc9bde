//! Notification channel names.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Postgres truncates identifiers beyond `NAMEDATALEN - 1` bytes.
pub const MAX_CHANNEL_LEN: usize = 63;

/// Name of a LISTEN/NOTIFY stream. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Channel(String);

impl Channel {
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(Error::Validation("channel name is empty".to_string()));
        }
        if name.len() > MAX_CHANNEL_LEN {
            return Err(Error::Validation(format!(
                "channel name {name:?} is longer than {MAX_CHANNEL_LEN} bytes"
            )));
        }
        Ok(Self(name))
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Channel {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Channel::new(value)
    }
}

impl From<Channel> for String {
    fn from(channel: Channel) -> Self {
        channel.0
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
