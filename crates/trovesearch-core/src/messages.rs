//! Index messages: what the daemon consumes and strategies respond to.

use std::fmt;
use std::str::FromStr;

use anyhow::bail;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    UpdateIndexcard,
    BackfillIndexcard,
    /// Reserved for identifier-usage strategies.
    IdentifierUsed,
}

impl MessageType {
    pub const ALL: [MessageType; 3] = [
        MessageType::UpdateIndexcard,
        MessageType::BackfillIndexcard,
        MessageType::IdentifierUsed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::UpdateIndexcard => "UPDATE_INDEXCARD",
            MessageType::BackfillIndexcard => "BACKFILL_INDEXCARD",
            MessageType::IdentifierUsed => "IDENTIFIER_USED",
        }
    }

    pub fn is_backfill(&self) -> bool {
        matches!(self, MessageType::BackfillIndexcard)
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match MessageType::ALL.iter().find(|t| t.as_str() == s) {
            Some(t) => Ok(*t),
            None => bail!("unknown message type: {s}"),
        }
    }
}

/// One target to (re)index or remove.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IndexMessage {
    pub message_type: MessageType,
    pub target_id: String,
}

impl IndexMessage {
    pub fn new(message_type: MessageType, target_id: impl Into<String>) -> Self {
        Self {
            message_type,
            target_id: target_id.into(),
        }
    }
}

/// Messages of one type, handled together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessagesChunk {
    pub message_type: MessageType,
    pub target_ids: Vec<String>,
}

impl MessagesChunk {
    pub fn new(message_type: MessageType, target_ids: Vec<String>) -> Self {
        Self {
            message_type,
            target_ids,
        }
    }

    pub fn as_messages(&self) -> impl Iterator<Item = IndexMessage> + '_ {
        self.target_ids
            .iter()
            .map(|id| IndexMessage::new(self.message_type, id.clone()))
    }

    /// Split into chunks of at most `size` targets.
    pub fn chunked(self, size: usize) -> Vec<MessagesChunk> {
        let size = size.max(1);
        self.target_ids
            .chunks(size)
            .map(|ids| MessagesChunk::new(self.message_type, ids.to_vec()))
            .collect()
    }
}

/// Outcome of handling one message; only done messages are acknowledged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexMessageResponse {
    pub is_done: bool,
    pub index_message: IndexMessage,
    pub status_code: u16,
    pub error_text: Option<String>,
}

impl IndexMessageResponse {
    pub fn done(index_message: IndexMessage) -> Self {
        Self {
            is_done: true,
            index_message,
            status_code: 200,
            error_text: None,
        }
    }

    pub fn failed(index_message: IndexMessage, status_code: u16, error_text: String) -> Self {
        Self {
            is_done: false,
            index_message,
            status_code,
            error_text: Some(error_text),
        }
    }
}
