use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ids::MessageId;

/// Data carried by the bridge's failure message.
pub const CHAT_FAILED: &str = "chat failed";
/// Data carried by the bridge's success message.
pub const CHAT_FINISHED: &str = "finish";

/// Event name of a message on the wire. The string forms are stable.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WireType {
    #[serde(rename = "answer-delta")]
    AnswerDelta,
    #[serde(rename = "error")]
    Error,
    #[serde(rename = "finish")]
    Finish,
    #[serde(rename = "close")]
    Close,
}

impl WireType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AnswerDelta => "answer-delta",
            Self::Error => "error",
            Self::Finish => "finish",
            Self::Close => "close",
        }
    }

    /// `finish` and `error` end one request's message sequence.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Finish | Self::Error)
    }

    /// Whether a subscriber stops reading after this message.
    pub fn ends_stream(self) -> bool {
        self.is_terminal() || self == Self::Close
    }
}

impl fmt::Display for WireType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Flattened unit delivered to subscribers. `id` is unset until the
/// broadcast server stamps it on publish.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireMessage {
    #[serde(rename = "type")]
    pub kind: WireType,
    pub data: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<MessageId>,
}

impl WireMessage {
    pub fn new(kind: WireType, data: impl Into<String>) -> Self {
        Self {
            kind,
            data: data.into(),
            id: None,
        }
    }

    pub fn answer_delta(text: impl Into<String>) -> Self {
        Self::new(WireType::AnswerDelta, text)
    }

    pub fn error(reason: impl Into<String>) -> Self {
        Self::new(WireType::Error, reason)
    }

    pub fn chat_failed() -> Self {
        Self::error(CHAT_FAILED)
    }

    pub fn finish() -> Self {
        Self::new(WireType::Finish, CHAT_FINISHED)
    }

    pub fn close(reason: impl Into<String>) -> Self {
        Self::new(WireType::Close, reason)
    }

    pub fn with_id(mut self, id: MessageId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.kind.is_terminal()
    }
}
