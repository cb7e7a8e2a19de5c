use std::fmt;
use std::pin::Pin;

use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::errors::PipelineError;

/// One increment of generated answer text.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delta {
    pub text: String,
}

impl Delta {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

/// Nested, non-restartable sequence of deltas carried by a model answer.
/// Ends on `None`; an `Err` item terminates it.
pub type DeltaStream = Pin<Box<dyn Stream<Item = Result<Delta, PipelineError>> + Send>>;

/// Outer event sequence for one run. Ends on `None` (clean end-of-stream).
pub type EventStream = Pin<Box<dyn Stream<Item = Result<ChatEvent, PipelineError>> + Send>>;

/// Events produced by the execution pipeline for one chat request.
///
/// Only `ModelAnswer` carries a payload the bridge publishes; the remaining
/// kinds exist in the pipeline's vocabulary and are passed over.
pub enum ChatEvent {
    ModelAnswer(DeltaStream),
    ToolsAsModelAnswer { tool_name: String },
    ToolMidAnswer { tool_name: String, text: String },
    ToolsMessage { content: String },
    FuncCall { name: String, arguments: String },
    Suggest { suggestions: Vec<String> },
    Knowledge { documents: Vec<String> },
    Interrupt { reason: String },
}

/// Discriminant of [`ChatEvent`], usable where the payload is not needed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    ModelAnswer,
    ToolsAsModelAnswer,
    ToolMidAnswer,
    ToolsMessage,
    FuncCall,
    Suggest,
    Knowledge,
    Interrupt,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ModelAnswer => "chatmodel_answer",
            Self::ToolsAsModelAnswer => "tools_as_chatmodel_answer",
            Self::ToolMidAnswer => "tool_mid_answer",
            Self::ToolsMessage => "tools_message",
            Self::FuncCall => "func_call",
            Self::Suggest => "suggest",
            Self::Knowledge => "knowledge",
            Self::Interrupt => "interrupt",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ChatEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::ModelAnswer(_) => EventKind::ModelAnswer,
            Self::ToolsAsModelAnswer { .. } => EventKind::ToolsAsModelAnswer,
            Self::ToolMidAnswer { .. } => EventKind::ToolMidAnswer,
            Self::ToolsMessage { .. } => EventKind::ToolsMessage,
            Self::FuncCall { .. } => EventKind::FuncCall,
            Self::Suggest { .. } => EventKind::Suggest,
            Self::Knowledge { .. } => EventKind::Knowledge,
            Self::Interrupt { .. } => EventKind::Interrupt,
        }
    }

    /// Build a model answer from an already-known list of deltas.
    pub fn answer_from<I, S>(chunks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let deltas: Vec<Result<Delta, PipelineError>> =
            chunks.into_iter().map(|c| Ok(Delta::new(c))).collect();
        Self::ModelAnswer(Box::pin(futures::stream::iter(deltas)))
    }
}

impl fmt::Debug for ChatEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ModelAnswer(_) => f.write_str("ModelAnswer(<stream>)"),
            other => f.debug_tuple("ChatEvent").field(&other.kind()).finish(),
        }
    }
}
