//! Errors returned by chat actions

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("no server selected for the assistant")]
    NoContext,

    #[error("no active chat session")]
    NoActiveSession,

    #[error("chat session {0} not found")]
    SessionNotFound(String),

    #[error("message is empty")]
    EmptyMessage,

    #[error("session {0} is still generating")]
    Busy(String),

    #[error("no tool calls awaiting confirmation in session {0}")]
    NothingPending(String),

    /// Tools can only run in a terminal tab; the session has none
    #[error("no terminal tab to run tools for session {0}")]
    NoExecutionTarget(String),

    #[error("invalid chat event: {0}")]
    InvalidEvent(#[from] serde_json::Error),

    /// A backend request was rejected before any streaming started
    #[error("{operation} failed: {source:#}")]
    Dispatch {
        operation: &'static str,
        #[source]
        source: anyhow::Error,
    },
}

impl ChatError {
    pub fn dispatch(operation: &'static str, source: anyhow::Error) -> Self {
        ChatError::Dispatch { operation, source }
    }
}
