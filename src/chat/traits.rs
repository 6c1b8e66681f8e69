//! Trait abstraction for the assistant backend

use super::types::{Message, Session, TurnRequest};
use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::broadcast;

/// Raw event envelopes of one session, as produced by the backend
pub type EventStream = broadcast::Receiver<serde_json::Value>;

/// Everything the chat layer asks of the model backend.
///
/// Generation itself is asynchronous: request methods return once the request
/// is accepted, and the output arrives on the session's [`EventStream`].
#[async_trait]
pub trait ChatBackend: Send + Sync {
    // ========================================================================
    // Sessions
    // ========================================================================

    /// Create a session and return its id
    async fn create_session(
        &self,
        server_id: &str,
        model_id: Option<&str>,
        tab_id: Option<&str>,
    ) -> Result<String>;

    async fn list_sessions(&self, server_id: &str) -> Result<Vec<Session>>;

    async fn list_messages(&self, session_id: &str) -> Result<Vec<Message>>;

    /// Generate a short title from the session's first exchange
    async fn generate_title(&self, session_id: &str, model_id: &str, channel_id: &str)
        -> Result<String>;

    async fn delete_session(&self, session_id: &str) -> Result<()>;

    async fn delete_all_sessions(&self, server_id: &str) -> Result<()>;

    // ========================================================================
    // Turns
    // ========================================================================

    async fn send_message(&self, request: &TurnRequest, content: &str) -> Result<()>;

    /// Generate the latest assistant turn again
    async fn regenerate(&self, request: &TurnRequest) -> Result<()>;

    /// Run the given tool calls and continue the turn with their results
    async fn execute_tools(&self, request: &TurnRequest, tool_call_ids: &[String]) -> Result<()>;

    /// Ask the backend to stop generating. Advisory only.
    async fn cancel_generation(&self, session_id: &str) -> Result<()>;

    // ========================================================================
    // Events
    // ========================================================================

    async fn subscribe(&self, session_id: &str) -> Result<EventStream>;
}
