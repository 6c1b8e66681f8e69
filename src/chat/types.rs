//! Chat types: sessions, messages, tool calls and the backend event union

use super::error::ChatError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Title given to every session until a generated title replaces it
pub const DEFAULT_SESSION_TITLE: &str = "New Chat";

// ============================================================================
// Sessions
// ============================================================================

/// One logical conversation, scoped to a server and optionally pinned to a tab
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub server_id: String,
    /// Terminal tab the session is pinned to. Unbound sessions are server-scoped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bound_tab_id: Option<String>,
    pub title: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_id: Option<String>,
}

impl Session {
    pub fn new(
        id: impl Into<String>,
        server_id: impl Into<String>,
        bound_tab_id: Option<String>,
    ) -> Self {
        Self {
            id: id.into(),
            server_id: server_id.into(),
            bound_tab_id,
            title: DEFAULT_SESSION_TITLE.to_string(),
            created_at: Utc::now(),
            model_id: None,
        }
    }

    pub fn with_model(mut self, model_id: impl Into<String>) -> Self {
        self.model_id = Some(model_id.into());
        self
    }

    /// Whether the session may be shown in `tab_id`: pinned to it, or not pinned at all
    pub fn is_visible_in_tab(&self, tab_id: &str) -> bool {
        self.bound_tab_id.as_deref().map_or(true, |bound| bound == tab_id)
    }
}

/// Where the user currently is: a server, and the terminal tab if one is focused
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChatContext {
    pub server_id: String,
    #[serde(default)]
    pub tab_id: Option<String>,
}

impl ChatContext {
    pub fn server(server_id: impl Into<String>) -> Self {
        Self {
            server_id: server_id.into(),
            tab_id: None,
        }
    }

    pub fn tab(server_id: impl Into<String>, tab_id: impl Into<String>) -> Self {
        Self {
            server_id: server_id.into(),
            tab_id: Some(tab_id.into()),
        }
    }
}

// ============================================================================
// Messages
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// One entry of a session's message log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_id: Option<String>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl Message {
    fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            reasoning_content: None,
            tool_calls: None,
            model_id: None,
            created_at: Utc::now(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    /// Empty assistant message that streamed deltas will fill
    pub fn placeholder(model_id: Option<String>) -> Self {
        Self {
            model_id,
            ..Self::assistant("")
        }
    }

    pub fn with_tool_calls(mut self, calls: Vec<ToolCall>) -> Self {
        self.tool_calls = Some(calls);
        self
    }

    pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning_content = Some(reasoning.into());
        self
    }

    pub fn is_assistant(&self) -> bool {
        self.role == Role::Assistant
    }

    pub fn is_user(&self) -> bool {
        self.role == Role::User
    }

    /// Tool calls attached to this message (empty slice when none)
    pub fn tool_calls(&self) -> &[ToolCall] {
        self.tool_calls.as_deref().unwrap_or_default()
    }

    /// An assistant message that nothing has been streamed into yet
    pub fn is_placeholder(&self) -> bool {
        self.is_assistant()
            && self.content.is_empty()
            && self.reasoning_content.as_deref().map_or(true, str::is_empty)
            && self.tool_calls().is_empty()
    }
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

// ============================================================================
// Tool calls
// ============================================================================

/// A structured request from the model to invoke a tool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type", default = "default_tool_type")]
    pub tool_type: String,
    pub function: FunctionCall,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionCall {
    #[serde(default)]
    pub name: String,
    /// Serialized JSON arguments, opaque to the orchestration layer
    #[serde(default)]
    pub arguments: String,
}

fn default_tool_type() -> String {
    "function".to_string()
}

impl ToolCall {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            tool_type: default_tool_type(),
            function: FunctionCall {
                name: name.into(),
                arguments: arguments.into(),
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.function.name
    }
}

/// Merge streamed tool-call fragments into whole calls.
///
/// Nameless fragments carry argument continuations for the preceding named
/// call. Nameless fragments without arguments are dropped, as are leading
/// continuations with no call to attach to.
pub fn normalize_tool_calls(calls: Vec<ToolCall>) -> Vec<ToolCall> {
    let mut normalized: Vec<ToolCall> = Vec::with_capacity(calls.len());
    for call in calls {
        if !call.function.name.is_empty() {
            normalized.push(call);
            continue;
        }
        if call.function.arguments.is_empty() {
            continue;
        }
        match normalized.last_mut() {
            Some(previous) => previous.function.arguments.push_str(&call.function.arguments),
            None => tracing::debug!(id = %call.id, "Dropping orphan tool-call fragment"),
        }
    }
    normalized
}

// ============================================================================
// Request profile
// ============================================================================

/// Assistant mode forwarded with every turn request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatMode {
    Chat,
    Ask,
    #[default]
    Agent,
}

impl ChatMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatMode::Chat => "chat",
            ChatMode::Ask => "ask",
            ChatMode::Agent => "agent",
        }
    }
}

impl std::str::FromStr for ChatMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "chat" => Ok(ChatMode::Chat),
            "ask" => Ok(ChatMode::Ask),
            "agent" => Ok(ChatMode::Agent),
            other => Err(format!("unknown chat mode: {other}")),
        }
    }
}

/// Model, channel and mode the user has selected for new turns
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestProfile {
    pub model_id: String,
    pub channel_id: String,
    #[serde(default)]
    pub mode: ChatMode,
}

/// Everything the backend needs to start or continue a turn
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TurnRequest {
    pub session_id: String,
    pub model_id: String,
    pub channel_id: String,
    pub mode: ChatMode,
    pub bound_tab_id: Option<String>,
}

// ============================================================================
// Backend events
// ============================================================================

/// Events streamed by the backend for one session.
///
/// Payloads arrive as JSON envelopes and are validated with [`ChatEvent::decode`]
/// before they reach any state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatEvent {
    /// The backend started an assistant turn
    TurnStarted {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        model_id: Option<String>,
    },
    ResponseDelta { text: String },
    ReasoningDelta { text: String },
    /// The reasoning block of the current turn is complete
    ReasoningEnd,
    /// The model proposes a batch of tool calls for the current turn
    ToolCalls { calls: Vec<ToolCall> },
    /// Whole messages delivered at once
    MessageBatch { messages: Vec<Message> },
    Error { message: String },
    Done,
}

impl ChatEvent {
    /// Validate a raw envelope into a typed event
    pub fn decode(value: serde_json::Value) -> Result<Self, ChatError> {
        Ok(serde_json::from_value(value)?)
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            ChatEvent::TurnStarted { .. } => "turn_started",
            ChatEvent::ResponseDelta { .. } => "response_delta",
            ChatEvent::ReasoningDelta { .. } => "reasoning_delta",
            ChatEvent::ReasoningEnd => "reasoning_end",
            ChatEvent::ToolCalls { .. } => "tool_calls",
            ChatEvent::MessageBatch { .. } => "message_batch",
            ChatEvent::Error { .. } => "error",
            ChatEvent::Done => "done",
        }
    }
}

// ============================================================================
// Snapshots
// ============================================================================

/// Read-only view of one session's derived state
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct SessionSnapshot {
    pub session_id: String,
    pub generating: bool,
    pub stopped: bool,
    pub pending_tool_calls: Option<Vec<ToolCall>>,
    /// The pending batch needs explicit confirmation (no countdown)
    pub sensitive: bool,
    /// Remaining countdown ticks before the pending batch auto-executes
    pub countdown: Option<u32>,
    pub message_count: usize,
}
