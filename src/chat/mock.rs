//! In-memory mock implementation of ChatBackend for testing and replay.

use super::traits::{ChatBackend, EventStream};
use super::types::{ChatEvent, Message, Session, TurnRequest};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use tokio::sync::{broadcast, RwLock};

/// Capacity of each session's event channel
const CHANNEL_CAPACITY: usize = 256;

/// Backend operations, used to inject failures and count calls
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendOp {
    CreateSession,
    ListSessions,
    ListMessages,
    GenerateTitle,
    DeleteSession,
    DeleteAllSessions,
    SendMessage,
    Regenerate,
    ExecuteTools,
    CancelGeneration,
    Subscribe,
}

/// A recorded backend call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendCall {
    CreateSession {
        server_id: String,
        model_id: Option<String>,
        tab_id: Option<String>,
    },
    ListSessions { server_id: String },
    ListMessages { session_id: String },
    GenerateTitle { session_id: String },
    DeleteSession { session_id: String },
    DeleteAllSessions { server_id: String },
    SendMessage { request: TurnRequest, content: String },
    Regenerate { request: TurnRequest },
    ExecuteTools {
        request: TurnRequest,
        tool_call_ids: Vec<String>,
    },
    CancelGeneration { session_id: String },
    Subscribe { session_id: String },
}

impl BackendCall {
    pub fn op(&self) -> BackendOp {
        match self {
            BackendCall::CreateSession { .. } => BackendOp::CreateSession,
            BackendCall::ListSessions { .. } => BackendOp::ListSessions,
            BackendCall::ListMessages { .. } => BackendOp::ListMessages,
            BackendCall::GenerateTitle { .. } => BackendOp::GenerateTitle,
            BackendCall::DeleteSession { .. } => BackendOp::DeleteSession,
            BackendCall::DeleteAllSessions { .. } => BackendOp::DeleteAllSessions,
            BackendCall::SendMessage { .. } => BackendOp::SendMessage,
            BackendCall::Regenerate { .. } => BackendOp::Regenerate,
            BackendCall::ExecuteTools { .. } => BackendOp::ExecuteTools,
            BackendCall::CancelGeneration { .. } => BackendOp::CancelGeneration,
            BackendCall::Subscribe { .. } => BackendOp::Subscribe,
        }
    }
}

/// In-memory mock implementation of ChatBackend.
///
/// Persists sessions and user messages, records every call, and lets tests
/// push event envelopes into a session's stream with [`MockChatBackend::emit`].
/// Operations registered with [`MockChatBackend::fail`] return an error until
/// recovered.
pub struct MockChatBackend {
    sessions: RwLock<HashMap<String, Session>>,
    messages: RwLock<HashMap<String, Vec<Message>>>,
    channels: RwLock<HashMap<String, broadcast::Sender<serde_json::Value>>>,
    calls: RwLock<Vec<BackendCall>>,
    failing: RwLock<HashSet<BackendOp>>,
}

impl MockChatBackend {
    /// Create a new empty mock backend.
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            messages: RwLock::new(HashMap::new()),
            channels: RwLock::new(HashMap::new()),
            calls: RwLock::new(Vec::new()),
            failing: RwLock::new(HashSet::new()),
        }
    }

    pub async fn fail(&self, op: BackendOp) {
        self.failing.write().await.insert(op);
    }

    pub async fn recover(&self, op: BackendOp) {
        self.failing.write().await.remove(&op);
    }

    pub async fn calls(&self) -> Vec<BackendCall> {
        self.calls.read().await.clone()
    }

    pub async fn count(&self, op: BackendOp) -> usize {
        self.calls
            .read()
            .await
            .iter()
            .filter(|call| call.op() == op)
            .count()
    }

    /// Push a raw envelope into a session's stream. Returns the number of receivers.
    pub async fn emit(&self, session_id: &str, envelope: serde_json::Value) -> usize {
        self.sender(session_id).await.send(envelope).unwrap_or(0)
    }

    pub async fn emit_event(&self, session_id: &str, event: &ChatEvent) -> usize {
        match serde_json::to_value(event) {
            Ok(envelope) => self.emit(session_id, envelope).await,
            Err(_) => 0,
        }
    }

    pub async fn subscriber_count(&self, session_id: &str) -> usize {
        self.channels
            .read()
            .await
            .get(session_id)
            .map_or(0, broadcast::Sender::receiver_count)
    }

    pub async fn seed_session(&self, session: Session) {
        self.sessions
            .write()
            .await
            .insert(session.id.clone(), session);
    }

    /// Replace the persisted log of a session
    pub async fn seed_messages(&self, session_id: &str, messages: Vec<Message>) {
        self.messages
            .write()
            .await
            .insert(session_id.to_string(), messages);
    }

    pub async fn persisted_messages(&self, session_id: &str) -> Vec<Message> {
        self.messages
            .read()
            .await
            .get(session_id)
            .cloned()
            .unwrap_or_default()
    }

    async fn record(&self, call: BackendCall) -> Result<()> {
        let op = call.op();
        self.calls.write().await.push(call);
        if self.failing.read().await.contains(&op) {
            return Err(anyhow!("mock backend: {op:?} rejected"));
        }
        Ok(())
    }

    async fn sender(&self, session_id: &str) -> broadcast::Sender<serde_json::Value> {
        self.channels
            .write()
            .await
            .entry(session_id.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }
}

impl Default for MockChatBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChatBackend for MockChatBackend {
    async fn create_session(
        &self,
        server_id: &str,
        model_id: Option<&str>,
        tab_id: Option<&str>,
    ) -> Result<String> {
        self.record(BackendCall::CreateSession {
            server_id: server_id.to_string(),
            model_id: model_id.map(str::to_string),
            tab_id: tab_id.map(str::to_string),
        })
        .await?;

        let id = uuid::Uuid::new_v4().to_string();
        let mut session = Session::new(&id, server_id, tab_id.map(str::to_string));
        session.model_id = model_id.map(str::to_string);
        self.seed_session(session).await;
        Ok(id)
    }

    async fn list_sessions(&self, server_id: &str) -> Result<Vec<Session>> {
        self.record(BackendCall::ListSessions {
            server_id: server_id.to_string(),
        })
        .await?;

        let known = self.sessions.read().await;
        let messages = self.messages.read().await;
        let mut sessions: Vec<Session> = known
            .values()
            .filter(|session| session.server_id == server_id)
            .filter(|session| messages.get(&session.id).is_some_and(|log| !log.is_empty()))
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(sessions)
    }

    async fn list_messages(&self, session_id: &str) -> Result<Vec<Message>> {
        self.record(BackendCall::ListMessages {
            session_id: session_id.to_string(),
        })
        .await?;
        Ok(self.persisted_messages(session_id).await)
    }

    async fn generate_title(
        &self,
        session_id: &str,
        _model_id: &str,
        _channel_id: &str,
    ) -> Result<String> {
        self.record(BackendCall::GenerateTitle {
            session_id: session_id.to_string(),
        })
        .await?;

        let messages = self.persisted_messages(session_id).await;
        let first = messages
            .iter()
            .find(|message| message.is_user())
            .ok_or_else(|| anyhow!("session {session_id} has no user message"))?;
        // models like to quote their titles
        Ok(format!("\"{}\"", first.content))
    }

    async fn delete_session(&self, session_id: &str) -> Result<()> {
        self.record(BackendCall::DeleteSession {
            session_id: session_id.to_string(),
        })
        .await?;
        self.sessions.write().await.remove(session_id);
        self.messages.write().await.remove(session_id);
        Ok(())
    }

    async fn delete_all_sessions(&self, server_id: &str) -> Result<()> {
        self.record(BackendCall::DeleteAllSessions {
            server_id: server_id.to_string(),
        })
        .await?;
        let mut sessions = self.sessions.write().await;
        let ids: Vec<String> = sessions
            .values()
            .filter(|session| session.server_id == server_id)
            .map(|session| session.id.clone())
            .collect();
        let mut messages = self.messages.write().await;
        for id in ids {
            sessions.remove(&id);
            messages.remove(&id);
        }
        Ok(())
    }

    async fn send_message(&self, request: &TurnRequest, content: &str) -> Result<()> {
        self.record(BackendCall::SendMessage {
            request: request.clone(),
            content: content.to_string(),
        })
        .await?;
        self.messages
            .write()
            .await
            .entry(request.session_id.clone())
            .or_default()
            .push(Message::user(content));
        Ok(())
    }

    async fn regenerate(&self, request: &TurnRequest) -> Result<()> {
        self.record(BackendCall::Regenerate {
            request: request.clone(),
        })
        .await?;
        if let Some(log) = self.messages.write().await.get_mut(&request.session_id) {
            if log.last().is_some_and(Message::is_assistant) {
                log.pop();
            }
        }
        Ok(())
    }

    async fn execute_tools(&self, request: &TurnRequest, tool_call_ids: &[String]) -> Result<()> {
        self.record(BackendCall::ExecuteTools {
            request: request.clone(),
            tool_call_ids: tool_call_ids.to_vec(),
        })
        .await
    }

    async fn cancel_generation(&self, session_id: &str) -> Result<()> {
        self.record(BackendCall::CancelGeneration {
            session_id: session_id.to_string(),
        })
        .await
    }

    async fn subscribe(&self, session_id: &str) -> Result<EventStream> {
        self.record(BackendCall::Subscribe {
            session_id: session_id.to_string(),
        })
        .await?;
        Ok(self.sender(session_id).await.subscribe())
    }
}
