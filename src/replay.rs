//! Scenario replay against the in-memory backend
//!
//! A scenario is a YAML file naming a server (and optionally a tab) plus a
//! list of steps. User actions go through [`ChatManager`]; backend events are
//! injected into the active session's stream.
//!
//! ```yaml
//! server_id: srv-1
//! tab_id: tab-1
//! steps:
//!   - send: free disk space?
//!   - event: { type: response_delta, text: "Checking" }
//!   - event: { type: tool_calls, calls: [{ id: c1, function: { name: run_in_terminal, arguments: '{"command":"df -h"}' } }] }
//!   - wait: 6000
//!   - event: { type: done }
//! ```

use crate::chat::{
    ChatConfig, ChatContext, ChatError, ChatManager, Message, MockChatBackend, Session,
    SessionSnapshot,
};
use crate::events::ChatNotice;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Pause after every step so routed events get applied
const SETTLE: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, Deserialize)]
pub struct Scenario {
    pub server_id: String,
    #[serde(default)]
    pub tab_id: Option<String>,
    #[serde(default, deserialize_with = "serde_yaml::with::singleton_map_recursive::deserialize")]
    pub steps: Vec<Step>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    /// Send a user message
    Send(String),
    /// Inject a raw event envelope into the active session's stream
    Event(serde_json::Value),
    /// Let time pass, in milliseconds
    Wait(u64),
    Confirm,
    CancelTools,
    Stop,
    Regenerate,
    NewSession,
    /// Focus another tab of the same server
    SwitchTab(String),
}

impl Step {
    fn name(&self) -> &'static str {
        match self {
            Step::Send(_) => "send",
            Step::Event(_) => "event",
            Step::Wait(_) => "wait",
            Step::Confirm => "confirm",
            Step::CancelTools => "cancel_tools",
            Step::Stop => "stop",
            Step::Regenerate => "regenerate",
            Step::NewSession => "new_session",
            Step::SwitchTab(_) => "switch_tab",
        }
    }
}

impl Scenario {
    pub fn from_path(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read scenario {}", path.display()))?;
        Self::from_yaml(&contents).with_context(|| format!("Invalid scenario {}", path.display()))
    }

    pub fn from_yaml(contents: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(contents)?)
    }

    fn context(&self) -> ChatContext {
        ChatContext {
            server_id: self.server_id.clone(),
            tab_id: self.tab_id.clone(),
        }
    }
}

/// Final state after a scenario ran
#[derive(Debug, Clone, Serialize)]
pub struct ReplayReport {
    pub active_session_id: Option<String>,
    pub sessions: Vec<Session>,
    pub snapshots: Vec<SessionSnapshot>,
    pub messages: BTreeMap<String, Vec<Message>>,
    /// Backend operations in call order
    pub backend_calls: Vec<String>,
    /// Error notices shown to the user
    pub errors: Vec<String>,
    /// Steps the manager rejected, as `"<index> <step>: <error>"`
    pub rejected_steps: Vec<String>,
}

/// Run `scenario` against a fresh [`MockChatBackend`]
pub async fn run_scenario(scenario: &Scenario, config: ChatConfig) -> Result<ReplayReport> {
    let backend = Arc::new(MockChatBackend::new());
    let manager = ChatManager::new(backend.clone(), config);
    let mut notices = manager.subscribe_notices();

    manager
        .set_context(scenario.context())
        .await
        .context("Failed to focus scenario context")?;

    let mut rejected_steps = Vec::new();
    for (index, step) in scenario.steps.iter().enumerate() {
        debug!(index, step = step.name(), "Replaying step");
        if let Err(e) = run_step(&manager, &backend, scenario, step).await {
            warn!(index, step = step.name(), error = %e, "Step rejected");
            rejected_steps.push(format!("{index} {}: {e}", step.name()));
        }
        tokio::time::sleep(SETTLE).await;
    }

    let mut errors = Vec::new();
    while let Ok(notice) = notices.try_recv() {
        if let ChatNotice::Error { message, .. } = notice {
            errors.push(message);
        }
    }

    let sessions = manager.sessions(&scenario.server_id).await;
    let mut snapshots = Vec::with_capacity(sessions.len());
    let mut messages = BTreeMap::new();
    for session in &sessions {
        snapshots.push(manager.snapshot(&session.id).await);
        messages.insert(session.id.clone(), manager.messages(&session.id).await);
    }
    let backend_calls = backend
        .calls()
        .await
        .iter()
        .map(|call| format!("{:?}", call.op()))
        .collect();

    info!(
        steps = scenario.steps.len(),
        rejected = rejected_steps.len(),
        "Scenario complete"
    );
    Ok(ReplayReport {
        active_session_id: manager.active_session_id().await,
        sessions,
        snapshots,
        messages,
        backend_calls,
        errors,
        rejected_steps,
    })
}

async fn run_step(
    manager: &ChatManager,
    backend: &MockChatBackend,
    scenario: &Scenario,
    step: &Step,
) -> Result<(), ChatError> {
    match step {
        Step::Send(content) => manager.send(content).await.map(drop),
        Step::Event(envelope) => {
            let session_id = manager
                .active_session_id()
                .await
                .ok_or(ChatError::NoActiveSession)?;
            let receivers = backend.emit(&session_id, envelope.clone()).await;
            debug!(session_id = %session_id, receivers, "Injected event");
            Ok(())
        }
        Step::Wait(millis) => {
            tokio::time::sleep(Duration::from_millis(*millis)).await;
            Ok(())
        }
        Step::Confirm => manager.confirm_tools().await,
        Step::CancelTools => manager.cancel_tools().await,
        Step::Stop => manager.stop().await,
        Step::Regenerate => manager.regenerate().await.map(drop),
        Step::NewSession => manager.new_session().await.map(drop),
        Step::SwitchTab(tab_id) => manager
            .set_context(ChatContext::tab(&scenario.server_id, tab_id))
            .await
            .map(drop),
    }
}
