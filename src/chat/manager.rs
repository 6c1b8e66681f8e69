//! ChatManager: action entry points of the assistant chat
//!
//! Architecture:
//! - All per-session state lives in one [`ChatState`] behind a mutex. Every
//!   action locks it, applies one transition, and releases it before any
//!   backend round trip.
//! - The active session's backend events reach [`ChatManager::handle_event`]
//!   through the [`EventRouter`], one pump task per subscription.
//! - Flush timers and countdown ticks are spawned tasks holding a `Weak`
//!   reference back to the manager and a ticket; stale tickets are no-ops.
//! - Observers follow along through [`ChatNotice`]s on the [`EventBus`].

use super::config::ChatConfig;
use super::coalescer::FlushTicket;
use super::error::ChatError;
use super::lifecycle::TickOutcome;
use super::registry::Resolution;
use super::router::{EventRouter, EventSink};
use super::state::{ChatState, CountdownTicket, ToolProposal};
use super::traits::ChatBackend;
use super::types::{
    ChatContext, ChatEvent, Message, RequestProfile, Session, SessionSnapshot, ToolCall,
    TurnRequest,
};
use crate::events::{ChatNotice, ErrorThrottle, EventBus, EventEmitter};
use async_trait::async_trait;
use std::sync::{Arc, Weak};
use tokio::sync::{broadcast, Mutex, RwLock};
use tracing::{debug, info, warn};

/// Generated titles longer than this are cut
const MAX_TITLE_CHARS: usize = 50;

/// Orchestrates sessions, streaming, and tool confirmation for one chat panel
pub struct ChatManager {
    config: ChatConfig,
    backend: Arc<dyn ChatBackend>,
    state: Mutex<ChatState>,
    router: Mutex<EventRouter>,
    throttle: Mutex<ErrorThrottle>,
    profile: RwLock<RequestProfile>,
    bus: EventBus,
    this: Weak<Self>,
}

impl ChatManager {
    pub fn new(backend: Arc<dyn ChatBackend>, config: ChatConfig) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            state: Mutex::new(ChatState::new(&config)),
            router: Mutex::new(EventRouter::new()),
            throttle: Mutex::new(ErrorThrottle::new(config.error_dedup_window)),
            profile: RwLock::new(config.default_profile()),
            bus: EventBus::new(config.notice_capacity),
            backend,
            config,
            this: this.clone(),
        })
    }

    // ========================================================================
    // Read access
    // ========================================================================

    pub fn config(&self) -> &ChatConfig {
        &self.config
    }

    pub fn subscribe_notices(&self) -> broadcast::Receiver<ChatNotice> {
        self.bus.subscribe()
    }

    pub async fn profile(&self) -> RequestProfile {
        self.profile.read().await.clone()
    }

    /// Model, channel and mode used for subsequent requests
    pub async fn set_profile(&self, profile: RequestProfile) {
        debug!(model_id = %profile.model_id, mode = profile.mode.as_str(), "Request profile changed");
        *self.profile.write().await = profile;
    }

    pub async fn context(&self) -> Option<ChatContext> {
        self.state.lock().await.registry().context().cloned()
    }

    pub async fn active_session_id(&self) -> Option<String> {
        self.state.lock().await.registry().active().map(str::to_string)
    }

    pub async fn sessions(&self, server_id: &str) -> Vec<Session> {
        self.state.lock().await.registry().sessions(server_id).to_vec()
    }

    pub async fn session(&self, session_id: &str) -> Option<Session> {
        self.state.lock().await.registry().session(session_id).cloned()
    }

    pub async fn messages(&self, session_id: &str) -> Vec<Message> {
        self.state.lock().await.messages(session_id).to_vec()
    }

    pub async fn snapshot(&self, session_id: &str) -> SessionSnapshot {
        self.state.lock().await.snapshot(session_id)
    }

    // ========================================================================
    // Sessions
    // ========================================================================

    /// Focus a server (and tab). Loads its sessions and activates the one last
    /// used there. Returns the active session afterwards.
    pub async fn set_context(&self, context: ChatContext) -> Result<Option<String>, ChatError> {
        if let Err(e) = self.load_sessions(&context.server_id).await {
            warn!(server_id = %context.server_id, error = %e, "Could not refresh sessions");
        }

        let resolution = self.state.lock().await.registry_mut().set_context(context);
        match resolution {
            Resolution::Keep => {}
            Resolution::Activate(session_id) => self.activate(Some(session_id)).await,
            Resolution::Clear => self.activate(None).await,
        }
        Ok(self.active_session_id().await)
    }

    /// Fetch a server's session list from the backend
    pub async fn load_sessions(&self, server_id: &str) -> Result<Vec<Session>, ChatError> {
        let fetched = self
            .backend
            .list_sessions(server_id)
            .await
            .map_err(|e| ChatError::dispatch("list_sessions", e))?;

        let sessions = {
            let mut state = self.state.lock().await;
            state.registry_mut().replace_server_sessions(server_id, fetched);
            state.registry().sessions(server_id).to_vec()
        };
        self.bus.emit_sessions_changed(server_id);
        Ok(sessions)
    }

    pub async fn switch_session(&self, session_id: &str) -> Result<(), ChatError> {
        {
            let state = self.state.lock().await;
            if state.registry().session(session_id).is_none() {
                return Err(ChatError::SessionNotFound(session_id.to_string()));
            }
            if state.registry().is_active(session_id) {
                return Ok(());
            }
        }
        self.activate(Some(session_id.to_string())).await;
        Ok(())
    }

    /// Create a session in the current context and make it active
    pub async fn new_session(&self) -> Result<String, ChatError> {
        let context = self.context().await.ok_or(ChatError::NoContext)?;
        let model_id = self.profile.read().await.model_id.clone();

        let created = self
            .backend
            .create_session(&context.server_id, Some(&model_id), context.tab_id.as_deref())
            .await;
        let session_id = match created {
            Ok(id) => id,
            Err(e) => return Err(self.fail_dispatch(None, "create_session", e).await),
        };

        let session = Session::new(&session_id, &context.server_id, context.tab_id.clone())
            .with_model(model_id);
        self.state.lock().await.register_session(session, true);
        info!(session_id = %session_id, server_id = %context.server_id, "Created chat session");
        self.bus.emit_sessions_changed(&context.server_id);

        self.activate(Some(session_id.clone())).await;
        Ok(session_id)
    }

    pub async fn delete_session(&self, session_id: &str) -> Result<(), ChatError> {
        if let Err(e) = self.backend.delete_session(session_id).await {
            return Err(self.fail_dispatch(Some(session_id), "delete_session", e).await);
        }

        let was_active = {
            let mut router = self.router.lock().await;
            if router.session_id() == Some(session_id) {
                router.unsubscribe();
            }
            let mut state = self.state.lock().await;
            let was_active = state.registry().is_active(session_id);
            let server_id = state
                .registry()
                .session(session_id)
                .map(|session| session.server_id.clone());
            state.purge(session_id);
            if let Some(server_id) = server_id {
                self.bus.emit_sessions_changed(&server_id);
            }
            was_active
        };

        info!(session_id, "Deleted chat session");
        if was_active {
            self.bus.emit(ChatNotice::ActiveSessionChanged { session_id: None });
        }
        Ok(())
    }

    /// Delete every session of the current server
    pub async fn delete_all_sessions(&self) -> Result<(), ChatError> {
        let context = self.context().await.ok_or(ChatError::NoContext)?;
        if let Err(e) = self.backend.delete_all_sessions(&context.server_id).await {
            return Err(self.fail_dispatch(None, "delete_all_sessions", e).await);
        }

        let active_removed = {
            let mut router = self.router.lock().await;
            let mut state = self.state.lock().await;
            let removed = state.purge_server(&context.server_id);
            let active_removed = router
                .session_id()
                .is_some_and(|id| removed.iter().any(|removed| removed == id));
            if active_removed {
                router.unsubscribe();
            }
            info!(server_id = %context.server_id, count = removed.len(), "Deleted all chat sessions");
            active_removed
        };

        self.bus.emit_sessions_changed(&context.server_id);
        if active_removed {
            self.bus.emit(ChatNotice::ActiveSessionChanged { session_id: None });
        }
        Ok(())
    }

    // ========================================================================
    // Turns
    // ========================================================================

    /// Send a user message to the active session, creating one if needed.
    /// Returns the session the message went to.
    pub async fn send(&self, content: &str) -> Result<String, ChatError> {
        let content = content.trim();
        if content.is_empty() {
            return Err(ChatError::EmptyMessage);
        }

        let session_id = match self.active_session_id().await {
            Some(id) => id,
            None => self.new_session().await?,
        };

        let profile = self.profile().await;
        let request = {
            let mut state = self.state.lock().await;
            state.begin_user_turn(&session_id, content)?;
            bind_to_context_tab(&mut state, &session_id);
            turn_request(&state, &session_id, &profile)
        };
        self.bus.emit_messages_changed(&session_id);
        self.bus.emit_state_changed(&session_id);

        if let Err(e) = self.backend.send_message(&request, content).await {
            return Err(self.fail_dispatch(Some(&session_id), "send_message", e).await);
        }
        debug!(session_id = %session_id, model_id = %request.model_id, "Message sent");
        Ok(session_id)
    }

    /// Generate the active session's latest assistant turn again.
    ///
    /// Returns `false` when the log does not end with an assistant turn.
    pub async fn regenerate(&self) -> Result<bool, ChatError> {
        let session_id = self
            .active_session_id()
            .await
            .ok_or(ChatError::NoActiveSession)?;

        let profile = self.profile().await;
        let request = {
            let mut state = self.state.lock().await;
            if !state.begin_regenerate(&session_id)? {
                return Ok(false);
            }
            turn_request(&state, &session_id, &profile)
        };
        self.bus.emit_messages_changed(&session_id);
        self.bus.emit_state_changed(&session_id);

        if let Err(e) = self.backend.regenerate(&request).await {
            return Err(self.fail_dispatch(Some(&session_id), "regenerate", e).await);
        }
        Ok(true)
    }

    /// Run the active session's pending tool calls
    pub async fn confirm_tools(&self) -> Result<(), ChatError> {
        let session_id = self
            .active_session_id()
            .await
            .ok_or(ChatError::NoActiveSession)?;
        if self.confirm_batch(&session_id, None).await? {
            Ok(())
        } else {
            Err(ChatError::NothingPending(session_id))
        }
    }

    /// Decline the active session's pending tool calls
    pub async fn cancel_tools(&self) -> Result<(), ChatError> {
        let session_id = self
            .active_session_id()
            .await
            .ok_or(ChatError::NoActiveSession)?;
        if !self.state.lock().await.cancel_tools(&session_id) {
            return Err(ChatError::NothingPending(session_id));
        }
        debug!(session_id = %session_id, "Tool calls cancelled");
        self.bus.emit_state_changed(&session_id);
        Ok(())
    }

    /// Stop the active session: drop pending tool calls and end generation
    pub async fn stop(&self) -> Result<(), ChatError> {
        let session_id = self
            .active_session_id()
            .await
            .ok_or(ChatError::NoActiveSession)?;

        let outcome = self.state.lock().await.stop(&session_id);
        if outcome.is_noop() {
            return Ok(());
        }
        info!(session_id = %session_id, "Generation stopped");
        self.bus.emit_messages_changed(&session_id);
        self.bus.emit_state_changed(&session_id);

        if outcome.was_generating {
            if let Err(e) = self.backend.cancel_generation(&session_id).await {
                debug!(session_id = %session_id, error = %e, "Backend cancel failed, ignoring");
            }
        }
        if outcome.title_due {
            self.spawn_title_generation(&session_id);
        }
        Ok(())
    }

    // ========================================================================
    // Backend events
    // ========================================================================

    /// Apply one backend event to its session
    pub async fn handle_event(&self, session_id: &str, event: ChatEvent) {
        match event {
            ChatEvent::TurnStarted { model_id } => {
                if self.state.lock().await.start_turn(session_id, model_id) {
                    self.bus.emit_messages_changed(session_id);
                }
            }
            ChatEvent::ResponseDelta { text } => {
                let ticket = self.state.lock().await.push_response(session_id, &text);
                if let Some(ticket) = ticket {
                    self.spawn_flush(ticket);
                }
            }
            ChatEvent::ReasoningDelta { text } => {
                let ticket = self.state.lock().await.push_reasoning(session_id, &text);
                if let Some(ticket) = ticket {
                    self.spawn_flush(ticket);
                }
            }
            ChatEvent::ReasoningEnd => {
                if self.state.lock().await.flush_now(session_id) {
                    self.bus.emit_messages_changed(session_id);
                }
            }
            ChatEvent::ToolCalls { calls } => self.on_tool_calls(session_id, calls).await,
            ChatEvent::MessageBatch { messages } => {
                self.state.lock().await.append_batch(session_id, messages);
                self.bus.emit_messages_changed(session_id);
            }
            ChatEvent::Error { message } => {
                self.state.lock().await.fail_turn(session_id);
                warn!(session_id, error = %message, "Backend reported an error");
                self.bus.emit_messages_changed(session_id);
                self.bus.emit_state_changed(session_id);
                self.report_error(Some(session_id), &message).await;
            }
            ChatEvent::Done => {
                let (title_due, server_id) = {
                    let mut state = self.state.lock().await;
                    let title_due = state.finish_turn(session_id);
                    let server_id = state
                        .registry()
                        .session(session_id)
                        .map(|session| session.server_id.clone());
                    (title_due, server_id)
                };
                debug!(session_id, "Turn complete");
                self.bus.emit_messages_changed(session_id);
                self.bus.emit_state_changed(session_id);
                if title_due {
                    self.spawn_title_generation(session_id);
                }
                if let Some(server_id) = server_id {
                    self.spawn_refresh_sessions(server_id);
                }
            }
        }
    }

    async fn on_tool_calls(&self, session_id: &str, calls: Vec<ToolCall>) {
        let profile = self.profile().await;
        let (proposal, request) = {
            let mut state = self.state.lock().await;
            let proposal = state.propose_tools(session_id, calls);
            let request = turn_request(&state, session_id, &profile);
            (proposal, request)
        };
        self.bus.emit_messages_changed(session_id);
        self.bus.emit_state_changed(session_id);

        match proposal {
            ToolProposal::Ignored => {
                debug!(session_id, "Tool calls recorded without running them");
            }
            ToolProposal::AutoExecute { tool_call_ids } => {
                debug!(session_id, count = tool_call_ids.len(), "Auto-executing read-only tools");
                // failure is already reported
                let _ = self.dispatch_tools(session_id, &request, &tool_call_ids).await;
            }
            ToolProposal::AwaitConfirmation {
                batch_id,
                countdown,
            } => {
                debug!(session_id, batch_id, countdown = countdown.is_some(), "Tool calls await confirmation");
                if let Some(ticket) = countdown {
                    self.spawn_countdown(ticket);
                }
            }
        }
    }

    // ========================================================================
    // Internals
    // ========================================================================

    /// Make `session_id` the shown session: stop routing the previous one,
    /// flush what it buffered, then subscribe and restore the new one.
    async fn activate(&self, session_id: Option<String>) {
        let outgoing = self.router.lock().await.unsubscribe();
        {
            let mut state = self.state.lock().await;
            if let Some(previous) = outgoing.as_deref() {
                if state.teardown(previous) {
                    self.bus.emit_messages_changed(previous);
                }
            }
            state.registry_mut().set_active(session_id.clone());
        }
        self.bus.emit(ChatNotice::ActiveSessionChanged {
            session_id: session_id.clone(),
        });

        let Some(session_id) = session_id else {
            return;
        };
        info!(session_id = %session_id, "Activated chat session");

        match self.backend.subscribe(&session_id).await {
            Ok(stream) => {
                let sink: Weak<dyn EventSink> = self.this.clone();
                self.router.lock().await.subscribe(&session_id, stream, sink);
            }
            Err(e) => {
                warn!(session_id = %session_id, error = %e, "Could not subscribe to session events");
                let err = ChatError::dispatch("subscribe", e);
                self.report_error(Some(&session_id), &err.to_string()).await;
            }
        }

        let authoritative = match self.backend.list_messages(&session_id).await {
            Ok(messages) => Some(messages),
            Err(e) => {
                warn!(session_id = %session_id, error = %e, "Could not reload messages, keeping local log");
                None
            }
        };

        let ticket = {
            let mut state = self.state.lock().await;
            if !state.registry().is_active(&session_id) {
                return;
            }
            state.restore(&session_id, authoritative)
        };
        self.bus.emit_messages_changed(&session_id);
        self.bus.emit_state_changed(&session_id);
        if let Some(ticket) = ticket {
            self.spawn_countdown(ticket);
        }
    }

    /// Confirm `batch_id` (or whatever is pending) and run it.
    /// Returns `false` when there was nothing to confirm.
    async fn confirm_batch(&self, session_id: &str, batch_id: Option<u64>) -> Result<bool, ChatError> {
        let profile = self.profile().await;
        let (tool_call_ids, request) = {
            let mut state = self.state.lock().await;
            let Some(ids) = state.confirm_tools(session_id, batch_id) else {
                return Ok(false);
            };
            (ids, turn_request(&state, session_id, &profile))
        };
        self.bus.emit_state_changed(session_id);
        self.dispatch_tools(session_id, &request, &tool_call_ids).await?;
        Ok(true)
    }

    async fn dispatch_tools(
        &self,
        session_id: &str,
        request: &TurnRequest,
        tool_call_ids: &[String],
    ) -> Result<(), ChatError> {
        if request.bound_tab_id.is_none() {
            let err = ChatError::NoExecutionTarget(session_id.to_string());
            self.abort_generation(session_id).await;
            self.report_error(Some(session_id), &err.to_string()).await;
            return Err(err);
        }
        if let Err(e) = self.backend.execute_tools(request, tool_call_ids).await {
            return Err(self.fail_dispatch(Some(session_id), "execute_tools", e).await);
        }
        debug!(session_id, count = tool_call_ids.len(), "Tool execution requested");
        Ok(())
    }

    /// A request never reached the backend: leave `generating` and surface it
    async fn fail_dispatch(
        &self,
        session_id: Option<&str>,
        operation: &'static str,
        source: anyhow::Error,
    ) -> ChatError {
        let err = ChatError::dispatch(operation, source);
        warn!(session_id = session_id.unwrap_or("-"), error = %err, "Backend request failed");
        if let Some(session_id) = session_id {
            self.abort_generation(session_id).await;
        }
        self.report_error(session_id, &err.to_string()).await;
        err
    }

    async fn abort_generation(&self, session_id: &str) {
        self.state.lock().await.abort_generation(session_id);
        self.bus.emit_state_changed(session_id);
    }

    async fn report_error(&self, session_id: Option<&str>, message: &str) {
        if self.throttle.lock().await.admit(message) {
            self.bus.emit_error(session_id, message);
        } else {
            debug!(error = message, "Suppressed repeated error");
        }
    }

    fn spawn_flush(&self, ticket: FlushTicket) {
        let this = self.this.clone();
        let window = self.config.flush_window;
        tokio::spawn(async move {
            tokio::time::sleep(window).await;
            let Some(manager) = this.upgrade() else {
                return;
            };
            let flushed = manager.state.lock().await.flush_scheduled(&ticket);
            if flushed {
                manager.bus.emit_messages_changed(&ticket.session_id);
            }
        });
    }

    fn spawn_countdown(&self, ticket: CountdownTicket) {
        let this = self.this.clone();
        let tick = self.config.countdown_tick;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + tick, tick);
            loop {
                ticker.tick().await;
                let Some(manager) = this.upgrade() else {
                    break;
                };
                let outcome = manager.state.lock().await.countdown_tick(&ticket);
                match outcome {
                    TickOutcome::Continue { .. } => {
                        manager.bus.emit_state_changed(&ticket.session_id);
                    }
                    TickOutcome::Expired => {
                        debug!(session_id = %ticket.session_id, batch_id = ticket.batch_id, "Countdown elapsed, running tools");
                        if let Err(e) = manager
                            .confirm_batch(&ticket.session_id, Some(ticket.batch_id))
                            .await
                        {
                            debug!(session_id = %ticket.session_id, error = %e, "Auto-confirm failed");
                        }
                        break;
                    }
                    TickOutcome::Stale => break,
                }
            }
        });
    }

    fn spawn_title_generation(&self, session_id: &str) {
        let this = self.this.clone();
        let session_id = session_id.to_string();
        tokio::spawn(async move {
            let Some(manager) = this.upgrade() else {
                return;
            };
            let profile = manager.profile().await;
            let raw = match manager
                .backend
                .generate_title(&session_id, &profile.model_id, &profile.channel_id)
                .await
            {
                Ok(raw) => raw,
                Err(e) => {
                    debug!(session_id = %session_id, error = %e, "Title generation failed, keeping default");
                    return;
                }
            };
            let Some(title) = normalize_title(&raw) else {
                debug!(session_id = %session_id, "Backend returned an empty title");
                return;
            };
            let renamed = manager
                .state
                .lock()
                .await
                .registry_mut()
                .set_title(&session_id, &title);
            if renamed {
                info!(session_id = %session_id, title = %title, "Session titled");
                manager.bus.emit(ChatNotice::TitleChanged { session_id, title });
            }
        });
    }

    fn spawn_refresh_sessions(&self, server_id: String) {
        let this = self.this.clone();
        tokio::spawn(async move {
            let Some(manager) = this.upgrade() else {
                return;
            };
            if let Err(e) = manager.load_sessions(&server_id).await {
                debug!(server_id = %server_id, error = %e, "Session refresh failed");
            }
        });
    }
}

#[async_trait]
impl EventSink for ChatManager {
    async fn dispatch(&self, session_id: &str, event: ChatEvent) {
        self.handle_event(session_id, event).await;
    }
}

/// Pin an unbound session to the tab the user is typing in
fn bind_to_context_tab(state: &mut ChatState, session_id: &str) {
    let Some(session) = state.registry().session(session_id) else {
        return;
    };
    if session.bound_tab_id.is_some() {
        return;
    }
    let tab_id = state
        .registry()
        .context()
        .filter(|context| context.server_id == session.server_id)
        .and_then(|context| context.tab_id.clone());
    if let Some(tab_id) = tab_id {
        if state.registry_mut().bind_tab(session_id, &tab_id) {
            debug!(session_id, tab_id = %tab_id, "Bound session to tab");
        }
    }
}

/// Request for the session's next turn. Tools run in the session's tab, or in
/// the focused tab of its server when it has none.
fn turn_request(state: &ChatState, session_id: &str, profile: &RequestProfile) -> TurnRequest {
    let session = state.registry().session(session_id);
    let bound_tab_id = session
        .and_then(|session| session.bound_tab_id.clone())
        .or_else(|| {
            let server_id = session.map(|session| session.server_id.as_str());
            state
                .registry()
                .context()
                .filter(|context| server_id.map_or(true, |id| id == context.server_id))
                .and_then(|context| context.tab_id.clone())
        });
    TurnRequest {
        session_id: session_id.to_string(),
        model_id: profile.model_id.clone(),
        channel_id: profile.channel_id.clone(),
        mode: profile.mode,
        bound_tab_id,
    }
}

/// Clean up a model-generated title. Returns `None` when nothing is left.
pub fn normalize_title(raw: &str) -> Option<String> {
    let title = raw.trim().trim_matches('"').trim_matches('\'').trim();
    if title.is_empty() {
        return None;
    }
    if title.chars().count() > MAX_TITLE_CHARS {
        let cut: String = title.chars().take(MAX_TITLE_CHARS - 3).collect();
        return Some(format!("{cut}..."));
    }
    Some(title.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::mock::{BackendCall, BackendOp, MockChatBackend};
    use crate::chat::types::ChatMode;
    use std::time::Duration;

    const SERVER: &str = "srv-1";
    const TAB: &str = "tab-1";

    fn manager() -> (Arc<MockChatBackend>, Arc<ChatManager>) {
        let backend = Arc::new(MockChatBackend::new());
        let manager = ChatManager::new(backend.clone(), ChatConfig::defaults());
        (backend, manager)
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    #[test]
    fn test_normalize_title() {
        assert_eq!(normalize_title("  \"Disk usage\" \n").as_deref(), Some("Disk usage"));
        assert_eq!(normalize_title("'quoted'").as_deref(), Some("quoted"));
        assert_eq!(normalize_title(" \"\" "), None);

        let long = "x".repeat(60);
        let title = normalize_title(&long).unwrap();
        assert_eq!(title.chars().count(), 50);
        assert!(title.ends_with("..."));
    }

    #[test]
    fn test_turn_request_falls_back_to_context_tab() {
        let mut state = ChatState::new(&ChatConfig::defaults());
        state.register_session(Session::new("s1", SERVER, None), false);
        let profile = ChatConfig::defaults().default_profile();

        assert_eq!(turn_request(&state, "s1", &profile).bound_tab_id, None);

        state
            .registry_mut()
            .set_context(ChatContext::tab(SERVER, TAB));
        let request = turn_request(&state, "s1", &profile);
        assert_eq!(request.bound_tab_id.as_deref(), Some(TAB));
        assert_eq!(request.mode, ChatMode::Agent);

        state
            .registry_mut()
            .set_context(ChatContext::tab("other-server", "tab-9"));
        assert_eq!(turn_request(&state, "s1", &profile).bound_tab_id, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_without_context_fails() {
        let (_backend, manager) = manager();
        assert!(matches!(manager.send("hi").await, Err(ChatError::NoContext)));
        assert!(matches!(manager.send("   ").await, Err(ChatError::EmptyMessage)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_send_creates_bound_session() {
        let (backend, manager) = manager();
        manager
            .set_context(ChatContext::tab(SERVER, TAB))
            .await
            .unwrap();
        let session_id = manager.send("hello").await.unwrap();

        assert_eq!(manager.active_session_id().await.as_deref(), Some(session_id.as_str()));
        let session = manager.session(&session_id).await.unwrap();
        assert_eq!(session.bound_tab_id.as_deref(), Some(TAB));
        assert!(manager.snapshot(&session_id).await.generating);

        let calls = backend.calls().await;
        assert!(calls.iter().any(|call| matches!(
            call,
            BackendCall::SendMessage { request, content }
                if content == "hello" && request.bound_tab_id.as_deref() == Some(TAB)
        )));
        assert_eq!(backend.subscriber_count(&session_id).await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_title_generated_after_first_turn() {
        let (backend, manager) = manager();
        let mut notices = manager.subscribe_notices();
        manager
            .set_context(ChatContext::tab(SERVER, TAB))
            .await
            .unwrap();
        let session_id = manager.send("check disk usage").await.unwrap();

        backend
            .emit_event(&session_id, &ChatEvent::ResponseDelta { text: "Sure".into() })
            .await;
        backend.emit_event(&session_id, &ChatEvent::Done).await;
        settle().await;

        assert_eq!(manager.session(&session_id).await.unwrap().title, "check disk usage");
        assert_eq!(backend.count(BackendOp::GenerateTitle).await, 1);

        let mut titled = false;
        while let Ok(notice) = notices.try_recv() {
            titled |= matches!(notice, ChatNotice::TitleChanged { .. });
        }
        assert!(titled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_confirm_without_pending_is_rejected() {
        let (_backend, manager) = manager();
        manager
            .set_context(ChatContext::tab(SERVER, TAB))
            .await
            .unwrap();
        manager.send("hi").await.unwrap();
        assert!(matches!(
            manager.confirm_tools().await,
            Err(ChatError::NothingPending(_))
        ));
        assert!(matches!(
            manager.cancel_tools().await,
            Err(ChatError::NothingPending(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_safe_tools_without_tab_abort_generation() {
        let (backend, manager) = manager();
        manager.set_context(ChatContext::server(SERVER)).await.unwrap();
        let session_id = manager.send("read it").await.unwrap();

        backend
            .emit_event(
                &session_id,
                &ChatEvent::ToolCalls {
                    calls: vec![ToolCall::new("r1", "read_file", "{\"path\":\"a\"}")],
                },
            )
            .await;
        settle().await;

        assert!(!manager.snapshot(&session_id).await.generating);
        assert_eq!(backend.count(BackendOp::ExecuteTools).await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_active_session_unsubscribes() {
        let (backend, manager) = manager();
        manager
            .set_context(ChatContext::tab(SERVER, TAB))
            .await
            .unwrap();
        let session_id = manager.send("hi").await.unwrap();
        manager.delete_session(&session_id).await.unwrap();
        settle().await;

        assert_eq!(manager.active_session_id().await, None);
        assert!(manager.messages(&session_id).await.is_empty());
        assert_eq!(backend.subscriber_count(&session_id).await, 0);
    }
}
