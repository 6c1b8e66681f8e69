//! Conversation state container
//!
//! [`ChatState`] owns every piece of per-session state and exposes one
//! synchronous transition per thing that can happen to a session. It never
//! awaits: the manager locks it, applies a transition, releases it, and only
//! then talks to the backend or arms timers using the tickets it got back.

use super::coalescer::{FlushTicket, Flushed, StreamCoalescer};
use super::config::ChatConfig;
use super::error::ChatError;
use super::lifecycle::{evaluate_batch, BatchDecision, TickOutcome, ToolConfirmation};
use super::optimistic::reconcile;
use super::registry::SessionRegistry;
use super::store::MessageStore;
use super::types::{normalize_tool_calls, Message, Session, SessionSnapshot, ToolCall};
use std::collections::HashMap;
use tracing::debug;

/// Derived flags of one session
#[derive(Debug, Clone, Default)]
pub struct SessionFlags {
    pub generating: bool,
    /// Set by stop or cancel; blocks pending confirmations from coming back
    pub stopped: bool,
    confirmation: Option<ToolConfirmation>,
    /// Freshly created session that has not been titled yet
    awaiting_title: bool,
}

impl SessionFlags {
    pub fn confirmation(&self) -> Option<&ToolConfirmation> {
        self.confirmation.as_ref()
    }

    pub fn pending_tool_calls(&self) -> Option<&[ToolCall]> {
        self.confirmation
            .as_ref()
            .filter(|confirmation| confirmation.is_pending())
            .map(ToolConfirmation::calls)
    }
}

/// Identifies one run of a batch's auto-execute countdown
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CountdownTicket {
    pub session_id: String,
    pub batch_id: u64,
    run: u64,
}

/// Outcome of a tool-call batch arriving from the backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolProposal {
    /// Empty batch, or the session was stopped: nothing to run or ask
    Ignored,
    AutoExecute { tool_call_ids: Vec<String> },
    AwaitConfirmation {
        batch_id: u64,
        countdown: Option<CountdownTicket>,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StopOutcome {
    pub was_generating: bool,
    pub had_pending: bool,
    pub title_due: bool,
}

impl StopOutcome {
    pub fn is_noop(&self) -> bool {
        !self.was_generating && !self.had_pending
    }
}

#[derive(Debug)]
pub struct ChatState {
    store: MessageStore,
    flags: HashMap<String, SessionFlags>,
    coalescer: StreamCoalescer,
    registry: SessionRegistry,
    countdown_ticks: u32,
    next_batch_id: u64,
    next_run: u64,
}

impl ChatState {
    pub fn new(config: &ChatConfig) -> Self {
        Self {
            store: MessageStore::new(),
            flags: HashMap::new(),
            coalescer: StreamCoalescer::new(config.split_think_tags),
            registry: SessionRegistry::new(),
            countdown_ticks: config.countdown_ticks,
            next_batch_id: 1,
            next_run: 1,
        }
    }

    // ========================================================================
    // Read access
    // ========================================================================

    pub fn store(&self) -> &MessageStore {
        &self.store
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut SessionRegistry {
        &mut self.registry
    }

    pub fn messages(&self, session_id: &str) -> &[Message] {
        self.store.messages(session_id)
    }

    pub fn flags(&self, session_id: &str) -> Option<&SessionFlags> {
        self.flags.get(session_id)
    }

    pub fn is_generating(&self, session_id: &str) -> bool {
        self.flags
            .get(session_id)
            .is_some_and(|flags| flags.generating)
    }

    pub fn snapshot(&self, session_id: &str) -> SessionSnapshot {
        let flags = self.flags.get(session_id);
        let pending = flags
            .and_then(SessionFlags::confirmation)
            .filter(|confirmation| confirmation.is_pending());
        SessionSnapshot {
            session_id: session_id.to_string(),
            generating: flags.is_some_and(|f| f.generating),
            stopped: flags.is_some_and(|f| f.stopped),
            pending_tool_calls: pending.map(|confirmation| confirmation.calls().to_vec()),
            sensitive: pending.is_some_and(|c| c.sensitivity().is_sensitive()),
            countdown: pending.and_then(ToolConfirmation::remaining),
            message_count: self.store.len(session_id),
        }
    }

    // ========================================================================
    // User actions
    // ========================================================================

    /// Track a session. Fresh sessions get a title after their first turn.
    pub fn register_session(&mut self, session: Session, fresh: bool) {
        let session_id = session.id.clone();
        self.registry.insert(session);
        let flags = self.flags_mut(&session_id);
        flags.awaiting_title |= fresh;
    }

    /// Append the optimistic user message and enter `generating`
    pub fn begin_user_turn(&mut self, session_id: &str, content: &str) -> Result<(), ChatError> {
        if self.is_generating(session_id) {
            return Err(ChatError::Busy(session_id.to_string()));
        }
        self.close_stream(session_id);
        self.store.append(session_id, Message::user(content));
        self.enter_generating(session_id);
        Ok(())
    }

    /// Drop the latest assistant turn so it can be generated again.
    ///
    /// Returns `false` (and changes nothing) when the log does not end with one.
    pub fn begin_regenerate(&mut self, session_id: &str) -> Result<bool, ChatError> {
        if self.is_generating(session_id) {
            return Err(ChatError::Busy(session_id.to_string()));
        }
        self.close_stream(session_id);
        if self.store.remove_latest_assistant_turn(session_id).is_none() {
            return Ok(false);
        }
        self.enter_generating(session_id);
        Ok(true)
    }

    /// Confirm the pending batch (or only `batch_id`, when given)
    pub fn confirm_tools(&mut self, session_id: &str, batch_id: Option<u64>) -> Option<Vec<String>> {
        let flags = self.flags.get_mut(session_id)?;
        let confirmation = flags.confirmation.as_mut()?;
        if batch_id.is_some_and(|id| id != confirmation.batch_id()) {
            return None;
        }
        let ids = confirmation.confirm()?;
        flags.generating = true;
        flags.stopped = false;
        Some(ids)
    }

    pub fn cancel_tools(&mut self, session_id: &str) -> bool {
        let Some(flags) = self.flags.get_mut(session_id) else {
            return false;
        };
        if !flags.confirmation.as_mut().is_some_and(|c| c.cancel()) {
            return false;
        }
        flags.generating = false;
        flags.stopped = true;
        true
    }

    pub fn stop(&mut self, session_id: &str) -> StopOutcome {
        self.close_stream(session_id);
        let flags = self.flags_mut(session_id);
        let was_generating = flags.generating;
        let had_pending = flags.confirmation.as_mut().is_some_and(|c| c.cancel());
        if !was_generating && !had_pending {
            return StopOutcome::default();
        }
        flags.generating = false;
        flags.stopped = true;
        StopOutcome {
            was_generating,
            had_pending,
            title_due: self.take_title_due(session_id),
        }
    }

    /// A request could not be dispatched: leave `generating`
    pub fn abort_generation(&mut self, session_id: &str) {
        self.flags_mut(session_id).generating = false;
    }

    // ========================================================================
    // Backend events
    // ========================================================================

    pub fn start_turn(&mut self, session_id: &str, model_id: Option<String>) -> bool {
        if self.is_halted(session_id) {
            return false;
        }
        self.store.start_assistant_turn(session_id, model_id)
    }

    /// Buffer response text. Text arriving after a stop is dropped.
    pub fn push_response(&mut self, session_id: &str, text: &str) -> Option<FlushTicket> {
        if self.is_halted(session_id) {
            debug!(session_id, "Dropping response text after stop");
            return None;
        }
        self.coalescer.push_response(session_id, text)
    }

    pub fn push_reasoning(&mut self, session_id: &str, text: &str) -> Option<FlushTicket> {
        if self.is_halted(session_id) {
            debug!(session_id, "Dropping reasoning text after stop");
            return None;
        }
        self.coalescer.push_reasoning(session_id, text)
    }

    /// Apply a scheduled flush. Stale tickets are ignored.
    pub fn flush_scheduled(&mut self, ticket: &FlushTicket) -> bool {
        match self.coalescer.take_scheduled(ticket) {
            Some(flushed) => {
                self.apply_flushed(&ticket.session_id, flushed);
                true
            }
            None => false,
        }
    }

    /// Move everything buffered for the session into its log
    pub fn flush_now(&mut self, session_id: &str) -> bool {
        match self.coalescer.take_all(session_id) {
            Some(flushed) => {
                self.apply_flushed(session_id, flushed);
                true
            }
            None => false,
        }
    }

    pub fn propose_tools(&mut self, session_id: &str, calls: Vec<ToolCall>) -> ToolProposal {
        let calls = normalize_tool_calls(calls);
        if calls.is_empty() {
            return ToolProposal::Ignored;
        }
        self.flush_now(session_id);
        self.store.attach_tool_calls(session_id, calls.clone());
        if self.flags_mut(session_id).stopped {
            return ToolProposal::Ignored;
        }

        match evaluate_batch(&calls) {
            BatchDecision::AutoExecute => {
                self.enter_generating(session_id);
                ToolProposal::AutoExecute {
                    tool_call_ids: calls.into_iter().map(|call| call.id).collect(),
                }
            }
            BatchDecision::Confirm(sensitivity) => {
                let batch_id = self.next_batch_id();
                let confirmation =
                    ToolConfirmation::new(batch_id, calls, sensitivity, self.countdown_ticks);
                let flags = self.flags_mut(session_id);
                flags.generating = false;
                flags.confirmation = Some(confirmation);
                ToolProposal::AwaitConfirmation {
                    batch_id,
                    countdown: self.start_countdown(session_id),
                }
            }
        }
    }

    pub fn append_batch(&mut self, session_id: &str, messages: Vec<Message>) {
        self.flush_now(session_id);
        self.store.append_batch(session_id, messages);
    }

    /// The turn completed. Returns `true` when the session should now be titled.
    pub fn finish_turn(&mut self, session_id: &str) -> bool {
        self.close_stream(session_id);
        self.flags_mut(session_id).generating = false;
        self.take_title_due(session_id)
    }

    /// The backend reported an error. Partial output is kept.
    pub fn fail_turn(&mut self, session_id: &str) {
        self.close_stream(session_id);
        let flags = self.flags_mut(session_id);
        flags.generating = false;
        if let Some(confirmation) = flags.confirmation.as_mut() {
            confirmation.cancel();
        }
    }

    pub fn countdown_tick(&mut self, ticket: &CountdownTicket) -> TickOutcome {
        self.flags
            .get_mut(&ticket.session_id)
            .and_then(|flags| flags.confirmation.as_mut())
            .filter(|confirmation| confirmation.batch_id() == ticket.batch_id)
            .map_or(TickOutcome::Stale, |confirmation| confirmation.tick(ticket.run))
    }

    // ========================================================================
    // Session switching
    // ========================================================================

    /// The session is no longer shown: flush its buffers and pause its countdown
    pub fn teardown(&mut self, session_id: &str) -> bool {
        let flushed = self.flush_now(session_id);
        if let Some(confirmation) = self
            .flags
            .get_mut(session_id)
            .and_then(|flags| flags.confirmation.as_mut())
        {
            confirmation.pause_countdown();
        }
        flushed
    }

    /// Merge a reloaded log, bring back an interrupted confirmation and resume
    /// its countdown.
    ///
    /// `authoritative` is `None` when the reload failed; the local log is kept.
    /// A turn that was streaming when the session was left is settled when the
    /// backend has persisted its answer meanwhile. A turn still streaming keeps
    /// its local log.
    pub fn restore(
        &mut self,
        session_id: &str,
        authoritative: Option<Vec<Message>>,
    ) -> Option<CountdownTicket> {
        self.flush_now(session_id);
        if let Some(authoritative) = authoritative {
            if self.is_generating(session_id)
                && answered_remotely(self.store.messages(session_id), &authoritative)
            {
                debug!(session_id, "Turn finished while the session was not shown");
                self.close_stream(session_id);
                self.flags_mut(session_id).generating = false;
            }
            let streaming = self.is_generating(session_id)
                && self.store.last(session_id).is_some_and(Message::is_assistant);
            if !streaming {
                let merged = reconcile(self.store.messages(session_id), authoritative);
                self.store.replace(session_id, merged);
            }
        }
        self.reinstate_pending(session_id);
        self.start_countdown(session_id)
    }

    pub fn purge(&mut self, session_id: &str) {
        self.store.remove(session_id);
        self.flags.remove(session_id);
        self.coalescer.discard(session_id);
        self.registry.remove(session_id);
    }

    pub fn purge_server(&mut self, server_id: &str) -> Vec<String> {
        let ids = self.registry.remove_server(server_id);
        for id in &ids {
            self.purge(id);
        }
        ids
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn flags_mut(&mut self, session_id: &str) -> &mut SessionFlags {
        self.flags.entry(session_id.to_string()).or_default()
    }

    /// Stopped or cancelled and not restarted since
    fn is_halted(&self, session_id: &str) -> bool {
        self.flags
            .get(session_id)
            .is_some_and(|flags| flags.stopped && !flags.generating)
    }

    /// Flush at a turn boundary. The next turn starts outside any think block.
    fn close_stream(&mut self, session_id: &str) -> bool {
        match self.coalescer.finish_turn(session_id) {
            Some(flushed) => {
                self.apply_flushed(session_id, flushed);
                true
            }
            None => false,
        }
    }

    fn next_batch_id(&mut self) -> u64 {
        let id = self.next_batch_id;
        self.next_batch_id += 1;
        id
    }

    fn enter_generating(&mut self, session_id: &str) {
        let flags = self.flags_mut(session_id);
        if let Some(confirmation) = flags.confirmation.as_mut() {
            confirmation.cancel();
        }
        flags.generating = true;
        flags.stopped = false;
    }

    fn apply_flushed(&mut self, session_id: &str, flushed: Flushed) {
        self.store
            .append_reasoning_delta(session_id, &flushed.reasoning);
        self.store.append_response_delta(session_id, &flushed.response);
    }

    fn start_countdown(&mut self, session_id: &str) -> Option<CountdownTicket> {
        let run = self.next_run;
        let confirmation = self.flags.get_mut(session_id)?.confirmation.as_mut()?;
        if !confirmation.start_countdown(run) {
            return None;
        }
        let batch_id = confirmation.batch_id();
        self.next_run += 1;
        Some(CountdownTicket {
            session_id: session_id.to_string(),
            batch_id,
            run,
        })
    }

    /// Rebuild the pending confirmation from the last message after a reload
    fn reinstate_pending(&mut self, session_id: &str) {
        let flags = self.flags.get(session_id).cloned().unwrap_or_default();
        if flags.stopped || flags.generating || flags.pending_tool_calls().is_some() {
            return;
        }
        let Some(calls) = self
            .store
            .last(session_id)
            .filter(|message| message.is_assistant())
            .map(|message| message.tool_calls().to_vec())
        else {
            return;
        };
        if calls.is_empty()
            || flags
                .confirmation()
                .is_some_and(|confirmation| confirmation.covers(&calls))
        {
            return;
        }
        let BatchDecision::Confirm(sensitivity) = evaluate_batch(&calls) else {
            return;
        };
        let batch_id = self.next_batch_id();
        let confirmation = ToolConfirmation::new(batch_id, calls, sensitivity, self.countdown_ticks);
        self.flags_mut(session_id).confirmation = Some(confirmation);
    }

    fn take_title_due(&mut self, session_id: &str) -> bool {
        let messages = self.store.messages(session_id);
        let answered = messages.iter().any(Message::is_user)
            && messages.iter().any(Message::is_assistant);
        let flags = self.flags_mut(session_id);
        if flags.awaiting_title && answered {
            flags.awaiting_title = false;
            true
        } else {
            false
        }
    }
}

/// The backend persisted an answer to the latest local user message.
///
/// Assistant turns are persisted when they complete, so such a log means the
/// turn is over even if its completion event was never seen.
fn answered_remotely(local: &[Message], authoritative: &[Message]) -> bool {
    let users = |log: &[Message]| log.iter().filter(|message| message.is_user()).count();
    authoritative.last().is_some_and(Message::is_assistant)
        && users(authoritative) >= users(local)
}
