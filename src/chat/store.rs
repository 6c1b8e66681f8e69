//! Per-session message logs

use super::types::{Message, ToolCall};
use std::collections::HashMap;

/// Ordered message logs keyed by session id.
///
/// Logs are append-only apart from the explicit removal of the latest
/// assistant turn and the wholesale replacement done on reload.
#[derive(Debug, Default)]
pub struct MessageStore {
    logs: HashMap<String, Vec<Message>>,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self, session_id: &str) -> &[Message] {
        self.logs.get(session_id).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn last(&self, session_id: &str) -> Option<&Message> {
        self.messages(session_id).last()
    }

    pub fn len(&self, session_id: &str) -> usize {
        self.messages(session_id).len()
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.logs.contains_key(session_id)
    }

    pub fn append(&mut self, session_id: &str, message: Message) {
        self.log_mut(session_id).push(message);
    }

    /// Append each message as its own entry, in order
    pub fn append_batch(&mut self, session_id: &str, messages: Vec<Message>) {
        self.log_mut(session_id).extend(messages);
    }

    /// Open an assistant turn unless one is already waiting for content.
    ///
    /// Returns `true` when a placeholder was appended.
    pub fn start_assistant_turn(&mut self, session_id: &str, model_id: Option<String>) -> bool {
        let log = self.log_mut(session_id);
        if let Some(last) = log.last_mut().filter(|last| last.is_placeholder()) {
            if last.model_id.is_none() {
                last.model_id = model_id;
            }
            return false;
        }
        log.push(Message::placeholder(model_id));
        true
    }

    pub fn append_response_delta(&mut self, session_id: &str, text: &str) {
        if text.is_empty() {
            return;
        }
        self.streaming_turn(session_id).content.push_str(text);
    }

    pub fn append_reasoning_delta(&mut self, session_id: &str, text: &str) {
        if text.is_empty() {
            return;
        }
        self.streaming_turn(session_id)
            .reasoning_content
            .get_or_insert_with(String::new)
            .push_str(text);
    }

    /// Replace the tool calls of the most recent assistant turn
    pub fn attach_tool_calls(&mut self, session_id: &str, calls: Vec<ToolCall>) {
        self.streaming_turn(session_id).tool_calls = Some(calls);
    }

    /// Drop the last message if, and only if, it is an assistant turn
    pub fn remove_latest_assistant_turn(&mut self, session_id: &str) -> Option<Message> {
        let log = self.logs.get_mut(session_id)?;
        if log.last().is_some_and(Message::is_assistant) {
            log.pop()
        } else {
            None
        }
    }

    /// Swap in a reloaded log
    pub fn replace(&mut self, session_id: &str, messages: Vec<Message>) {
        self.logs.insert(session_id.to_string(), messages);
    }

    pub fn remove(&mut self, session_id: &str) -> Option<Vec<Message>> {
        self.logs.remove(session_id)
    }

    fn log_mut(&mut self, session_id: &str) -> &mut Vec<Message> {
        self.logs.entry(session_id.to_string()).or_default()
    }

    /// The assistant message deltas go into, synthesized when the log does not end with one
    fn streaming_turn(&mut self, session_id: &str) -> &mut Message {
        let log = self.log_mut(session_id);
        if !log.last().is_some_and(Message::is_assistant) {
            log.push(Message::placeholder(None));
        }
        let index = log.len() - 1;
        &mut log[index]
    }
}
