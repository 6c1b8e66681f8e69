//! Streaming coalescer for response and reasoning deltas.
//!
//! Deltas arrive far faster than anything downstream wants to observe them,
//! so text is accumulated per session and moved into the message store at
//! most once per flush window.
//!
//! ## Design
//!
//! The coalescer only does bookkeeping; the caller owns the clock:
//! 1. `push_response` / `push_reasoning` append to the session's buffers and
//!    return a [`FlushTicket`] when a timer must be scheduled. While a ticket
//!    is outstanding, further pushes return `None`.
//! 2. When the timer fires, `take_scheduled(ticket)` hands back the buffered
//!    text if the ticket is still current.
//! 3. `take_all` forces a flush mid-turn (teardown, reasoning end, tool
//!    calls). It also invalidates the outstanding ticket, so a late timer
//!    does nothing.
//! 4. `finish_turn` is `take_all` at a turn boundary (completion, error,
//!    stop, next send). It also resets the think-tag splitter.

use super::think::{Segment, ThinkTagSplitter};
use std::collections::HashMap;

/// Identifies one scheduled flush of one session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlushTicket {
    pub session_id: String,
    generation: u64,
}

/// Text drained from a session's buffers
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Flushed {
    pub response: String,
    pub reasoning: String,
}

impl Flushed {
    pub fn is_empty(&self) -> bool {
        self.response.is_empty() && self.reasoning.is_empty()
    }
}

#[derive(Debug, Default)]
struct StreamBuffer {
    response: String,
    reasoning: String,
    think: ThinkTagSplitter,
    scheduled: Option<u64>,
}

impl StreamBuffer {
    fn has_text(&self) -> bool {
        !self.response.is_empty() || !self.reasoning.is_empty()
    }

    fn apply(&mut self, segment: Segment) {
        match segment {
            Segment::Response(text) => self.response.push_str(&text),
            Segment::Reasoning(text) => self.reasoning.push_str(&text),
        }
    }

    fn drain(&mut self) -> Flushed {
        Flushed {
            response: std::mem::take(&mut self.response),
            reasoning: std::mem::take(&mut self.reasoning),
        }
    }
}

#[derive(Debug)]
pub struct StreamCoalescer {
    buffers: HashMap<String, StreamBuffer>,
    split_think_tags: bool,
    next_generation: u64,
}

impl StreamCoalescer {
    pub fn new(split_think_tags: bool) -> Self {
        Self {
            buffers: HashMap::new(),
            split_think_tags,
            next_generation: 0,
        }
    }

    pub fn push_response(&mut self, session_id: &str, text: &str) -> Option<FlushTicket> {
        let split = self.split_think_tags;
        let buffer = self.buffer_mut(session_id);
        if split {
            for segment in buffer.think.push(text) {
                buffer.apply(segment);
            }
        } else {
            buffer.response.push_str(text);
        }
        self.schedule(session_id)
    }

    pub fn push_reasoning(&mut self, session_id: &str, text: &str) -> Option<FlushTicket> {
        self.buffer_mut(session_id).reasoning.push_str(text);
        self.schedule(session_id)
    }

    /// Drain the buffers for a timer that fired, if it is still the current one
    pub fn take_scheduled(&mut self, ticket: &FlushTicket) -> Option<Flushed> {
        let buffer = self.buffers.get_mut(&ticket.session_id)?;
        if buffer.scheduled != Some(ticket.generation) {
            return None;
        }
        buffer.scheduled = None;
        Some(buffer.drain()).filter(|flushed| !flushed.is_empty())
    }

    /// Drain everything now, including text held back by the think splitter
    pub fn take_all(&mut self, session_id: &str) -> Option<Flushed> {
        let buffer = self.buffers.get_mut(session_id)?;
        buffer.scheduled = None;
        if let Some(segment) = buffer.think.finish() {
            buffer.apply(segment);
        }
        Some(buffer.drain()).filter(|flushed| !flushed.is_empty())
    }

    /// Drain everything at the end of a turn and forget the session's
    /// think-tag state, so an unclosed `<think>` does not swallow the next turn
    pub fn finish_turn(&mut self, session_id: &str) -> Option<Flushed> {
        let flushed = self.take_all(session_id);
        self.buffers.remove(session_id);
        flushed
    }

    pub fn has_pending_flush(&self, session_id: &str) -> bool {
        self.buffers
            .get(session_id)
            .is_some_and(|buffer| buffer.scheduled.is_some())
    }

    pub fn discard(&mut self, session_id: &str) {
        self.buffers.remove(session_id);
    }

    fn buffer_mut(&mut self, session_id: &str) -> &mut StreamBuffer {
        self.buffers.entry(session_id.to_string()).or_default()
    }

    fn schedule(&mut self, session_id: &str) -> Option<FlushTicket> {
        let generation = self.next_generation;
        let buffer = self.buffers.get_mut(session_id)?;
        if buffer.scheduled.is_some() || !buffer.has_text() {
            return None;
        }
        buffer.scheduled = Some(generation);
        self.next_generation += 1;
        Some(FlushTicket {
            session_id: session_id.to_string(),
            generation,
        })
    }
}
