//! Event router: delivers the active session's backend events to a sink
//!
//! Exactly one session is subscribed at a time. Each subscription runs a pump
//! task that decodes envelopes and hands them to the sink in arrival order.
//! Unsubscribing cancels the pump's token: an event already received but not
//! yet dispatched is dropped rather than applied to a session the user left.

use super::traits::EventStream;
use super::types::ChatEvent;
use async_trait::async_trait;
use std::sync::Weak;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Receiver of decoded events
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn dispatch(&self, session_id: &str, event: ChatEvent);
}

#[derive(Debug)]
struct Subscription {
    session_id: String,
    cancel: CancellationToken,
}

#[derive(Debug, Default)]
pub struct EventRouter {
    current: Option<Subscription>,
}

impl EventRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Session whose events are currently routed
    pub fn session_id(&self) -> Option<&str> {
        self.current.as_ref().map(|sub| sub.session_id.as_str())
    }

    /// Route `stream` to `sink`, replacing any previous subscription.
    ///
    /// Returns the session that was unsubscribed, if any.
    pub fn subscribe(
        &mut self,
        session_id: &str,
        stream: EventStream,
        sink: Weak<dyn EventSink>,
    ) -> Option<String> {
        let previous = self.unsubscribe();
        let cancel = CancellationToken::new();
        tokio::spawn(pump(session_id.to_string(), stream, sink, cancel.clone()));
        debug!(session_id, "Subscribed to session events");
        self.current = Some(Subscription {
            session_id: session_id.to_string(),
            cancel,
        });
        previous
    }

    pub fn unsubscribe(&mut self) -> Option<String> {
        let sub = self.current.take()?;
        sub.cancel.cancel();
        debug!(session_id = %sub.session_id, "Unsubscribed from session events");
        Some(sub.session_id)
    }
}

impl Drop for EventRouter {
    fn drop(&mut self) {
        if let Some(sub) = self.current.take() {
            sub.cancel.cancel();
        }
    }
}

async fn pump(
    session_id: String,
    mut stream: EventStream,
    sink: Weak<dyn EventSink>,
    cancel: CancellationToken,
) {
    loop {
        let received = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            received = stream.recv() => received,
        };

        let envelope = match received {
            Ok(envelope) => envelope,
            Err(RecvError::Lagged(skipped)) => {
                warn!(%session_id, skipped, "Event stream lagged, events lost");
                continue;
            }
            Err(RecvError::Closed) => {
                debug!(%session_id, "Event stream closed");
                break;
            }
        };

        let event = match ChatEvent::decode(envelope) {
            Ok(event) => event,
            Err(e) => {
                warn!(%session_id, error = %e, "Dropping malformed chat event");
                continue;
            }
        };

        let Some(sink) = sink.upgrade() else {
            break;
        };
        if cancel.is_cancelled() {
            break;
        }
        sink.dispatch(&session_id, event).await;
    }
}
