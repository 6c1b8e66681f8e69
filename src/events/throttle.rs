//! Suppress repeated identical error notices

use std::time::Duration;
use tokio::time::Instant;

/// Drops an error whose text matches the previous one within `window`.
///
/// Uses tokio's clock so paused-time tests can drive it.
#[derive(Debug)]
pub struct ErrorThrottle {
    window: Duration,
    last: Option<(String, Instant)>,
}

impl ErrorThrottle {
    pub fn new(window: Duration) -> Self {
        Self { window, last: None }
    }

    /// Returns `true` if the message should be shown
    pub fn admit(&mut self, message: &str) -> bool {
        let now = Instant::now();
        if let Some((last_message, at)) = &self.last {
            if last_message == message && now.duration_since(*at) < self.window {
                return false;
            }
        }
        self.last = Some((message.to_string(), now));
        true
    }
}
