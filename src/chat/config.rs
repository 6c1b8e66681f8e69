//! Chat configuration

use super::types::{ChatMode, RequestProfile};
use std::time::Duration;

/// Configuration for the chat orchestration layer
#[derive(Debug, Clone)]
pub struct ChatConfig {
    /// How long streamed deltas are buffered before being written to the log
    pub flush_window: Duration,
    /// Number of countdown ticks before a non-sensitive batch auto-executes (0 disables)
    pub countdown_ticks: u32,
    /// Length of one countdown tick
    pub countdown_tick: Duration,
    /// Identical error notices inside this window are dropped
    pub error_dedup_window: Duration,
    /// Route `<think>` blocks in response text to reasoning
    pub split_think_tags: bool,
    pub default_model: String,
    pub default_channel: String,
    pub default_mode: ChatMode,
    /// Capacity of the notice broadcast channel
    pub notice_capacity: usize,
}

impl ChatConfig {
    /// Create config from environment variables, falling back to defaults
    pub fn from_env() -> Self {
        Self::defaults().with_env_overrides()
    }

    /// Replace every field whose `ASSISTANT_*` variable is set and parses
    pub fn with_env_overrides(self) -> Self {
        Self {
            flush_window: env_millis("ASSISTANT_FLUSH_WINDOW_MS").unwrap_or(self.flush_window),
            countdown_ticks: env_parse("ASSISTANT_COUNTDOWN_TICKS")
                .unwrap_or(self.countdown_ticks),
            countdown_tick: env_millis("ASSISTANT_COUNTDOWN_TICK_MS")
                .unwrap_or(self.countdown_tick),
            error_dedup_window: env_millis("ASSISTANT_ERROR_DEDUP_MS")
                .unwrap_or(self.error_dedup_window),
            split_think_tags: env_parse("ASSISTANT_SPLIT_THINK_TAGS")
                .unwrap_or(self.split_think_tags),
            default_model: std::env::var("ASSISTANT_DEFAULT_MODEL")
                .unwrap_or(self.default_model),
            default_channel: std::env::var("ASSISTANT_DEFAULT_CHANNEL")
                .unwrap_or(self.default_channel),
            default_mode: env_parse("ASSISTANT_DEFAULT_MODE").unwrap_or(self.default_mode),
            notice_capacity: env_parse::<usize>("ASSISTANT_NOTICE_CAPACITY")
                .filter(|capacity| *capacity > 0)
                .unwrap_or(self.notice_capacity),
        }
    }

    /// Built-in values, ignoring the environment
    pub fn defaults() -> Self {
        Self {
            flush_window: Duration::from_millis(33),
            countdown_ticks: 5,
            countdown_tick: Duration::from_secs(1),
            error_dedup_window: Duration::from_secs(3),
            split_think_tags: true,
            default_model: "gpt-4o-mini".into(),
            default_channel: "default".into(),
            default_mode: ChatMode::Agent,
            notice_capacity: 1024,
        }
    }

    /// Request profile used until the user picks another model or mode
    pub fn default_profile(&self) -> RequestProfile {
        RequestProfile {
            model_id: self.default_model.clone(),
            channel_id: self.default_channel.clone(),
            mode: self.default_mode,
        }
    }
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.parse().ok())
}

fn env_millis(name: &str) -> Option<Duration> {
    env_parse(name).map(Duration::from_millis)
}
