//! Assistant Orchestrator
//!
//! Client-side orchestration for an AI assistant embedded in a multi-tab
//! terminal:
//! - Per-tab chat sessions with restore-on-switch
//! - Coalesced streaming of response and reasoning deltas
//! - Safety classification and confirmation of model tool calls
//! - Scenario replay against an in-memory backend

pub mod chat;
pub mod events;
pub mod replay;

use anyhow::Result;
use chat::{ChatConfig, ChatMode};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Log filter used when neither `RUST_LOG` nor the config file sets one
pub const DEFAULT_LOG_FILTER: &str = "info,assistant_orchestrator=debug";

// ============================================================================
// YAML config structs (deserialization targets)
// ============================================================================

/// Top-level YAML configuration file structure
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub chat: ChatYamlConfig,
    pub logging: LoggingYamlConfig,
}

/// Chat configuration section (YAML only, `ChatConfig` in chat/config.rs handles env and defaults)
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ChatYamlConfig {
    pub flush_window_ms: Option<u64>,
    pub countdown_ticks: Option<u32>,
    pub countdown_tick_ms: Option<u64>,
    pub error_dedup_ms: Option<u64>,
    pub split_think_tags: Option<bool>,
    pub default_model: Option<String>,
    pub default_channel: Option<String>,
    pub default_mode: Option<ChatMode>,
    pub notice_capacity: Option<usize>,
}

impl ChatYamlConfig {
    /// Apply the values present in the file on top of `base`
    fn apply(self, base: ChatConfig) -> ChatConfig {
        ChatConfig {
            flush_window: self
                .flush_window_ms
                .map_or(base.flush_window, Duration::from_millis),
            countdown_ticks: self.countdown_ticks.unwrap_or(base.countdown_ticks),
            countdown_tick: self
                .countdown_tick_ms
                .map_or(base.countdown_tick, Duration::from_millis),
            error_dedup_window: self
                .error_dedup_ms
                .map_or(base.error_dedup_window, Duration::from_millis),
            split_think_tags: self.split_think_tags.unwrap_or(base.split_think_tags),
            default_model: self.default_model.unwrap_or(base.default_model),
            default_channel: self.default_channel.unwrap_or(base.default_channel),
            default_mode: self.default_mode.unwrap_or(base.default_mode),
            notice_capacity: self
                .notice_capacity
                .filter(|capacity| *capacity > 0)
                .unwrap_or(base.notice_capacity),
        }
    }
}

/// Logging configuration section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingYamlConfig {
    /// `tracing_subscriber::EnvFilter` directives
    pub filter: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LoggingYamlConfig {
    fn default() -> Self {
        Self {
            filter: DEFAULT_LOG_FILTER.into(),
            json: false,
        }
    }
}

// ============================================================================
// Runtime config (what the application actually uses)
// ============================================================================

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub chat: ChatConfig,
    pub log_filter: String,
    pub log_json: bool,
}

impl Config {
    /// Load configuration from environment variables only.
    /// Equivalent to from_yaml_and_env(None).
    pub fn from_env() -> Result<Self> {
        Self::from_yaml_and_env(None)
    }

    /// Load configuration from an optional YAML file, then override with env vars.
    ///
    /// Priority: env var > YAML > default
    ///
    /// If `yaml_path` is None, tries "config.yaml" in CWD. If the file doesn't
    /// exist, falls back to pure env var / defaults.
    pub fn from_yaml_and_env(yaml_path: Option<&Path>) -> Result<Self> {
        // 1. Load YAML config (or defaults if file not found)
        let yaml = Self::load_yaml(yaml_path);

        // 2. Layer env var overrides on top
        Ok(Self {
            chat: yaml.chat.apply(ChatConfig::defaults()).with_env_overrides(),
            log_filter: std::env::var("ASSISTANT_LOG_FILTER").unwrap_or(yaml.logging.filter),
            log_json: std::env::var("ASSISTANT_LOG_JSON")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(yaml.logging.json),
        })
    }

    /// Try to load and parse a YAML config file. Returns defaults on any failure.
    fn load_yaml(yaml_path: Option<&Path>) -> YamlConfig {
        let default_path = Path::new("config.yaml");
        let path = yaml_path.unwrap_or(default_path);

        match std::fs::read_to_string(path) {
            Ok(contents) => match serde_yaml::from_str(&contents) {
                Ok(config) => {
                    tracing::info!("Loaded config from {}", path.display());
                    config
                }
                Err(e) => {
                    tracing::warn!("Failed to parse {}: {}. Using defaults.", path.display(), e);
                    YamlConfig::default()
                }
            },
            Err(_) => {
                tracing::debug!(
                    "No config file at {}, using env vars / defaults",
                    path.display()
                );
                YamlConfig::default()
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
