//! Chat module: orchestration of assistant conversations per terminal tab
//!
//! Keeps every session's message log and derived state consistent while
//! backend events stream in, tool calls wait for confirmation, and the user
//! moves between tabs.

pub mod coalescer;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod manager;
pub mod mock;
pub mod optimistic;
pub mod registry;
pub mod router;
pub mod safety;
pub mod state;
pub mod store;
pub mod think;
pub mod traits;
pub mod types;

pub use config::ChatConfig;
pub use error::ChatError;
pub use manager::ChatManager;
pub use mock::{BackendCall, BackendOp, MockChatBackend};
pub use traits::{ChatBackend, EventStream};
pub use types::{
    ChatContext, ChatEvent, ChatMode, Message, RequestProfile, Role, Session, SessionSnapshot,
    ToolCall, TurnRequest,
};
