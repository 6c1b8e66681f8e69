//! Notices emitted to observers of the chat state

use serde::{Deserialize, Serialize};

/// Something observers of the chat layer may want to re-render
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatNotice {
    /// A server's session list changed
    SessionsChanged { server_id: String },
    ActiveSessionChanged {
        #[serde(default)]
        session_id: Option<String>,
    },
    /// New content reached a session's message log
    MessagesChanged { session_id: String },
    /// `generating`, `stopped`, pending tool calls or the countdown changed
    StateChanged { session_id: String },
    TitleChanged { session_id: String, title: String },
    /// User-visible error, already de-duplicated
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
        message: String,
    },
}

impl ChatNotice {
    pub fn notice_type(&self) -> &'static str {
        match self {
            ChatNotice::SessionsChanged { .. } => "sessions_changed",
            ChatNotice::ActiveSessionChanged { .. } => "active_session_changed",
            ChatNotice::MessagesChanged { .. } => "messages_changed",
            ChatNotice::StateChanged { .. } => "state_changed",
            ChatNotice::TitleChanged { .. } => "title_changed",
            ChatNotice::Error { .. } => "error",
        }
    }

    pub fn session_id(&self) -> Option<&str> {
        match self {
            ChatNotice::SessionsChanged { .. } => None,
            ChatNotice::ActiveSessionChanged { session_id }
            | ChatNotice::Error { session_id, .. } => session_id.as_deref(),
            ChatNotice::MessagesChanged { session_id }
            | ChatNotice::StateChanged { session_id }
            | ChatNotice::TitleChanged { session_id, .. } => Some(session_id),
        }
    }
}

/// Fire-and-forget sink for notices
pub trait EventEmitter: Send + Sync {
    fn emit(&self, notice: ChatNotice);

    fn emit_messages_changed(&self, session_id: &str) {
        self.emit(ChatNotice::MessagesChanged {
            session_id: session_id.to_string(),
        });
    }

    fn emit_state_changed(&self, session_id: &str) {
        self.emit(ChatNotice::StateChanged {
            session_id: session_id.to_string(),
        });
    }

    fn emit_sessions_changed(&self, server_id: &str) {
        self.emit(ChatNotice::SessionsChanged {
            server_id: server_id.to_string(),
        });
    }

    fn emit_error(&self, session_id: Option<&str>, message: impl Into<String>)
    where
        Self: Sized,
    {
        self.emit(ChatNotice::Error {
            session_id: session_id.map(str::to_string),
            message: message.into(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notice_serialization_is_tagged() {
        let notice = ChatNotice::TitleChanged {
            session_id: "s1".into(),
            title: "Disk usage".into(),
        };
        let json = serde_json::to_value(&notice).unwrap();
        assert_eq!(json["type"], "title_changed");
        assert_eq!(json["title"], "Disk usage");

        let back: ChatNotice = serde_json::from_value(json).unwrap();
        assert_eq!(back, notice);
    }

    #[test]
    fn test_error_without_session_omits_field() {
        let notice = ChatNotice::Error {
            session_id: None,
            message: "boom".into(),
        };
        let json = serde_json::to_value(&notice).unwrap();
        assert!(json.get("session_id").is_none());
        assert_eq!(notice.session_id(), None);
        assert_eq!(notice.notice_type(), "error");
    }
}
