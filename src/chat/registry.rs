//! Session registry: session lists, last-used lookups and the active session

use super::types::{ChatContext, Session, DEFAULT_SESSION_TITLE};
use std::collections::HashMap;

/// What the caller must do after the context changed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// The resolved session is already active
    Keep,
    Activate(String),
    /// Nothing to show for this context
    Clear,
}

#[derive(Debug, Default)]
pub struct SessionRegistry {
    /// Known sessions per server, newest first
    sessions: HashMap<String, Vec<Session>>,
    last_by_server: HashMap<String, String>,
    last_by_tab: HashMap<String, String>,
    context: Option<ChatContext>,
    active: Option<String>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn context(&self) -> Option<&ChatContext> {
        self.context.as_ref()
    }

    pub fn active(&self) -> Option<&str> {
        self.active.as_deref()
    }

    pub fn is_active(&self, session_id: &str) -> bool {
        self.active.as_deref() == Some(session_id)
    }

    pub fn sessions(&self, server_id: &str) -> &[Session] {
        self.sessions
            .get(server_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn session(&self, session_id: &str) -> Option<&Session> {
        self.sessions
            .values()
            .flatten()
            .find(|session| session.id == session_id)
    }

    fn session_mut(&mut self, session_id: &str) -> Option<&mut Session> {
        self.sessions
            .values_mut()
            .flatten()
            .find(|session| session.id == session_id)
    }

    /// Record a new context and work out which session it should show
    pub fn set_context(&mut self, context: ChatContext) -> Resolution {
        let resolved = self.resolve(&context);
        self.context = Some(context);
        match resolved {
            Some(id) if self.is_active(&id) => Resolution::Keep,
            Some(id) => Resolution::Activate(id),
            None if self.active.is_none() => Resolution::Keep,
            None => Resolution::Clear,
        }
    }

    /// Last session used in the context's tab, or on its server when there is
    /// no tab. A server-level session pinned to another tab is never borrowed.
    pub fn resolve(&self, context: &ChatContext) -> Option<String> {
        let belongs = |id: &&String| {
            self.session(id)
                .is_some_and(|session| session.server_id == context.server_id)
        };

        let Some(tab_id) = context.tab_id.as_deref() else {
            return self.last_by_server.get(&context.server_id).filter(belongs).cloned();
        };

        if let Some(id) = self.last_by_tab.get(tab_id).filter(belongs) {
            return Some(id.clone());
        }
        self.last_by_server
            .get(&context.server_id)
            .filter(belongs)
            .filter(|id| {
                self.session(id)
                    .is_some_and(|session| session.is_visible_in_tab(tab_id))
            })
            .cloned()
    }

    /// Make `session_id` active and remember it for its server and tab
    pub fn set_active(&mut self, session_id: Option<String>) {
        if let Some(id) = session_id.as_deref() {
            if let Some(session) = self.session(id) {
                let server_id = session.server_id.clone();
                let tab_id = session.bound_tab_id.clone().or_else(|| {
                    self.context
                        .as_ref()
                        .filter(|context| context.server_id == server_id)
                        .and_then(|context| context.tab_id.clone())
                });
                self.last_by_server.insert(server_id, id.to_string());
                if let Some(tab_id) = tab_id {
                    self.last_by_tab.insert(tab_id, id.to_string());
                }
            }
        }
        self.active = session_id;
    }

    /// Add or update a session, keeping newest-first order
    pub fn insert(&mut self, session: Session) {
        let list = self.sessions.entry(session.server_id.clone()).or_default();
        list.retain(|existing| existing.id != session.id);
        list.push(session);
        list.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    }

    /// Replace a server's list with the backend's, keeping the active session
    /// plus local titles and tab bindings the backend has not caught up with
    pub fn replace_server_sessions(&mut self, server_id: &str, mut fetched: Vec<Session>) {
        let previous = self.sessions.remove(server_id).unwrap_or_default();
        for local in previous {
            match fetched.iter_mut().find(|session| session.id == local.id) {
                Some(remote) => {
                    if remote.title == DEFAULT_SESSION_TITLE {
                        remote.title = local.title;
                    }
                    if remote.bound_tab_id.is_none() {
                        remote.bound_tab_id = local.bound_tab_id;
                    }
                }
                None if self.active.as_deref() == Some(local.id.as_str()) => fetched.push(local),
                None => {}
            }
        }
        fetched.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        self.sessions.insert(server_id.to_string(), fetched);
    }

    /// Pin an unbound session to a tab. Returns `true` if the binding changed.
    pub fn bind_tab(&mut self, session_id: &str, tab_id: &str) -> bool {
        let bound = match self.session_mut(session_id) {
            Some(session) if session.bound_tab_id.is_none() => {
                session.bound_tab_id = Some(tab_id.to_string());
                true
            }
            _ => false,
        };
        if bound {
            self.last_by_tab.insert(tab_id.to_string(), session_id.to_string());
        }
        bound
    }

    pub fn set_title(&mut self, session_id: &str, title: &str) -> bool {
        match self.session_mut(session_id) {
            Some(session) => {
                session.title = title.to_string();
                true
            }
            None => false,
        }
    }

    /// Forget a session everywhere it is referenced
    pub fn remove(&mut self, session_id: &str) -> Option<Session> {
        let mut removed = None;
        for list in self.sessions.values_mut() {
            if let Some(index) = list.iter().position(|session| session.id == session_id) {
                removed = Some(list.remove(index));
            }
        }
        self.last_by_server.retain(|_, id| id.as_str() != session_id);
        self.last_by_tab.retain(|_, id| id.as_str() != session_id);
        if self.is_active(session_id) {
            self.active = None;
        }
        removed
    }

    /// Forget every session of a server, returning their ids
    pub fn remove_server(&mut self, server_id: &str) -> Vec<String> {
        let ids: Vec<String> = self
            .sessions(server_id)
            .iter()
            .map(|session| session.id.clone())
            .collect();
        for id in &ids {
            self.remove(id);
        }
        ids
    }
}
