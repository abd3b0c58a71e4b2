//! Chat sessions and their storage
//!
//! Session ids are normalized (trimmed, lowercased) and hardened against
//! path traversal before they reach a store, so a store backed by files or
//! keys can use them directly.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use llmgate_core::{ChatMessage, ErrorKind};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Longer ids are rejected rather than truncated
const MAX_SESSION_ID_LEN: usize = 128;

/// Maximum number of sessions kept in memory
pub const MAX_SESSIONS: usize = 1000;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("invalid session id: {0}")]
    InvalidId(&'static str),
    #[error("maximum number of sessions ({0}) reached")]
    LimitReached(usize),
}

impl SessionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidId(_) => ErrorKind::InvalidRequest,
            Self::LimitReached(_) => ErrorKind::SessionLimitReached,
        }
    }
}

/// A conversation and everything said in it so far
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatSession {
    pub id: String,
    pub messages: Vec<ChatMessage>,
    pub created_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
    /// Provider and model that answered the latest turn
    pub provider: Option<String>,
    pub model: Option<String>,
}

impl ChatSession {
    pub fn new(id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            messages: Vec::new(),
            created_at: now,
            last_active_at: now,
            provider: None,
            model: None,
        }
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            id: self.id.clone(),
            message_count: self.messages.len(),
            last_active_at: self.last_active_at,
            provider: self.provider.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: String,
    pub message_count: usize,
    pub last_active_at: DateTime<Utc>,
    pub provider: Option<String>,
}

/// Normalize a session id: lowercase, trim whitespace, reject path traversal
pub fn normalize_session_id(id: &str) -> Result<String, SessionError> {
    let normalized = id.trim().to_ascii_lowercase();

    match normalized.len() {
        0 => return Err(SessionError::InvalidId("session id cannot be empty")),
        n if n > MAX_SESSION_ID_LEN => return Err(SessionError::InvalidId("session id too long")),
        _ => {}
    }
    let allowed = |c: char| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':' | '@');
    if !normalized.chars().all(allowed) || normalized.contains("..") {
        return Err(SessionError::InvalidId(
            "session id may only contain letters, digits and - _ . : @",
        ));
    }

    Ok(normalized)
}

/// Where sessions live between turns. Ids passed in are already normalized.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn load(&self, id: &str) -> Option<ChatSession>;
    /// Fails if `id` is new and the store has no room for it. Runs before
    /// a turn is dispatched; `save` still enforces the bound.
    async fn check_capacity(&self, _id: &str) -> Result<(), SessionError> {
        Ok(())
    }
    async fn save(&self, session: ChatSession) -> Result<(), SessionError>;
    async fn delete(&self, id: &str) -> bool;
    /// Most recently active first
    async fn list(&self) -> Vec<SessionSummary>;
    /// Drop sessions idle for longer than `ttl`, returning the removed ids
    async fn evict_idle(&self, ttl: Duration) -> Vec<String>;
}

/// Process-local store; contents are lost on restart
pub struct InMemorySessionStore {
    sessions: Arc<RwLock<HashMap<String, ChatSession>>>,
    max_sessions: usize,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::with_capacity(MAX_SESSIONS)
    }

    pub fn with_capacity(max_sessions: usize) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            max_sessions,
        }
    }

    pub async fn count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

impl Default for InMemorySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn load(&self, id: &str) -> Option<ChatSession> {
        self.sessions.read().await.get(id).cloned()
    }

    async fn check_capacity(&self, id: &str) -> Result<(), SessionError> {
        let sessions = self.sessions.read().await;
        if sessions.contains_key(id) || sessions.len() < self.max_sessions {
            Ok(())
        } else {
            Err(SessionError::LimitReached(self.max_sessions))
        }
    }

    async fn save(&self, session: ChatSession) -> Result<(), SessionError> {
        let mut sessions = self.sessions.write().await;
        if !sessions.contains_key(&session.id) {
            if sessions.len() >= self.max_sessions {
                return Err(SessionError::LimitReached(self.max_sessions));
            }
            info!("Created session '{}'", session.id);
        }
        debug!(
            "Saved session '{}' (messages: {})",
            session.id,
            session.messages.len()
        );
        sessions.insert(session.id.clone(), session);
        Ok(())
    }

    async fn delete(&self, id: &str) -> bool {
        let removed = self.sessions.write().await.remove(id).is_some();
        if removed {
            info!("Deleted session '{}'", id);
        }
        removed
    }

    async fn list(&self) -> Vec<SessionSummary> {
        let sessions = self.sessions.read().await;
        let mut list: Vec<SessionSummary> = sessions.values().map(ChatSession::summary).collect();
        list.sort_by(|a, b| b.last_active_at.cmp(&a.last_active_at));
        list
    }

    async fn evict_idle(&self, ttl: Duration) -> Vec<String> {
        let Ok(ttl) = chrono::Duration::from_std(ttl) else {
            return Vec::new();
        };
        let cutoff = Utc::now() - ttl;
        let mut sessions = self.sessions.write().await;
        let stale: Vec<String> = sessions
            .values()
            .filter(|s| s.last_active_at < cutoff)
            .map(|s| s.id.clone())
            .collect();
        for id in &stale {
            sessions.remove(id);
        }
        if !stale.is_empty() {
            info!("Evicted {} idle session(s)", stale.len());
        }
        stale
    }
}
