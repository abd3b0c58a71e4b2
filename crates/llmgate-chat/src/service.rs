//! Chat turns
//!
//! Turns on the same session are serialized by a per-session lock so two
//! concurrent requests cannot interleave their histories. Different sessions
//! never wait on each other.

use dashmap::DashMap;
use llmgate_core::{
    AiManager, ChatMessage, ErrorBody, ErrorKind, RequestOptions, ResponseResult,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, warn};

use crate::session::{ChatSession, SessionStore, SessionSummary, normalize_session_id};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatRequest {
    /// Existing session to continue; a new one is created when absent or unknown
    #[serde(default)]
    pub session_id: Option<String>,
    /// New messages for this turn, appended after the stored history
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub options: RequestOptions,
}

impl ChatRequest {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            messages: vec![ChatMessage::user(message)],
            ..Default::default()
        }
    }

    pub fn in_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatReply {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<ResponseResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl ChatReply {
    fn ok(session_id: String, data: ResponseResult) -> Self {
        Self {
            success: true,
            session_id: Some(session_id),
            data: Some(data),
            error: None,
        }
    }

    fn fail(session_id: Option<String>, error: ErrorBody) -> Self {
        Self {
            success: false,
            session_id,
            data: None,
            error: Some(error),
        }
    }
}

pub struct ChatService {
    manager: Arc<AiManager>,
    store: Arc<dyn SessionStore>,
    turn_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl ChatService {
    pub fn new(manager: Arc<AiManager>, store: Arc<dyn SessionStore>) -> Self {
        Self {
            manager,
            store,
            turn_locks: DashMap::new(),
        }
    }

    /// Run one turn. Never fails: errors come back inside the reply.
    pub async fn chat(&self, request: ChatRequest) -> ChatReply {
        if request.messages.is_empty() {
            return ChatReply::fail(
                request.session_id,
                ErrorBody::new(ErrorKind::InvalidRequest, "chat turn has no messages"),
            );
        }

        let session_id = match request.session_id.as_deref() {
            Some(raw) => match normalize_session_id(raw) {
                Ok(id) => id,
                Err(e) => {
                    warn!("Rejected chat turn for session '{}': {}", raw, e);
                    return ChatReply::fail(
                        None,
                        ErrorBody::new(ErrorKind::InvalidRequest, e.to_string()),
                    );
                }
            },
            None => uuid::Uuid::new_v4().to_string(),
        };

        let lock = self
            .turn_locks
            .entry(session_id.clone())
            .or_default()
            .clone();
        let turn = lock.lock_owned().await;

        let (mut session, is_new) = match self.store.load(&session_id).await {
            Some(session) => (session, false),
            None => {
                if let Err(e) = self.store.check_capacity(&session_id).await {
                    warn!("Refusing new session '{}': {}", session_id, e);
                    self.end_unsaved_turn(&session_id, turn);
                    return ChatReply::fail(None, ErrorBody::new(e.kind(), e.to_string()));
                }
                debug!("Starting session '{}'", session_id);
                (ChatSession::new(session_id.clone()), true)
            }
        };

        let mut history = session.messages.clone();
        history.extend(request.messages);

        let result = match self
            .manager
            .try_chat_completion(&history, request.provider.as_deref(), &request.options)
            .await
        {
            Ok(result) => result,
            Err(e) => {
                warn!("Chat turn failed for session '{}': {}", session_id, e);
                if is_new {
                    // nothing was stored under this id
                    self.end_unsaved_turn(&session_id, turn);
                    return ChatReply::fail(None, ErrorBody::from(&e));
                }
                return ChatReply::fail(Some(session_id), ErrorBody::from(&e));
            }
        };

        history.push(ChatMessage::assistant(result.content.clone()));
        session.messages = history;
        session.provider = Some(result.provider.clone());
        session.model = Some(result.model.clone());
        session.last_active_at = chrono::Utc::now();

        if let Err(e) = self.store.save(session).await {
            warn!("Could not save session '{}': {}", session_id, e);
            if is_new {
                self.end_unsaved_turn(&session_id, turn);
            }
            return ChatReply::fail(Some(session_id), ErrorBody::new(e.kind(), e.to_string()));
        }

        ChatReply::ok(session_id, result)
    }

    /// Release the turn and forget the lock of a session that was never
    /// stored, unless another turn is already waiting on it
    fn end_unsaved_turn(&self, session_id: &str, turn: OwnedMutexGuard<()>) {
        drop(turn);
        self.turn_locks
            .remove_if(session_id, |_, lock| Arc::strong_count(lock) == 1);
    }

    /// Number of sessions holding a turn lock
    pub fn tracked_sessions(&self) -> usize {
        self.turn_locks.len()
    }

    pub async fn history(&self, session_id: &str) -> Option<Vec<ChatMessage>> {
        let id = normalize_session_id(session_id).ok()?;
        self.store.load(&id).await.map(|s| s.messages)
    }

    pub async fn sessions(&self) -> Vec<SessionSummary> {
        self.store.list().await
    }

    pub async fn end_session(&self, session_id: &str) -> bool {
        let Ok(id) = normalize_session_id(session_id) else {
            return false;
        };
        self.turn_locks.remove(&id);
        self.store.delete(&id).await
    }

    /// Drop sessions idle for longer than `ttl` along with their turn locks
    pub async fn evict_idle(&self, ttl: Duration) -> usize {
        let evicted = self.store.evict_idle(ttl).await;
        for id in &evicted {
            self.turn_locks.remove(id);
        }
        evicted.len()
    }
}
