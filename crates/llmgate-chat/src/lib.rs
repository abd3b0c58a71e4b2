//! llmgate-chat: conversation sessions over the gateway
//!
//! [`ChatService`] keeps a per-session message history, sends the whole
//! history through [`llmgate_core::AiManager`] on every turn, and appends the
//! assistant reply only when the turn succeeds.

pub mod service;
pub mod session;

pub use service::{ChatReply, ChatRequest, ChatService};
pub use session::{ChatSession, InMemorySessionStore, SessionError, SessionStore, SessionSummary};
