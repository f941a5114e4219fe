use thiserror::Error;

use super::conversation::{ChatScope, ConversationId};
use super::message::{ChatMessage, UserId};

/// Lifecycle of the broker connection as observed by the host application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Idle,
    Connecting,
    Connected,
    Closed,
    Failed,
}

impl ConnectionState {
    pub fn as_label(&self) -> &'static str {
        match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Closed => "closed",
            ConnectionState::Failed => "failed",
        }
    }
}

/// Terminal session failures surfaced to the host. The session does not
/// reconnect on its own; the host decides whether to reopen.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionFault {
    #[error("connection to the broker was lost")]
    ConnectionLost,
    #[error("broker reported an error: {message}")]
    Broker { message: String },
    #[error("protocol violation: {detail}")]
    Protocol { detail: String },
}

/// What the client surfaces to the host application beyond store changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEvent {
    /// A message was appended to the named scope, live or optimistic.
    MessageAppended {
        scope: ChatScope,
        message: ChatMessage,
    },
    /// A history fetch finished and replaced the scope's buffer.
    HistoryLoaded { scope: ChatScope, count: usize },
    /// A history fetch failed; the scope keeps whatever it already held.
    HistoryFailed { scope: ChatScope, detail: String },
    /// The conversation and expert lists were refreshed from the REST API.
    RosterUpdated { conversations: usize, experts: usize },
    /// The roster refresh failed; stale lists stay in place.
    RosterFailed { detail: String },
    /// A private message arrived or was sent; the directory entry moved.
    ConversationUpdated(ConversationId),
    /// The counterpart of the named conversation started or stopped typing.
    Typing {
        conversation_id: ConversationId,
        sender_id: UserId,
        active: bool,
    },
    /// An inbound frame failed validation and was dropped before the store.
    Rejected(ChatMessage),
    /// The session reported a terminal failure.
    Fault(SessionFault),
}
