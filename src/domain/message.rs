//! Wire-level chat message model shared by the transport, router and store.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::conversation::{ChatScope, ConversationId};

/// Platform-wide numeric user identifier.
pub type UserId = i64;

/// Which logical channel a message belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChatType {
    Community,
    Private,
}

/// The locally-authenticated user, resolved by the host's identity provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: UserId,
    /// Informational role tag ("VIP", "EXPERT", "USER").
    pub role: Option<String>,
}

impl Identity {
    pub fn new(user_id: UserId, role: Option<String>) -> Self {
        Self { user_id, role }
    }
}

/// One unit of conversation content. Immutable after creation; the timestamp
/// is client-stamped because no server acknowledgement carries a canonical
/// time in this protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub sender_id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receiver_id: Option<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_role: Option<String>,
    pub content: String,
    /// ISO-8601, stamped at creation time.
    pub timestamp: String,
    pub chat_type: ChatType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<ConversationId>,
}

impl ChatMessage {
    /// Builds a community message stamped with the local identity and time.
    pub fn community(identity: &Identity, content: &str) -> Self {
        Self {
            sender_id: identity.user_id,
            receiver_id: None,
            sender_role: identity.role.clone(),
            content: content.to_owned(),
            timestamp: client_timestamp(),
            chat_type: ChatType::Community,
            conversation_id: None,
        }
    }

    /// Builds a private message; the conversation id is derived from the
    /// participant pair so both sides converge on the same thread key.
    pub fn private(identity: &Identity, receiver_id: UserId, content: &str) -> Self {
        Self {
            sender_id: identity.user_id,
            receiver_id: Some(receiver_id),
            sender_role: identity.role.clone(),
            content: content.to_owned(),
            timestamp: client_timestamp(),
            chat_type: ChatType::Private,
            conversation_id: Some(ConversationId::derive(identity.user_id, receiver_id)),
        }
    }

    /// Scope key this message is buffered under.
    pub fn scope(&self) -> ChatScope {
        match (&self.chat_type, &self.conversation_id) {
            (ChatType::Private, Some(id)) => ChatScope::Conversation(id.clone()),
            _ => ChatScope::Community,
        }
    }

    /// Checks the structural invariants an inbound frame must satisfy before
    /// it is allowed past the router.
    pub fn validate(&self) -> Result<(), MessageInvariantViolation> {
        if self.content.trim().is_empty() {
            return Err(MessageInvariantViolation::EmptyContent);
        }

        match self.chat_type {
            ChatType::Community => {
                if self.conversation_id.is_some() {
                    return Err(MessageInvariantViolation::UnexpectedConversationId);
                }
            }
            ChatType::Private => {
                let Some(receiver_id) = self.receiver_id else {
                    return Err(MessageInvariantViolation::MissingReceiver);
                };
                let Some(conversation_id) = &self.conversation_id else {
                    return Err(MessageInvariantViolation::MissingConversationId);
                };

                let expected = ConversationId::derive(self.sender_id, receiver_id);
                if *conversation_id != expected {
                    return Err(MessageInvariantViolation::ConversationIdMismatch {
                        found: conversation_id.as_str().to_owned(),
                        expected: expected.as_str().to_owned(),
                    });
                }
            }
        }

        Ok(())
    }
}

/// Advisory side-channel payload; dropped frames have no correctness impact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingSignal {
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receiver_id: Option<UserId>,
    pub is_typing: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MessageInvariantViolation {
    #[error("message content is empty")]
    EmptyContent,
    #[error("private message is missing a receiver")]
    MissingReceiver,
    #[error("private message is missing its conversation id")]
    MissingConversationId,
    #[error("conversation id {found} does not match the participant pair (expected {expected})")]
    ConversationIdMismatch { found: String, expected: String },
    #[error("community message must not carry a conversation id")]
    UnexpectedConversationId,
}

fn client_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}
