use serde::{Deserialize, Serialize};

use super::message::UserId;

/// Canonical key of a 1-to-1 thread. Both participants derive the same key
/// regardless of who starts the conversation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(String);

impl ConversationId {
    /// Derives the pair key `conv_<low>_<high>` by numeric order.
    pub fn derive(a: UserId, b: UserId) -> Self {
        let (low, high) = if a <= b { (a, b) } else { (b, a) };
        Self(format!("conv_{low}_{high}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Message buffer a store entry belongs to: the shared community room or one
/// private conversation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ChatScope {
    Community,
    Conversation(ConversationId),
}

/// The other participant of a private conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Counterpart {
    pub user_id: UserId,
    pub display_name: Option<String>,
    /// Informational role tag ("VIP"/"EXPERT"/"USER").
    pub role: Option<String>,
}

impl Counterpart {
    pub fn new(user_id: UserId, display_name: Option<String>) -> Self {
        Self {
            user_id,
            display_name,
            role: None,
        }
    }
}

/// Directory entry for one private conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conversation {
    pub id: ConversationId,
    pub counterpart_id: UserId,
    pub counterpart_name: Option<String>,
    pub counterpart_role: Option<String>,
    pub last_message: Option<String>,
    /// ISO-8601 timestamp of the most recent activity.
    pub last_activity: Option<String>,
    pub unread: bool,
}

impl Conversation {
    pub fn counterpart(&self) -> Counterpart {
        Counterpart {
            user_id: self.counterpart_id,
            display_name: self.counterpart_name.clone(),
            role: self.counterpart_role.clone(),
        }
    }
}

/// Server-side summary of a conversation as returned by the history service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    pub conversation_id: ConversationId,
    pub other_user_id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub other_user_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub other_user_role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_timestamp: Option<String>,
}

/// Roster entry for a consultable expert.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Expert {
    pub id: UserId,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
}

impl Expert {
    pub fn counterpart(&self) -> Counterpart {
        Counterpart {
            user_id: self.id,
            display_name: self.name.clone(),
            role: self.role.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derive_is_symmetric_over_participant_order() {
        assert_eq!(ConversationId::derive(5, 9), ConversationId::derive(9, 5));
        assert_eq!(ConversationId::derive(5, 9).as_str(), "conv_5_9");
    }

    #[test]
    fn derive_keeps_numeric_order_not_lexicographic() {
        assert_eq!(ConversationId::derive(100, 2).as_str(), "conv_2_100");
    }

    #[test]
    fn derive_handles_self_conversation() {
        assert_eq!(ConversationId::derive(7, 7).as_str(), "conv_7_7");
    }

    #[test]
    fn conversation_id_serializes_as_plain_string() {
        let id = ConversationId::derive(5, 9);
        let json = serde_json::to_string(&id).expect("id must serialize");

        assert_eq!(json, "\"conv_5_9\"");

        let back: ConversationId = serde_json::from_str(&json).expect("id must decode");
        assert_eq!(back, id);
    }

    #[test]
    fn summary_decodes_with_optional_fields_missing() {
        let json = r#"{"conversationId": "conv_5_9", "otherUserId": 9}"#;

        let summary: ConversationSummary =
            serde_json::from_str(json).expect("summary must decode");

        assert_eq!(summary.conversation_id.as_str(), "conv_5_9");
        assert_eq!(summary.other_user_id, 9);
        assert_eq!(summary.other_user_name, None);
        assert_eq!(summary.last_message, None);
    }

    #[test]
    fn expert_maps_to_counterpart() {
        let json = r#"{"id": 42, "name": "Dr. Moss", "role": "EXPERT"}"#;
        let expert: Expert = serde_json::from_str(json).expect("expert must decode");

        let counterpart = expert.counterpart();
        assert_eq!(counterpart.user_id, 42);
        assert_eq!(counterpart.display_name.as_deref(), Some("Dr. Moss"));
        assert_eq!(counterpart.role.as_deref(), Some("EXPERT"));
    }
}
