use super::conversation::{Conversation, ConversationId, ConversationSummary, Counterpart};
use super::message::{ChatMessage, ChatType, UserId};

/// Known private conversations, most recently active first. Tracks which
/// conversation is currently on screen so inbound traffic for it never
/// flips the unread flag.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConversationDirectory {
    entries: Vec<Conversation>,
    viewed: Option<ConversationId>,
}

impl ConversationDirectory {
    pub fn list(&self) -> &[Conversation] {
        &self.entries
    }

    pub fn find(&self, id: &ConversationId) -> Option<&Conversation> {
        self.entries.iter().find(|entry| entry.id == *id)
    }

    pub fn viewed(&self) -> Option<&ConversationId> {
        self.viewed.as_ref()
    }

    pub fn unread_count(&self) -> usize {
        self.entries.iter().filter(|entry| entry.unread).count()
    }

    /// Marks a conversation as on screen and clears its unread flag. `None`
    /// means no private conversation is being viewed.
    pub fn set_viewed(&mut self, id: Option<ConversationId>) {
        if let Some(id) = &id {
            self.mark_read(id);
        }
        self.viewed = id;
    }

    pub fn mark_read(&mut self, id: &ConversationId) {
        if let Some(entry) = self.entries.iter_mut().find(|entry| entry.id == *id) {
            entry.unread = false;
        }
    }

    /// Ensures an entry exists for a conversation the local user opens
    /// deliberately. Never flips the unread flag.
    pub fn start_with(&mut self, me: UserId, counterpart: &Counterpart) -> ConversationId {
        let id = ConversationId::derive(me, counterpart.user_id);

        match self.entries.iter_mut().find(|entry| entry.id == id) {
            Some(entry) => {
                if entry.counterpart_name.is_none() {
                    entry.counterpart_name = counterpart.display_name.clone();
                }
                if entry.counterpart_role.is_none() {
                    entry.counterpart_role = counterpart.role.clone();
                }
            }
            None => self.entries.insert(
                0,
                Conversation {
                    id: id.clone(),
                    counterpart_id: counterpart.user_id,
                    counterpart_name: counterpart.display_name.clone(),
                    counterpart_role: counterpart.role.clone(),
                    last_message: None,
                    last_activity: None,
                    unread: false,
                },
            ),
        }

        id
    }

    /// Folds one private message into the directory: creates or refreshes the
    /// entry, moves it to the front and raises unread for traffic from the
    /// counterpart while the conversation is off screen.
    pub fn upsert_from_message(
        &mut self,
        me: UserId,
        message: &ChatMessage,
    ) -> Option<ConversationId> {
        if message.chat_type != ChatType::Private {
            return None;
        }
        let receiver_id = message.receiver_id?;

        let id = message
            .conversation_id
            .clone()
            .unwrap_or_else(|| ConversationId::derive(message.sender_id, receiver_id));
        let counterpart_id = if message.sender_id == me {
            receiver_id
        } else {
            message.sender_id
        };
        let from_counterpart = message.sender_id != me;
        let on_screen = self.viewed.as_ref() == Some(&id);

        let position = self.entries.iter().position(|entry| entry.id == id);
        let mut entry = match position {
            Some(position) => self.entries.remove(position),
            None => Conversation {
                id: id.clone(),
                counterpart_id,
                counterpart_name: None,
                counterpart_role: None,
                last_message: None,
                last_activity: None,
                unread: false,
            },
        };

        entry.last_message = Some(message.content.clone());
        entry.last_activity = Some(message.timestamp.clone());
        if from_counterpart {
            if entry.counterpart_role.is_none() {
                entry.counterpart_role = message.sender_role.clone();
            }
            if !on_screen {
                entry.unread = true;
            }
        }
        self.entries.insert(0, entry);

        Some(id)
    }

    /// Merges server-side summaries fetched on open. Summaries only fill
    /// gaps; live state gathered since connect (previews, unread flags)
    /// wins over the snapshot.
    pub fn absorb_summaries(&mut self, summaries: Vec<ConversationSummary>) {
        for summary in summaries {
            match self
                .entries
                .iter_mut()
                .find(|entry| entry.id == summary.conversation_id)
            {
                Some(entry) => {
                    if entry.counterpart_name.is_none() {
                        entry.counterpart_name = summary.other_user_name;
                    }
                    if entry.counterpart_role.is_none() {
                        entry.counterpart_role = summary.other_user_role;
                    }
                    if entry.last_activity.is_none() {
                        entry.last_message = summary.last_message;
                        entry.last_activity = summary.last_timestamp;
                    }
                }
                None => self.entries.push(Conversation {
                    id: summary.conversation_id,
                    counterpart_id: summary.other_user_id,
                    counterpart_name: summary.other_user_name,
                    counterpart_role: summary.other_user_role,
                    last_message: summary.last_message,
                    last_activity: summary.last_timestamp,
                    unread: false,
                }),
            }
        }

        self.entries
            .sort_by(|a, b| b.last_activity.cmp(&a.last_activity));
    }
}
