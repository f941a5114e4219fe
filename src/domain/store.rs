use std::collections::HashMap;
use std::sync::{mpsc, Arc, Mutex};

use super::conversation::ChatScope;
use super::message::ChatMessage;

/// Change notification delivered to store subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreChange {
    /// One message was appended to the end of the scope's buffer.
    Appended(ChatMessage),
    /// The scope's buffer was replaced wholesale, usually by a history load.
    Replaced(Vec<ChatMessage>),
}

/// Per-scope message buffers with change fanout. Buffers are append-only
/// between history loads; a history load replaces the buffer wholesale.
/// Clones share the same underlying buffers.
#[derive(Clone, Debug, Default)]
pub struct MessageStore {
    inner: Arc<Mutex<StoreState>>,
}

#[derive(Debug, Default)]
struct StoreState {
    buffers: HashMap<ChatScope, Vec<ChatMessage>>,
    subscribers: Vec<(ChatScope, mpsc::Sender<StoreChange>)>,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends to the scope derived from the message itself. Ordering within
    /// a scope is arrival order; nothing is deduplicated or reordered.
    pub fn append(&self, message: ChatMessage) {
        let scope = message.scope();
        if let Ok(mut state) = self.inner.lock() {
            state.buffers.entry(scope.clone()).or_default().push(message.clone());
            notify(&mut state.subscribers, &scope, StoreChange::Appended(message));
        }
    }

    /// Replaces the whole buffer for one scope. Other scopes are untouched.
    pub fn replace_all(&self, scope: ChatScope, messages: Vec<ChatMessage>) {
        if let Ok(mut state) = self.inner.lock() {
            state.buffers.insert(scope.clone(), messages.clone());
            notify(&mut state.subscribers, &scope, StoreChange::Replaced(messages));
        }
    }

    pub fn messages(&self, scope: &ChatScope) -> Vec<ChatMessage> {
        self.inner
            .lock()
            .map(|state| state.buffers.get(scope).cloned().unwrap_or_default())
            .unwrap_or_default()
    }

    pub fn count(&self, scope: &ChatScope) -> usize {
        self.inner
            .lock()
            .map(|state| state.buffers.get(scope).map_or(0, Vec::len))
            .unwrap_or(0)
    }

    /// Subscribes to changes for one scope. The current buffer is delivered
    /// immediately as a `Replaced` so late subscribers start from a full view.
    pub fn subscribe(&self, scope: ChatScope) -> mpsc::Receiver<StoreChange> {
        let (tx, rx) = mpsc::channel();
        if let Ok(mut state) = self.inner.lock() {
            let current = state.buffers.get(&scope).cloned().unwrap_or_default();
            let _ = tx.send(StoreChange::Replaced(current));
            state.subscribers.push((scope, tx));
        }
        rx
    }
}

fn notify(
    subscribers: &mut Vec<(ChatScope, mpsc::Sender<StoreChange>)>,
    scope: &ChatScope,
    change: StoreChange,
) {
    subscribers.retain(|(subscribed, sub)| {
        if subscribed != scope {
            return true;
        }
        sub.send(change.clone()).is_ok()
    });
}
