//! Consumer-facing chat client: connection lifecycle, scope switching,
//! sending and the read models a UI binds to.

use std::io;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, watch};

use crate::client::history::{HistoryError, HistoryGateway, RestHistoryGateway};
use crate::client::typing::TypingThrottle;
use crate::domain::conversation::{ChatScope, Conversation, ConversationId, Counterpart, Expert};
use crate::domain::directory::ConversationDirectory;
use crate::domain::events::{ChatEvent, ConnectionState};
use crate::domain::message::{ChatMessage, ChatType, Identity, TypingSignal, UserId};
use crate::domain::store::{MessageStore, StoreChange};
use crate::infra::config::ChatConfig;
use crate::router::{ChannelRouter, RouteError, RouterEvent, RouterObserver};
use crate::transport::dialer::{BrokerDialer, TcpDialer};
use crate::transport::{TransportError, TransportSession};

const CLIENT_OPENED: &str = "CHAT_CLIENT_OPENED";
const CLIENT_OPEN_FAILED: &str = "CHAT_CLIENT_OPEN_FAILED";
const CLIENT_CLOSED: &str = "CHAT_CLIENT_CLOSED";
const CLIENT_VIEW_SWITCHED: &str = "CHAT_CLIENT_VIEW_SWITCHED";
const CLIENT_MESSAGE_SENT: &str = "CHAT_CLIENT_MESSAGE_SENT";
const CLIENT_HISTORY_SUPERSEDED: &str = "CHAT_CLIENT_HISTORY_SUPERSEDED";
const CLIENT_HISTORY_FAILED: &str = "CHAT_CLIENT_HISTORY_FAILED";
const CLIENT_ROSTER_FAILED: &str = "CHAT_CLIENT_ROSTER_FAILED";
const CLIENT_TYPING_DROPPED: &str = "CHAT_CLIENT_TYPING_DROPPED";

#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("broker is unreachable: {0}")]
    Unreachable(#[source] io::Error),
    #[error("broker rejected the session: {message}")]
    Rejected { message: String },
    #[error(transparent)]
    Transport(TransportError),
}

#[derive(Debug, Error)]
pub enum SwitchError {
    #[error("the chat session is not live")]
    NotLive,
    #[error("no identity is resolved for this session")]
    MissingIdentity,
}

#[derive(Debug, Error)]
pub enum SendError {
    #[error("message content is empty")]
    EmptyMessage,
    #[error("no identity is resolved for this session")]
    MissingIdentity,
    #[error("failed to publish the message: {0}")]
    Publish(#[source] RouteError),
}

/// What the client currently shows. Private views keep the counterpart id
/// so sends and typing probes need no directory lookup.
enum View {
    Community,
    Conversation {
        id: ConversationId,
        counterpart: UserId,
    },
}

/// The chat core behind the UI. Owns the broker session, the channel
/// router, the per-scope buffers and the conversation directory; every
/// instance is self-contained and holds no global state.
///
/// An anonymous session (no identity) can read the community channel;
/// the private inbox, sending and typing relay all require an identity.
pub struct ChatClient {
    identity: Option<Identity>,
    session: TransportSession,
    router: ChannelRouter,
    store: MessageStore,
    directory: Arc<Mutex<ConversationDirectory>>,
    experts: Arc<Mutex<Vec<Expert>>>,
    history: Arc<dyn HistoryGateway>,
    typing: TypingThrottle,
    bus: EventBus,
    fetches: FetchGuard,
    view: View,
}

impl ChatClient {
    /// Production wiring: TCP to the broker, reqwest for history.
    pub fn new(config: &ChatConfig, identity: Option<Identity>) -> Self {
        Self::with_collaborators(
            config,
            identity,
            Box::new(TcpDialer::new(config.broker.address.clone())),
            Arc::new(RestHistoryGateway::new(config.history.base_url.clone())),
        )
    }

    /// Wiring with injected collaborators, used by tests and embedders that
    /// bring their own transport or history source.
    pub fn with_collaborators(
        config: &ChatConfig,
        identity: Option<Identity>,
        dialer: Box<dyn BrokerDialer>,
        history: Arc<dyn HistoryGateway>,
    ) -> Self {
        let session = TransportSession::new(dialer, config.broker.vhost.clone());
        let typing = TypingThrottle::new(
            session.publisher(),
            config.destinations.typing.clone(),
            Duration::from_millis(config.typing.quiet_period_ms),
        );
        let client = Self {
            identity,
            session,
            router: ChannelRouter::new(config.destinations.clone()),
            store: MessageStore::new(),
            directory: Arc::new(Mutex::new(ConversationDirectory::default())),
            experts: Arc::new(Mutex::new(Vec::new())),
            history,
            typing,
            bus: EventBus::default(),
            fetches: FetchGuard::default(),
            view: View::Community,
        };
        client.install_fault_relay();
        client
    }

    /// Connects, installs the channel subscriptions and kicks off the
    /// community history and roster fetches. Resolves viewing the community
    /// channel. Calling this while already live is a no-op; after a fault
    /// or `close` it establishes a fresh connection.
    pub async fn open(&mut self) -> Result<(), ConnectError> {
        if self.session.state() == ConnectionState::Connected {
            return Ok(());
        }

        self.session.connect().await.map_err(map_connect_error)?;
        if let Err(error) = self.install_subscriptions().await {
            tracing::warn!(code = CLIENT_OPEN_FAILED, error = %error, "teardown after failed open");
            self.session.disconnect().await;
            return Err(map_connect_error(error));
        }

        lock(&self.directory).set_viewed(None);
        self.view = View::Community;
        self.spawn_community_history();
        if let Some(identity) = &self.identity {
            self.spawn_roster_sync(identity.user_id);
        }
        tracing::info!(code = CLIENT_OPENED, "chat session opened");
        Ok(())
    }

    /// Disconnects and resets the view to the community channel. Message
    /// buffers, the directory and the expert roster are retained; they are
    /// session data for the consumer, not connection data.
    pub async fn close(&mut self) {
        self.typing.cancel();
        self.fetches.invalidate();
        self.session.disconnect().await;
        lock(&self.directory).set_viewed(None);
        self.view = View::Community;
        tracing::info!(code = CLIENT_CLOSED, "chat session closed");
    }

    /// Opens (or returns to) the private conversation with `counterpart`:
    /// ensures the directory entry, clears its unread flag, registers the
    /// inbox route and starts the history fetch for the pair. Any history
    /// fetch still in flight for the previous view is superseded.
    pub fn switch_to_conversation(
        &mut self,
        counterpart: &Counterpart,
    ) -> Result<ConversationId, SwitchError> {
        if self.session.state() != ConnectionState::Connected {
            return Err(SwitchError::NotLive);
        }
        let Some(identity) = &self.identity else {
            return Err(SwitchError::MissingIdentity);
        };
        let me = identity.user_id;

        let id = {
            let mut directory = lock(&self.directory);
            let id = directory.start_with(me, counterpart);
            directory.set_viewed(Some(id.clone()));
            id
        };

        let store = self.store.clone();
        let bus = self.bus.clone();
        self.router.subscribe_private(
            me,
            counterpart.user_id,
            Arc::new(move |message| {
                let scope = message.scope();
                store.append(message.clone());
                bus.emit(ChatEvent::MessageAppended { scope, message });
            }),
        );

        self.view = View::Conversation {
            id: id.clone(),
            counterpart: counterpart.user_id,
        };
        self.spawn_private_history(me, counterpart.user_id, id.clone());
        tracing::info!(code = CLIENT_VIEW_SWITCHED, conversation = %id, "viewing private conversation");
        Ok(id)
    }

    /// Returns the view to the shared community channel and refreshes its
    /// history. A private-history fetch still in flight is superseded.
    pub fn switch_to_community(&mut self) -> Result<(), SwitchError> {
        if self.session.state() != ConnectionState::Connected {
            return Err(SwitchError::NotLive);
        }
        lock(&self.directory).set_viewed(None);
        self.view = View::Community;
        self.spawn_community_history();
        tracing::info!(code = CLIENT_VIEW_SWITCHED, conversation = "community", "viewing community channel");
        Ok(())
    }

    /// Sends `text` to the viewed scope. The message is appended to the
    /// local buffer before the publish so the sender sees it immediately;
    /// the broker echo later appends again (no dedup, by contract). A
    /// publish failure therefore surfaces after the optimistic append.
    pub async fn send(&mut self, text: &str) -> Result<ChatMessage, SendError> {
        if text.trim().is_empty() {
            return Err(SendError::EmptyMessage);
        }
        let Some(identity) = &self.identity else {
            return Err(SendError::MissingIdentity);
        };

        let message = match &self.view {
            View::Community => ChatMessage::community(identity, text),
            View::Conversation { counterpart, .. } => {
                ChatMessage::private(identity, *counterpart, text)
            }
        };

        self.store.append(message.clone());
        self.bus.emit(ChatEvent::MessageAppended {
            scope: message.scope(),
            message: message.clone(),
        });
        if message.chat_type == ChatType::Private {
            let updated = lock(&self.directory).upsert_from_message(identity.user_id, &message);
            if let Some(id) = updated {
                self.bus.emit(ChatEvent::ConversationUpdated(id));
            }
        }

        self.router
            .publish(&self.session, &message)
            .await
            .map_err(SendError::Publish)?;
        tracing::debug!(code = CLIENT_MESSAGE_SENT, chat_type = ?message.chat_type, "message published");
        Ok(message)
    }

    /// Call on every keystroke while a private conversation is viewed. The
    /// probe is advisory: failures are logged and swallowed, and nothing is
    /// sent when viewing the community channel or without an identity.
    pub async fn notify_typing(&mut self) {
        let View::Conversation { id, counterpart } = &self.view else {
            return;
        };
        let Some(identity) = &self.identity else {
            return;
        };
        let signal = TypingSignal {
            conversation_id: id.clone(),
            sender_id: identity.user_id,
            receiver_id: Some(*counterpart),
            is_typing: true,
        };
        if let Err(error) = self.typing.notify(signal).await {
            tracing::debug!(code = CLIENT_TYPING_DROPPED, error = %error, "typing probe dropped");
        }
    }

    /// Subscriber channel for everything beyond raw store changes: appends,
    /// history/roster outcomes, typing, rejects and session faults.
    pub fn events(&self) -> mpsc::UnboundedReceiver<ChatEvent> {
        self.bus.subscribe()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.session.state()
    }

    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.session.state_changes()
    }

    pub fn viewing(&self) -> ChatScope {
        match &self.view {
            View::Community => ChatScope::Community,
            View::Conversation { id, .. } => ChatScope::Conversation(id.clone()),
        }
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    /// Snapshot of one scope's buffer, in arrival order.
    pub fn messages(&self, scope: &ChatScope) -> Vec<ChatMessage> {
        self.store.messages(scope)
    }

    /// Change feed for one scope; starts with a snapshot of the buffer.
    pub fn subscribe_messages(&self, scope: ChatScope) -> std::sync::mpsc::Receiver<StoreChange> {
        self.store.subscribe(scope)
    }

    /// Known private conversations, most recently active first.
    pub fn conversations(&self) -> Vec<Conversation> {
        lock(&self.directory).list().to_vec()
    }

    pub fn unread_count(&self) -> usize {
        lock(&self.directory).unread_count()
    }

    /// Experts available to start a conversation with, as last fetched.
    pub fn experts(&self) -> Vec<Expert> {
        lock(&self.experts).clone()
    }

    fn install_fault_relay(&self) {
        let bus = self.bus.clone();
        self.session.set_fault_handler(Arc::new(move |fault| {
            bus.emit(ChatEvent::Fault(fault));
        }));
    }

    async fn install_subscriptions(&mut self) -> Result<(), TransportError> {
        let observer = self.traffic_observer();
        self.router
            .subscribe_community(&mut self.session, Arc::clone(&observer))
            .await?;
        if self.identity.is_some() {
            self.router
                .open_private_inbox(&mut self.session, observer)
                .await?;
        }
        Ok(())
    }

    /// Builds the closure the router invokes from the reader task. Community
    /// traffic lands in the store directly; private traffic only feeds the
    /// directory here, store appends happen through the per-conversation
    /// routes so unopened threads keep an empty buffer.
    fn traffic_observer(&self) -> RouterObserver {
        let store = self.store.clone();
        let directory = Arc::clone(&self.directory);
        let bus = self.bus.clone();
        let me = self.identity.as_ref().map(|identity| identity.user_id);
        Arc::new(move |event| match event {
            RouterEvent::Community(message) => {
                let scope = message.scope();
                store.append(message.clone());
                bus.emit(ChatEvent::MessageAppended { scope, message });
            }
            RouterEvent::Private(message) => {
                let Some(me) = me else {
                    return;
                };
                let updated = lock(&directory).upsert_from_message(me, &message);
                if let Some(id) = updated {
                    bus.emit(ChatEvent::ConversationUpdated(id));
                }
            }
            RouterEvent::Typing(signal) => {
                if Some(signal.sender_id) == me {
                    return;
                }
                bus.emit(ChatEvent::Typing {
                    conversation_id: signal.conversation_id,
                    sender_id: signal.sender_id,
                    active: signal.is_typing,
                });
            }
            RouterEvent::Rejected { message, .. } => {
                bus.emit(ChatEvent::Rejected(message));
            }
        })
    }

    fn spawn_community_history(&self) {
        let token = self.fetches.begin();
        let guard = self.fetches.clone();
        let gateway = Arc::clone(&self.history);
        let store = self.store.clone();
        let bus = self.bus.clone();
        tokio::spawn(async move {
            let result = gateway.community_history().await;
            finish_history_fetch(ChatScope::Community, result, &guard, token, &store, &bus);
        });
    }

    fn spawn_private_history(&self, me: UserId, other: UserId, id: ConversationId) {
        let token = self.fetches.begin();
        let guard = self.fetches.clone();
        let gateway = Arc::clone(&self.history);
        let store = self.store.clone();
        let bus = self.bus.clone();
        tokio::spawn(async move {
            let result = gateway.private_messages(me, other).await;
            finish_history_fetch(
                ChatScope::Conversation(id),
                result,
                &guard,
                token,
                &store,
                &bus,
            );
        });
    }

    fn spawn_roster_sync(&self, me: UserId) {
        let gateway = Arc::clone(&self.history);
        let directory = Arc::clone(&self.directory);
        let experts = Arc::clone(&self.experts);
        let bus = self.bus.clone();
        tokio::spawn(async move {
            let mut failure = None;
            match gateway.conversation_summaries(me).await {
                Ok(summaries) => lock(&directory).absorb_summaries(summaries),
                Err(error) => failure = Some(error.to_string()),
            }
            match gateway.expert_roster().await {
                Ok(roster) => *lock(&experts) = roster,
                Err(error) => failure = Some(error.to_string()),
            }
            match failure {
                None => {
                    let conversations = lock(&directory).list().len();
                    let expert_count = lock(&experts).len();
                    bus.emit(ChatEvent::RosterUpdated {
                        conversations,
                        experts: expert_count,
                    });
                }
                Some(detail) => {
                    tracing::warn!(code = CLIENT_ROSTER_FAILED, detail = %detail, "roster refresh failed");
                    bus.emit(ChatEvent::RosterFailed { detail });
                }
            }
        });
    }
}

/// Applies a finished history fetch unless a newer switch superseded it.
fn finish_history_fetch(
    scope: ChatScope,
    result: Result<Vec<ChatMessage>, HistoryError>,
    guard: &FetchGuard,
    token: u64,
    store: &MessageStore,
    bus: &EventBus,
) {
    match result {
        Ok(messages) => {
            let count = messages.len();
            let applied = guard.apply_if_current(token, || {
                store.replace_all(scope.clone(), messages);
                bus.emit(ChatEvent::HistoryLoaded { scope, count });
            });
            if !applied {
                tracing::debug!(code = CLIENT_HISTORY_SUPERSEDED, "stale history fetch discarded");
            }
        }
        Err(error) => {
            tracing::warn!(code = CLIENT_HISTORY_FAILED, error = %error, "history fetch failed");
            bus.emit(ChatEvent::HistoryFailed {
                scope,
                detail: error.to_string(),
            });
        }
    }
}

fn map_connect_error(error: TransportError) -> ConnectError {
    match error {
        TransportError::Dial(source) => ConnectError::Unreachable(source),
        TransportError::HandshakeRejected { message } => ConnectError::Rejected { message },
        other => ConnectError::Transport(other),
    }
}

/// Serial-number guard for history fetches. Every switch takes a new token;
/// a fetch applies only while its token is still the newest, so a slow
/// response can never overwrite the buffer of a newer view.
#[derive(Clone, Default)]
struct FetchGuard {
    newest: Arc<Mutex<u64>>,
}

impl FetchGuard {
    fn begin(&self) -> u64 {
        let mut newest = lock(&self.newest);
        *newest += 1;
        *newest
    }

    fn invalidate(&self) {
        self.begin();
    }

    /// Runs `apply` while holding the guard so a concurrent `begin` cannot
    /// interleave with a stale application. Returns whether it ran.
    fn apply_if_current(&self, token: u64, apply: impl FnOnce()) -> bool {
        let newest = lock(&self.newest);
        if *newest != token {
            return false;
        }
        apply();
        true
    }
}

/// Fanout of [`ChatEvent`]s to every live subscriber. Closed receivers are
/// pruned on the next emit.
#[derive(Clone, Default)]
struct EventBus {
    subscribers: Arc<Mutex<Vec<mpsc::UnboundedSender<ChatEvent>>>>,
}

impl EventBus {
    fn subscribe(&self) -> mpsc::UnboundedReceiver<ChatEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        lock(&self.subscribers).push(tx);
        rx
    }

    fn emit(&self, event: ChatEvent) {
        lock(&self.subscribers).retain(|subscriber| subscriber.send(event.clone()).is_ok());
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
