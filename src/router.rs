//! Channel router: binds broker subscriptions to typed chat traffic and
//! serializes outgoing messages onto their destinations.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::conversation::ConversationId;
use crate::domain::message::{ChatMessage, MessageInvariantViolation, TypingSignal, UserId};
use crate::transport::frame::Frame;
use crate::transport::session::FrameHandler;
use crate::transport::{TransportError, TransportSession};

const ROUTER_FRAME_UNPARSEABLE: &str = "CHAT_ROUTER_FRAME_UNPARSEABLE";
const ROUTER_MESSAGE_REJECTED: &str = "CHAT_ROUTER_MESSAGE_REJECTED";
const ROUTER_ROUTE_REGISTERED: &str = "CHAT_ROUTER_ROUTE_REGISTERED";

/// Broker destinations the chat runs on. Values mirror the broker's
/// server-side configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Destinations {
    pub community_topic: String,
    pub private_queue: String,
    pub send: String,
    pub typing: String,
}

impl Default for Destinations {
    fn default() -> Self {
        Self {
            community_topic: "/topic/public".to_owned(),
            private_queue: "/user/queue/private".to_owned(),
            send: "/app/chat.send".to_owned(),
            typing: "/app/chat.typing".to_owned(),
        }
    }
}

/// Typed traffic the router hands to its observer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouterEvent {
    Community(ChatMessage),
    Private(ChatMessage),
    Typing(TypingSignal),
    Rejected {
        message: ChatMessage,
        violation: MessageInvariantViolation,
    },
}

pub type RouterObserver = Arc<dyn Fn(RouterEvent) + Send + Sync>;
pub type MessageHandler = Arc<dyn Fn(ChatMessage) + Send + Sync>;

#[derive(Debug, Error)]
pub enum RouteError {
    #[error("failed to encode the outgoing payload: {0}")]
    Encode(#[from] serde_json::Error),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Everything arriving on the private queue. Typing probes share the queue
/// with real messages and are told apart by shape.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PrivateInbound {
    Message(ChatMessage),
    Typing(TypingSignal),
}

/// Maps the two broker subscriptions onto typed traffic. Per-conversation
/// routes are a client-side filter over the single private inbox; they
/// accumulate for the lifetime of the router and survive reconnects.
pub struct ChannelRouter {
    plan: Destinations,
    private_routes: Arc<Mutex<HashMap<ConversationId, MessageHandler>>>,
}

impl ChannelRouter {
    pub fn new(plan: Destinations) -> Self {
        Self {
            plan,
            private_routes: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn plan(&self) -> &Destinations {
        &self.plan
    }

    /// Installs the community topic subscription. Every valid frame reaches
    /// the observer as `Community`.
    pub async fn subscribe_community(
        &self,
        session: &mut TransportSession,
        observer: RouterObserver,
    ) -> Result<(), TransportError> {
        session
            .subscribe(&self.plan.community_topic, community_handler(observer))
            .await
    }

    /// Installs the single filtered private inbox. Messages additionally
    /// fan out to the per-conversation route if one is registered.
    pub async fn open_private_inbox(
        &self,
        session: &mut TransportSession,
        observer: RouterObserver,
    ) -> Result<(), TransportError> {
        let handler = private_handler(observer, Arc::clone(&self.private_routes));
        session.subscribe(&self.plan.private_queue, handler).await
    }

    /// Registers (or replaces) the handler receiving live messages for one
    /// participant pair. Purely local; no broker traffic is involved.
    pub fn subscribe_private(
        &self,
        me: UserId,
        counterpart: UserId,
        on_message: MessageHandler,
    ) -> ConversationId {
        let id = ConversationId::derive(me, counterpart);
        lock(&self.private_routes).insert(id.clone(), on_message);
        tracing::debug!(code = ROUTER_ROUTE_REGISTERED, conversation = %id, "private route registered");
        id
    }

    pub async fn publish(
        &self,
        session: &TransportSession,
        message: &ChatMessage,
    ) -> Result<(), RouteError> {
        let body = serde_json::to_string(message)?;
        session.publish(&self.plan.send, body).await?;
        Ok(())
    }

    pub async fn publish_typing(
        &self,
        session: &TransportSession,
        signal: &TypingSignal,
    ) -> Result<(), RouteError> {
        let body = serde_json::to_string(signal)?;
        session.publish(&self.plan.typing, body).await?;
        Ok(())
    }
}

fn community_handler(observer: RouterObserver) -> FrameHandler {
    Arc::new(move |frame: Frame| {
        let message: ChatMessage = match serde_json::from_str(&frame.body) {
            Ok(message) => message,
            Err(error) => {
                tracing::warn!(
                    code = ROUTER_FRAME_UNPARSEABLE,
                    error = %error,
                    "community frame dropped"
                );
                return;
            }
        };
        deliver_checked(&observer, message, RouterEvent::Community);
    })
}

fn private_handler(
    observer: RouterObserver,
    routes: Arc<Mutex<HashMap<ConversationId, MessageHandler>>>,
) -> FrameHandler {
    Arc::new(move |frame: Frame| {
        let inbound: PrivateInbound = match serde_json::from_str(&frame.body) {
            Ok(inbound) => inbound,
            Err(error) => {
                tracing::warn!(
                    code = ROUTER_FRAME_UNPARSEABLE,
                    error = %error,
                    "private frame dropped"
                );
                return;
            }
        };

        match inbound {
            PrivateInbound::Typing(signal) => observer(RouterEvent::Typing(signal)),
            PrivateInbound::Message(message) => {
                let route = message
                    .conversation_id
                    .as_ref()
                    .and_then(|id| lock(&routes).get(id).map(Arc::clone));
                if deliver_checked(&observer, message.clone(), RouterEvent::Private) {
                    if let Some(route) = route {
                        route(message);
                    }
                }
            }
        }
    })
}

/// Validates and delivers one message; invalid ones become `Rejected`.
/// Returns whether the message was valid.
fn deliver_checked(
    observer: &RouterObserver,
    message: ChatMessage,
    wrap: fn(ChatMessage) -> RouterEvent,
) -> bool {
    match message.validate() {
        Ok(()) => {
            observer(wrap(message));
            true
        }
        Err(violation) => {
            tracing::warn!(
                code = ROUTER_MESSAGE_REJECTED,
                violation = %violation,
                sender = message.sender_id,
                "inbound message rejected"
            );
            observer(RouterEvent::Rejected { message, violation });
            false
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
