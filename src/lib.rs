//! Real-time chat core for a plant-care community platform.
//!
//! A frame-based broker session ([`TransportSession`]), a router splitting
//! community and private traffic, per-scope message buffers and a
//! conversation directory sit behind one facade, [`ChatClient`]. A UI
//! drives the facade and binds to its read models; everything
//! network-facing stays behind injectable seams ([`BrokerDialer`],
//! [`HistoryGateway`]).

pub mod client;
pub mod domain;
pub mod infra;
pub mod router;
pub mod transport;

#[cfg(test)]
mod test_support;

pub use client::{
    ChatClient, ConnectError, HistoryError, HistoryGateway, RestHistoryGateway, SendError,
    SwitchError,
};
pub use domain::conversation::{
    ChatScope, Conversation, ConversationId, ConversationSummary, Counterpart, Expert,
};
pub use domain::events::{ChatEvent, ConnectionState, SessionFault};
pub use domain::message::{ChatMessage, ChatType, Identity, TypingSignal, UserId};
pub use domain::store::StoreChange;
pub use infra::config::ChatConfig;
pub use infra::error::SetupError;
pub use router::{Destinations, RouteError};
pub use transport::{BrokerDialer, TcpDialer, TransportError, TransportSession};
