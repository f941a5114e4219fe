//! Client layer: the consumer-facing facade plus its history and typing
//! collaborators.

pub mod chat_client;
pub mod history;
pub mod typing;

pub use chat_client::{ChatClient, ConnectError, SendError, SwitchError};
pub use history::{HistoryError, HistoryGateway, RestHistoryGateway};
pub use typing::TypingThrottle;
