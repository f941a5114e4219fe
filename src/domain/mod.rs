//! Domain layer: message model, conversation directory and scope buffers.

pub mod conversation;
pub mod directory;
pub mod events;
pub mod message;
pub mod store;
