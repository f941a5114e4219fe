mod app_config;
mod file_config;
mod loader;

pub use app_config::{BrokerConfig, ChatConfig, HistoryConfig, LogConfig, TypingConfig};
pub use loader::load;
