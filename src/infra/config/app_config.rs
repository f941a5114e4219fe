use serde::{Deserialize, Serialize};

use crate::router::Destinations;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ChatConfig {
    pub logging: LogConfig,
    pub broker: BrokerConfig,
    pub destinations: Destinations,
    pub history: HistoryConfig,
    pub typing: TypingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogConfig {
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BrokerConfig {
    /// `host:port` of the broker's frame endpoint.
    pub address: String,
    /// Virtual host named in the connect handshake.
    pub vhost: String,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:61613".to_owned(),
            vhost: "plantcare".to_owned(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HistoryConfig {
    pub base_url: String,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080/api".to_owned(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TypingConfig {
    /// Keyboard inactivity after which the stopped-typing probe goes out.
    pub quiet_period_ms: u64,
}

impl Default for TypingConfig {
    fn default() -> Self {
        Self {
            quiet_period_ms: 3_000,
        }
    }
}
