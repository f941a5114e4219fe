use serde::Deserialize;

use crate::infra::config::{BrokerConfig, ChatConfig, HistoryConfig, LogConfig, TypingConfig};
use crate::router::Destinations;

#[derive(Debug, Deserialize, Default)]
pub struct FileConfig {
    pub logging: Option<FileLogConfig>,
    pub broker: Option<FileBrokerConfig>,
    pub destinations: Option<FileDestinations>,
    pub history: Option<FileHistoryConfig>,
    pub typing: Option<FileTypingConfig>,
}

impl FileConfig {
    pub fn merge_into(self, config: &mut ChatConfig) {
        if let Some(logging) = self.logging {
            logging.merge_into(&mut config.logging);
        }

        if let Some(broker) = self.broker {
            broker.merge_into(&mut config.broker);
        }

        if let Some(destinations) = self.destinations {
            destinations.merge_into(&mut config.destinations);
        }

        if let Some(history) = self.history {
            history.merge_into(&mut config.history);
        }

        if let Some(typing) = self.typing {
            typing.merge_into(&mut config.typing);
        }
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct FileLogConfig {
    pub level: Option<String>,
}

impl FileLogConfig {
    fn merge_into(self, config: &mut LogConfig) {
        if let Some(level) = self.level {
            config.level = level;
        }
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct FileBrokerConfig {
    pub address: Option<String>,
    pub vhost: Option<String>,
}

impl FileBrokerConfig {
    fn merge_into(self, config: &mut BrokerConfig) {
        if let Some(address) = self.address {
            config.address = address;
        }

        if let Some(vhost) = self.vhost {
            config.vhost = vhost;
        }
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct FileDestinations {
    pub community_topic: Option<String>,
    pub private_queue: Option<String>,
    pub send: Option<String>,
    pub typing: Option<String>,
}

impl FileDestinations {
    fn merge_into(self, config: &mut Destinations) {
        if let Some(community_topic) = self.community_topic {
            config.community_topic = community_topic;
        }

        if let Some(private_queue) = self.private_queue {
            config.private_queue = private_queue;
        }

        if let Some(send) = self.send {
            config.send = send;
        }

        if let Some(typing) = self.typing {
            config.typing = typing;
        }
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct FileHistoryConfig {
    pub base_url: Option<String>,
}

impl FileHistoryConfig {
    fn merge_into(self, config: &mut HistoryConfig) {
        if let Some(base_url) = self.base_url {
            config.base_url = base_url;
        }
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct FileTypingConfig {
    pub quiet_period_ms: Option<u64>,
}

impl FileTypingConfig {
    fn merge_into(self, config: &mut TypingConfig) {
        if let Some(quiet_period_ms) = self.quiet_period_ms {
            config.quiet_period_ms = quiet_period_ms;
        }
    }
}
