//! History service client: REST reads that seed the live buffers.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use thiserror::Error;

use crate::domain::conversation::{ConversationSummary, Expert};
use crate::domain::message::{ChatMessage, UserId};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("history request to {endpoint} failed: {source}")]
    Request {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("history service answered {status} at {endpoint}")]
    Status { status: u16, endpoint: String },
    #[error("history payload from {endpoint} could not be decoded: {source}")]
    Decode {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },
}

/// Read side of the chat backend. One snapshot per call; the live feed
/// afterwards comes from the broker, not from here.
#[async_trait]
pub trait HistoryGateway: Send + Sync {
    async fn community_history(&self) -> Result<Vec<ChatMessage>, HistoryError>;

    async fn conversation_summaries(
        &self,
        me: UserId,
    ) -> Result<Vec<ConversationSummary>, HistoryError>;

    async fn private_messages(
        &self,
        me: UserId,
        other: UserId,
    ) -> Result<Vec<ChatMessage>, HistoryError>;

    async fn expert_roster(&self) -> Result<Vec<Expert>, HistoryError>;
}

/// Some deployments wrap list payloads in a `data` envelope, some return
/// the bare array. Accept both.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Enveloped<T> {
    Wrapped { data: Vec<T> },
    Bare(Vec<T>),
}

impl<T> Enveloped<T> {
    fn into_inner(self) -> Vec<T> {
        match self {
            Enveloped::Wrapped { data } => data,
            Enveloped::Bare(items) => items,
        }
    }
}

pub struct RestHistoryGateway {
    client: Client,
    base_url: String,
}

impl RestHistoryGateway {
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, HistoryError> {
        let endpoint = self.endpoint(path);
        let response = self
            .client
            .get(&endpoint)
            .send()
            .await
            .map_err(|source| HistoryError::Request {
                endpoint: endpoint.clone(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(HistoryError::Status {
                status: status.as_u16(),
                endpoint,
            });
        }

        response
            .json::<T>()
            .await
            .map_err(|source| HistoryError::Decode { endpoint, source })
    }

    async fn get_list<T: DeserializeOwned>(&self, path: &str) -> Result<Vec<T>, HistoryError> {
        let enveloped: Enveloped<T> = self.get_json(path).await?;
        Ok(enveloped.into_inner())
    }
}

#[async_trait]
impl HistoryGateway for RestHistoryGateway {
    async fn community_history(&self) -> Result<Vec<ChatMessage>, HistoryError> {
        self.get_list("/chat/history").await
    }

    async fn conversation_summaries(
        &self,
        me: UserId,
    ) -> Result<Vec<ConversationSummary>, HistoryError> {
        self.get_list(&format!("/chat/conversations?userId={me}")).await
    }

    async fn private_messages(
        &self,
        me: UserId,
        other: UserId,
    ) -> Result<Vec<ChatMessage>, HistoryError> {
        self.get_list(&format!("/chat/private-messages/{other}?userId={me}"))
            .await
    }

    async fn expert_roster(&self) -> Result<Vec<Expert>, HistoryError> {
        self.get_list("/experts").await
    }
}
