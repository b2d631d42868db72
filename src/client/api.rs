//! Transport used by the message surface. [`HttpMessagingClient`] talks to
//! the `/api/messages` endpoints; tests substitute an in-process fake.

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::error::{ClientError, ClientResult};
use crate::models::conversation::ConversationSummary;
use crate::models::message::{FormattedMessage, MessageKind};

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    pub token: String,
    /// How often an open conversation re-fetches its history.
    pub poll_interval: Duration,
    pub request_timeout: Duration,
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            token: token.into(),
            poll_interval: Duration::from_secs(5),
            request_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}

#[async_trait]
pub trait MessagingApi: Send + Sync + 'static {
    async fn list_conversations(&self) -> ClientResult<Vec<ConversationSummary>>;

    async fn list_communities(&self) -> ClientResult<Vec<ConversationSummary>>;

    /// Fetching history also acknowledges it on the server.
    async fn history(
        &self,
        conversation_id: &str,
        kind: MessageKind,
    ) -> ClientResult<Vec<FormattedMessage>>;

    async fn send(
        &self,
        conversation_id: &str,
        kind: MessageKind,
        text: &str,
    ) -> ClientResult<FormattedMessage>;

    async fn mark_read(&self, message_id: &str) -> ClientResult<()>;
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    success: bool,
    data: Option<T>,
    error: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SendBody<'a> {
    conversation_id: &'a str,
    #[serde(rename = "type")]
    kind: &'a str,
    text: &'a str,
}

pub struct HttpMessagingClient {
    client: reqwest::Client,
    config: ClientConfig,
}

impl HttpMessagingClient {
    pub fn new(config: ClientConfig) -> ClientResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/api/messages{}",
            self.config.base_url.trim_end_matches('/'),
            path
        )
    }

    async fn unwrap_envelope<T: DeserializeOwned>(response: reqwest::Response) -> ClientResult<T> {
        let status = response.status();
        let body = response.text().await?;

        let envelope: Envelope<T> = serde_json::from_str(&body).map_err(|e| {
            if status.is_success() {
                ClientError::Decode(e.to_string())
            } else {
                ClientError::Api {
                    status: status.as_u16(),
                    message: body.clone(),
                }
            }
        })?;

        if !status.is_success() || !envelope.success {
            return Err(ClientError::Api {
                status: status.as_u16(),
                message: envelope
                    .error
                    .unwrap_or_else(|| "Request failed".to_string()),
            });
        }

        envelope
            .data
            .ok_or_else(|| ClientError::Decode("Response carried no data".to_string()))
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> ClientResult<T> {
        let response = self
            .client
            .get(self.url(path))
            .bearer_auth(&self.config.token)
            .query(query)
            .send()
            .await?;
        Self::unwrap_envelope(response).await
    }
}

#[async_trait]
impl MessagingApi for HttpMessagingClient {
    async fn list_conversations(&self) -> ClientResult<Vec<ConversationSummary>> {
        self.get("/conversations", &[]).await
    }

    async fn list_communities(&self) -> ClientResult<Vec<ConversationSummary>> {
        self.get("/communities/joined", &[]).await
    }

    async fn history(
        &self,
        conversation_id: &str,
        kind: MessageKind,
    ) -> ClientResult<Vec<FormattedMessage>> {
        self.get(
            "/history",
            &[("conversationId", conversation_id), ("type", kind.as_wire())],
        )
        .await
    }

    async fn send(
        &self,
        conversation_id: &str,
        kind: MessageKind,
        text: &str,
    ) -> ClientResult<FormattedMessage> {
        let response = self
            .client
            .post(self.url("/send"))
            .bearer_auth(&self.config.token)
            .json(&SendBody {
                conversation_id,
                kind: kind.as_wire(),
                text,
            })
            .send()
            .await?;
        Self::unwrap_envelope(response).await
    }

    async fn mark_read(&self, message_id: &str) -> ClientResult<()> {
        let response = self
            .client
            .post(self.url(&format!("/read/{}", message_id)))
            .bearer_auth(&self.config.token)
            .send()
            .await?;
        Self::unwrap_envelope::<serde_json::Value>(response).await?;
        Ok(())
    }
}
