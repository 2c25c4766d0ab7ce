//! Outbound SMS providers.
//!
//! [`MessageBirdClient`] talks to the MessageBird REST API. When no access
//! key is configured the relay falls back to [`DryRunProvider`], which only
//! logs what would have been sent.

use async_trait::async_trait;
use log::info;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::queue::Batch;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API rejected message ({status}): {description}")]
    Api { status: u16, description: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub id: String,
}

#[async_trait]
pub trait SmsProvider: Send + Sync {
    async fn send(&self, batch: &Batch) -> Result<SentMessage, ProviderError>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct NewMessage<'a> {
    originator: &'a str,
    recipients: Vec<String>,
    body: &'a str,
    #[serde(rename = "type")]
    kind: &'static str,
    #[serde(rename = "datacoding")]
    data_coding: &'static str,
    reference: String,
    type_details: Map<String, Value>,
}

impl<'a> NewMessage<'a> {
    fn from_batch(batch: &'a Batch) -> Self {
        let mut type_details = Map::new();
        if !batch.udh.is_empty() {
            type_details.insert("udh".into(), Value::String(batch.udh.clone()));
        }

        Self {
            originator: &batch.originator,
            recipients: batch.recipients.iter().map(|r| r.to_string()).collect(),
            body: &batch.body,
            kind: "binary",
            data_coding: batch.encoding.as_str(),
            reference: batch.reference.to_string(),
            type_details,
        }
    }
}

#[derive(Deserialize)]
struct CreatedMessage {
    id: String,
}

#[derive(Deserialize)]
struct ApiErrors {
    #[serde(default)]
    errors: Vec<ApiErrorEntry>,
}

#[derive(Deserialize)]
struct ApiErrorEntry {
    #[serde(default)]
    description: String,
}

pub struct MessageBirdClient {
    endpoint: String,
    access_key: String,
    client: reqwest::Client,
}

impl MessageBirdClient {
    pub fn new(endpoint: impl Into<String>, access_key: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            access_key: access_key.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl SmsProvider for MessageBirdClient {
    async fn send(&self, batch: &Batch) -> Result<SentMessage, ProviderError> {
        let url = format!("{}/messages", self.endpoint);
        let resp = self
            .client
            .post(&url)
            .header("Authorization", format!("AccessKey {}", self.access_key))
            .json(&NewMessage::from_batch(batch))
            .send()
            .await?;

        let status = resp.status();
        if status.is_success() {
            let created: CreatedMessage = resp.json().await?;
            return Ok(SentMessage { id: created.id });
        }

        let text = resp.text().await.unwrap_or_default();
        let description = serde_json::from_str::<ApiErrors>(&text)
            .ok()
            .and_then(|e| e.errors.into_iter().next())
            .map(|e| e.description)
            .filter(|d| !d.is_empty())
            .unwrap_or_else(|| status.to_string());

        Err(ProviderError::Api {
            status: status.as_u16(),
            description,
        })
    }
}

pub struct DryRunProvider;

#[async_trait]
impl SmsProvider for DryRunProvider {
    async fn send(&self, batch: &Batch) -> Result<SentMessage, ProviderError> {
        info!(
            "[dry-run] {} -> {:?} ({}, udh={:?}): {}",
            batch.originator,
            batch.recipients,
            batch.encoding.as_str(),
            batch.udh,
            batch.body
        );
        Ok(SentMessage {
            id: format!("dry-run-{}", batch.reference),
        })
    }
}
