// Sender Gateway Client - WhatsApp relay (Fonnte-style HTTP API)
// Outbound text messages and download of inbound media

use async_trait::async_trait;
use serde::{Deserialize, Deserializer};

use crate::error::{ApiError, GatewayError};
use crate::resilient::ResilientClient;

// ============================================================================
// INBOUND ENVELOPE
// ============================================================================

/// Webhook payload posted by the gateway for each received message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct InboundMessage {
    #[serde(default)]
    pub sender: String,

    #[serde(default, alias = "text")]
    pub message: String,

    /// Media URL when the message carries a photo
    #[serde(default, alias = "media_url", deserialize_with = "empty_as_none")]
    pub url: Option<String>,

    #[serde(default, alias = "message_id", deserialize_with = "string_or_number")]
    pub id: Option<String>,

    #[serde(default, deserialize_with = "empty_as_none")]
    pub filename: Option<String>,
}

impl InboundMessage {
    pub fn text(sender: &str, message: &str) -> Self {
        InboundMessage {
            sender: sender.to_string(),
            message: message.to_string(),
            ..Default::default()
        }
    }

    pub fn has_media(&self) -> bool {
        self.url.is_some()
    }
}

fn empty_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value: Option<String> = Option::deserialize(deserializer)?;
    Ok(value.filter(|s| !s.trim().is_empty()))
}

fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value: Option<serde_json::Value> = Option::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) if !s.trim().is_empty() => Some(s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

// ============================================================================
// GATEWAY TRAIT
// ============================================================================

#[async_trait]
pub trait MessageGateway: Send + Sync {
    /// Deliver one text message to `target`.
    async fn send(&self, target: &str, text: &str) -> Result<(), GatewayError>;

    /// Download media referenced by an inbound message.
    async fn fetch_media(&self, url: &str) -> Result<Vec<u8>, GatewayError>;
}

// ============================================================================
// FONNTE CLIENT
// ============================================================================

#[derive(Deserialize)]
struct SendResponse {
    #[serde(default = "default_true")]
    status: bool,
    #[serde(default)]
    reason: Option<String>,
}

fn default_true() -> bool {
    true
}

pub struct FonnteGateway {
    client: ResilientClient,
    send_url: String,
    token: String,
}

impl FonnteGateway {
    pub fn new(client: ResilientClient, send_url: &str, token: &str) -> Self {
        FonnteGateway {
            client,
            send_url: send_url.to_string(),
            token: token.to_string(),
        }
    }
}

#[async_trait]
impl MessageGateway for FonnteGateway {
    async fn send(&self, target: &str, text: &str) -> Result<(), GatewayError> {
        let form = [("target", target), ("message", text)];

        let reply: SendResponse = self
            .client
            .send_json("gateway", |http| {
                http.post(&self.send_url)
                    .header("Authorization", &self.token)
                    .form(&form)
            })
            .await
            .map_err(|source| GatewayError::Send {
                target: target.to_string(),
                source,
            })?;

        if !reply.status {
            return Err(GatewayError::Rejected {
                target: target.to_string(),
                reason: reply.reason.unwrap_or_else(|| "unknown".to_string()),
            });
        }

        tracing::debug!(recipient = target, "Message delivered to gateway");
        Ok(())
    }

    async fn fetch_media(&self, url: &str) -> Result<Vec<u8>, GatewayError> {
        let response = self
            .client
            .send("gateway-media", |http| http.get(url))
            .await
            .map_err(GatewayError::Media)?;

        let bytes = response
            .bytes()
            .await
            .map_err(|e| GatewayError::Media(ApiError::Http(e)))?;
        Ok(bytes.to_vec())
    }
}
