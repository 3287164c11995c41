//! Messaging gateway client
//!
//! Talks to an Evolution-style HTTP gateway. Each connected phone number is
//! an "instance" addressed by name in the request path.

use async_trait::async_trait;
use pulsecast_common::config::GatewayConfig;
use pulsecast_common::types::{MediaRef, TenantId};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Gateway errors
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Gateway request failed: {0}")]
    Transport(String),

    #[error("Gateway rejected the message with status {status}: {body}")]
    Rejected { status: u16, body: String },
}

/// One outbound message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendRequest {
    pub tenant_id: TenantId,
    pub instance_name: String,
    pub recipient: String,
    pub text: String,
    pub media: Option<MediaRef>,
}

/// Gateway acknowledgement
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SendReceipt {
    /// Identifier used later to correlate delivery receipts
    pub gateway_message_id: Option<String>,
}

/// Send capability; implementations may fail with any [`GatewayError`]
#[async_trait]
pub trait Gateway: Send + Sync {
    async fn send(&self, request: &SendRequest) -> Result<SendReceipt, GatewayError>;
}

#[derive(Debug, Serialize)]
struct TextBody<'a> {
    number: &'a str,
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MediaBody<'a> {
    number: &'a str,
    #[serde(rename = "mediatype")]
    media_type: &'a str,
    #[serde(rename = "mimetype")]
    mime_type: &'a str,
    caption: &'a str,
    media: &'a str,
    file_name: &'a str,
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    key: Option<SendResponseKey>,
}

#[derive(Debug, Deserialize)]
struct SendResponseKey {
    id: Option<String>,
}

/// Mime type announced for a media kind
fn mime_type_for(media_type: &str) -> &'static str {
    match media_type {
        "image" => "image/jpeg",
        "video" => "video/mp4",
        _ => "application/pdf",
    }
}

/// Last path segment of a media URL
fn file_name_of(url: &str) -> &str {
    url.rsplit('/').next().unwrap_or(url)
}

/// HTTP client for the gateway
#[derive(Clone)]
pub struct EvolutionGateway {
    client: Client,
    base_url: String,
    api_key: String,
}

impl EvolutionGateway {
    pub fn new(config: &GatewayConfig) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| GatewayError::Transport(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }
}

#[async_trait]
impl Gateway for EvolutionGateway {
    async fn send(&self, request: &SendRequest) -> Result<SendReceipt, GatewayError> {
        debug!(
            instance = %request.instance_name,
            recipient = %request.recipient,
            media = request.media.is_some(),
            "Sending message through gateway"
        );

        let http = match &request.media {
            Some(media) => {
                let media_type = media.media_type.as_deref().unwrap_or("document");
                let url = format!("{}/message/sendMedia/{}", self.base_url, request.instance_name);
                self.client.post(url).json(&MediaBody {
                    number: &request.recipient,
                    media_type,
                    mime_type: mime_type_for(media_type),
                    caption: &request.text,
                    media: &media.url,
                    file_name: file_name_of(&media.url),
                })
            }
            None => {
                let url = format!("{}/message/sendText/{}", self.base_url, request.instance_name);
                self.client.post(url).json(&TextBody {
                    number: &request.recipient,
                    text: &request.text,
                })
            }
        };

        let response = http
            .header("apikey", &self.api_key)
            .send()
            .await
            .map_err(|e| {
                warn!("Gateway request failed: {}", e);
                GatewayError::Transport(e.to_string())
            })?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Rejected { status, body });
        }

        // Any 2xx means the gateway took the message; a retry would send it twice
        let gateway_message_id = match response.text().await {
            Ok(text) => match serde_json::from_str::<SendResponse>(&text) {
                Ok(body) => body.key.and_then(|k| k.id),
                Err(e) => {
                    warn!(
                        recipient = %request.recipient,
                        "Gateway accepted the message with an unreadable body: {}",
                        e
                    );
                    None
                }
            },
            Err(e) => {
                warn!(
                    recipient = %request.recipient,
                    "Failed to read gateway response body: {}",
                    e
                );
                None
            }
        };

        Ok(SendReceipt { gateway_message_id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use uuid::Uuid;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn gateway(server: &MockServer) -> EvolutionGateway {
        EvolutionGateway::new(&GatewayConfig {
            base_url: format!("{}/", server.uri()),
            api_key: "secret".to_string(),
            timeout_secs: 5,
        })
        .unwrap()
    }

    fn request(media: Option<MediaRef>) -> SendRequest {
        SendRequest {
            tenant_id: Uuid::new_v4(),
            instance_name: "sales-1".to_string(),
            recipient: "5511999990000".to_string(),
            text: "Hi Ana".to_string(),
            media,
        }
    }

    #[tokio::test]
    async fn test_send_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/message/sendText/sales-1"))
            .and(header("apikey", "secret"))
            .and(body_json(json!({"number": "5511999990000", "text": "Hi Ana"})))
            .respond_with(
                ResponseTemplate::new(201).set_body_json(json!({"key": {"id": "BAE5F1"}})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let receipt = gateway(&server).send(&request(None)).await.unwrap();
        assert_eq!(receipt.gateway_message_id.as_deref(), Some("BAE5F1"));
    }

    #[tokio::test]
    async fn test_send_media_defaults() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/message/sendMedia/sales-1"))
            .and(body_json(json!({
                "number": "5511999990000",
                "mediatype": "document",
                "mimetype": "application/pdf",
                "caption": "Hi Ana",
                "media": "https://cdn.example.com/files/catalog.pdf",
                "fileName": "catalog.pdf"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "PENDING"})))
            .expect(1)
            .mount(&server)
            .await;

        let receipt = gateway(&server)
            .send(&request(Some(MediaRef {
                url: "https://cdn.example.com/files/catalog.pdf".to_string(),
                media_type: None,
            })))
            .await
            .unwrap();
        assert_eq!(receipt.gateway_message_id, None);
    }

    #[tokio::test]
    async fn test_accepted_send_with_plain_text_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/message/sendText/sales-1"))
            .respond_with(ResponseTemplate::new(201).set_body_string("queued"))
            .expect(1)
            .mount(&server)
            .await;

        let receipt = gateway(&server).send(&request(None)).await.unwrap();
        assert_eq!(receipt, SendReceipt::default());
    }

    #[tokio::test]
    async fn test_rejection_surfaces_status_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_string("instance not connected"))
            .mount(&server)
            .await;

        let err = gateway(&server).send(&request(None)).await.unwrap_err();
        match err {
            GatewayError::Rejected { status, body } => {
                assert_eq!(status, 400);
                assert_eq!(body, "instance not connected");
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_media_helpers() {
        assert_eq!(mime_type_for("image"), "image/jpeg");
        assert_eq!(mime_type_for("video"), "video/mp4");
        assert_eq!(mime_type_for("audio"), "application/pdf");
        assert_eq!(file_name_of("https://cdn.example.com/a/b.png"), "b.png");
    }
}
