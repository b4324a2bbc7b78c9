use std::{
    collections::{HashMap, HashSet},
    sync::{Mutex, atomic::{AtomicI64, Ordering}},
    time::Duration,
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

/// A single relayed message body. Exactly one kind per send.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum Payload {
    Text { text: String },
    Photo { file_id: String, caption: Option<String> },
    Video { file_id: String, caption: Option<String> },
    Voice { file_id: String },
    Sticker { file_id: String },
}

impl Payload {
    pub fn text(text: impl Into<String>) -> Self {
        Payload::Text { text: text.into() }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct MessageHandle {
    pub message_id: i64,
}

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// The upstream asked us to slow down; retry no earlier than the hint.
    #[error("upstream throttled, retry after {retry_after:?}")]
    Throttled { retry_after: Duration },

    #[error("delivery failed: {0}")]
    Delivery(String),
}

/// Seam to the wire-level chat transport. Everything past this trait is an
/// external collaborator.
#[async_trait]
pub trait Gateway: Send + Sync {
    async fn send(&self, destination: i64, payload: Payload) -> Result<MessageHandle, GatewayError>;
    async fn edit(&self, destination: i64, message_id: i64, text: &str) -> Result<(), GatewayError>;
    async fn delete(&self, destination: i64, message_id: i64) -> Result<(), GatewayError>;
    async fn typing(&self, destination: i64) -> Result<(), GatewayError>;
}

/// JSON-over-HTTP client for the real transport process.
pub struct HttpGateway {
    base_url: String,
    client: reqwest::Client,
}

impl HttpGateway {
    pub fn new(base_url: String) -> Self {
        Self {
            base_url,
            client: reqwest::Client::new(),
        }
    }

    async fn post(&self, path: &str, body: serde_json::Value) -> Result<reqwest::Response, GatewayError> {
        let resp = self
            .client
            .post(format!("{}/{path}", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| GatewayError::Delivery(e.to_string()))?;

        if resp.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = resp
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok())
                .unwrap_or(1u64);
            return Err(GatewayError::Throttled {
                retry_after: Duration::from_secs(retry_after),
            });
        }

        if !resp.status().is_success() {
            return Err(GatewayError::Delivery(format!("upstream status {}", resp.status())));
        }

        Ok(resp)
    }
}

#[async_trait]
impl Gateway for HttpGateway {
    async fn send(&self, destination: i64, payload: Payload) -> Result<MessageHandle, GatewayError> {
        let resp = self
            .post("send", json!({ "destination": destination, "payload": payload }))
            .await?;
        resp.json().await.map_err(|e| GatewayError::Delivery(e.to_string()))
    }

    async fn edit(&self, destination: i64, message_id: i64, text: &str) -> Result<(), GatewayError> {
        self.post(
            "edit",
            json!({ "destination": destination, "message_id": message_id, "text": text }),
        )
        .await?;
        Ok(())
    }

    async fn delete(&self, destination: i64, message_id: i64) -> Result<(), GatewayError> {
        self.post("delete", json!({ "destination": destination, "message_id": message_id }))
            .await?;
        Ok(())
    }

    async fn typing(&self, destination: i64) -> Result<(), GatewayError> {
        self.post("typing", json!({ "destination": destination })).await?;
        Ok(())
    }
}

/// In-process gateway that records every send. Used for local development
/// and tests; failures and throttles can be injected per destination.
#[derive(Default)]
pub struct MemoryGateway {
    sent: Mutex<Vec<(i64, Payload)>>,
    failing: Mutex<HashSet<i64>>,
    throttled: Mutex<HashMap<i64, u32>>,
    next_id: AtomicI64,
}

impl MemoryGateway {
    pub fn sent(&self) -> Vec<(i64, Payload)> {
        self.sent.lock().unwrap().clone()
    }

    /// Make every send to `destination` fail hard.
    pub fn fail_destination(&self, destination: i64) {
        self.failing.lock().unwrap().insert(destination);
    }

    /// Throttle the next `times` sends to `destination`.
    pub fn throttle_destination(&self, destination: i64, times: u32) {
        self.throttled.lock().unwrap().insert(destination, times);
    }
}

#[async_trait]
impl Gateway for MemoryGateway {
    async fn send(&self, destination: i64, payload: Payload) -> Result<MessageHandle, GatewayError> {
        {
            let mut throttled = self.throttled.lock().unwrap();
            if let Some(left) = throttled.get_mut(&destination) {
                if *left > 0 {
                    *left -= 1;
                    return Err(GatewayError::Throttled {
                        retry_after: Duration::from_millis(10),
                    });
                }
            }
        }
        if self.failing.lock().unwrap().contains(&destination) {
            return Err(GatewayError::Delivery("injected failure".to_string()));
        }
        self.sent.lock().unwrap().push((destination, payload));
        Ok(MessageHandle {
            message_id: self.next_id.fetch_add(1, Ordering::Relaxed),
        })
    }

    async fn edit(&self, _destination: i64, _message_id: i64, _text: &str) -> Result<(), GatewayError> {
        Ok(())
    }

    async fn delete(&self, _destination: i64, _message_id: i64) -> Result<(), GatewayError> {
        Ok(())
    }

    async fn typing(&self, _destination: i64) -> Result<(), GatewayError> {
        Ok(())
    }
}
