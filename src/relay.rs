use std::time::Duration;

use futures_util::future::join_all;
use serde::{Deserialize, Serialize};

use crate::{
    AppError, AppResult, AppState,
    gateway::{GatewayError, MessageHandle, Payload},
    matching::session,
};

const RETRY_SLACK: Duration = Duration::from_millis(100);
const BROADCAST_CHUNK: usize = 25;
const BROADCAST_PAUSE: Duration = Duration::from_secs(1);

/// One inbound message as the command layer hands it over. At most one of
/// the content fields is expected to be set; the first non-empty one wins.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IncomingMessage {
    pub text: Option<String>,
    pub photo: Option<String>,
    pub video: Option<String>,
    pub voice: Option<String>,
    pub sticker: Option<String>,
    pub caption: Option<String>,
}

impl IncomingMessage {
    pub fn into_payload(self) -> Option<Payload> {
        fn non_empty(value: Option<String>) -> Option<String> {
            value.filter(|v| !v.is_empty())
        }

        if let Some(text) = non_empty(self.text) {
            return Some(Payload::Text { text });
        }
        if let Some(file_id) = non_empty(self.photo) {
            return Some(Payload::Photo { file_id, caption: self.caption });
        }
        if let Some(file_id) = non_empty(self.video) {
            return Some(Payload::Video { file_id, caption: self.caption });
        }
        if let Some(file_id) = non_empty(self.voice) {
            return Some(Payload::Voice { file_id });
        }
        if let Some(file_id) = non_empty(self.sticker) {
            return Some(Payload::Sticker { file_id });
        }
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RelayOutcome {
    Delivered,
    NoPartner,
    EmptyMessage,
}

/// Rate-limited send with the single allowed retry after an upstream
/// throttle hint. Anything else fails immediately.
pub(crate) async fn send_with_retry(
    state: &AppState,
    destination: i64,
    payload: Payload,
) -> Result<MessageHandle, GatewayError> {
    state.limiter.acquire(destination).await;
    match state.gateway.send(destination, payload.clone()).await {
        Err(GatewayError::Throttled { retry_after }) => {
            tracing::debug!("throttled towards {destination}, retrying in {retry_after:?}");
            tokio::time::sleep(retry_after + RETRY_SLACK).await;
            state.limiter.acquire(destination).await;
            state.gateway.send(destination, payload).await
        }
        other => other,
    }
}

/// Best-effort send: failures are logged and swallowed.
pub async fn safe_send(state: &AppState, destination: i64, payload: Payload) -> Option<MessageHandle> {
    match send_with_retry(state, destination, payload).await {
        Ok(handle) => Some(handle),
        Err(e) => {
            tracing::warn!("send to {destination} failed: {e}");
            None
        }
    }
}

/// Forward a message to the sender's partner.
///
/// A failed delivery tears the whole session down; one side silently losing
/// messages while the other keeps talking is the worst outcome.
pub async fn relay(state: &AppState, sender: i64, message: IncomingMessage) -> AppResult<RelayOutcome> {
    let Some(link) = state.matching.lock().await.partner_of(sender) else {
        return Ok(RelayOutcome::NoPartner);
    };
    let Some(payload) = message.into_payload() else {
        return Ok(RelayOutcome::EmptyMessage);
    };

    let _ = state.gateway.typing(link.partner_id).await;

    match send_with_retry(state, link.partner_id, payload).await {
        Ok(_) => Ok(RelayOutcome::Delivered),
        Err(e) => {
            tracing::error!("relay from {sender} to {} failed: {e}", link.partner_id);
            let _ = safe_send(
                state,
                sender,
                Payload::text("Message could not be delivered. The session has been closed."),
            )
            .await;
            let _ = session::force_reset(state, sender).await;
            Err(AppError::Delivery(e))
        }
    }
}

/// Fan a text out to many destinations in chunks, pausing between chunks so
/// bulk traffic never saturates the global window. Returns the number of
/// successful deliveries.
pub async fn broadcast_in_batches(state: &AppState, destinations: &[i64], text: &str) -> usize {
    let mut delivered = 0;
    for (index, chunk) in destinations.chunks(BROADCAST_CHUNK).enumerate() {
        if index > 0 {
            tokio::time::sleep(BROADCAST_PAUSE).await;
        }
        let sends = chunk
            .iter()
            .map(|&destination| safe_send(state, destination, Payload::text(text)));
        delivered += join_all(sends).await.into_iter().flatten().count();
    }
    delivered
}
