use axum::{Json, Router, debug_handler, extract::State, routing::post};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::{AppError, AppResult, AppState, matching::session, profiles, relay};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/prune", post(prune_sessions))
        .route("/broadcast", post(broadcast))
}

fn require_operator(state: &AppState, operator_id: i64) -> AppResult<()> {
    if operator_id == state.config.operator_chat_id {
        Ok(())
    } else {
        Err(AppError::Validation("operator id mismatch".to_string()))
    }
}

#[derive(Deserialize)]
struct PruneRequest {
    operator_id: i64,
    /// Deletion only happens on an explicit `true`; anything else previews.
    #[serde(default)]
    confirm: bool,
}

#[debug_handler]
async fn prune_sessions(
    State(state): State<AppState>,
    Json(request): Json<PruneRequest>,
) -> AppResult<Json<Value>> {
    require_operator(&state, request.operator_id)?;

    let retention_days = state.config.session_retention_days;
    if !request.confirm {
        let eligible = session::count_prunable(&state.db_pool, retention_days).await?;
        return Ok(Json(json!({ "eligible": eligible, "deleted": 0 })));
    }

    let deleted = session::prune(&state.db_pool, retention_days).await?;
    Ok(Json(json!({ "deleted": deleted })))
}

#[derive(Deserialize)]
struct BroadcastRequest {
    operator_id: i64,
    text: String,
    /// Defaults to every known profile.
    destinations: Option<Vec<i64>>,
}

#[debug_handler]
async fn broadcast(
    State(state): State<AppState>,
    Json(request): Json<BroadcastRequest>,
) -> AppResult<Json<Value>> {
    require_operator(&state, request.operator_id)?;
    if request.text.trim().is_empty() {
        return Err(AppError::Validation("broadcast text must not be empty".to_string()));
    }

    let destinations = match request.destinations {
        Some(destinations) => destinations,
        None => profiles::all_user_ids(&state.db_pool).await?,
    };

    tracing::info!("broadcasting to {} destinations", destinations.len());
    let delivered = relay::broadcast_in_batches(&state, &destinations, &request.text).await;
    Ok(Json(json!({ "requested": destinations.len(), "delivered": delivered })))
}
