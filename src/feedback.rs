use axum::{Json, Router, debug_handler, extract::State, routing::post};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::{
    AppError, AppResult, AppState, db,
    gateway::Payload,
    matching::session::{self, ChatSession},
    profiles, relay,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/rate", post(rate_session))
        .route("/block", post(block_partner))
        .route("/report", post(report_partner))
        .route("/done", post(finish_feedback))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Rating {
    Like,
    Dislike,
}

impl Rating {
    fn stored(self) -> i64 {
        match self {
            Rating::Like => 1,
            Rating::Dislike => -1,
        }
    }

    fn karma_delta(self) -> i64 {
        match self {
            Rating::Like => 5,
            Rating::Dislike => -10,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportReason {
    Illegal,
    Harassment,
    HateSpeech,
    Scam,
    Spam,
    Rude,
}

impl ReportReason {
    pub fn penalty(self) -> i64 {
        match self {
            ReportReason::Illegal => -50,
            ReportReason::Harassment => -40,
            ReportReason::HateSpeech => -30,
            ReportReason::Scam => -30,
            ReportReason::Spam => -15,
            ReportReason::Rude => -10,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ReportReason::Illegal => "illegal or pornographic content",
            ReportReason::Harassment => "sexual harassment",
            ReportReason::HateSpeech => "hate speech",
            ReportReason::Scam => "scam or fraud",
            ReportReason::Spam => "spam or promotion",
            ReportReason::Rude => "rude or unpleasant behavior",
        }
    }
}

/// Adjust a user's karma, clamped into `[0, 200]` by the store itself.
/// Clamping is lossy: overshoot past a bound is forgotten, not banked.
pub async fn update_karma(db_pool: &SqlitePool, user_id: i64, delta: i64) -> AppResult<()> {
    sqlx::query("UPDATE user_profiles SET karma = MAX(0, MIN(200, karma + ?)) WHERE user_id = ?")
        .bind(delta)
        .bind(user_id)
        .execute(db_pool)
        .await?;
    tracing::info!("karma of user {user_id} adjusted by {delta}");
    Ok(())
}

/// Record a like/dislike for a session. Write-once per user per session;
/// the partner's karma moves by +5 or -10.
pub async fn rate(state: &AppState, session_id: Uuid, rater_id: i64, value: Rating) -> AppResult<()> {
    let session = require_session(&state.db_pool, session_id).await?;
    let (existing, partner_id) = rating_slot(&session, rater_id)?;
    if existing.is_some() {
        return Err(AppError::Validation("rating already recorded".to_string()));
    }

    let query = if session.user1_id == rater_id {
        "UPDATE chat_sessions SET user1_rating = ? WHERE session_id = ?"
    } else {
        "UPDATE chat_sessions SET user2_rating = ? WHERE session_id = ?"
    };
    sqlx::query(query)
        .bind(value.stored())
        .bind(session_id.to_string())
        .execute(&state.db_pool)
        .await?;

    update_karma(&state.db_pool, partner_id, value.karma_delta()).await
}

/// Penalize the partner for the given reason and alert the operator channel.
///
/// Nothing stops the same reporter from reporting the same session again,
/// and every submission re-applies the penalty.
pub async fn report(
    state: &AppState,
    session_id: Uuid,
    reporter_id: i64,
    reason: ReportReason,
) -> AppResult<()> {
    let session = require_session(&state.db_pool, session_id).await?;
    let reported_id = partner_in(&session, reporter_id)?;

    update_karma(&state.db_pool, reported_id, reason.penalty()).await?;

    let audit = format!(
        "New user report\n\nreporter: {reporter_id}\nreported: {reported_id}\nsession: {session_id}\nreason: {} (karma {})",
        reason.label(),
        reason.penalty(),
    );
    let _ = relay::safe_send(state, state.config.operator_chat_id, Payload::text(audit)).await;
    Ok(())
}

/// Block the partner of the given session. Returns whether a new block row
/// was created; repeating the call is harmless.
pub async fn block(state: &AppState, session_id: Uuid, blocker_id: i64) -> AppResult<bool> {
    let session = require_session(&state.db_pool, session_id).await?;
    let blocked_id = partner_in(&session, blocker_id)?;
    create_block(&state.db_pool, blocker_id, blocked_id).await
}

pub async fn create_block(db_pool: &SqlitePool, blocker_id: i64, blocked_id: i64) -> AppResult<bool> {
    let result = sqlx::query(
        "INSERT OR IGNORE INTO blocks (blocker_id, blocked_id, created_at) VALUES (?, ?, ?)",
    )
    .bind(blocker_id)
    .bind(blocked_id)
    .bind(db::now_rfc3339())
    .execute(db_pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Has either side blocked the other?
pub async fn is_blocked(db_pool: &SqlitePool, a: i64, b: i64) -> AppResult<bool> {
    let row: Option<(i64,)> = sqlx::query_as(
        "SELECT 1 FROM blocks
         WHERE (blocker_id = ? AND blocked_id = ?) OR (blocker_id = ? AND blocked_id = ?)",
    )
    .bind(a)
    .bind(b)
    .bind(b)
    .bind(a)
    .fetch_optional(db_pool)
    .await?;
    Ok(row.is_some())
}

/// Mark the user's feedback for a session as complete; part of what makes a
/// session prunable later.
pub async fn feedback_done(db_pool: &SqlitePool, session_id: Uuid, user_id: i64) -> AppResult<()> {
    let session = require_session(db_pool, session_id).await?;
    partner_in(&session, user_id)?;

    let query = if session.user1_id == user_id {
        "UPDATE chat_sessions SET user1_feedback_given = 1 WHERE session_id = ?"
    } else {
        "UPDATE chat_sessions SET user2_feedback_given = 1 WHERE session_id = ?"
    };
    sqlx::query(query)
        .bind(session_id.to_string())
        .execute(db_pool)
        .await?;
    Ok(())
}

async fn require_session(db_pool: &SqlitePool, session_id: Uuid) -> AppResult<ChatSession> {
    session::fetch(db_pool, session_id)
        .await?
        .ok_or(AppError::NotFound("session"))
}

fn rating_slot(session: &ChatSession, user_id: i64) -> AppResult<(Option<i64>, i64)> {
    if session.user1_id == user_id {
        Ok((session.user1_rating, session.user2_id))
    } else if session.user2_id == user_id {
        Ok((session.user2_rating, session.user1_id))
    } else {
        Err(AppError::Validation("user is not part of this session".to_string()))
    }
}

fn partner_in(session: &ChatSession, user_id: i64) -> AppResult<i64> {
    if session.user1_id == user_id {
        Ok(session.user2_id)
    } else if session.user2_id == user_id {
        Ok(session.user1_id)
    } else {
        Err(AppError::Validation("user is not part of this session".to_string()))
    }
}

#[derive(Deserialize)]
struct RateRequest {
    session_id: Uuid,
    user_id: i64,
    value: Rating,
}

#[debug_handler]
async fn rate_session(
    State(state): State<AppState>,
    Json(request): Json<RateRequest>,
) -> AppResult<Json<Value>> {
    profiles::ensure_profile(&state.db_pool, request.user_id).await?;
    rate(&state, request.session_id, request.user_id, request.value).await?;
    Ok(Json(json!({ "recorded": true })))
}

#[derive(Deserialize)]
struct SessionUserRequest {
    session_id: Uuid,
    user_id: i64,
}

#[debug_handler]
async fn block_partner(
    State(state): State<AppState>,
    Json(request): Json<SessionUserRequest>,
) -> AppResult<Json<Value>> {
    profiles::ensure_profile(&state.db_pool, request.user_id).await?;
    let created = block(&state, request.session_id, request.user_id).await?;
    Ok(Json(json!({ "created": created })))
}

#[derive(Deserialize)]
struct ReportRequest {
    session_id: Uuid,
    user_id: i64,
    reason: ReportReason,
}

#[debug_handler]
async fn report_partner(
    State(state): State<AppState>,
    Json(request): Json<ReportRequest>,
) -> AppResult<Json<Value>> {
    profiles::ensure_profile(&state.db_pool, request.user_id).await?;
    report(&state, request.session_id, request.user_id, request.reason).await?;
    Ok(Json(json!({ "reported": true })))
}

#[debug_handler]
async fn finish_feedback(
    State(state): State<AppState>,
    Json(request): Json<SessionUserRequest>,
) -> AppResult<Json<Value>> {
    profiles::ensure_profile(&state.db_pool, request.user_id).await?;
    feedback_done(&state.db_pool, request.session_id, request.user_id).await?;
    Ok(Json(json!({ "done": true })))
}
