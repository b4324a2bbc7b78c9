use sqlx::SqlitePool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{AppResult, AppState, db, gateway::Payload, relay};

use super::{WaitingEntry, matchmaker};

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ChatSession {
    pub session_id: String,
    pub user1_id: i64,
    pub user2_id: i64,
    pub start_time: String,
    pub end_time: Option<String>,
    pub status: String,
    pub user1_feedback_given: bool,
    pub user2_feedback_given: bool,
    pub user1_rating: Option<i64>,
    pub user2_rating: Option<i64>,
}

/// Open a session for two users and link them as partners.
///
/// Callers must have removed both waiting entries already; linking happens
/// only after the row exists, so a crash in between leaves no partner state.
pub async fn create(state: &AppState, a: &WaitingEntry, b: &WaitingEntry) -> AppResult<Uuid> {
    let session_id = Uuid::now_v7();
    sqlx::query(
        "INSERT INTO chat_sessions (session_id, user1_id, user2_id, start_time, status)
         VALUES (?, ?, ?, ?, 'active')",
    )
    .bind(session_id.to_string())
    .bind(a.user_id)
    .bind(b.user_id)
    .bind(db::now_rfc3339())
    .execute(&state.db_pool)
    .await?;

    state.matching.lock().await.link_pair(a.user_id, b.user_id, session_id);
    Ok(session_id)
}

/// End the caller's active session. Returns `None` when there is nothing to
/// end, which is not an error.
pub async fn end(state: &AppState, user_id: i64) -> AppResult<Option<Uuid>> {
    let Some(outcome) = state.matching.lock().await.unlink_pair(user_id) else {
        return Ok(None);
    };
    if !outcome.symmetric {
        tracing::error!(
            "partner map was asymmetric for {user_id} and {}; both sides were reset",
            outcome.partner_id
        );
    }
    state.nudges.cancel(&matchmaker::ice_breaker_key(user_id, outcome.partner_id));

    mark_ended(&state.db_pool, outcome.session_id).await?;

    let _ = relay::safe_send(
        state,
        outcome.partner_id,
        Payload::text("Your partner has ended the chat."),
    )
    .await;

    tracing::info!("session {} ended by user {user_id}", outcome.session_id);
    Ok(Some(outcome.session_id))
}

/// Same cleanup as [`end`], but never fails and never notifies: used when
/// delivery itself is broken and consistency is all that matters.
pub async fn force_reset(state: &AppState, user_id: i64) -> Option<Uuid> {
    let outcome = state.matching.lock().await.unlink_pair(user_id)?;
    state.nudges.cancel(&matchmaker::ice_breaker_key(user_id, outcome.partner_id));

    if let Err(e) = mark_ended(&state.db_pool, outcome.session_id).await {
        tracing::warn!("session {} was reset but not persisted: {e}", outcome.session_id);
    }

    tracing::info!(
        "forced reset of session {} for users {user_id} and {}",
        outcome.session_id,
        outcome.partner_id
    );
    Some(outcome.session_id)
}

pub async fn fetch(db_pool: &SqlitePool, session_id: Uuid) -> AppResult<Option<ChatSession>> {
    Ok(
        sqlx::query_as::<_, ChatSession>("SELECT * FROM chat_sessions WHERE session_id = ?")
            .bind(session_id.to_string())
            .fetch_optional(db_pool)
            .await?,
    )
}

/// Sessions qualify for deletion once ended, fully fed back, and older than
/// the retention window.
pub async fn count_prunable(db_pool: &SqlitePool, retention_days: i64) -> AppResult<i64> {
    let (count,): (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM chat_sessions
         WHERE status = 'ended'
           AND user1_feedback_given = 1 AND user2_feedback_given = 1
           AND start_time < ?",
    )
    .bind(retention_cutoff(retention_days))
    .fetch_one(db_pool)
    .await?;
    Ok(count)
}

/// The destructive half of pruning; callers confirm explicitly first.
pub async fn prune(db_pool: &SqlitePool, retention_days: i64) -> AppResult<u64> {
    let result = sqlx::query(
        "DELETE FROM chat_sessions
         WHERE status = 'ended'
           AND user1_feedback_given = 1 AND user2_feedback_given = 1
           AND start_time < ?",
    )
    .bind(retention_cutoff(retention_days))
    .execute(db_pool)
    .await?;
    tracing::info!("pruned {} cold sessions", result.rows_affected());
    Ok(result.rows_affected())
}

async fn mark_ended(db_pool: &SqlitePool, session_id: Uuid) -> AppResult<()> {
    sqlx::query("UPDATE chat_sessions SET end_time = ?, status = 'ended' WHERE session_id = ?")
        .bind(db::now_rfc3339())
        .bind(session_id.to_string())
        .execute(db_pool)
        .await?;
    Ok(())
}

fn retention_cutoff(retention_days: i64) -> String {
    db::rfc3339(OffsetDateTime::now_utc() - time::Duration::days(retention_days))
}
