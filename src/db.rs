use sqlx::SqlitePool;
use time::{OffsetDateTime, format_description::well_known::Rfc3339};

use crate::AppResult;

/// Create the schema on a fresh database; no-op on an existing one.
pub async fn init_db(db_pool: &SqlitePool) -> AppResult<()> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS user_profiles (
            user_id INTEGER PRIMARY KEY,
            alias TEXT NOT NULL,
            gender TEXT,
            age INTEGER,
            bio TEXT,
            karma INTEGER NOT NULL DEFAULT 100,
            interests TEXT,
            latitude REAL,
            longitude REAL,
            filter_gender TEXT,
            filter_age_min INTEGER,
            filter_age_max INTEGER
        )",
    )
    .execute(db_pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS chat_sessions (
            session_id TEXT PRIMARY KEY,
            user1_id INTEGER NOT NULL,
            user2_id INTEGER NOT NULL,
            start_time TEXT NOT NULL,
            end_time TEXT,
            status TEXT NOT NULL,
            user1_feedback_given INTEGER NOT NULL DEFAULT 0,
            user2_feedback_given INTEGER NOT NULL DEFAULT 0,
            user1_rating INTEGER,
            user2_rating INTEGER
        )",
    )
    .execute(db_pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS blocks (
            blocker_id INTEGER NOT NULL,
            blocked_id INTEGER NOT NULL,
            created_at TEXT NOT NULL,
            PRIMARY KEY (blocker_id, blocked_id)
        )",
    )
    .execute(db_pool)
    .await?;

    Ok(())
}

/// UTC timestamps are stored as RFC 3339 text, which keeps string comparison
/// consistent with chronological order.
pub(crate) fn now_rfc3339() -> String {
    rfc3339(OffsetDateTime::now_utc())
}

pub(crate) fn rfc3339(timestamp: OffsetDateTime) -> String {
    timestamp
        .format(&Rfc3339)
        .expect("RFC 3339 formatting of a UTC timestamp")
}
