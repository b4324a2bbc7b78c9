use std::collections::HashSet;

use axum::{
    Json, Router, debug_handler,
    extract::{Path, State},
    routing::{get, post},
};
use rand::seq::IndexedRandom;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use sqlx::SqlitePool;

use crate::{AppError, AppResult, AppState};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/update", post(update))
        .route("/{user_id}", get(show))
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Profile {
    pub user_id: i64,
    pub alias: String,
    pub gender: Option<String>,
    pub age: Option<i64>,
    pub bio: Option<String>,
    pub karma: i64,
    pub interests: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub filter_gender: Option<String>,
    pub filter_age_min: Option<i64>,
    pub filter_age_max: Option<i64>,
}

impl Profile {
    /// Interests are stored comma-separated and lowercase.
    pub fn interest_set(&self) -> HashSet<String> {
        self.interests
            .as_deref()
            .unwrap_or("")
            .split(',')
            .map(|i| i.trim().to_string())
            .filter(|i| !i.is_empty())
            .collect()
    }

    pub fn has_filters(&self) -> bool {
        self.filter_gender.is_some() || self.filter_age_min.is_some()
    }

    /// Gender and age are the minimum needed for the queue.
    pub fn is_complete(&self) -> bool {
        self.gender.is_some() && self.age.is_some()
    }

    pub fn coordinates(&self) -> Option<(f64, f64)> {
        self.latitude.zip(self.longitude)
    }
}

/// Pre-dispatch interceptor: every public operation calls this first, so a
/// profile row is guaranteed to exist for the rest of the call.
pub async fn ensure_profile(db_pool: &SqlitePool, user_id: i64) -> AppResult<()> {
    sqlx::query("INSERT OR IGNORE INTO user_profiles (user_id, alias) VALUES (?, ?)")
        .bind(user_id)
        .bind(random_alias())
        .execute(db_pool)
        .await?;
    Ok(())
}

pub async fn get_profile(db_pool: &SqlitePool, user_id: i64) -> AppResult<Option<Profile>> {
    Ok(
        sqlx::query_as::<_, Profile>("SELECT * FROM user_profiles WHERE user_id = ?")
            .bind(user_id)
            .fetch_optional(db_pool)
            .await?,
    )
}

#[derive(Debug, Default, Deserialize)]
pub struct ProfileUpdate {
    pub gender: Option<String>,
    pub age: Option<i64>,
    pub bio: Option<String>,
    pub interests: Option<Vec<String>>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    /// "opposite", "same", or "any" to clear.
    pub filter_gender: Option<String>,
    pub filter_age_min: Option<i64>,
    pub filter_age_max: Option<i64>,
}

/// Apply the provided fields, one validated update per field.
pub async fn update_fields(db_pool: &SqlitePool, user_id: i64, update: ProfileUpdate) -> AppResult<()> {
    if let Some(gender) = &update.gender {
        if gender.trim().is_empty() {
            return Err(AppError::Validation("gender must not be empty".to_string()));
        }
        sqlx::query("UPDATE user_profiles SET gender = ? WHERE user_id = ?")
            .bind(gender)
            .bind(user_id)
            .execute(db_pool)
            .await?;
    }

    if let Some(age) = update.age {
        check_age(age)?;
        sqlx::query("UPDATE user_profiles SET age = ? WHERE user_id = ?")
            .bind(age)
            .bind(user_id)
            .execute(db_pool)
            .await?;
    }

    if let Some(bio) = &update.bio {
        sqlx::query("UPDATE user_profiles SET bio = ? WHERE user_id = ?")
            .bind(bio)
            .bind(user_id)
            .execute(db_pool)
            .await?;
    }

    if let Some(interests) = &update.interests {
        let mut cleaned: Vec<String> = Vec::new();
        for interest in interests {
            let interest = interest.trim().to_lowercase();
            if interest.is_empty() || interest.len() > 20 || interest.contains(',') {
                return Err(AppError::Validation(
                    "each interest must be 1-20 characters without commas".to_string(),
                ));
            }
            cleaned.push(interest);
        }
        cleaned.sort();
        cleaned.dedup();
        sqlx::query("UPDATE user_profiles SET interests = ? WHERE user_id = ?")
            .bind(cleaned.join(","))
            .bind(user_id)
            .execute(db_pool)
            .await?;
    }

    if let (Some(latitude), Some(longitude)) = (update.latitude, update.longitude) {
        if !(-90.0..=90.0).contains(&latitude) || !(-180.0..=180.0).contains(&longitude) {
            return Err(AppError::Validation("coordinates out of range".to_string()));
        }
        sqlx::query("UPDATE user_profiles SET latitude = ?, longitude = ? WHERE user_id = ?")
            .bind(latitude)
            .bind(longitude)
            .bind(user_id)
            .execute(db_pool)
            .await?;
    }

    if let Some(preference) = &update.filter_gender {
        match preference.as_str() {
            "opposite" | "same" => {
                sqlx::query("UPDATE user_profiles SET filter_gender = ? WHERE user_id = ?")
                    .bind(preference)
                    .bind(user_id)
                    .execute(db_pool)
                    .await?;
            }
            "any" => {
                sqlx::query("UPDATE user_profiles SET filter_gender = NULL WHERE user_id = ?")
                    .bind(user_id)
                    .execute(db_pool)
                    .await?;
            }
            other => {
                return Err(AppError::Validation(format!(
                    "unknown gender preference '{other}'"
                )));
            }
        }
    }

    if let (Some(min), Some(max)) = (update.filter_age_min, update.filter_age_max) {
        check_age(min)?;
        check_age(max)?;
        if min > max {
            return Err(AppError::Validation("age range is inverted".to_string()));
        }
        sqlx::query("UPDATE user_profiles SET filter_age_min = ?, filter_age_max = ? WHERE user_id = ?")
            .bind(min)
            .bind(max)
            .bind(user_id)
            .execute(db_pool)
            .await?;
    }

    Ok(())
}

pub async fn all_user_ids(db_pool: &SqlitePool) -> AppResult<Vec<i64>> {
    let rows: Vec<(i64,)> = sqlx::query_as("SELECT user_id FROM user_profiles")
        .fetch_all(db_pool)
        .await?;
    Ok(rows.into_iter().map(|(id,)| id).collect())
}

fn check_age(age: i64) -> AppResult<()> {
    if (13..=100).contains(&age) {
        Ok(())
    } else {
        Err(AppError::Validation("age must be between 13 and 100".to_string()))
    }
}

#[derive(Deserialize)]
struct UpdateRequest {
    user_id: i64,
    #[serde(flatten)]
    update: ProfileUpdate,
}

#[debug_handler]
async fn update(
    State(state): State<AppState>,
    Json(UpdateRequest { user_id, update }): Json<UpdateRequest>,
) -> AppResult<Json<Value>> {
    ensure_profile(&state.db_pool, user_id).await?;
    update_fields(&state.db_pool, user_id, update).await?;
    Ok(Json(json!({ "updated": true })))
}

#[debug_handler]
async fn show(
    Path(user_id): Path<i64>,
    State(state): State<AppState>,
) -> AppResult<Json<Profile>> {
    get_profile(&state.db_pool, user_id)
        .await?
        .map(Json)
        .ok_or(AppError::NotFound("profile"))
}

fn random_alias() -> String {
    let adjectives = [
        "Quick", "Lazy", "Mysterious", "Jolly", "Brave", "Silent", "Witty", "Fierce",
        "Clever", "Gentle", "Wild", "Calm", "Bold", "Shy", "Proud", "Happy",
        "Eager", "Fancy", "Rusty", "Golden", "Silver", "Bright", "Dark", "Lucky",
    ];
    let nouns = [
        "Fox", "Bear", "Eagle", "Wolf", "Dragon", "Tiger", "Lion", "Owl", "Rabbit",
        "Falcon", "Hawk", "Shark", "Panda", "Kitten", "Phoenix", "Griffin",
        "Unicorn", "Turtle", "Dolphin", "Whale", "Elephant", "Giraffe", "Zebra",
    ];

    format!(
        "{} {}",
        adjectives.choose(&mut rand::rng()).unwrap(),
        nouns.choose(&mut rand::rng()).unwrap()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn test_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        db::init_db(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn ensure_profile_is_idempotent_and_assigns_an_alias() {
        let pool = test_pool().await;

        ensure_profile(&pool, 1).await.unwrap();
        let first = get_profile(&pool, 1).await.unwrap().unwrap();
        assert!(!first.alias.is_empty());
        assert_eq!(first.karma, 100);

        ensure_profile(&pool, 1).await.unwrap();
        let second = get_profile(&pool, 1).await.unwrap().unwrap();
        assert_eq!(first.alias, second.alias);
    }

    #[tokio::test]
    async fn update_rejects_bad_age_and_inverted_range() {
        let pool = test_pool().await;
        ensure_profile(&pool, 1).await.unwrap();

        let result = update_fields(&pool, 1, ProfileUpdate { age: Some(7), ..Default::default() }).await;
        assert!(matches!(result, Err(AppError::Validation(_))));

        let result = update_fields(
            &pool,
            1,
            ProfileUpdate { filter_age_min: Some(30), filter_age_max: Some(20), ..Default::default() },
        )
        .await;
        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn interests_are_normalized() {
        let pool = test_pool().await;
        ensure_profile(&pool, 1).await.unwrap();

        update_fields(
            &pool,
            1,
            ProfileUpdate {
                interests: Some(vec!["Music ".to_string(), "FILM".to_string(), "music".to_string()]),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let profile = get_profile(&pool, 1).await.unwrap().unwrap();
        assert_eq!(profile.interests.as_deref(), Some("film,music"));
        assert_eq!(profile.interest_set().len(), 2);
    }
}
