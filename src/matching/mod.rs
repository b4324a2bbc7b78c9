pub mod matchmaker;
pub mod score;
pub mod session;

use std::collections::HashMap;

use axum::{Json, Router, debug_handler, extract::State, routing::post};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use uuid::Uuid;

use crate::{AppResult, AppState, profiles::{self, Profile}, relay};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/search", post(search))
        .route("/cancel", post(cancel))
        .route("/stop", post(stop))
        .route("/next", post(next))
        .route("/relay", post(relay_message))
}

/// A user waiting to be paired. Owned exclusively by the queue.
#[derive(Debug, Clone)]
pub struct WaitingEntry {
    pub user_id: i64,
    pub use_filters: bool,
    pub profile: Profile,
}

#[derive(Debug, Clone, Copy)]
pub struct PartnerLink {
    pub partner_id: i64,
    pub session_id: Uuid,
}

pub struct UnlinkOutcome {
    pub partner_id: i64,
    pub session_id: Uuid,
    /// False when the partner's reverse link did not point back here.
    pub symmetric: bool,
}

/// The matchmaking state: waiting queue plus active partner map, guarded by
/// one lock so every transition is a single read-modify-write.
///
/// Invariants upheld here:
/// - a user id appears at most once in the queue;
/// - a user id is never in the queue and the partner map at the same time;
/// - partner links are created and destroyed pairwise.
#[derive(Default)]
pub struct MatchState {
    queue: Vec<WaitingEntry>,
    partners: HashMap<i64, PartnerLink>,
}

impl MatchState {
    pub fn in_queue(&self, user_id: i64) -> bool {
        self.queue.iter().any(|entry| entry.user_id == user_id)
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn partner_of(&self, user_id: i64) -> Option<PartnerLink> {
        self.partners.get(&user_id).copied()
    }

    /// Refuses duplicates and users that are already paired.
    pub fn enqueue(&mut self, entry: WaitingEntry) -> bool {
        if self.in_queue(entry.user_id) || self.partners.contains_key(&entry.user_id) {
            return false;
        }
        self.queue.push(entry);
        true
    }

    pub fn dequeue(&mut self, user_id: i64) -> bool {
        let before = self.queue.len();
        self.queue.retain(|entry| entry.user_id != user_id);
        self.queue.len() < before
    }

    pub(crate) fn snapshot(&self) -> Vec<WaitingEntry> {
        self.queue.clone()
    }

    /// Commit-time revalidation: both users must still be queued, in which
    /// case both entries are removed and handed to the caller.
    pub(crate) fn take_pair(&mut self, a: i64, b: i64) -> Option<(WaitingEntry, WaitingEntry)> {
        let pos_a = self.queue.iter().position(|e| e.user_id == a)?;
        let pos_b = self.queue.iter().position(|e| e.user_id == b)?;

        let (first, second) = if pos_a > pos_b { (pos_a, pos_b) } else { (pos_b, pos_a) };
        let one = self.queue.remove(first);
        let two = self.queue.remove(second);
        if one.user_id == a { Some((one, two)) } else { Some((two, one)) }
    }

    pub(crate) fn link_pair(&mut self, a: i64, b: i64, session_id: Uuid) {
        self.partners.insert(a, PartnerLink { partner_id: b, session_id });
        self.partners.insert(b, PartnerLink { partner_id: a, session_id });
    }

    /// Remove both sides of a pairing and purge any stale queue entries for
    /// either id. The reverse link is only removed when it points back at
    /// `user_id`; anything else is reported as asymmetric.
    pub(crate) fn unlink_pair(&mut self, user_id: i64) -> Option<UnlinkOutcome> {
        let link = self.partners.remove(&user_id)?;
        let reverse = self.partners.get(&link.partner_id).copied();

        let symmetric = match reverse {
            Some(back) if back.partner_id == user_id && back.session_id == link.session_id => {
                self.partners.remove(&link.partner_id);
                true
            }
            Some(back) if back.partner_id == user_id => {
                self.partners.remove(&link.partner_id);
                false
            }
            _ => false,
        };

        self.dequeue(user_id);
        self.dequeue(link.partner_id);

        Some(UnlinkOutcome {
            partner_id: link.partner_id,
            session_id: link.session_id,
            symmetric,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchOutcome {
    Matched,
    Queued,
    AlreadyQueued,
    InSession,
    ProfileIncomplete,
}

/// Put the user in the waiting queue and run the matchmaker.
pub async fn request_match(state: &AppState, user_id: i64) -> AppResult<SearchOutcome> {
    {
        let matching = state.matching.lock().await;
        if matching.partner_of(user_id).is_some() {
            return Ok(SearchOutcome::InSession);
        }
        if matching.in_queue(user_id) {
            return Ok(SearchOutcome::AlreadyQueued);
        }
    }

    let Some(profile) = profiles::get_profile(&state.db_pool, user_id).await? else {
        return Ok(SearchOutcome::ProfileIncomplete);
    };
    if !profile.is_complete() {
        return Ok(SearchOutcome::ProfileIncomplete);
    }

    let entry = WaitingEntry {
        user_id,
        use_filters: profile.has_filters(),
        profile,
    };
    // The earlier membership check raced with the profile load, so enqueue
    // re-checks under the lock.
    if !state.matching.lock().await.enqueue(entry) {
        return Ok(SearchOutcome::AlreadyQueued);
    }
    tracing::info!("user {user_id} entered the waiting queue");

    matchmaker::try_match_users(state).await?;

    let matched = state.matching.lock().await.partner_of(user_id).is_some();
    Ok(if matched { SearchOutcome::Matched } else { SearchOutcome::Queued })
}

pub async fn cancel_match(state: &AppState, user_id: i64) -> bool {
    let removed = state.matching.lock().await.dequeue(user_id);
    if removed {
        tracing::info!("user {user_id} left the waiting queue");
    }
    removed
}

#[derive(Deserialize)]
struct UserRequest {
    user_id: i64,
}

#[debug_handler]
async fn search(
    State(state): State<AppState>,
    Json(UserRequest { user_id }): Json<UserRequest>,
) -> AppResult<Json<Value>> {
    profiles::ensure_profile(&state.db_pool, user_id).await?;
    let outcome = request_match(&state, user_id).await?;
    Ok(Json(json!({ "status": outcome })))
}

#[debug_handler]
async fn cancel(
    State(state): State<AppState>,
    Json(UserRequest { user_id }): Json<UserRequest>,
) -> AppResult<Json<Value>> {
    profiles::ensure_profile(&state.db_pool, user_id).await?;
    let cancelled = cancel_match(&state, user_id).await;
    Ok(Json(json!({ "cancelled": cancelled })))
}

#[debug_handler]
async fn stop(
    State(state): State<AppState>,
    Json(UserRequest { user_id }): Json<UserRequest>,
) -> AppResult<Json<Value>> {
    profiles::ensure_profile(&state.db_pool, user_id).await?;
    let ended = session::end(&state, user_id).await?;
    Ok(Json(json!({ "ended_session": ended })))
}

/// End the current session (if any) and immediately search again.
#[debug_handler]
async fn next(
    State(state): State<AppState>,
    Json(UserRequest { user_id }): Json<UserRequest>,
) -> AppResult<Json<Value>> {
    profiles::ensure_profile(&state.db_pool, user_id).await?;
    let ended = session::end(&state, user_id).await?;
    let outcome = request_match(&state, user_id).await?;
    Ok(Json(json!({ "ended_session": ended, "status": outcome })))
}

#[derive(Deserialize)]
struct RelayRequest {
    user_id: i64,
    #[serde(flatten)]
    message: relay::IncomingMessage,
}

#[debug_handler]
async fn relay_message(
    State(state): State<AppState>,
    Json(RelayRequest { user_id, message }): Json<RelayRequest>,
) -> AppResult<Json<Value>> {
    profiles::ensure_profile(&state.db_pool, user_id).await?;
    let outcome = relay::relay(&state, user_id, message).await?;
    Ok(Json(json!({ "status": outcome })))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(user_id: i64) -> WaitingEntry {
        WaitingEntry {
            user_id,
            use_filters: false,
            profile: Profile {
                user_id,
                alias: "Test Fox".to_string(),
                gender: Some("f".to_string()),
                age: Some(25),
                bio: None,
                karma: 100,
                interests: None,
                latitude: None,
                longitude: None,
                filter_gender: None,
                filter_age_min: None,
                filter_age_max: None,
            },
        }
    }

    #[test]
    fn enqueue_rejects_duplicates_and_paired_users() {
        let mut state = MatchState::default();
        assert!(state.enqueue(entry(1)));
        assert!(!state.enqueue(entry(1)));
        assert_eq!(state.queue_len(), 1);

        state.dequeue(1);
        state.link_pair(1, 2, Uuid::now_v7());
        assert!(!state.enqueue(entry(1)));
    }

    #[test]
    fn link_and_unlink_are_pairwise() {
        let mut state = MatchState::default();
        let session_id = Uuid::now_v7();
        state.link_pair(1, 2, session_id);

        let forward = state.partner_of(1).unwrap();
        let backward = state.partner_of(2).unwrap();
        assert_eq!(forward.partner_id, 2);
        assert_eq!(backward.partner_id, 1);
        assert_eq!(forward.session_id, backward.session_id);

        let outcome = state.unlink_pair(2).unwrap();
        assert!(outcome.symmetric);
        assert_eq!(outcome.partner_id, 1);
        assert!(state.partner_of(1).is_none());
        assert!(state.partner_of(2).is_none());
    }

    #[test]
    fn unlink_reports_asymmetry_but_still_cleans_up() {
        let mut state = MatchState::default();
        let s1 = Uuid::now_v7();
        let s2 = Uuid::now_v7();
        state.partners.insert(1, PartnerLink { partner_id: 2, session_id: s1 });
        state.partners.insert(2, PartnerLink { partner_id: 1, session_id: s2 });

        let outcome = state.unlink_pair(1).unwrap();
        assert!(!outcome.symmetric);
        assert!(state.partner_of(1).is_none());
        assert!(state.partner_of(2).is_none());
    }

    #[test]
    fn take_pair_requires_both_to_still_be_queued() {
        let mut state = MatchState::default();
        state.enqueue(entry(1));
        state.enqueue(entry(2));
        state.enqueue(entry(3));

        assert!(state.take_pair(1, 4).is_none());
        assert_eq!(state.queue_len(), 3);

        let (a, b) = state.take_pair(3, 1).unwrap();
        assert_eq!(a.user_id, 3);
        assert_eq!(b.user_id, 1);
        assert_eq!(state.queue_len(), 1);
        assert!(state.in_queue(2));
    }
}
