use std::{sync::Arc, time::Duration};

use sqlx::sqlite::SqlitePoolOptions;
use whisperpair::{
    AppState, Config, db, feedback,
    gateway::MemoryGateway,
    matching::{self, SearchOutcome, session},
    profiles::{self, ProfileUpdate},
    relay::{self, IncomingMessage},
};

async fn engine() -> (AppState, Arc<MemoryGateway>) {
    let db_pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    db::init_db(&db_pool).await.unwrap();

    let gateway = Arc::new(MemoryGateway::default());
    let config = Config {
        per_chat_delay: Duration::ZERO,
        operator_chat_id: 900,
        ..Config::default()
    };
    (AppState::new(config, db_pool, gateway.clone()), gateway)
}

async fn onboard(state: &AppState, user_id: i64, age: i64, interests: &[&str]) {
    profiles::ensure_profile(&state.db_pool, user_id).await.unwrap();
    profiles::update_fields(
        &state.db_pool,
        user_id,
        ProfileUpdate {
            gender: Some("f".to_string()),
            age: Some(age),
            interests: Some(interests.iter().map(|i| i.to_string()).collect()),
            ..Default::default()
        },
    )
    .await
    .unwrap();
}

#[tokio::test]
async fn two_compatible_users_pair_chat_and_part() {
    let (state, gateway) = engine().await;

    // The worked scoring example: karma 100 vs 95, ages 25 and 27, one
    // shared interest out of three. Weighted score just above 53.
    onboard(&state, 1, 25, &["music", "film"]).await;
    onboard(&state, 2, 27, &["film", "travel"]).await;
    feedback::update_karma(&state.db_pool, 2, -5).await.unwrap();

    assert_eq!(matching::request_match(&state, 1).await.unwrap(), SearchOutcome::Queued);
    assert_eq!(matching::request_match(&state, 2).await.unwrap(), SearchOutcome::Matched);

    let session_id = {
        let matching_state = state.matching.lock().await;
        let forward = matching_state.partner_of(1).unwrap();
        let backward = matching_state.partner_of(2).unwrap();
        assert_eq!(forward.partner_id, 2);
        assert_eq!(backward.partner_id, 1);
        assert_eq!(forward.session_id, backward.session_id);
        assert_eq!(matching_state.queue_len(), 0);
        forward.session_id
    };

    let row = session::fetch(&state.db_pool, session_id).await.unwrap().unwrap();
    assert_eq!(row.status, "active");

    // Messages flow both ways.
    let sent = relay::relay(
        &state,
        1,
        IncomingMessage { text: Some("hi there".to_string()), ..Default::default() },
    )
    .await
    .unwrap();
    assert_eq!(sent, relay::RelayOutcome::Delivered);

    // One side hangs up; the other is told and both links disappear.
    assert_eq!(session::end(&state, 1).await.unwrap(), Some(session_id));
    assert!(state.matching.lock().await.partner_of(2).is_none());
    assert_eq!(session::end(&state, 1).await.unwrap(), None);

    // Feedback closes the loop.
    feedback::rate(&state, session_id, 1, feedback::Rating::Like).await.unwrap();
    let karma = profiles::get_profile(&state.db_pool, 2).await.unwrap().unwrap().karma;
    assert_eq!(karma, 100); // 95 + 5

    let relayed_to_2 = gateway
        .sent()
        .into_iter()
        .any(|(to, payload)| to == 2 && format!("{payload:?}").contains("hi there"));
    assert!(relayed_to_2);
}

#[tokio::test]
async fn a_user_is_never_queued_twice_nor_queued_while_paired() {
    let (state, _gateway) = engine().await;
    onboard(&state, 1, 25, &[]).await;

    assert_eq!(matching::request_match(&state, 1).await.unwrap(), SearchOutcome::Queued);
    assert_eq!(matching::request_match(&state, 1).await.unwrap(), SearchOutcome::AlreadyQueued);
    assert_eq!(state.matching.lock().await.queue_len(), 1);

    onboard(&state, 2, 25, &[]).await;
    assert_eq!(matching::request_match(&state, 2).await.unwrap(), SearchOutcome::Matched);

    // Paired users cannot re-enter the queue.
    assert_eq!(matching::request_match(&state, 1).await.unwrap(), SearchOutcome::InSession);
    assert_eq!(state.matching.lock().await.queue_len(), 0);
}

#[tokio::test]
async fn cancellation_removes_the_waiting_entry() {
    let (state, _gateway) = engine().await;
    onboard(&state, 1, 25, &[]).await;

    assert_eq!(matching::request_match(&state, 1).await.unwrap(), SearchOutcome::Queued);
    assert!(matching::cancel_match(&state, 1).await);
    assert!(!matching::cancel_match(&state, 1).await);
    assert_eq!(state.matching.lock().await.queue_len(), 0);
}

#[tokio::test]
async fn an_incomplete_profile_cannot_search() {
    let (state, _gateway) = engine().await;
    profiles::ensure_profile(&state.db_pool, 1).await.unwrap();

    assert_eq!(
        matching::request_match(&state, 1).await.unwrap(),
        SearchOutcome::ProfileIncomplete
    );
}

#[tokio::test]
async fn blocked_users_are_invisible_to_each_other() {
    let (state, _gateway) = engine().await;
    onboard(&state, 1, 25, &[]).await;
    onboard(&state, 2, 25, &[]).await;
    feedback::create_block(&state.db_pool, 2, 1).await.unwrap();

    assert_eq!(matching::request_match(&state, 1).await.unwrap(), SearchOutcome::Queued);
    assert_eq!(matching::request_match(&state, 2).await.unwrap(), SearchOutcome::Queued);

    // But a third, unblocked user matches immediately.
    onboard(&state, 3, 25, &[]).await;
    assert_eq!(matching::request_match(&state, 3).await.unwrap(), SearchOutcome::Matched);
}

#[tokio::test]
async fn hard_filters_beat_an_otherwise_perfect_score() {
    let (state, _gateway) = engine().await;
    onboard(&state, 1, 25, &["music"]).await;
    onboard(&state, 2, 25, &["music"]).await;

    // User 1 insists on the opposite gender; both profiles are "f".
    profiles::update_fields(
        &state.db_pool,
        1,
        ProfileUpdate { filter_gender: Some("opposite".to_string()), ..Default::default() },
    )
    .await
    .unwrap();

    assert_eq!(matching::request_match(&state, 1).await.unwrap(), SearchOutcome::Queued);
    assert_eq!(matching::request_match(&state, 2).await.unwrap(), SearchOutcome::Queued);
}

#[tokio::test]
async fn delivery_failure_mid_chat_never_strands_one_side() {
    let (state, gateway) = engine().await;
    onboard(&state, 1, 25, &[]).await;
    onboard(&state, 2, 25, &[]).await;

    matching::request_match(&state, 1).await.unwrap();
    matching::request_match(&state, 2).await.unwrap();
    gateway.fail_destination(2);

    let result = relay::relay(
        &state,
        1,
        IncomingMessage { text: Some("anyone there?".to_string()), ..Default::default() },
    )
    .await;
    assert!(result.is_err());

    let matching_state = state.matching.lock().await;
    assert!(matching_state.partner_of(1).is_none());
    assert!(matching_state.partner_of(2).is_none());
    assert!(!matching_state.in_queue(1));
    assert!(!matching_state.in_queue(2));
}

#[tokio::test]
async fn next_ends_and_requeues_in_one_step() {
    let (state, _gateway) = engine().await;
    onboard(&state, 1, 25, &[]).await;
    onboard(&state, 2, 25, &[]).await;

    matching::request_match(&state, 1).await.unwrap();
    matching::request_match(&state, 2).await.unwrap();

    let ended = session::end(&state, 1).await.unwrap();
    assert!(ended.is_some());
    assert_eq!(matching::request_match(&state, 1).await.unwrap(), SearchOutcome::Queued);
}

#[tokio::test]
async fn pruning_is_previewed_then_confirmed() {
    let (state, _gateway) = engine().await;

    sqlx::query(
        "INSERT INTO chat_sessions
         (session_id, user1_id, user2_id, start_time, status, user1_feedback_given, user2_feedback_given)
         VALUES ('old', 1, 2, '2020-01-01T00:00:00Z', 'ended', 1, 1)",
    )
    .execute(&state.db_pool)
    .await
    .unwrap();

    let retention = state.config.session_retention_days;
    assert_eq!(session::count_prunable(&state.db_pool, retention).await.unwrap(), 1);
    assert_eq!(session::prune(&state.db_pool, retention).await.unwrap(), 1);
    assert_eq!(session::count_prunable(&state.db_pool, retention).await.unwrap(), 0);
}
