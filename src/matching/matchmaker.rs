use crate::{AppResult, AppState, feedback, gateway::Payload, geo, profiles::Profile, relay};

use super::{WaitingEntry, score, session};

/// Drain the waiting queue greedily: repeatedly commit the highest-scoring
/// unordered pair until none reaches the threshold.
///
/// Greedy max-first is deliberate. It does not maximize the total score
/// across the whole queue; it keeps latency low and the policy predictable.
pub async fn try_match_users(state: &AppState) -> AppResult<()> {
    loop {
        let snapshot = state.matching.lock().await.snapshot();
        if snapshot.len() < 2 {
            return Ok(());
        }

        let mut best: Option<(i64, i64, f64)> = None;
        for i in 0..snapshot.len() {
            for j in (i + 1)..snapshot.len() {
                let (a, b) = (&snapshot[i], &snapshot[j]);
                if feedback::is_blocked(&state.db_pool, a.user_id, b.user_id).await? {
                    continue;
                }
                let pair_score = score::score(a, b);
                // Strictly greater keeps the first-seen pair on ties.
                if pair_score > best.map_or(-1.0, |(_, _, high)| high) {
                    best = Some((a.user_id, b.user_id, pair_score));
                }
            }
        }

        let Some((a_id, b_id, high)) = best else {
            return Ok(());
        };
        if high < state.config.match_score_threshold {
            return Ok(());
        }

        // The scan ran on a snapshot; either entry may have been cancelled
        // in the meantime, so membership is revalidated at commit time.
        let Some((a, b)) = state.matching.lock().await.take_pair(a_id, b_id) else {
            continue;
        };

        match session::create(state, &a, &b).await {
            Ok(session_id) => {
                tracing::info!("matched {a_id} with {b_id} (score {high:.2}), session {session_id}");
                schedule_ice_breaker(state, a_id, b_id);

                let notify_state = state.clone();
                tokio::spawn(async move {
                    send_match_profiles(&notify_state, &a, &b).await;
                });
            }
            Err(e) => {
                // Nobody may be left stranded half-committed.
                let mut matching = state.matching.lock().await;
                matching.enqueue(a);
                matching.enqueue(b);
                return Err(e);
            }
        }
    }
}

pub(crate) fn ice_breaker_key(a: i64, b: i64) -> String {
    format!("icebreaker_{}_{}", a.min(b), a.max(b))
}

/// One-shot nudge for a fresh pair; rescheduling the same pair replaces any
/// pending nudge.
pub fn schedule_ice_breaker(state: &AppState, a: i64, b: i64) {
    let nudge_state = state.clone();
    state.nudges.schedule(&ice_breaker_key(a, b), state.config.ice_breaker_delay, async move {
        let still_paired = nudge_state
            .matching
            .lock()
            .await
            .partner_of(a)
            .is_some_and(|link| link.partner_id == b);
        if !still_paired {
            return;
        }

        let text = "Ice breaker! Try asking about three things your partner enjoys.";
        let _ = relay::safe_send(&nudge_state, a, Payload::text(text)).await;
        let _ = relay::safe_send(&nudge_state, b, Payload::text(text)).await;
    });
}

async fn send_match_profiles(state: &AppState, a: &WaitingEntry, b: &WaitingEntry) {
    let distance_km = match (a.profile.coordinates(), b.profile.coordinates()) {
        (Some((lat1, lon1)), Some((lat2, lon2))) => {
            Some(score::haversine_km(lat1, lon1, lat2, lon2))
        }
        _ => None,
    };

    futures_util::join!(
        send_profile_card(state, a.user_id, &b.profile, distance_km),
        send_profile_card(state, b.user_id, &a.profile, distance_km),
    );
}

async fn send_profile_card(state: &AppState, to: i64, partner: &Profile, distance_km: Option<f64>) {
    let location_line = match partner.coordinates() {
        Some((latitude, longitude)) => {
            let place = geo::reverse_geocode(latitude, longitude)
                .await
                .unwrap_or_else(|| "Location not recognized".to_string());
            match distance_km {
                Some(distance) => format!("{place} - {distance:.1} km"),
                None => place,
            }
        }
        None => "Location not shared".to_string(),
    };

    let mut interests: Vec<String> = partner.interest_set().into_iter().map(capitalize).collect();
    interests.sort();
    let interests = if interests.is_empty() {
        "Not set".to_string()
    } else {
        interests.join(", ")
    };

    let text = format!(
        "Partner found!\n\nAlias: {}\nGender: {}\nAge: {}\nInterests: {}\nLocation: {}\n\nBio: {}",
        partner.alias,
        partner.gender.as_deref().unwrap_or("N/A"),
        partner.age.map(|age| age.to_string()).unwrap_or_else(|| "N/A".to_string()),
        interests,
        location_line,
        partner.bio.as_deref().unwrap_or("No bio."),
    );

    if relay::safe_send(state, to, Payload::text(text)).await.is_none() {
        tracing::warn!("could not deliver the match card to {to}");
    }
}

fn capitalize(word: String) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => word,
    }
}
