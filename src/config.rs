use std::{fmt::Display, str::FromStr, time::Duration};

use tracing::warn;

/// Runtime configuration, loaded once at startup and carried in [`AppState`](crate::AppState).
#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub bind_addr: String,
    pub gateway_url: String,
    /// Destination that receives abuse-report audit messages.
    pub operator_chat_id: i64,
    /// Upper bound on sends inside any sliding one-second window.
    pub global_rps: usize,
    /// Minimum spacing between two sends to the same destination.
    pub per_chat_delay: Duration,
    pub match_score_threshold: f64,
    pub ice_breaker_delay: Duration,
    pub session_retention_days: i64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: "sqlite://whisperpair.db".to_string(),
            bind_addr: "0.0.0.0:8080".to_string(),
            gateway_url: "http://localhost:8081".to_string(),
            operator_chat_id: 0,
            global_rps: 25,
            per_chat_delay: Duration::from_secs_f64(1.0),
            match_score_threshold: 40.0,
            ice_breaker_delay: Duration::from_secs(120),
            session_retention_days: 60,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            database_url: var_or("DATABASE_URL", defaults.database_url),
            bind_addr: var_or("BIND_ADDR", defaults.bind_addr),
            gateway_url: var_or("GATEWAY_URL", defaults.gateway_url),
            operator_chat_id: parse_or("OPERATOR_CHAT_ID", defaults.operator_chat_id),
            global_rps: parse_or("GLOBAL_RPS", defaults.global_rps),
            per_chat_delay: Duration::from_secs_f64(parse_or("PER_CHAT_DELAY", 1.0)),
            match_score_threshold: parse_or("MATCH_SCORE_THRESHOLD", defaults.match_score_threshold),
            ice_breaker_delay: Duration::from_secs(parse_or("ICE_BREAKER_DELAY_SECS", 120)),
            session_retention_days: parse_or("SESSION_RETENTION_DAYS", defaults.session_retention_days),
        }
    }
}

fn var_or(key: &str, default: String) -> String {
    dotenv::var(key).unwrap_or(default)
}

fn parse_or<T: FromStr>(key: &str, default: T) -> T
where
    T::Err: Display,
{
    match dotenv::var(key) {
        Ok(raw) => raw.parse().unwrap_or_else(|e| {
            warn!("invalid {key} value ({e}), using default");
            default
        }),
        Err(_) => default,
    }
}
