pub mod admin;
pub mod config;
pub mod db;
pub mod error;
pub mod feedback;
pub mod gateway;
pub mod geo;
pub mod limiter;
pub mod matching;
pub mod nudge;
pub mod profiles;
pub mod relay;

use std::sync::Arc;

use axum::{Router, extract::FromRef};
use sqlx::SqlitePool;
use tokio::sync::Mutex;

pub use config::Config;
pub use error::{AppError, AppResult};

use gateway::Gateway;
use limiter::RateLimiter;
use matching::MatchState;
use nudge::NudgeQueue;

/// Everything an operation needs, passed by handle instead of living in
/// module-level globals.
#[derive(Clone, FromRef)]
pub struct AppState {
    pub db_pool: SqlitePool,
    pub config: Config,
    pub gateway: Arc<dyn Gateway>,
    pub limiter: Arc<RateLimiter>,
    pub matching: Arc<Mutex<MatchState>>,
    pub nudges: NudgeQueue,
}

impl AppState {
    pub fn new(config: Config, db_pool: SqlitePool, gateway: Arc<dyn Gateway>) -> Self {
        let limiter = Arc::new(RateLimiter::new(config.global_rps, config.per_chat_delay));
        Self {
            db_pool,
            gateway,
            limiter,
            matching: Arc::new(Mutex::new(MatchState::default())),
            nudges: NudgeQueue::default(),
            config,
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .nest("/chat", matching::router())
        .nest("/feedback", feedback::router())
        .nest("/p", profiles::router())
        .nest("/admin", admin::router())
        .with_state(state)
}
