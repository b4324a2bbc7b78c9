use std::sync::Arc;

use sqlx::sqlite::SqlitePoolOptions;
use tower_http::cors::CorsLayer;
use tracing_subscriber::EnvFilter;
use whisperpair::{
    AppState, Config, db,
    gateway::{Gateway, HttpGateway},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env();

    let db_pool = SqlitePoolOptions::new()
        .max_connections(16)
        .connect(&config.database_url)
        .await?;
    db::init_db(&db_pool).await?;

    let gateway: Arc<dyn Gateway> = Arc::new(HttpGateway::new(config.gateway_url.clone()));
    let bind_addr = config.bind_addr.clone();
    let state = AppState::new(config, db_pool, gateway);

    let app = whisperpair::router(state).layer(CorsLayer::permissive());

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!("listening on {bind_addr}");
    axum::serve(listener, app).await?;
    Ok(())
}
