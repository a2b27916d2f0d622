use tracing_subscriber::EnvFilter;

use warehouse_auth::{config::AppConfig, create_router, db, AppState, Repositories};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_level(true)
        .init();

    tracing::info!("Warehouse auth - Starting...");

    let config = AppConfig::from_env()?;
    tracing::debug!(?config, "Configuration loaded");

    tracing::info!("Connecting to database...");
    let db_pool = db::create_pool(&config.database_url, config.database_max_connections).await?;

    tracing::info!("Running database migrations...");
    db::run_migrations(&db_pool).await?;
    tracing::info!("Migrations completed successfully");

    let state = AppState::build(Repositories::postgres(db_pool), &config.auth).await?;

    // Expired sessions are already unusable, this only reclaims rows
    state
        .auth
        .sessions()
        .clone()
        .spawn_purge_task(config.session_purge_interval);

    let app = create_router(state);

    let addr = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Warehouse auth is running on http://{}", addr);

    axum::serve(listener, app).await?;
    Ok(())
}
