use std::sync::Arc;

use anyhow::Context;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use log::info;
use tower_http::cors::CorsLayer;

use servicedesk::config::AppConfig;
use servicedesk::requests::configure_requests_routes;
use servicedesk::shared::state::AppState;
use servicedesk::shared::utils::create_conn;
use servicedesk::sla::configure_sla_routes;
use servicedesk::sla::scanner::BreachScanner;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));

    let config = AppConfig::from_env();
    let pool = create_conn().context("failed to create database pool")?;

    {
        let mut conn = pool.get().context("failed to get migration connection")?;
        conn.run_pending_migrations(MIGRATIONS)
            .map_err(|e| anyhow::anyhow!("migrations failed: {e}"))?;
    }

    let state = Arc::new(AppState {
        conn: pool,
        config: config.clone(),
    });

    BreachScanner::new(state.clone()).spawn();

    let app = configure_requests_routes()
        .merge(configure_sla_routes())
        .layer(CorsLayer::permissive())
        .with_state(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    info!("servicedesk listening on {addr}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}
