mod config;
mod db;
mod frame;
mod hub;
mod llm;
mod rate_limit;
mod routes;
mod services;
mod state;

use std::sync::Arc;

use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use crate::config::AppConfig;
use crate::db::WorldStore;
use crate::services::ai::RobotAi;

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = AppConfig::from_env();

    let store: Arc<dyn WorldStore> = match &config.database_url {
        Some(url) => {
            let pool = db::init_pool(url).await.expect("database init failed");
            tracing::info!("world store: postgres");
            Arc::new(db::PgStore::new(pool))
        }
        None => {
            tracing::warn!("DATABASE_URL not set — using seeded in-memory world");
            Arc::new(db::MemoryStore::seeded())
        }
    };

    // Persona chat is optional: a missing key disables it rather than failing start-up.
    let ai = if config.ai_enabled { init_ai() } else { None };

    let state = state::AppState::new(store, hub::Hub::new(config.hub), ai, config.battery);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let respawn = services::battery::spawn_respawn_task(state.clone(), shutdown_rx);

    let app = routes::app(state);
    let port = config.port;
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}"))
        .await
        .expect("failed to bind");

    tracing::info!(%port, "robothub listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            let _ = shutdown_tx.send(true);
        })
        .await
        .expect("server failed");

    let _ = respawn.await;
    tracing::info!("robothub stopped");
}

fn init_ai() -> Option<Arc<RobotAi>> {
    let config = match llm::config::LlmConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!(error = %e, "LLM not configured — AI features disabled");
            return None;
        }
    };
    let sampling = config.sampling;
    match llm::LlmClient::from_config(config) {
        Ok(client) => {
            tracing::info!(model = client.model(), "LLM client initialized");
            Some(Arc::new(RobotAi::new(Arc::new(client), sampling)))
        }
        Err(e) => {
            tracing::warn!(error = %e, "LLM client build failed — AI features disabled");
            None
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    tracing::info!("shutdown signal received");
}
