mod capabilities;
mod config;
mod db;
mod error;
mod fetch;
mod models;
mod routes;
mod store;

use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use clap::Parser;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use crate::config::{Command, Config};
use crate::routes::AppState;
use crate::store::PgStore;

async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    match state.jobs.ping().await {
        Ok(()) => (StatusCode::OK, "ready"),
        Err(_) => (StatusCode::SERVICE_UNAVAILABLE, "not ready"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("scrapeq=info,tower_http=info")),
        )
        .init();

    let config = Config::parse();

    tracing::info!("Connecting to database...");
    let pool = db::create_pool(&config.database_url).await?;

    if config.run_migrations {
        tracing::info!("Running database migrations...");
        db::run_migrations(&pool).await?;
        tracing::info!("Migrations complete");
    }

    let store = Arc::new(PgStore::new(pool));

    match config.resolved_command() {
        Command::Serve { listen_addr } => {
            let state = AppState {
                jobs: store.clone(),
                records: store,
            };
            let app = Router::new()
                .route("/healthz", get(healthz))
                .route("/readyz", get(readyz).with_state(state.clone()))
                .merge(routes::api::router(state))
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive());

            let listener = tokio::net::TcpListener::bind(&listen_addr).await?;
            tracing::info!("Listening on {listen_addr}");
            axum::serve(listener, app).await?;
        }
        Command::Work(worker) => {
            let registry = capabilities::runner::build_registry(&worker, store.clone())?;
            capabilities::runner::run(store, Arc::new(registry), &worker).await?;
        }
    }

    Ok(())
}
