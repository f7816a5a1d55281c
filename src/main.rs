//! Gambit Back binary entrypoint wiring REST, SSE, and shared-store layers.

use std::{env, net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::Router;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod dao;
mod dto;
mod engine;
mod error;
mod identity;
mod routes;
mod services;
mod state;

use config::AppConfig;
use dao::{memory::MemoryStore, store::SharedStore};
use services::storage_supervisor;
use state::{AppState, SharedState};

/// Environment variable selecting the shared-store backend.
const STORE_BACKEND_ENV: &str = "GAMBIT_BACK_STORE";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = AppConfig::load();
    let app_state = AppState::new(config);

    spawn_store_supervisor(app_state.clone());
    // Build the HTTP router once the shared state is ready.
    let app = build_router(app_state);

    let port = env::var("PORT")
        .or_else(|_| env::var("SERVER_PORT"))
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "starting server");

    let listener = TcpListener::bind(addr).await.context("binding server")?;
    let service = app.into_make_service();
    axum::serve(listener, service)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving axum")?;

    Ok(())
}

/// Start the background supervisor for the configured store backend.
fn spawn_store_supervisor(state: SharedState) {
    let backend = env::var(STORE_BACKEND_ENV).unwrap_or_else(|_| default_backend().to_owned());

    match backend.as_str() {
        "memory" => {
            info!("using in-process memory store; state will not survive restarts");
            tokio::spawn(storage_supervisor::run(state, || async {
                Ok(Arc::new(MemoryStore::new()) as Arc<dyn SharedStore>)
            }));
        }
        #[cfg(feature = "mongo-store")]
        "mongo" => {
            let uri =
                env::var("MONGO_URI").unwrap_or_else(|_| "mongodb://localhost:27017".into());
            let db_name = env::var("MONGO_DB").ok();
            tokio::spawn(storage_supervisor::run(state, move || {
                let uri = uri.clone();
                let db_name = db_name.clone();
                async move {
                    let config = dao::mongodb::MongoConfig::from_uri(&uri, db_name.as_deref())
                        .await
                        .map_err(dao::storage::StorageError::from)?;
                    let store = dao::mongodb::MongoSharedStore::connect(config)
                        .await
                        .map_err(dao::storage::StorageError::from)?;
                    Ok(Arc::new(store) as Arc<dyn SharedStore>)
                }
            }));
        }
        other => {
            warn!(backend = %other, "unknown store backend; staying in degraded mode");
        }
    }
}

/// Backend used when [`STORE_BACKEND_ENV`] is unset.
fn default_backend() -> &'static str {
    if cfg!(feature = "mongo-store") {
        "mongo"
    } else {
        "memory"
    }
}

/// Build the top-level router and attach cross-cutting middleware layers.
fn build_router(state: SharedState) -> Router<()> {
    routes::router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Configure tracing subscribers so logs include spans by default.
fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,tower_http=debug".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Wait for Ctrl+C or SIGTERM and shut the server down gracefully.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut term = signal(SignalKind::terminate()).expect("install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = term.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
