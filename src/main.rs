mod app_state;
mod cache;
mod config;
mod database;
mod drugs;
mod embedded;
mod error;
mod handlers;
mod models;
mod pdf;
mod poller;
mod requester;
mod sessions;
mod severity;
mod token;
mod websocket;

use app_state::AppState;
use axum::{
    routing::{get, post, put},
    Router,
};
use cache::SqliteCacheStore;
use config::Config;
use database::init_database;
use embedded::serve_embedded;
use handlers::{
    cache_write_handler, calculate_handler, clear_session_handler, create_session_handler,
    delete_session_handler, deselect_drug_handler, drug_card_handler, get_session_handler,
    health_check, search_handler, select_drug_handler, token_handler,
};
use pdf::pdf_handler;
use requester::WebhookRequester;
use sessions::SessionRegistry;
use std::{net::SocketAddr, sync::Arc};
use tokio::signal;
use tower_http::cors::CorsLayer;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use websocket::ws_handler;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = Arc::new(Config::load()?);

    info!("Initializing database...");
    let pool = init_database(&config.database_file).await?;

    if let Some(path) = &config.drugs_file {
        drugs::import_file(&pool, path).await?;
    }

    let cache = Arc::new(SqliteCacheStore::new(pool.clone()));
    let requester = Arc::new(WebhookRequester::new(
        config.webhook_url.clone(),
        config.webhook_timeout,
    )?);
    info!(
        "Workflow endpoint: {} (poll every {:?}, give up after {:?})",
        config.webhook_url,
        config.poll.interval(),
        config.poll.timeout()
    );

    let sessions = Arc::new(SessionRegistry::new(cache.clone(), requester, config.poll));
    sessions.spawn_purge_worker(config.session_ttl);

    let http = pdf::client(pdf::PDF_FETCH_TIMEOUT)?;
    let state = AppState::new(config.clone(), pool, cache, sessions, http);

    let app = Router::new()
        .route("/health", get(health_check))
        .route("/api/drugs/search", get(search_handler))
        .route("/api/drugs/{id}", get(drug_card_handler))
        .route("/api/sessions", post(create_session_handler))
        .route(
            "/api/sessions/{id}",
            get(get_session_handler).delete(delete_session_handler),
        )
        .route(
            "/api/sessions/{id}/drugs/{slot}",
            put(select_drug_handler).delete(deselect_drug_handler),
        )
        .route("/api/sessions/{id}/clear", post(clear_session_handler))
        .route("/api/sessions/{id}/calculate", post(calculate_handler))
        .route("/ws/sessions/{id}", get(ws_handler))
        .route("/api/tokens", get(token_handler))
        .route("/api/cache/{token}", put(cache_write_handler))
        .route("/api/pdf", get(pdf_handler))
        .with_state(state)
        .fallback(serve_embedded)
        .layer(CorsLayer::permissive());

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!("Server starting on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C, shutting down"),
            Err(e) => {
                error!("Failed to install Ctrl+C handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received terminate signal, shutting down");
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
