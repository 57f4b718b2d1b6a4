mod config;
mod dispatcher;
mod error;
mod languages;
mod protocol;
mod sandbox;
mod supervisor;

use std::sync::Arc;

use anyhow::Result;
use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use tracing::info;

use crate::config::RunnerConfig;
use crate::dispatcher::Dispatcher;
use crate::languages::LanguageRegistry;
use crate::protocol::{ResponseEnvelope, StatusCode};
use crate::sandbox::IsolationLauncher;
use crate::supervisor::Supervisor;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("coderunner=info".parse()?),
        )
        .init();

    dotenvy::dotenv().ok();

    let config = Arc::new(RunnerConfig::from_env());
    info!(
        "Starting code runner: workers={}, queue={}",
        config.worker_count, config.queue_capacity
    );

    let registry = Arc::new(LanguageRegistry::load(&config.languages_path)?);
    info!(
        "Loaded language registry from {:?}: {:?}",
        config.languages_path,
        registry.names()
    );

    // Fail fast when the isolation tool is missing
    IsolationLauncher::new(config.clone()).ensure_available().await?;
    info!("Confirmed bubblewrap is available");

    let supervisor = Arc::new(Supervisor::new(config.clone(), registry.clone()));
    let dispatcher = Arc::new(Dispatcher::new(
        supervisor,
        registry,
        config.worker_count,
        config.queue_capacity,
    ));

    let app = Router::new()
        .route("/v1/execute", post(execute))
        .route("/healthz", get(healthz))
        .with_state(dispatcher);

    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    info!("Listening on {}", config.listen_addr);
    axum::serve(listener, app).await?;

    Ok(())
}

/// Thin front over the dispatcher: the body goes in raw, the envelope comes
/// back whenever a pool worker completes the responder.
async fn execute(
    State(dispatcher): State<Arc<Dispatcher>>,
    body: String,
) -> Json<ResponseEnvelope> {
    let receiver = dispatcher.on_request(&body).await;
    match receiver.await {
        Ok(envelope) => Json(envelope),
        Err(_) => Json(ResponseEnvelope::failure(
            StatusCode::Error,
            "result channel closed before delivery",
        )),
    }
}

async fn healthz() -> &'static str {
    "ok"
}
