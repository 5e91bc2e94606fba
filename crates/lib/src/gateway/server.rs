//! Gateway HTTP server.
//!
//! Public surface: health probe, public form definitions for the client
//! engine, and the submission endpoint. Submissions always answer 200 with a
//! structured body; only a malformed request body or an unknown route gets a
//! non-200 status.

use crate::config::Config;
use crate::gateway::protocol::{PublicForm, SubmitRequest, SubmitResponse};
use crate::gateway::submit::SubmissionGateway;
use crate::notify::{HttpWebhookSender, LogMailer, NotificationDispatcher};
use crate::spam::{MemoryRateLimiter, SpamGate};
use crate::store::{load_forms_file, FormStore, MemoryStore};
use anyhow::{Context, Result};
use axum::{
    extract::{ConnectInfo, Path, Query, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

/// Shared state for the gateway (config, store, submission pipeline).
#[derive(Clone)]
pub struct GatewayState {
    pub config: Arc<Config>,
    pub store: Arc<dyn FormStore>,
    pub gateway: Arc<SubmissionGateway>,
}

/// Build the router over an existing state. Split out so the integration
/// tests can boot the full stack on a free port.
pub fn build_router(state: GatewayState) -> Router {
    Router::new()
        .route("/", get(health_http))
        .route("/forms/:handle", get(get_form))
        .route("/submit", post(submit))
        .with_state(state)
}

/// Assemble the default state: in-memory store seeded from the forms file,
/// spam gate, and the dispatcher with the HTTP webhook sender.
pub async fn build_state(config: Config, forms_path: Option<PathBuf>) -> Result<GatewayState> {
    let store = Arc::new(MemoryStore::new());
    if let Some(path) = forms_path {
        if path.exists() {
            let forms = load_forms_file(&path)?;
            let stored = store.seed(forms).await?;
            log::info!("seeded {} form(s) from {}", stored, path.display());
        } else {
            log::warn!("forms file not found, starting empty: {}", path.display());
        }
    }
    let spam = SpamGate::new(config.spam.clone(), Arc::new(MemoryRateLimiter::new()));
    let dispatcher = Arc::new(NotificationDispatcher::new(
        config.notifications.clone(),
        Arc::new(LogMailer),
        Arc::new(HttpWebhookSender::new()),
    ));
    let gateway = Arc::new(SubmissionGateway::new(store.clone(), spam, dispatcher));
    Ok(GatewayState {
        config: Arc::new(config),
        store,
        gateway,
    })
}

/// Run the gateway server; binds to config.gateway.bind:config.gateway.port.
/// Blocks until shutdown (Ctrl+C or SIGTERM).
pub async fn run_gateway(config: Config, forms_path: Option<PathBuf>) -> Result<()> {
    let bind_addr = format!("{}:{}", config.gateway.bind.trim(), config.gateway.port);
    let state = build_state(config, forms_path).await?;
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding to {}", bind_addr))?;
    log::info!("gateway listening on {}", bind_addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("gateway server exited")?;
    log::info!("gateway stopped");
    Ok(())
}

/// Future that completes when the process should shut down (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    log::info!("shutdown signal received");
}

/// GET / returns a simple health JSON (for probes).
async fn health_http(State(state): State<GatewayState>) -> Json<serde_json::Value> {
    Json(json!({
        "runtime": "running",
        "port": state.config.gateway.port,
    }))
}

#[derive(Deserialize)]
struct FormQuery {
    locale: Option<String>,
}

/// GET /forms/:handle — the public form definition the client engine runs
/// against, with question content resolved for `?locale=`.
async fn get_form(
    State(state): State<GatewayState>,
    Path(handle): Path<String>,
    Query(query): Query<FormQuery>,
) -> Result<Json<PublicForm>, (StatusCode, Json<serde_json::Value>)> {
    let locale = query.locale.as_deref();
    match state.store.form_by_handle(&handle, locale).await {
        Some(form) => Ok(Json(PublicForm::from_definition(&form, locale))),
        None => Err((
            StatusCode::NOT_FOUND,
            Json(json!({ "success": false, "message": "Form not found" })),
        )),
    }
}

/// POST /submit — always 200 with a structured `SubmitResponse`.
async fn submit(
    State(state): State<GatewayState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(request): Json<SubmitRequest>,
) -> Json<SubmitResponse> {
    let ip = client_ip(&headers, &peer);
    let user_agent = headers
        .get(axum::http::header::USER_AGENT)
        .and_then(|v| v.to_str().ok());
    let response = state
        .gateway
        .submit(&request.form_handle, request.data, &ip, user_agent)
        .await;
    Json(response)
}

/// Client IP: first hop of X-Forwarded-For when present, else the socket
/// peer address.
fn client_ip(headers: &HeaderMap, peer: &SocketAddr) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| peer.ip().to_string())
}
