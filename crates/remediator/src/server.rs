//! HTTP server for Falco CloudEvents.
//!
//! Provides:
//! - `POST /` and `POST /events` for CloudEvents (binary or structured mode)
//! - `GET /health` for liveness probes

use anyhow::Result;
use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tower::ServiceBuilder;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::{debug, error, info, warn, Level};

use crate::event::{self, AlertEvent, CloudEvent};
use crate::orchestrator::Orchestrator;

/// Largest accepted request body. Falco alerts are a few KiB.
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Server state shared across handlers.
pub struct AppState {
    pub orchestrator: Orchestrator,
}

impl AppState {
    #[must_use]
    pub fn new(orchestrator: Orchestrator) -> Self {
        Self { orchestrator }
    }
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
    version: &'static str,
}

/// Build the HTTP router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", post(event_handler))
        .route("/events", post(event_handler))
        .route("/health", get(health_handler))
        .layer(
            ServiceBuilder::new()
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                        .on_response(DefaultOnResponse::new().level(Level::INFO)),
                )
                .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES)),
        )
        .with_state(state)
}

/// Serve on an already bound listener until `shutdown` resolves.
///
/// In-flight requests are drained before this returns.
pub async fn run_server<F>(listener: TcpListener, state: Arc<AppState>, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = build_router(state);

    info!("Falco remediator listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    info!("Falco remediator stopped");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C, shutting down gracefully");
        },
        () = terminate => {
            info!("Received SIGTERM, shutting down gracefully");
        },
    }
}

async fn health_handler() -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy",
        service: "falco-remediator",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Decode, validate and remediate one event.
///
/// Every decoded event is acknowledged with an empty 200 whatever the
/// remediation outcome; only undecodable requests get a 400.
async fn event_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    let envelope = match CloudEvent::from_http(&headers, &body) {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!(error = %e, "Rejecting undecodable CloudEvent");
            return StatusCode::BAD_REQUEST;
        }
    };

    if !event::envelope_in_scope(&envelope) {
        debug!(
            event_id = %envelope.id,
            source = %envelope.source,
            event_type = %envelope.ty,
            "Ignoring event from another source"
        );
        return StatusCode::OK;
    }

    let alert = match AlertEvent::from_envelope(&envelope) {
        Ok(alert) => alert,
        Err(e) => {
            warn!(event_id = %envelope.id, error = %e, "Rejecting malformed Falco payload");
            return StatusCode::BAD_REQUEST;
        }
    };

    state.orchestrator.handle(&alert).await;
    StatusCode::OK
}
