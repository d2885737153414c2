//! HTTP API
//!
//! - `GET  /api/health`
//! - `POST /api/chat`
//! - `GET  /api/chat/history/{user_id}`

pub mod handlers;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Json, Router,
    http::{HeaderValue, Method, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::coach::ConversationOrchestrator;
use crate::config::ServerConfig;
use crate::error::{IlpaError, Result};
use crate::storage::ConversationLog;

/// Shared state for all handlers
pub struct AppState {
    pub orchestrator: Arc<ConversationOrchestrator>,
    /// Read side of the conversation log for history views
    pub log: Arc<dyn ConversationLog>,
    pub config: ServerConfig,
}

/// The ILPA HTTP server
pub struct ApiServer {
    state: Arc<AppState>,
}

impl ApiServer {
    pub fn new(
        config: ServerConfig,
        orchestrator: Arc<ConversationOrchestrator>,
        log: Arc<dyn ConversationLog>,
    ) -> Self {
        Self {
            state: Arc::new(AppState {
                orchestrator,
                log,
                config,
            }),
        }
    }

    /// Bind and serve until Ctrl+C or SIGTERM
    pub async fn serve(&self) -> Result<()> {
        let addr: SocketAddr = self
            .state
            .config
            .listen_addr
            .parse()
            .map_err(|e| IlpaError::Config(format!("Invalid listen address: {e}")))?;

        let app = create_router(self.state.clone());

        tracing::info!(
            "Starting ILPA API on {addr} ({} environment)",
            self.state.config.environment
        );

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| IlpaError::Server(format!("Failed to bind to {addr}: {e}")))?;

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| IlpaError::Server(format!("Server error: {e}")))?;

        tracing::info!("ILPA API shut down gracefully");
        Ok(())
    }
}

/// Create the router with all routes and layers
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = build_cors(&state.config.allowed_origins);

    Router::new()
        .route("/api/health", get(handlers::health_handler))
        .route("/api/chat", post(handlers::chat_handler))
        .route(
            "/api/chat/history/{user_id}",
            get(handlers::history_handler),
        )
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

fn build_cors(origins: &[String]) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION, header::ACCEPT]);

    if origins.is_empty() || origins.iter().any(|o| o == "*") {
        return cors.allow_origin(Any);
    }

    let parsed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();
    cors.allow_origin(AllowOrigin::list(parsed))
}

/// JSON error envelope: `{"error": {"type": .., "message": ..}}`
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    error_type: &'static str,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, error_type: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            error_type,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "invalid_request", message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": {
                "type": self.error_type,
                "message": self.message,
            }
        });
        (self.status, Json(body)).into_response()
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown");
        },
    }
}
