//! HTTP server for the VK Callback API

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::dispatcher::Dispatcher;
use crate::vk::inbound_from_event;

#[derive(Clone)]
pub struct CallbackState {
    pub dispatcher: Arc<Dispatcher>,
    pub confirmation: String,
    pub secret: Option<String>,
}

/// Event envelope posted by VK
#[derive(Debug, Deserialize)]
pub struct CallbackEvent {
    #[serde(rename = "type")]
    pub kind: String,
    pub group_id: Option<u64>,
    pub secret: Option<String>,
    #[serde(default)]
    pub object: serde_json::Value,
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
    pub active_sessions: usize,
}

/// Callback handler. Answers quickly; the message itself is handled by the
/// user's worker after the response.
pub async fn callback_handler(
    State(state): State<CallbackState>,
    Json(event): Json<CallbackEvent>,
) -> (StatusCode, String) {
    if let Some(expected) = &state.secret {
        if event.secret.as_deref() != Some(expected.as_str()) {
            warn!("Rejected callback '{}' with wrong secret", event.kind);
            return (StatusCode::FORBIDDEN, "forbidden".to_string());
        }
    }

    match event.kind.as_str() {
        "confirmation" => {
            info!("Callback server confirmation requested by group {:?}", event.group_id);
            (StatusCode::OK, state.confirmation.clone())
        }
        "message_new" => {
            if let Some(message) = inbound_from_event(&event.object) {
                debug!("Inbound message from user {}", message.user_id);
                state.dispatcher.dispatch(message);
            }
            (StatusCode::OK, "ok".to_string())
        }
        other => {
            debug!("Ignoring callback event '{}'", other);
            (StatusCode::OK, "ok".to_string())
        }
    }
}

/// Health check handler
async fn health_handler(State(state): State<CallbackState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: "vkinder".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        active_sessions: state.dispatcher.engine().sessions().len(),
    })
}

pub fn create_router(state: CallbackState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/callback", post(callback_handler))
        .with_state(state)
}

/// Run the callback server
pub async fn run_server(state: CallbackState, port: u16) -> anyhow::Result<()> {
    let addr = format!("0.0.0.0:{}", port);
    info!("Starting callback server on {}", addr);

    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Callback server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
