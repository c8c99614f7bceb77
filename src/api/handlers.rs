//! Route handlers

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::AppState;
use crate::error::ApiError;
use crate::registry::VariableSnapshot;
use crate::service::{ConnectOutcome, ServiceStatus};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectRequest {
    /// Overrides the configured connection string
    pub connection_string: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectResponse {
    pub success: bool,
    pub outcome: ConnectOutcome,
    pub connected: bool,
    pub variables: Vec<String>,
    pub variable_count: usize,
}

#[derive(Debug, Serialize)]
pub struct DisconnectResponse {
    pub success: bool,
    pub connected: bool,
}

#[derive(Debug, Serialize)]
pub struct VariablesResponse {
    pub details: Vec<VariableSnapshot>,
    pub count: usize,
}

#[derive(Debug, Serialize)]
pub struct DetectResponse {
    pub success: bool,
    pub variables: Vec<String>,
    pub count: usize,
}

#[derive(Debug, Serialize)]
pub struct CheckConnectionResponse {
    pub connected: bool,
    pub reconnected: bool,
}

pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

pub async fn metrics(State(state): State<AppState>) -> Result<String, ApiError> {
    state
        .metrics
        .as_ref()
        .map(|handle| handle.render())
        .ok_or(ApiError::MetricsDisabled)
}

pub async fn status(State(state): State<AppState>) -> Json<ServiceStatus> {
    Json(state.status_cache.get(&state.service).await)
}

pub async fn variables(State(state): State<AppState>) -> Json<VariablesResponse> {
    let details = state.service.registry().snapshots();
    Json(VariablesResponse {
        count: details.len(),
        details,
    })
}

pub async fn variable(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<VariableSnapshot>, ApiError> {
    state
        .service
        .variable(&name)
        .map(Json)
        .ok_or(ApiError::VariableNotFound(name))
}

pub async fn connect(
    State(state): State<AppState>,
    request: Option<Json<ConnectRequest>>,
) -> Json<ConnectResponse> {
    info!("Connect requested");
    let request = request.map(|Json(r)| r).unwrap_or_default();

    let outcome = match request.connection_string {
        Some(connection_string) => state.service.connect(&connection_string).await,
        None => state.service.connect_configured().await,
    };
    state.status_cache.invalidate().await;

    let variables = state.service.variable_names();
    info!(
        "Connect result: {:?}, {} variables",
        outcome,
        variables.len()
    );

    Json(ConnectResponse {
        success: outcome.is_connected(),
        connected: state.service.is_connected().await,
        outcome,
        variable_count: variables.len(),
        variables,
    })
}

pub async fn disconnect(State(state): State<AppState>) -> Json<DisconnectResponse> {
    info!("Disconnect requested");
    state.service.disconnect().await;
    state.status_cache.invalidate().await;

    Json(DisconnectResponse {
        success: true,
        connected: false,
    })
}

pub async fn detect_variables(State(state): State<AppState>) -> Json<DetectResponse> {
    info!("Starting variable detection");
    state.service.force_detect_variables().await;
    state.status_cache.invalidate().await;

    let variables = state.service.variable_names();
    info!("Detection finished: {} variables", variables.len());

    Json(DetectResponse {
        success: true,
        count: variables.len(),
        variables,
    })
}

pub async fn enable_auto_read(State(state): State<AppState>) -> StatusCode {
    state.service.enable_auto_read().await;
    state.status_cache.invalidate().await;
    StatusCode::OK
}

pub async fn disable_auto_read(State(state): State<AppState>) -> StatusCode {
    state.service.disable_auto_read().await;
    state.status_cache.invalidate().await;
    StatusCode::OK
}

/// Reconnect when the service is not connected
pub async fn check_connection(State(state): State<AppState>) -> Json<CheckConnectionResponse> {
    if state.service.is_connected().await {
        return Json(CheckConnectionResponse {
            connected: true,
            reconnected: false,
        });
    }

    info!("Connection check: reconnecting");
    let outcome = state.service.connect_configured().await;
    if outcome.is_connected() {
        state.service.enable_auto_read().await;
        info!("Reconnected");
    } else {
        warn!("Reconnect failed");
    }
    state.status_cache.invalidate().await;

    Json(CheckConnectionResponse {
        connected: state.service.is_connected().await,
        reconnected: outcome.is_connected(),
    })
}
