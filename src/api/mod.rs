//! HTTP API
//!
//! Thin axum layer over [`PollingService`]: status and variable queries,
//! control operations, a websocket feed of live updates and the Prometheus
//! scrape endpoint.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::routing::{get, post};
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::sync::Mutex;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;

use crate::service::{PollingService, ServiceStatus};

pub mod handlers;
pub mod ws;

/// Short-lived read-through cache in front of the status query.
///
/// Concurrent callers queue on the slot lock, so a burst of requests costs one
/// registry read.
pub struct StatusCache {
    ttl: Duration,
    slot: Mutex<Option<(Instant, ServiceStatus)>>,
}

impl StatusCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            slot: Mutex::new(None),
        }
    }

    pub async fn get(&self, service: &PollingService) -> ServiceStatus {
        let mut slot = self.slot.lock().await;

        if let Some((computed_at, status)) = slot.as_ref() {
            if computed_at.elapsed() < self.ttl {
                return status.clone();
            }
        }

        let status = service.status().await;
        *slot = Some((Instant::now(), status.clone()));
        status
    }

    /// Drop the cached value so the next query sees fresh state
    pub async fn invalidate(&self) {
        *self.slot.lock().await = None;
    }
}

/// Shared state for all handlers
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<PollingService>,
    pub status_cache: Arc<StatusCache>,
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(
        service: Arc<PollingService>,
        status_ttl: Duration,
        metrics: Option<PrometheusHandle>,
    ) -> Self {
        Self {
            service,
            status_cache: Arc::new(StatusCache::new(status_ttl)),
            metrics,
        }
    }
}

/// Build the router; `static_dir` is served for any unmatched path
pub fn router(state: AppState, static_dir: Option<&str>) -> Router {
    let mut app = Router::new()
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics))
        .route("/api/status", get(handlers::status))
        .route("/api/variables", get(handlers::variables))
        .route("/api/variable/:name", get(handlers::variable))
        .route("/api/detectVariables", post(handlers::detect_variables))
        .route("/api/enableAutoRead", post(handlers::enable_auto_read))
        .route("/api/disableAutoRead", post(handlers::disable_auto_read))
        .route("/api/checkConnection", get(handlers::check_connection))
        .route("/connect", post(handlers::connect))
        .route("/disconnect", post(handlers::disconnect))
        .route("/ws", get(ws::updates));

    if let Some(dir) = static_dir {
        app = app.fallback_service(ServeDir::new(dir));
    }

    app.layer(CorsLayer::permissive()).with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeviceConfig;
    use crate::device::MockDeviceClient;
    use crate::error::DeviceError;
    use crate::registry::VariableRegistry;

    fn offline_service() -> PollingService {
        let mut client = MockDeviceClient::new();
        client
            .expect_open()
            .returning(|_| Err(DeviceError::Connection("offline".to_string())));

        PollingService::new(
            Arc::new(client),
            Arc::new(VariableRegistry::new()),
            DeviceConfig {
                simulation_seed: Some(3),
                ..DeviceConfig::default()
            },
        )
    }

    #[tokio::test]
    async fn test_status_cache_reuses_recent_value() {
        let service = offline_service();
        let cache = StatusCache::new(Duration::from_secs(60));

        assert!(!cache.get(&service).await.connected);

        service.connect_configured().await;
        assert!(!cache.get(&service).await.connected);

        cache.invalidate().await;
        let status = cache.get(&service).await;
        assert!(status.connected);
        assert!(status.simulated);
    }

    #[tokio::test]
    async fn test_zero_ttl_always_recomputes() {
        let service = offline_service();
        let cache = StatusCache::new(Duration::ZERO);

        assert_eq!(cache.get(&service).await.variable_count, 0);
        service.connect_configured().await;
        assert_eq!(cache.get(&service).await.variable_count, 7);
    }
}
