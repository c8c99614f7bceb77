//! plcbridge - PLC polling gateway
//!
//! Polls a device, caches its variables and serves them over HTTP,
//! websocket and MQTT. Falls back to simulated data when the device is
//! unreachable.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{error, info, warn};

use plcbridge::api::{self, AppState};
use plcbridge::config::load_config;
use plcbridge::modbus::ModbusDeviceClient;
use plcbridge::mqtt::MqttPublisher;
use plcbridge::registry::VariableRegistry;
use plcbridge::scheduler::spawn_poller;
use plcbridge::service::PollingService;
use plcbridge::telemetry;

#[tokio::main]
async fn main() -> Result<()> {
    telemetry::init_tracing();

    info!("plcbridge v{} starting", env!("CARGO_PKG_VERSION"));

    let config = load_config()?;

    let metrics = if config.server.metrics_enabled {
        Some(telemetry::install_metrics()?)
    } else {
        None
    };

    let registry = Arc::new(VariableRegistry::new());
    let service = Arc::new(PollingService::new(
        Arc::new(ModbusDeviceClient::new()),
        registry,
        config.device.clone(),
    ));

    if config.device.connect_on_start {
        let outcome = service.connect_configured().await;
        info!("Initial connect: {:?}", outcome);
    } else {
        info!("connect_on_start disabled, waiting for /connect");
    }

    let poller = spawn_poller(
        service.clone(),
        Duration::from_millis(config.device.poll_interval_ms.max(1)),
    );

    let mqtt = if config.mqtt.enabled {
        let publisher = Arc::new(MqttPublisher::new(&config.mqtt));
        if let Err(e) = publisher.publish_status(true).await {
            warn!("Failed to publish MQTT status: {}", e);
        }
        tokio::spawn(publisher.clone().start_publishing(service.subscribe()));
        Some(publisher)
    } else {
        None
    };

    let state = AppState::new(
        service.clone(),
        Duration::from_millis(config.server.status_cache_ms),
        metrics,
    );
    let app = api::router(state, config.server.static_dir.as_deref());

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .with_context(|| "Invalid server address")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("HTTP API listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .with_context(|| "HTTP server error")?;

    info!("Shutting down");
    poller.abort();
    service.disconnect().await;

    if let Some(publisher) = mqtt.filter(|p| p.is_connected()) {
        if let Err(e) = publisher.publish_status(false).await {
            error!("Failed to publish MQTT status: {}", e);
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}
