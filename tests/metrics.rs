//! Prometheus export of service metrics
//!
//! Installs the process-wide recorder, so this file holds a single test.

use plcbridge::registry::Value;
use plcbridge::telemetry;

mod common;
use common::{build_service, fake_device_config, FakeDeviceClient};

#[tokio::test]
async fn test_metrics_follow_connection_lifecycle() {
    let handle = telemetry::install_metrics().unwrap();

    let client = FakeDeviceClient::unreachable();
    client.set_value("HR0", Value::Int(9));
    let service = build_service(client.clone(), fake_device_config());

    service.connect_configured().await;
    let rendered = handle.render();
    assert!(rendered
        .contains("# HELP plcbridge_connected 1 while connected, including simulated mode"));
    assert!(rendered.contains("plcbridge_connected 1"), "{}", rendered);
    assert!(rendered.contains("plcbridge_connect_attempts_total{outcome=\"simulated\"} 1"));
    assert!(rendered.contains("plcbridge_simulated_values_total"));

    service.disconnect().await;
    assert!(handle.render().contains("plcbridge_connected 0"));

    client.set_reachable(true);
    service.connect_configured().await;
    let rendered = handle.render();
    assert!(rendered.contains("plcbridge_connect_attempts_total{outcome=\"connected\"} 1"));
    assert!(rendered.contains("plcbridge_reads_total"));
    assert!(rendered.contains("plcbridge_connected 1"));
}
