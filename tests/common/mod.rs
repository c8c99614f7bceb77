//! Common test utilities and helpers

#![allow(dead_code)] // Not every helper is used by every test file

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use plcbridge::api::{self, AppState};
use plcbridge::config::{DeviceConfig, VariableConfig};
use plcbridge::device::{DeviceClient, DeviceSession};
use plcbridge::error::DeviceError;
use plcbridge::registry::{DataType, Value, VariableRegistry};
use plcbridge::service::PollingService;

pub const FAKE_CONNECTION: &str = "fake://plc";

/// In-memory device answering reads from an address table
#[derive(Clone, Default)]
pub struct FakeDeviceClient {
    values: Arc<Mutex<HashMap<String, Value>>>,
    reachable: Arc<Mutex<bool>>,
    opens: Arc<AtomicUsize>,
}

impl FakeDeviceClient {
    pub fn reachable(values: &[(&str, Value)]) -> Self {
        let client = Self::default();
        *client.reachable.lock().unwrap() = true;
        {
            let mut table = client.values.lock().unwrap();
            for (address, value) in values {
                table.insert(address.to_string(), value.clone());
            }
        }
        client
    }

    pub fn unreachable() -> Self {
        Self::default()
    }

    pub fn set_reachable(&self, reachable: bool) {
        *self.reachable.lock().unwrap() = reachable;
    }

    pub fn set_value(&self, address: &str, value: Value) {
        self.values
            .lock()
            .unwrap()
            .insert(address.to_string(), value);
    }

    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DeviceClient for FakeDeviceClient {
    async fn open(&self, connection_string: &str) -> Result<Box<dyn DeviceSession>, DeviceError> {
        self.opens.fetch_add(1, Ordering::SeqCst);

        if !*self.reachable.lock().unwrap() {
            return Err(DeviceError::Connection(format!(
                "{} unreachable",
                connection_string
            )));
        }

        Ok(Box::new(FakeSession {
            values: self.values.clone(),
        }))
    }
}

struct FakeSession {
    values: Arc<Mutex<HashMap<String, Value>>>,
}

#[async_trait]
impl DeviceSession for FakeSession {
    async fn read(&mut self, address: &str, _data_type: DataType) -> Result<Value, DeviceError> {
        self.values
            .lock()
            .unwrap()
            .get(address)
            .cloned()
            .ok_or_else(|| DeviceError::read(address, "no such address"))
    }

    fn reset_request(&mut self, _address: &str) {}

    async fn close(&mut self) -> Result<(), DeviceError> {
        Ok(())
    }
}

/// Catalog of three candidates, two of which the fake device answers
pub fn fake_device_config() -> DeviceConfig {
    DeviceConfig {
        connection_string: FAKE_CONNECTION.to_string(),
        simulation_seed: Some(42),
        candidates: vec![
            VariableConfig::new("Speed", "HR0", DataType::Int),
            VariableConfig::new("Running", "C0", DataType::Bool),
            VariableConfig::new("Missing", "HR99", DataType::Int),
        ],
        primary_variable: "Speed".to_string(),
        ..DeviceConfig::default()
    }
}

pub fn build_service(client: FakeDeviceClient, config: DeviceConfig) -> Arc<PollingService> {
    Arc::new(PollingService::new(
        Arc::new(client),
        Arc::new(VariableRegistry::new()),
        config,
    ))
}

/// Router with status caching off so each request sees fresh state
pub fn build_app(service: Arc<PollingService>) -> axum::Router {
    let state = AppState::new(service, Duration::ZERO, None);
    api::router(state, None)
}
