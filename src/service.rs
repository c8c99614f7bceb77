//! Device polling service
//!
//! Owns one logical device connection, refreshes every registered variable on
//! demand and degrades to synthetic data whenever the device path is
//! unavailable. Callers never see a driver error: failures become state
//! (`last_error`, simulated mode) instead.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{broadcast, Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::config::{DeviceConfig, ReadFailurePolicy, VariableConfig};
use crate::device::{DeviceClient, DeviceSession};
use crate::registry::{
    PollTarget, Value, VariableOrigin, VariableRegistry, VariableSnapshot, VariableUpdate,
};
use crate::simulation::SimulationGenerator;

/// Minimum spacing between repeated read-error log lines
const ERROR_LOG_INTERVAL: Duration = Duration::from_secs(5);
/// Capacity of the update broadcast channel
const UPDATE_CHANNEL_CAPACITY: usize = 1024;

/// Result of a connection attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum ConnectOutcome {
    /// A live device session is open
    Connected,
    /// The device is unreachable; serving synthetic data
    Simulated { error: String },
    /// The device is unreachable and simulation fallback is disabled
    Failed { error: String },
}

impl ConnectOutcome {
    /// Whether the service reports itself connected afterwards
    pub fn is_connected(&self) -> bool {
        !matches!(self, ConnectOutcome::Failed { .. })
    }

    fn label(&self) -> &'static str {
        match self {
            ConnectOutcome::Connected => "connected",
            ConnectOutcome::Simulated { .. } => "simulated",
            ConnectOutcome::Failed { .. } => "failed",
        }
    }
}

/// Counts from one pass over the registry
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PollReport {
    /// Values read from the device
    pub read: usize,
    /// Values synthesized
    pub simulated: usize,
    /// Device reads that failed
    pub failed: usize,
}

/// Connection flags visible to any caller
#[derive(Debug, Clone, Default)]
pub struct ConnectionState {
    pub connected: bool,
    /// Connected in degraded mode, without a live device session
    pub simulated: bool,
    pub last_error: Option<String>,
    pub auto_read_enabled: bool,
    pub connection_string: String,
}

/// Response body of the status query
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceStatus {
    pub connected: bool,
    /// Connected without a live device session
    pub simulated: bool,
    pub connection_string: String,
    pub last_error: Option<String>,
    pub auto_read_enabled: bool,
    pub variable_count: usize,
    /// Last value of the primary variable
    pub last_value: Option<Value>,
    pub variables: Vec<VariableSnapshot>,
    pub timestamp: DateTime<Utc>,
}

/// State touched only while holding the session lock
struct SessionState {
    session: Option<Box<dyn DeviceSession>>,
    simulator: SimulationGenerator,
    last_error_log: Option<Instant>,
}

impl SessionState {
    /// Rate limiter for noisy per-tick failures
    fn should_log_error(&mut self) -> bool {
        let now = Instant::now();
        match self.last_error_log {
            Some(last) if now.duration_since(last) < ERROR_LOG_INTERVAL => false,
            _ => {
                self.last_error_log = Some(now);
                true
            }
        }
    }
}

/// Connection lifecycle and polling for one device
pub struct PollingService {
    client: Arc<dyn DeviceClient>,
    registry: Arc<VariableRegistry>,
    config: DeviceConfig,
    session: Mutex<SessionState>,
    state: RwLock<ConnectionState>,
    updates: broadcast::Sender<VariableUpdate>,
}

impl PollingService {
    pub fn new(
        client: Arc<dyn DeviceClient>,
        registry: Arc<VariableRegistry>,
        config: DeviceConfig,
    ) -> Self {
        let simulator = match config.simulation_seed {
            Some(seed) => SimulationGenerator::with_seed(config.primary_variable.clone(), seed),
            None => SimulationGenerator::new(config.primary_variable.clone()),
        };
        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        let state = ConnectionState {
            connection_string: config.connection_string.clone(),
            ..ConnectionState::default()
        };

        Self {
            client,
            registry,
            config,
            session: Mutex::new(SessionState {
                session: None,
                simulator,
                last_error_log: None,
            }),
            state: RwLock::new(state),
            updates,
        }
    }

    pub fn registry(&self) -> &Arc<VariableRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    /// Live feed of every recorded observation
    pub fn subscribe(&self) -> broadcast::Receiver<VariableUpdate> {
        self.updates.subscribe()
    }

    pub async fn connection_state(&self) -> ConnectionState {
        self.state.read().await.clone()
    }

    pub async fn is_connected(&self) -> bool {
        self.state.read().await.connected
    }

    pub async fn is_auto_read_enabled(&self) -> bool {
        self.state.read().await.auto_read_enabled
    }

    /// Connect with the configured connection string
    pub async fn connect_configured(&self) -> ConnectOutcome {
        let connection_string = self.config.connection_string.clone();
        self.connect(&connection_string).await
    }

    /// Replace any existing session with a new one to `connection_string`
    pub async fn connect(&self, connection_string: &str) -> ConnectOutcome {
        let mut inner = self.session.lock().await;

        if let Some(mut previous) = inner.session.take() {
            if let Err(e) = previous.close().await {
                warn!("Error closing existing session: {}", e);
            }
        }

        info!("Connecting to device: {}", connection_string);

        let outcome = match self.client.open(connection_string).await {
            Ok(session) => {
                inner.session = Some(session);
                {
                    let mut state = self.state.write().await;
                    state.connected = true;
                    state.simulated = false;
                    state.last_error = None;
                    state.auto_read_enabled = true;
                    state.connection_string = connection_string.to_string();
                }
                info!("Connection established: {}", connection_string);

                self.detect_locked(&mut inner).await;
                let report = self.poll_locked(&mut inner).await;
                debug!("Cold-start read: {:?}", report);

                ConnectOutcome::Connected
            }
            Err(e) => {
                let message = e.to_string();
                error!("Connection to {} failed: {}", connection_string, message);
                log_troubleshooting_hints(connection_string);

                let mut state = self.state.write().await;
                state.last_error = Some(message.clone());
                state.connection_string = connection_string.to_string();

                if self.config.fallback_to_simulation {
                    state.connected = true;
                    state.simulated = true;
                    state.auto_read_enabled = true;
                    drop(state);

                    info!("Device unavailable, serving simulated data");
                    self.install_simulated_variables();
                    self.poll_locked(&mut inner).await;

                    ConnectOutcome::Simulated { error: message }
                } else {
                    state.connected = false;
                    state.simulated = false;
                    state.auto_read_enabled = false;
                    ConnectOutcome::Failed { error: message }
                }
            }
        };

        metrics::counter!("plcbridge_connect_attempts_total", "outcome" => outcome.label())
            .increment(1);
        metrics::gauge!("plcbridge_connected").set(if outcome.is_connected() { 1.0 } else { 0.0 });

        outcome
    }

    /// Stop auto-read and close the session; safe to call repeatedly
    pub async fn disconnect(&self) {
        let mut inner = self.session.lock().await;
        self.state.write().await.auto_read_enabled = false;

        match inner.session.take() {
            Some(mut session) => match session.close().await {
                Ok(()) => info!("Disconnected from device"),
                Err(e) => error!("Error closing session: {}", e),
            },
            None => info!("Simulation stopped"),
        }

        {
            let mut state = self.state.write().await;
            state.connected = false;
            state.simulated = false;
        }
        metrics::gauge!("plcbridge_connected").set(0.0);
    }

    pub async fn enable_auto_read(&self) {
        self.state.write().await.auto_read_enabled = true;
        info!("Auto-read enabled");
    }

    pub async fn disable_auto_read(&self) {
        self.state.write().await.auto_read_enabled = false;
        info!("Auto-read disabled");
    }

    /// Scheduler entry point: poll only while connected with auto-read on
    pub async fn tick(&self) -> Option<PollReport> {
        let mut inner = self.session.lock().await;
        {
            let state = self.state.read().await;
            if !(state.connected && state.auto_read_enabled) {
                return None;
            }
        }
        Some(self.poll_locked(&mut inner).await)
    }

    /// Refresh every registered variable once
    pub async fn poll_once(&self) -> PollReport {
        let mut inner = self.session.lock().await;
        self.poll_locked(&mut inner).await
    }

    /// Clear the registry and rebuild it from the candidate catalog
    pub async fn force_detect_variables(&self) -> usize {
        let mut inner = self.session.lock().await;
        let connected = self.state.read().await.connected;

        if inner.session.is_some() && connected {
            self.detect_locked(&mut inner).await
        } else {
            self.install_simulated_variables()
        }
    }

    pub fn variable(&self, name: &str) -> Option<VariableSnapshot> {
        self.registry.get(name).map(|v| v.snapshot(true))
    }

    pub fn variable_names(&self) -> Vec<String> {
        self.registry.list_names()
    }

    pub async fn status(&self) -> ServiceStatus {
        let state = self.connection_state().await;
        let variables = self.registry.snapshots();
        let last_value = self
            .registry
            .get(&self.config.primary_variable)
            .and_then(|v| v.last_value);

        ServiceStatus {
            connected: state.connected,
            simulated: state.simulated,
            connection_string: state.connection_string,
            last_error: state.last_error,
            auto_read_enabled: state.auto_read_enabled,
            variable_count: variables.len(),
            last_value,
            variables,
            timestamp: Utc::now(),
        }
    }

    /// Probe each candidate once; register the ones that answer
    async fn detect_locked(&self, inner: &mut SessionState) -> usize {
        self.registry.clear();

        let Some(session) = inner.session.as_mut() else {
            return self.install_simulated_variables();
        };

        info!(
            "Probing {} candidate variables",
            self.config.candidates.len()
        );

        let mut found = 0;
        for candidate in &self.config.candidates {
            match session.read(&candidate.address, candidate.data_type).await {
                Ok(value) => {
                    info!(
                        "Detected variable {} ({}), initial value: {}",
                        candidate.name, candidate.data_type, value
                    );
                    self.registry.register(
                        &candidate.name,
                        &candidate.address,
                        candidate.data_type,
                        VariableOrigin::Detected,
                    );
                    found += 1;
                }
                Err(e) => {
                    session.reset_request(&candidate.address);
                    debug!("Candidate {} not readable: {}", candidate.address, e);
                }
            }
        }

        info!(
            "Found {} accessible variables out of {} probed",
            found,
            self.config.candidates.len()
        );

        if found == 0 {
            info!("No variables detected, using simulated variables");
            return self.install_simulated_variables();
        }

        found
    }

    /// Replace the registry contents with the simulated fallback set
    fn install_simulated_variables(&self) -> usize {
        self.registry.clear();
        for VariableConfig {
            name,
            address,
            data_type,
        } in &self.config.simulated_variables
        {
            self.registry
                .register(name, address, *data_type, VariableOrigin::Simulated);
        }
        info!(
            "Installed {} simulated variables",
            self.config.simulated_variables.len()
        );
        self.registry.len()
    }

    async fn poll_locked(&self, inner: &mut SessionState) -> PollReport {
        let started = Instant::now();
        let mut report = PollReport::default();
        let mut last_read_error = None;

        for target in self.registry.poll_targets() {
            let from_device =
                target.origin == VariableOrigin::Detected && inner.session.is_some();
            if !from_device {
                self.record_simulated(inner, &target);
                report.simulated += 1;
                continue;
            }

            let result = match inner.session.as_mut() {
                Some(session) => session.read(&target.address, target.data_type).await,
                None => continue,
            };

            match result {
                Ok(value) => {
                    metrics::counter!("plcbridge_reads_total").increment(1);
                    self.record(&target, value, false);
                    report.read += 1;
                }
                Err(e) => {
                    if let Some(session) = inner.session.as_mut() {
                        session.reset_request(&target.address);
                    }
                    metrics::counter!("plcbridge_read_errors_total").increment(1);
                    report.failed += 1;

                    if inner.should_log_error() {
                        error!("Failed to read {} ({}): {}", target.name, target.address, e);
                    }

                    if self.config.read_failure == ReadFailurePolicy::Simulate {
                        self.record_simulated(inner, &target);
                        report.simulated += 1;
                    }
                    last_read_error = Some(e.to_string());
                }
            }
        }

        // A clean pass against the device clears a stale read error
        if let Some(message) = last_read_error {
            self.state.write().await.last_error = Some(message);
        } else if report.read > 0 {
            self.state.write().await.last_error = None;
        }

        metrics::histogram!("plcbridge_poll_duration_seconds")
            .record(started.elapsed().as_secs_f64());
        report
    }

    fn record_simulated(&self, inner: &mut SessionState, target: &PollTarget) {
        let value = inner.simulator.next_value(
            &target.name,
            target.data_type,
            target.last_value.as_ref(),
        );
        metrics::counter!("plcbridge_simulated_values_total").increment(1);
        self.record(target, value, true);
    }

    fn record(&self, target: &PollTarget, value: Value, simulated: bool) {
        debug!("{} = {}{}", target.name, value, if simulated { " (simulated)" } else { "" });

        if !self.registry.record_observation(&target.name, value.clone()) {
            return;
        }

        // No subscribers is normal
        let _ = self.updates.send(VariableUpdate {
            name: target.name.clone(),
            value,
            data_type: target.data_type,
            simulated,
            timestamp: Utc::now(),
        });
    }
}

fn log_troubleshooting_hints(connection_string: &str) {
    info!("Possible fixes:");
    info!("1. Check that the device is powered and reachable on the network");
    info!("2. Check that the host in {} answers a ping", connection_string);
    info!("3. Make sure the device port is not blocked by a firewall");
    info!("4. Check that the connection string scheme is supported by the driver");
    info!("5. If the connection worked before, restart the device or check its state");
}
