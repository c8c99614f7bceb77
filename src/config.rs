//! Configuration management for PlcBridge

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::registry::DataType;

/// Environment variable naming the config file
pub const CONFIG_PATH_ENV: &str = "PLCBRIDGE_CONFIG";
/// Prefix for environment overrides, e.g. `PLCBRIDGE__SERVER__PORT=8080`
pub const ENV_PREFIX: &str = "PLCBRIDGE";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,
    /// Polled device
    pub device: DeviceConfig,
    /// MQTT broker configuration
    pub mqtt: MqttConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// HTTP API host
    pub host: String,
    /// HTTP API port
    pub port: u16,
    /// Enable metrics endpoint
    pub metrics_enabled: bool,
    /// How long a computed status is reused for concurrent callers
    pub status_cache_ms: u64,
    /// Directory served as static files (dashboard)
    pub static_dir: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            metrics_enabled: true,
            status_cache_ms: 30,
            static_dir: None,
        }
    }
}

/// What to do with a variable whose read failed on a live session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadFailurePolicy {
    /// Keep the last value
    #[default]
    Hold,
    /// Substitute a synthetic value
    Simulate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Driver connection string
    pub connection_string: String,
    /// Connect when the process starts
    pub connect_on_start: bool,
    /// Polling interval in milliseconds
    pub poll_interval_ms: u64,
    /// Variable that follows the bounded random walk in simulation
    pub primary_variable: String,
    /// Degrade to simulated data when the device is unreachable
    pub fallback_to_simulation: bool,
    pub read_failure: ReadFailurePolicy,
    /// Fixed seed for the simulator (random when absent)
    pub simulation_seed: Option<u64>,
    /// Addresses probed during detection
    pub candidates: Vec<VariableConfig>,
    /// Variables installed when nothing could be detected
    pub simulated_variables: Vec<VariableConfig>,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            connection_string: "s7://192.168.2.12:102".to_string(),
            connect_on_start: true,
            poll_interval_ms: 50,
            primary_variable: "DB2.DBW0".to_string(),
            fallback_to_simulation: true,
            read_failure: ReadFailurePolicy::Hold,
            simulation_seed: None,
            candidates: default_candidates(),
            simulated_variables: default_simulated_variables(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableConfig {
    /// Variable name (unique)
    pub name: String,
    /// Driver-specific address
    pub address: String,
    /// Declared type
    pub data_type: DataType,
}

impl VariableConfig {
    pub fn new(name: &str, address: &str, data_type: DataType) -> Self {
        Self {
            name: name.to_string(),
            address: address.to_string(),
            data_type,
        }
    }
}

/// Locations commonly populated on S7 controllers
fn default_candidates() -> Vec<VariableConfig> {
    vec![
        VariableConfig::new("DB2.DBW0", "%DB2.DBW0:INT", DataType::Int),
        VariableConfig::new("DB2.DBW2", "%DB2.DBW2:INT", DataType::Int),
        VariableConfig::new("DB2.DBW4", "%DB2.DBW4:INT", DataType::Int),
        VariableConfig::new("DB2.DBW6", "%DB2.DBW6:REAL", DataType::Real),
        VariableConfig::new("DB2.DBW10", "%DB2.DBW10:REAL", DataType::Real),
        VariableConfig::new("DB2.DBX14.0", "%DB2.DBX14.0:BOOL", DataType::Bool),
        VariableConfig::new("DB1.DBW0", "%DB1.DBW0:INT", DataType::Int),
        VariableConfig::new("DB1.DBW2", "%DB1.DBW2:INT", DataType::Int),
        VariableConfig::new("M0.0", "%M0.0:BOOL", DataType::Bool),
        VariableConfig::new("M0.1", "%M0.1:BOOL", DataType::Bool),
        VariableConfig::new("MW10", "%MW10:INT", DataType::Int),
        VariableConfig::new("I0.0", "%I0.0:BOOL", DataType::Bool),
        VariableConfig::new("I0.1", "%I0.1:BOOL", DataType::Bool),
        VariableConfig::new("Q0.0", "%Q0.0:BOOL", DataType::Bool),
    ]
}

fn default_simulated_variables() -> Vec<VariableConfig> {
    vec![
        VariableConfig::new("DB2.DBW0", "%DB2.DBW0:INT", DataType::Int),
        VariableConfig::new("Variable 1", "%DB2.DBW2:INT", DataType::Int),
        VariableConfig::new("Variable 2", "%DB2.DBW4:INT", DataType::Int),
        VariableConfig::new("Temperature", "%DB2.DBW6:REAL", DataType::Real),
        VariableConfig::new("Pressure", "%DB2.DBW10:REAL", DataType::Real),
        VariableConfig::new("Valve 1", "%DB2.DBX14.0:BOOL", DataType::Bool),
        VariableConfig::new("Valve 2", "%DB2.DBX14.1:BOOL", DataType::Bool),
    ]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    /// Publish variable updates to a broker
    pub enabled: bool,
    /// MQTT broker host
    pub host: String,
    /// MQTT broker port
    pub port: u16,
    /// Client ID
    pub client_id: String,
    /// Topic prefix
    pub topic_prefix: String,
    /// QoS level (0, 1, or 2)
    pub qos: u8,
    /// Retain published values
    pub retain: bool,
    /// Username (optional)
    pub username: Option<String>,
    /// Password (optional)
    pub password: Option<String>,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: "localhost".to_string(),
            port: 1883,
            client_id: "plcbridge".to_string(),
            topic_prefix: "plcbridge".to_string(),
            qos: 1,
            retain: false,
            username: None,
            password: None,
        }
    }
}

impl Config {
    /// Parse a YAML document; missing sections take their defaults
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).with_context(|| "Failed to parse config")
    }

    /// Build from an optional file layered with `PLCBRIDGE__*` environment overrides
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut builder = config::Config::builder();

        if path.exists() {
            builder = builder.add_source(config::File::from(path));
        } else {
            tracing::warn!("Config file {} not found, using defaults", path.display());
        }

        let settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        settings
            .try_deserialize()
            .with_context(|| "Failed to parse config file")
    }
}

/// Load configuration from file or use defaults
pub fn load_config() -> Result<Config> {
    let config_path =
        std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| "config.yaml".to_string());

    let config = Config::load_from(Path::new(&config_path))?;

    if let Ok(rendered) = serde_yaml::to_string(&config) {
        tracing::debug!("Effective configuration:\n{}", rendered);
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();

        assert_eq!(config.server.port, 3000);
        assert_eq!(config.server.status_cache_ms, 30);
        assert_eq!(config.device.candidates.len(), 14);
        assert_eq!(config.device.simulated_variables.len(), 7);
        assert_eq!(config.device.primary_variable, "DB2.DBW0");
        assert!(config.device.fallback_to_simulation);
        assert_eq!(config.device.read_failure, ReadFailurePolicy::Hold);
        assert!(!config.mqtt.enabled);
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let yaml = r#"
server:
  port: 8080
device:
  connection_string: "tcp://10.0.0.5:502?unit=2"
  read_failure: simulate
  candidates:
    - name: tank_level
      address: HR100
      data_type: WORD
    - name: pump_running
      address: C5
      data_type: BOOL
"#;

        let config = Config::from_yaml_str(yaml).unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.device.connection_string, "tcp://10.0.0.5:502?unit=2");
        assert_eq!(config.device.read_failure, ReadFailurePolicy::Simulate);
        assert_eq!(config.device.candidates.len(), 2);
        assert_eq!(config.device.candidates[0].data_type, DataType::Int);
        assert_eq!(config.device.simulated_variables.len(), 7);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "device:\n  poll_interval_ms: 250\n  simulation_seed: 7\nmqtt:\n  enabled: true\n  topic_prefix: line-3"
        )
        .unwrap();

        let config = Config::load_from(file.path()).unwrap();
        assert_eq!(config.device.poll_interval_ms, 250);
        assert_eq!(config.device.simulation_seed, Some(7));
        assert!(config.mqtt.enabled);
        assert_eq!(config.mqtt.topic_prefix, "line-3");
        assert_eq!(config.mqtt.port, 1883);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from(&dir.path().join("absent.yaml")).unwrap();
        assert_eq!(config.device.connection_string, "s7://192.168.2.12:102");
    }

    #[test]
    fn test_sample_config_parses() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("config.yaml");
        let config = Config::load_from(&path).unwrap();

        assert_eq!(config.device.primary_variable, "Speed");
        assert_eq!(config.device.candidates.len(), 6);
        assert_eq!(config.device.candidates[3].data_type, DataType::DInt);
        assert_eq!(config.device.simulated_variables.len(), 3);
        assert!(!config.mqtt.enabled);
    }

    #[test]
    fn test_invalid_yaml_is_an_error() {
        assert!(Config::from_yaml_str("server: [unclosed").is_err());
    }
}
