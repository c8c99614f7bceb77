//! Variable registry
//!
//! Holds every known device variable together with its last value, a bounded
//! history and running statistics. Reads are safe from any task while the
//! polling path writes.

use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Number of past values kept per variable
pub const HISTORY_CAPACITY: usize = 100;

/// Declared type of a device variable
///
/// Deserialization goes through [`FromStr`], so config files accept any case
/// and the `WORD`/`DWORD` spellings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE", try_from = "String")]
pub enum DataType {
    Bool,
    Byte,
    Int,
    DInt,
    Real,
}

impl DataType {
    /// Whether observations of this type feed min/max/average
    pub fn is_numeric(self) -> bool {
        !matches!(self, DataType::Bool)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataType::Bool => "BOOL",
            DataType::Byte => "BYTE",
            DataType::Int => "INT",
            DataType::DInt => "DINT",
            DataType::Real => "REAL",
        };
        f.write_str(name)
    }
}

impl FromStr for DataType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "BOOL" => Ok(DataType::Bool),
            "BYTE" => Ok(DataType::Byte),
            "WORD" | "INT" => Ok(DataType::Int),
            "DWORD" | "DINT" => Ok(DataType::DInt),
            "REAL" => Ok(DataType::Real),
            other => Err(format!("unknown data type '{}'", other)),
        }
    }
}

impl TryFrom<String> for DataType {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

/// A typed value read from (or synthesized for) a device variable
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Byte(u8),
    Int(i32),
    DInt(i64),
    Real(f64),
}

impl Value {
    /// Numeric view of the value; `None` for booleans
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Bool(_) => None,
            Value::Byte(v) => Some(f64::from(*v)),
            Value::Int(v) => Some(f64::from(*v)),
            Value::DInt(v) => Some(*v as f64),
            Value::Real(v) => Some(*v),
        }
    }

    pub fn data_type(&self) -> DataType {
        match self {
            Value::Bool(_) => DataType::Bool,
            Value::Byte(_) => DataType::Byte,
            Value::Int(_) => DataType::Int,
            Value::DInt(_) => DataType::DInt,
            Value::Real(_) => DataType::Real,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(v) => write!(f, "{}", v),
            Value::Byte(v) => write!(f, "{}", v),
            Value::Int(v) => write!(f, "{}", v),
            Value::DInt(v) => write!(f, "{}", v),
            Value::Real(v) => write!(f, "{:.3}", v),
        }
    }
}

/// How a variable entered the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VariableOrigin {
    /// Probed successfully on a live device
    Detected,
    /// Part of the simulated fallback set; always synthesized
    Simulated,
}

/// Running statistics over every numeric observation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VariableStats {
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub sum: f64,
    pub sample_count: u64,
}

impl VariableStats {
    pub fn record(&mut self, value: f64) {
        self.min = Some(self.min.map_or(value, |m| m.min(value)));
        self.max = Some(self.max.map_or(value, |m| m.max(value)));
        self.sum += value;
        self.sample_count += 1;
    }

    pub fn average(&self) -> Option<f64> {
        if self.sample_count == 0 {
            None
        } else {
            Some(self.sum / self.sample_count as f64)
        }
    }
}

/// One addressable quantity on the device
#[derive(Debug, Clone)]
pub struct Variable {
    pub name: String,
    pub address: String,
    pub data_type: DataType,
    pub origin: VariableOrigin,
    pub last_value: Option<Value>,
    pub history: VecDeque<Value>,
    pub stats: VariableStats,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Variable {
    pub fn new(
        name: impl Into<String>,
        address: impl Into<String>,
        data_type: DataType,
        origin: VariableOrigin,
    ) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            data_type,
            origin,
            last_value: None,
            history: VecDeque::with_capacity(HISTORY_CAPACITY),
            stats: VariableStats::default(),
            updated_at: None,
        }
    }

    /// Apply one observation: history, last value and statistics
    pub fn observe(&mut self, value: Value) {
        if self.history.len() >= HISTORY_CAPACITY {
            self.history.pop_front();
        }
        self.history.push_back(value.clone());

        // NaN/inf (e.g. uninitialised REAL registers) stay out of the statistics
        if let Some(numeric) = value.as_f64().filter(|v| v.is_finite()) {
            self.stats.record(numeric);
        }

        self.last_value = Some(value);
        self.updated_at = Some(Utc::now());
    }

    pub fn snapshot(&self, with_history: bool) -> VariableSnapshot {
        VariableSnapshot {
            name: self.name.clone(),
            address: self.address.clone(),
            data_type: self.data_type,
            origin: self.origin,
            last_value: self.last_value.clone(),
            min: self.stats.min,
            max: self.stats.max,
            average: self.stats.average(),
            sample_count: self.stats.sample_count,
            history: with_history.then(|| self.history.iter().cloned().collect()),
            updated_at: self.updated_at,
        }
    }
}

/// Serializable view of a variable for status queries
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VariableSnapshot {
    pub name: String,
    pub address: String,
    pub data_type: DataType,
    pub origin: VariableOrigin,
    pub last_value: Option<Value>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub average: Option<f64>,
    pub sample_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub history: Option<Vec<Value>>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// A single observation, fanned out to live consumers
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VariableUpdate {
    pub name: String,
    pub value: Value,
    pub data_type: DataType,
    pub simulated: bool,
    pub timestamp: DateTime<Utc>,
}

/// What the poller needs to refresh one variable
#[derive(Debug, Clone)]
pub struct PollTarget {
    pub name: String,
    pub address: String,
    pub data_type: DataType,
    pub origin: VariableOrigin,
    pub last_value: Option<Value>,
}

/// Concurrent map of variables keyed by name
#[derive(Debug, Default)]
pub struct VariableRegistry {
    variables: DashMap<String, Variable>,
}

impl VariableRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite a variable with empty statistics
    pub fn register(
        &self,
        name: &str,
        address: &str,
        data_type: DataType,
        origin: VariableOrigin,
    ) {
        debug!("Registering variable {} at {} ({})", name, address, data_type);
        self.variables.insert(
            name.to_string(),
            Variable::new(name, address, data_type, origin),
        );
    }

    pub fn clear(&self) {
        self.variables.clear();
    }

    /// Record an observation; returns `false` when the name is unknown
    pub fn record_observation(&self, name: &str, value: Value) -> bool {
        match self.variables.get_mut(name) {
            Some(mut variable) => {
                variable.observe(value);
                true
            }
            None => false,
        }
    }

    pub fn get(&self, name: &str) -> Option<Variable> {
        self.variables.get(name).map(|v| v.value().clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.variables.contains_key(name)
    }

    /// Variable names, sorted for display
    pub fn list_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.variables.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn list_all(&self) -> BTreeMap<String, Variable> {
        self.variables
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }

    /// Snapshots of every variable, sorted by name, without history
    pub fn snapshots(&self) -> Vec<VariableSnapshot> {
        let mut rows: Vec<VariableSnapshot> =
            self.variables.iter().map(|e| e.value().snapshot(false)).collect();
        rows.sort_by(|a, b| a.name.cmp(&b.name));
        rows
    }

    /// Copy out what the poller needs so no map guard is held across I/O
    pub fn poll_targets(&self) -> Vec<PollTarget> {
        let mut targets: Vec<PollTarget> = self
            .variables
            .iter()
            .map(|e| {
                let v = e.value();
                PollTarget {
                    name: v.name.clone(),
                    address: v.address.clone(),
                    data_type: v.data_type,
                    origin: v.origin,
                    last_value: v.last_value.clone(),
                }
            })
            .collect();
        targets.sort_by(|a, b| a.name.cmp(&b.name));
        targets
    }

    pub fn len(&self) -> usize {
        self.variables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }
}
