//! PLC polling gateway
//!
//! Polls device variables at a fixed rate, caches the latest values with
//! history and statistics, and falls back to simulated data when no device is
//! reachable. State is served over HTTP, a websocket feed and optionally MQTT.

pub mod api;
pub mod config;
pub mod device;
pub mod error;
pub mod modbus;
pub mod mqtt;
pub mod registry;
pub mod scheduler;
pub mod service;
pub mod simulation;
pub mod telemetry;
