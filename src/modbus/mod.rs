//! Modbus device driver
//!
//! Implements [`DeviceClient`] over Modbus TCP and RTU (serial) so the poller
//! can talk to real hardware.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio_modbus::prelude::*;
use tokio_serial::SerialPortBuilderExt;
use tracing::{debug, info};

use crate::device::{DeviceClient, DeviceSession};
use crate::error::DeviceError;
use crate::registry::{DataType, Value};

pub mod client;
pub mod reader;

use client::{Endpoint, ModbusError};
use reader::{Location, Table};

/// Opens Modbus sessions from `tcp://` or `rtu://` connection strings
#[derive(Debug, Default, Clone)]
pub struct ModbusDeviceClient;

impl ModbusDeviceClient {
    pub fn new() -> Self {
        Self
    }
}

async fn open_context(endpoint: &Endpoint) -> Result<client::Context, ModbusError> {
    match endpoint {
        Endpoint::Tcp {
            host,
            port,
            unit_id,
        } => {
            let addr = tokio::net::lookup_host((host.as_str(), *port))
                .await?
                .next()
                .ok_or_else(|| ModbusError::InvalidEndpoint(format!("{} did not resolve", host)))?;

            info!("Connecting to Modbus TCP: {} (unit {})", addr, unit_id);

            let ctx = tcp::connect_slave(addr, Slave(*unit_id)).await?;
            Ok(client::Context::new(ctx))
        }
        Endpoint::Rtu {
            port,
            baud_rate,
            data_bits,
            stop_bits,
            parity,
            unit_id,
        } => {
            let parity = client::parse_parity(parity);
            let stop_bits = client::parse_stop_bits(*stop_bits);
            let data_bits = client::parse_data_bits(*data_bits);

            let serial = tokio_serial::new(port, *baud_rate)
                .parity(parity)
                .stop_bits(stop_bits)
                .data_bits(data_bits)
                .open_native_async()
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;

            info!(
                "Serial port {} opened: {} baud, {:?} data bits, {:?} parity, {:?} stop bits",
                port, baud_rate, data_bits, parity, stop_bits
            );

            let ctx = rtu::attach_slave(serial, Slave(*unit_id));
            Ok(client::Context::new(ctx))
        }
    }
}

#[async_trait]
impl DeviceClient for ModbusDeviceClient {
    async fn open(&self, connection_string: &str) -> Result<Box<dyn DeviceSession>, DeviceError> {
        let endpoint = Endpoint::parse(connection_string)
            .map_err(|e| DeviceError::Connection(e.to_string()))?;

        let context = open_context(&endpoint)
            .await
            .map_err(|e| DeviceError::Connection(format!("{}: {}", endpoint, e)))?;

        info!("Modbus client ready: {}", endpoint);

        Ok(Box::new(ModbusSession {
            endpoint,
            context,
            locations: LocationCache::default(),
        }))
    }
}

/// Parsed addresses keyed by address string.
///
/// This is the only per-request state the driver keeps. Evicting an entry
/// does not repair a broken transport; that takes a reconnect.
#[derive(Debug, Default)]
struct LocationCache {
    entries: HashMap<String, Location>,
}

impl LocationCache {
    fn resolve(&mut self, address: &str) -> Result<Location, DeviceError> {
        if let Some(location) = self.entries.get(address) {
            return Ok(*location);
        }
        let location = reader::parse_address(address).map_err(|e| DeviceError::read(address, e))?;
        self.entries.insert(address.to_string(), location);
        Ok(location)
    }

    fn evict(&mut self, address: &str) -> bool {
        self.entries.remove(address).is_some()
    }
}

/// One open Modbus connection with its parsed-address cache
pub struct ModbusSession {
    endpoint: Endpoint,
    context: client::Context,
    locations: LocationCache,
}

#[async_trait]
impl DeviceSession for ModbusSession {
    async fn read(&mut self, address: &str, data_type: DataType) -> Result<Value, DeviceError> {
        let location = self.locations.resolve(address)?;
        let read_err = |e: ModbusError| DeviceError::read(address, e);

        let value = match location.table {
            Table::Holding | Table::Input => {
                let count = reader::register_count(data_type);
                debug!(
                    "Reading {} {:?} registers from {} ({})",
                    count, location.table, location.offset, self.endpoint
                );
                let raw = if location.table == Table::Holding {
                    self.context
                        .read_holding_registers(location.offset, count)
                        .await
                } else {
                    self.context.read_input_registers(location.offset, count).await
                }
                .map_err(read_err)?;
                reader::decode_registers(&raw, data_type)
            }
            Table::Coil | Table::Discrete => {
                if data_type != DataType::Bool {
                    return Err(DeviceError::read(
                        address,
                        format!("{} is not readable from a bit table", data_type),
                    ));
                }
                let bits = if location.table == Table::Coil {
                    self.context.read_coils(location.offset, 1).await
                } else {
                    self.context.read_discrete_inputs(location.offset, 1).await
                }
                .map_err(read_err)?;
                reader::decode_bits(&bits, data_type)
            }
        };

        value.ok_or_else(|| DeviceError::read(address, "short response"))
    }

    /// Drops the parsed address only; the transport is left as is
    fn reset_request(&mut self, address: &str) {
        if self.locations.evict(address) {
            debug!("Reset request for {} ({})", address, self.endpoint);
        }
    }

    async fn close(&mut self) -> Result<(), DeviceError> {
        info!("Closing Modbus session: {}", self.endpoint);
        self.context
            .disconnect()
            .await
            .map_err(|e| DeviceError::Unexpected(e.to_string()))
    }
}
