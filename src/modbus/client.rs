//! Modbus transport context and connection-string parsing
//!
//! Supports both TCP and RTU (serial) connections

use std::collections::HashMap;
use std::fmt;

use tokio_modbus::prelude::*;
use tokio_modbus::Exception;
use tracing::warn;

/// Error type for Modbus operations
#[derive(Debug, thiserror::Error)]
pub enum ModbusError {
    #[error("Modbus exception: {0:?}")]
    Exception(Exception),
    #[error("Transport error: {0}")]
    Transport(#[from] tokio_modbus::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid connection string: {0}")]
    InvalidEndpoint(String),
}

/// Where and how to reach a Modbus device
#[derive(Debug, Clone, PartialEq)]
pub enum Endpoint {
    Tcp {
        host: String,
        port: u16,
        unit_id: u8,
    },
    Rtu {
        port: String,
        baud_rate: u32,
        data_bits: u8,
        stop_bits: u8,
        parity: String,
        unit_id: u8,
    },
}

impl Endpoint {
    /// Parse `tcp://host[:port][?unit=N]` or `rtu://<device>[?baud=..&parity=..&data_bits=..&stop_bits=..&unit=..]`
    pub fn parse(connection_string: &str) -> Result<Self, ModbusError> {
        let invalid = |reason: &str| {
            ModbusError::InvalidEndpoint(format!("{} ({})", connection_string, reason))
        };

        let (scheme, rest) = connection_string
            .split_once("://")
            .ok_or_else(|| invalid("missing scheme"))?;
        let (target, query) = match rest.split_once('?') {
            Some((target, query)) => (target, parse_query(query)),
            None => (rest, HashMap::new()),
        };

        let number = |key: &str, default: u32| -> Result<u32, ModbusError> {
            match query.get(key) {
                Some(raw) => raw
                    .parse()
                    .map_err(|_| invalid(&format!("bad value for '{}'", key))),
                None => Ok(default),
            }
        };
        let unit_id = u8::try_from(number("unit", 1)?).map_err(|_| invalid("unit out of range"))?;

        match scheme.to_lowercase().as_str() {
            "tcp" | "modbus+tcp" => {
                let (host, port) = match target.rsplit_once(':') {
                    Some((host, port)) => (
                        host,
                        port.parse::<u16>().map_err(|_| invalid("bad port"))?,
                    ),
                    None => (target, 502),
                };
                if host.is_empty() {
                    return Err(invalid("missing host"));
                }
                Ok(Endpoint::Tcp {
                    host: host.to_string(),
                    port,
                    unit_id,
                })
            }
            "rtu" | "modbus+rtu" => {
                if target.is_empty() {
                    return Err(invalid("missing serial port"));
                }
                Ok(Endpoint::Rtu {
                    port: target.to_string(),
                    baud_rate: number("baud", 9600)?,
                    data_bits: u8::try_from(number("data_bits", 8)?)
                        .map_err(|_| invalid("data_bits out of range"))?,
                    stop_bits: u8::try_from(number("stop_bits", 1)?)
                        .map_err(|_| invalid("stop_bits out of range"))?,
                    parity: query
                        .get("parity")
                        .cloned()
                        .unwrap_or_else(|| "none".to_string()),
                    unit_id,
                })
            }
            other => Err(invalid(&format!("unsupported scheme '{}'", other))),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Tcp {
                host,
                port,
                unit_id,
            } => write!(f, "TCP {}:{} (unit {})", host, port, unit_id),
            Endpoint::Rtu {
                port,
                baud_rate,
                unit_id,
                ..
            } => write!(f, "RTU {} @ {} baud (unit {})", port, baud_rate, unit_id),
        }
    }
}

fn parse_query(query: &str) -> HashMap<String, String> {
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .map(|(k, v)| (k.to_lowercase(), v.to_string()))
        .collect()
}

pub(crate) fn parse_parity(parity: &str) -> tokio_serial::Parity {
    match parity.to_lowercase().as_str() {
        "none" => tokio_serial::Parity::None,
        "even" => tokio_serial::Parity::Even,
        "odd" => tokio_serial::Parity::Odd,
        _ => {
            warn!("Unknown parity '{}', using None", parity);
            tokio_serial::Parity::None
        }
    }
}

pub(crate) fn parse_stop_bits(stop_bits: u8) -> tokio_serial::StopBits {
    match stop_bits {
        1 => tokio_serial::StopBits::One,
        2 => tokio_serial::StopBits::Two,
        _ => {
            warn!("Unknown stop bits {}, using 1", stop_bits);
            tokio_serial::StopBits::One
        }
    }
}

pub(crate) fn parse_data_bits(data_bits: u8) -> tokio_serial::DataBits {
    match data_bits {
        5 => tokio_serial::DataBits::Five,
        6 => tokio_serial::DataBits::Six,
        7 => tokio_serial::DataBits::Seven,
        8 => tokio_serial::DataBits::Eight,
        _ => {
            warn!("Unknown data bits {}, using 8", data_bits);
            tokio_serial::DataBits::Eight
        }
    }
}

/// Client context for either transport
pub struct Context {
    inner: tokio_modbus::client::Context,
}

impl Context {
    pub fn new(inner: tokio_modbus::client::Context) -> Self {
        Self { inner }
    }

    pub async fn read_holding_registers(
        &mut self,
        addr: u16,
        cnt: u16,
    ) -> Result<Vec<u16>, ModbusError> {
        let result = self.inner.read_holding_registers(addr, cnt).await?;
        result.map_err(ModbusError::Exception)
    }

    pub async fn read_input_registers(
        &mut self,
        addr: u16,
        cnt: u16,
    ) -> Result<Vec<u16>, ModbusError> {
        let result = self.inner.read_input_registers(addr, cnt).await?;
        result.map_err(ModbusError::Exception)
    }

    pub async fn read_coils(&mut self, addr: u16, cnt: u16) -> Result<Vec<bool>, ModbusError> {
        let result = self.inner.read_coils(addr, cnt).await?;
        result.map_err(ModbusError::Exception)
    }

    pub async fn read_discrete_inputs(
        &mut self,
        addr: u16,
        cnt: u16,
    ) -> Result<Vec<bool>, ModbusError> {
        let result = self.inner.read_discrete_inputs(addr, cnt).await?;
        result.map_err(ModbusError::Exception)
    }

    pub async fn disconnect(&mut self) -> Result<(), ModbusError> {
        close_result(self.inner.disconnect().await)
    }
}

/// Flatten transport and exception failures of a disconnect
fn close_result(result: tokio_modbus::Result<()>) -> Result<(), ModbusError> {
    result?.map_err(ModbusError::Exception)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tcp_endpoint() {
        let endpoint = Endpoint::parse("tcp://192.168.1.100:1502?unit=3").unwrap();
        assert_eq!(
            endpoint,
            Endpoint::Tcp {
                host: "192.168.1.100".to_string(),
                port: 1502,
                unit_id: 3,
            }
        );
        assert_eq!(endpoint.to_string(), "TCP 192.168.1.100:1502 (unit 3)");
    }

    #[test]
    fn test_tcp_endpoint_defaults() {
        let endpoint = Endpoint::parse("tcp://plc.local").unwrap();
        assert_eq!(
            endpoint,
            Endpoint::Tcp {
                host: "plc.local".to_string(),
                port: 502,
                unit_id: 1,
            }
        );
    }

    #[test]
    fn test_rtu_endpoint() {
        let endpoint =
            Endpoint::parse("rtu:///dev/ttyUSB0?baud=19200&parity=even&stop_bits=2&unit=7")
                .unwrap();
        assert_eq!(
            endpoint,
            Endpoint::Rtu {
                port: "/dev/ttyUSB0".to_string(),
                baud_rate: 19200,
                data_bits: 8,
                stop_bits: 2,
                parity: "even".to_string(),
                unit_id: 7,
            }
        );
    }

    #[test]
    fn test_rejected_endpoints() {
        assert!(Endpoint::parse("s7://192.168.2.12:102").is_err());
        assert!(Endpoint::parse("192.168.2.12:502").is_err());
        assert!(Endpoint::parse("tcp://:502").is_err());
        assert!(Endpoint::parse("tcp://host:notaport").is_err());
        assert!(Endpoint::parse("tcp://host?unit=300").is_err());
        assert!(Endpoint::parse("rtu://").is_err());
    }

    #[test]
    fn test_parity_parsing() {
        let test_cases = vec![
            ("none", tokio_serial::Parity::None),
            ("even", tokio_serial::Parity::Even),
            ("odd", tokio_serial::Parity::Odd),
            ("NONE", tokio_serial::Parity::None), // case insensitive
            ("Even", tokio_serial::Parity::Even),
            ("invalid", tokio_serial::Parity::None), // fallback
        ];

        for (input, expected) in test_cases {
            assert_eq!(parse_parity(input), expected, "Failed for input: {}", input);
        }
    }

    #[test]
    fn test_serial_framing_fallbacks() {
        assert_eq!(parse_stop_bits(2), tokio_serial::StopBits::Two);
        assert_eq!(parse_stop_bits(9), tokio_serial::StopBits::One);
        assert_eq!(parse_data_bits(7), tokio_serial::DataBits::Seven);
        assert_eq!(parse_data_bits(0), tokio_serial::DataBits::Eight);
    }

    #[test]
    fn test_close_result_keeps_exception() {
        assert!(close_result(Ok(Ok(()))).is_ok());

        let err = close_result(Ok(Err(Exception::ServerDeviceFailure))).unwrap_err();
        assert!(matches!(
            err,
            ModbusError::Exception(Exception::ServerDeviceFailure)
        ));
    }
}
