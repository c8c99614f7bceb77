//! Device driver seam
//!
//! The poller only knows how to open a session from a connection string and
//! read a typed value from an opaque address. Wire protocols live behind
//! these traits.

use async_trait::async_trait;

use crate::error::DeviceError;
use crate::registry::{DataType, Value};

/// Factory for device sessions
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DeviceClient: Send + Sync {
    /// Establish a session to the device named by `connection_string`
    async fn open(&self, connection_string: &str) -> Result<Box<dyn DeviceSession>, DeviceError>;
}

/// A live connection to one device
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DeviceSession: Send {
    /// Read the value at `address`, interpreted as `data_type`
    async fn read(&mut self, address: &str, data_type: DataType) -> Result<Value, DeviceError>;

    /// Drop any cached request for `address` so the next read rebuilds it
    fn reset_request(&mut self, address: &str);

    /// Tear the session down
    async fn close(&mut self) -> Result<(), DeviceError>;
}
