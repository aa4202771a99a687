//! Error types for the biosensor interface

use thiserror::Error;

#[cfg(feature = "ftdi")]
use crate::ffi::{status_to_string, FT_STATUS};

/// Failure of a single bus transaction
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    /// Device did not acknowledge its address or a data byte
    #[error("Device 0x{device:02X} did not acknowledge")]
    Nack { device: u8 },

    /// Bus-level fault (arbitration loss, bus error, overrun, ...)
    #[error("I2C bus error: {0}")]
    Bus(String),

    /// Transaction did not complete within the requested timeout
    #[error("Timed out accessing register 0x{register:02X} on device 0x{device:02X}")]
    Timeout { device: u8, register: u8 },

    /// Fewer bytes came back than were requested
    #[error("Short read: expected {expected} bytes, got {actual}")]
    ShortRead { expected: usize, actual: usize },

    /// FTDI driver error
    #[cfg(feature = "ftdi")]
    #[error("FTDI error: {status} ({description})")]
    Ftdi {
        status: FT_STATUS,
        description: String,
    },
}

#[cfg(feature = "ftdi")]
impl From<FT_STATUS> for TransportError {
    fn from(status: FT_STATUS) -> Self {
        TransportError::Ftdi {
            status,
            description: status_to_string(status).to_string(),
        }
    }
}

/// Error type for driver and acquisition operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SensorError {
    /// Bus transaction failed
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Part ID register did not match the expected chip
    #[error("Invalid part ID: expected 0x{expected:02X}, got 0x{found:02X}")]
    DeviceIdentity { expected: u8, found: u8 },

    /// Invalid parameter
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// No I2C channels found
    #[error("No I2C channels found")]
    NoChannelsFound,

    /// Invalid channel index
    #[error("Invalid channel index: {0}")]
    InvalidChannel(u32),
}

/// Result type for driver operations
pub type Result<T> = std::result::Result<T, SensorError>;
