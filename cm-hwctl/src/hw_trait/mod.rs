//! Hardware abstraction layer traits.
//!
//! Chip drivers in this crate are written against the [`I2c`] trait and never
//! against a concrete link. Whatever carries bytes to the board (the MCU
//! control link in production, [`crate::sim`] in tests) implements it once per
//! physical bus.

pub mod i2c;

pub use i2c::{I2c, I2cError};

use crate::bus::MuxState;

/// Common error type for hardware operations
#[derive(Debug, thiserror::Error)]
pub enum HwError {
    /// I/O error from underlying transport
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Register, length, channel or page outside the chip's valid range.
    /// Always raised before anything is put on the bus.
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Bus-level failure reported by the transport
    #[error(transparent)]
    I2c(#[from] I2cError),

    /// Device answered with a different byte count than requested
    #[error("Protocol mismatch: expected {expected} bytes, received {received}")]
    ProtocolMismatch { expected: usize, received: usize },

    /// Device returned a value its register cannot hold
    #[error("Unexpected value: {0}")]
    UnexpectedValue(String),

    /// Device data failed its integrity check
    #[error("Checksum mismatch: computed 0x{expected:02x}, device sent 0x{received:02x}")]
    Checksum { expected: u8, received: u8 },

    /// The mux in front of a routed device is not on the device's channel
    #[error("Mux 0x{mux:02x} is {actual}, device needs channel {expected}")]
    StaleRoute {
        mux: u8,
        expected: u8,
        actual: MuxState,
    },

    /// Timeout waiting for hardware response
    #[error("Hardware timeout")]
    Timeout,

    /// Other hardware-specific error
    #[error("Hardware error: {0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, HwError>;
