//! I2C hardware abstraction trait.

use async_trait::async_trait;

use super::Result;

/// I2C-specific errors
#[derive(Debug, thiserror::Error)]
pub enum I2cError {
    /// No acknowledgment from device
    #[error("No acknowledgment from device at address 0x{0:02x}")]
    NoAck(u8),

    /// Fewer bytes came back than were clocked for
    #[error("Short read from 0x{addr:02x}: expected {expected} bytes, got {received}")]
    ShortRead {
        addr: u8,
        expected: usize,
        received: usize,
    },

    /// Bus arbitration lost
    #[error("Bus arbitration lost")]
    ArbitrationLost,

    /// Bus error
    #[error("Bus error")]
    BusError,

    /// Failure of the link carrying the bus, e.g. the MCU control channel
    #[error("Link failure: {0}")]
    Link(String),
}

/// One physical I2C bus.
///
/// Implementations must fill `buffer`/`read` completely or fail; a device that
/// stops early is reported as [`I2cError::ShortRead`].
#[async_trait]
pub trait I2c: Send + Sync {
    /// Write data to an I2C device.
    async fn write(&mut self, addr: u8, data: &[u8]) -> Result<()>;

    /// Read data from an I2C device.
    async fn read(&mut self, addr: u8, buffer: &mut [u8]) -> Result<()>;

    /// Write data then read from an I2C device (repeated start).
    async fn write_read(&mut self, addr: u8, write: &[u8], read: &mut [u8]) -> Result<()>;
}
