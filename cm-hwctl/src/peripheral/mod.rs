//! Chip drivers.
//!
//! Each driver wraps a [`crate::device::Device`] and gives the bytes meaning.
//! All are generic over the [`crate::hw_trait::I2c`] transport.

pub mod ds28cm00;
pub mod firefly;
pub mod ltc2977;
pub mod ltm47xx;
pub mod mcp9808;
pub mod mcp9903;
pub mod pca9547;
pub mod pmbus;
pub mod si53xx;
pub mod tca6424a;
