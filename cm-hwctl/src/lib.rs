//! I2C transaction and register layer for the command module board.
//!
//! The board hangs its management chips off ten I2C buses, many of them
//! behind PCA9547 multiplexers. This crate turns raw bus access into typed
//! operations on those chips:
//!
//! - [`bus`]: one shared, serialized handle per physical bus, including the
//!   selection state of every mux on it
//! - [`device`]: validated single-attempt register access with error
//!   counting and structured tracing
//! - [`peripheral`]: per-family drivers (power managers, regulators, temperature
//!   sensors, I/O expander, muxes, clock generators, optics, serial number)
//! - [`regmap`]: ClockBuilder Pro register map parsing
//! - [`topology`]: which chip sits on which bus, address and mux channel
//!
//! The transport is supplied by the caller through [`hw_trait::I2c`].

pub mod bus;
pub mod device;
pub mod error;
pub mod hw_trait;
pub mod peripheral;
pub mod regmap;
pub mod topology;
pub mod tracing;

#[cfg(test)]
mod sim;

pub use error::{Error, ErrorKind, Result};
