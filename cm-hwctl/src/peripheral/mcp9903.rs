//! MCP9903 remote diode temperature sensor driver.
//!
//! The chip measures its own die and two external diodes. Each temperature is
//! split over a high byte of whole degrees and a low byte whose top three bits
//! are eighths of a degree; reading the high byte latches the low byte. In
//! the default range the high byte is plain binary from 0 °C. The extended
//! range, selected by the RANGE bit of the configuration register, offsets
//! it by 64 so that -64 °C reads as zero.
//!
//! The configuration register is read and written at different addresses.
//!
//! Datasheet: <https://www.microchip.com/en-us/product/MCP9903>

use std::fmt;

use crate::{
    bus::SharedBus,
    device::{AccessLimits, Device, Endpoint},
    error::Result,
    hw_trait::I2c,
    tracing::prelude::*,
};

pub mod protocol {
    pub const EXPECTED_MFG_ID: u8 = 0x5D;

    pub mod regs {
        pub const INTERNAL_HIGH: u8 = 0x00;
        pub const EXTERNAL_1_HIGH: u8 = 0x01;
        pub const STATUS: u8 = 0x02;
        pub const CONFIG_READ: u8 = 0x03;
        pub const CONFIG_WRITE: u8 = 0x09;
        pub const EXTERNAL_1_LOW: u8 = 0x10;
        pub const EXTERNAL_2_HIGH: u8 = 0x23;
        pub const EXTERNAL_2_LOW: u8 = 0x24;
        pub const INTERNAL_LOW: u8 = 0x29;
        pub const PRODUCT_ID: u8 = 0xFD;
        pub const MFG_ID: u8 = 0xFE;
        pub const REVISION: u8 = 0xFF;
    }

    pub mod config {
        /// Extended range: -64 °C to 191 °C.
        pub const RANGE: u8 = 0x04;
    }

    pub fn register_name(reg: u8) -> &'static str {
        match reg {
            regs::INTERNAL_HIGH => "internal diode high byte",
            regs::EXTERNAL_1_HIGH => "external diode 1 high byte",
            regs::STATUS => "status",
            regs::CONFIG_READ | regs::CONFIG_WRITE => "configuration",
            regs::EXTERNAL_1_LOW => "external diode 1 low byte",
            regs::EXTERNAL_2_HIGH => "external diode 2 high byte",
            regs::EXTERNAL_2_LOW => "external diode 2 low byte",
            regs::INTERNAL_LOW => "internal diode low byte",
            regs::PRODUCT_ID => "product ID",
            regs::MFG_ID => "manufacturer ID",
            regs::REVISION => "revision",
            _ => "unknown",
        }
    }

    const EXTENDED_OFFSET: f32 = 64.0;

    /// Decode a high/low byte pair in 0.125 °C steps.
    pub fn decode_temperature(high: u8, low: u8, extended: bool) -> f32 {
        let eighths = (u16::from(high) << 3) | u16::from(low >> 5);
        let celsius = eighths as f32 * 0.125;
        if extended {
            celsius - EXTENDED_OFFSET
        } else {
            celsius
        }
    }
}

/// Temperature diode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Diode {
    Internal,
    External1,
    External2,
}

impl Diode {
    fn registers(self) -> (u8, u8) {
        use protocol::regs::*;
        match self {
            Diode::Internal => (INTERNAL_HIGH, INTERNAL_LOW),
            Diode::External1 => (EXTERNAL_1_HIGH, EXTERNAL_1_LOW),
            Diode::External2 => (EXTERNAL_2_HIGH, EXTERNAL_2_LOW),
        }
    }
}

impl fmt::Display for Diode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Diode::Internal => "internal",
            Diode::External1 => "external 1",
            Diode::External2 => "external 2",
        })
    }
}

/// Identification registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Identity {
    pub product: u8,
    pub manufacturer: u8,
    pub revision: u8,
}

pub struct Mcp9903<I> {
    device: Device<I>,
    /// Whether the chip reports in the extended range, as last configured.
    extended: bool,
}

impl<I: I2c> Mcp9903<I> {
    pub fn new(name: impl Into<String>, bus: SharedBus<I>, endpoint: Endpoint) -> Self {
        let limits = AccessLimits::new(0x00..=0xFF, 1..=1);
        Self {
            device: Device::new(name, bus, endpoint, limits, protocol::register_name),
            extended: false,
        }
    }

    pub fn device(&self) -> &Device<I> {
        &self.device
    }

    async fn read_byte(&mut self, reg: u8) -> Result<u8> {
        Ok(self.device.read(reg, 1).await?[0])
    }

    pub async fn read_config(&mut self) -> Result<u8> {
        let config = self.read_byte(protocol::regs::CONFIG_READ).await?;
        self.extended = config & protocol::config::RANGE != 0;
        Ok(config)
    }

    pub async fn write_config(&mut self, config: u8) -> Result<()> {
        self.device
            .write(protocol::regs::CONFIG_WRITE, &[config])
            .await?;
        self.extended = config & protocol::config::RANGE != 0;
        Ok(())
    }

    pub async fn identify(&mut self) -> Result<Identity> {
        let id = Identity {
            product: self.read_byte(protocol::regs::PRODUCT_ID).await?,
            manufacturer: self.read_byte(protocol::regs::MFG_ID).await?,
            revision: self.read_byte(protocol::regs::REVISION).await?,
        };
        if id.manufacturer != protocol::EXPECTED_MFG_ID {
            warn!(
                device = self.device.name(),
                manufacturer = format!("{:#04x}", id.manufacturer),
                "Unexpected manufacturer ID"
            );
        }
        debug!(
            device = self.device.name(),
            product = format!("{:#04x}", id.product),
            revision = format!("{:#04x}", id.revision),
            "Sensor identified"
        );
        Ok(id)
    }

    /// Temperature of `diode` in °C.
    pub async fn read_temperature(&mut self, diode: Diode) -> Result<f32> {
        let (high_reg, low_reg) = diode.registers();
        let high = self.read_byte(high_reg).await?;
        let low = self.read_byte(low_reg).await?;
        Ok(protocol::decode_temperature(high, low, self.extended))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::BusId;
    use crate::sim::{Call, SimBus};
    use test_case::test_case;

    const ADDR: u8 = 0x5c;

    fn sensor(sim: &SimBus) -> Mcp9903<SimBus> {
        sim.add_bytes(ADDR, None, 0xFF);
        let bus = SharedBus::new(BusId::new(4), sim.clone());
        Mcp9903::new("IC39", bus, Endpoint::new(ADDR).unwrap())
    }

    #[test_case(0x19, 0x60, false, 25.375; "default range")]
    #[test_case(0x00, 0x00, false, 0.0; "default range floor")]
    #[test_case(0x59, 0x20, true, 25.125; "extended range")]
    #[test_case(0x00, 0x00, true, -64.0; "extended range floor")]
    #[test_case(0xFF, 0xE0, true, 191.875; "extended range ceiling")]
    fn decodes_high_and_low_bytes(high: u8, low: u8, extended: bool, expected: f32) {
        assert_eq!(protocol::decode_temperature(high, low, extended), expected);
    }

    #[tokio::test]
    async fn reads_all_three_diodes() {
        let sim = SimBus::new();
        let mut temp = sensor(&sim);
        sim.set(ADDR, None, 0, 0x00, &[0x1E]);
        sim.set(ADDR, None, 0, 0x29, &[0x80]);
        sim.set(ADDR, None, 0, 0x01, &[0x37]);
        sim.set(ADDR, None, 0, 0x10, &[0x20]);
        sim.set(ADDR, None, 0, 0x23, &[0x41]);
        sim.set(ADDR, None, 0, 0x24, &[0xE0]);

        assert_eq!(temp.read_temperature(Diode::Internal).await.unwrap(), 30.5);
        assert_eq!(temp.read_temperature(Diode::External1).await.unwrap(), 55.125);
        assert_eq!(temp.read_temperature(Diode::External2).await.unwrap(), 65.875);
        assert_eq!(
            sim.calls()[..2],
            [
                Call::WriteRead {
                    addr: ADDR,
                    write: vec![0x00],
                    len: 1
                },
                Call::WriteRead {
                    addr: ADDR,
                    write: vec![0x29],
                    len: 1
                },
            ]
        );
    }

    #[tokio::test]
    async fn config_is_written_at_its_write_address() {
        let sim = SimBus::new();
        let mut temp = sensor(&sim);

        temp.write_config(protocol::config::RANGE).await.unwrap();

        assert_eq!(sim.writes(), vec![(ADDR, vec![0x09, 0x04])]);
        assert_eq!(temp.read_temperature(Diode::Internal).await.unwrap(), -64.0);

        // The chip reports the default range again.
        sim.set(ADDR, None, 0, 0x03, &[0x00]);
        assert_eq!(temp.read_config().await.unwrap(), 0x00);
        assert_eq!(temp.read_temperature(Diode::Internal).await.unwrap(), 0.0);
    }

    #[tokio::test]
    async fn identifies() {
        let sim = SimBus::new();
        let mut temp = sensor(&sim);
        sim.set(ADDR, None, 0, 0xFD, &[0x21, 0x5D, 0x01]);

        let id = temp.identify().await.unwrap();

        assert_eq!(
            id,
            Identity {
                product: 0x21,
                manufacturer: 0x5D,
                revision: 0x01
            }
        );
    }
}
