//! DS28CM00 silicon serial number driver.
//!
//! The chip holds a read-only 64-bit ROM: family code 0x70, a 48-bit serial
//! number sent least significant byte first, and a CRC-8/MAXIM over the
//! first seven bytes. It identifies the board in logs and inventories.
//!
//! Datasheet: <https://www.analog.com/en/products/ds28cm00.html>

use std::fmt;

use crc_all::CrcAlgo;

use crate::{
    bus::SharedBus,
    device::{AccessLimits, Device, Endpoint, Op},
    error::Result,
    hw_trait::{HwError, I2c},
    tracing::prelude::*,
};

pub mod protocol {
    pub const FAMILY_CODE: u8 = 0x70;
    pub const ROM_LEN: usize = 8;

    pub mod regs {
        pub const FAMILY: u8 = 0x00;
        pub const SERIAL: u8 = 0x01;
        pub const CRC: u8 = 0x07;
        pub const CONTROL: u8 = 0x08;
    }

    pub fn register_name(reg: u8) -> &'static str {
        match reg {
            regs::FAMILY => "family code",
            0x01..=0x06 => "serial number",
            regs::CRC => "CRC",
            regs::CONTROL => "control",
            _ => "reserved",
        }
    }
}

const CRC8_MAXIM: CrcAlgo<u8> = CrcAlgo::<u8>::new(
    0x31, // polynomial
    8,    // width
    0,    // init
    0,    // xorout
    true, // reflect
);

/// CRC-8/MAXIM (Dallas 1-Wire) over `data`.
pub fn crc8(data: &[u8]) -> u8 {
    let mut crc = 0;
    CRC8_MAXIM.update_crc(&mut crc, data);
    CRC8_MAXIM.finish_crc(&crc)
}

/// Validated contents of the ROM.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SerialNumber {
    pub family: u8,
    /// 48-bit serial number.
    pub serial: u64,
    pub crc: u8,
}

impl SerialNumber {
    /// Decode a ROM image, checking its CRC.
    pub fn from_rom(rom: &[u8; protocol::ROM_LEN]) -> std::result::Result<Self, HwError> {
        let computed = crc8(&rom[..7]);
        if computed != rom[7] {
            return Err(HwError::Checksum {
                expected: computed,
                received: rom[7],
            });
        }
        let mut serial = [0u8; 8];
        serial[..6].copy_from_slice(&rom[1..7]);
        Ok(Self {
            family: rom[0],
            serial: u64::from_le_bytes(serial),
            crc: rom[7],
        })
    }
}

impl fmt::Display for SerialNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02x}-{:012x}", self.family, self.serial)
    }
}

pub struct Ds28cm00<I> {
    device: Device<I>,
}

impl<I: I2c> Ds28cm00<I> {
    pub fn new(name: impl Into<String>, bus: SharedBus<I>, endpoint: Endpoint) -> Self {
        let limits = AccessLimits::new(0x00..=protocol::regs::CONTROL, 1..=protocol::ROM_LEN);
        Self {
            device: Device::new(name, bus, endpoint, limits, protocol::register_name),
        }
    }

    pub fn device(&self) -> &Device<I> {
        &self.device
    }

    /// Read and validate the ROM.
    pub async fn read_serial(&mut self) -> Result<SerialNumber> {
        let data = self
            .device
            .read(protocol::regs::FAMILY, protocol::ROM_LEN)
            .await?;
        let mut rom = [0u8; protocol::ROM_LEN];
        rom.copy_from_slice(&data);

        let id = match SerialNumber::from_rom(&rom) {
            Ok(id) => id,
            Err(e) => {
                return Err(self
                    .device
                    .fail(Op::Read, Some(protocol::regs::FAMILY), &rom, e)
                    .into());
            }
        };

        if id.family != protocol::FAMILY_CODE {
            warn!(
                device = self.device.name(),
                family = format!("{:#04x}", id.family),
                "Unexpected family code"
            );
        }
        debug!(device = self.device.name(), serial = %id, "Serial number read");
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::BusId;
    use crate::error::ErrorKind;
    use crate::sim::SimBus;
    use test_case::test_case;

    const ADDR: u8 = 0x50;

    #[test_case(b"123456789", 0xA1; "catalogue check value")]
    #[test_case(&[0x02, 0x1C, 0xB8, 0x01, 0x00, 0x00, 0x00], 0xA2; "maxim application note rom")]
    fn crc8_matches_reference(data: &[u8], expected: u8) {
        assert_eq!(crc8(data), expected);
    }

    fn rom(serial: u64) -> [u8; 8] {
        let mut rom = [0u8; 8];
        rom[0] = protocol::FAMILY_CODE;
        rom[1..7].copy_from_slice(&serial.to_le_bytes()[..6]);
        rom[7] = crc8(&rom[..7]);
        rom
    }

    fn eeprom(sim: &SimBus) -> Ds28cm00<SimBus> {
        sim.add_bytes(ADDR, None, 0xFF);
        let bus = SharedBus::new(BusId::new(0), sim.clone());
        Ds28cm00::new("IC3", bus, Endpoint::new(ADDR).unwrap())
    }

    #[tokio::test]
    async fn reads_serial_number() {
        let sim = SimBus::new();
        let mut id = eeprom(&sim);
        sim.set(ADDR, None, 0, 0x00, &rom(0x0000_1234_5678));

        let serial = id.read_serial().await.unwrap();

        assert_eq!(serial.family, 0x70);
        assert_eq!(serial.serial, 0x0000_1234_5678);
        assert_eq!(serial.to_string(), "70-000012345678");
    }

    #[tokio::test]
    async fn corrupted_rom_is_a_protocol_mismatch() {
        let sim = SimBus::new();
        let mut id = eeprom(&sim);
        let mut bad = rom(0xABCDEF);
        bad[3] ^= 0x01;
        sim.set(ADDR, None, 0, 0x00, &bad);

        let err = id.read_serial().await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::ProtocolMismatch);
        assert_eq!(id.device().error_count(), 1);
    }
}
