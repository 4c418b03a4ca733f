//! TCA6424A 24-bit I2C I/O expander driver.
//!
//! Three 8-bit ports, each with four registers grouped by bank: input
//! levels, output latches, polarity inversion and direction (1 = input).
//! The command byte is `bank + port`; setting bit 7 makes the pointer
//! auto-increment so all three ports of a bank move in one transfer, port 0
//! first.
//!
//! Datasheet: <https://www.ti.com/lit/ds/symlink/tca6424a.pdf>

use crate::{
    bus::SharedBus,
    device::{AccessLimits, Device, Endpoint, Op},
    error::Result,
    hw_trait::I2c,
};

pub mod protocol {
    /// Command bit selecting auto-increment.
    pub const AUTO_INCREMENT: u8 = 0x80;

    pub const PORTS: u8 = 3;

    /// Largest value a whole bank can hold.
    pub const BANK_MAX: u32 = 0x00FF_FFFF;

    pub fn register_name(command: u8) -> &'static str {
        match command & 0x7F {
            0x00..=0x02 => "input",
            0x04..=0x06 => "output",
            0x08..=0x0A => "polarity inversion",
            0x0C..=0x0E => "configuration",
            _ => "reserved",
        }
    }
}

/// Register bank; the discriminant is the command byte of port 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Bank {
    Input = 0x00,
    Output = 0x04,
    Polarity = 0x08,
    Config = 0x0C,
}

pub struct Tca6424a<I> {
    device: Device<I>,
}

impl<I: I2c> Tca6424a<I> {
    pub fn new(name: impl Into<String>, bus: SharedBus<I>, endpoint: Endpoint) -> Self {
        let limits = AccessLimits::new(0x00..=0x8E, 1..=3);
        Self {
            device: Device::new(name, bus, endpoint, limits, protocol::register_name),
        }
    }

    pub fn device(&self) -> &Device<I> {
        &self.device
    }

    /// Register of one port.
    pub async fn read_port(&mut self, bank: Bank, port: u8) -> Result<u8> {
        let command = self.port_command(Op::Read, bank, port, &[])?;
        Ok(self.device.read(command, 1).await?[0])
    }

    /// Set one port's register. The input bank is read-only.
    pub async fn write_port(&mut self, bank: Bank, port: u8, value: u8) -> Result<()> {
        let command = self.port_command(Op::Write, bank, port, &[value])?;
        if bank == Bank::Input {
            return Err(self
                .device
                .reject(Op::Write, Some(command), &[value], "input ports are read-only")
                .into());
        }
        Ok(self.device.write(command, &[value]).await?)
    }

    /// All three ports of a bank as one value, port 0 in the low byte.
    pub async fn read_bank(&mut self, bank: Bank) -> Result<u32> {
        let command = protocol::AUTO_INCREMENT | bank as u8;
        let data = self.device.read(command, protocol::PORTS as usize).await?;
        Ok(u32::from_le_bytes([data[0], data[1], data[2], 0]))
    }

    /// Write all three ports of a bank, port 0 from the low byte.
    pub async fn write_bank(&mut self, bank: Bank, value: u32) -> Result<()> {
        let command = protocol::AUTO_INCREMENT | bank as u8;
        let bytes = value.to_le_bytes();
        if bank == Bank::Input || value > protocol::BANK_MAX {
            let reason = if bank == Bank::Input {
                "input ports are read-only".to_string()
            } else {
                format!("0x{:x} does not fit in 24 bits", value)
            };
            return Err(self
                .device
                .reject(Op::Write, Some(command), &bytes, reason)
                .into());
        }
        Ok(self.device.write(command, &bytes[..3]).await?)
    }

    pub async fn read_inputs(&mut self) -> Result<u32> {
        self.read_bank(Bank::Input).await
    }

    pub async fn read_outputs(&mut self) -> Result<u32> {
        self.read_bank(Bank::Output).await
    }

    pub async fn write_outputs(&mut self, value: u32) -> Result<()> {
        self.write_bank(Bank::Output, value).await
    }

    /// Direction of every pin; a set bit makes the pin an input.
    pub async fn write_config(&mut self, value: u32) -> Result<()> {
        self.write_bank(Bank::Config, value).await
    }

    pub async fn read_config(&mut self) -> Result<u32> {
        self.read_bank(Bank::Config).await
    }

    pub async fn write_polarity(&mut self, value: u32) -> Result<()> {
        self.write_bank(Bank::Polarity, value).await
    }

    pub async fn read_polarity(&mut self) -> Result<u32> {
        self.read_bank(Bank::Polarity).await
    }

    fn port_command(&mut self, op: Op, bank: Bank, port: u8, payload: &[u8]) -> Result<u8> {
        if port >= protocol::PORTS {
            let reason = format!("port {} out of range 0..{}", port, protocol::PORTS);
            return Err(self
                .device
                .reject(op, Some(bank as u8), payload, reason)
                .into());
        }
        Ok(bank as u8 + port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::BusId;
    use crate::error::ErrorKind;
    use crate::sim::{Call, SimBus};

    const ADDR: u8 = 0x22;

    fn expander(sim: &SimBus) -> Tca6424a<SimBus> {
        sim.add_bytes(ADDR, None, 0x7F);
        let bus = SharedBus::new(BusId::new(2), sim.clone());
        Tca6424a::new("IC14", bus, Endpoint::new(ADDR).unwrap())
    }

    #[tokio::test]
    async fn bank_write_is_little_endian_with_auto_increment() {
        let sim = SimBus::new();
        let mut io = expander(&sim);

        io.write_outputs(0xABCDEF).await.unwrap();

        assert_eq!(sim.writes(), vec![(ADDR, vec![0x84, 0xEF, 0xCD, 0xAB])]);
        assert_eq!(io.read_port(Bank::Output, 0).await.unwrap(), 0xEF);
        assert_eq!(io.read_port(Bank::Output, 1).await.unwrap(), 0xCD);
        assert_eq!(io.read_port(Bank::Output, 2).await.unwrap(), 0xAB);
        assert_eq!(io.read_outputs().await.unwrap(), 0xABCDEF);
    }

    #[tokio::test]
    async fn inputs_read_from_bank_zero() {
        let sim = SimBus::new();
        let mut io = expander(&sim);
        sim.set(ADDR, None, 0, 0x00, &[0x01, 0x02, 0x03]);

        assert_eq!(io.read_inputs().await.unwrap(), 0x030201);
        assert_eq!(
            sim.calls(),
            vec![Call::WriteRead {
                addr: ADDR,
                write: vec![0x80],
                len: 3
            }]
        );
    }

    #[tokio::test]
    async fn port_write_targets_one_register() {
        let sim = SimBus::new();
        let mut io = expander(&sim);

        io.write_port(Bank::Config, 2, 0xF0).await.unwrap();

        assert_eq!(sim.writes(), vec![(ADDR, vec![0x0E, 0xF0])]);
        assert_eq!(io.read_config().await.unwrap(), 0xF00000);
    }

    #[test_case::test_case(Bank::Output, 3; "port past the end")]
    #[test_case::test_case(Bank::Input, 0; "input bank")]
    #[tokio::test]
    async fn bad_port_writes_are_rejected(bank: Bank, port: u8) {
        let sim = SimBus::new();
        let mut io = expander(&sim);

        let err = io.write_port(bank, port, 0x55).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::InvalidParameter);
        assert!(sim.calls().is_empty());
    }

    #[tokio::test]
    async fn value_wider_than_24_bits_is_rejected() {
        let sim = SimBus::new();
        let mut io = expander(&sim);

        let err = io.write_config(0x0100_0000).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::InvalidParameter);
        assert!(sim.calls().is_empty());
    }

    #[test]
    fn register_names_follow_the_bank() {
        assert_eq!(protocol::register_name(0x01), "input");
        assert_eq!(protocol::register_name(0x84), "output");
        assert_eq!(protocol::register_name(0x0A), "polarity inversion");
        assert_eq!(protocol::register_name(0x8C), "configuration");
        assert_eq!(protocol::register_name(0x03), "reserved");
    }
}
