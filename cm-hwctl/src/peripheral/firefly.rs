//! Samtec FireFly optical module monitoring.
//!
//! Receiver and transmitter modules sit behind separate muxes, one module per
//! mux channel, all receivers at one address and all transmitters at another.
//! Monitors live in the lower memory page (0..=127). Byte 127 selects which
//! upper page appears at 128..=255: page 0 holds the vendor identity, page 1
//! the time-at-temperature counters.

use std::fmt;

use crate::{
    bus::SharedBus,
    device::{AccessLimits, Device, Endpoint, Op, RouteState},
    error::Result,
    hw_trait::I2c,
    tracing::prelude::*,
};

pub mod protocol {
    pub mod regs {
        /// Case temperature, signed whole degrees.
        pub const TEMPERATURE: u8 = 22;
        /// Supply voltage, big-endian, 100 µV per LSB.
        pub const VCC: u8 = 26;
        /// Firmware major and minor revision.
        pub const FIRMWARE_VERSION: u8 = 69;
        pub const PAGE_SELECT: u8 = 127;

        /// Upper page 0.
        pub const VENDOR_NAME: u8 = 152;
        pub const PART_NUMBER: u8 = 171;
        pub const SERIAL_NUMBER: u8 = 189;

        /// Upper page 1: one big-endian counter per bin.
        pub const TIME_AT_TEMPERATURE: u8 = 128;
    }

    pub const IDENTITY_PAGE: u8 = 0;
    pub const TIME_AT_TEMPERATURE_PAGE: u8 = 1;

    /// Space-padded ASCII fields on the identity page.
    pub const TEXT_LEN: usize = 16;

    pub const VOLTS_PER_LSB: f32 = 100e-6;

    /// Below 0 °C, twenty 5 °C steps, then above 100 °C.
    pub const TEMPERATURE_BINS: u8 = 22;
    pub const HOURS_PER_LSB: f32 = 1.0;

    pub const RX_ADDRESS: u8 = 0x54;
    pub const TX_ADDRESS: u8 = 0x50;

    pub fn register_name(reg: u8) -> &'static str {
        match reg {
            regs::TEMPERATURE => "case temperature",
            26..=27 => "supply voltage",
            69..=70 => "firmware version",
            regs::PAGE_SELECT => "page select",
            0x00..=0x7E => "lower page",
            152..=167 => "vendor name",
            171..=186 => "vendor part number",
            189..=204 => "vendor serial number",
            _ => "upper page",
        }
    }

    /// Temperature span of a time-at-temperature bin.
    pub fn bin_label(bin: u8) -> String {
        match bin {
            0 => "< 0 °C".to_string(),
            b if b >= TEMPERATURE_BINS - 1 => "> 100 °C".to_string(),
            b => format!("{} .. {} °C", (b as u16 - 1) * 5, b as u16 * 5),
        }
    }
}

/// Which half of a link the module is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleType {
    Rx,
    Tx,
}

impl ModuleType {
    /// Address the module answers at.
    pub fn address(self) -> u8 {
        match self {
            ModuleType::Rx => protocol::RX_ADDRESS,
            ModuleType::Tx => protocol::TX_ADDRESS,
        }
    }
}

impl fmt::Display for ModuleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ModuleType::Rx => "RX",
            ModuleType::Tx => "TX",
        })
    }
}

/// Vendor identity from upper page 0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub vendor: String,
    pub part_number: String,
    pub serial_number: String,
}

pub struct FireFly<I> {
    device: Device<I>,
    module_type: ModuleType,
}

impl<I: I2c> FireFly<I> {
    /// A receiver module at `endpoint`.
    pub fn new(name: impl Into<String>, bus: SharedBus<I>, endpoint: Endpoint) -> Self {
        Self::with_type(name, bus, endpoint, ModuleType::Rx)
    }

    pub fn with_type(
        name: impl Into<String>,
        bus: SharedBus<I>,
        endpoint: Endpoint,
        module_type: ModuleType,
    ) -> Self {
        let limits = AccessLimits::new(0x00..=0xFF, 1..=protocol::TEXT_LEN);
        Self {
            device: Device::new(name, bus, endpoint, limits, protocol::register_name),
            module_type,
        }
    }

    pub fn device(&self) -> &Device<I> {
        &self.device
    }

    pub fn module_type(&self) -> ModuleType {
        self.module_type
    }

    pub async fn route_state(&self) -> RouteState {
        self.device.route_state().await
    }

    /// Case temperature in °C.
    pub async fn read_temperature(&mut self) -> Result<i8> {
        let data = self.device.read(protocol::regs::TEMPERATURE, 1).await?;
        Ok(data[0] as i8)
    }

    /// Supply voltage in volts.
    pub async fn read_vcc(&mut self) -> Result<f32> {
        let data = self.device.read(protocol::regs::VCC, 2).await?;
        let raw = u16::from_be_bytes([data[0], data[1]]);
        Ok(raw as f32 * protocol::VOLTS_PER_LSB)
    }

    /// Firmware revision as `major.minor`.
    pub async fn read_firmware_version(&mut self) -> Result<String> {
        let data = self
            .device
            .read(protocol::regs::FIRMWARE_VERSION, 2)
            .await?;
        Ok(format!("{}.{}", data[0], data[1]))
    }

    async fn select_page(&mut self, page: u8) -> Result<()> {
        Ok(self
            .device
            .write(protocol::regs::PAGE_SELECT, &[page])
            .await?)
    }

    async fn read_text(&mut self, reg: u8) -> Result<String> {
        self.select_page(protocol::IDENTITY_PAGE).await?;
        let data = self.device.read(reg, protocol::TEXT_LEN).await?;
        Ok(String::from_utf8_lossy(&data)
            .trim_end_matches([' ', '\0'])
            .to_string())
    }

    pub async fn read_vendor_name(&mut self) -> Result<String> {
        self.read_text(protocol::regs::VENDOR_NAME).await
    }

    pub async fn read_part_number(&mut self) -> Result<String> {
        self.read_text(protocol::regs::PART_NUMBER).await
    }

    pub async fn read_serial_number(&mut self) -> Result<String> {
        self.read_text(protocol::regs::SERIAL_NUMBER).await
    }

    pub async fn read_identity(&mut self) -> Result<Identity> {
        let identity = Identity {
            vendor: self.read_vendor_name().await?,
            part_number: self.read_part_number().await?,
            serial_number: self.read_serial_number().await?,
        };
        debug!(
            module = self.device.name(),
            kind = %self.module_type,
            vendor = %identity.vendor,
            part = %identity.part_number,
            serial = %identity.serial_number,
            "FireFly identified"
        );
        Ok(identity)
    }

    /// Hours spent in temperature bin `bin`; see [`protocol::bin_label`].
    pub async fn read_time_at_temperature(&mut self, bin: u8) -> Result<f32> {
        if bin >= protocol::TEMPERATURE_BINS {
            let reason = format!(
                "bin {} out of range 0..{}",
                bin,
                protocol::TEMPERATURE_BINS
            );
            return Err(self.device.reject(Op::Read, None, &[bin], reason).into());
        }
        self.select_page(protocol::TIME_AT_TEMPERATURE_PAGE).await?;
        let reg = protocol::regs::TIME_AT_TEMPERATURE + 2 * bin;
        let data = self.device.read(reg, 2).await?;
        let raw = u16::from_be_bytes([data[0], data[1]]);
        Ok(raw as f32 * protocol::HOURS_PER_LSB)
    }

    /// Every time-at-temperature bin, coldest first.
    pub async fn read_time_at_temperature_all(&mut self) -> Result<Vec<f32>> {
        let mut hours = Vec::with_capacity(protocol::TEMPERATURE_BINS as usize);
        for bin in 0..protocol::TEMPERATURE_BINS {
            hours.push(self.read_time_at_temperature(bin).await?);
        }
        Ok(hours)
    }
}
