//! MCP9808 digital temperature sensor driver.
//!
//! Registers are 16 bits wide and big-endian on the wire, except the one-byte
//! resolution register. Temperatures are 13-bit sign-magnitude fields with
//! 0.0625 °C per LSB. The ambient temperature register carries three alert
//! flags above the temperature field.
//!
//! Datasheet: <https://www.microchip.com/en-us/product/MCP9808>

use crate::{
    bus::SharedBus,
    device::{AccessLimits, Device, Endpoint, Op},
    error::Result,
    hw_trait::I2c,
    tracing::prelude::*,
};

/// Register layout and value conversions.
pub mod protocol {
    pub const EXPECTED_MFG_ID: u16 = 0x0054;
    /// Upper byte of the device ID register; the lower byte is the revision.
    pub const EXPECTED_DEVICE_ID: u8 = 0x04;

    pub mod regs {
        pub const RFU: u8 = 0x00;
        pub const CONFIG: u8 = 0x01;
        pub const T_UPPER: u8 = 0x02;
        pub const T_LOWER: u8 = 0x03;
        pub const T_CRIT: u8 = 0x04;
        pub const TEMPERATURE: u8 = 0x05;
        pub const MFG_ID: u8 = 0x06;
        pub const DEVICE_ID: u8 = 0x07;
        pub const RESOLUTION: u8 = 0x08;
    }

    pub fn register_name(pointer: u8) -> &'static str {
        match pointer {
            regs::RFU => "reserved for future use",
            regs::CONFIG => "configuration",
            regs::T_UPPER => "alert upper boundary",
            regs::T_LOWER => "alert lower boundary",
            regs::T_CRIT => "critical temperature",
            regs::TEMPERATURE => "temperature",
            regs::MFG_ID => "manufacturer ID",
            regs::DEVICE_ID => "device ID",
            regs::RESOLUTION => "resolution",
            _ => "reserved",
        }
    }

    const LSB: f32 = 0.0625;
    const FIELD: u16 = 0x1fff;
    const SIGN: u16 = 0x1000;
    const MAGNITUDE: u16 = 0x0fff;

    /// Largest magnitude the 12 magnitude bits can hold.
    pub const MAX_CELSIUS: f32 = 255.9375;

    /// Decode the 13-bit temperature field of `raw`; bits above it are ignored.
    ///
    /// `0x1000` (-256 °C) cannot be told apart from zero by the integer part
    /// and decodes as 0.0; the sensor never produces it.
    pub fn decode_temperature(raw: u16) -> f32 {
        let field = raw & FIELD;
        let (sign, magnitude) = if field & SIGN != 0 {
            (-1.0, field.wrapping_neg() & FIELD)
        } else {
            (1.0, field)
        };
        let integer = (magnitude >> 4) & 0xff;
        let fraction = magnitude & 0xf;
        sign * (integer as f32 + fraction as f32 * LSB)
    }

    /// Encode a setpoint, truncating toward zero to 0.0625 °C.
    ///
    /// Returns `None` for NaN or anything beyond ±[`MAX_CELSIUS`].
    pub fn encode_temperature(celsius: f32) -> Option<u16> {
        if celsius.is_nan() || celsius.abs() > MAX_CELSIUS {
            return None;
        }
        let magnitude = ((celsius.abs() / LSB) as u16) & MAGNITUDE;
        if celsius < 0.0 {
            Some(magnitude.wrapping_neg() & FIELD)
        } else {
            Some(magnitude)
        }
    }

    /// Alert flags in bits 15:13 of the ambient temperature register.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Alerts {
        /// T_A >= T_CRIT
        pub critical: bool,
        /// T_A > T_UPPER
        pub above_upper: bool,
        /// T_A < T_LOWER
        pub below_lower: bool,
    }

    impl Alerts {
        pub fn from_raw(raw: u16) -> Self {
            let bits = (raw >> 13) & 0x7;
            Self {
                critical: bits & 0b100 != 0,
                above_upper: bits & 0b010 != 0,
                below_lower: bits & 0b001 != 0,
            }
        }

        pub fn any(&self) -> bool {
            self.critical || self.above_upper || self.below_lower
        }
    }
}

pub use protocol::Alerts;

/// Conversion resolution, from the resolution register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Resolution {
    /// 0.5 °C, 30 ms
    Half = 0,
    /// 0.25 °C, 65 ms
    Quarter = 1,
    /// 0.125 °C, 130 ms
    Eighth = 2,
    /// 0.0625 °C, 250 ms
    Sixteenth = 3,
}

impl Resolution {
    fn from_bits(bits: u8) -> Self {
        match bits & 0x3 {
            0 => Resolution::Half,
            1 => Resolution::Quarter,
            2 => Resolution::Eighth,
            _ => Resolution::Sixteenth,
        }
    }
}

/// Settings applied by [`Mcp9808::init`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mcp9808Config {
    /// Configuration register. Zero means continuous conversion, alerts off.
    pub config: u16,
    pub resolution: Resolution,
}

impl Default for Mcp9808Config {
    fn default() -> Self {
        Self {
            config: 0x0000,
            resolution: Resolution::Sixteenth,
        }
    }
}

/// Ambient temperature plus the alert flags read with it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TemperatureReading {
    pub celsius: f32,
    pub alerts: Alerts,
}

pub struct Mcp9808<I> {
    device: Device<I>,
}

impl<I: I2c> Mcp9808<I> {
    pub fn new(name: impl Into<String>, bus: SharedBus<I>, endpoint: Endpoint) -> Self {
        let limits = AccessLimits::new(protocol::regs::RFU..=protocol::regs::RESOLUTION, 1..=2);
        Self {
            device: Device::new(name, bus, endpoint, limits, protocol::register_name),
        }
    }

    pub fn device(&self) -> &Device<I> {
        &self.device
    }

    pub async fn read_register(&mut self, pointer: u8) -> Result<u16> {
        let data = self.device.read(pointer, 2).await?;
        Ok(u16::from_be_bytes([data[0], data[1]]))
    }

    pub async fn write_register(&mut self, pointer: u8, value: u16) -> Result<()> {
        self.device.write(pointer, &value.to_be_bytes()).await?;
        Ok(())
    }

    /// Check the IDs and apply `config`.
    pub async fn init(&mut self, config: &Mcp9808Config) -> Result<()> {
        let mfg_id = self.read_register(protocol::regs::MFG_ID).await?;
        let device_id = self.read_register(protocol::regs::DEVICE_ID).await?;
        if mfg_id != protocol::EXPECTED_MFG_ID
            || (device_id >> 8) as u8 != protocol::EXPECTED_DEVICE_ID
        {
            warn!(
                device = self.device.name(),
                mfg_id = format!("{:#06x}", mfg_id),
                device_id = format!("{:#06x}", device_id),
                "Unexpected MCP9808 IDs"
            );
        } else {
            debug!(
                device = self.device.name(),
                revision = device_id & 0xff,
                "Detected MCP9808"
            );
        }

        self.write_register(protocol::regs::CONFIG, config.config)
            .await?;
        self.write_resolution(config.resolution).await
    }

    pub async fn read_temperature(&mut self) -> Result<TemperatureReading> {
        let raw = self.read_register(protocol::regs::TEMPERATURE).await?;
        let reading = TemperatureReading {
            celsius: protocol::decode_temperature(raw),
            alerts: Alerts::from_raw(raw),
        };
        trace!(
            device = self.device.name(),
            celsius = reading.celsius,
            alerts = ?reading.alerts,
            "Temperature"
        );
        Ok(reading)
    }

    pub async fn read_upper_limit(&mut self) -> Result<f32> {
        self.read_limit(protocol::regs::T_UPPER).await
    }

    pub async fn read_lower_limit(&mut self) -> Result<f32> {
        self.read_limit(protocol::regs::T_LOWER).await
    }

    pub async fn read_critical_limit(&mut self) -> Result<f32> {
        self.read_limit(protocol::regs::T_CRIT).await
    }

    pub async fn write_upper_limit(&mut self, celsius: f32) -> Result<()> {
        self.write_limit(protocol::regs::T_UPPER, celsius).await
    }

    pub async fn write_lower_limit(&mut self, celsius: f32) -> Result<()> {
        self.write_limit(protocol::regs::T_LOWER, celsius).await
    }

    pub async fn write_critical_limit(&mut self, celsius: f32) -> Result<()> {
        self.write_limit(protocol::regs::T_CRIT, celsius).await
    }

    pub async fn read_config(&mut self) -> Result<u16> {
        self.read_register(protocol::regs::CONFIG).await
    }

    pub async fn write_config(&mut self, value: u16) -> Result<()> {
        self.write_register(protocol::regs::CONFIG, value).await
    }

    pub async fn read_manufacturer_id(&mut self) -> Result<u16> {
        self.read_register(protocol::regs::MFG_ID).await
    }

    pub async fn read_device_id(&mut self) -> Result<u16> {
        self.read_register(protocol::regs::DEVICE_ID).await
    }

    pub async fn read_resolution(&mut self) -> Result<Resolution> {
        let data = self.device.read(protocol::regs::RESOLUTION, 1).await?;
        Ok(Resolution::from_bits(data[0]))
    }

    pub async fn write_resolution(&mut self, resolution: Resolution) -> Result<()> {
        self.device
            .write(protocol::regs::RESOLUTION, &[resolution as u8])
            .await?;
        Ok(())
    }

    async fn read_limit(&mut self, pointer: u8) -> Result<f32> {
        let raw = self.read_register(pointer).await?;
        Ok(protocol::decode_temperature(raw))
    }

    async fn write_limit(&mut self, pointer: u8, celsius: f32) -> Result<()> {
        let Some(raw) = protocol::encode_temperature(celsius) else {
            let reason = format!("{} °C not representable", celsius);
            return Err(self.device.reject(Op::Write, Some(pointer), &[], reason).into());
        };
        self.write_register(pointer, raw).await
    }
}
