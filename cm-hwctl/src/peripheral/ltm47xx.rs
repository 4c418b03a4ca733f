//! LTM4700 / LTM4675 dual-output PMBus regulator driver.
//!
//! Both parts are µModule regulators with two outputs selected by PAGE.
//! Output voltage is ULINEAR16 scaled by each page's VOUT_MODE; everything
//! else is SLINEAR11. Input voltage, input current and the controller die
//! temperature do not depend on the page; output current and the external
//! diode temperature of each output do.
//!
//! Datasheets:
//! <https://www.analog.com/en/products/ltm4700.html>,
//! <https://www.analog.com/en/products/ltm4675.html>

use std::fmt;
use std::ops::RangeInclusive;

use crate::{
    bus::SharedBus,
    device::{AccessLimits, Device, Endpoint, Op},
    error::Result,
    hw_trait::I2c,
    peripheral::pmbus::{self, StatusWord, WriteProtect, commands},
    tracing::prelude::*,
};

pub const CHANNELS: u8 = 2;

pub fn command_name(code: u8) -> &'static str {
    match code {
        0xFE..=0xFF => "reserved",
        _ => pmbus::command_name(code).unwrap_or("unknown"),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variant {
    Ltm4675,
    Ltm4700,
}

impl Variant {
    /// Output voltage the part can regulate, in volts.
    pub fn vout_range(&self) -> RangeInclusive<f32> {
        match self {
            Variant::Ltm4675 => 0.5..=5.5,
            Variant::Ltm4700 => 0.5..=1.8,
        }
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Variant::Ltm4675 => "LTM4675",
            Variant::Ltm4700 => "LTM4700",
        })
    }
}

/// One output's voltage and current under a board name.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputReading {
    pub channel: u8,
    pub name: String,
    pub vout: f32,
    pub iout: f32,
}

/// Everything the regulator measures in one pass.
#[derive(Debug, Clone, PartialEq)]
pub struct RegulatorStatus {
    /// Controller die temperature in °C.
    pub temperature: f32,
    /// External diode temperature of each output in °C.
    pub external_temperature: [f32; CHANNELS as usize],
    pub vin: f32,
    pub iin: f32,
    pub vout: [f32; CHANNELS as usize],
    pub iout: [f32; CHANNELS as usize],
}

pub struct Ltm47xx<I> {
    device: Device<I>,
    variant: Variant,
}

impl<I: I2c> Ltm47xx<I> {
    pub fn new(
        name: impl Into<String>,
        bus: SharedBus<I>,
        endpoint: Endpoint,
        variant: Variant,
    ) -> Self {
        let limits = AccessLimits::new(0x00..=0xFD, 1..=2);
        Self {
            device: Device::new(name, bus, endpoint, limits, command_name),
            variant,
        }
    }

    pub fn device(&self) -> &Device<I> {
        &self.device
    }

    pub fn variant(&self) -> Variant {
        self.variant
    }

    /// Select the output for subsequent paged commands.
    pub async fn set_page(&mut self, channel: u8) -> Result<()> {
        self.check_channel(Op::Write, channel)?;
        Ok(self.device.write(commands::PAGE, &[channel]).await?)
    }

    pub async fn set_write_protect(&mut self, level: WriteProtect) -> Result<()> {
        Ok(self
            .device
            .write(commands::WRITE_PROTECT, &[level as u8])
            .await?)
    }

    async fn read_word(&mut self, command: u8) -> Result<u16> {
        let data = self.device.read(command, 2).await?;
        Ok(u16::from_le_bytes([data[0], data[1]]))
    }

    async fn read_vout_mode(&mut self) -> Result<u8> {
        Ok(self.device.read(commands::VOUT_MODE, 1).await?[0])
    }

    /// Controller die temperature in °C.
    pub async fn read_temperature(&mut self) -> Result<f32> {
        let raw = self.read_word(commands::READ_TEMPERATURE_2).await?;
        Ok(pmbus::slinear11_to_f32(raw))
    }

    /// External diode temperature of `channel` in °C.
    pub async fn read_external_temperature(&mut self, channel: u8) -> Result<f32> {
        self.set_page(channel).await?;
        let raw = self.read_word(commands::READ_TEMPERATURE_1).await?;
        Ok(pmbus::slinear11_to_f32(raw))
    }

    pub async fn read_vin(&mut self) -> Result<f32> {
        let raw = self.read_word(commands::READ_VIN).await?;
        Ok(pmbus::slinear11_to_f32(raw))
    }

    pub async fn read_iin(&mut self) -> Result<f32> {
        let raw = self.read_word(commands::READ_IIN).await?;
        Ok(pmbus::slinear11_to_f32(raw))
    }

    /// Output voltage of `channel`. Leaves PAGE on that channel.
    pub async fn read_vout(&mut self, channel: u8) -> Result<f32> {
        self.set_page(channel).await?;
        let vout_mode = self.read_vout_mode().await?;
        let raw = self.read_word(commands::READ_VOUT).await?;
        Ok(pmbus::ulinear16_to_f32(raw, vout_mode))
    }

    /// Output current of `channel`. Leaves PAGE on that channel.
    pub async fn read_iout(&mut self, channel: u8) -> Result<f32> {
        self.set_page(channel).await?;
        let raw = self.read_word(commands::READ_IOUT).await?;
        Ok(pmbus::slinear11_to_f32(raw))
    }

    pub async fn read_status_word(&mut self, channel: u8) -> Result<StatusWord> {
        self.set_page(channel).await?;
        Ok(StatusWord(self.read_word(commands::STATUS_WORD).await?))
    }

    /// Set the output voltage of `channel`.
    ///
    /// The value is checked against the part's range and the page's VOUT_MODE
    /// before anything is written to VOUT_COMMAND.
    pub async fn set_vout(&mut self, channel: u8, volts: f32) -> Result<()> {
        self.check_channel(Op::Write, channel)?;
        let range = self.variant.vout_range();
        if !range.contains(&volts) {
            let reason = format!(
                "{} V outside {} range {}..={} V",
                volts,
                self.variant,
                range.start(),
                range.end()
            );
            return Err(self
                .device
                .reject(Op::Write, Some(commands::VOUT_COMMAND), &[], reason)
                .into());
        }

        self.set_page(channel).await?;
        let vout_mode = self.read_vout_mode().await?;
        let Some(raw) = pmbus::f32_to_ulinear16(volts, vout_mode) else {
            let reason = format!(
                "{} V does not fit ULINEAR16 with VOUT_MODE 0x{:02x}",
                volts, vout_mode
            );
            return Err(self
                .device
                .reject(Op::Write, Some(commands::VOUT_COMMAND), &[], reason)
                .into());
        };
        self.device
            .write(commands::VOUT_COMMAND, &raw.to_le_bytes())
            .await?;

        debug!(
            device = self.device.name(),
            channel,
            volts,
            raw = format!("{:#06x}", raw),
            "Output voltage set"
        );
        Ok(())
    }

    /// Temperatures, input and both outputs.
    pub async fn read_status(&mut self) -> Result<RegulatorStatus> {
        let temperature = self.read_temperature().await?;
        let vin = self.read_vin().await?;
        let iin = self.read_iin().await?;
        let mut external_temperature = [0.0; CHANNELS as usize];
        let mut vout = [0.0; CHANNELS as usize];
        let mut iout = [0.0; CHANNELS as usize];
        for channel in 0..CHANNELS {
            let i = channel as usize;
            external_temperature[i] = self.read_external_temperature(channel).await?;
            vout[i] = self.read_vout(channel).await?;
            iout[i] = self.read_iout(channel).await?;
        }
        Ok(RegulatorStatus {
            temperature,
            external_temperature,
            vin,
            iin,
            vout,
            iout,
        })
    }

    /// Read both outputs and label them with `names`, one per channel.
    pub async fn read_outputs(&mut self, names: &[&str]) -> Result<Vec<OutputReading>> {
        if names.len() != CHANNELS as usize {
            let reason = format!("{} output names given, {} needed", names.len(), CHANNELS);
            return Err(self.device.reject(Op::Read, None, &[], reason).into());
        }

        let status = self.read_status().await?;
        Ok((0..CHANNELS)
            .zip(names)
            .map(|(channel, name)| OutputReading {
                channel,
                name: name.to_string(),
                vout: status.vout[channel as usize],
                iout: status.iout[channel as usize],
            })
            .collect())
    }

    fn check_channel(&mut self, op: Op, channel: u8) -> Result<()> {
        if channel >= CHANNELS {
            let reason = format!("channel {} out of range 0..{}", channel, CHANNELS);
            return Err(self
                .device
                .reject(op, Some(commands::PAGE), &[channel], reason)
                .into());
        }
        Ok(())
    }
}
