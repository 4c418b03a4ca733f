//! LTC2977 8-channel PMBus power system manager driver.
//!
//! Per-channel commands act on the channel selected by PAGE; PAGE 0xFF
//! addresses all channels at once. Output voltages are ULINEAR16 scaled by the
//! VOUT_MODE exponent. Input voltage and die temperature are SLINEAR11 and
//! independent of the page.
//!
//! Channels without a regulator output of their own are often wired across
//! a current sense shunt; [`Ltc2977::read_channels`] turns such readings into
//! currents.
//!
//! Datasheet: <https://www.analog.com/en/products/ltc2977.html>

use crate::{
    bus::SharedBus,
    device::{AccessLimits, Device, Endpoint, Op},
    error::{Error, Result},
    hw_trait::I2c,
    peripheral::pmbus::{self, StatusWord, WriteProtect, commands},
    tracing::prelude::*,
};

pub const CHANNELS: u8 = 8;

/// PAGE value addressing every channel.
pub const PAGE_ALL: u8 = 0xFF;

/// Makes channels respond to PAGE 0xFF.
pub const MFR_PAGE_FF_MASK: u8 = 0xE4;

/// Name of a command code, as shown in traces and errors.
pub fn command_name(code: u8) -> &'static str {
    match code {
        MFR_PAGE_FF_MASK => "MFR page FF mask",
        0xFE..=0xFF => "reserved",
        _ => pmbus::command_name(code).unwrap_or("unknown"),
    }
}

/// What a channel measures and how to scale it.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelConfig {
    pub name: String,
    /// Current sense shunt in ohms; zero for a plain voltage channel.
    pub shunt_ohms: f32,
}

impl ChannelConfig {
    pub fn voltage(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            shunt_ohms: 0.0,
        }
    }

    pub fn current(name: impl Into<String>, shunt_ohms: f32) -> Self {
        Self {
            name: name.into(),
            shunt_ohms,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unit {
    Volts,
    Amps,
}

impl Unit {
    pub fn symbol(&self) -> &'static str {
        match self {
            Unit::Volts => "V",
            Unit::Amps => "A",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChannelReading {
    pub channel: u8,
    pub name: String,
    pub value: f32,
    pub unit: Unit,
}

/// Everything the chip measures in one pass.
#[derive(Debug, Clone, PartialEq)]
pub struct PowerStatus {
    /// Die temperature in °C.
    pub temperature: f32,
    pub vin: f32,
    pub vout: [f32; CHANNELS as usize],
}

struct Step {
    name: &'static str,
    command: u8,
    value: u8,
}

pub struct Ltc2977<I> {
    device: Device<I>,
}

impl<I: I2c> Ltc2977<I> {
    pub fn new(name: impl Into<String>, bus: SharedBus<I>, endpoint: Endpoint) -> Self {
        let limits = AccessLimits::new(0x00..=0xFD, 1..=2);
        Self {
            device: Device::new(name, bus, endpoint, limits, command_name),
        }
    }

    pub fn device(&self) -> &Device<I> {
        &self.device
    }

    pub async fn read(&mut self, command: u8, len: usize) -> Result<Vec<u8>> {
        Ok(self.device.read(command, len).await?)
    }

    pub async fn write(&mut self, command: u8, data: &[u8]) -> Result<()> {
        Ok(self.device.write(command, data).await?)
    }

    /// Select the channel for subsequent paged commands; [`PAGE_ALL`] selects all.
    pub async fn set_page(&mut self, page: u8) -> Result<()> {
        if page >= CHANNELS && page != PAGE_ALL {
            let reason = format!("page {} out of range 0..{} or 0xff", page, CHANNELS);
            return Err(self
                .device
                .reject(Op::Write, Some(commands::PAGE), &[page], reason)
                .into());
        }
        self.write(commands::PAGE, &[page]).await
    }

    pub async fn set_write_protect(&mut self, level: WriteProtect) -> Result<()> {
        self.write(commands::WRITE_PROTECT, &[level as u8]).await
    }

    pub async fn read_write_protect(&mut self) -> Result<WriteProtect> {
        let data = self.read(commands::WRITE_PROTECT, 1).await?;
        WriteProtect::try_from(data[0]).map_err(|e| {
            self.device
                .fail(Op::Read, Some(commands::WRITE_PROTECT), &data, e)
                .into()
        })
    }

    async fn read_word(&mut self, command: u8) -> Result<u16> {
        let data = self.read(command, 2).await?;
        Ok(u16::from_le_bytes([data[0], data[1]]))
    }

    pub async fn read_vin(&mut self) -> Result<f32> {
        let raw = self.read_word(commands::READ_VIN).await?;
        Ok(pmbus::slinear11_to_f32(raw))
    }

    /// Die temperature in °C.
    pub async fn read_temperature(&mut self) -> Result<f32> {
        let raw = self.read_word(commands::READ_TEMPERATURE_2).await?;
        Ok(pmbus::slinear11_to_f32(raw))
    }

    /// Output voltage of `channel`. Leaves PAGE on that channel.
    pub async fn read_vout(&mut self, channel: u8) -> Result<f32> {
        self.check_channel(channel)?;
        self.set_page(channel).await?;
        let vout_mode = self.read(commands::VOUT_MODE, 1).await?[0];
        let raw = self.read_word(commands::READ_VOUT).await?;
        Ok(pmbus::ulinear16_to_f32(raw, vout_mode))
    }

    /// Current through the shunt on `channel`.
    pub async fn read_current(&mut self, channel: u8, shunt_ohms: f32) -> Result<f32> {
        if !(shunt_ohms > 0.0 && shunt_ohms.is_finite()) {
            let reason = format!("shunt of {} ohm cannot yield a current", shunt_ohms);
            return Err(self.device.reject(Op::Read, None, &[channel], reason).into());
        }
        Ok(self.read_vout(channel).await? / shunt_ohms)
    }

    pub async fn read_status_word(&mut self, page: u8) -> Result<StatusWord> {
        self.set_page(page).await?;
        Ok(StatusWord(self.read_word(commands::STATUS_WORD).await?))
    }

    /// Temperature, input voltage and every output voltage.
    pub async fn read_status(&mut self) -> Result<PowerStatus> {
        let temperature = self.read_temperature().await?;
        let vin = self.read_vin().await?;
        let mut vout = [0.0; CHANNELS as usize];
        for (channel, v) in (0..CHANNELS).zip(vout.iter_mut()) {
            *v = self.read_vout(channel).await?;
        }
        Ok(PowerStatus {
            temperature,
            vin,
            vout,
        })
    }

    /// Read every channel and scale it per `configs`, one entry per channel.
    pub async fn read_channels(&mut self, configs: &[ChannelConfig]) -> Result<Vec<ChannelReading>> {
        if configs.len() != CHANNELS as usize {
            let reason = format!(
                "{} channel configs given, {} needed",
                configs.len(),
                CHANNELS
            );
            return Err(self.device.reject(Op::Read, None, &[], reason).into());
        }
        if let Some(bad) = configs.iter().find(|c| !(c.shunt_ohms >= 0.0)) {
            let reason = format!("{}: negative shunt {}", bad.name, bad.shunt_ohms);
            return Err(self.device.reject(Op::Read, None, &[], reason).into());
        }

        let status = self.read_status().await?;
        let readings = configs
            .iter()
            .zip(status.vout)
            .zip(0..)
            .map(|((config, volts), channel)| {
                let (value, unit) = if config.shunt_ohms != 0.0 {
                    (volts / config.shunt_ohms, Unit::Amps)
                } else {
                    (volts, Unit::Volts)
                };
                ChannelReading {
                    channel,
                    name: config.name.clone(),
                    value,
                    unit,
                }
            })
            .collect();
        Ok(readings)
    }

    /// Turn every channel off at once.
    pub async fn power_off_all(&mut self) -> Result<()> {
        self.switch_all("power off all", pmbus::operation::OFF_IMMEDIATE)
            .await
    }

    /// Turn every channel on at once.
    pub async fn power_on_all(&mut self) -> Result<()> {
        self.switch_all("power on all", pmbus::operation::ON).await
    }

    async fn switch_all(&mut self, sequence: &'static str, operation: u8) -> Result<()> {
        let steps = [
            Step {
                name: "write protect level 2",
                command: commands::WRITE_PROTECT,
                value: WriteProtect::Level2 as u8,
            },
            Step {
                name: "global page mask",
                command: MFR_PAGE_FF_MASK,
                value: 0xFF,
            },
            Step {
                name: "page all",
                command: commands::PAGE,
                value: PAGE_ALL,
            },
            Step {
                name: "on/off config",
                command: commands::ON_OFF_CONFIG,
                value: 0x00,
            },
            Step {
                name: "operation",
                command: commands::OPERATION,
                value: operation,
            },
        ];

        for (i, step) in steps.iter().enumerate() {
            if let Err(e) = self.write(step.command, &[step.value]).await {
                return Err(Error::SequenceAborted {
                    sequence,
                    step: i + 1,
                    steps: steps.len(),
                    step_name: step.name,
                    source: Box::new(e),
                });
            }
        }

        info!(device = self.device.name(), "{}", sequence);
        Ok(())
    }

    fn check_channel(&mut self, channel: u8) -> Result<()> {
        if channel >= CHANNELS {
            let reason = format!("channel {} out of range 0..{}", channel, CHANNELS);
            return Err(self.device.reject(Op::Read, None, &[channel], reason).into());
        }
        Ok(())
    }
}
