//! Silicon Labs Si5340/41/42/44/45 clock generator driver.
//!
//! Registers are 16-bit addresses split into a page, written to register
//! 0x01, and an 8-bit offset within the page. Status lives on page 0. The
//! chips sit behind muxes on the board, often several at the same address,
//! so every access asserts the route first.
//!
//! Configuration comes from ClockBuilder Pro register maps (see
//! [`crate::regmap`]). [`plan`] turns a map into the exact bus transactions,
//! and [`Si53xx::program`] executes them, stopping at the first failure.
//!
//! Reference: AN926, "Reading and Writing Registers with SPI and I2C".

use std::fmt;
use std::path::Path;
use std::time::Duration;

use crate::{
    bus::SharedBus,
    device::{AccessLimits, Device, Endpoint, Op, RouteState},
    error::{Error, Result},
    hw_trait::{HwError, I2c},
    regmap::{RegisterMap, RegisterMapItem},
    tracing::prelude::*,
};

pub mod protocol {
    /// Page select register, present on every page.
    pub const PAGE: u8 = 0x01;

    /// Data bytes the transport carries after the register byte.
    pub const MAX_WRITE_DATA: usize = 32;

    pub mod regs {
        pub const STATUS: u8 = 0x0C;
        pub const LOS: u8 = 0x0D;
        pub const LOL: u8 = 0x0E;
        pub const STICKY_STATUS: u8 = 0x11;
        pub const STICKY_LOS: u8 = 0x12;
        pub const STICKY_LOL: u8 = 0x13;
    }

    /// Page 0 registers readable through [`super::Si53xx::read_register`].
    pub const STATUS_REGS: std::ops::RangeInclusive<u8> = regs::STATUS..=regs::STICKY_LOL;

    pub mod bits {
        pub const SYSINCAL: u8 = 0x01;
        pub const LOSXAXB: u8 = 0x02;
        /// Si5340/41 only.
        pub const LOSREF: u8 = 0x04;
        /// Loss of lock in the status register on Si5340/41.
        pub const LOL_IN_STATUS: u8 = 0x08;
        /// Si5340/41 only.
        pub const SMBUS_TIMEOUT: u8 = 0x20;
        /// Loss of signal of IN0..IN2 and FB_IN.
        pub const LOSIN: u8 = 0x0F;
        /// Loss of lock in its own register on Si5342/44/45.
        pub const LOL: u8 = 0x02;
    }

    pub fn register_name(reg: u8) -> &'static str {
        match reg {
            PAGE => "page",
            regs::STATUS => "status",
            regs::LOS => "status LOSIN",
            regs::LOL => "status LOL",
            regs::STICKY_STATUS => "sticky status",
            regs::STICKY_LOS => "sticky LOSIN",
            regs::STICKY_LOL => "sticky LOL",
            _ => "other",
        }
    }
}

use protocol::{bits, regs};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variant {
    Si5340,
    Si5341,
    Si5342,
    Si5344,
    Si5345,
}

impl Variant {
    /// Whether this part has the reference-clock flavor of the status
    /// register (LOSREF, SMBus timeout and LOL in register 0x0C).
    fn reference_family(&self) -> bool {
        matches!(self, Variant::Si5340 | Variant::Si5341)
    }

    /// Register and bit of the live loss-of-lock flag.
    pub fn lol_flag(&self) -> (u8, u8) {
        if self.reference_family() {
            (regs::STATUS, bits::LOL_IN_STATUS)
        } else {
            (regs::LOL, bits::LOL)
        }
    }

    /// Register and bit of the sticky loss-of-lock flag.
    pub fn sticky_lol_flag(&self) -> (u8, u8) {
        if self.reference_family() {
            (regs::STICKY_STATUS, bits::LOL_IN_STATUS)
        } else {
            (regs::STICKY_LOL, bits::LOL)
        }
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Variant::Si5340 => "Si5340",
            Variant::Si5341 => "Si5341",
            Variant::Si5342 => "Si5342",
            Variant::Si5344 => "Si5344",
            Variant::Si5345 => "Si5345",
        };
        f.write_str(name)
    }
}

/// Decoded status flags. Flags a variant does not have are `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Status {
    pub sysincal: bool,
    pub losxaxb: bool,
    pub losref: Option<bool>,
    pub smbus_timeout: Option<bool>,
    pub lol: bool,
    /// One bit per input, IN0 in bit 0, FB_IN in bit 3.
    pub losin: u8,
}

impl Status {
    fn decode(variant: Variant, status: u8, los: u8, lol_reg: u8) -> Self {
        let (_, lol_bit) = variant.lol_flag();
        let reference = variant.reference_family();
        Self {
            sysincal: status & bits::SYSINCAL != 0,
            losxaxb: status & bits::LOSXAXB != 0,
            losref: reference.then_some(status & bits::LOSREF != 0),
            smbus_timeout: reference.then_some(status & bits::SMBUS_TIMEOUT != 0),
            lol: lol_reg & lol_bit != 0,
            losin: los & bits::LOSIN,
        }
    }

    /// Locked, calibrated, crystal present, every input present.
    pub fn is_healthy(&self) -> bool {
        !self.sysincal
            && !self.losxaxb
            && !self.lol
            && self.losin == 0
            && self.losref != Some(true)
    }
}

/// One bus transaction or pause of a programming run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlannedStep {
    Write { line: usize, bytes: Vec<u8> },
    Delay { line: usize, duration: Duration },
}

impl fmt::Display for PlannedStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlannedStep::Write { line, bytes } => write!(f, "{:>5}: write {:02x?}", line, bytes),
            PlannedStep::Delay { line, duration } => {
                write!(f, "{:>5}: delay {} ms", line, duration.as_millis())
            }
        }
    }
}

/// Expand a register map into bus transactions.
///
/// A two-value entry is `(address, data)` with a 16-bit address: it becomes a
/// page write followed by an offset write. Any other entry is sent as-is,
/// one byte per value, and must fit in one transaction. Nothing is planned if
/// any entry does not fit.
pub fn plan(map: &RegisterMap) -> Result<Vec<PlannedStep>> {
    let mut steps = Vec::new();

    for item in map.items() {
        match item {
            RegisterMapItem::Delay { line, duration } => steps.push(PlannedStep::Delay {
                line: *line,
                duration: *duration,
            }),
            RegisterMapItem::Write { line, values } => {
                let line = *line;
                let invalid = |reason: String| Error::Program {
                    file: map.file().to_string(),
                    line,
                    payload: Vec::new(),
                    source: Box::new(HwError::InvalidParameter(reason).into()),
                };
                match values.as_slice() {
                    &[address, data] => {
                        let address = u16::try_from(address).map_err(|_| {
                            invalid(format!("address 0x{:x} wider than 16 bits", address))
                        })?;
                        let data = u8::try_from(data)
                            .map_err(|_| invalid(format!("data 0x{:x} wider than 8 bits", data)))?;
                        let [page, offset] = address.to_be_bytes();
                        steps.push(PlannedStep::Write {
                            line,
                            bytes: vec![protocol::PAGE, page],
                        });
                        steps.push(PlannedStep::Write {
                            line,
                            bytes: vec![offset, data],
                        });
                    }
                    raw => {
                        if raw.len() > protocol::MAX_WRITE_DATA + 1 {
                            return Err(invalid(format!(
                                "{} values exceed one register byte and {} data bytes",
                                raw.len(),
                                protocol::MAX_WRITE_DATA
                            )));
                        }
                        let bytes = raw
                            .iter()
                            .map(|&v| {
                                u8::try_from(v)
                                    .map_err(|_| invalid(format!("value 0x{:x} wider than 8 bits", v)))
                            })
                            .collect::<Result<Vec<u8>>>()?;
                        steps.push(PlannedStep::Write { line, bytes });
                    }
                }
            }
        }
    }

    Ok(steps)
}

pub struct Si53xx<I> {
    device: Device<I>,
    variant: Variant,
}

impl<I: I2c> Si53xx<I> {
    pub fn new(
        name: impl Into<String>,
        bus: SharedBus<I>,
        endpoint: Endpoint,
        variant: Variant,
    ) -> Self {
        let limits = AccessLimits::new(0x00..=0xFF, 0..=protocol::MAX_WRITE_DATA);
        Self {
            device: Device::new(name, bus, endpoint, limits, protocol::register_name),
            variant,
        }
    }

    pub fn device(&self) -> &Device<I> {
        &self.device
    }

    pub fn variant(&self) -> Variant {
        self.variant
    }

    pub async fn route_state(&self) -> RouteState {
        self.device.route_state().await
    }

    /// Read one page 0 status register, selecting page 0 first.
    pub async fn read_register(&mut self, reg: u8) -> Result<u8> {
        if !protocol::STATUS_REGS.contains(&reg) {
            let reason = format!(
                "register 0x{:02x} outside status range 0x{:02x}..=0x{:02x}",
                reg,
                protocol::STATUS_REGS.start(),
                protocol::STATUS_REGS.end()
            );
            return Err(self.device.reject(Op::Read, Some(reg), &[], reason).into());
        }
        self.device.write(protocol::PAGE, &[0x00]).await?;
        Ok(self.device.read(reg, 1).await?[0])
    }

    pub async fn status(&mut self) -> Result<Status> {
        let status = self.read_register(regs::STATUS).await?;
        let los = self.read_register(regs::LOS).await?;
        let (lol_reg, _) = self.variant.lol_flag();
        let lol = if lol_reg == regs::STATUS {
            status
        } else {
            self.read_register(lol_reg).await?
        };
        Ok(Status::decode(self.variant, status, los, lol))
    }

    /// Latched flags; they stay set until cleared by writing zero.
    pub async fn sticky_status(&mut self) -> Result<Status> {
        let status = self.read_register(regs::STICKY_STATUS).await?;
        let los = self.read_register(regs::STICKY_LOS).await?;
        let (lol_reg, _) = self.variant.sticky_lol_flag();
        let lol = if lol_reg == regs::STICKY_STATUS {
            status
        } else {
            self.read_register(lol_reg).await?
        };
        Ok(Status::decode(self.variant, status, los, lol))
    }

    /// Program a whole register map, stopping at the first failed write.
    pub async fn program(&mut self, map: &RegisterMap) -> Result<()> {
        let steps = plan(map)?;
        let writes = steps
            .iter()
            .filter(|s| matches!(s, PlannedStep::Write { .. }))
            .count();
        debug!(
            device = self.device.name(),
            variant = %self.variant,
            file = map.file(),
            writes,
            "Programming clock"
        );

        for step in steps {
            match step {
                PlannedStep::Delay { duration, .. } => tokio::time::sleep(duration).await,
                PlannedStep::Write { line, bytes } => {
                    let Some((&register, data)) = bytes.split_first() else {
                        continue;
                    };
                    if let Err(e) = self.device.write(register, data).await {
                        return Err(Error::Program {
                            file: map.file().to_string(),
                            line,
                            payload: bytes,
                            source: Box::new(e.into()),
                        });
                    }
                }
            }
        }

        info!(
            device = self.device.name(),
            variant = %self.variant,
            file = map.file(),
            "Clock programmed"
        );
        Ok(())
    }

    pub async fn program_file(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let map = RegisterMap::load(path).await?;
        self.program(&map).await
    }
}
