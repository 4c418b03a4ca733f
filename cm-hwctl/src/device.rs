//! Validated register access shared by every chip family.
//!
//! A [`Device`] knows one chip's bus, address, optional mux route, the range
//! of registers and transfer lengths the chip accepts, and a table mapping
//! register codes to names for tracing. Chip drivers in [`crate::peripheral`]
//! wrap a `Device` and add meaning to the bytes.
//!
//! Every access is a single attempt. Arguments are checked before the bus is
//! locked, a routed device checks its mux before anything is sent, and every
//! failure bumps the device's error counter and is logged with enough context
//! to diagnose it from the log alone.

use std::fmt;
use std::ops::RangeInclusive;

use thiserror::Error;

use crate::{
    bus::{BusId, BusState, SharedBus},
    error::ErrorKind,
    hw_trait::{HwError, I2c},
    tracing::prelude::*,
};

/// Mux channel a device is reached through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route {
    /// Address of the mux on the same bus.
    pub mux: u8,
    pub channel: u8,
}

/// Resolved location of a chip on its bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Endpoint {
    address: u8,
    route: Option<Route>,
}

impl Endpoint {
    /// A chip wired directly to the bus.
    pub fn new(address: u8) -> Result<Self, HwError> {
        check_address(address)?;
        Ok(Self {
            address,
            route: None,
        })
    }

    /// A chip reached through channel `channel` of the mux at `mux`.
    pub fn routed(address: u8, mux: u8, channel: u8) -> Result<Self, HwError> {
        check_address(address)?;
        check_address(mux)?;
        if mux == address {
            return Err(HwError::InvalidParameter(format!(
                "device 0x{:02x} cannot sit behind itself",
                address
            )));
        }
        Ok(Self {
            address,
            route: Some(Route { mux, channel }),
        })
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    pub fn route(&self) -> Option<Route> {
        self.route
    }
}

fn check_address(address: u8) -> Result<(), HwError> {
    if address > 0x7f {
        return Err(HwError::InvalidParameter(format!(
            "0x{:02x} is not a 7-bit I2C address",
            address
        )));
    }
    Ok(())
}

/// Register codes and transfer lengths a chip accepts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessLimits {
    pub registers: RangeInclusive<u8>,
    pub lengths: RangeInclusive<usize>,
}

impl AccessLimits {
    pub const fn new(registers: RangeInclusive<u8>, lengths: RangeInclusive<usize>) -> Self {
        Self { registers, lengths }
    }
}

/// Maps a register or command code to a human-readable name.
pub type RegisterNames = fn(u8) -> &'static str;

/// Where a routed device currently stands relative to its mux.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteState {
    /// Not behind a mux; always reachable.
    Direct,
    /// Behind a mux that is not on this device's channel.
    Unrouted,
    /// Behind a mux that is on this device's channel.
    Routed(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Read,
    Write,
    Receive,
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Op::Read => "read",
            Op::Write => "write",
            Op::Receive => "receive",
        })
    }
}

/// A failed access, with everything needed to find it on the board.
#[derive(Error, Debug)]
#[error(
    "{device} (bus {bus}, 0x{address:02x}): {op} {} failed: {source}",
    target_label(.register, .command, .payload)
)]
pub struct DeviceError {
    pub device: String,
    pub bus: BusId,
    pub address: u8,
    pub op: Op,
    pub register: Option<u8>,
    pub command: &'static str,
    pub payload: Vec<u8>,
    #[source]
    pub source: HwError,
}

impl DeviceError {
    pub fn kind(&self) -> ErrorKind {
        self.source.kind()
    }
}

fn target_label(register: &Option<u8>, command: &str, payload: &[u8]) -> String {
    let mut label = match register {
        Some(reg) => format!("0x{:02x} ({})", reg, command),
        None => command.to_string(),
    };
    if !payload.is_empty() {
        label.push_str(&format!(" {:02x?}", payload));
    }
    label
}

fn register_label(register: Option<u8>) -> String {
    register.map_or_else(|| "-".to_string(), |r| format!("{:#04x}", r))
}

/// What to put on the bus.
enum Transfer<'a> {
    Read { register: u8, len: usize },
    Write { register: u8, data: &'a [u8] },
    Receive { len: usize },
}

impl Transfer<'_> {
    fn op(&self) -> Op {
        match self {
            Transfer::Read { .. } => Op::Read,
            Transfer::Write { .. } => Op::Write,
            Transfer::Receive { .. } => Op::Receive,
        }
    }

    fn register(&self) -> Option<u8> {
        match *self {
            Transfer::Read { register, .. } | Transfer::Write { register, .. } => Some(register),
            Transfer::Receive { .. } => None,
        }
    }

    fn payload(&self) -> &[u8] {
        match self {
            Transfer::Write { data, .. } => data,
            _ => &[],
        }
    }

    fn len(&self) -> usize {
        match *self {
            Transfer::Read { len, .. } | Transfer::Receive { len } => len,
            Transfer::Write { data, .. } => data.len(),
        }
    }
}

/// One chip on one bus.
pub struct Device<I> {
    name: String,
    bus: SharedBus<I>,
    endpoint: Endpoint,
    limits: AccessLimits,
    names: RegisterNames,
    errors: u64,
}

impl<I: I2c> Device<I> {
    pub fn new(
        name: impl Into<String>,
        bus: SharedBus<I>,
        endpoint: Endpoint,
        limits: AccessLimits,
        names: RegisterNames,
    ) -> Self {
        Self {
            name: name.into(),
            bus,
            endpoint,
            limits,
            names,
            errors: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bus(&self) -> &SharedBus<I> {
        &self.bus
    }

    pub fn endpoint(&self) -> Endpoint {
        self.endpoint
    }

    pub fn address(&self) -> u8 {
        self.endpoint.address
    }

    /// Failed operations since this device was created.
    pub fn error_count(&self) -> u64 {
        self.errors
    }

    pub fn command_name(&self, register: u8) -> &'static str {
        (self.names)(register)
    }

    /// Read `len` bytes from `register`, using a repeated start.
    pub async fn read(&mut self, register: u8, len: usize) -> Result<Vec<u8>, DeviceError> {
        self.transfer(Transfer::Read { register, len }, |_, _| {})
            .await
    }

    /// Write `[register, data...]` as one transaction.
    pub async fn write(&mut self, register: u8, data: &[u8]) -> Result<(), DeviceError> {
        self.transfer(Transfer::Write { register, data }, |_, _| {})
            .await
            .map(|_| ())
    }

    /// Plain read without a register pointer, for chips that have none.
    pub async fn receive(&mut self, len: usize) -> Result<Vec<u8>, DeviceError> {
        self.transfer(Transfer::Receive { len }, |_, _| {}).await
    }

    /// Write, then update bus state under the same lock. `after` sees the
    /// outcome: `Some(&[])` on success, `None` on failure.
    pub(crate) async fn write_then<F>(
        &mut self,
        register: u8,
        data: &[u8],
        after: F,
    ) -> Result<(), DeviceError>
    where
        F: FnOnce(&mut BusState<I>, Option<&[u8]>) + Send,
    {
        self.transfer(Transfer::Write { register, data }, after)
            .await
            .map(|_| ())
    }

    /// Receive, then update bus state from the bytes under the same lock.
    pub(crate) async fn receive_then<F>(
        &mut self,
        len: usize,
        after: F,
    ) -> Result<Vec<u8>, DeviceError>
    where
        F: FnOnce(&mut BusState<I>, Option<&[u8]>) + Send,
    {
        self.transfer(Transfer::Receive { len }, after).await
    }

    /// Record a failure that was caught before reaching the bus.
    pub fn reject(
        &mut self,
        op: Op,
        register: Option<u8>,
        payload: &[u8],
        reason: impl Into<String>,
    ) -> DeviceError {
        self.fail(op, register, payload, HwError::InvalidParameter(reason.into()))
    }

    /// Whether the muxes in front of this device currently connect it.
    pub async fn route_state(&self) -> RouteState {
        match self.endpoint.route {
            None => RouteState::Direct,
            Some(route) => match self.bus.lock().await.broken_hop(route) {
                None => RouteState::Routed(route.channel),
                Some(_) => RouteState::Unrouted,
            },
        }
    }

    async fn transfer<F>(
        &mut self,
        transfer: Transfer<'_>,
        after: F,
    ) -> Result<Vec<u8>, DeviceError>
    where
        F: FnOnce(&mut BusState<I>, Option<&[u8]>) + Send,
    {
        let op = transfer.op();
        let register = transfer.register();

        if let Some(reg) = register {
            if !self.limits.registers.contains(&reg) {
                let reason = format!(
                    "register 0x{:02x} ({}) outside 0x{:02x}..=0x{:02x}",
                    reg,
                    self.command_name(reg),
                    self.limits.registers.start(),
                    self.limits.registers.end()
                );
                return Err(self.reject(op, register, transfer.payload(), reason));
            }
        }
        if !self.limits.lengths.contains(&transfer.len()) {
            let reason = format!(
                "{} length {} outside {}..={}",
                op,
                transfer.len(),
                self.limits.lengths.start(),
                self.limits.lengths.end()
            );
            return Err(self.reject(op, register, transfer.payload(), reason));
        }

        let address = self.endpoint.address;
        let bus = self.bus.clone();
        let mut state = bus.lock().await;

        if let Some((hop, actual)) = self.endpoint.route.and_then(|r| state.broken_hop(r)) {
            let source = HwError::StaleRoute {
                mux: hop.mux,
                expected: hop.channel,
                actual,
            };
            return Err(self.fail(op, register, transfer.payload(), source));
        }

        let result = match transfer {
            Transfer::Read { register, len } => {
                let mut buf = vec![0u8; len];
                state
                    .i2c()
                    .write_read(address, &[register], &mut buf)
                    .await
                    .map(|_| buf)
            }
            Transfer::Write { register, data } => {
                let mut frame = Vec::with_capacity(data.len() + 1);
                frame.push(register);
                frame.extend_from_slice(data);
                state.i2c().write(address, &frame).await.map(|_| Vec::new())
            }
            Transfer::Receive { len } => {
                let mut buf = vec![0u8; len];
                state.i2c().read(address, &mut buf).await.map(|_| buf)
            }
        };

        match result {
            Ok(data) => {
                after(&mut *state, Some(&data));
                drop(state);
                let shown = if data.is_empty() {
                    transfer.payload()
                } else {
                    &data[..]
                };
                trace!(
                    device = %self.name,
                    bus = %self.bus.id(),
                    address = format!("{:#04x}", address),
                    register = register_label(register),
                    command = register.map_or("-", |r| self.command_name(r)),
                    data = ?shown,
                    "I2C {}",
                    op
                );
                Ok(data)
            }
            Err(source) => {
                after(&mut *state, None);
                drop(state);
                Err(self.fail(op, register, transfer.payload(), source))
            }
        }
    }

    /// Record a failure found after the bus access, e.g. a bad checksum.
    pub(crate) fn fail(
        &mut self,
        op: Op,
        register: Option<u8>,
        payload: &[u8],
        source: HwError,
    ) -> DeviceError {
        self.errors += 1;
        let command = register.map_or("-", |r| self.command_name(r));
        error!(
            device = %self.name,
            bus = %self.bus.id(),
            address = format!("{:#04x}", self.endpoint.address),
            register = register_label(register),
            command,
            data = ?payload,
            errors = self.errors,
            error = %source,
            "I2C {} failed",
            op
        );
        DeviceError {
            device: self.name.clone(),
            bus: self.bus.id(),
            address: self.endpoint.address,
            op,
            register,
            command,
            payload: payload.to_vec(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::MuxState;
    use crate::sim::{Call, SimBus};

    fn names(code: u8) -> &'static str {
        match code {
            0x05 => "temperature",
            _ => "unknown",
        }
    }

    fn device(sim: &SimBus, endpoint: Endpoint) -> Device<SimBus> {
        let bus = SharedBus::new(BusId::new(1), sim.clone());
        Device::new(
            "U7",
            bus,
            endpoint,
            AccessLimits::new(0x00..=0xfd, 1..=2),
            names,
        )
    }

    #[tokio::test]
    async fn read_uses_repeated_start() {
        let sim = SimBus::new();
        sim.add_commands(0x18, None, None, &[]);
        sim.set(0x18, None, 0, 0x05, &[0xc1, 0x90]);
        let mut dev = device(&sim, Endpoint::new(0x18).unwrap());

        let data = dev.read(0x05, 2).await.unwrap();

        assert_eq!(data, vec![0xc1, 0x90]);
        assert_eq!(
            sim.calls(),
            vec![Call::WriteRead {
                addr: 0x18,
                write: vec![0x05],
                len: 2
            }]
        );
    }

    #[tokio::test]
    async fn write_is_one_contiguous_frame() {
        let sim = SimBus::new();
        sim.add_commands(0x18, None, None, &[]);
        let mut dev = device(&sim, Endpoint::new(0x18).unwrap());

        dev.write(0x02, &[0x01, 0x40]).await.unwrap();

        assert_eq!(
            sim.calls(),
            vec![Call::Write {
                addr: 0x18,
                data: vec![0x02, 0x01, 0x40]
            }]
        );
    }

    #[test_case::test_case(0; "zero")]
    #[test_case::test_case(3; "too long")]
    #[tokio::test]
    async fn bad_length_never_reaches_the_bus(len: usize) {
        let sim = SimBus::new();
        sim.add_commands(0x18, None, None, &[]);
        let mut dev = device(&sim, Endpoint::new(0x18).unwrap());

        let err = dev.read(0x05, len).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::InvalidParameter);
        assert!(sim.calls().is_empty());
        assert_eq!(dev.error_count(), 1);
    }

    #[tokio::test]
    async fn reserved_register_is_rejected() {
        let sim = SimBus::new();
        let mut dev = device(&sim, Endpoint::new(0x18).unwrap());

        let err = dev.write(0xfe, &[0x00]).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::InvalidParameter);
        assert_eq!(err.register, Some(0xfe));
        assert_eq!(err.payload, vec![0x00]);
        assert!(sim.calls().is_empty());
    }

    #[tokio::test]
    async fn transport_failure_is_counted_and_described() {
        let sim = SimBus::new();
        let mut dev = device(&sim, Endpoint::new(0x18).unwrap());

        // Nothing answers at 0x18.
        let err = dev.write(0x05, &[0x12]).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TransportFailure);
        let _ = dev.read(0x05, 1).await.unwrap_err();

        assert_eq!(dev.error_count(), 2);
        assert_eq!(
            err.to_string(),
            "U7 (bus 1, 0x18): write 0x05 (temperature) [12] failed: \
             No acknowledgment from device at address 0x18"
        );
    }

    #[tokio::test]
    async fn short_read_is_a_transport_failure() {
        let sim = SimBus::new();
        sim.add_commands(0x18, None, None, &[]);
        sim.set(0x18, None, 0, 0x05, &[0xc1]);
        let mut dev = device(&sim, Endpoint::new(0x18).unwrap());

        let err = dev.read(0x05, 2).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::TransportFailure);
        assert_eq!(dev.error_count(), 1);
    }

    #[tokio::test]
    async fn routed_device_checks_its_mux_first() {
        let sim = SimBus::new();
        sim.add_mux(0x70, 0x08);
        sim.add_commands(0x68, Some((0x70, 2)), None, &[]);
        let mut dev = device(&sim, Endpoint::routed(0x68, 0x70, 2).unwrap());

        let err = dev.read(0x05, 1).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::StaleRoute);
        assert!(sim.calls().is_empty());
        assert_eq!(dev.route_state().await, RouteState::Unrouted);

        dev.bus()
            .lock()
            .await
            .set_mux_state(0x70, MuxState::Selected(2));
        assert_eq!(dev.route_state().await, RouteState::Routed(2));
    }

    #[test]
    fn endpoints_must_be_seven_bit() {
        assert!(Endpoint::new(0x80).is_err());
        assert!(Endpoint::routed(0x68, 0x70, 1).is_ok());
        assert!(Endpoint::routed(0x70, 0x70, 1).is_err());
    }

    #[tokio::test]
    async fn receive_is_a_plain_read() {
        let sim = SimBus::new();
        sim.add_bytes(0x18, None, 0xff);
        sim.set(0x18, None, 0, 0x00, &[0x5a]);
        let mut dev = device(&sim, Endpoint::new(0x18).unwrap());

        let data = dev.receive(1).await.unwrap();

        assert_eq!(data, vec![0x5a]);
        assert_eq!(sim.calls(), vec![Call::Read { addr: 0x18, len: 1 }]);
    }

    #[tokio::test]
    async fn parent_mux_switching_away_strands_nested_devices() {
        let sim = SimBus::new();
        sim.add_mux(0x70, 0x08);
        sim.add_mux_behind(0x71, 0x08, (0x70, 0));
        sim.add_commands(0x68, Some((0x71, 2)), None, &[]);
        let mut dev = device(&sim, Endpoint::routed(0x68, 0x71, 2).unwrap());
        {
            let mut state = dev.bus().lock().await;
            state.set_mux_parent(
                0x71,
                Some(Route {
                    mux: 0x70,
                    channel: 0,
                }),
            );
            state.set_mux_state(0x70, MuxState::Selected(1));
            state.set_mux_state(0x71, MuxState::Selected(2));
        }

        let err = dev.read(0x05, 1).await.unwrap_err();

        assert!(matches!(
            err.source,
            HwError::StaleRoute {
                mux: 0x70,
                expected: 0,
                actual: MuxState::Selected(1)
            }
        ));
        assert!(sim.calls().is_empty());
        assert_eq!(dev.route_state().await, RouteState::Unrouted);
    }
}
