//! PCA9547 I2C bus multiplexer driver.
//!
//! The PCA9547 connects one of eight downstream segments to its upstream bus.
//! It has a single control register and no register pointer: writing one byte
//! sets it, reading one byte returns it. Bit 3 enables the switch and bits 2:0
//! pick the channel.
//!
//! The driver records each successful selection in the bus state so that
//! routed devices can check they are actually connected before they talk.
//! A mux behind another mux also records its own route, so devices further
//! down are cut off when an upstream mux switches away.
//!
//! Datasheet: <https://www.nxp.com/docs/en/data-sheet/PCA9547.pdf>

use crate::{
    bus::{MuxState, SharedBus},
    device::{AccessLimits, Device, Endpoint, Op, RouteState},
    error::Result,
    hw_trait::{HwError, I2c},
    tracing::prelude::*,
};

pub mod protocol {
    /// Enable bit of the control byte.
    pub const ENABLE: u8 = 0x08;

    /// Number of downstream channels.
    pub const CHANNELS: u8 = 8;

    pub fn register_name(_control: u8) -> &'static str {
        "control"
    }
}

/// Channel count and enable bit of a mux's control byte.
///
/// Channel numbers occupy the bits below the enable bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MuxLayout {
    channels: u8,
    enable: u8,
}

impl MuxLayout {
    pub const PCA9547: Self = Self {
        channels: protocol::CHANNELS,
        enable: protocol::ENABLE,
    };

    pub fn new(channels: u8, enable: u8) -> std::result::Result<Self, HwError> {
        if !enable.is_power_of_two() || channels == 0 || channels > enable {
            return Err(HwError::InvalidParameter(format!(
                "{} channels do not fit below enable bit 0x{:02x}",
                channels, enable
            )));
        }
        Ok(Self { channels, enable })
    }

    pub fn channels(&self) -> u8 {
        self.channels
    }

    pub fn control_byte(&self, channel: u8) -> u8 {
        channel | self.enable
    }

    /// Selected channel encoded in `control`, or `None` if disabled.
    pub fn decode(&self, control: u8) -> Option<u8> {
        (control & self.enable != 0).then_some(control & (self.enable - 1))
    }
}

impl Default for MuxLayout {
    fn default() -> Self {
        Self::PCA9547
    }
}

pub struct Pca9547<I> {
    device: Device<I>,
    layout: MuxLayout,
}

impl<I: I2c> Pca9547<I> {
    pub fn new(name: impl Into<String>, bus: SharedBus<I>, endpoint: Endpoint) -> Self {
        Self::with_layout(name, bus, endpoint, MuxLayout::PCA9547)
    }

    pub fn with_layout(
        name: impl Into<String>,
        bus: SharedBus<I>,
        endpoint: Endpoint,
        layout: MuxLayout,
    ) -> Self {
        let limits = AccessLimits::new(0x00..=0xff, 0..=1);
        Self {
            device: Device::new(name, bus, endpoint, limits, protocol::register_name),
            layout,
        }
    }

    pub fn device(&self) -> &Device<I> {
        &self.device
    }

    /// Connect downstream channel `channel`, disconnecting any other.
    pub async fn select_channel(&mut self, channel: u8) -> Result<()> {
        if channel >= self.layout.channels {
            let reason = format!(
                "channel {} out of range 0..{}",
                channel, self.layout.channels
            );
            return Err(self.device.reject(Op::Write, None, &[channel], reason).into());
        }

        let mux = self.device.address();
        let parent = self.device.endpoint().route();
        let control = self.layout.control_byte(channel);
        self.device
            .write_then(control, &[], |state, outcome| {
                let new = match outcome {
                    Some(_) => MuxState::Selected(channel),
                    None => MuxState::Unknown,
                };
                state.set_mux_state(mux, new);
                state.set_mux_parent(mux, parent);
            })
            .await?;

        trace!(mux = self.device.name(), channel, "Mux channel selected");
        Ok(())
    }

    /// Disconnect every downstream channel.
    pub async fn disable(&mut self) -> Result<()> {
        let mux = self.device.address();
        let parent = self.device.endpoint().route();
        self.device
            .write_then(0x00, &[], |state, outcome| {
                let new = match outcome {
                    Some(_) => MuxState::Disabled,
                    None => MuxState::Unknown,
                };
                state.set_mux_state(mux, new);
                state.set_mux_parent(mux, parent);
            })
            .await?;

        trace!(mux = self.device.name(), "Mux disabled");
        Ok(())
    }

    /// Read back the control register. `None` means no channel is connected.
    ///
    /// The cached selection is refreshed from what the chip reports.
    pub async fn get_channel(&mut self) -> Result<Option<u8>> {
        let mux = self.device.address();
        let parent = self.device.endpoint().route();
        let layout = self.layout;
        let data = self
            .device
            .receive_then(1, |state, outcome| {
                if let Some(&[control]) = outcome {
                    let new = match layout.decode(control) {
                        Some(ch) => MuxState::Selected(ch),
                        None => MuxState::Disabled,
                    };
                    state.set_mux_state(mux, new);
                    state.set_mux_parent(mux, parent);
                }
            })
            .await?;

        Ok(self.layout.decode(data[0]))
    }

    /// Cached selection, without touching the bus.
    pub async fn state(&self) -> MuxState {
        self.device.bus().mux_state(self.device.address()).await
    }

    /// Whether this mux is itself reachable, when it sits behind another mux.
    pub async fn route_state(&self) -> RouteState {
        self.device.route_state().await
    }
}
