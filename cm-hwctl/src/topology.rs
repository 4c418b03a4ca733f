//! Board topology: which chip sits where.
//!
//! The topology is data, not code. A JSON document lists every chip with its
//! bus, address and, for chips behind a multiplexer, the mux address and
//! channel. A mux may itself sit behind another mux. Loading validates the
//! address-sharing rule: two chips may share a bus and address only when they
//! hang off different channels of the same mux.
//!
//! ```json
//! { "devices": [
//!     { "name": "IC55", "kind": "pca9547", "bus": 3, "address": 112 },
//!     { "name": "IC60", "kind": "si53xx", "bus": 3, "address": 116,
//!       "mux": { "address": 112, "channel": 0 } }
//! ] }
//! ```

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{bus::BusId, device::Endpoint, error::ErrorKind, tracing::prelude::*};

#[derive(Error, Debug)]
pub enum TopologyError {
    #[error("cannot read topology {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse topology: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("duplicate device name {0:?}")]
    DuplicateName(String),

    #[error("{name}: 0x{address:02x} is not a 7-bit address")]
    InvalidAddress { name: String, address: u8 },

    #[error("{name}: mux 0x{mux:02x} is not a multiplexer on bus {bus}")]
    UnknownMux { name: String, bus: BusId, mux: u8 },

    #[error("{first} and {second} both answer at bus {bus}, address 0x{address:02x}")]
    Collision {
        first: String,
        second: String,
        bus: BusId,
        address: u8,
    },

    #[error("no device named {0:?}")]
    UnknownDevice(String),
}

impl TopologyError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TopologyError::Io { .. } | TopologyError::Parse(_) => ErrorKind::ParseFailure,
            _ => ErrorKind::InvalidParameter,
        }
    }
}

/// Chip family, selecting the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChipKind {
    Ds28cm00,
    FireFly,
    Ltc2977,
    Ltm4675,
    Ltm4700,
    Mcp9808,
    Mcp9903,
    Pca9547,
    Si53xx,
    Tca6424a,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MuxRoute {
    pub address: u8,
    pub channel: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSpec {
    pub name: String,
    pub kind: ChipKind,
    pub bus: BusId,
    pub address: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mux: Option<MuxRoute>,
}

impl DeviceSpec {
    /// Whether two chips would both answer the same address.
    fn collides_with(&self, other: &DeviceSpec) -> bool {
        if self.bus != other.bus || self.address != other.address {
            return false;
        }
        match (self.mux, other.mux) {
            (Some(a), Some(b)) => a.address != b.address || a.channel == b.channel,
            _ => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Topology {
    devices: Vec<DeviceSpec>,
}

impl Topology {
    pub fn new(devices: Vec<DeviceSpec>) -> Result<Self, TopologyError> {
        let topology = Self { devices };
        topology.validate()?;
        Ok(topology)
    }

    pub fn from_json(text: &str) -> Result<Self, TopologyError> {
        let topology: Topology = serde_json::from_str(text)?;
        topology.validate()?;
        debug!(devices = topology.devices.len(), "Topology loaded");
        Ok(topology)
    }

    pub async fn load(path: impl AsRef<Path>) -> Result<Self, TopologyError> {
        let path = path.as_ref();
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| TopologyError::Io {
                path: path.display().to_string(),
                source,
            })?;
        Self::from_json(&text)
    }

    pub fn devices(&self) -> &[DeviceSpec] {
        &self.devices
    }

    pub fn device(&self, name: &str) -> Result<&DeviceSpec, TopologyError> {
        self.devices
            .iter()
            .find(|d| d.name == name)
            .ok_or_else(|| TopologyError::UnknownDevice(name.to_string()))
    }

    /// Bus and endpoint of the named chip.
    pub fn endpoint(&self, name: &str) -> Result<(BusId, Endpoint), TopologyError> {
        let spec = self.device(name)?;
        let endpoint = match spec.mux {
            None => Endpoint::new(spec.address),
            Some(mux) => Endpoint::routed(spec.address, mux.address, mux.channel),
        }
        .map_err(|_| TopologyError::InvalidAddress {
            name: spec.name.clone(),
            address: spec.address,
        })?;
        Ok((spec.bus, endpoint))
    }

    fn validate(&self) -> Result<(), TopologyError> {
        let mut names = HashSet::new();
        for spec in &self.devices {
            if !names.insert(spec.name.as_str()) {
                return Err(TopologyError::DuplicateName(spec.name.clone()));
            }
            let addresses = std::iter::once(spec.address).chain(spec.mux.map(|m| m.address));
            for address in addresses {
                if address > 0x7F {
                    return Err(TopologyError::InvalidAddress {
                        name: spec.name.clone(),
                        address,
                    });
                }
            }
            if let Some(mux) = spec.mux {
                let known = self.devices.iter().any(|d| {
                    d.kind == ChipKind::Pca9547 && d.bus == spec.bus && d.address == mux.address
                });
                if !known {
                    return Err(TopologyError::UnknownMux {
                        name: spec.name.clone(),
                        bus: spec.bus,
                        mux: mux.address,
                    });
                }
            }
        }

        for (i, first) in self.devices.iter().enumerate() {
            if let Some(second) = self.devices[i + 1..].iter().find(|d| first.collides_with(d)) {
                return Err(TopologyError::Collision {
                    first: first.name.clone(),
                    second: second.name.clone(),
                    bus: first.bus,
                    address: first.address,
                });
            }
        }
        Ok(())
    }
}
