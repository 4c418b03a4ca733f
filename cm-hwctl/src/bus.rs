//! Physical buses and the state shared by everything on them.
//!
//! A [`SharedBus`] is a cheap, cloneable handle to one physical I2C bus. All
//! drivers on the bus hold a clone, and every transaction goes through the
//! same `tokio::sync::Mutex`. The mutex also guards the selection state of
//! every multiplexer on the bus, so checking a route and using it happen
//! under one lock.
//!
//! Muxes may be nested. Each mux driver records the route it is reached
//! through, and a route only counts as connected when every mux between the
//! bus and the device is on the right channel.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, MutexGuard};

use crate::{device::Route, hw_trait::I2c};

/// Ordinal of a physical I2C bus as exposed by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BusId(u8);

impl BusId {
    pub const fn new(id: u8) -> Self {
        Self(id)
    }

    pub const fn index(self) -> u8 {
        self.0
    }
}

impl fmt::Display for BusId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What the host last made a multiplexer do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MuxState {
    /// Never written, or the last control write failed.
    #[default]
    Unknown,
    /// All downstream channels disconnected.
    Disabled,
    /// Exactly this downstream channel connected.
    Selected(u8),
}

impl fmt::Display for MuxState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MuxState::Unknown => write!(f, "in an unknown state"),
            MuxState::Disabled => write!(f, "disabled"),
            MuxState::Selected(ch) => write!(f, "on channel {}", ch),
        }
    }
}

/// Everything owned by one physical bus: the transport and the mux cache.
pub struct BusState<I> {
    i2c: I,
    muxes: HashMap<u8, MuxState>,
    parents: HashMap<u8, Route>,
}

impl<I: I2c> BusState<I> {
    pub fn i2c(&mut self) -> &mut I {
        &mut self.i2c
    }

    /// Cached state of the mux at `address` on this bus.
    pub fn mux_state(&self, address: u8) -> MuxState {
        self.muxes.get(&address).copied().unwrap_or_default()
    }

    pub(crate) fn set_mux_state(&mut self, address: u8, state: MuxState) {
        self.muxes.insert(address, state);
    }

    /// Record the route the mux at `address` is reached through, if any.
    pub(crate) fn set_mux_parent(&mut self, address: u8, parent: Option<Route>) {
        match parent {
            Some(route) => self.parents.insert(address, route),
            None => self.parents.remove(&address),
        };
    }

    /// The first mux on the path to `route` that does not connect it, with
    /// its cached state. Walks from the device's own mux towards the bus.
    pub fn broken_hop(&self, route: Route) -> Option<(Route, MuxState)> {
        let mut hop = route;
        // One more step than there are parents means the chain loops.
        for _ in 0..=self.parents.len() {
            let actual = self.mux_state(hop.mux);
            if actual != MuxState::Selected(hop.channel) {
                return Some((hop, actual));
            }
            match self.parents.get(&hop.mux) {
                Some(&parent) => hop = parent,
                None => return None,
            }
        }
        Some((hop, self.mux_state(hop.mux)))
    }
}

/// Cloneable handle to a physical bus.
pub struct SharedBus<I> {
    id: BusId,
    inner: Arc<Mutex<BusState<I>>>,
}

impl<I> Clone for SharedBus<I> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<I: I2c> SharedBus<I> {
    pub fn new(id: BusId, i2c: I) -> Self {
        Self {
            id,
            inner: Arc::new(Mutex::new(BusState {
                i2c,
                muxes: HashMap::new(),
                parents: HashMap::new(),
            })),
        }
    }

    pub fn id(&self) -> BusId {
        self.id
    }

    /// Take exclusive ownership of the bus until the guard is dropped.
    pub async fn lock(&self) -> MutexGuard<'_, BusState<I>> {
        self.inner.lock().await
    }

    /// Cached state of the mux at `address`, without touching the bus.
    pub async fn mux_state(&self, address: u8) -> MuxState {
        self.inner.lock().await.mux_state(address)
    }
}

impl<I> fmt::Debug for SharedBus<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedBus").field("id", &self.id).finish()
    }
}
