//! Simulated I2C bus for unit tests.
//!
//! Models just enough of the board to exercise the drivers: byte register
//! files with an auto-incrementing pointer, command stores with an optional
//! page register (PMBus, Si53xx), and PCA9547-style muxes that decide which
//! routed chips can hear the bus. Every transaction is recorded, and writes
//! can be made to fail by address and first byte.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::hw_trait::{HwError, I2c, I2cError, Result};

/// One transaction as seen on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Write { addr: u8, data: Vec<u8> },
    Read { addr: u8, len: usize },
    WriteRead { addr: u8, write: Vec<u8>, len: usize },
}

enum Registers {
    Bytes {
        mem: [u8; 256],
        pointer: u8,
        mask: u8,
    },
    Commands {
        values: HashMap<(u8, u8), Vec<u8>>,
        page_register: Option<u8>,
        global: Vec<u8>,
        page: u8,
        pointer: u8,
    },
}

struct Chip {
    address: u8,
    route: Option<(u8, u8)>,
    regs: Registers,
}

struct Mux {
    address: u8,
    route: Option<(u8, u8)>,
    enable: u8,
    control: u8,
}

struct Fault {
    addr: u8,
    first_byte: Option<u8>,
}

#[derive(Default)]
struct State {
    chips: Vec<Chip>,
    muxes: Vec<Mux>,
    faults: Vec<Fault>,
    calls: Vec<Call>,
}

/// Cloneable handle; clones share the same simulated board.
#[derive(Clone, Default)]
pub struct SimBus {
    state: Arc<Mutex<State>>,
}

impl SimBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn with<T>(&self, f: impl FnOnce(&mut State) -> T) -> T {
        let mut state = self.state.lock().unwrap();
        f(&mut state)
    }

    /// A chip with 256 byte registers; `mask` is applied to the pointer byte.
    pub fn add_bytes(&self, address: u8, route: Option<(u8, u8)>, mask: u8) {
        self.with(|s| {
            s.chips.push(Chip {
                address,
                route,
                regs: Registers::Bytes {
                    mem: [0; 256],
                    pointer: 0,
                    mask,
                },
            })
        });
    }

    /// A chip whose commands hold whole values. Writes to `page_register`
    /// switch the page; commands in `global` ignore it.
    pub fn add_commands(
        &self,
        address: u8,
        route: Option<(u8, u8)>,
        page_register: Option<u8>,
        global: &[u8],
    ) {
        self.with(|s| {
            s.chips.push(Chip {
                address,
                route,
                regs: Registers::Commands {
                    values: HashMap::new(),
                    page_register,
                    global: global.to_vec(),
                    page: 0,
                    pointer: 0,
                },
            })
        });
    }

    pub fn add_mux(&self, address: u8, enable: u8) {
        self.push_mux(address, None, enable);
    }

    /// A mux hanging off a channel of another mux.
    pub fn add_mux_behind(&self, address: u8, enable: u8, route: (u8, u8)) {
        self.push_mux(address, Some(route), enable);
    }

    fn push_mux(&self, address: u8, route: Option<(u8, u8)>, enable: u8) {
        self.with(|s| {
            s.muxes.push(Mux {
                address,
                route,
                enable,
                control: 0,
            })
        });
    }

    /// Make writes to `addr` starting with `first_byte` (any, if `None`) NAK.
    pub fn fail_writes(&self, addr: u8, first_byte: Option<u8>) {
        self.with(|s| s.faults.push(Fault { addr, first_byte }));
    }

    pub fn calls(&self) -> Vec<Call> {
        self.with(|s| s.calls.clone())
    }

    pub fn clear_calls(&self) {
        self.with(|s| s.calls.clear());
    }

    /// Writes only, as `(addr, bytes)`.
    pub fn writes(&self) -> Vec<(u8, Vec<u8>)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Write { addr, data } => Some((addr, data)),
                _ => None,
            })
            .collect()
    }

    /// Store a command value directly.
    pub fn set(&self, address: u8, route: Option<(u8, u8)>, page: u8, command: u8, value: &[u8]) {
        self.with(|s| {
            let chip = find_chip(s, address, route);
            match &mut chip.regs {
                Registers::Commands { values, .. } => {
                    values.insert((page, command), value.to_vec());
                }
                Registers::Bytes { mem, .. } => {
                    for (i, b) in value.iter().enumerate() {
                        mem[(command as usize + i) & 0xff] = *b;
                    }
                }
            }
        });
    }

    /// Current value of a command, or bytes starting at a register.
    pub fn get(
        &self,
        address: u8,
        route: Option<(u8, u8)>,
        page: u8,
        command: u8,
        len: usize,
    ) -> Option<Vec<u8>> {
        self.with(|s| {
            let chip = find_chip(s, address, route);
            match &chip.regs {
                Registers::Commands { values, .. } => values.get(&(page, command)).cloned(),
                Registers::Bytes { mem, .. } => Some(
                    (0..len)
                        .map(|i| mem[(command as usize + i) & 0xff])
                        .collect(),
                ),
            }
        })
    }

    pub fn mux_control(&self, address: u8) -> u8 {
        self.with(|s| {
            s.muxes
                .iter()
                .find(|m| m.address == address)
                .map(|m| m.control)
                .unwrap_or(0)
        })
    }
}

fn find_chip(s: &mut State, address: u8, route: Option<(u8, u8)>) -> &mut Chip {
    s.chips
        .iter_mut()
        .find(|c| c.address == address && c.route == route)
        .expect("no such simulated chip")
}

enum Target {
    Mux(usize),
    Chip(usize),
}

impl State {
    fn target(&self, addr: u8) -> Result<Target> {
        if let Some(i) = self
            .muxes
            .iter()
            .position(|m| m.address == addr && self.reachable(m.route))
        {
            return Ok(Target::Mux(i));
        }
        let visible: Vec<usize> = self
            .chips
            .iter()
            .enumerate()
            .filter(|(_, c)| c.address == addr && self.reachable(c.route))
            .map(|(i, _)| i)
            .collect();
        match visible.as_slice() {
            [] => Err(HwError::I2c(I2cError::NoAck(addr))),
            [i] => Ok(Target::Chip(*i)),
            _ => Err(HwError::I2c(I2cError::BusError)),
        }
    }

    fn reachable(&self, route: Option<(u8, u8)>) -> bool {
        let Some((mux, channel)) = route else {
            return true;
        };
        self.muxes.iter().any(|m| {
            m.address == mux
                && m.control & m.enable != 0
                && m.control & (m.enable - 1) == channel
                && self.reachable(m.route)
        })
    }

    fn check_faults(&self, addr: u8, data: &[u8]) -> Result<()> {
        let hit = self.faults.iter().any(|f| {
            f.addr == addr && f.first_byte.is_none_or(|b| data.first() == Some(&b))
        });
        if hit {
            return Err(HwError::I2c(I2cError::NoAck(addr)));
        }
        Ok(())
    }

    fn write(&mut self, addr: u8, data: &[u8]) -> Result<()> {
        self.check_faults(addr, data)?;
        match self.target(addr)? {
            Target::Mux(i) => {
                if let Some(b) = data.last() {
                    self.muxes[i].control = *b;
                }
            }
            Target::Chip(i) => self.chips[i].regs.write(data),
        }
        Ok(())
    }

    fn read(&mut self, addr: u8, buffer: &mut [u8]) -> Result<()> {
        match self.target(addr)? {
            Target::Mux(i) => {
                buffer.fill(self.muxes[i].control);
                Ok(())
            }
            Target::Chip(i) => self.chips[i].regs.read(addr, buffer),
        }
    }
}

impl Registers {
    fn write(&mut self, data: &[u8]) {
        let Some((&first, rest)) = data.split_first() else {
            return;
        };
        match self {
            Registers::Bytes { mem, pointer, mask } => {
                *pointer = first & *mask;
                for b in rest {
                    mem[*pointer as usize] = *b;
                    *pointer = pointer.wrapping_add(1) & *mask;
                }
            }
            Registers::Commands {
                values,
                page_register,
                global,
                page,
                pointer,
            } => {
                *pointer = first;
                if rest.is_empty() {
                    return;
                }
                if Some(first) == *page_register {
                    *page = rest[0];
                    return;
                }
                if global.contains(&first) {
                    values.insert((0, first), rest.to_vec());
                } else if *page == 0xff {
                    for p in (0..8).chain([0xff]) {
                        values.insert((p, first), rest.to_vec());
                    }
                } else {
                    values.insert((*page, first), rest.to_vec());
                }
            }
        }
    }

    fn read(&mut self, addr: u8, buffer: &mut [u8]) -> Result<()> {
        match self {
            Registers::Bytes { mem, pointer, mask } => {
                for b in buffer.iter_mut() {
                    *b = mem[*pointer as usize];
                    *pointer = pointer.wrapping_add(1) & *mask;
                }
                Ok(())
            }
            Registers::Commands {
                values,
                page_register,
                global,
                page,
                pointer,
            } => {
                if Some(*pointer) == *page_register {
                    buffer.fill(*page);
                    return Ok(());
                }
                let key = if global.contains(pointer) {
                    (0, *pointer)
                } else {
                    (*page, *pointer)
                };
                match values.get(&key) {
                    None => buffer.fill(0),
                    Some(v) if v.len() < buffer.len() => {
                        return Err(HwError::I2c(I2cError::ShortRead {
                            addr,
                            expected: buffer.len(),
                            received: v.len(),
                        }));
                    }
                    Some(v) => buffer.copy_from_slice(&v[..buffer.len()]),
                }
                Ok(())
            }
        }
    }
}

#[async_trait]
impl I2c for SimBus {
    async fn write(&mut self, addr: u8, data: &[u8]) -> Result<()> {
        self.with(|s| {
            s.calls.push(Call::Write {
                addr,
                data: data.to_vec(),
            });
            s.write(addr, data)
        })
    }

    async fn read(&mut self, addr: u8, buffer: &mut [u8]) -> Result<()> {
        self.with(|s| {
            s.calls.push(Call::Read {
                addr,
                len: buffer.len(),
            });
            s.read(addr, buffer)
        })
    }

    async fn write_read(&mut self, addr: u8, write: &[u8], read: &mut [u8]) -> Result<()> {
        self.with(|s| {
            s.calls.push(Call::WriteRead {
                addr,
                write: write.to_vec(),
                len: read.len(),
            });
            s.write(addr, write)?;
            s.read(addr, read)
        })
    }
}
