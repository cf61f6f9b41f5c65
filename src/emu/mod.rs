//! The emulator module: buses, registers, ALU, memory and the control unit that sequences them.

use thiserror::Error;

use crate::circuit::netlist::NetlistError;

pub mod alu;
pub mod bus;
pub mod control;
pub mod cpu;
pub mod emulator;
pub mod microcode;
pub mod ram;
pub mod registers;

/// A component was used before its connections were resolved, or the wiring itself is malformed.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WiringError {
    /// A component ticked before the wiring pass connected it.
    #[error("{component}: bus reference not connected")]
    Unconnected { component: String },
    /// A bus handle from another board, or a stale one.
    #[error("{component}: bus {bus} does not exist")]
    UnknownBus { component: String, bus: usize },
    /// The wiring pass reached a component twice.
    #[error("{component}: already connected")]
    AlreadyConnected { component: String },
    /// A bus was added after the board was sealed.
    #[error("{component}: topology is sealed after the wiring pass")]
    Sealed { component: String },
    /// A register wider than a word.
    #[error("register {component} is {width} bits wide (max 16)")]
    RegisterWidth { component: String, width: usize },
    /// An address decoder failed to build or evaluate.
    #[error("decode network: {0}")]
    Netlist(#[from] NetlistError),
}

/// More than one driver asserted the same bus within one tick.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("bus contention on {bus}: driven by {}", .drivers.join(", "))]
pub struct ContentionViolation {
    /// Name of the contended bus.
    pub bus: String,
    /// Every component that drove it this tick, in drive order.
    pub drivers: Vec<String>,
}

/// Structural errors. These are programmer errors and are never retried.
#[derive(Debug, Error)]
pub enum SimError {
    /// Broken wiring.
    #[error(transparent)]
    Wiring(#[from] WiringError),
    /// Two drivers on one bus.
    #[error(transparent)]
    Contention(#[from] ContentionViolation),
}
