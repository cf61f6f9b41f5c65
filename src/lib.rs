#![cfg_attr(doc, warn(missing_docs))]
//! A cycle-accurate simulator of a 16-bit teaching computer, built up from logic gates.
//!
//! - [circuit]: gate primitives, wide composites, the [Bit][circuit::bit::Bit] latch and a small
//!   data-driven [Netlist][circuit::netlist::Netlist].
//! - [plat]: the word type, register names, opcodes and instruction encoding.
//! - [emu]: buses, registers, the ALU, memory, the microcode sequencer and the machine runner.
//! - [io]: the peripheral contract and the keyboard adapter.
//!
//! Every clock tick follows the same protocol: the control unit asserts one control word, every
//! enabled component drives its bus, the combinational logic settles, and finally every armed
//! register latches. Contention on a bus is reported as an error for that tick.

pub mod circuit;
pub mod emu;
pub mod io;
pub mod plat;
