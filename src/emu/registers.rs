//! Registers built from [Bit][crate::circuit::bit::Bit]s.

use crate::{
    circuit::{self, bit::Bit},
    plat::{self, Word, WORD_BITS},
};

use super::{
    bus::{Board, Bus, BusId},
    WiringError,
};

/// An n-bit store built from [Bit]s, with independent capture ("armed") and drive ("enabled")
/// controls.
///
/// A register reads from its input bus and writes to its output bus. The two may be the same bus.
/// Registers only ever talk to buses, never to each other.
#[derive(Debug, Clone)]
pub struct Register {
    name: String,
    bits: Vec<Bit>,
    armed: bool,
    enabled: bool,
    input: Option<BusId>,
    output: Option<BusId>,
}

impl Register {
    /// Creates a new, unconnected 16-bit [`Register`].
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            bits: vec![Bit::new(); WORD_BITS],
            armed: false,
            enabled: false,
            input: None,
            output: None,
        }
    }

    /// Creates a register narrower than a full word.
    pub fn with_width(name: impl Into<String>, width: usize) -> Result<Self, WiringError> {
        let name = name.into();
        if width == 0 || width > WORD_BITS {
            return Err(WiringError::RegisterWidth {
                component: name,
                width,
            });
        }
        let mut this = Self::new(name);
        this.bits.truncate(width);
        Ok(this)
    }

    /// Name used as the bus driver label.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of Bits.
    pub fn width(&self) -> usize {
        self.bits.len()
    }

    /// Resolves the register's bus references. Part of the wiring pass.
    pub fn connect(&mut self, input: BusId, output: BusId) -> Result<(), WiringError> {
        if self.input.is_some() || self.output.is_some() {
            return Err(WiringError::AlreadyConnected {
                component: self.name.clone(),
            });
        }
        self.input = Some(input);
        self.output = Some(output);
        Ok(())
    }

    /// Whether both bus references are resolved.
    pub fn is_connected(&self) -> bool {
        self.input.is_some() && self.output.is_some()
    }

    /// The register will capture its input bus next time it latches.
    pub fn arm(&mut self) {
        self.armed = true;
    }

    /// Latching will leave the stored value alone.
    pub fn disarm(&mut self) {
        self.armed = false;
    }

    /// The register will assert its value onto its output bus next time it drives.
    pub fn enable(&mut self) {
        self.enabled = true;
    }

    /// Driving will leave the output bus alone.
    pub fn disable(&mut self) {
        self.enabled = false;
    }

    /// Whether the next latch captures the input bus.
    pub fn is_armed(&self) -> bool {
        self.armed
    }

    /// Whether the next drive asserts the output bus.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// The stored value.
    pub fn value(&self) -> Word {
        self.bits
            .iter()
            .enumerate()
            .fold(0, |acc, (i, bit)| acc | (Word::from(bit.output()) << i))
    }

    /// Captures the input bus into the Bits if armed. Disarmed Bits hold.
    pub fn latch(&mut self, board: &Board) -> Result<(), WiringError> {
        if !self.armed {
            return Ok(());
        }
        let value = self.resolve(board, self.input)?.value();
        for (i, bit) in self.bits.iter_mut().enumerate() {
            bit.update(circuit::wire(value, i), true, false);
        }
        Ok(())
    }

    /// Asserts the stored value onto the output bus if enabled.
    pub fn drive(&self, board: &mut Board) -> Result<(), WiringError> {
        if !self.enabled {
            return Ok(());
        }
        let value = self.value();
        let output = self.output.ok_or_else(|| self.unconnected())?;
        board
            .bus_mut(output)
            .ok_or_else(|| WiringError::UnknownBus {
                component: self.name.clone(),
                bus: output.index(),
            })?
            .set_value(&self.name, value);
        Ok(())
    }

    /// Latches if armed, then drives if enabled.
    pub fn update(&mut self, board: &mut Board) -> Result<(), WiringError> {
        self.latch(board)?;
        self.drive(board)
    }

    /// Pulls every Bit's reset line for one tick.
    pub fn reset(&mut self) {
        for bit in &mut self.bits {
            bit.update(false, false, true);
        }
    }

    fn resolve<'b>(&self, board: &'b Board, id: Option<BusId>) -> Result<&'b Bus, WiringError> {
        let id = id.ok_or_else(|| self.unconnected())?;
        board.bus(id).ok_or_else(|| WiringError::UnknownBus {
            component: self.name.clone(),
            bus: id.index(),
        })
    }

    fn unconnected(&self) -> WiringError {
        WiringError::Unconnected {
            component: self.name.clone(),
        }
    }
}

/// Every register inside the CPU.
#[derive(Debug, Clone)]
pub struct CpuRegisters {
    /// General-purpose registers R0 to R3.
    pub gp: [Register; 4],
    /// Instruction address register.
    pub iar: Register,
    /// Instruction register.
    pub ir: Register,
    /// Memory address register.
    pub mar: Register,
    /// Holds the ALU's second operand.
    pub tmp: Register,
    /// Accumulator, captures the ALU result.
    pub acc: Register,
    /// Status flags captured from the ALU.
    pub flags: Register,
}

impl CpuRegisters {
    /// Unconnected registers, all zero.
    pub fn new() -> Self {
        Self {
            gp: plat::Register::ALL.map(|r| Register::new(r.to_string())),
            iar: Register::new("iar"),
            ir: Register::new("ir"),
            mar: Register::new("mar"),
            tmp: Register::new("tmp"),
            acc: Register::new("acc"),
            flags: Register::new("flags"),
        }
    }

    /// A general-purpose register by name.
    pub fn gp(&self, reg: plat::Register) -> &Register {
        &self.gp[reg as usize]
    }

    /// A general-purpose register by name, mutably.
    pub fn gp_mut(&mut self, reg: plat::Register) -> &mut Register {
        &mut self.gp[reg as usize]
    }

    /// Every register, general purpose first.
    pub fn iter(&self) -> impl Iterator<Item = &Register> {
        self.gp.iter().chain([
            &self.iar,
            &self.ir,
            &self.mar,
            &self.tmp,
            &self.acc,
            &self.flags,
        ])
    }

    /// Every register, general purpose first, mutably.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Register> {
        self.gp.iter_mut().chain([
            &mut self.iar,
            &mut self.ir,
            &mut self.mar,
            &mut self.tmp,
            &mut self.acc,
            &mut self.flags,
        ])
    }
}

impl Default for CpuRegisters {
    fn default() -> Self {
        Self::new()
    }
}
