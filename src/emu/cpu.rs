//! The CPU and its per-tick protocol.

use crate::{
    circuit,
    io::Peripheral,
    plat::{self, Condition, Word, WORD_BITS},
};

use super::{
    alu::Alu,
    bus::{Board, BusId, IoLines},
    control::{ControlUnit, Decoded},
    microcode::{ControlWord, MicrocodeTable, Signals},
    ram::Ram,
    registers::{CpuRegisters, Register},
    SimError, WiringError,
};

/// Whether the clock is still allowed to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CpuStatus {
    /// Ticks are executed.
    Running,
    /// A HALT instruction completed.
    Halted,
    /// The instruction register held an opcode with no micro-program and the table's policy is to
    /// stop.
    UndefinedOpcode(u8),
}

/// Every bus inside the CPU.
#[derive(Debug, Clone, Copy)]
pub struct CpuBuses {
    /// The shared data/address bus. Peripherals hang off this one.
    pub main: BusId,
    /// IR output into the control unit.
    pub ir: BusId,
    /// MAR output into RAM's address decoder.
    pub mar: BusId,
    /// TMP output into the bus1 gate.
    pub tmp: BusId,
    /// ALU result into ACC.
    pub alu: BusId,
    /// ALU flags into the FLAGS register.
    pub alu_flags: BusId,
    /// FLAGS output into the JUMP_IF gate.
    pub flags: BusId,
}

/// The CPU: registers, ALU, memory and the control unit, wired together on a [Board].
pub struct Cpu {
    /// Every register, general purpose and internal.
    pub registers: CpuRegisters,
    /// Arithmetic and logic unit between the main bus, TMP and ACC.
    pub alu: Alu,
    /// Main memory.
    pub ram: Ram,
    /// Microcode sequencer.
    pub control: ControlUnit,
    buses: CpuBuses,
    status: CpuStatus,
    last: ControlWord,
}

impl Cpu {
    /// Adds the CPU's buses to `board` and connects every component to them.
    pub fn new(board: &mut Board, table: MicrocodeTable) -> Result<Self, WiringError> {
        let buses = CpuBuses {
            main: board.add_bus("main")?,
            ir: board.add_bus("ir")?,
            mar: board.add_bus("mar")?,
            tmp: board.add_bus("tmp")?,
            alu: board.add_bus("alu")?,
            alu_flags: board.add_bus("alu_flags")?,
            flags: board.add_bus("flags")?,
        };

        let mut registers = CpuRegisters::new();
        for reg in registers.gp.iter_mut() {
            reg.connect(buses.main, buses.main)?;
        }
        registers.iar.connect(buses.main, buses.main)?;
        registers.ir.connect(buses.main, buses.ir)?;
        registers.mar.connect(buses.main, buses.mar)?;
        registers.tmp.connect(buses.main, buses.tmp)?;
        registers.acc.connect(buses.alu, buses.main)?;
        registers.flags.connect(buses.alu_flags, buses.flags)?;
        // these feed private buses and never contend
        registers.ir.enable();
        registers.mar.enable();
        registers.tmp.enable();
        registers.flags.enable();

        let mut alu = Alu::new();
        alu.connect(buses.alu, buses.alu_flags)?;
        let mut ram = Ram::new();
        ram.connect(buses.mar, buses.main)?;

        Ok(Self {
            registers,
            alu,
            ram,
            control: ControlUnit::new(table),
            buses,
            status: CpuStatus::Running,
            last: ControlWord::default(),
        })
    }

    /// Handles to the CPU's buses on the board.
    pub fn buses(&self) -> &CpuBuses {
        &self.buses
    }

    /// Whether the CPU is still running.
    pub fn status(&self) -> CpuStatus {
        self.status
    }

    /// The control word asserted during the most recent completed tick.
    pub fn last_control_word(&self) -> ControlWord {
        self.last
    }

    /// Runs one clock tick. Does nothing once the CPU has stopped.
    ///
    /// Components first drive, then the combinational logic settles, then everything armed
    /// latches at once. A tick that hits bus contention is rolled back: bus values, IO lines and
    /// register controls are restored, nothing latches and the control step does not advance.
    pub fn tick(
        &mut self,
        board: &mut Board,
        peripherals: &mut [Box<dyn Peripheral>],
    ) -> Result<(), SimError> {
        if self.status != CpuStatus::Running {
            return Ok(());
        }
        board.begin_tick();
        let before = board.snapshot();

        let word = self.control.assert(self.registers.ir.value());
        log::trace!(
            "{:?}: {:?} alu={:?}",
            self.control.phase(),
            word.signals,
            word.alu
        );
        self.assert_controls(board, word);

        // drive
        for reg in self.registers.iter() {
            reg.drive(board)?;
        }
        if word.signals.contains(Signals::ENABLE_RAM) {
            self.ram.drive(board)?;
        }
        for peripheral in peripherals.iter_mut() {
            peripheral.update(board)?;
        }
        if let Some(violation) = board.take_contention() {
            log::error!("{}", violation);
            self.assert_controls(board, self.last);
            self.control.abandon();
            board.restore(&before);
            return Err(violation.into());
        }
        self.last = word;

        // settle
        let a = self.bus_value(board, self.buses.main)?;
        let b = bus1(
            self.bus_value(board, self.buses.tmp)?,
            word.signals.contains(Signals::BUS1),
        );
        self.alu.update(board, a, b)?;
        if word.signals.contains(Signals::JUMP_IF) {
            let flags = Condition::from_bits_truncate(self.registers.flags.value() as u8);
            if flags.intersects(word.condition) {
                self.registers.iar.arm();
            }
        }

        // latch
        for reg in self.registers.iter_mut() {
            reg.latch(board)?;
        }
        if word.signals.contains(Signals::SET_RAM) {
            self.ram.latch(board)?;
        }
        if word.signals.contains(Signals::CLEAR_FLAGS) {
            self.registers.flags.reset();
        }
        for peripheral in peripherals.iter_mut() {
            peripheral.latch(board)?;
        }

        if word.signals.contains(Signals::HALT) {
            self.status = match self.control.current() {
                Some(Decoded::Undefined(op)) => CpuStatus::UndefinedOpcode(op),
                _ => CpuStatus::Halted,
            };
            log::info!("cpu stopped: {:?}", self.status);
        }
        self.control.advance();
        Ok(())
    }

    fn assert_controls(&mut self, board: &mut Board, word: ControlWord) {
        let s = word.signals;
        let regs = &mut self.registers;
        for (name, reg) in plat::Register::ALL.into_iter().zip(regs.gp.iter_mut()) {
            toggle(
                reg,
                s.contains(Signals::set_reg(name)),
                s.contains(Signals::enable_reg(name)),
            );
        }
        toggle(
            &mut regs.iar,
            s.contains(Signals::SET_IAR),
            s.contains(Signals::ENABLE_IAR),
        );
        toggle(
            &mut regs.acc,
            s.contains(Signals::SET_ACC),
            s.contains(Signals::ENABLE_ACC),
        );
        toggle(&mut regs.ir, s.contains(Signals::SET_IR), true);
        toggle(&mut regs.mar, s.contains(Signals::SET_MAR), true);
        toggle(&mut regs.tmp, s.contains(Signals::SET_TMP), true);
        toggle(&mut regs.flags, s.contains(Signals::SET_FLAGS), true);

        let mut lines = IoLines::empty();
        lines.set(IoLines::CLOCK_SET, s.contains(Signals::IO_CLOCK_SET));
        lines.set(IoLines::CLOCK_ENABLE, s.contains(Signals::IO_CLOCK_ENABLE));
        lines.set(IoLines::MODE, s.contains(Signals::IO_MODE));
        lines.set(
            IoLines::DATA_OR_ADDRESS,
            s.contains(Signals::IO_DATA_OR_ADDRESS),
        );
        board.io_mut().set_lines(lines);

        self.alu.op = word.alu;
    }

    fn bus_value(&self, board: &Board, id: BusId) -> Result<Word, WiringError> {
        board
            .bus(id)
            .map(|bus| bus.value())
            .ok_or(WiringError::UnknownBus {
                component: "cpu".into(),
                bus: id.index(),
            })
    }
}

fn toggle(reg: &mut Register, armed: bool, enabled: bool) {
    if armed {
        reg.arm();
    } else {
        reg.disarm();
    }
    if enabled {
        reg.enable();
    } else {
        reg.disable();
    }
}

/// The gate between TMP and the ALU's second input. While `bus1` is asserted the ALU sees the
/// constant 1 instead of TMP.
fn bus1(tmp: Word, bus1: bool) -> Word {
    (0..WORD_BITS).fold(0, |acc, i| {
        let line = circuit::wire(tmp, i);
        let out = if i == 0 {
            circuit::or(line, bus1)
        } else {
            circuit::and(line, circuit::not(bus1))
        };
        acc | (Word::from(out) << i)
    })
}
