//! Machine assembly and the clocked run loop.

use std::time::Duration;

use anyhow::{ensure, Context, Result};
use tokio::{
    runtime::{Builder, Runtime},
    time::{interval, Interval},
};

use crate::{
    io::{
        event::{ShutdownSignal, DEFAULT_QUEUE_CAPACITY},
        Peripheral, Wiring,
    },
    plat::Word,
};

use super::{
    bus::Board,
    control::Phase,
    cpu::{Cpu, CpuStatus},
    microcode::{MicrocodeTable, UndefinedOpcodePolicy},
    ram::Ram,
    registers::CpuRegisters,
    SimError,
};

/// Machine-wide settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EmuConfig {
    /// Ticks per second when paced by an [Emulator].
    pub clock_rate_hz: f64,
    /// What the CPU does with an opcode that has no micro-program.
    pub undefined_opcode: UndefinedOpcodePolicy,
    /// Bound on key events waiting to be sampled.
    pub event_queue_capacity: usize,
    /// Stop after this many ticks even if the CPU is still running.
    pub max_ticks: Option<u64>,
}

impl Default for EmuConfig {
    fn default() -> Self {
        Self {
            clock_rate_hz: 1000.0,
            undefined_opcode: UndefinedOpcodePolicy::default(),
            event_queue_capacity: DEFAULT_QUEUE_CAPACITY,
            max_ticks: None,
        }
    }
}

/// Why a run loop returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// The CPU stopped on its own.
    Stopped(CpuStatus),
    /// `max_ticks` ran out first.
    TickLimit,
    /// The shutdown signal was raised between ticks.
    Shutdown,
}

/// Collects everything that will be wired into a [Machine].
pub struct MachineBuilder {
    config: EmuConfig,
    table: Option<MicrocodeTable>,
    peripherals: Vec<Box<dyn Peripheral>>,
}

impl MachineBuilder {
    /// A builder with the default microcode and no peripherals.
    pub fn new(config: EmuConfig) -> Self {
        Self {
            config,
            table: None,
            peripherals: Vec::new(),
        }
    }

    /// Uses `table` instead of the default micro-programs.
    pub fn microcode(mut self, table: MicrocodeTable) -> Self {
        self.table = Some(table);
        self
    }

    /// Adds a peripheral to be wired onto the main bus.
    pub fn peripheral(mut self, peripheral: impl Peripheral + 'static) -> Self {
        self.peripherals.push(Box::new(peripheral));
        self
    }

    /// Runs the wiring pass and seals the topology.
    ///
    /// # Errors
    ///
    /// Fails if the microcode table lets two components drive the main bus at once, or if any
    /// component can't be connected.
    pub fn build(self) -> Result<Machine, SimError> {
        let table = self
            .table
            .unwrap_or_else(|| MicrocodeTable::new(self.config.undefined_opcode));
        table.verify()?;

        let mut board = Board::new();
        let cpu = Cpu::new(&mut board, table)?;
        let wiring = Wiring {
            main_bus: cpu.buses().main,
        };
        let mut peripherals = self.peripherals;
        for peripheral in peripherals.iter_mut() {
            peripheral.connect(&mut board, wiring)?;
            log::debug!("wired {}", peripheral.name());
        }
        board.seal();
        log::info!(
            "machine ready: {} buses, {} peripherals",
            board.buses().len(),
            peripherals.len()
        );

        Ok(Machine {
            board,
            cpu,
            peripherals,
            ticks: 0,
        })
    }
}

/// A fully wired machine. The set of components is fixed once built.
pub struct Machine {
    board: Board,
    cpu: Cpu,
    peripherals: Vec<Box<dyn Peripheral>>,
    ticks: u64,
}

impl Machine {
    /// Starts assembling a machine.
    pub fn builder(config: EmuConfig) -> MachineBuilder {
        MachineBuilder::new(config)
    }

    /// Copies a program image into memory.
    pub fn load(&mut self, origin: Word, words: &[Word]) {
        self.cpu.ram.load(origin, words);
    }

    /// Advances the clock by one tick, unless the CPU has stopped.
    pub fn tick(&mut self) -> Result<(), SimError> {
        if self.status() != CpuStatus::Running {
            return Ok(());
        }
        self.cpu.tick(&mut self.board, &mut self.peripherals)?;
        self.ticks += 1;
        Ok(())
    }

    /// Ticks until the current instruction completes. Returns the number of ticks taken.
    pub fn step_instruction(&mut self) -> Result<u64, SimError> {
        let start = self.ticks;
        loop {
            self.tick()?;
            let done = self.status() != CpuStatus::Running;
            if done || self.cpu.control.phase() == Phase::Fetch(0) {
                return Ok(self.ticks - start);
            }
        }
    }

    /// Ticks as fast as possible until the CPU stops or `max_ticks` more ticks have passed.
    pub fn run_until_halt(&mut self, max_ticks: Option<u64>) -> Result<RunOutcome, SimError> {
        let limit = max_ticks.map(|max| self.ticks.saturating_add(max));
        loop {
            if let status @ (CpuStatus::Halted | CpuStatus::UndefinedOpcode(_)) = self.status() {
                return Ok(RunOutcome::Stopped(status));
            }
            if limit.is_some_and(|limit| self.ticks >= limit) {
                return Ok(RunOutcome::TickLimit);
            }
            self.tick()?;
        }
    }

    /// Whether the CPU is still running.
    pub fn status(&self) -> CpuStatus {
        self.cpu.status()
    }

    /// Ticks completed since the machine was built.
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// The CPU.
    pub fn cpu(&self) -> &Cpu {
        &self.cpu
    }

    /// The CPU's registers.
    pub fn registers(&self) -> &CpuRegisters {
        &self.cpu.registers
    }

    /// Main memory.
    pub fn ram(&self) -> &Ram {
        &self.cpu.ram
    }

    /// Every bus in the machine.
    pub fn board(&self) -> &Board {
        &self.board
    }

    /// The value currently on the main bus.
    pub fn main_bus(&self) -> Word {
        self.board
            .bus(self.cpu.buses().main)
            .map(|bus| bus.value())
            .unwrap_or_default()
    }

    /// Attached peripherals, in wiring order.
    pub fn peripherals(&self) -> &[Box<dyn Peripheral>] {
        &self.peripherals
    }
}

/// Runs a [Machine] against the wall clock.
pub struct Emulator {
    machine: Machine,
    max_ticks: Option<u64>,
    shutdown: Option<ShutdownSignal>,
    clock: Interval,
    rt: Runtime,
}

impl Emulator {
    /// Wraps `machine` with a clock ticking at `config.clock_rate_hz`.
    ///
    /// # Errors
    ///
    /// This function will return an error if the clock rate isn't a positive number, its period
    /// can't be represented as a non-zero [Duration], or the Tokio runtime fails to initialize.
    pub fn new(machine: Machine, config: &EmuConfig) -> Result<Self> {
        let hz = config.clock_rate_hz;
        ensure!(
            hz.is_finite() && hz > 0.0,
            "clock rate must be positive, got {}",
            hz
        );
        let period = Duration::try_from_secs_f64(hz.recip())
            .with_context(|| format!("clock rate {} Hz is too slow", hz))?;
        ensure!(!period.is_zero(), "clock rate {} Hz is too fast", hz);

        let rt = Builder::new_current_thread()
            .enable_time()
            .global_queue_interval(1)
            .build()?;
        let clock = rt.block_on(async { interval(period) });
        Ok(Self {
            machine,
            max_ticks: config.max_ticks,
            shutdown: None,
            clock,
            rt,
        })
    }

    /// Stops [`run`][Self::run] at the next tick boundary once `signal` is raised.
    pub fn with_shutdown(mut self, signal: ShutdownSignal) -> Self {
        self.shutdown = Some(signal);
        self
    }

    /// Waits for the next clock edge, then ticks.
    pub fn tick(&mut self) -> Result<()> {
        let clock = &mut self.clock;
        // snap!
        self.rt.block_on(clock.tick());
        self.machine.tick()?;
        Ok(())
    }

    /// Runs until the CPU stops, the tick limit is reached or shutdown is requested.
    pub fn run(&mut self) -> Result<RunOutcome> {
        loop {
            if self.shutdown.as_ref().is_some_and(|s| s.is_triggered()) {
                log::info!("shutdown after {} ticks", self.machine.ticks());
                return Ok(RunOutcome::Shutdown);
            }
            if let status @ (CpuStatus::Halted | CpuStatus::UndefinedOpcode(_)) =
                self.machine.status()
            {
                return Ok(RunOutcome::Stopped(status));
            }
            if self
                .max_ticks
                .is_some_and(|max| self.machine.ticks() >= max)
            {
                return Ok(RunOutcome::TickLimit);
            }
            self.tick()?;
        }
    }

    /// The machine being clocked.
    pub fn machine(&self) -> &Machine {
        &self.machine
    }

    /// The machine being clocked, mutably.
    pub fn machine_mut(&mut self) -> &mut Machine {
        &mut self.machine
    }

    /// Stops pacing and hands back the machine.
    pub fn into_machine(self) -> Machine {
        self.machine
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        emu::microcode::{MicroStep, Signals},
        io::{
            event::{self, Shutdown},
            keyboard::KeyboardAdapter,
            AdapterStatus, DecodeConfig, StopReason,
        },
        plat::{InstrFormat, Instruction, IoDirection, IoKind, IoTarget, Opcode, Register},
    };

    fn encode(op: Opcode, format: InstrFormat) -> Word {
        Instruction::new(op, format).encode().unwrap()
    }

    fn io(direction: IoDirection, kind: IoKind, reg: Register) -> Word {
        encode(Opcode::Io, InstrFormat::Io(IoTarget { direction, kind }, reg))
    }

    fn halt() -> Word {
        encode(Opcode::Halt, InstrFormat::OpOnly)
    }

    fn read_key_program() -> Vec<Word> {
        vec![
            encode(Opcode::Data, InstrFormat::R(Register::R0)),
            0x000F,
            io(IoDirection::Out, IoKind::Address, Register::R0),
            io(IoDirection::In, IoKind::Data, Register::R1),
            halt(),
        ]
    }

    #[test]
    fn test_build_seals_board() {
        let machine = Machine::builder(EmuConfig::default()).build().unwrap();
        assert!(machine.board().is_sealed());
        assert_eq!(machine.status(), CpuStatus::Running);
        assert_eq!(machine.ticks(), 0);
    }

    #[test]
    fn test_build_rejects_contending_microcode() {
        let mut table = MicrocodeTable::default();
        table.insert(
            Opcode::Nop,
            vec![MicroStep::new(Signals::ENABLE_IAR | Signals::ENABLE_ACC)],
        );
        let result = Machine::builder(EmuConfig::default())
            .microcode(table)
            .build();
        assert!(matches!(result, Err(SimError::Contention(_))));
    }

    #[test]
    fn test_keyboard_program() {
        let (events, rx) = event::channel(4);
        let (_shutdown, signal) = Shutdown::new();
        let keyboard = KeyboardAdapter::new(DecodeConfig::keyboard(), rx, signal).unwrap();
        let mut machine = Machine::builder(EmuConfig::default())
            .peripheral(keyboard)
            .build()
            .unwrap();
        machine.load(0, &read_key_program());
        events.press(65).unwrap();

        let outcome = machine.run_until_halt(Some(1000)).unwrap();
        assert_eq!(outcome, RunOutcome::Stopped(CpuStatus::Halted));
        assert_eq!(machine.registers().gp(Register::R1).value(), 65);
        assert_eq!(machine.peripherals()[0].status(), AdapterStatus::Running);
    }

    #[test]
    fn test_out_data_does_not_address_keyboard() {
        let (events, rx) = event::channel(4);
        let (_shutdown, signal) = Shutdown::new();
        let keyboard = KeyboardAdapter::new(DecodeConfig::keyboard(), rx, signal).unwrap();
        let mut machine = Machine::builder(EmuConfig::default())
            .peripheral(keyboard)
            .build()
            .unwrap();
        machine.load(
            0,
            &[
                encode(Opcode::Data, InstrFormat::R(Register::R0)),
                0x000F,
                io(IoDirection::Out, IoKind::Data, Register::R0),
                io(IoDirection::In, IoKind::Data, Register::R1),
                halt(),
            ],
        );
        events.press(65).unwrap();

        machine.step_instruction().unwrap();
        machine.step_instruction().unwrap();
        assert!(!machine.peripherals()[0].is_selected());
        machine.step_instruction().unwrap();
        assert!(!machine.peripherals()[0].is_selected());
        let main_id = machine.cpu().buses().main;
        let main = machine.board().bus(main_id).unwrap();
        assert!(main.drivers().is_empty());
        assert_eq!(machine.registers().gp(Register::R1).value(), 4);
    }

    #[test]
    fn test_closed_event_source_does_not_stop_cpu() {
        let (events, rx) = event::channel(4);
        let (_shutdown, signal) = Shutdown::new();
        let keyboard = KeyboardAdapter::new(DecodeConfig::keyboard(), rx, signal).unwrap();
        let mut machine = Machine::builder(EmuConfig::default())
            .peripheral(keyboard)
            .build()
            .unwrap();
        machine.load(0, &read_key_program());
        drop(events);

        let outcome = machine.run_until_halt(Some(1000)).unwrap();
        assert_eq!(outcome, RunOutcome::Stopped(CpuStatus::Halted));
        assert_eq!(
            machine.peripherals()[0].status(),
            AdapterStatus::Stopped(StopReason::EventSourceClosed)
        );
        // nothing drives the bus during IN, so r1 captures what the last fetch step left there
        assert_eq!(machine.registers().gp(Register::R1).value(), 4);
    }

    #[test]
    fn test_step_instruction() {
        let mut machine = Machine::builder(EmuConfig::default()).build().unwrap();
        machine.load(
            0,
            &[
                encode(Opcode::Data, InstrFormat::R(Register::R2)),
                3,
                encode(Opcode::Not, InstrFormat::RR(Register::R2, Register::R3)),
                halt(),
            ],
        );
        assert_eq!(machine.step_instruction().unwrap(), 6);
        assert_eq!(machine.registers().gp(Register::R2).value(), 3);
        assert_eq!(machine.step_instruction().unwrap(), 5);
        assert_eq!(machine.registers().gp(Register::R3).value(), !3);
        assert_eq!(machine.step_instruction().unwrap(), 4);
        assert_eq!(machine.status(), CpuStatus::Halted);
        assert_eq!(machine.step_instruction().unwrap(), 0);
        assert_eq!(machine.ticks(), 15);
    }

    #[test]
    fn test_tick_limit() {
        let mut machine = Machine::builder(EmuConfig::default()).build().unwrap();
        // jmp 0
        machine.load(0, &[encode(Opcode::Jmp, InstrFormat::OpOnly), 0]);
        let outcome = machine.run_until_halt(Some(50)).unwrap();
        assert_eq!(outcome, RunOutcome::TickLimit);
        assert_eq!(machine.ticks(), 50);
        assert_eq!(machine.status(), CpuStatus::Running);
    }

    #[test]
    fn test_undefined_opcode_reported() {
        let mut machine = Machine::builder(EmuConfig::default()).build().unwrap();
        machine.load(0, &[0x9900]);
        let outcome = machine.run_until_halt(None).unwrap();
        assert_eq!(
            outcome,
            RunOutcome::Stopped(CpuStatus::UndefinedOpcode(0x99))
        );
    }

    #[test]
    fn test_emulator_runs_to_halt() {
        let config = EmuConfig {
            clock_rate_hz: 100_000.0,
            ..EmuConfig::default()
        };
        let mut machine = Machine::builder(config).build().unwrap();
        machine.load(
            0,
            &[encode(Opcode::Data, InstrFormat::R(Register::R0)), 42, halt()],
        );
        let mut emu = Emulator::new(machine, &config).unwrap();
        assert_eq!(
            emu.run().unwrap(),
            RunOutcome::Stopped(CpuStatus::Halted)
        );
        assert_eq!(emu.machine().registers().gp(Register::R0).value(), 42);
    }

    #[test]
    fn test_emulator_shutdown_and_limit() {
        let config = EmuConfig {
            clock_rate_hz: 100_000.0,
            max_ticks: Some(10),
            ..EmuConfig::default()
        };
        let mut machine = Machine::builder(config).build().unwrap();
        machine.load(0, &[encode(Opcode::Jmp, InstrFormat::OpOnly), 0]);
        let (shutdown, signal) = Shutdown::new();
        let mut emu = Emulator::new(machine, &config)
            .unwrap()
            .with_shutdown(signal);
        assert_eq!(emu.run().unwrap(), RunOutcome::TickLimit);
        assert_eq!(emu.machine().ticks(), 10);

        shutdown.trigger();
        assert_eq!(emu.run().unwrap(), RunOutcome::Shutdown);
        assert_eq!(emu.machine().ticks(), 10);
    }

    #[test]
    fn test_emulator_rejects_bad_clock() {
        let machine = Machine::builder(EmuConfig::default()).build().unwrap();
        let config = EmuConfig {
            clock_rate_hz: 0.0,
            ..EmuConfig::default()
        };
        assert!(Emulator::new(machine, &config).is_err());
    }

    #[test]
    fn test_emulator_rejects_unrepresentable_periods() {
        for hz in [1e10, 1e-300, f64::NAN, -5.0] {
            let machine = Machine::builder(EmuConfig::default()).build().unwrap();
            let config = EmuConfig {
                clock_rate_hz: hz,
                ..EmuConfig::default()
            };
            assert!(Emulator::new(machine, &config).is_err(), "{hz} Hz");
        }
    }
}
