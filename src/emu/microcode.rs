//! Control lines and the micro-programs that assert them.

use rustc_hash::FxHashMap;

use crate::plat::{
    Condition, InstrFormat, Instruction, IoDirection, IoKind, IoTarget, Opcode, Register,
};

use super::{alu::AluOp, ContentionViolation};

bitflags::bitflags! {
    /// The control lines the control unit asserts during one tick.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
    pub struct Signals: u32 {
        /* Main bus drivers */
        /// R0 drives the main bus.
        const ENABLE_R0 = 1 << 0;
        /// R1 drives the main bus.
        const ENABLE_R1 = 1 << 1;
        /// R2 drives the main bus.
        const ENABLE_R2 = 1 << 2;
        /// R3 drives the main bus.
        const ENABLE_R3 = 1 << 3;
        /// IAR drives the main bus.
        const ENABLE_IAR = 1 << 4;
        /// ACC drives the main bus.
        const ENABLE_ACC = 1 << 5;
        /// RAM drives the word at MAR onto the main bus.
        const ENABLE_RAM = 1 << 6;

        /* Latches */
        /// R0 latches its input bus.
        const SET_R0 = 1 << 7;
        /// R1 latches its input bus.
        const SET_R1 = 1 << 8;
        /// R2 latches its input bus.
        const SET_R2 = 1 << 9;
        /// R3 latches its input bus.
        const SET_R3 = 1 << 10;
        /// IAR latches its input bus.
        const SET_IAR = 1 << 11;
        /// IR latches its input bus.
        const SET_IR = 1 << 12;
        /// MAR latches its input bus.
        const SET_MAR = 1 << 13;
        /// TMP latches its input bus.
        const SET_TMP = 1 << 14;
        /// ACC latches its input bus.
        const SET_ACC = 1 << 15;
        /// RAM stores the main bus at MAR.
        const SET_RAM = 1 << 16;
        /// FLAGS latches its input bus.
        const SET_FLAGS = 1 << 17;
        /// Pulls the flags register's reset lines.
        const CLEAR_FLAGS = 1 << 18;

        /// Replaces the ALU's second operand with the constant 1.
        const BUS1 = 1 << 19;
        /// Latches the instruction address register only if a selected flag is set.
        const JUMP_IF = 1 << 20;

        /* IO bus */
        /// Raises the IO bus CLOCK_SET line.
        const IO_CLOCK_SET = 1 << 21;
        /// Raises the IO bus CLOCK_ENABLE line.
        const IO_CLOCK_ENABLE = 1 << 22;
        /// Raises the IO bus MODE line (high for output).
        const IO_MODE = 1 << 23;
        /// Raises the IO bus DATA_OR_ADDRESS line (high for an address).
        const IO_DATA_OR_ADDRESS = 1 << 24;

        /// Stops the clock once this tick completes.
        const HALT = 1 << 25;
    }
}

impl Signals {
    /// Every line that lets a CPU component drive the main bus.
    pub const MAIN_BUS_DRIVERS: Signals = Signals::ENABLE_R0
        .union(Signals::ENABLE_R1)
        .union(Signals::ENABLE_R2)
        .union(Signals::ENABLE_R3)
        .union(Signals::ENABLE_IAR)
        .union(Signals::ENABLE_ACC)
        .union(Signals::ENABLE_RAM);

    /// The line that lets general-purpose register `reg` drive the main bus.
    pub fn enable_reg(reg: Register) -> Signals {
        match reg {
            Register::R0 => Signals::ENABLE_R0,
            Register::R1 => Signals::ENABLE_R1,
            Register::R2 => Signals::ENABLE_R2,
            Register::R3 => Signals::ENABLE_R3,
        }
    }

    /// The line that arms general-purpose register `reg`.
    pub fn set_reg(reg: Register) -> Signals {
        match reg {
            Register::R0 => Signals::SET_R0,
            Register::R1 => Signals::SET_R1,
            Register::R2 => Signals::SET_R2,
            Register::R3 => Signals::SET_R3,
        }
    }

    /// Names of the components that will drive the main bus under these signals.
    /// An IO read counts as one driver: the addressed peripheral.
    pub fn main_bus_drivers(self) -> Vec<String> {
        let mut drivers: Vec<String> = (self & Signals::MAIN_BUS_DRIVERS)
            .iter_names()
            .map(|(name, _)| name.trim_start_matches("ENABLE_").to_lowercase())
            .collect();
        if self.contains(Signals::IO_CLOCK_ENABLE) {
            drivers.push("peripheral".into());
        }
        drivers
    }
}

/// Everything the control unit asserts for one tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ControlWord {
    /// Control lines held high this tick.
    pub signals: Signals,
    /// ALU mode this tick.
    pub alu: AluOp,
    /// Flags tested when [`Signals::JUMP_IF`] is asserted.
    pub condition: Condition,
}

/// An operand slot of the instruction being executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operand {
    /// The instruction's `RegA` field.
    A,
    /// The instruction's `RegB` field.
    B,
}

/// One step of a micro-program. Operand slots and IO transfers are filled in from the decoded
/// instruction when the step is resolved into a [ControlWord].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct MicroStep {
    /// Lines asserted regardless of operands.
    pub signals: Signals,
    /// ALU mode for this step.
    pub alu: AluOp,
    /// Operand register that drives the main bus.
    pub enable: Option<Operand>,
    /// Operand register that latches the main bus.
    pub set: Option<Operand>,
    /// Performs the instruction's IO transfer through its `RegB` operand.
    pub io: bool,
}

impl MicroStep {
    /// A step asserting `signals` with the ALU in `Add` mode.
    pub const fn new(signals: Signals) -> Self {
        Self {
            signals,
            alu: AluOp::Add,
            enable: None,
            set: None,
            io: false,
        }
    }

    /// Selects the ALU mode.
    pub const fn alu(mut self, op: AluOp) -> Self {
        self.alu = op;
        self
    }

    /// Lets `operand` drive the main bus.
    pub const fn enable(mut self, operand: Operand) -> Self {
        self.enable = Some(operand);
        self
    }

    /// Arms `operand` to latch the main bus.
    pub const fn set(mut self, operand: Operand) -> Self {
        self.set = Some(operand);
        self
    }

    /// The single step of an IO instruction.
    pub const fn io() -> Self {
        let mut this = Self::new(Signals::empty());
        this.io = true;
        this
    }

    /// Fills in the operand slots from `instr`. Steps without operands accept `None`.
    pub fn resolve(&self, instr: Option<&Instruction>) -> ControlWord {
        let mut signals = self.signals;
        let mut condition = Condition::empty();
        if let Some(instr) = instr {
            let slot = |operand| match operand {
                Operand::A => instr.reg_a(),
                Operand::B => instr.reg_b(),
            };
            if let Some(reg) = self.enable.and_then(slot) {
                signals |= Signals::enable_reg(reg);
            }
            if let Some(reg) = self.set.and_then(slot) {
                signals |= Signals::set_reg(reg);
            }
            if let InstrFormat::Cond(cond) = instr.format {
                condition = cond;
            }
            if let (true, InstrFormat::Io(target, reg)) = (self.io, instr.format) {
                signals |= io_signals(target, reg);
            }
        }
        ControlWord {
            signals,
            alu: self.alu,
            condition,
        }
    }
}

fn io_signals(target: IoTarget, reg: Register) -> Signals {
    let mut signals = match target.direction {
        IoDirection::Out => Signals::enable_reg(reg) | Signals::IO_CLOCK_SET | Signals::IO_MODE,
        IoDirection::In => Signals::set_reg(reg) | Signals::IO_CLOCK_ENABLE,
    };
    if target.kind == IoKind::Address {
        signals |= Signals::IO_DATA_OR_ADDRESS;
    }
    signals
}

/// What happens when the instruction register holds an opcode with no micro-program.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum UndefinedOpcodePolicy {
    /// Stop the clock and report the opcode through the CPU status.
    #[default]
    Halt,
    /// Skip the word and carry on with the next fetch.
    NoOp,
}

/// Shared by every instruction: load the addressed word into IR and advance IAR by one.
pub const FETCH: [MicroStep; 3] = [
    MicroStep::new(
        Signals::ENABLE_IAR
            .union(Signals::SET_MAR)
            .union(Signals::BUS1)
            .union(Signals::SET_ACC),
    ),
    MicroStep::new(Signals::ENABLE_RAM.union(Signals::SET_IR)),
    MicroStep::new(Signals::ENABLE_ACC.union(Signals::SET_IAR)),
];

/// Number of ticks spent fetching before decode.
pub const FETCH_LEN: usize = FETCH.len();

/// The micro-program table, keyed by opcode.
#[derive(Debug, Clone)]
pub struct MicrocodeTable {
    programs: FxHashMap<Opcode, Vec<MicroStep>>,
    undefined: Vec<MicroStep>,
    policy: UndefinedOpcodePolicy,
}

impl MicrocodeTable {
    /// The standard micro-programs for every opcode, with `policy` for the rest.
    pub fn new(policy: UndefinedOpcodePolicy) -> Self {
        use Operand::{A, B};
        use Signals as S;

        let mut programs = FxHashMap::default();
        let skip_word = MicroStep::new(S::ENABLE_IAR | S::SET_MAR | S::BUS1 | S::SET_ACC);

        programs.insert(
            Opcode::Load,
            vec![
                MicroStep::new(S::SET_MAR).enable(A),
                MicroStep::new(S::ENABLE_RAM).set(B),
            ],
        );
        programs.insert(
            Opcode::Store,
            vec![
                MicroStep::new(S::SET_MAR).enable(A),
                MicroStep::new(S::SET_RAM).enable(B),
            ],
        );
        programs.insert(
            Opcode::Data,
            vec![
                skip_word,
                MicroStep::new(S::ENABLE_RAM).set(B),
                MicroStep::new(S::ENABLE_ACC | S::SET_IAR),
            ],
        );
        programs.insert(Opcode::Jmpr, vec![MicroStep::new(S::SET_IAR).enable(B)]);
        programs.insert(
            Opcode::Jmp,
            vec![
                MicroStep::new(S::ENABLE_IAR | S::SET_MAR),
                MicroStep::new(S::ENABLE_RAM | S::SET_IAR),
            ],
        );
        programs.insert(
            Opcode::Jmpif,
            vec![
                skip_word,
                MicroStep::new(S::ENABLE_ACC | S::SET_IAR),
                MicroStep::new(S::ENABLE_RAM | S::JUMP_IF),
            ],
        );
        programs.insert(Opcode::Clf, vec![MicroStep::new(S::CLEAR_FLAGS)]);
        programs.insert(Opcode::Io, vec![MicroStep::io()]);

        for (op, alu) in [
            (Opcode::Add, AluOp::Add),
            (Opcode::Sub, AluOp::Sub),
            (Opcode::And, AluOp::And),
            (Opcode::Or, AluOp::Or),
            (Opcode::Xor, AluOp::Xor),
        ] {
            programs.insert(
                op,
                vec![
                    MicroStep::new(S::SET_TMP).enable(B),
                    MicroStep::new(S::SET_ACC | S::SET_FLAGS).alu(alu).enable(A),
                    MicroStep::new(S::ENABLE_ACC).set(B),
                ],
            );
        }
        for (op, alu) in [
            (Opcode::Not, AluOp::Not),
            (Opcode::Shl, AluOp::Shl),
            (Opcode::Shr, AluOp::Shr),
        ] {
            programs.insert(
                op,
                vec![
                    MicroStep::new(S::SET_ACC | S::SET_FLAGS).alu(alu).enable(A),
                    MicroStep::new(S::ENABLE_ACC).set(B),
                ],
            );
        }
        programs.insert(
            Opcode::Cmp,
            vec![
                MicroStep::new(S::SET_TMP).enable(B),
                MicroStep::new(S::SET_FLAGS).alu(AluOp::Cmp).enable(A),
            ],
        );
        programs.insert(Opcode::Nop, vec![MicroStep::default()]);
        programs.insert(Opcode::Halt, vec![MicroStep::new(S::HALT)]);

        let undefined = match policy {
            UndefinedOpcodePolicy::Halt => vec![MicroStep::new(S::HALT)],
            UndefinedOpcodePolicy::NoOp => vec![MicroStep::default()],
        };

        Self {
            programs,
            undefined,
            policy,
        }
    }

    /// What undefined opcodes do.
    pub fn policy(&self) -> UndefinedOpcodePolicy {
        self.policy
    }

    /// Replaces (or adds) the execute steps for `op`.
    pub fn insert(&mut self, op: Opcode, steps: Vec<MicroStep>) {
        self.programs.insert(op, steps);
    }

    /// The execute steps for `op`, or the undefined-opcode program if the table has no entry.
    pub fn program(&self, op: Option<Opcode>) -> &[MicroStep] {
        op.and_then(|op| self.programs.get(&op))
            .filter(|steps| !steps.is_empty())
            .unwrap_or(&self.undefined)
    }

    /// Total ticks for one instruction, fetch included.
    pub fn ticks(&self, op: Opcode) -> usize {
        FETCH_LEN + self.program(Some(op)).len()
    }

    /// Checks that no step of any program, under any operand assignment, enables more than one
    /// driver onto the main bus.
    pub fn verify(&self) -> Result<(), ContentionViolation> {
        let check = |word: ControlWord| {
            let drivers = word.signals.main_bus_drivers();
            if drivers.len() > 1 {
                Err(ContentionViolation {
                    bus: "main".into(),
                    drivers,
                })
            } else {
                Ok(())
            }
        };
        for step in FETCH.iter().chain(&self.undefined) {
            check(step.resolve(None))?;
        }
        for (&op, steps) in &self.programs {
            for instr in operand_assignments(op) {
                for step in steps {
                    check(step.resolve(Some(&instr))).map_err(|mut v| {
                        v.bus = format!("main ({instr})");
                        v
                    })?;
                }
            }
        }
        Ok(())
    }
}

impl Default for MicrocodeTable {
    fn default() -> Self {
        Self::new(UndefinedOpcodePolicy::default())
    }
}

/// Every operand combination `op` can be encoded with.
fn operand_assignments(op: Opcode) -> Vec<Instruction> {
    let mut out = Vec::new();
    for a in Register::ALL {
        for b in Register::ALL {
            out.push(Instruction::new(op, InstrFormat::RR(a, b)));
        }
        out.push(Instruction::new(op, InstrFormat::R(a)));
        for direction in [IoDirection::In, IoDirection::Out] {
            for kind in [IoKind::Data, IoKind::Address] {
                let target = IoTarget { direction, kind };
                out.push(Instruction::new(op, InstrFormat::Io(target, a)));
            }
        }
    }
    out.push(Instruction::new(op, InstrFormat::Cond(Condition::all())));
    out.push(Instruction::new(op, InstrFormat::OpOnly));
    out.retain(|instr| instr.validate().is_ok());
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_table_has_no_contention() {
        MicrocodeTable::default().verify().unwrap();
        MicrocodeTable::new(UndefinedOpcodePolicy::NoOp)
            .verify()
            .unwrap();
    }

    #[test]
    fn test_verify_flags_two_drivers() {
        let mut table = MicrocodeTable::default();
        table.insert(
            Opcode::Nop,
            vec![MicroStep::new(Signals::ENABLE_ACC).enable(Operand::A)],
        );
        // NOP has no RegA slot, so the operand never resolves
        table.verify().unwrap();

        table.insert(
            Opcode::Add,
            vec![MicroStep::new(Signals::ENABLE_IAR).enable(Operand::B)],
        );
        let violation = table.verify().unwrap_err();
        assert_eq!(violation.drivers.len(), 2);
        assert!(violation.drivers.contains(&"iar".to_string()));
    }

    #[test]
    fn test_register_lines() {
        assert_eq!(Signals::set_reg(Register::R2), Signals::SET_R2);
        assert_eq!(Signals::enable_reg(Register::R3), Signals::ENABLE_R3);
        let lines: Signals = Register::ALL.into_iter().map(Signals::enable_reg).collect();
        let all = Signals::ENABLE_R0 | Signals::ENABLE_R1 | Signals::ENABLE_R2 | Signals::ENABLE_R3;
        assert_eq!(lines, all);

        // the generated flag setter is still reachable
        let mut signals = Signals::SET_TMP;
        signals.set(Signals::set_reg(Register::R0), true);
        signals.set(Signals::SET_TMP, false);
        assert_eq!(signals, Signals::SET_R0);
    }

    #[test]
    fn test_io_read_counts_peripheral_as_driver() {
        let step = MicroStep::new(Signals::ENABLE_R0 | Signals::IO_CLOCK_ENABLE);
        assert_eq!(
            step.resolve(None).signals.main_bus_drivers(),
            vec!["r0".to_string(), "peripheral".to_string()]
        );
    }

    #[test]
    fn test_resolve_operands() {
        let instr = Instruction::new(Opcode::Add, InstrFormat::RR(Register::R1, Register::R3));
        let word = MicroStep::new(Signals::SET_ACC)
            .alu(AluOp::Sub)
            .enable(Operand::A)
            .set(Operand::B)
            .resolve(Some(&instr));
        assert_eq!(
            word.signals,
            Signals::SET_ACC | Signals::ENABLE_R1 | Signals::SET_R3
        );
        assert_eq!(word.alu, AluOp::Sub);
    }

    #[test]
    fn test_resolve_io() {
        let out_addr = Instruction::new(
            Opcode::Io,
            InstrFormat::Io(
                IoTarget {
                    direction: IoDirection::Out,
                    kind: IoKind::Address,
                },
                Register::R2,
            ),
        );
        assert_eq!(
            MicroStep::io().resolve(Some(&out_addr)).signals,
            Signals::ENABLE_R2
                | Signals::IO_CLOCK_SET
                | Signals::IO_MODE
                | Signals::IO_DATA_OR_ADDRESS
        );
        let in_data = Instruction::new(
            Opcode::Io,
            InstrFormat::Io(
                IoTarget {
                    direction: IoDirection::In,
                    kind: IoKind::Data,
                },
                Register::R0,
            ),
        );
        assert_eq!(
            MicroStep::io().resolve(Some(&in_data)).signals,
            Signals::SET_R0 | Signals::IO_CLOCK_ENABLE
        );
    }

    #[test]
    fn test_undefined_opcode_has_explicit_program() {
        let halt = MicrocodeTable::new(UndefinedOpcodePolicy::Halt);
        assert_eq!(halt.program(None), [MicroStep::new(Signals::HALT)]);
        let nop = MicrocodeTable::new(UndefinedOpcodePolicy::NoOp);
        assert_eq!(nop.program(None), [MicroStep::default()]);
    }

    #[test]
    fn test_instruction_lengths() {
        let table = MicrocodeTable::default();
        assert_eq!(table.ticks(Opcode::Add), 6);
        assert_eq!(table.ticks(Opcode::Not), 5);
        assert_eq!(table.ticks(Opcode::Data), 6);
        assert_eq!(table.ticks(Opcode::Jmpr), 4);
        assert_eq!(table.ticks(Opcode::Halt), 4);
    }
}
