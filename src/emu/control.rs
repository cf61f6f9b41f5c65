//! Microcode sequencing: the step counter and instruction decode.

use crate::plat::{Instruction, Opcode, PlatformError, Word};

use super::microcode::{ControlWord, MicrocodeTable, FETCH, FETCH_LEN};

/// The instruction currently being executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decoded {
    /// A valid instruction.
    Defined(Instruction),
    /// The opcode byte had no micro-program. Runs the table's undefined-opcode program.
    Undefined(u8),
}

impl Decoded {
    /// Decodes an instruction register value.
    pub fn decode(word: Word) -> Self {
        match Instruction::decode(word) {
            Ok(instr) => Decoded::Defined(instr),
            Err(PlatformError::UndefinedOpcode(op)) => Decoded::Undefined(op),
            // every other decode failure is an operand problem, which can't happen with 2-bit
            // register fields; treat it like an unknown opcode anyway
            Err(_) => Decoded::Undefined((word >> 8) as u8),
        }
    }

    /// The opcode, if defined.
    pub fn opcode(&self) -> Option<Opcode> {
        match self {
            Decoded::Defined(instr) => Some(instr.op),
            Decoded::Undefined(_) => None,
        }
    }

    /// The instruction, if defined.
    pub fn instruction(&self) -> Option<&Instruction> {
        match self {
            Decoded::Defined(instr) => Some(instr),
            Decoded::Undefined(_) => None,
        }
    }
}

/// Where the sequencer is within the current instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Shared fetch step `n`.
    Fetch(usize),
    /// Step `n` of the instruction's own micro-program.
    Execute(usize),
}

/// The sequencer. Turns the step counter and the latched instruction into one [ControlWord] per
/// tick.
#[derive(Debug, Clone)]
pub struct ControlUnit {
    table: MicrocodeTable,
    step: usize,
    current: Option<Decoded>,
}

impl ControlUnit {
    /// Starts at the first fetch step.
    pub fn new(table: MicrocodeTable) -> Self {
        Self {
            table,
            step: 0,
            current: None,
        }
    }

    /// The micro-programs being sequenced.
    pub fn table(&self) -> &MicrocodeTable {
        &self.table
    }

    /// Raw step counter, counting fetch steps.
    pub fn step(&self) -> usize {
        self.step
    }

    /// Where the step counter sits within the fetch or execute sequence.
    pub fn phase(&self) -> Phase {
        if self.step < FETCH_LEN {
            Phase::Fetch(self.step)
        } else {
            Phase::Execute(self.step - FETCH_LEN)
        }
    }

    /// The instruction being executed, once it has been decoded.
    pub fn current(&self) -> Option<Decoded> {
        self.current
    }

    /// Produces this tick's control word. On the first execute step the instruction register's
    /// stored value is decoded.
    pub fn assert(&mut self, ir: Word) -> ControlWord {
        let exec = match self.phase() {
            Phase::Fetch(n) => return FETCH[n].resolve(None),
            Phase::Execute(n) => n,
        };
        let decoded = match self.current {
            Some(decoded) if exec > 0 => decoded,
            _ => {
                let decoded = Decoded::decode(ir);
                match decoded {
                    Decoded::Defined(instr) => log::debug!(">>> {}", instr),
                    Decoded::Undefined(op) => log::warn!(
                        "undefined opcode {:#04x} ({:?} policy)",
                        op,
                        self.table.policy()
                    ),
                }
                self.current = Some(decoded);
                decoded
            }
        };
        let program = self.table.program(decoded.opcode());
        program[exec].resolve(decoded.instruction())
    }

    /// Forgets a decode made by a tick that did not complete, so the retried tick decodes again.
    pub fn abandon(&mut self) {
        if self.phase() == Phase::Execute(0) {
            self.current = None;
        }
    }

    /// Moves to the next step. Returns `true` if the instruction just completed, in which case the
    /// next tick begins a new fetch.
    pub fn advance(&mut self) -> bool {
        let len = match self.current {
            Some(decoded) => FETCH_LEN + self.table.program(decoded.opcode()).len(),
            None => usize::MAX,
        };
        self.step += 1;
        if self.step >= len {
            self.step = 0;
            self.current = None;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        emu::microcode::{Signals, UndefinedOpcodePolicy},
        plat::{InstrFormat, Register},
    };

    fn run_instruction(cu: &mut ControlUnit, ir: Word) -> Vec<ControlWord> {
        let mut words = Vec::new();
        loop {
            words.push(cu.assert(ir));
            if cu.advance() {
                return words;
            }
        }
    }

    #[test]
    fn test_step_counter_cycles_through_fetch_and_execute() {
        let mut cu = ControlUnit::new(MicrocodeTable::default());
        let add = Instruction::new(Opcode::Add, InstrFormat::RR(Register::R0, Register::R1))
            .encode()
            .unwrap();
        assert_eq!(cu.phase(), Phase::Fetch(0));
        let words = run_instruction(&mut cu, add);
        assert_eq!(words.len(), cu.table().ticks(Opcode::Add));
        assert_eq!(cu.phase(), Phase::Fetch(0));
        assert_eq!(cu.current(), None);
        assert!(words[0].signals.contains(Signals::ENABLE_IAR | Signals::SET_MAR));
        assert_eq!(words[3].signals, Signals::SET_TMP | Signals::ENABLE_R1);
        assert_eq!(words[4].signals & Signals::ENABLE_R0, Signals::ENABLE_R0);
    }

    #[test]
    fn test_decode_happens_once_per_instruction() {
        let mut cu = ControlUnit::new(MicrocodeTable::default());
        let not = Instruction::new(Opcode::Not, InstrFormat::RR(Register::R2, Register::R3))
            .encode()
            .unwrap();
        for _ in 0..FETCH_LEN {
            cu.assert(0);
            cu.advance();
        }
        cu.assert(not);
        cu.advance();
        // IR changing mid-instruction must not affect the remaining steps
        let word = cu.assert(0xFF00);
        assert_eq!(word.signals, Signals::ENABLE_ACC | Signals::SET_R3);
    }

    #[test]
    fn test_abandon_forgets_first_execute_decode() {
        let mut cu = ControlUnit::new(MicrocodeTable::default());
        let halt = Instruction::new(Opcode::Halt, InstrFormat::OpOnly)
            .encode()
            .unwrap();
        for _ in 0..FETCH_LEN {
            cu.assert(halt);
            cu.advance();
        }
        cu.assert(halt);
        assert!(cu.current().is_some());
        cu.abandon();
        assert_eq!(cu.current(), None);
        assert_eq!(cu.phase(), Phase::Execute(0));
    }

    #[test]
    fn test_undefined_opcode_runs_explicit_program() {
        let mut cu = ControlUnit::new(MicrocodeTable::new(UndefinedOpcodePolicy::Halt));
        let words = run_instruction(&mut cu, 0x4200);
        assert_eq!(words.len(), FETCH_LEN + 1);
        assert!(words[FETCH_LEN].signals.contains(Signals::HALT));

        let mut cu = ControlUnit::new(MicrocodeTable::new(UndefinedOpcodePolicy::NoOp));
        let words = run_instruction(&mut cu, 0x4200);
        assert_eq!(words[FETCH_LEN].signals, Signals::empty());
    }
}
