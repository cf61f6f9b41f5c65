//! Common platform definitions shared by the circuit, emulator and peripheral modules.

use std::fmt;

use thiserror::Error;

/// A machine word. Every bus and register in the machine is this wide.
pub type Word = u16;

/// Number of wires in a [Word].
pub const WORD_BITS: usize = 16;

/// An error for the core platform definitions.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlatformError {
    /// The opcode byte names no instruction.
    #[error("undefined opcode {0:#04x}")]
    UndefinedOpcode(u8),
    /// A register field outside R0 to R3.
    #[error("invalid register {0}")]
    InvalidRegister(u8),
    /// The operands do not fit the opcode.
    #[error("invalid instruction format for {0:?}")]
    InvalidInstruction(Opcode),
}

/// Type alias for Result<T, [PlatformError]>.
pub type PResult<T> = Result<T, PlatformError>;

/// The four general purpose registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Register {
    /// General-purpose register 0.
    R0 = 0,
    /// General-purpose register 1.
    R1,
    /// General-purpose register 2.
    R2,
    /// General-purpose register 3.
    R3,
}

impl Register {
    /// All four, in encoding order.
    pub const ALL: [Register; 4] = [Register::R0, Register::R1, Register::R2, Register::R3];
}

impl TryFrom<u8> for Register {
    type Error = PlatformError;

    fn try_from(value: u8) -> Result<Self, PlatformError> {
        match value {
            0 => Ok(Self::R0),
            1 => Ok(Self::R1),
            2 => Ok(Self::R2),
            3 => Ok(Self::R3),
            _ => Err(PlatformError::InvalidRegister(value)),
        }
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", *self as u8)
    }
}

/// The opcodes understood by the control unit.
///
/// ALU opcode notes ([ADD][Opcode::Add] .. [CMP][Opcode::Cmp]):
///
/// - Binary operations compute `regB <- regA op regB`.
/// - Unary operations ([NOT][Opcode::Not], [SHL][Opcode::Shl], [SHR][Opcode::Shr]) compute
///   `regB <- op regA`.
/// - Every ALU operation latches the flags register. [CMP][Opcode::Cmp] latches *only* the flags.
///
/// [DATA][Opcode::Data], [JMP][Opcode::Jmp] and [JMPIF][Opcode::Jmpif] are followed by a second
/// word in memory and advance the instruction address register by two.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    /* Memory */
    /// `regB <- mem[regA]`
    Load = 0x00,
    /// `mem[regA] <- regB`
    Store = 0x01,
    /// `regB <- (next word)`
    Data = 0x02,

    /* Branching */
    /// `IAR <- regB`
    Jmpr = 0x03,
    /// `IAR <- (next word)`
    Jmp = 0x04,
    /// "Jump If"
    /// ```text
    /// if FL & condition != 0 {
    ///     IAR <- (next word)
    /// }
    /// ```
    Jmpif = 0x05,
    /// Clears every flag.
    Clf = 0x06,

    /* IO */
    /// Reads from or writes to the IO bus, depending on the instruction's [IoTarget].
    Io = 0x07,

    /* ALU */
    /// `regB <- regA + regB`
    Add = 0x08,
    /// `regB <- regA - regB`
    Sub = 0x09,
    /// `regB <- regA & regB`
    And = 0x0A,
    /// `regB <- regA | regB`
    Or = 0x0B,
    /// `regB <- regA ^ regB`
    Xor = 0x0C,
    /// `regB <- !regA`
    Not = 0x0D,
    /// `regB <- regA << 1`
    Shl = 0x0E,
    /// `regB <- regA >> 1`
    Shr = 0x0F,
    /// Sets the flags for `regA - regB` without storing the difference.
    Cmp = 0x10,

    /* Misc */
    /// Does nothing for one execute step.
    Nop = 0xFE,
    /// Stops the clock.
    Halt = 0xFF,
}

impl Opcode {
    /// Number of words the instruction occupies in memory.
    pub fn words(self) -> Word {
        match self {
            Opcode::Data | Opcode::Jmp | Opcode::Jmpif => 2,
            _ => 1,
        }
    }
}

impl TryFrom<u8> for Opcode {
    type Error = PlatformError;

    fn try_from(value: u8) -> Result<Self, PlatformError> {
        match value {
            0x00 => Ok(Self::Load),
            0x01 => Ok(Self::Store),
            0x02 => Ok(Self::Data),
            0x03 => Ok(Self::Jmpr),
            0x04 => Ok(Self::Jmp),
            0x05 => Ok(Self::Jmpif),
            0x06 => Ok(Self::Clf),
            0x07 => Ok(Self::Io),
            0x08 => Ok(Self::Add),
            0x09 => Ok(Self::Sub),
            0x0A => Ok(Self::And),
            0x0B => Ok(Self::Or),
            0x0C => Ok(Self::Xor),
            0x0D => Ok(Self::Not),
            0x0E => Ok(Self::Shl),
            0x0F => Ok(Self::Shr),
            0x10 => Ok(Self::Cmp),
            0xFE => Ok(Self::Nop),
            0xFF => Ok(Self::Halt),
            _ => Err(PlatformError::UndefinedOpcode(value)),
        }
    }
}

bitflags::bitflags! {
    /// Flag selection for [JMPIF][Opcode::Jmpif], stored in bits 7..4 of the instruction word.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
    pub struct Condition: u8 {
        /// The last ALU result had its top bit set.
        const NEGATIVE = 1 << 0;
        /// The last ALU result overflowed as a signed number.
        const OVERFLOW = 1 << 1;
        /// The last ALU result was zero.
        const ZERO = 1 << 2;
        /// The last ALU operation carried out of the top bit.
        const CARRY = 1 << 3;
    }
}

/// Direction of an [IO][Opcode::Io] transfer, as seen from the CPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IoDirection {
    /// Peripheral to register.
    In,
    /// Register to peripheral.
    Out,
}

/// What an [IO][Opcode::Io] transfer carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IoKind {
    /// A data word.
    Data,
    /// A peripheral address.
    Address,
}

/// Direction and kind of an IO transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IoTarget {
    /// Which way the word travels.
    pub direction: IoDirection,
    /// Whether the word is data or an address.
    pub kind: IoKind,
}

const IO_MODE_BIT: Word = 1 << 2;
const IO_DATA_OR_ADDRESS_BIT: Word = 1 << 3;

/// Operand layouts packed into the low byte of an instruction word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InstrFormat {
    /// `<Opcode, ZEROS, RegA, RegB>`
    RR(Register, Register),
    /// `<Opcode, ZEROS, ZEROS, RegB>`
    R(Register),
    /// `<Opcode, Condition, ZEROS, ZEROS>`
    Cond(Condition),
    /// `<Opcode, ZEROS, DataOrAddress Mode, RegB>`
    Io(IoTarget, Register),
    /// `<Opcode, ZEROS, ZEROS, ZEROS>`
    OpOnly,
}

/// A decoded instruction word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Instruction {
    /// The opcode byte.
    pub op: Opcode,
    /// The operands packed into the low byte.
    pub format: InstrFormat,
}

impl Instruction {
    /// Pairs an opcode with its operands. Call [validate][Self::validate] before trusting it.
    pub fn new(op: Opcode, format: InstrFormat) -> Self {
        Self { op, format }
    }

    /// Checks if this instruction has a valid format for its opcode.
    pub fn validate(self) -> PResult<()> {
        #[doc(hidden)]
        macro_rules! assert_format {
            ($fmt:pat) => {
                if matches!(self.format, $fmt) {
                    Ok(())
                } else {
                    Err(PlatformError::InvalidInstruction(self.op))
                }
            };
        }
        match self.op {
            Opcode::Load | Opcode::Store => assert_format!(InstrFormat::RR(_, _)),
            Opcode::Data | Opcode::Jmpr => assert_format!(InstrFormat::R(_)),
            Opcode::Jmpif => assert_format!(InstrFormat::Cond(_)),
            Opcode::Io => assert_format!(InstrFormat::Io(_, _)),
            Opcode::Add
            | Opcode::Sub
            | Opcode::And
            | Opcode::Or
            | Opcode::Xor
            | Opcode::Not
            | Opcode::Shl
            | Opcode::Shr
            | Opcode::Cmp => assert_format!(InstrFormat::RR(_, _)),
            Opcode::Jmp | Opcode::Clf | Opcode::Nop | Opcode::Halt => {
                assert_format!(InstrFormat::OpOnly)
            }
        }
    }

    /// Packs the instruction into its machine word.
    pub fn encode(self) -> PResult<Word> {
        self.validate()?;
        let operands = match self.format {
            InstrFormat::RR(a, b) => (Word::from(a as u8) << 2) | Word::from(b as u8),
            InstrFormat::R(b) => Word::from(b as u8),
            InstrFormat::Cond(cond) => Word::from(cond.bits()) << 4,
            InstrFormat::Io(target, b) => {
                let mut bits = Word::from(b as u8);
                if target.direction == IoDirection::Out {
                    bits |= IO_MODE_BIT;
                }
                if target.kind == IoKind::Address {
                    bits |= IO_DATA_OR_ADDRESS_BIT;
                }
                bits
            }
            InstrFormat::OpOnly => 0,
        };
        Ok((Word::from(self.op as u8) << 8) | operands)
    }

    /// Unpacks a machine word. Bits the opcode's format doesn't use are ignored.
    pub fn decode(word: Word) -> PResult<Self> {
        let op: Opcode = ((word >> 8) as u8).try_into()?;
        let reg_a: Register = ((word >> 2 & 0b11) as u8).try_into()?;
        let reg_b: Register = ((word & 0b11) as u8).try_into()?;
        let format = match op {
            Opcode::Load
            | Opcode::Store
            | Opcode::Add
            | Opcode::Sub
            | Opcode::And
            | Opcode::Or
            | Opcode::Xor
            | Opcode::Not
            | Opcode::Shl
            | Opcode::Shr
            | Opcode::Cmp => InstrFormat::RR(reg_a, reg_b),
            Opcode::Data | Opcode::Jmpr => InstrFormat::R(reg_b),
            Opcode::Jmpif => InstrFormat::Cond(Condition::from_bits_truncate((word >> 4) as u8)),
            Opcode::Io => {
                let direction = if word & IO_MODE_BIT != 0 {
                    IoDirection::Out
                } else {
                    IoDirection::In
                };
                let kind = if word & IO_DATA_OR_ADDRESS_BIT != 0 {
                    IoKind::Address
                } else {
                    IoKind::Data
                };
                InstrFormat::Io(IoTarget { direction, kind }, reg_b)
            }
            Opcode::Jmp | Opcode::Clf | Opcode::Nop | Opcode::Halt => InstrFormat::OpOnly,
        };
        Ok(Self { op, format })
    }

    /// The register in the `RegA` slot, if the format has one.
    pub fn reg_a(self) -> Option<Register> {
        match self.format {
            InstrFormat::RR(a, _) => Some(a),
            _ => None,
        }
    }

    /// The register in the `RegB` slot, if the format has one.
    pub fn reg_b(self) -> Option<Register> {
        match self.format {
            InstrFormat::RR(_, b) | InstrFormat::R(b) | InstrFormat::Io(_, b) => Some(b),
            _ => None,
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mnemonic = format!("{:?}", self.op).to_lowercase();
        match self.format {
            InstrFormat::RR(a, b) => write!(f, "{mnemonic:<6} {a} {b}"),
            InstrFormat::R(b) => write!(f, "{mnemonic:<6} {b}"),
            InstrFormat::Cond(cond) => write!(f, "{mnemonic:<6} {cond:?}"),
            InstrFormat::Io(target, b) => {
                let dir = match target.direction {
                    IoDirection::In => "in",
                    IoDirection::Out => "out",
                };
                let kind = match target.kind {
                    IoKind::Data => "data",
                    IoKind::Address => "addr",
                };
                write!(f, "{dir:<6} {kind} {b}")
            }
            InstrFormat::OpOnly => write!(f, "{mnemonic}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instruction_encode() {
        let instr = Instruction::new(Opcode::Add, InstrFormat::RR(Register::R2, Register::R3));
        assert_eq!(instr.encode().unwrap(), 0x080B);

        let instr = Instruction::new(Opcode::Jmpif, InstrFormat::Cond(Condition::ZERO));
        assert_eq!(instr.encode().unwrap(), 0x0540);

        let out_addr = IoTarget {
            direction: IoDirection::Out,
            kind: IoKind::Address,
        };
        let instr = Instruction::new(Opcode::Io, InstrFormat::Io(out_addr, Register::R1));
        assert_eq!(instr.encode().unwrap(), 0x070D);
    }

    #[test]
    fn test_instruction_decode() {
        assert_eq!(
            Instruction::decode(0x0206).unwrap(),
            Instruction::new(Opcode::Data, InstrFormat::R(Register::R2))
        );
        let io = Instruction::decode(0x0701).unwrap();
        assert_eq!(
            io.format,
            InstrFormat::Io(
                IoTarget {
                    direction: IoDirection::In,
                    kind: IoKind::Data
                },
                Register::R1
            )
        );
        assert_eq!(io.reg_b(), Some(Register::R1));
        assert_eq!(io.reg_a(), None);
    }

    #[test]
    fn test_undefined_opcode() {
        assert_eq!(
            Instruction::decode(0x4200),
            Err(PlatformError::UndefinedOpcode(0x42))
        );
    }

    #[test]
    fn test_invalid_format_rejected() {
        let instr = Instruction::new(Opcode::Halt, InstrFormat::R(Register::R0));
        assert_eq!(
            instr.encode(),
            Err(PlatformError::InvalidInstruction(Opcode::Halt))
        );
    }
}
