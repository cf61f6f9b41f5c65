//! The arithmetic and logic unit.

use crate::{
    circuit::{self, and, or, word_map, xor, GateKind},
    plat::{Word, WORD_BITS},
};

use super::{
    bus::{Board, BusId},
    WiringError,
};

/// The ALU's current mode of operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum AluOp {
    /// Two's complement addition.
    #[default]
    Add = 0,
    /// `a - b`.
    Sub,
    /// Bitwise AND.
    And,
    /// Bitwise OR.
    Or,
    /// Bitwise XOR.
    Xor,
    /// Only uses the left operand.
    Not,
    /// Only uses the left operand.
    Shl,
    /// Only uses the left operand.
    Shr,
    /// Subtraction whose result is only meant for the flags.
    Cmp,
}

bitflags::bitflags! {
    /// The ALU status flags. The layout matches [`Condition`][crate::plat::Condition] so a jump
    /// condition can be tested against the flags register line by line.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
    pub struct AluFlags: u16 {
        /// Set if bit 15 of the result is 1.
        const NEGATIVE = 1 << 0;
        /// Set if an add/subtract overflowed as a signed operation.
        const OVERFLOW = 1 << 1;
        /// Set if the result was zero.
        const ZERO = 1 << 2;
        /// Carry out of the adder, or the bit shifted out by a shift.
        const CARRY = 1 << 3;
    }
}

/// Sum and carry-out of one bit position.
pub fn full_adder(a: bool, b: bool, carry_in: bool) -> (bool, bool) {
    let half = xor(a, b);
    let sum = xor(half, carry_in);
    let carry = or(and(a, b), and(half, carry_in));
    (sum, carry)
}

/// Ripple-carry addition. Returns `(sum, carry_out, signed_overflow)`.
pub fn ripple_add(a: Word, b: Word, carry_in: bool) -> (Word, bool, bool) {
    let mut carry = carry_in;
    let mut carry_into_msb = false;
    let mut sum: Word = 0;
    for i in 0..WORD_BITS {
        if i == WORD_BITS - 1 {
            carry_into_msb = carry;
        }
        let (s, c) = full_adder(circuit::wire(a, i), circuit::wire(b, i), carry);
        sum |= Word::from(s) << i;
        carry = c;
    }
    (sum, carry, xor(carry_into_msb, carry))
}

/// Computes `a op b`. Pure: nothing is remembered between calls.
pub fn compute(a: Word, b: Word, op: AluOp) -> (Word, AluFlags) {
    let mut flags = AluFlags::empty();
    let result = match op {
        AluOp::Add => {
            let (sum, carry, overflow) = ripple_add(a, b, false);
            flags.set(AluFlags::CARRY, carry);
            flags.set(AluFlags::OVERFLOW, overflow);
            sum
        }
        AluOp::Sub | AluOp::Cmp => {
            let (diff, carry, overflow) = ripple_add(a, word_map(GateKind::Not, b, 0), true);
            flags.set(AluFlags::CARRY, carry);
            flags.set(AluFlags::OVERFLOW, overflow);
            diff
        }
        AluOp::And => word_map(GateKind::And, a, b),
        AluOp::Or => word_map(GateKind::Or, a, b),
        AluOp::Xor => word_map(GateKind::Xor, a, b),
        AluOp::Not => word_map(GateKind::Not, a, 0),
        AluOp::Shl => {
            flags.set(AluFlags::CARRY, circuit::wire(a, WORD_BITS - 1));
            a << 1
        }
        AluOp::Shr => {
            flags.set(AluFlags::CARRY, circuit::wire(a, 0));
            a >> 1
        }
    };
    let lines: [bool; WORD_BITS] = std::array::from_fn(|i| circuit::wire(result, i));
    flags.set(AluFlags::ZERO, GateKind::Nor.eval(&lines));
    flags.set(AluFlags::NEGATIVE, lines[WORD_BITS - 1]);
    (result, flags)
}

/// The ALU as a wired component. It recomputes and drives its result and flags buses every tick,
/// whether or not anything latches them.
#[derive(Debug, Clone, Default)]
pub struct Alu {
    /// Operation selected by the current control word.
    pub op: AluOp,
    result_bus: Option<BusId>,
    flags_bus: Option<BusId>,
}

impl Alu {
    /// An unconnected ALU in `Add` mode.
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves the result and flags buses.
    pub fn connect(&mut self, result_bus: BusId, flags_bus: BusId) -> Result<(), WiringError> {
        if self.result_bus.is_some() {
            return Err(WiringError::AlreadyConnected {
                component: "alu".into(),
            });
        }
        self.result_bus = Some(result_bus);
        self.flags_bus = Some(flags_bus);
        Ok(())
    }

    /// Settles the ALU from its two operands and drives the result and flags buses.
    pub fn update(&self, board: &mut Board, a: Word, b: Word) -> Result<(), WiringError> {
        let (result, flags) = compute(a, b, self.op);
        for (bus, value) in [(self.result_bus, result), (self.flags_bus, flags.bits())] {
            let id = bus.ok_or_else(|| WiringError::Unconnected {
                component: "alu".into(),
            })?;
            board
                .bus_mut(id)
                .ok_or(WiringError::UnknownBus {
                    component: "alu".into(),
                    bus: id.index(),
                })?
                .set_value("alu", value);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_wraps_and_sets_carry() {
        let (r, f) = compute(0xFFFF, 0x0001, AluOp::Add);
        assert_eq!(r, 0);
        assert!(f.contains(AluFlags::CARRY | AluFlags::ZERO));
        assert!(!f.contains(AluFlags::OVERFLOW));

        let (r, f) = compute(1234, 4321, AluOp::Add);
        assert_eq!(r, 5555);
        assert_eq!(f, AluFlags::empty());
    }

    #[test]
    fn test_add_matches_wrapping_add() {
        for &(a, b) in &[
            (0u16, 0u16),
            (0x7FFF, 1),
            (0x8000, 0x8000),
            (0x1234, 0xEDCC),
            (0xAAAA, 0x5555),
            (300, 65000),
        ] {
            let (r, f) = compute(a, b, AluOp::Add);
            assert_eq!(r, a.wrapping_add(b));
            assert_eq!(f.contains(AluFlags::CARRY), a.checked_add(b).is_none());
            assert_eq!(
                f.contains(AluFlags::OVERFLOW),
                (a as i16).checked_add(b as i16).is_none()
            );
        }
    }

    #[test]
    fn test_signed_overflow() {
        let (r, f) = compute(0x7FFF, 0x0001, AluOp::Add);
        assert_eq!(r, 0x8000);
        assert!(f.contains(AluFlags::OVERFLOW | AluFlags::NEGATIVE));
        assert!(!f.contains(AluFlags::CARRY));

        let (_, f) = compute(0x8000, 0x0001, AluOp::Sub);
        assert!(f.contains(AluFlags::OVERFLOW));
    }

    #[test]
    fn test_sub_carry_means_no_borrow() {
        let (r, f) = compute(5, 3, AluOp::Sub);
        assert_eq!(r, 2);
        assert!(f.contains(AluFlags::CARRY));

        let (r, f) = compute(3, 5, AluOp::Sub);
        assert_eq!(r, 0xFFFE);
        assert!(!f.contains(AluFlags::CARRY));
        assert!(f.contains(AluFlags::NEGATIVE));

        let (r, f) = compute(7, 7, AluOp::Cmp);
        assert_eq!(r, 0);
        assert!(f.contains(AluFlags::ZERO | AluFlags::CARRY));
    }

    #[test]
    fn test_logic_and_shifts() {
        assert_eq!(compute(0xF0F0, 0xFF00, AluOp::And).0, 0xF000);
        assert_eq!(compute(0xF0F0, 0x0F00, AluOp::Or).0, 0xFFF0);
        assert_eq!(compute(0xFFFF, 0x0F0F, AluOp::Xor).0, 0xF0F0);
        assert_eq!(compute(0x00FF, 0xDEAD, AluOp::Not).0, 0xFF00);

        let (r, f) = compute(0x8001, 0, AluOp::Shl);
        assert_eq!(r, 0x0002);
        assert!(f.contains(AluFlags::CARRY));
        let (r, f) = compute(0x8001, 0, AluOp::Shr);
        assert_eq!(r, 0x4000);
        assert!(f.contains(AluFlags::CARRY));
        let (_, f) = compute(0x0F0F, 0xF0F0, AluOp::And);
        assert_eq!(f, AluFlags::ZERO);
    }

    #[test]
    fn test_compute_is_stateless() {
        let first = compute(0x1234, 0x4321, AluOp::Sub);
        compute(0xFFFF, 0xFFFF, AluOp::Add);
        assert_eq!(compute(0x1234, 0x4321, AluOp::Sub), first);
    }

    #[test]
    fn test_alu_drives_result_and_flags() {
        let mut board = Board::new();
        let result = board.add_bus("alu").unwrap();
        let flags = board.add_bus("alu_flags").unwrap();
        let mut alu = Alu::new();
        alu.connect(result, flags).unwrap();
        alu.op = AluOp::Sub;
        alu.update(&mut board, 10, 10).unwrap();
        assert_eq!(board.bus(result).unwrap().value(), 0);
        assert_eq!(
            AluFlags::from_bits_truncate(board.bus(flags).unwrap().value()),
            AluFlags::ZERO | AluFlags::CARRY
        );
    }
}
