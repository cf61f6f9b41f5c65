//! One-bit memory built from gates.

use super::{and, not, or};

/// The only gate with memory: a gated latch holding one boolean across ticks.
///
/// While `set` is asserted the stored value tracks `value`; otherwise it holds.
/// An asserted `reset` forces the stored value to `false` and wins over any
/// concurrent `set`/`value` combination.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Bit {
    stored: bool,
}

impl Bit {
    /// Creates a new [`Bit`] holding `false`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Latches the next state and returns it.
    pub fn update(&mut self, value: bool, set: bool, reset: bool) -> bool {
        let captured = and(set, value);
        let held = and(not(set), self.stored);
        self.stored = and(not(reset), or(captured, held));
        self.stored
    }

    /// The stored value.
    pub fn output(&self) -> bool {
        self.stored
    }
}
