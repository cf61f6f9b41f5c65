//! Combinational logic for the simulator.
//!
//! Every gate is derived from [`nand`]. Stateful wrappers ([`Gate`], [`WideGate`], [`WordGate`])
//! remember their last output so components can be re-evaluated once per tick and inspected
//! afterwards.

use crate::plat::{Word, WORD_BITS};

pub mod bit;
pub mod netlist;

/// The Not-And gate. All other gates are built from this one.
pub fn nand(a: bool, b: bool) -> bool {
    !(a & b)
}

/// NAND with both inputs tied together.
pub fn not(a: bool) -> bool {
    nand(a, a)
}

/// Inverted NAND.
pub fn and(a: bool, b: bool) -> bool {
    not(nand(a, b))
}

/// NAND of the inverted inputs.
pub fn or(a: bool, b: bool) -> bool {
    nand(not(a), not(b))
}

/// The four-NAND exclusive or.
pub fn xor(a: bool, b: bool) -> bool {
    let n = nand(a, b);
    nand(nand(a, n), nand(b, n))
}

/// The primitive gate kinds understood by the [netlist evaluator][netlist::Netlist].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GateKind {
    /// All inputs high.
    And,
    /// Any input high.
    Or,
    /// Inverts its single input.
    Not,
    /// Not all inputs high.
    Nand,
    /// No input high.
    Nor,
    /// An odd number of inputs high.
    Xor,
    /// An even number of inputs high.
    Xnor,
    /// Passes its single input through unchanged.
    Buffer,
}

impl GateKind {
    /// Returns `true` if this kind takes exactly one input.
    pub fn is_unary(self) -> bool {
        matches!(self, GateKind::Not | GateKind::Buffer)
    }

    /// Evaluates the gate's boolean function over `inputs`.
    ///
    /// Multi-input kinds reduce over every input. Unary kinds only look at the first input.
    /// An empty input list evaluates as if every input were `false`.
    pub fn eval(self, inputs: &[bool]) -> bool {
        let first = inputs.first().copied().unwrap_or(false);
        match self {
            GateKind::Buffer => first,
            GateKind::Not => not(first),
            GateKind::And => inputs.iter().skip(1).fold(first, |acc, &i| and(acc, i)),
            GateKind::Or => inputs.iter().skip(1).fold(first, |acc, &i| or(acc, i)),
            GateKind::Xor => inputs.iter().skip(1).fold(first, |acc, &i| xor(acc, i)),
            GateKind::Nand => not(GateKind::And.eval(inputs)),
            GateKind::Nor => not(GateKind::Or.eval(inputs)),
            GateKind::Xnor => not(GateKind::Xor.eval(inputs)),
        }
    }
}

/// A single gate that remembers the result of its last update.
#[derive(Debug, Clone)]
pub struct Gate {
    kind: GateKind,
    output: Option<bool>,
}

impl Gate {
    /// A gate that has not been updated yet.
    pub fn new(kind: GateKind) -> Self {
        Self { kind, output: None }
    }

    /// The primitive this gate evaluates.
    pub fn kind(&self) -> GateKind {
        self.kind
    }

    /// Recomputes the output from `inputs` and returns it.
    pub fn update(&mut self, inputs: &[bool]) -> bool {
        let out = self.kind.eval(inputs);
        self.output = Some(out);
        out
    }

    /// The last computed output, or `None` if the gate has never been updated.
    pub fn output(&self) -> Option<bool> {
        self.output
    }
}

/// An `N`-input composite gate, such as the 8-input AND used in address decoding.
#[derive(Debug, Clone)]
pub struct WideGate<const N: usize> {
    gate: Gate,
}

impl<const N: usize> WideGate<N> {
    /// An `N`-input gate of `kind`.
    pub fn new(kind: GateKind) -> Self {
        Self {
            gate: Gate::new(kind),
        }
    }

    /// Recomputes the output from all `N` inputs.
    pub fn update(&mut self, inputs: [bool; N]) -> bool {
        self.gate.update(&inputs)
    }

    /// The last computed output.
    pub fn output(&self) -> Option<bool> {
        self.gate.output()
    }
}

/// Applies one primitive across every line of two words independently.
#[derive(Debug, Clone)]
pub struct WordGate {
    kind: GateKind,
    output: Option<Word>,
}

impl WordGate {
    /// A 16-line gate of `kind`.
    pub fn new(kind: GateKind) -> Self {
        Self { kind, output: None }
    }

    /// Recomputes each output line from the matching lines of `a` and `b`.
    /// Unary kinds ignore `b`.
    pub fn update(&mut self, a: Word, b: Word) -> Word {
        let out = word_map(self.kind, a, b);
        self.output = Some(out);
        out
    }

    /// The last computed word.
    pub fn output(&self) -> Option<Word> {
        self.output
    }
}

/// Pure form of [`WordGate::update`].
pub fn word_map(kind: GateKind, a: Word, b: Word) -> Word {
    (0..WORD_BITS).fold(0, |acc, i| {
        let a = wire(a, i);
        let line = if kind.is_unary() {
            kind.eval(&[a])
        } else {
            kind.eval(&[a, wire(b, i)])
        };
        acc | (Word::from(line) << i)
    })
}

/// Reads line `i` of a word.
pub fn wire(word: Word, i: usize) -> bool {
    (word >> i) & 1 == 1
}
