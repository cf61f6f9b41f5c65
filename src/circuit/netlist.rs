//! A data-driven gate network.
//!
//! A [`Netlist`] is a list of nodes, each either an input wire or a gate reading wires created
//! before it. Because a gate can only reference earlier wires the network is acyclic by
//! construction, and one pass in insertion order settles every wire.

use thiserror::Error;

use super::GateKind;

/// A malformed netlist or a bad evaluation request.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum NetlistError {
    /// A gate referenced a wire that was never created.
    #[error("wire {0} does not exist")]
    UnknownWire(usize),
    /// A gate got the wrong number of inputs for its kind.
    #[error("{kind:?} gate given {found} inputs")]
    Arity { kind: GateKind, found: usize },
    /// `evaluate` was handed the wrong number of input values.
    #[error("expected {expected} input values, got {found}")]
    InputCount { expected: usize, found: usize },
}

/// Handle to one wire of a [`Netlist`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WireId(usize);

#[derive(Debug, Clone)]
enum Node {
    Input,
    Gate { kind: GateKind, inputs: Vec<WireId> },
}

/// Gates wired into an acyclic network. Every gate only reads wires created before it, so a
/// single pass in creation order settles the network.
#[derive(Debug, Clone, Default)]
pub struct Netlist {
    nodes: Vec<Node>,
    inputs: Vec<WireId>,
    values: Vec<bool>,
    settled: bool,
    scratch: Vec<bool>,
}

impl Netlist {
    /// An empty network.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an external input wire. Input values are supplied to [`evaluate`][Self::evaluate]
    /// in the order their wires were created.
    pub fn input(&mut self) -> WireId {
        let id = WireId(self.nodes.len());
        self.nodes.push(Node::Input);
        self.inputs.push(id);
        id
    }

    /// Adds a gate reading the given wires and returns its output wire.
    pub fn gate(&mut self, kind: GateKind, inputs: &[WireId]) -> Result<WireId, NetlistError> {
        if inputs.is_empty() || (kind.is_unary() && inputs.len() != 1) {
            return Err(NetlistError::Arity {
                kind,
                found: inputs.len(),
            });
        }
        if let Some(bad) = inputs.iter().find(|w| w.0 >= self.nodes.len()) {
            return Err(NetlistError::UnknownWire(bad.0));
        }
        let id = WireId(self.nodes.len());
        self.nodes.push(Node::Gate {
            kind,
            inputs: inputs.to_vec(),
        });
        Ok(id)
    }

    /// Number of external inputs.
    pub fn input_count(&self) -> usize {
        self.inputs.len()
    }

    /// Number of gates, not counting inputs.
    pub fn gate_count(&self) -> usize {
        self.nodes.len() - self.inputs.len()
    }

    /// Settles every wire from the given input values.
    pub fn evaluate(&mut self, inputs: &[bool]) -> Result<(), NetlistError> {
        if inputs.len() != self.inputs.len() {
            return Err(NetlistError::InputCount {
                expected: self.inputs.len(),
                found: inputs.len(),
            });
        }
        self.values.clear();
        self.values.resize(self.nodes.len(), false);
        for (wire, &value) in self.inputs.iter().zip(inputs) {
            self.values[wire.0] = value;
        }
        for (i, node) in self.nodes.iter().enumerate() {
            if let Node::Gate { kind, inputs } = node {
                self.scratch.clear();
                self.scratch.extend(inputs.iter().map(|w| self.values[w.0]));
                self.values[i] = kind.eval(&self.scratch);
            }
        }
        self.settled = true;
        Ok(())
    }

    /// The settled value of `wire`, or `None` before the first evaluation.
    pub fn value(&self, wire: WireId) -> Option<bool> {
        if self.settled {
            self.values.get(wire.0).copied()
        } else {
            None
        }
    }
}
