//! Memory-mapped peripherals.
//!
//! Every adapter follows the same pattern: an address-decode network over the IO bus control lines
//! and the main bus, a [Bit][crate::circuit::bit::Bit] remembering whether the adapter is the
//! addressed target, and a register that only touches the main bus while addressed. The decode
//! network is ordinary combinational logic and is re-evaluated on every tick.

use crate::{
    circuit::{
        self,
        netlist::{Netlist, NetlistError, WireId},
        GateKind,
    },
    emu::{
        bus::{Board, Bus, BusId, IoLines},
        WiringError,
    },
    plat::{Word, WORD_BITS},
};

pub mod event;
pub mod keyboard;

/// Bus references handed to peripherals during the wiring pass.
#[derive(Debug, Clone, Copy)]
pub struct Wiring {
    /// The shared data bus.
    pub main_bus: BusId,
}

/// Why an adapter stopped taking part in ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The external event feed was dropped.
    EventSourceClosed,
    /// The composition root asked for shutdown.
    Shutdown,
}

/// Lifecycle of a peripheral.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterStatus {
    /// Built but not wired yet.
    Unconnected,
    /// Taking part in every tick.
    Running,
    /// Permanently idle. Bus state is left as it was.
    Stopped(StopReason),
}

/// A device living on the main bus and the IO bus.
///
/// Every tick calls `update` once, after the CPU has asserted its control lines and drivers. If
/// the tick finds no bus contention, `latch` follows alongside the CPU's own latch step. A tick
/// that fails never reaches `latch`, so `update` must only drive buses.
pub trait Peripheral {
    /// Name used as the bus driver label and in logs.
    fn name(&self) -> &str;

    /// Resolves bus references. Called once by the wiring pass, never after the first tick.
    fn connect(&mut self, board: &mut Board, wiring: Wiring) -> Result<(), WiringError>;

    /// Drive step: evaluate decode logic and drive the main bus if addressed.
    fn update(&mut self, board: &mut Board) -> Result<(), WiringError>;

    /// Latch step: capture whatever state this tick changes.
    fn latch(&mut self, board: &mut Board) -> Result<(), WiringError>;

    /// Whether this peripheral is currently the addressed IO target.
    fn is_selected(&self) -> bool;

    /// Current lifecycle state.
    fn status(&self) -> AdapterStatus;
}

/// IO lines that must be high and lines that must be low for a phase to be selected.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinePattern {
    /// Lines that must all be high.
    pub high: IoLines,
    /// Lines that must all be low.
    pub low: IoLines,
}

impl LinePattern {
    /// A pattern from its high and low line sets.
    pub const fn new(high: IoLines, low: IoLines) -> Self {
        Self { high, low }
    }

    /// Whether `lines` fits the pattern.
    pub fn matches(&self, lines: IoLines) -> bool {
        lines.contains(self.high) && !lines.intersects(self.low)
    }
}

/// Where a peripheral lives and which IO line patterns address it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeConfig {
    /// The address the peripheral answers to.
    pub address: Word,
    /// Main-bus lines that take part in the comparison.
    pub mask: Word,
    /// Lines that make the peripheral latch whether it is addressed.
    pub address_phase: LinePattern,
    /// Lines that make an addressed peripheral transfer data.
    pub data_phase: LinePattern,
}

impl DecodeConfig {
    /// The keyboard at address 0x0F, selected by `OUT addr` and read by `IN data`.
    pub const fn keyboard() -> Self {
        Self {
            address: 0x000F,
            mask: 0x00FF,
            address_phase: LinePattern::new(
                IoLines::CLOCK_SET
                    .union(IoLines::DATA_OR_ADDRESS)
                    .union(IoLines::MODE),
                IoLines::empty(),
            ),
            data_phase: LinePattern::new(
                IoLines::CLOCK_ENABLE,
                IoLines::DATA_OR_ADDRESS.union(IoLines::MODE),
            ),
        }
    }
}

/// Settled outputs of an [AddressDecoder].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Decode {
    /// The main bus carries this peripheral's address.
    pub address_match: bool,
    /// The IO lines request an address phase.
    pub address_select: bool,
    /// The IO lines request a data transfer.
    pub data_select: bool,
}

const LINE_ORDER: [IoLines; 4] = [
    IoLines::CLOCK_SET,
    IoLines::CLOCK_ENABLE,
    IoLines::MODE,
    IoLines::DATA_OR_ADDRESS,
];

/// A [DecodeConfig] compiled into NOT/AND gates.
#[derive(Debug, Clone)]
pub struct AddressDecoder {
    config: DecodeConfig,
    net: Netlist,
    bus_lines: Vec<usize>,
    address_match: WireId,
    address_select: WireId,
    data_select: WireId,
}

impl AddressDecoder {
    /// Compiles `config` into a gate network.
    pub fn new(config: DecodeConfig) -> Result<Self, NetlistError> {
        let mut net = Netlist::new();
        let io: Vec<WireId> = LINE_ORDER.iter().map(|_| net.input()).collect();
        let bus_lines: Vec<usize> = (0..WORD_BITS)
            .filter(|&i| circuit::wire(config.mask, i))
            .collect();
        let bus: Vec<WireId> = bus_lines.iter().map(|_| net.input()).collect();

        let mut terms = Vec::with_capacity(bus.len());
        for (&line, &wire) in bus_lines.iter().zip(&bus) {
            let term = if circuit::wire(config.address, line) {
                wire
            } else {
                net.gate(GateKind::Not, &[wire])?
            };
            terms.push(term);
        }
        let address_match = and_tree(&mut net, &terms, io[0])?;
        let address_select = pattern_gate(&mut net, &io, config.address_phase)?;
        let data_select = pattern_gate(&mut net, &io, config.data_phase)?;

        Ok(Self {
            config,
            net,
            bus_lines,
            address_match,
            address_select,
            data_select,
        })
    }

    /// The pattern this decoder was built from.
    pub fn config(&self) -> &DecodeConfig {
        &self.config
    }

    /// Size of the compiled network.
    pub fn gate_count(&self) -> usize {
        self.net.gate_count()
    }

    /// Settles the network from the current IO lines and main bus.
    pub fn evaluate(&mut self, lines: IoLines, bus: &Bus) -> Result<Decode, NetlistError> {
        let inputs: Vec<bool> = LINE_ORDER
            .iter()
            .map(|&line| lines.contains(line))
            .chain(self.bus_lines.iter().map(|&i| bus.wire(i)))
            .collect();
        self.net.evaluate(&inputs)?;
        let read = |wire| self.net.value(wire).unwrap_or(false);
        Ok(Decode {
            address_match: read(self.address_match),
            address_select: read(self.address_select),
            data_select: read(self.data_select),
        })
    }
}

/// AND of every term. An empty term list is always true.
fn and_tree(net: &mut Netlist, terms: &[WireId], any: WireId) -> Result<WireId, NetlistError> {
    if terms.is_empty() {
        let inverted = net.gate(GateKind::Not, &[any])?;
        return net.gate(GateKind::Or, &[any, inverted]);
    }
    net.gate(GateKind::And, terms)
}

fn pattern_gate(
    net: &mut Netlist,
    io: &[WireId],
    pattern: LinePattern,
) -> Result<WireId, NetlistError> {
    let mut terms = Vec::new();
    for (&line, &wire) in LINE_ORDER.iter().zip(io) {
        if pattern.high.contains(line) {
            terms.push(wire);
        } else if pattern.low.contains(line) {
            terms.push(net.gate(GateKind::Not, &[wire])?);
        }
    }
    and_tree(net, &terms, io[0])
}
