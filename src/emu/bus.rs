//! Shared wire sets.
//!
//! A [`Bus`] has no arbitration of its own: exactly one component is expected to drive it per
//! tick. Every driver is recorded so that the [`Board`] can report contention after the drive
//! phase. A bus nobody drives keeps the value it was last given.

use crate::{
    circuit,
    plat::{Word, WORD_BITS},
};

use super::{ContentionViolation, WiringError};

bitflags::bitflags! {
    /// The control lines of the [IoBus].
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
    pub struct IoLines: u8 {
        /// Peripherals latch from the main bus.
        const CLOCK_SET = 1 << 0;
        /// The addressed peripheral drives the main bus.
        const CLOCK_ENABLE = 1 << 1;
        /// Set for output (CPU to peripheral), clear for input.
        const MODE = 1 << 2;
        /// Set when the main bus carries an address, clear when it carries data.
        const DATA_OR_ADDRESS = 1 << 3;
    }
}

/// Handle to a [Bus] owned by a [Board].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BusId(usize);

impl BusId {
    /// Position of the bus on its board.
    pub fn index(self) -> usize {
        self.0
    }
}

/// A 16-line bus. It keeps its value until something drives it again.
#[derive(Debug, Clone)]
pub struct Bus {
    name: String,
    value: Word,
    drivers: Vec<String>,
}

impl Bus {
    /// An undriven bus reading zero.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: 0,
            drivers: Vec::new(),
        }
    }

    /// Name used in contention reports.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current value of all 16 lines.
    pub fn value(&self) -> Word {
        self.value
    }

    /// Reads wire `i` (0 is the least significant).
    pub fn wire(&self, i: usize) -> bool {
        debug_assert!(i < WORD_BITS);
        circuit::wire(self.value, i)
    }

    /// Asserts `value` onto the bus on behalf of `driver`. The last setter wins, but every distinct
    /// driver is recorded for contention checking.
    pub fn set_value(&mut self, driver: &str, value: Word) {
        if !self.drivers.iter().any(|d| d == driver) {
            self.drivers.push(driver.to_owned());
        }
        self.value = value;
    }

    /// Components that have driven this bus since the last [`Board::begin_tick`].
    pub fn drivers(&self) -> &[String] {
        &self.drivers
    }
}

/// The IO control lines shared by the control unit and every peripheral adapter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IoBus {
    lines: IoLines,
}

impl IoBus {
    /// Every control line at once.
    pub fn lines(&self) -> IoLines {
        self.lines
    }

    /// Whether `line` is high.
    pub fn line(&self, line: IoLines) -> bool {
        self.lines.contains(line)
    }

    /// Replaces every control line.
    pub fn set_lines(&mut self, lines: IoLines) {
        self.lines = lines;
    }
}

/// Bus values and IO lines captured by [`Board::snapshot`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoardSnapshot {
    values: Vec<Word>,
    io: IoLines,
}

/// Owner of every bus in a machine.
///
/// Buses can only be added until the board is sealed at the end of the wiring pass.
#[derive(Debug, Default)]
pub struct Board {
    buses: Vec<Bus>,
    io: IoBus,
    sealed: bool,
}

impl Board {
    /// An empty, unsealed board.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a bus. Fails once the board is sealed.
    pub fn add_bus(&mut self, name: impl Into<String>) -> Result<BusId, WiringError> {
        let name = name.into();
        if self.sealed {
            return Err(WiringError::Sealed { component: name });
        }
        self.buses.push(Bus::new(name));
        Ok(BusId(self.buses.len() - 1))
    }

    /// Freezes the topology. Further calls to [`add_bus`][Self::add_bus] fail.
    pub fn seal(&mut self) {
        self.sealed = true;
    }

    /// Whether the wiring pass has finished.
    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    /// Looks up a bus by handle.
    pub fn bus(&self, id: BusId) -> Option<&Bus> {
        self.buses.get(id.0)
    }

    /// Looks up a bus by handle for driving.
    pub fn bus_mut(&mut self, id: BusId) -> Option<&mut Bus> {
        self.buses.get_mut(id.0)
    }

    /// Every bus in creation order.
    pub fn buses(&self) -> &[Bus] {
        &self.buses
    }

    /// The IO control lines.
    pub fn io(&self) -> &IoBus {
        &self.io
    }

    /// The IO control lines, for the CPU to assert.
    pub fn io_mut(&mut self) -> &mut IoBus {
        &mut self.io
    }

    /// Forgets who drove which bus during the previous tick. Values are kept.
    pub fn begin_tick(&mut self) {
        for bus in &mut self.buses {
            bus.drivers.clear();
        }
    }

    /// Records every bus value and the IO lines so a failed tick can be rolled back.
    pub fn snapshot(&self) -> BoardSnapshot {
        BoardSnapshot {
            values: self.buses.iter().map(|bus| bus.value).collect(),
            io: self.io.lines,
        }
    }

    /// Puts bus values and IO lines back to `snapshot` and forgets this tick's drivers.
    pub fn restore(&mut self, snapshot: &BoardSnapshot) {
        for (bus, &value) in self.buses.iter_mut().zip(&snapshot.values) {
            bus.value = value;
            bus.drivers.clear();
        }
        self.io.lines = snapshot.io;
    }

    /// Reports the first bus that has been driven by more than one component this tick.
    pub fn take_contention(&self) -> Option<ContentionViolation> {
        self.buses
            .iter()
            .find(|bus| bus.drivers.len() > 1)
            .map(|bus| ContentionViolation {
                bus: bus.name.clone(),
                drivers: bus.drivers.clone(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wires_read_value_bits() {
        let mut bus = Bus::new("main");
        bus.set_value("test", 0b1010_0000_0000_0101);
        assert!(bus.wire(0));
        assert!(!bus.wire(1));
        assert!(bus.wire(2));
        assert!(bus.wire(13));
        assert!(bus.wire(15));
        assert!(!bus.wire(14));
    }

    #[test]
    fn test_undriven_bus_retains_value() {
        let mut board = Board::new();
        let main = board.add_bus("main").unwrap();
        board.bus_mut(main).unwrap().set_value("r0", 0x1234);
        board.begin_tick();
        assert_eq!(board.bus(main).unwrap().value(), 0x1234);
        assert!(board.bus(main).unwrap().drivers().is_empty());
        assert_eq!(board.take_contention(), None);
    }

    #[test]
    fn test_two_drivers_flag_contention() {
        let mut board = Board::new();
        let main = board.add_bus("main").unwrap();
        board.begin_tick();
        board.bus_mut(main).unwrap().set_value("r0", 1);
        board.bus_mut(main).unwrap().set_value("r1", 2);
        assert_eq!(board.bus(main).unwrap().value(), 2);
        assert_eq!(
            board.take_contention(),
            Some(ContentionViolation {
                bus: "main".into(),
                drivers: vec!["r0".into(), "r1".into()],
            })
        );
        board.begin_tick();
        assert_eq!(board.take_contention(), None);
    }

    #[test]
    fn test_same_driver_twice_is_not_contention() {
        let mut board = Board::new();
        let bus = board.add_bus("kbd").unwrap();
        board.bus_mut(bus).unwrap().set_value("keyboard", 65);
        board.bus_mut(bus).unwrap().set_value("keyboard", 0);
        assert_eq!(board.take_contention(), None);
    }

    #[test]
    fn test_sealed_board_rejects_new_buses() {
        let mut board = Board::new();
        board.seal();
        assert!(matches!(
            board.add_bus("late"),
            Err(WiringError::Sealed { .. })
        ));
    }

    #[test]
    fn test_restore_rolls_back_values_and_lines() {
        let mut board = Board::new();
        let main = board.add_bus("main").unwrap();
        board.bus_mut(main).unwrap().set_value("r0", 0x0001);
        board.begin_tick();
        let before = board.snapshot();

        board.bus_mut(main).unwrap().set_value("r1", 0x0002);
        board.io_mut().set_lines(IoLines::CLOCK_SET);
        assert_ne!(board.snapshot(), before);

        board.restore(&before);
        assert_eq!(board.snapshot(), before);
        assert_eq!(board.bus(main).unwrap().value(), 0x0001);
        assert!(board.bus(main).unwrap().drivers().is_empty());
        assert_eq!(board.io().lines(), IoLines::empty());
    }

    #[test]
    fn test_io_lines() {
        let mut io = IoBus::default();
        io.set_lines(IoLines::CLOCK_SET | IoLines::MODE);
        assert!(io.line(IoLines::CLOCK_SET));
        assert!(io.line(IoLines::MODE));
        assert!(!io.line(IoLines::CLOCK_ENABLE));
        assert!(!io.line(IoLines::DATA_OR_ADDRESS));
    }
}
