//! Main memory.

use crate::plat::Word;

use super::{
    bus::{Board, BusId},
    WiringError,
};

/// Number of addressable words.
pub const RAM_WORDS: usize = 1 << 16;

/// Main memory. The address always comes from the memory address register's output bus.
pub struct Ram {
    /// Every word, indexed by address.
    pub memory: Box<[Word]>,
    address_bus: Option<BusId>,
    data_bus: Option<BusId>,
}

impl Ram {
    /// Creates a new [`Ram`] instance, allocating and zeroing all 64K words.
    pub fn new() -> Self {
        Self {
            memory: vec![0; RAM_WORDS].into_boxed_slice(),
            address_bus: None,
            data_bus: None,
        }
    }

    /// Resolves the address bus (MAR output) and the data bus.
    pub fn connect(&mut self, address_bus: BusId, data_bus: BusId) -> Result<(), WiringError> {
        if self.address_bus.is_some() {
            return Err(WiringError::AlreadyConnected {
                component: "ram".into(),
            });
        }
        self.address_bus = Some(address_bus);
        self.data_bus = Some(data_bus);
        Ok(())
    }

    /// Copies `words` into memory starting at `origin`, wrapping at the top of the address space.
    pub fn load(&mut self, origin: Word, words: &[Word]) {
        for (offset, &word) in words.iter().enumerate() {
            let addr = (origin as usize + offset) % RAM_WORDS;
            self.memory[addr] = word;
        }
    }

    /// Reads a word without touching any bus.
    pub fn peek(&self, addr: Word) -> Word {
        self.memory[addr as usize]
    }

    /// Drives the addressed word onto the data bus.
    pub fn drive(&self, board: &mut Board) -> Result<(), WiringError> {
        let value = self.memory[self.address(board)? as usize];
        let data = self.data_bus.ok_or_else(unconnected)?;
        board
            .bus_mut(data)
            .ok_or_else(|| unknown(data))?
            .set_value("ram", value);
        Ok(())
    }

    /// Writes the data bus into the addressed word.
    pub fn latch(&mut self, board: &Board) -> Result<(), WiringError> {
        let addr = self.address(board)?;
        let data = self.data_bus.ok_or_else(unconnected)?;
        self.memory[addr as usize] = board.bus(data).ok_or_else(|| unknown(data))?.value();
        Ok(())
    }

    fn address(&self, board: &Board) -> Result<Word, WiringError> {
        let id = self.address_bus.ok_or_else(unconnected)?;
        Ok(board.bus(id).ok_or_else(|| unknown(id))?.value())
    }
}

impl Default for Ram {
    fn default() -> Self {
        Self::new()
    }
}

fn unconnected() -> WiringError {
    WiringError::Unconnected {
        component: "ram".into(),
    }
}

fn unknown(id: BusId) -> WiringError {
    WiringError::UnknownBus {
        component: "ram".into(),
        bus: id.index(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_write_through_buses() {
        let mut board = Board::new();
        let addr = board.add_bus("mar").unwrap();
        let data = board.add_bus("main").unwrap();
        let mut ram = Ram::new();
        ram.connect(addr, data).unwrap();

        board.bus_mut(addr).unwrap().set_value("mar", 0x0100);
        board.bus_mut(data).unwrap().set_value("r0", 0xCAFE);
        ram.latch(&board).unwrap();
        assert_eq!(ram.peek(0x0100), 0xCAFE);

        board.begin_tick();
        board.bus_mut(data).unwrap().set_value("r0", 0);
        board.begin_tick();
        ram.drive(&mut board).unwrap();
        assert_eq!(board.bus(data).unwrap().value(), 0xCAFE);
        assert_eq!(board.bus(data).unwrap().drivers(), ["ram".to_string()]);
    }

    #[test]
    fn test_load_wraps() {
        let mut ram = Ram::new();
        ram.load(0xFFFF, &[1, 2]);
        assert_eq!(ram.peek(0xFFFF), 1);
        assert_eq!(ram.peek(0), 2);
    }

    #[test]
    fn test_unconnected() {
        let mut board = Board::new();
        let ram = Ram::new();
        assert!(matches!(
            ram.drive(&mut board),
            Err(WiringError::Unconnected { .. })
        ));
    }
}
