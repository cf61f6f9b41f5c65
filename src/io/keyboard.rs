//! The keyboard adapter.

use crate::{
    circuit::{bit::Bit, Gate, GateKind},
    emu::{
        bus::{Board, Bus, BusId},
        registers::Register,
        WiringError,
    },
    plat::Word,
};

use super::{
    event::{EventReceiver, KeyEvent, Poll, ShutdownSignal},
    AdapterStatus, AddressDecoder, Decode, DecodeConfig, Peripheral, StopReason, Wiring,
};

const NAME: &str = "keyboard";

/// A keyboard on the IO bus.
///
/// Key-down events are written onto a private keyboard-in bus. The CPU selects the keyboard with
/// `OUT addr` carrying the keyboard's address, after which `IN data` copies the last key code onto
/// the main bus and clears the keyboard-in bus.
///
/// [`Peripheral::update`] only decodes and drives the main bus. Event sampling, the keycode
/// register and the memory bit all change in [`Peripheral::latch`].
pub struct KeyboardAdapter {
    decoder: AddressDecoder,
    memory: Bit,
    read_gate: Gate,
    keycode: Register,
    in_bus: Option<BusId>,
    main_bus: Option<BusId>,
    events: EventReceiver,
    shutdown: ShutdownSignal,
    decode: Decode,
    reading: bool,
    status: AdapterStatus,
}

impl KeyboardAdapter {
    /// Builds an unconnected adapter decoding `config`.
    pub fn new(
        config: DecodeConfig,
        events: EventReceiver,
        shutdown: ShutdownSignal,
    ) -> Result<Self, WiringError> {
        Ok(Self {
            decoder: AddressDecoder::new(config)?,
            memory: Bit::new(),
            read_gate: Gate::new(GateKind::And),
            keycode: Register::new(NAME),
            in_bus: None,
            main_bus: None,
            events,
            shutdown,
            decode: Decode::default(),
            reading: false,
            status: AdapterStatus::Unconnected,
        })
    }

    /// The last value captured by the keycode register.
    pub fn keycode(&self) -> Word {
        self.keycode.value()
    }

    /// The IO line and address pattern this adapter answers to.
    pub fn config(&self) -> &DecodeConfig {
        self.decoder.config()
    }

    fn stop(&mut self, reason: StopReason) {
        log::info!("{}: stopped ({:?})", NAME, reason);
        self.status = AdapterStatus::Stopped(reason);
    }

    fn unconnected() -> WiringError {
        WiringError::Unconnected {
            component: NAME.into(),
        }
    }
}

impl Peripheral for KeyboardAdapter {
    fn name(&self) -> &str {
        NAME
    }

    fn connect(&mut self, board: &mut Board, wiring: Wiring) -> Result<(), WiringError> {
        if self.in_bus.is_some() {
            return Err(WiringError::AlreadyConnected {
                component: NAME.into(),
            });
        }
        let in_bus = board.add_bus("keyboard_in")?;
        self.keycode.connect(in_bus, wiring.main_bus)?;
        self.in_bus = Some(in_bus);
        self.main_bus = Some(wiring.main_bus);

        // power-on pulse leaves the memory bit cleared
        self.memory.update(false, true, false);
        self.memory.update(false, false, false);
        self.status = AdapterStatus::Running;
        Ok(())
    }

    fn update(&mut self, board: &mut Board) -> Result<(), WiringError> {
        let main = self.main_bus.ok_or_else(Self::unconnected)?;
        self.reading = false;
        if self.status != AdapterStatus::Running {
            return Ok(());
        }
        if self.shutdown.is_triggered() {
            self.stop(StopReason::Shutdown);
            return Ok(());
        }

        let main_value = board.bus(main).ok_or_else(|| unknown(main))?;
        self.decode = self.decoder.evaluate(board.io().lines(), main_value)?;

        // the memory bit still holds what earlier ticks latched
        let inputs = [self.memory.output(), self.decode.data_select];
        self.reading = self.read_gate.update(&inputs);
        if self.reading {
            self.keycode.enable();
            self.keycode.drive(board)?;
            self.keycode.disable();
        }
        Ok(())
    }

    fn latch(&mut self, board: &mut Board) -> Result<(), WiringError> {
        let in_bus = self.in_bus.ok_or_else(Self::unconnected)?;
        if self.status != AdapterStatus::Running {
            return Ok(());
        }

        if self.reading {
            bus_mut(board, in_bus)?.set_value(NAME, 0);
            log::debug!("{}: read {:#06x}", NAME, self.keycode.value());
        }

        match self.events.poll() {
            Poll::Event(KeyEvent::Down(code)) => {
                log::trace!("{}: key down {:#06x}", NAME, code);
                bus_mut(board, in_bus)?.set_value(NAME, code);
            }
            Poll::Event(KeyEvent::Up(_)) | Poll::Empty => {}
            Poll::Closed => {
                self.stop(StopReason::EventSourceClosed);
                return Ok(());
            }
        }

        // keycode mirrors the in bus so the next read drives the latest key
        self.keycode.arm();
        self.keycode.latch(board)?;
        self.keycode.disarm();

        let Decode {
            address_match,
            address_select,
            ..
        } = self.decode;
        self.memory.update(address_match, address_select, false);
        Ok(())
    }

    fn is_selected(&self) -> bool {
        self.memory.output()
    }

    fn status(&self) -> AdapterStatus {
        self.status
    }
}

fn unknown(id: BusId) -> WiringError {
    WiringError::UnknownBus {
        component: NAME.into(),
        bus: id.index(),
    }
}

fn bus_mut(board: &mut Board, id: BusId) -> Result<&mut Bus, WiringError> {
    board.bus_mut(id).ok_or_else(|| unknown(id))
}
