//! Hand-off between the outside world and the simulation.
//!
//! Producers (a terminal reader, a test, a script) push [KeyEvent]s into a bounded queue. Adapters
//! poll the queue at most once per tick and never block the clock. Both ends, and the shutdown
//! signal, are created by whoever assembles the machine and handed to the pieces that need them.

use thiserror::Error;
use tokio::sync::{mpsc, watch};

use crate::plat::Word;

/// Default bound on queued, not yet sampled events.
pub const DEFAULT_QUEUE_CAPACITY: usize = 16;

/// A key transition from the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyEvent {
    /// A key was pressed.
    Down(Word),
    /// A key was released. The adapter ignores these.
    Up(Word),
}

impl KeyEvent {
    /// The key code, whichever direction.
    pub fn code(self) -> Word {
        match self {
            KeyEvent::Down(code) | KeyEvent::Up(code) => code,
        }
    }
}

/// Why an event could not be queued.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum EventError {
    /// The bounded queue had no room.
    #[error("event queue full, dropped {0:?}")]
    QueueFull(KeyEvent),
    /// The receiving adapter is gone.
    #[error("event queue closed")]
    Closed,
}

/// Producer half of the event queue. Dropping every sender closes the queue.
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::Sender<KeyEvent>,
}

impl EventSender {
    /// Queues an event without waiting.
    pub fn try_send(&self, event: KeyEvent) -> Result<(), EventError> {
        self.tx.try_send(event).map_err(|e| match e {
            mpsc::error::TrySendError::Full(event) => EventError::QueueFull(event),
            mpsc::error::TrySendError::Closed(_) => EventError::Closed,
        })
    }

    /// Queues an event, waiting for room.
    pub async fn send(&self, event: KeyEvent) -> Result<(), EventError> {
        self.tx.send(event).await.map_err(|_| EventError::Closed)
    }

    /// Queues a key-down without waiting.
    pub fn press(&self, code: Word) -> Result<(), EventError> {
        self.try_send(KeyEvent::Down(code))
    }

    /// Queues a key-up without waiting.
    pub fn release(&self, code: Word) -> Result<(), EventError> {
        self.try_send(KeyEvent::Up(code))
    }
}

/// Result of polling the queue once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Poll {
    /// The oldest queued event.
    Event(KeyEvent),
    /// Nothing queued right now.
    Empty,
    /// Every sender is gone and nothing is left to deliver.
    Closed,
}

/// Consumer half of the event queue.
#[derive(Debug)]
pub struct EventReceiver {
    rx: mpsc::Receiver<KeyEvent>,
}

impl EventReceiver {
    /// Takes the oldest pending event, if any. Never blocks.
    pub fn poll(&mut self) -> Poll {
        match self.rx.try_recv() {
            Ok(event) => Poll::Event(event),
            Err(mpsc::error::TryRecvError::Empty) => Poll::Empty,
            Err(mpsc::error::TryRecvError::Disconnected) => Poll::Closed,
        }
    }
}

/// Creates a bounded event queue.
///
/// # Panics
///
/// Panics if `capacity` is zero.
pub fn channel(capacity: usize) -> (EventSender, EventReceiver) {
    let (tx, rx) = mpsc::channel(capacity);
    (EventSender { tx }, EventReceiver { rx })
}

/// Owner side of the shutdown signal.
#[derive(Debug)]
pub struct Shutdown {
    tx: watch::Sender<bool>,
}

impl Shutdown {
    /// A lowered signal and its first observer.
    pub fn new() -> (Self, ShutdownSignal) {
        let (tx, rx) = watch::channel(false);
        (Self { tx }, ShutdownSignal { rx })
    }

    /// Raises the signal. Observers see it at their next tick boundary.
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    /// Another observer of the same signal.
    pub fn signal(&self) -> ShutdownSignal {
        ShutdownSignal {
            rx: self.tx.subscribe(),
        }
    }
}

/// Observer side of the shutdown signal.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    /// Whether the signal has been raised.
    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Waits until the signal is raised. Also returns if the owner is dropped without raising it.
    pub async fn triggered(&mut self) {
        while !*self.rx.borrow_and_update() {
            if self.rx.changed().await.is_err() {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_is_fifo_and_bounded() {
        let (tx, mut rx) = channel(2);
        tx.press(65).unwrap();
        tx.release(65).unwrap();
        assert_eq!(tx.press(66), Err(EventError::QueueFull(KeyEvent::Down(66))));
        assert_eq!(rx.poll(), Poll::Event(KeyEvent::Down(65)));
        assert_eq!(rx.poll(), Poll::Event(KeyEvent::Up(65)));
        assert_eq!(rx.poll(), Poll::Empty);
    }

    #[test]
    fn test_closed_after_drain() {
        let (tx, mut rx) = channel(DEFAULT_QUEUE_CAPACITY);
        tx.press(1).unwrap();
        drop(tx);
        assert_eq!(rx.poll(), Poll::Event(KeyEvent::Down(1)));
        assert_eq!(rx.poll(), Poll::Closed);
    }

    #[test]
    fn test_send_to_dropped_receiver() {
        let (tx, rx) = channel(1);
        drop(rx);
        assert_eq!(tx.press(1), Err(EventError::Closed));
    }

    #[test]
    fn test_shutdown_signal() {
        let (shutdown, signal) = Shutdown::new();
        let late = shutdown.signal();
        assert!(!signal.is_triggered());
        shutdown.trigger();
        assert!(signal.is_triggered());
        assert!(late.is_triggered());
    }

    #[tokio::test]
    async fn test_async_producer() {
        let (tx, mut rx) = channel(1);
        let (shutdown, mut signal) = Shutdown::new();
        let producer = tokio::spawn(async move {
            tx.send(KeyEvent::Down(13)).await.unwrap();
            shutdown.trigger();
        });
        signal.triggered().await;
        producer.await.unwrap();
        assert_eq!(rx.poll(), Poll::Event(KeyEvent::Down(13)));
    }
}
