//! Transmit and receive queues shared between the I/O pump and the
//! correlator.
//!
//! Both are unbounded FIFO channels (`crossbeam-channel`), so either side
//! can push or pop from any thread without further locking. A queue handle
//! holds both channel ends and is cheap to clone.

use crossbeam_channel::{unbounded, Receiver, Sender};

/// Unbounded, thread-safe FIFO.
#[derive(Debug)]
pub struct FifoQueue<T> {
    tx: Sender<T>,
    rx: Receiver<T>,
}

impl<T> FifoQueue<T> {
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        FifoQueue { tx, rx }
    }

    /// Append to the back of the queue.
    pub fn push(&self, item: T) {
        // Both ends live in `self`, so the channel can never be disconnected.
        let _ = self.tx.send(item);
    }

    /// Take the front item without blocking.
    pub fn pop(&self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    /// Take everything queued right now, front to back.
    pub fn drain(&self) -> Vec<T> {
        self.rx.try_iter().collect()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

impl<T> Clone for FifoQueue<T> {
    fn clone(&self) -> Self {
        FifoQueue {
            tx: self.tx.clone(),
            rx: self.rx.clone(),
        }
    }
}

impl<T> Default for FifoQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Commands waiting to be written to the modem, without the `\r\n` frame.
pub type TransmitQueue = FifoQueue<String>;

/// Framed response lines waiting for the correlator.
pub type ReceiveQueue = FifoQueue<String>;
