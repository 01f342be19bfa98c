//! # I/O pump
//!
//! Owns the serial transport on a dedicated thread. Every cycle it
//!
//! 1. checks the device node is still present,
//! 2. reads whatever bytes arrived and frames them onto the receive queue,
//! 3. flushes the transmit queue as `<command>\r\n` frames.
//!
//! The transport read must time out quickly (the serial port is opened with
//! a ~10 ms timeout) so the pump never stalls the transmit side. The pump
//! only touches the two queues, so the lifecycle keeps running while it
//! waits on a command.

use std::io::{ErrorKind, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tokio::sync::oneshot;

use crate::device::DevicePresence;
use crate::error::ModemError;
use crate::framer::LineFramer;
use crate::queue::{ReceiveQueue, TransmitQueue};

/// Duplex byte stream the pump drives.
pub trait Transport: Read + Write + Send {}

impl<T: Read + Write + Send> Transport for T {}

/// Pump state moved onto the worker thread.
pub struct IoPump<T: Transport> {
    transport: T,
    transmit: TransmitQueue,
    receive: ReceiveQueue,
    framer: LineFramer,
    presence: Option<Box<dyn DevicePresence>>,
    device: String,
    idle: Duration,
}

impl<T: Transport + 'static> IoPump<T> {
    pub fn new(transport: T, transmit: TransmitQueue, receive: ReceiveQueue) -> Self {
        IoPump {
            transport,
            transmit,
            receive,
            framer: LineFramer::new(),
            presence: None,
            device: String::new(),
            idle: Duration::from_millis(10),
        }
    }

    /// Stop with [`ModemError::DeviceGone`] once `presence` reports the
    /// device missing.
    pub fn watch_device(mut self, device: &str, presence: Box<dyn DevicePresence>) -> Self {
        self.device = device.to_string();
        self.presence = Some(presence);
        self
    }

    /// Sleep between cycles.
    pub fn with_idle(mut self, idle: Duration) -> Self {
        self.idle = idle;
        self
    }

    /// Run one read/write cycle.
    pub fn cycle(&mut self, buf: &mut [u8]) -> Result<(), ModemError> {
        if let Some(presence) = &self.presence {
            if !presence.is_present() {
                return Err(ModemError::DeviceGone {
                    path: self.device.clone(),
                });
            }
        }

        match self.transport.read(buf) {
            Ok(0) => {}
            Ok(n) => {
                for line in self.framer.feed(&buf[..n])? {
                    tracing::debug!(line = %line, "RX");
                    self.receive.push(line);
                }
            }
            Err(e)
                if matches!(
                    e.kind(),
                    ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted
                ) => {}
            Err(e) => return Err(ModemError::Transport(e)),
        }

        while let Some(command) = self.transmit.pop() {
            let frame = format!("{command}\r\n");
            tracing::trace!(bytes = frame.len(), command = %command, "attempting to transmit");
            self.transport.write_all(frame.as_bytes())?;
            self.transport.flush()?;
            tracing::debug!(command = %command, "TX");
        }

        Ok(())
    }

    /// Drive cycles until `shutdown` is set or the link fails.
    pub fn run(mut self, shutdown: &AtomicBool) -> Result<(), ModemError> {
        let mut buf = [0u8; 255];
        while !shutdown.load(Ordering::Relaxed) {
            self.cycle(&mut buf)?;
            thread::sleep(self.idle);
        }
        Ok(())
    }

    /// Move the pump onto its own thread.
    pub fn spawn(self) -> Result<PumpHandle, ModemError> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_clone = shutdown.clone();
        let (done_tx, done_rx) = oneshot::channel();

        let handle = thread::Builder::new()
            .name("toby-io".into())
            .spawn(move || {
                let result = self.run(&shutdown_clone);
                if let Err(e) = &result {
                    tracing::error!(error = %e, "I/O pump stopped");
                }
                let _ = done_tx.send(result);
            })?;

        Ok(PumpHandle {
            shutdown,
            handle: Some(handle),
            done: done_rx,
        })
    }
}

/// Handle to a running pump thread. Dropping it stops the pump.
pub struct PumpHandle {
    shutdown: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
    done: oneshot::Receiver<Result<(), ModemError>>,
}

impl PumpHandle {
    /// Resolves when the pump thread exits, with the reason it stopped.
    pub async fn finished(&mut self) -> Result<(), ModemError> {
        match (&mut self.done).await {
            Ok(result) => result,
            Err(_) => Err(ModemError::Transport(std::io::Error::other(
                "I/O pump thread panicked",
            ))),
        }
    }

    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for PumpHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
