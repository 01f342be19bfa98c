//! Serial port setup for the modem's AT interface.

use std::time::Duration;

use anyhow::Context;
use serialport::{ClearBuffer, DataBits, Parity, SerialPort, StopBits};

/// Read timeout. Short enough that a quiet modem never holds up the
/// transmit side of the pump.
pub const READ_TIMEOUT: Duration = Duration::from_millis(10);

/// Open `device` as 8N1 at `baud_rate`.
pub fn open(device: &str, baud_rate: u32) -> anyhow::Result<Box<dyn SerialPort>> {
    let port = serialport::new(device, baud_rate)
        .data_bits(DataBits::Eight)
        .stop_bits(StopBits::One)
        .parity(Parity::None)
        .timeout(READ_TIMEOUT)
        .open()
        .with_context(|| format!("failed to open serial port {device}"))?;

    // Boot banners and unsolicited codes from before we attached.
    if let Err(e) = port.clear(ClearBuffer::All) {
        tracing::warn!(device, error = %e, "failed to clear serial buffers");
    }

    tracing::info!(device, baud_rate, "serial port open");
    Ok(port)
}
