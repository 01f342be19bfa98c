//! # Line Framer
//!
//! Turns the unframed byte stream coming off the serial link into response
//! lines. A line ends when the last two accumulated bytes are `\r\n`; the
//! terminator is dropped and empty lines are discarded. Partial lines are
//! carried across reads.

use bytes::BytesMut;

use crate::error::ModemError;

/// Line terminator used by the modem.
pub const TERMINATOR: &[u8; 2] = b"\r\n";

/// Working buffer size, terminator included.
pub const DEFAULT_LINE_CAPACITY: usize = 255;

/// Incremental CRLF line framer.
#[derive(Debug)]
pub struct LineFramer {
    buf: BytesMut,
    capacity: usize,
}

impl LineFramer {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_LINE_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        LineFramer {
            buf: BytesMut::with_capacity(capacity),
            capacity,
        }
    }

    /// Feed a chunk of raw bytes, returning every line completed by it in
    /// arrival order.
    ///
    /// Overrunning the working buffer is a protocol error; the partial line
    /// is discarded and the caller is expected to drop the connection.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<String>, ModemError> {
        let mut lines = Vec::new();

        for &byte in chunk {
            if self.buf.len() >= self.capacity {
                self.buf.clear();
                return Err(ModemError::LineOverflow {
                    capacity: self.capacity,
                });
            }
            self.buf.extend_from_slice(&[byte]);

            if self.buf.ends_with(TERMINATOR) {
                let line = self.buf.split();
                let body = &line[..line.len() - TERMINATOR.len()];
                if !body.is_empty() {
                    lines.push(String::from_utf8_lossy(body).into_owned());
                }
            }
        }

        Ok(lines)
    }
}

impl Default for LineFramer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_crlf() {
        let mut framer = LineFramer::new();
        let lines = framer.feed(b"+CREG: 0,1\r\nOK\r\n").unwrap();
        assert_eq!(lines, vec!["+CREG: 0,1", "OK"]);
    }

    #[test]
    fn carries_partial_lines_across_reads() {
        let mut framer = LineFramer::new();
        assert!(framer.feed(b"+UIPADDR: 1,").unwrap().is_empty());
        assert!(framer.feed(b"\"usb0:0\"\r").unwrap().is_empty());
        let lines = framer.feed(b"\nO").unwrap();
        assert_eq!(lines, vec!["+UIPADDR: 1,\"usb0:0\""]);
        assert_eq!(framer.feed(b"K\r\n").unwrap(), vec!["OK"]);
    }

    #[test]
    fn drops_empty_lines() {
        let mut framer = LineFramer::new();
        let lines = framer.feed(b"\r\n\r\nOK\r\n\r\n").unwrap();
        assert_eq!(lines, vec!["OK"]);
    }

    #[test]
    fn lone_carriage_return_stays_in_line() {
        let mut framer = LineFramer::new();
        let lines = framer.feed(b"AT\rZ\r\n").unwrap();
        assert_eq!(lines, vec!["AT\rZ"]);
    }

    #[test]
    fn overflow_is_fatal() {
        let mut framer = LineFramer::with_capacity(8);
        let err = framer.feed(b"0123456789\r\n").unwrap_err();
        assert!(matches!(err, ModemError::LineOverflow { capacity: 8 }));
        // The overrun line is gone; the next one frames cleanly.
        assert_eq!(framer.feed(b"OK\r\n").unwrap(), vec!["OK"]);
    }

    #[test]
    fn line_filling_buffer_exactly_is_accepted() {
        let mut framer = LineFramer::with_capacity(4);
        assert_eq!(framer.feed(b"OK\r\n").unwrap(), vec!["OK"]);
    }
}
