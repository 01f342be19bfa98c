//! # Command Correlator
//!
//! Sends one command at a time and matches framed response lines to it:
//!
//! ```text
//!   push command ──▶ drain receive queue ──▶ OK / ERROR seen? ──▶ resolved
//!                         ▲        │
//!                         └─ 10 ms ┘ (until the 5 s deadline)
//! ```
//!
//! Each drain pass consumes every queued line, front to back, before the
//! outcome is checked, so a data line queued behind the terminal line still
//! lands in the payload. Lines are never re-queued.

use std::fmt;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::config::Timings;
use crate::error::ModemError;
use crate::queue::{ReceiveQueue, TransmitQueue};
use crate::response::{classify, mnemonic, LineKind};

/// Payload reported for a command that never saw a terminal line.
pub const TIMEOUT_MESSAGE: &str = "Timed out waiting for response";

/// Soft reset: reinitialise without a power cycle.
pub const SOFT_RESET: &str = "ATZ";

// ─── Outcome ────────────────────────────────────────────────────────────────

/// How a command exchange ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// `OK` seen; carries the last data payload (possibly empty).
    Success(String),
    /// Error line seen; carries the error line or a later data payload.
    Failure(String),
    /// Deadline passed without a terminal line.
    TimedOut,
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }

    /// Payload text as shown to the operator.
    pub fn response(&self) -> &str {
        match self {
            Outcome::Success(payload) | Outcome::Failure(payload) => payload,
            Outcome::TimedOut => TIMEOUT_MESSAGE,
        }
    }

    /// Convert into a result, naming `command` in the error.
    pub fn into_result(self, command: &str, timeout: Duration) -> Result<String, ModemError> {
        match self {
            Outcome::Success(payload) => Ok(payload),
            Outcome::Failure(response) => Err(ModemError::CommandRejected {
                command: command.to_string(),
                response,
            }),
            Outcome::TimedOut => Err(ModemError::ProtocolTimeout {
                command: command.to_string(),
                timeout,
            }),
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Success: {} Response: {}",
            self.is_success(),
            self.response()
        )
    }
}

// ─── Pending request ────────────────────────────────────────────────────────

/// Correlation state for the one command in flight.
#[derive(Debug)]
pub struct PendingRequest<'a> {
    command: &'a str,
    mnemonic: &'a str,
    deadline: Instant,
    payload: String,
    terminal: Option<bool>,
}

impl<'a> PendingRequest<'a> {
    pub fn new(command: &'a str, deadline: Instant) -> Self {
        PendingRequest {
            command,
            mnemonic: mnemonic(command),
            deadline,
            payload: String::new(),
            terminal: None,
        }
    }

    pub fn mnemonic(&self) -> &str {
        self.mnemonic
    }

    /// Apply one response line.
    pub fn observe(&mut self, line: &str) {
        tracing::trace!(
            command = self.command,
            haystack = line,
            needle = self.mnemonic,
            "processing response"
        );
        match classify(line, self.mnemonic) {
            LineKind::Data(payload) => self.payload = payload,
            LineKind::Ok => self.terminal = Some(true),
            LineKind::Error(line) => {
                self.payload = line;
                self.terminal = Some(false);
            }
            LineKind::Other => {}
        }
    }

    /// Resolved outcome, if a terminal line has been seen.
    pub fn outcome(&self) -> Option<Outcome> {
        self.terminal.map(|ok| {
            if ok {
                Outcome::Success(self.payload.clone())
            } else {
                Outcome::Failure(self.payload.clone())
            }
        })
    }

    pub fn expired(&self, now: Instant) -> bool {
        now > self.deadline
    }
}

// ─── Correlator ─────────────────────────────────────────────────────────────

/// Issues commands through the transmit queue and resolves them from the
/// receive queue.
///
/// Exchanges are serialized: a second caller waits until the first command
/// resolves, so at most one [`PendingRequest`] exists at any time.
pub struct Correlator {
    transmit: TransmitQueue,
    receive: ReceiveQueue,
    timeout: Duration,
    poll_interval: Duration,
    exchange: Mutex<()>,
}

impl Correlator {
    pub fn new(transmit: TransmitQueue, receive: ReceiveQueue, timings: &Timings) -> Self {
        Correlator {
            transmit,
            receive,
            timeout: timings.command_timeout,
            poll_interval: timings.poll_interval,
            exchange: Mutex::new(()),
        }
    }

    /// Queue a command without waiting for any response.
    ///
    /// Waits for any exchange in flight to resolve first, so the reply to
    /// `command` cannot be taken for that exchange's answer.
    pub async fn send(&self, command: &str) {
        let _guard = self.exchange.lock().await;
        tracing::debug!(command, "queueing without response");
        self.transmit.push(command.to_string());
    }

    /// Queue `command`, wait `settle`, then drop everything the modem said
    /// meanwhile. No other exchange runs until the settle period is over.
    /// Returns how many lines were dropped.
    pub async fn send_and_settle(&self, command: &str, settle: Duration) -> usize {
        let _guard = self.exchange.lock().await;
        tracing::debug!(command, settle = ?settle, "queueing and settling");
        self.transmit.push(command.to_string());
        tokio::time::sleep(settle).await;
        let stale = self.receive.drain();
        for line in &stale {
            tracing::trace!(line = %line, "discarding unsolicited response");
        }
        stale.len()
    }

    /// Send `command` and wait until it succeeds, fails or times out.
    pub async fn send_and_await(&self, command: &str) -> Outcome {
        let _guard = self.exchange.lock().await;

        let mut pending = PendingRequest::new(command, Instant::now() + self.timeout);
        tracing::trace!(command, needle = pending.mnemonic(), "searching for response");
        self.transmit.push(command.to_string());

        loop {
            while let Some(line) = self.receive.pop() {
                pending.observe(&line);
            }
            if let Some(outcome) = pending.outcome() {
                tracing::debug!(command, outcome = %outcome, "command resolved");
                return outcome;
            }
            if pending.expired(Instant::now()) {
                tracing::debug!(command, "command timed out");
                return Outcome::TimedOut;
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// [`send_and_await`](Self::send_and_await), mapping failures to errors.
    pub async fn request(&self, command: &str) -> Result<String, ModemError> {
        self.send_and_await(command)
            .await
            .into_result(command, self.timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn correlator() -> (Correlator, TransmitQueue, ReceiveQueue) {
        let tx = TransmitQueue::new();
        let rx = ReceiveQueue::new();
        let c = Correlator::new(tx.clone(), rx.clone(), &Timings::default());
        (c, tx, rx)
    }

    // ─── Pending request ────────────────────────────────────────────────

    #[test]
    fn ok_after_data_keeps_payload() {
        let mut req = PendingRequest::new("AT+CREG?", Instant::now());
        req.observe("AT+CREG?");
        req.observe("+CREG: 0,1");
        assert_eq!(req.outcome(), None);
        req.observe("OK");
        assert_eq!(req.outcome(), Some(Outcome::Success("0,1".into())));
    }

    #[test]
    fn data_after_terminal_in_same_pass_is_kept() {
        let mut req = PendingRequest::new("AT+CGCONTRDP", Instant::now());
        req.observe("OK");
        req.observe("+CGCONTRDP: 1,5,\"apn\"");
        assert_eq!(
            req.outcome(),
            Some(Outcome::Success("1,5,\"apn\"".into()))
        );
    }

    #[test]
    fn error_line_becomes_payload() {
        let mut req = PendingRequest::new("AT+CFUN=1", Instant::now());
        req.observe("+CME ERROR: SIM failure");
        assert_eq!(
            req.outcome(),
            Some(Outcome::Failure("+CME ERROR: SIM failure".into()))
        );
    }

    // ─── Exchanges ──────────────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn transmits_and_resolves() {
        let (c, tx, rx) = correlator();
        rx.push("+CREG: 0,1".into());
        rx.push("OK".into());

        let outcome = c.send_and_await("AT+CREG?").await;
        assert_eq!(outcome, Outcome::Success("0,1".into()));
        assert_eq!(tx.drain(), vec!["AT+CREG?".to_string()]);
        assert!(rx.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_after_command_timeout() {
        let (c, _tx, rx) = correlator();
        rx.push("+CREG: 0,1".into());

        let started = Instant::now();
        let outcome = c.send_and_await("AT+CREG?").await;
        let waited = started.elapsed();

        assert_eq!(outcome, Outcome::TimedOut);
        assert_eq!(outcome.response(), TIMEOUT_MESSAGE);
        assert!(waited >= Duration::from_secs(5));
        assert!(waited <= Duration::from_secs(5) + Duration::from_millis(20));
        assert!(rx.is_empty(), "lines seen while waiting are consumed");
    }

    #[tokio::test(start_paused = true)]
    async fn request_maps_rejection() {
        let (c, _tx, rx) = correlator();
        rx.push("ERROR".into());

        let err = c.request("AT+CGDEL=1").await.unwrap_err();
        assert!(matches!(
            err,
            ModemError::CommandRejected { ref command, ref response }
                if command == "AT+CGDEL=1" && response == "ERROR"
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn late_response_is_picked_up() {
        let (c, _tx, rx) = correlator();
        let feeder = {
            let rx = rx.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(1)).await;
                rx.push("OK".into());
            })
        };

        assert!(c.send_and_await("AT+CMEE=2").await.is_success());
        feeder.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn settle_drops_replies_and_holds_off_requests() {
        let (c, tx, rx) = correlator();
        let c = Arc::new(c);
        rx.push("+CREG: 0,2".into());

        let reset = {
            let c = c.clone();
            tokio::spawn(async move { c.send_and_settle(SOFT_RESET, Duration::from_secs(2)).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(tx.drain(), vec![SOFT_RESET.to_string()]);
        rx.push("OK".into());

        let query = {
            let c = c.clone();
            tokio::spawn(async move { c.send_and_await("AT+CREG?").await })
        };
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(tx.is_empty(), "request queued while the reset was settling");

        assert_eq!(reset.await.unwrap(), 2);
        while tx.pop().is_none() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        rx.push("+CREG: 0,1".into());
        rx.push("OK".into());
        assert_eq!(query.await.unwrap(), Outcome::Success("0,1".into()));
    }

    // ─── Serialization ──────────────────────────────────────────────────

    /// Scripted modem answering each command `delay` after it is written
    /// (`ATZ` at once). Returns the commands in the order they reached the
    /// transmit queue.
    fn spawn_modem(tx: TransmitQueue, rx: ReceiveQueue, delay: Duration) -> Arc<Mutex<Vec<String>>> {
        let written = Arc::new(Mutex::new(Vec::new()));
        let log = written.clone();
        tokio::spawn(async move {
            loop {
                while let Some(command) = tx.pop() {
                    log.lock().await.push(command.clone());
                    let rx = rx.clone();
                    tokio::spawn(async move {
                        let (wait, data) = match command.as_str() {
                            "AT+CSQ" => (delay, Some("+CSQ: 17,99")),
                            "AT+CREG?" => (delay, Some("+CREG: 0,5")),
                            _ => (Duration::ZERO, None),
                        };
                        tokio::time::sleep(wait).await;
                        if let Some(data) = data {
                            rx.push(data.into());
                        }
                        rx.push("OK".into());
                    });
                }
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        });
        written
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_requests_are_serialized() {
        let (c, tx, rx) = correlator();
        let c = Arc::new(c);
        let written = spawn_modem(tx, rx, Duration::from_secs(1));

        let first = {
            let c = c.clone();
            tokio::spawn(async move { c.send_and_await("AT+CSQ").await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        let second = {
            let c = c.clone();
            tokio::spawn(async move { c.send_and_await("AT+CREG?").await })
        };

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(
            *written.lock().await,
            vec!["AT+CSQ"],
            "second command written before the first resolved"
        );

        assert_eq!(first.await.unwrap(), Outcome::Success("17,99".into()));
        assert_eq!(second.await.unwrap(), Outcome::Success("0,5".into()));
        assert_eq!(*written.lock().await, vec!["AT+CSQ", "AT+CREG?"]);
    }

    #[tokio::test(start_paused = true)]
    async fn fire_and_forget_waits_for_exchange_in_flight() {
        let (c, tx, rx) = correlator();
        let c = Arc::new(c);
        let written = spawn_modem(tx, rx, Duration::from_secs(1));

        let query = {
            let c = c.clone();
            tokio::spawn(async move { c.send_and_await("AT+CSQ").await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        c.send(SOFT_RESET).await;

        assert_eq!(query.await.unwrap(), Outcome::Success("17,99".into()));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(*written.lock().await, vec!["AT+CSQ", SOFT_RESET]);
    }

    #[test]
    fn outcome_display_matches_console_format() {
        assert_eq!(
            Outcome::Success("0,1".into()).to_string(),
            "Success: true Response: 0,1"
        );
        assert_eq!(
            Outcome::TimedOut.to_string(),
            "Success: false Response: Timed out waiting for response"
        );
    }
}
