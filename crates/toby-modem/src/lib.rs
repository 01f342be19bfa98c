//! # toby-modem
//!
//! Serial AT command plumbing and the LTE connectivity lifecycle for u-blox
//! TOBY modems.
//!
//! ## Crate structure
//!
//! - [`framer`]: CRLF line framing of the raw serial stream
//! - [`queue`]: Transmit/receive FIFOs shared with the I/O thread
//! - [`pump`]: I/O thread driving the serial transport
//! - [`response`]: Mnemonic derivation, line classification, payload decoding
//! - [`correlator`]: One-command-at-a-time request/response matching
//! - [`settings`]: Query-then-correct enforcement of persistent settings
//! - [`health`]: Probe events and the unreachable counter
//! - [`device`]: Device node presence
//! - [`lifecycle`]: Provisioning and supervision state machine
//! - [`config`]: Runtime configuration and timings
//! - [`error`]: Error taxonomy

pub mod config;
pub mod correlator;
pub mod device;
pub mod error;
pub mod framer;
pub mod health;
pub mod lifecycle;
pub mod pump;
pub mod queue;
pub mod response;
pub mod settings;

pub use config::{ModemConfig, Timings};
pub use correlator::{Correlator, Outcome};
pub use error::ModemError;
pub use lifecycle::{Collaborators, ConnectionManager, HostNetwork, LinkState, Shutdown};
pub use response::NetworkConfig;
