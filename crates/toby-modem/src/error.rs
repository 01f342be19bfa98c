//! Error taxonomy for the modem link and the connectivity lifecycle.

use std::time::Duration;

use thiserror::Error;

// ── Errors ──────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ModemError {
    /// Read or write failure on the serial transport.
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),
    /// A response line outgrew the framer's working buffer.
    #[error("response line exceeded {capacity} byte working buffer")]
    LineOverflow { capacity: usize },
    /// The device node disappeared while the link was in use.
    #[error("modem device {path} is no longer available")]
    DeviceGone { path: String },
    /// No terminal line arrived before the command deadline.
    #[error("timed out waiting for response to {command} after {timeout:?}")]
    ProtocolTimeout { command: String, timeout: Duration },
    /// The modem answered with an error line.
    #[error("modem rejected {command}: {response}")]
    CommandRejected { command: String, response: String },
    /// Network registration never reached home or roaming.
    #[error("network did not register after {attempts} polls, last status: {last_response}")]
    RegistrationTimeout { attempts: u32, last_response: String },
    /// A network parameter response was missing fields or malformed.
    #[error("could not extract network config from {command}: {reason}")]
    ConfigExtraction { command: String, reason: String },
    /// Interface, route or resolver configuration failed.
    #[error("{tool} failed: {reason}")]
    ExternalTool { tool: String, reason: String },
    #[error("invalid modem setting {0:?}: expected <query>=<value>")]
    InvalidSetting(String),
    #[error("configuration error: {0}")]
    Config(String),
}

impl ModemError {
    /// Shorthand for collaborator failures.
    pub fn external(tool: impl Into<String>, reason: impl ToString) -> Self {
        ModemError::ExternalTool {
            tool: tool.into(),
            reason: reason.to_string(),
        }
    }
}
