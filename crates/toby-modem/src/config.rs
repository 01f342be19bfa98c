//! Runtime configuration: which modem, which APN, which interface, and the
//! timing envelope of every step in the lifecycle.
//!
//! Loaded from an optional TOML file and overridden from the command line.
//! Durations are written in milliseconds:
//!
//! ```toml
//! device = "/dev/ttyACM0"
//! apn = "internet"
//! interface = "wwan0"
//!
//! [timings]
//! command_timeout_ms = 5000
//! unreachable_threshold = 3
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Deserializer};

use crate::error::ModemError;

pub const DEFAULT_BAUD_RATE: u32 = 115_200;
pub const DEFAULT_RESOLV_CONF: &str = "/etc/resolv.conf";

/// Everything the connectivity lifecycle needs to know up front.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ModemConfig {
    /// Serial device node, e.g. `/dev/ttyACM0`.
    pub device: String,
    pub baud_rate: u32,
    /// Access point name of the mobile provider.
    pub apn: String,
    /// Network interface that receives the assigned address, e.g. `wwan0`.
    pub interface: String,
    /// Resolver file overwritten with the assigned DNS servers.
    pub resolv_conf: PathBuf,
    pub timings: Timings,
    pub recovery: RecoveryConfig,
}

impl Default for ModemConfig {
    fn default() -> Self {
        ModemConfig {
            device: String::new(),
            baud_rate: DEFAULT_BAUD_RATE,
            apn: String::new(),
            interface: String::new(),
            resolv_conf: PathBuf::from(DEFAULT_RESOLV_CONF),
            timings: Timings::default(),
            recovery: RecoveryConfig::default(),
        }
    }
}

impl ModemConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ModemError> {
        toml::from_str(s).map_err(|e| ModemError::Config(e.to_string()))
    }

    pub fn load(path: &Path) -> Result<Self, ModemError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ModemError::Config(format!("reading {}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    /// Reject configurations the lifecycle cannot run with.
    pub fn validate(&self) -> Result<(), ModemError> {
        if self.device.is_empty() {
            return Err(ModemError::Config("must specify port".into()));
        }
        if self.apn.is_empty() {
            return Err(ModemError::Config("must specify APN".into()));
        }
        if self.interface.is_empty() {
            return Err(ModemError::Config("must specify network interface".into()));
        }
        if self.baud_rate == 0 {
            return Err(ModemError::Config("baud rate must be positive".into()));
        }
        if self.timings.registration_attempts == 0 {
            return Err(ModemError::Config(
                "registration_attempts must be at least 1".into(),
            ));
        }
        if self.timings.unreachable_threshold == 0 {
            return Err(ModemError::Config(
                "unreachable_threshold must be at least 1".into(),
            ));
        }
        if self.recovery.max_consecutive_failures == 0 {
            return Err(ModemError::Config(
                "max_consecutive_failures must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Delays, deadlines and retry counts.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Timings {
    /// Deadline for a single command exchange.
    #[serde(rename = "command_timeout_ms", deserialize_with = "millis")]
    pub command_timeout: Duration,
    /// Receive queue poll interval while a command is in flight.
    #[serde(rename = "poll_interval_ms", deserialize_with = "millis")]
    pub poll_interval: Duration,
    /// Wait after a soft reset before the next cycle.
    #[serde(rename = "reset_settle_ms", deserialize_with = "millis")]
    pub reset_settle: Duration,
    /// Wait after the PDP provisioning sequence.
    #[serde(rename = "pdp_settle_ms", deserialize_with = "millis")]
    pub pdp_settle: Duration,
    pub registration_attempts: u32,
    #[serde(rename = "registration_interval_ms", deserialize_with = "millis")]
    pub registration_interval: Duration,
    /// Wait after activating the session before querying addresses.
    #[serde(rename = "session_settle_ms", deserialize_with = "millis")]
    pub session_settle: Duration,
    /// Device node poll interval while waiting for a restart.
    #[serde(rename = "device_poll_ms", deserialize_with = "millis")]
    pub device_poll: Duration,
    /// Wait after the device reappears before exiting.
    #[serde(rename = "reappear_settle_ms", deserialize_with = "millis")]
    pub reappear_settle: Duration,
    /// Longest round trip counted as a reply.
    #[serde(rename = "probe_max_rtt_ms", deserialize_with = "millis")]
    pub probe_max_rtt: Duration,
    #[serde(rename = "probe_interval_ms", deserialize_with = "millis")]
    pub probe_interval: Duration,
    /// Consecutive unanswered probes that trigger re-provisioning.
    pub unreachable_threshold: u32,
    /// How long the agent waits for a restart to finish once the serial
    /// link is lost.
    #[serde(rename = "device_lost_grace_ms", deserialize_with = "millis")]
    pub device_lost_grace: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Timings {
            command_timeout: Duration::from_secs(5),
            poll_interval: Duration::from_millis(10),
            reset_settle: Duration::from_secs(2),
            pdp_settle: Duration::from_secs(2),
            registration_attempts: 20,
            registration_interval: Duration::from_millis(500),
            session_settle: Duration::from_secs(1),
            device_poll: Duration::from_millis(100),
            reappear_settle: Duration::from_secs(2),
            probe_max_rtt: Duration::from_secs(5),
            probe_interval: Duration::from_secs(1),
            unreachable_threshold: 3,
            device_lost_grace: Duration::from_secs(10),
        }
    }
}

/// In-process recovery policy.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RecoveryConfig {
    /// Failed provisioning cycles in a row before giving up on the process.
    pub max_consecutive_failures: u32,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        RecoveryConfig {
            max_consecutive_failures: 3,
        }
    }
}

fn millis<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
    u64::deserialize(d).map(Duration::from_millis)
}
