//! # Setting Enforcer
//!
//! Query-then-correct convergence for persistent modem settings. A modem
//! that already matches is left alone; one that does not gets exactly one
//! corrective command and is flagged for a restart. Restarts are batched by
//! the caller once every setting has been checked.

use crate::correlator::Correlator;
use crate::error::ModemError;

/// A persistent setting, written as the command that applies it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModemSetting {
    /// Corrective command, e.g. `AT+UBMCONF=2`.
    pub command: String,
    /// Command queried with a trailing `?`, e.g. `AT+UBMCONF`.
    pub query: String,
    /// Substring the query response must contain, e.g. `2`.
    pub desired: String,
    /// Name used in log output.
    pub name: String,
}

impl ModemSetting {
    /// Split `<query>=<value>` into its parts.
    pub fn parse(command: &str, name: &str) -> Result<Self, ModemError> {
        let (query, desired) = command
            .split_once('=')
            .ok_or_else(|| ModemError::InvalidSetting(command.to_string()))?;
        Ok(ModemSetting {
            command: command.to_string(),
            query: query.to_string(),
            desired: desired.to_string(),
            name: name.to_string(),
        })
    }
}

/// Settings the TOBY must carry before a data session is possible:
/// `(command, name)`.
pub const REQUIRED_SETTINGS: &[(&str, &str)] = &[
    ("AT+UBMCONF=2", "networking mode"),
    ("AT+UUSBCONF=2,\"ECM\"", "USB mode"),
    ("AT+UWWEBUI=1", "web server mode"),
];

/// The parsed [`REQUIRED_SETTINGS`].
pub fn required_settings() -> Vec<ModemSetting> {
    REQUIRED_SETTINGS
        .iter()
        .filter_map(|(command, name)| ModemSetting::parse(command, name).ok())
        .collect()
}

/// Make sure `setting` holds on the modem.
///
/// Returns whether a corrective command was applied (and so a restart is
/// due). A failed query or a rejected correction is returned as an error;
/// recovery is left to the caller.
pub async fn enforce(correlator: &Correlator, setting: &ModemSetting) -> Result<bool, ModemError> {
    let query = format!("{}?", setting.query);
    let current = correlator.request(&query).await.inspect_err(|e| {
        tracing::error!(setting = %setting.name, error = %e, "error polling modem setting");
    })?;

    if current.contains(&setting.desired) {
        tracing::info!(
            setting = %setting.name,
            current = %current,
            "modem in desired setting, continuing"
        );
        return Ok(false);
    }

    tracing::info!(
        setting = %setting.name,
        current = %current,
        desired = %setting.desired,
        command = %setting.command,
        "modem setting incorrect, correcting and restarting later"
    );
    correlator.request(&setting.command).await.inspect_err(|e| {
        tracing::error!(setting = %setting.name, error = %e, "error setting modem");
    })?;
    Ok(true)
}
