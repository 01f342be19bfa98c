//! # Response parsing
//!
//! The AT dialect spoken by the modem has no grammar beyond:
//!
//! ```text
//! <echo or unsolicited noise>
//! <mnemonic>: <payload>        zero or more data lines
//! OK | ... ERROR ...           terminal line
//! ```
//!
//! This module derives the mnemonic a command is answered with, classifies
//! lines against it, and decodes the handful of payloads the lifecycle
//! consumes.

use std::fmt;
use std::net::Ipv4Addr;

use crate::error::ModemError;

// ─── Mnemonic ───────────────────────────────────────────────────────────────

/// Derive the response mnemonic for a command.
///
/// Strips an `AT` or `at` prefix, then takes the first remaining character
/// followed by the run of ASCII letters after it: `AT+CREG?` → `+CREG`,
/// `AT+UIPADDR=` → `+UIPADDR`, `ATZ` → `Z`. Multi-part mnemonics such as
/// `+UPSDA` vs `+UPSD` are not disambiguated.
pub fn mnemonic(command: &str) -> &str {
    let rest = command
        .strip_prefix("AT")
        .or_else(|| command.strip_prefix("at"))
        .unwrap_or(command);

    let mut chars = rest.char_indices();
    let Some((_, first)) = chars.next() else {
        return "";
    };
    let mut end = first.len_utf8();
    for (idx, c) in chars {
        if !c.is_ascii_alphabetic() {
            break;
        }
        end = idx + c.len_utf8();
    }
    &rest[..end]
}

// ─── Line classification ────────────────────────────────────────────────────

/// What a single response line means for a pending command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineKind {
    /// `<mnemonic>: <payload>`, with the prefix removed.
    Data(String),
    /// Exactly `OK`.
    Ok,
    /// Any line containing `ERROR`; carries the whole line.
    Error(String),
    /// Echo, URC or anything else unrelated.
    Other,
}

/// Classify `line` for a command answered with `mnemonic`.
///
/// Data lines take precedence, so `+CME ERROR: ...` is only an error when
/// it does not also carry the expected prefix.
pub fn classify(line: &str, mnemonic: &str) -> LineKind {
    if !mnemonic.is_empty() {
        let prefix = format!("{mnemonic}: ");
        if line.contains(&prefix) {
            return LineKind::Data(line.replacen(&prefix, "", 1));
        }
    }
    if line == "OK" {
        LineKind::Ok
    } else if line.contains("ERROR") {
        LineKind::Error(line.to_string())
    } else {
        LineKind::Other
    }
}

// ─── Registration ───────────────────────────────────────────────────────────

/// Network registration state reported by `+CREG: <n>,<stat>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationStatus {
    NotRegistered,
    Home,
    Searching,
    Denied,
    Unknown,
    Roaming,
    Other(u8),
}

impl RegistrationStatus {
    pub fn from_code(code: u8) -> Self {
        match code {
            0 => RegistrationStatus::NotRegistered,
            1 => RegistrationStatus::Home,
            2 => RegistrationStatus::Searching,
            3 => RegistrationStatus::Denied,
            4 => RegistrationStatus::Unknown,
            5 => RegistrationStatus::Roaming,
            other => RegistrationStatus::Other(other),
        }
    }

    /// Attached to the home network or roaming.
    pub fn is_registered(&self) -> bool {
        matches!(self, RegistrationStatus::Home | RegistrationStatus::Roaming)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RegistrationStatus::NotRegistered => "not registered",
            RegistrationStatus::Home => "home",
            RegistrationStatus::Searching => "searching",
            RegistrationStatus::Denied => "denied",
            RegistrationStatus::Unknown => "unknown",
            RegistrationStatus::Roaming => "roaming",
            RegistrationStatus::Other(_) => "other",
        }
    }
}

impl fmt::Display for RegistrationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistrationStatus::Other(code) => write!(f, "other ({code})"),
            status => f.write_str(status.as_str()),
        }
    }
}

/// Decode the `<stat>` field (second field) of a `+CREG` payload.
///
/// Returns `None` when the payload has no parsable status field.
pub fn parse_registration(payload: &str) -> Option<RegistrationStatus> {
    payload
        .split(',')
        .nth(1)
        .and_then(|stat| stat.trim().parse::<u8>().ok())
        .map(RegistrationStatus::from_code)
}

// ─── Network parameters ─────────────────────────────────────────────────────

/// Addressing assigned to the data session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkConfig {
    pub ip: Ipv4Addr,
    pub gateway: Ipv4Addr,
    pub primary_dns: Ipv4Addr,
    pub secondary_dns: Ipv4Addr,
}

impl NetworkConfig {
    /// Build from the `+CGCONTRDP` and `+UIPADDR` payloads.
    pub fn from_responses(context_params: &str, ip_addr: &str) -> Result<Self, ModemError> {
        let context: Vec<&str> = context_params.split(',').collect();
        let addr: Vec<&str> = ip_addr.split(',').collect();

        Ok(NetworkConfig {
            ip: ipv4_field(&context, 4, "AT+CGCONTRDP")?,
            primary_dns: ipv4_field(&context, 5, "AT+CGCONTRDP")?,
            secondary_dns: ipv4_field(&context, 6, "AT+CGCONTRDP")?,
            gateway: ipv4_field(&addr, 2, "AT+UIPADDR=")?,
        })
    }

    /// Resolver file contents, primary first.
    pub fn resolv_conf(&self) -> String {
        format!(
            "nameserver {}\nnameserver {}\n",
            self.primary_dns, self.secondary_dns
        )
    }
}

/// Remove one pair of surrounding double quotes, if present.
pub fn unquote(field: &str) -> &str {
    field
        .strip_prefix('"')
        .and_then(|f| f.strip_suffix('"'))
        .unwrap_or(field)
}

fn ipv4_field(fields: &[&str], index: usize, command: &str) -> Result<Ipv4Addr, ModemError> {
    let raw = fields.get(index).ok_or_else(|| ModemError::ConfigExtraction {
        command: command.to_string(),
        reason: format!("expected at least {} fields, got {}", index + 1, fields.len()),
    })?;
    let value = unquote(raw.trim());
    value.parse().map_err(|_| ModemError::ConfigExtraction {
        command: command.to_string(),
        reason: format!("field {index} is not an IPv4 address: {value:?}"),
    })
}
