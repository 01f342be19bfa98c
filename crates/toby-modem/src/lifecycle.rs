//! # Connectivity lifecycle
//!
//! Takes the modem from power-on to a supervised data session:
//!
//! ```text
//! EnforceSettings ──changed──▶ RestartWait ──reappeared──▶ (process restart)
//!        │
//!        ▼
//! ProvisionPdp → AwaitRegistration → ActivateSession → ExtractConfig
//!        ▲                                                   │
//!        │                                                   ▼
//!        └──── 3 unanswered probes ──── Monitor ◀── ConfigureInterface
//!
//! any step fails ──▶ Recovering (ATZ, settle) ──▶ next cycle, or give up
//! ```
//!
//! A failed cycle soft-resets the modem and starts over. Settings are
//! re-checked until they have been confirmed once; after that cycles start
//! at PDP provisioning. After `max_consecutive_failures` failed cycles in a
//! row the last error is returned and the process is expected to exit.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;

use crate::config::ModemConfig;
use crate::correlator::{Correlator, SOFT_RESET};
use crate::device::DevicePresence;
use crate::error::ModemError;
use crate::health::{HealthCounter, ProbeEvent, ReachabilityProber};
use crate::response::{parse_registration, NetworkConfig, RegistrationStatus};
use crate::settings::{enforce, required_settings};

/// Full functionality with a modem reset, used after changing settings.
pub const RESTART_COMMAND: &str = "AT+CFUN=1,1";
pub const REGISTRATION_QUERY: &str = "AT+CREG?";
pub const CONTEXT_PARAMS_QUERY: &str = "AT+CGCONTRDP";
pub const IP_ADDR_QUERY: &str = "AT+UIPADDR=";

/// Bind PDP profile 0 to the default context and activate it.
pub const SESSION_COMMANDS: &[&str] = &["AT+UPSD=0,100,4", "AT+UPSD=0,0,0", "AT+UPSDA=0,3"];

/// Context reset and definition sequence for `apn`, ending in full
/// functionality.
pub fn pdp_commands(apn: &str) -> Vec<String> {
    let mut commands = vec!["AT+CMEE=2".to_string(), "AT+CFUN=4".to_string()];
    commands.extend((1..=8).map(|cid| format!("AT+CGDEL={cid}")));
    commands.push(format!("AT+UCGDFLT=1,\"IP\",\"{apn}\""));
    commands.push("AT+CFUN=1".to_string());
    commands
}

// ─── Collaborators ──────────────────────────────────────────────────────────

/// Host-side network configuration.
#[async_trait]
pub trait HostNetwork: Send + Sync {
    /// Bring `interface` up point-to-point with the gateway and route
    /// default traffic through it.
    async fn configure_interface(
        &self,
        interface: &str,
        net: &NetworkConfig,
    ) -> Result<(), ModemError>;

    /// Overwrite the resolver file with the session's DNS servers.
    async fn write_resolver(&self, path: &Path, net: &NetworkConfig) -> Result<(), ModemError> {
        tokio::fs::write(path, net.resolv_conf())
            .await
            .map_err(|e| ModemError::external(format!("writing {}", path.display()), e))
    }
}

/// External services the lifecycle hands off to.
pub struct Collaborators {
    pub host: Box<dyn HostNetwork>,
    pub prober: Box<dyn ReachabilityProber>,
    pub presence: Box<dyn DevicePresence>,
}

// ─── States ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkState {
    #[default]
    EnforceSettings,
    RestartWait,
    ProvisionPdp,
    AwaitRegistration,
    ActivateSession,
    ExtractConfig,
    ConfigureInterface,
    Monitor,
    Recovering,
}

impl LinkState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkState::EnforceSettings => "enforce-settings",
            LinkState::RestartWait => "restart-wait",
            LinkState::ProvisionPdp => "provision-pdp",
            LinkState::AwaitRegistration => "await-registration",
            LinkState::ActivateSession => "activate-session",
            LinkState::ExtractConfig => "extract-config",
            LinkState::ConfigureInterface => "configure-interface",
            LinkState::Monitor => "monitor",
            LinkState::Recovering => "recovering",
        }
    }
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why [`ConnectionManager::run`] returned without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shutdown {
    /// Settings were changed and the modem restarted; the process should
    /// exit cleanly so it starts against the restarted device.
    DeviceRestarted,
}

enum CycleEnd {
    Restarted,
    LinkLost,
}

// ─── Manager ────────────────────────────────────────────────────────────────

/// Drives the lifecycle for one modem.
pub struct ConnectionManager {
    config: ModemConfig,
    correlator: Arc<Correlator>,
    host: Box<dyn HostNetwork>,
    prober: Box<dyn ReachabilityProber>,
    presence: Box<dyn DevicePresence>,
    state_tx: watch::Sender<LinkState>,
    network: Option<NetworkConfig>,
    health: HealthCounter,
    settings_enforced: bool,
    consecutive_failures: u32,
}

impl ConnectionManager {
    pub fn new(config: ModemConfig, correlator: Arc<Correlator>, collaborators: Collaborators) -> Self {
        let (state_tx, _) = watch::channel(LinkState::default());
        let health = HealthCounter::new(config.timings.unreachable_threshold);
        ConnectionManager {
            config,
            correlator,
            host: collaborators.host,
            prober: collaborators.prober,
            presence: collaborators.presence,
            state_tx,
            network: None,
            health,
            settings_enforced: false,
            consecutive_failures: 0,
        }
    }

    /// Follow state transitions.
    pub fn subscribe(&self) -> watch::Receiver<LinkState> {
        self.state_tx.subscribe()
    }

    pub fn state(&self) -> LinkState {
        *self.state_tx.borrow()
    }

    /// Addressing from the most recent successful provisioning.
    pub fn network(&self) -> Option<&NetworkConfig> {
        self.network.as_ref()
    }

    /// Run until the modem restarts or recovery gives up.
    pub async fn run(&mut self) -> Result<Shutdown, ModemError> {
        let max_failures = self.config.recovery.max_consecutive_failures;

        loop {
            match self.cycle().await {
                Ok(CycleEnd::Restarted) => return Ok(Shutdown::DeviceRestarted),
                Ok(CycleEnd::LinkLost) => {
                    tracing::info!("attempting to reconnect");
                }
                Err(e) => {
                    self.consecutive_failures += 1;
                    tracing::error!(
                        state = %self.state(),
                        error = %e,
                        failures = self.consecutive_failures,
                        "connectivity step failed, issuing modem reset"
                    );
                    self.set_state(LinkState::Recovering);
                    self.soft_reset().await;
                    if self.consecutive_failures >= max_failures {
                        tracing::error!(
                            failures = self.consecutive_failures,
                            "recovery exhausted"
                        );
                        return Err(e);
                    }
                    tracing::warn!("retrying provisioning");
                }
            }
        }
    }

    async fn cycle(&mut self) -> Result<CycleEnd, ModemError> {
        if !self.settings_enforced {
            if self.enforce_settings().await? {
                self.restart_modem().await;
                return Ok(CycleEnd::Restarted);
            }
            self.settings_enforced = true;
        }

        self.provision_pdp().await?;
        self.await_registration().await?;
        self.activate_session().await?;
        let net = self.extract_config().await?;
        self.configure_interface(&net).await?;
        self.monitor(&net).await
    }

    fn set_state(&self, state: LinkState) {
        tracing::debug!(state = %state, "lifecycle state");
        self.state_tx.send_replace(state);
    }

    /// Queue `ATZ`, give it time to land, and drop whatever the modem said
    /// meanwhile.
    async fn soft_reset(&self) {
        let stale = self
            .correlator
            .send_and_settle(SOFT_RESET, self.config.timings.reset_settle)
            .await;
        if stale > 0 {
            tracing::debug!(lines = stale, "discarded responses after reset");
        }
    }

    // ─── Steps ──────────────────────────────────────────────────────────

    /// Returns whether any setting was changed.
    async fn enforce_settings(&self) -> Result<bool, ModemError> {
        self.set_state(LinkState::EnforceSettings);
        let mut restart_required = false;
        for setting in required_settings() {
            restart_required |= enforce(&self.correlator, &setting).await?;
        }
        Ok(restart_required)
    }

    async fn restart_modem(&self) {
        self.set_state(LinkState::RestartWait);
        tracing::info!("restarting modem and then program once it returns");
        self.correlator.send(RESTART_COMMAND).await;

        let timings = &self.config.timings;
        let mut disappeared = false;
        loop {
            if !self.presence.is_present() {
                if !disappeared {
                    tracing::info!(device = %self.config.device, "modem disappeared, awaiting its return");
                    disappeared = true;
                }
            } else if disappeared {
                tracing::info!(
                    device = %self.config.device,
                    settle = ?timings.reappear_settle,
                    "modem reappeared, restarting"
                );
                tokio::time::sleep(timings.reappear_settle).await;
                return;
            }
            tokio::time::sleep(timings.device_poll).await;
        }
    }

    async fn provision_pdp(&self) -> Result<(), ModemError> {
        self.set_state(LinkState::ProvisionPdp);
        tracing::info!(apn = %self.config.apn, "setting up PDP context");
        for command in pdp_commands(&self.config.apn) {
            self.correlator.request(&command).await?;
        }
        tokio::time::sleep(self.config.timings.pdp_settle).await;
        Ok(())
    }

    async fn await_registration(&self) -> Result<RegistrationStatus, ModemError> {
        self.set_state(LinkState::AwaitRegistration);
        tracing::info!("waiting for connection to mobile network to come up");

        let attempts = self.config.timings.registration_attempts;
        let mut last_response = String::new();
        for attempt in 1..=attempts {
            let payload = self.correlator.request(REGISTRATION_QUERY).await?;
            match parse_registration(&payload) {
                Some(status) if status.is_registered() => {
                    tracing::info!(status = %status, attempt, "registered on mobile network");
                    return Ok(status);
                }
                Some(status) => tracing::debug!(status = %status, attempt, "not registered yet"),
                None => tracing::debug!(response = %payload, attempt, "no registration status"),
            }
            last_response = payload;
            tokio::time::sleep(self.config.timings.registration_interval).await;
        }

        Err(ModemError::RegistrationTimeout {
            attempts,
            last_response,
        })
    }

    async fn activate_session(&self) -> Result<(), ModemError> {
        self.set_state(LinkState::ActivateSession);
        tracing::info!("assigning PDP to default context");
        for command in SESSION_COMMANDS {
            self.correlator.request(command).await?;
        }
        tokio::time::sleep(self.config.timings.session_settle).await;
        Ok(())
    }

    async fn extract_config(&self) -> Result<NetworkConfig, ModemError> {
        self.set_state(LinkState::ExtractConfig);
        tracing::info!("finding networking configuration");
        let context = self.correlator.request(CONTEXT_PARAMS_QUERY).await?;
        let address = self.correlator.request(IP_ADDR_QUERY).await?;
        let net = NetworkConfig::from_responses(&context, &address)?;
        tracing::info!(
            ip = %net.ip,
            primary_dns = %net.primary_dns,
            secondary_dns = %net.secondary_dns,
            gateway = %net.gateway,
            "network configuration"
        );
        Ok(net)
    }

    async fn configure_interface(&mut self, net: &NetworkConfig) -> Result<(), ModemError> {
        self.set_state(LinkState::ConfigureInterface);
        tracing::info!(interface = %self.config.interface, "bringing up interface");
        self.host
            .configure_interface(&self.config.interface, net)
            .await?;
        self.host
            .write_resolver(&self.config.resolv_conf, net)
            .await?;
        self.network = Some(*net);
        Ok(())
    }

    /// Probe the primary DNS server from the assigned address until it
    /// stops answering.
    async fn monitor(&mut self, net: &NetworkConfig) -> Result<CycleEnd, ModemError> {
        self.set_state(LinkState::Monitor);
        let mut session = self.prober.start(net.ip, net.primary_dns).await?;
        self.consecutive_failures = 0;
        tracing::info!(source = %net.ip, peer = %net.primary_dns, "monitoring connectivity");

        self.health.reset();
        loop {
            match session.next().await {
                Some(event) => {
                    if event == ProbeEvent::Reply {
                        tracing::trace!(peer = %net.primary_dns, "probe reply");
                    }
                    if self.health.record(event) {
                        tracing::warn!(
                            misses = self.health.misses(),
                            "no connectivity after consecutive probes"
                        );
                        break;
                    }
                }
                None => {
                    tracing::warn!("reachability prober stopped");
                    break;
                }
            }
        }

        session.stop();
        Ok(CycleEnd::LinkLost)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pdp_sequence_ends_with_full_functionality() {
        let cmds = pdp_commands("internet");
        assert_eq!(cmds.len(), 12);
        assert_eq!(cmds[0], "AT+CMEE=2");
        assert_eq!(cmds[1], "AT+CFUN=4");
        assert_eq!(cmds[2], "AT+CGDEL=1");
        assert_eq!(cmds[9], "AT+CGDEL=8");
        assert_eq!(cmds[10], "AT+UCGDFLT=1,\"IP\",\"internet\"");
        assert_eq!(cmds[11], "AT+CFUN=1");
    }

    #[test]
    fn state_names() {
        assert_eq!(LinkState::default(), LinkState::EnforceSettings);
        assert_eq!(LinkState::ProvisionPdp.to_string(), "provision-pdp");
        assert_eq!(LinkState::Monitor.as_str(), "monitor");
    }
}
