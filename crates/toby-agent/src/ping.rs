//! ICMP reachability probing with the system `ping`.
//!
//! Each round runs `ping -c 1 -W <max_rtt> -I <source> <target>` and yields
//! exactly one event: `Reply` if the echo came back inside the round-trip
//! ceiling, `Idle` otherwise. Rounds repeat every probe interval until the
//! session is stopped.

use std::net::Ipv4Addr;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::sync::mpsc;

use toby_modem::health::{ProbeEvent, ProbeSession, ReachabilityProber};
use toby_modem::{ModemError, Timings};

pub struct PingProber {
    program: String,
    max_rtt: Duration,
    interval: Duration,
}

impl PingProber {
    pub fn new(timings: &Timings) -> Self {
        PingProber {
            program: "ping".to_string(),
            max_rtt: timings.probe_max_rtt,
            interval: timings.probe_interval,
        }
    }

    /// Probe with something other than `ping` on the `PATH`.
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }
}

/// Arguments for one probe round. `-W` takes whole seconds; anything under
/// a second rounds up.
pub fn ping_args(source: Ipv4Addr, target: Ipv4Addr, max_rtt: Duration) -> Vec<String> {
    let wait = max_rtt.as_secs() + u64::from(max_rtt.subsec_nanos() > 0);
    vec![
        "-c".to_string(),
        "1".to_string(),
        "-W".to_string(),
        wait.max(1).to_string(),
        "-I".to_string(),
        source.to_string(),
        target.to_string(),
    ]
}

async fn probe_once(program: &str, args: &[String]) -> std::io::Result<ProbeEvent> {
    let status = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .status()
        .await?;
    Ok(if status.success() {
        ProbeEvent::Reply
    } else {
        ProbeEvent::Idle
    })
}

#[async_trait]
impl ReachabilityProber for PingProber {
    async fn start(&self, source: Ipv4Addr, target: Ipv4Addr) -> Result<ProbeSession, ModemError> {
        let args = ping_args(source, target, self.max_rtt);

        // The first round runs inline so a missing binary fails provisioning
        // instead of looking like a dead link.
        let first = probe_once(&self.program, &args)
            .await
            .map_err(|e| ModemError::external(self.program.as_str(), e))?;

        let (tx, rx) = mpsc::channel(16);
        let program = self.program.clone();
        let interval = self.interval;
        let task = tokio::spawn(async move {
            let mut event = first;
            loop {
                tracing::trace!(peer = %target, ?event, "probe round");
                if tx.send(event).await.is_err() {
                    return;
                }
                tokio::time::sleep(interval).await;
                event = match probe_once(&program, &args).await {
                    Ok(event) => event,
                    Err(e) => {
                        tracing::error!(program = %program, error = %e, "probe failed to run");
                        return;
                    }
                };
            }
        });

        Ok(ProbeSession::new(rx, Some(task)))
    }
}
