//! Host network configuration through the system's `ifconfig` and `route`.

use async_trait::async_trait;
use tokio::process::Command;

use toby_modem::{HostNetwork, ModemError, NetworkConfig};

/// Applies session addressing to the host with net-tools.
#[derive(Debug, Default)]
pub struct SystemNetwork;

/// `ifconfig <iface> <ip> pointopoint <gateway>`
pub fn ifconfig_args(interface: &str, net: &NetworkConfig) -> Vec<String> {
    vec![
        interface.to_string(),
        net.ip.to_string(),
        "pointopoint".to_string(),
        net.gateway.to_string(),
    ]
}

/// `route add default gw <gateway> <iface>`
pub fn route_args(interface: &str, net: &NetworkConfig) -> Vec<String> {
    vec![
        "add".to_string(),
        "default".to_string(),
        "gw".to_string(),
        net.gateway.to_string(),
        interface.to_string(),
    ]
}

/// Whether `route add` failed only because the route is already there,
/// as happens when a reconnect hands out the same gateway.
fn route_exists(stderr: &str) -> bool {
    stderr.contains("File exists")
}

async fn run_tool(tool: &str, args: &[String]) -> Result<String, ModemError> {
    tracing::debug!(tool, args = ?args, "running");
    let output = Command::new(tool)
        .args(args)
        .output()
        .await
        .map_err(|e| ModemError::external(tool, e))?;

    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    if output.status.success() {
        Ok(stderr)
    } else if stderr.is_empty() {
        Err(ModemError::external(tool, output.status))
    } else {
        Err(ModemError::external(tool, format!("{}: {stderr}", output.status)))
    }
}

#[async_trait]
impl HostNetwork for SystemNetwork {
    async fn configure_interface(
        &self,
        interface: &str,
        net: &NetworkConfig,
    ) -> Result<(), ModemError> {
        run_tool("ifconfig", &ifconfig_args(interface, net)).await?;
        tracing::info!(interface, ip = %net.ip, gateway = %net.gateway, "interface configured");

        match run_tool("route", &route_args(interface, net)).await {
            Ok(_) => {}
            Err(ModemError::ExternalTool { reason, .. }) if route_exists(&reason) => {
                tracing::debug!(gateway = %net.gateway, "default route already present");
            }
            Err(e) => return Err(e),
        }
        tracing::info!(interface, gateway = %net.gateway, "default route set");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn net() -> NetworkConfig {
        NetworkConfig {
            ip: Ipv4Addr::new(10, 0, 0, 5),
            gateway: Ipv4Addr::new(192, 168, 8, 1),
            primary_dns: Ipv4Addr::new(8, 8, 8, 8),
            secondary_dns: Ipv4Addr::new(8, 8, 4, 4),
        }
    }

    #[test]
    fn ifconfig_is_point_to_point() {
        assert_eq!(
            ifconfig_args("wwan0", &net()),
            ["wwan0", "10.0.0.5", "pointopoint", "192.168.8.1"]
        );
    }

    #[test]
    fn route_goes_through_gateway() {
        assert_eq!(
            route_args("wwan0", &net()),
            ["add", "default", "gw", "192.168.8.1", "wwan0"]
        );
    }

    #[test]
    fn existing_route_is_recognised() {
        assert!(route_exists("exit status: 7: SIOCADDRT: File exists"));
        assert!(!route_exists("exit status: 7: SIOCADDRT: Network is unreachable"));
    }

    #[tokio::test]
    async fn missing_tool_is_external_error() {
        let err = run_tool("toby-agent-no-such-tool", &[]).await.unwrap_err();
        assert!(matches!(
            err,
            ModemError::ExternalTool { ref tool, .. } if tool == "toby-agent-no-such-tool"
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failing_tool_reports_status() {
        let err = run_tool("false", &[]).await.unwrap_err();
        assert!(err.to_string().starts_with("false failed: exit status: 1"), "{err}");
    }
}
