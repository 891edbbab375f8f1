//! Host network mutations through fixed argv templates.
//!
//! Only validated tokens (IP literal, interface, port, protocol) are
//! substituted and they are passed as discrete arguments, never through a
//! shell. Mutations of the live rule table are serialised process-wide.

use std::net::IpAddr;
use std::str::FromStr;

use hostgate_core::config::NetworkConfig;
use hostgate_core::GatewayError;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::executor::{CommandExecutor, CommandOutput, CommandSpec};

pub const PROTOCOLS: &[&str] = &["tcp", "udp", "sctp", "udplite"];
pub const MAX_PING_COUNT: i64 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FirewallAction {
    Add,
    Remove,
}

impl FirewallAction {
    fn iptables_flag(&self) -> &'static str {
        match self {
            FirewallAction::Add => "-A",
            FirewallAction::Remove => "-D",
        }
    }
}

impl FromStr for FirewallAction {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "add" => Ok(FirewallAction::Add),
            "remove" => Ok(FirewallAction::Remove),
            other => Err(GatewayError::validation(format!(
                "parameter 'action' must be 'add' or 'remove', got '{other}'"
            ))),
        }
    }
}

/// A validated accept rule. Not tracked after it is applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NetworkRule {
    pub action: FirewallAction,
    pub port: u16,
    pub protocol: String,
}

impl NetworkRule {
    pub fn parse(action: &str, port: i64, protocol: &str) -> Result<Self, GatewayError> {
        let action = action.parse()?;
        let port = u16::try_from(port)
            .ok()
            .filter(|p| *p >= 1)
            .ok_or_else(|| GatewayError::validation("parameter 'port' must be between 1 and 65535"))?;
        let protocol = protocol.trim().to_ascii_lowercase();
        if !PROTOCOLS.contains(&protocol.as_str()) {
            return Err(GatewayError::validation(format!(
                "parameter 'protocol' must be one of {}",
                PROTOCOLS.join(", ")
            )));
        }
        Ok(Self {
            action,
            port,
            protocol,
        })
    }

    fn argv(&self) -> Vec<String> {
        vec![
            self.action.iptables_flag().to_string(),
            "INPUT".to_string(),
            "-p".to_string(),
            self.protocol.clone(),
            "--dport".to_string(),
            self.port.to_string(),
            "-j".to_string(),
            "ACCEPT".to_string(),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MutationOutcome {
    pub ok: bool,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PingOutcome {
    pub ok: bool,
    pub output: String,
}

pub struct NetworkMutator {
    executor: CommandExecutor,
    tools: NetworkConfig,
    lock: Mutex<()>,
}

impl NetworkMutator {
    pub fn new(executor: CommandExecutor, tools: NetworkConfig) -> Self {
        Self {
            executor,
            tools,
            lock: Mutex::new(()),
        }
    }

    /// `ip addr add <ip> dev <interface>`.
    pub async fn add_virtual_ip(&self, ip: &str, interface: &str) -> Result<MutationOutcome, GatewayError> {
        let ip = validate_ip_with_prefix(ip)?;
        validate_interface(interface)?;
        let spec = CommandSpec::argv(
            self.tools.ip_bin.as_str(),
            ["addr", "add", ip.as_str(), "dev", interface],
        );

        let _guard = self.lock.lock().await;
        let output = self.executor.run(&spec, None).await?;
        let message = format!("Virtual IP {ip} added to {interface}");
        self.mutation_result(output, message, "ip addr add")
    }

    /// `iptables -A|-D INPUT -p <proto> --dport <port> -j ACCEPT`.
    pub async fn firewall_rule(&self, rule: &NetworkRule) -> Result<MutationOutcome, GatewayError> {
        let spec = CommandSpec::argv(self.tools.iptables_bin.as_str(), rule.argv());
        let verb = match rule.action {
            FirewallAction::Add => "added",
            FirewallAction::Remove => "removed",
        };

        let _guard = self.lock.lock().await;
        let output = self.executor.run(&spec, None).await?;
        let message = format!("Firewall rule {verb} for {}/{}", rule.port, rule.protocol);
        self.mutation_result(output, message, "iptables")
    }

    /// `ping -c <count> <target>`. Unreachable targets are `ok: false`, not errors.
    pub async fn ping(&self, target: &str, count: i64) -> Result<PingOutcome, GatewayError> {
        validate_target(target)?;
        if !(1..=MAX_PING_COUNT).contains(&count) {
            return Err(GatewayError::validation(format!(
                "parameter 'count' must be between 1 and {MAX_PING_COUNT}"
            )));
        }
        let count = count.to_string();
        let spec = CommandSpec::argv(self.tools.ping_bin.as_str(), ["-c", count.as_str(), target]);
        let output = self.executor.run(&spec, None).await?;
        if output.timed_out {
            return Err(GatewayError::timeout(format!(
                "ping {target} did not finish within {}s",
                self.executor.default_timeout().as_secs()
            )));
        }
        let ok = output.success();
        let text = if ok || output.stderr.trim().is_empty() {
            output.stdout
        } else {
            format!("{}{}", output.stdout, output.stderr)
        };
        Ok(PingOutcome { ok, output: text })
    }

    fn mutation_result(
        &self,
        output: CommandOutput,
        message: String,
        tool: &str,
    ) -> Result<MutationOutcome, GatewayError> {
        if output.timed_out {
            return Err(GatewayError::timeout(format!("{tool} did not finish in time")));
        }
        if !output.success() {
            let detail = output.failure_message(&format!("exit code {}", output.exit_code));
            warn!(tool, exit_code = output.exit_code, "network mutation rejected");
            return Err(GatewayError::upstream(format!("{tool} failed: {detail}")));
        }
        info!(tool, "{message}");
        Ok(MutationOutcome { ok: true, message })
    }
}

/// IPv4/IPv6 literal with an optional `/prefix`. Returns the canonical form.
pub fn validate_ip_with_prefix(raw: &str) -> Result<String, GatewayError> {
    let invalid = || GatewayError::validation(format!("parameter 'ip' is not a valid IP address: '{raw}'"));
    let (addr, prefix) = match raw.split_once('/') {
        Some((a, p)) => (a, Some(p)),
        None => (raw, None),
    };
    let addr: IpAddr = addr.parse().map_err(|_| invalid())?;
    match prefix {
        None => Ok(addr.to_string()),
        Some(p) => {
            let max = if addr.is_ipv4() { 32 } else { 128 };
            let bits: u8 = p.parse().map_err(|_| invalid())?;
            if bits > max || p.starts_with('+') {
                return Err(invalid());
            }
            Ok(format!("{addr}/{bits}"))
        }
    }
}

/// Linux interface names: 1-15 chars from `[A-Za-z0-9_.:@-]`, no leading dash.
pub fn validate_interface(name: &str) -> Result<(), GatewayError> {
    let ok = (1..=15).contains(&name.len())
        && !name.starts_with('-')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | ':' | '@' | '-'));
    if ok {
        Ok(())
    } else {
        Err(GatewayError::validation(format!("parameter 'interface' is not a valid interface name: '{name}'")))
    }
}

/// Hostname or IP literal; never something ping would read as an option.
pub fn validate_target(target: &str) -> Result<(), GatewayError> {
    if target.parse::<IpAddr>().is_ok() {
        return Ok(());
    }
    let ok = !target.is_empty()
        && target.len() <= 253
        && !target.starts_with('-')
        && target
            .split('.')
            .all(|label| !label.is_empty() && label.len() <= 63 && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-'));
    if ok {
        Ok(())
    } else {
        Err(GatewayError::validation(format!("parameter 'target' is not a valid host: '{target}'")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hostgate_core::ErrorKind;
    use std::time::Duration;

    fn mutator(ip_bin: &str, iptables_bin: &str, ping_bin: &str) -> NetworkMutator {
        NetworkMutator::new(
            CommandExecutor::new(Duration::from_secs(5), Duration::from_secs(5), 4096),
            NetworkConfig {
                ip_bin: ip_bin.to_string(),
                iptables_bin: iptables_bin.to_string(),
                ping_bin: ping_bin.to_string(),
            },
        )
    }

    #[test]
    fn test_rule_parsing() {
        let rule = NetworkRule::parse("ADD", 8080, "TCP").unwrap();
        assert_eq!(rule.action, FirewallAction::Add);
        assert_eq!(rule.protocol, "tcp");
        assert_eq!(
            rule.argv(),
            vec!["-A", "INPUT", "-p", "tcp", "--dport", "8080", "-j", "ACCEPT"]
        );

        assert!(NetworkRule::parse("drop", 80, "tcp").is_err());
        assert!(NetworkRule::parse("add", 0, "tcp").is_err());
        assert!(NetworkRule::parse("add", 70000, "tcp").is_err());
        let err = NetworkRule::parse("add", 80, "tcp; rm -rf /").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn test_ip_validation() {
        assert_eq!(validate_ip_with_prefix("192.168.1.50/24").unwrap(), "192.168.1.50/24");
        assert_eq!(validate_ip_with_prefix("fe80::1").unwrap(), "fe80::1");
        assert!(validate_ip_with_prefix("10.0.0.1/33").is_err());
        assert!(validate_ip_with_prefix("10.0.0.1; reboot").is_err());
        assert!(validate_ip_with_prefix("not-an-ip").is_err());
    }

    #[test]
    fn test_interface_and_target_validation() {
        assert!(validate_interface("eth0").is_ok());
        assert!(validate_interface("br-lan.10").is_ok());
        assert!(validate_interface("").is_err());
        assert!(validate_interface("-eth0").is_err());
        assert!(validate_interface("averyveryverylongif").is_err());

        assert!(validate_target("8.8.8.8").is_ok());
        assert!(validate_target("example.com").is_ok());
        assert!(validate_target("-f").is_err());
        assert!(validate_target("a b").is_err());
    }

    #[tokio::test]
    async fn test_firewall_add_then_remove_both_ok() {
        let net = mutator("true", "true", "true");
        let add = NetworkRule::parse("add", 8080, "tcp").unwrap();
        let remove = NetworkRule::parse("remove", 8080, "tcp").unwrap();
        assert!(net.firewall_rule(&add).await.unwrap().ok);
        let out = net.firewall_rule(&remove).await.unwrap();
        assert!(out.ok);
        assert!(out.message.contains("removed"));
    }

    #[tokio::test]
    async fn test_tool_rejection_is_upstream() {
        let net = mutator("false", "false", "true");
        let rule = NetworkRule::parse("add", 22, "tcp").unwrap();
        assert_eq!(net.firewall_rule(&rule).await.unwrap_err().kind(), ErrorKind::Upstream);
        let err = net.add_virtual_ip("10.0.0.5", "eth0").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Upstream);
    }

    #[tokio::test]
    async fn test_virtual_ip_success() {
        let net = mutator("true", "true", "true");
        let out = net.add_virtual_ip("10.0.0.5/24", "eth0").await.unwrap();
        assert!(out.ok);
        assert!(out.message.contains("10.0.0.5/24"));
    }

    #[tokio::test]
    async fn test_ping_passes_argv_and_reports_failure_as_data() {
        let net = mutator("true", "true", "echo");
        let out = net.ping("localhost", 2).await.unwrap();
        assert!(out.ok);
        assert_eq!(out.output.trim(), "-c 2 localhost");

        let net = mutator("true", "true", "false");
        assert!(!net.ping("localhost", 1).await.unwrap().ok);

        assert_eq!(net.ping("localhost", 0).await.unwrap_err().kind(), ErrorKind::Validation);
        assert_eq!(net.ping("localhost", 21).await.unwrap_err().kind(), ErrorKind::Validation);
    }
}
