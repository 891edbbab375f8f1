use std::sync::Arc;

use async_trait::async_trait;
use hostgate_core::GatewayError;
use serde_json::Value;

use super::to_json;
use crate::network::{NetworkMutator, NetworkRule};
use crate::tool::{ParamSpec, ParamType, Tool, ToolDefinition, ToolParams};

pub const DEFAULT_PING_TARGET: &str = "8.8.8.8";
pub const DEFAULT_PING_COUNT: i64 = 4;
pub const DEFAULT_INTERFACE: &str = "eth0";

pub struct NetworkTestTool {
    network: Arc<NetworkMutator>,
}

impl NetworkTestTool {
    pub fn new(network: Arc<NetworkMutator>) -> Self {
        Self { network }
    }
}

#[async_trait]
impl Tool for NetworkTestTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(
            "network_test",
            "Ping a host and return the raw output.",
            vec![
                ParamSpec::optional("target", ParamType::String, "Host or IP (default 8.8.8.8)"),
                ParamSpec::optional("count", ParamType::Integer, "Echo requests to send, 1-20 (default 4)"),
            ],
        )
    }

    async fn execute(&self, params: ToolParams) -> Result<Value, GatewayError> {
        let target = params.str_or("target", DEFAULT_PING_TARGET)?;
        let count = params.i64_or("count", DEFAULT_PING_COUNT)?;
        to_json(&self.network.ping(target, count).await?)
    }
}

pub struct CreateVirtualIpTool {
    network: Arc<NetworkMutator>,
}

impl CreateVirtualIpTool {
    pub fn new(network: Arc<NetworkMutator>) -> Self {
        Self { network }
    }
}

#[async_trait]
impl Tool for CreateVirtualIpTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(
            "create_virtual_ip",
            "Assign an additional IP address to a network interface.",
            vec![
                ParamSpec::required("ip", ParamType::String, "Address, optionally with /prefix"),
                ParamSpec::optional("interface", ParamType::String, "Interface name (default eth0)"),
            ],
        )
    }

    async fn execute(&self, params: ToolParams) -> Result<Value, GatewayError> {
        let ip = params.str("ip")?;
        let interface = params.str_or("interface", DEFAULT_INTERFACE)?;
        to_json(&self.network.add_virtual_ip(ip, interface).await?)
    }
}

pub struct FirewallRuleTool {
    network: Arc<NetworkMutator>,
}

impl FirewallRuleTool {
    pub fn new(network: Arc<NetworkMutator>) -> Self {
        Self { network }
    }
}

#[async_trait]
impl Tool for FirewallRuleTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(
            "firewall_rule",
            "Add or remove an INPUT accept rule for a port.",
            vec![
                ParamSpec::required("action", ParamType::String, "'add' or 'remove'"),
                ParamSpec::required("port", ParamType::Integer, "Port, 1-65535"),
                ParamSpec::optional("protocol", ParamType::String, "tcp, udp, sctp or udplite (default tcp)"),
            ],
        )
    }

    async fn execute(&self, params: ToolParams) -> Result<Value, GatewayError> {
        let rule = NetworkRule::parse(
            params.str("action")?,
            params.i64("port")?,
            params.str_or("protocol", "tcp")?,
        )?;
        to_json(&self.network.firewall_rule(&rule).await?)
    }
}
