//! Host telemetry tools.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hostgate_core::GatewayError;
use serde_json::{json, Value};

use super::to_json;
use crate::system::SystemInfoProbe;
use crate::tool::{ParamSpec, ParamType, Tool, ToolDefinition, ToolParams};

pub struct CpuUsageTool {
    probe: Arc<SystemInfoProbe>,
}

impl CpuUsageTool {
    pub fn new(probe: Arc<SystemInfoProbe>) -> Self {
        Self { probe }
    }
}

#[async_trait]
impl Tool for CpuUsageTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(
            "get_cpu_usage",
            "Current CPU utilisation in percent, sampled over a short interval.",
            vec![ParamSpec::optional(
                "interval_ms",
                ParamType::Integer,
                "Sampling interval in milliseconds (default from config, 200 to 10000)",
            )],
        )
    }

    async fn execute(&self, params: ToolParams) -> Result<Value, GatewayError> {
        let interval = match params.opt_i64("interval_ms")? {
            Some(ms) if ms < 1 => {
                return Err(GatewayError::validation("parameter 'interval_ms' must be positive"))
            }
            Some(ms) => Some(Duration::from_millis(ms as u64)),
            None => None,
        };
        let usage = self.probe.cpu_percent(interval).await?;
        Ok(json!({ "usage_percent": usage }))
    }
}

pub struct MemoryUsageTool {
    probe: Arc<SystemInfoProbe>,
}

impl MemoryUsageTool {
    pub fn new(probe: Arc<SystemInfoProbe>) -> Self {
        Self { probe }
    }
}

#[async_trait]
impl Tool for MemoryUsageTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(
            "get_memory_usage",
            "Total, used and available memory in bytes plus percent used.",
            vec![],
        )
    }

    async fn execute(&self, _params: ToolParams) -> Result<Value, GatewayError> {
        to_json(&self.probe.memory_stats().await?)
    }
}
