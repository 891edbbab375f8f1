//! Free-form host command execution.
//!
//! High privilege. In `Open` mode the command string runs through
//! `/bin/sh -c`; in `Allowlist` mode it names a template and nothing the
//! caller sends ever reaches a shell.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hostgate_core::GatewayError;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::allowlist::CommandAllowlist;
use crate::executor::{CommandExecutor, CommandSpec};
use crate::tool::{ParamSpec, ParamType, Tool, ToolDefinition, ToolParams};

#[derive(Debug, Clone)]
pub enum CommandPolicy {
    Open,
    Allowlist(CommandAllowlist),
}

pub struct ExecuteSystemCommandTool {
    executor: Arc<CommandExecutor>,
    policy: CommandPolicy,
}

impl ExecuteSystemCommandTool {
    pub fn new(executor: Arc<CommandExecutor>, policy: CommandPolicy) -> Self {
        Self { executor, policy }
    }

    fn spec_for(&self, command: &str, params: &ToolParams) -> Result<CommandSpec, GatewayError> {
        match &self.policy {
            CommandPolicy::Open => Ok(CommandSpec::shell(command)),
            CommandPolicy::Allowlist(list) => list.render(command.trim(), params.opt_object("args")?),
        }
    }
}

#[async_trait]
impl Tool for ExecuteSystemCommandTool {
    fn definition(&self) -> ToolDefinition {
        let (description, command_help) = match &self.policy {
            CommandPolicy::Open => (
                "Run a shell command on the host (HIGH PRIVILEGE). Returns trimmed stdout, or error/return_code/output on non-zero exit.".to_string(),
                "Shell command line, e.g. 'df -h'".to_string(),
            ),
            CommandPolicy::Allowlist(list) => (
                format!(
                    "Run a named, pre-approved host command. Allowed: {}.",
                    list.names().collect::<Vec<_>>().join(", ")
                ),
                "Name of an allowlisted command".to_string(),
            ),
        };
        ToolDefinition {
            name: "execute_system_command".to_string(),
            description,
            params: vec![
                ParamSpec::required("command", ParamType::String, &command_help),
                ParamSpec::optional(
                    "timeout_secs",
                    ParamType::Integer,
                    "Timeout in seconds (default 30, capped by config)",
                ),
                ParamSpec::optional(
                    "args",
                    ParamType::Object,
                    "Placeholder values for allowlisted templates",
                ),
            ],
        }
    }

    async fn execute(&self, params: ToolParams) -> Result<Value, GatewayError> {
        let command = params.str("command")?;
        if command.trim().is_empty() {
            return Err(GatewayError::validation("parameter 'command' must not be empty"));
        }
        let timeout = match params.opt_i64("timeout_secs")? {
            Some(secs) if secs < 1 => {
                return Err(GatewayError::validation("parameter 'timeout_secs' must be positive"))
            }
            Some(secs) => Some(Duration::from_secs(secs as u64)),
            None => None,
        };
        let spec = self.spec_for(command, &params)?;
        let limit = self.executor.effective_timeout(timeout);

        debug!(program = spec.program(), timeout_secs = limit.as_secs(), "executing system command");
        let output = self.executor.run(&spec, Some(limit)).await?;

        if output.timed_out {
            warn!(timeout_secs = limit.as_secs(), "system command timed out");
            return Err(GatewayError::timeout(format!(
                "command timed out after {}s",
                limit.as_secs()
            )));
        }

        let mut result = if output.exit_code == 0 {
            json!({ "output": output.stdout.trim() })
        } else {
            debug!(exit_code = output.exit_code, "command returned non-zero exit code");
            json!({
                "error": output.stderr.trim(),
                "return_code": output.exit_code,
                "output": output.stdout.trim(),
            })
        };
        if output.truncated() {
            result["truncated"] = Value::Bool(true);
        }
        Ok(result)
    }
}
