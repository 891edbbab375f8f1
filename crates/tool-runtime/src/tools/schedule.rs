use std::sync::Arc;

use async_trait::async_trait;
use hostgate_core::GatewayError;
use serde_json::{json, Value};

use crate::schedule::ScheduleManager;
use crate::tool::{ParamSpec, ParamType, Tool, ToolDefinition, ToolParams};

pub struct CreateScheduledTaskTool {
    schedule: Arc<ScheduleManager>,
}

impl CreateScheduledTaskTool {
    pub fn new(schedule: Arc<ScheduleManager>) -> Self {
        Self { schedule }
    }
}

#[async_trait]
impl Tool for CreateScheduledTaskTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(
            "create_scheduled_task",
            "Append an entry to the host crontab. Existing entries are preserved.",
            vec![
                ParamSpec::required("schedule", ParamType::String, "Cron schedule, e.g. '*/5 * * * *' or '@daily'"),
                ParamSpec::required("command", ParamType::String, "Command to run"),
            ],
        )
    }

    async fn execute(&self, params: ToolParams) -> Result<Value, GatewayError> {
        let entry = self
            .schedule
            .append_entry(params.str("schedule")?, params.str("command")?)
            .await?;
        Ok(json!({ "entry": entry.to_string() }))
    }
}
