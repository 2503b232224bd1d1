// Tools backed by configured command templates

use crate::protocol::{CallToolResult, ToolSchema};
use crate::tools::{json_schema_object, json_schema_parameter, Tool};
use anyhow::{bail, Result};
use cliwrap_core::{CliInvoker, ExecutionOutcome, Parameters, ToolConfig};
use std::sync::Arc;

/// Exposes one configured tool over MCP
pub struct CommandTool {
    invoker: Arc<CliInvoker>,
    tool: ToolConfig,
}

impl CommandTool {
    pub fn new(invoker: Arc<CliInvoker>, tool: ToolConfig) -> Self {
        Self { invoker, tool }
    }

    /// One `CommandTool` per tool in the invoker's configuration
    pub fn from_config(invoker: &Arc<CliInvoker>) -> Vec<Self> {
        invoker
            .config()
            .tools
            .iter()
            .map(|tool| Self::new(invoker.clone(), tool.clone()))
            .collect()
    }
}

#[async_trait::async_trait]
impl Tool for CommandTool {
    fn schema(&self) -> ToolSchema {
        let properties: serde_json::Map<String, serde_json::Value> = self
            .tool
            .parameters
            .iter()
            .map(|(name, param)| (name.clone(), json_schema_parameter(param)))
            .collect();

        ToolSchema {
            name: self.tool.name.clone(),
            description: self.tool.description.clone(),
            input_schema: json_schema_object(
                serde_json::Value::Object(properties),
                self.tool.required_parameters(),
            ),
        }
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<CallToolResult> {
        let parameters: Parameters = match arguments {
            serde_json::Value::Object(map) => map,
            serde_json::Value::Null => Parameters::new(),
            other => bail!("Invalid arguments for {}: expected an object, got {}", self.tool.name, other),
        };

        let outcome = self.invoker.call_tool(&self.tool.name, &parameters).await?;
        Ok(format_outcome(&outcome))
    }
}

/// Turn an execution outcome into tool-call content.
///
/// Completed runs return stdout, with stderr appended under a `Stderr:` header
/// when present. Failed runs return `Error: <cause>` flagged as an error.
pub fn format_outcome(outcome: &ExecutionOutcome) -> CallToolResult {
    if outcome.success {
        let mut content = outcome.output.clone();
        if !outcome.error.is_empty() {
            content.push_str("\n\nStderr:\n");
            content.push_str(&outcome.error);
        }
        CallToolResult::text(content)
    } else {
        CallToolResult::error(&outcome.error)
    }
}
