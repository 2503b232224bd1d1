// Tool invocation and resource fetching on top of the executor

use crate::config::{CliConfig, ResourceConfig, ToolConfig};
use crate::env::{self, AmbientEnv};
use crate::error::CoreResult;
use crate::executor::{self, ExecutionOutcome, DEFAULT_TIMEOUT};
use crate::template::{CommandTemplate, Parameters};
use std::sync::Arc;

/// Runs tools and resources declared by a [`CliConfig`].
///
/// The configuration and the ambient environment snapshot are read-only, so a
/// single invoker can serve any number of concurrent calls. Each call spawns
/// exactly one child process.
#[derive(Debug, Clone)]
pub struct CliInvoker {
    config: Arc<CliConfig>,
    ambient: Arc<AmbientEnv>,
}

impl CliInvoker {
    /// Create an invoker using the current process environment as ambient
    pub fn new(config: Arc<CliConfig>) -> Self {
        Self::with_ambient(config, env::ambient_environment())
    }

    /// Create an invoker with an explicit ambient environment
    pub fn with_ambient(config: Arc<CliConfig>, ambient: AmbientEnv) -> Self {
        Self {
            config,
            ambient: Arc::new(ambient),
        }
    }

    pub fn config(&self) -> &CliConfig {
        &self.config
    }

    /// Look up a tool by name and run it
    pub async fn call_tool(&self, name: &str, parameters: &Parameters) -> CoreResult<ExecutionOutcome> {
        let tool = self.config.tool(name)?;
        Ok(self.invoke(tool, parameters).await)
    }

    /// Render and run a tool's command template
    pub async fn invoke(&self, tool: &ToolConfig, parameters: &Parameters) -> ExecutionOutcome {
        let command = CommandTemplate::render(&tool.command_template, parameters);
        tracing::info!(tool = %tool.name, command = %command, "Invoking tool");

        let outcome = executor::run(
            &command,
            &self.config.working_dir(),
            &self.child_environment(),
            tool.timeout(),
        )
        .await;

        tracing::debug!(
            tool = %tool.name,
            success = outcome.success,
            exit_code = outcome.exit_code,
            "Tool finished"
        );
        outcome
    }

    /// Look up a resource by URI and fetch its content
    pub async fn read_resource(&self, uri: &str) -> CoreResult<String> {
        let resource = self.config.resource(uri)?;
        Ok(self.fetch(resource).await)
    }

    /// Run a resource command and return its stdout.
    ///
    /// Execution failures are returned inline as
    /// `Error retrieving resource: <cause>` rather than as an error. Stderr is
    /// discarded.
    pub async fn fetch(&self, resource: &ResourceConfig) -> String {
        tracing::info!(uri = %resource.uri, "Reading resource");

        let outcome = executor::run(
            &resource.command,
            &self.config.working_dir(),
            &self.child_environment(),
            DEFAULT_TIMEOUT,
        )
        .await;

        if outcome.success {
            outcome.output
        } else {
            tracing::warn!(uri = %resource.uri, error = %outcome.error, "Resource command failed");
            format!("Error retrieving resource: {}", outcome.error)
        }
    }

    /// Ambient environment overlaid with the resolved declared environment
    fn child_environment(&self) -> AmbientEnv {
        let resolved = env::resolve(&self.config.environment, &self.ambient);
        env::merge(&self.ambient, &resolved)
    }
}
