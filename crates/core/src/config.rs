// Configuration document describing the wrapped CLI, its tools and resources

use crate::error::{CoreError, CoreResult};
use crate::executor::DEFAULT_TIMEOUT;
use crate::template::CommandTemplate;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Declaration of a single tool parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterConfig {
    /// Schema type tag (string, integer, boolean, ...)
    #[serde(rename = "type")]
    pub param_type: String,

    pub description: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,

    #[serde(default = "default_required")]
    pub required: bool,
}

fn default_required() -> bool {
    true
}

/// A named operation backed by a command template
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolConfig {
    pub name: String,

    pub description: String,

    #[serde(default)]
    pub parameters: IndexMap<String, ParameterConfig>,

    pub command_template: String,

    #[serde(default = "default_output_format")]
    pub output_format: Option<String>,

    /// Timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout: Option<u64>,
}

fn default_output_format() -> Option<String> {
    Some("text".to_string())
}

fn default_timeout_secs() -> Option<u64> {
    Some(DEFAULT_TIMEOUT.as_secs())
}

impl ToolConfig {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        command_template: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: IndexMap::new(),
            command_template: command_template.into(),
            output_format: default_output_format(),
            timeout: default_timeout_secs(),
        }
    }

    /// Effective timeout. Unset or zero falls back to the default.
    pub fn timeout(&self) -> Duration {
        self.timeout
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_TIMEOUT)
    }

    /// Names of required parameters, in declaration order
    pub fn required_parameters(&self) -> Vec<&str> {
        self.parameters
            .iter()
            .filter(|(_, p)| p.required)
            .map(|(name, _)| name.as_str())
            .collect()
    }
}

/// Read-only content exposed under a URI
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceConfig {
    pub uri: String,

    pub name: String,

    pub description: String,

    /// Literal command; no parameter substitution
    pub command: String,

    #[serde(default = "default_mime_type")]
    pub mime_type: Option<String>,
}

fn default_mime_type() -> Option<String> {
    Some("text/plain".to_string())
}

/// Top-level configuration for one wrapped CLI
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CliConfig {
    pub name: String,

    /// Base command of the wrapped CLI
    pub command: String,

    pub description: String,

    /// Extra environment for every command; values may be `${ENV:NAME}`
    #[serde(default)]
    pub environment: IndexMap<String, String>,

    #[serde(default)]
    pub tools: Vec<ToolConfig>,

    #[serde(default)]
    pub resources: Vec<ResourceConfig>,

    #[serde(default)]
    pub working_directory: Option<PathBuf>,
}

impl CliConfig {
    pub fn new(
        name: impl Into<String>,
        command: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            description: description.into(),
            environment: IndexMap::new(),
            tools: Vec::new(),
            resources: Vec::new(),
            working_directory: None,
        }
    }

    /// Load a configuration file. `.toml` files are parsed as TOML, anything
    /// else as JSON.
    pub fn from_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| CoreError::io(path, e))?;

        let is_toml = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));

        let config = if is_toml {
            Self::from_toml_str(&content)?
        } else {
            Self::from_json_str(&content)?
        };

        tracing::debug!(
            path = %path.display(),
            tools = config.tools.len(),
            resources = config.resources.len(),
            "Loaded configuration"
        );

        Ok(config)
    }

    pub fn from_json_str(content: &str) -> CoreResult<Self> {
        Ok(serde_json::from_str(content)?)
    }

    pub fn from_toml_str(content: &str) -> CoreResult<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Write the configuration as pretty-printed JSON
    pub fn to_file(&self, path: &Path) -> CoreResult<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| CoreError::io(parent, e))?;
        }

        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json).map_err(|e| CoreError::io(path, e))
    }

    /// Look up a tool by name
    pub fn tool(&self, name: &str) -> CoreResult<&ToolConfig> {
        self.tools
            .iter()
            .find(|t| t.name == name)
            .ok_or_else(|| CoreError::ToolNotFound(name.to_string()))
    }

    /// Look up a resource by URI
    pub fn resource(&self, uri: &str) -> CoreResult<&ResourceConfig> {
        self.resources
            .iter()
            .find(|r| r.uri == uri)
            .ok_or_else(|| CoreError::ResourceNotFound(uri.to_string()))
    }

    /// Directory commands run in: the configured one, else the current directory
    pub fn working_dir(&self) -> PathBuf {
        match &self.working_directory {
            Some(dir) => dir.clone(),
            None => std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }

    /// Check the document for structural errors.
    ///
    /// Duplicate tool names or resource URIs, and empty commands, are errors.
    /// Mismatches between template placeholders and declared parameters are
    /// returned as warnings only: rendering stays permissive about them.
    pub fn validate(&self) -> CoreResult<Vec<ConfigWarning>> {
        if self.name.trim().is_empty() {
            return Err(CoreError::Config("name must not be empty".to_string()));
        }

        let mut seen = HashSet::new();
        for tool in &self.tools {
            if !seen.insert(tool.name.as_str()) {
                return Err(CoreError::Config(format!("duplicate tool name '{}'", tool.name)));
            }
            if tool.command_template.trim().is_empty() {
                return Err(CoreError::Config(format!(
                    "tool '{}' has an empty command_template",
                    tool.name
                )));
            }
        }

        let mut seen = HashSet::new();
        for resource in &self.resources {
            if !seen.insert(resource.uri.as_str()) {
                return Err(CoreError::Config(format!(
                    "duplicate resource uri '{}'",
                    resource.uri
                )));
            }
            if resource.command.trim().is_empty() {
                return Err(CoreError::Config(format!(
                    "resource '{}' has an empty command",
                    resource.uri
                )));
            }
        }

        let mut warnings = Vec::new();
        for tool in &self.tools {
            let template = &tool.command_template;
            let conditionals = CommandTemplate::extract_conditionals(template);

            for name in CommandTemplate::extract_placeholders(template) {
                if !tool.parameters.contains_key(&name) {
                    warnings.push(ConfigWarning::UndeclaredPlaceholder {
                        tool: tool.name.clone(),
                        parameter: name,
                    });
                }
            }

            for name in &conditionals {
                if !tool.parameters.contains_key(name) {
                    warnings.push(ConfigWarning::UndeclaredConditional {
                        tool: tool.name.clone(),
                        parameter: name.clone(),
                    });
                }
            }

            for name in tool.required_parameters() {
                if !CommandTemplate::validate(template, [name]) && !conditionals.contains(name) {
                    warnings.push(ConfigWarning::UnreferencedParameter {
                        tool: tool.name.clone(),
                        parameter: name.to_string(),
                    });
                }
            }
        }

        Ok(warnings)
    }
}

/// Non-fatal finding from [`CliConfig::validate`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigWarning {
    /// `{name}` in the template has no parameter declaration
    UndeclaredPlaceholder { tool: String, parameter: String },
    /// `{#if name}` in the template has no parameter declaration
    UndeclaredConditional { tool: String, parameter: String },
    /// A required parameter is never used by the template
    UnreferencedParameter { tool: String, parameter: String },
}

impl fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UndeclaredPlaceholder { tool, parameter } => write!(
                f,
                "tool '{}': placeholder {{{}}} has no declared parameter",
                tool, parameter
            ),
            Self::UndeclaredConditional { tool, parameter } => write!(
                f,
                "tool '{}': conditional on '{}' has no declared parameter",
                tool, parameter
            ),
            Self::UnreferencedParameter { tool, parameter } => write!(
                f,
                "tool '{}': required parameter '{}' is not used by the template",
                tool, parameter
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn git_config() -> CliConfig {
        CliConfig::from_json_str(
            r#"{
                "name": "git-test",
                "command": "git",
                "description": "Git test",
                "environment": {"GIT_PAGER": "cat", "TOKEN": "${ENV:GH_TOKEN}"},
                "tools": [
                    {
                        "name": "status",
                        "description": "Git status",
                        "parameters": {},
                        "command_template": "git status"
                    },
                    {
                        "name": "commit",
                        "description": "Commit staged changes",
                        "parameters": {
                            "message": {"type": "string", "description": "Commit message"},
                            "amend": {"type": "boolean", "description": "Amend", "default": false, "required": false}
                        },
                        "command_template": "git commit -m '{message}'{#if amend} --amend{/if}",
                        "timeout": 5
                    }
                ],
                "resources": [
                    {"uri": "git://log", "name": "Log", "description": "Recent commits", "command": "git log -5"}
                ]
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn test_parameter_defaults() {
        let param: ParameterConfig =
            serde_json::from_str(r#"{"type": "string", "description": "Test parameter"}"#).unwrap();

        assert_eq!(param.param_type, "string");
        assert!(param.required);
        assert!(param.default.is_none());
    }

    #[test]
    fn test_tool_defaults() {
        let config = git_config();
        let status = config.tool("status").unwrap();

        assert_eq!(status.timeout, Some(30));
        assert_eq!(status.timeout(), Duration::from_secs(30));
        assert_eq!(status.output_format.as_deref(), Some("text"));
        assert_eq!(config.tool("commit").unwrap().timeout(), Duration::from_secs(5));
        assert_eq!(config.resources[0].mime_type.as_deref(), Some("text/plain"));
    }

    #[test]
    fn test_null_or_zero_timeout_falls_back() {
        let mut tool = ToolConfig::new("t", "d", "true");
        tool.timeout = None;
        assert_eq!(tool.timeout(), DEFAULT_TIMEOUT);
        tool.timeout = Some(0);
        assert_eq!(tool.timeout(), DEFAULT_TIMEOUT);
    }

    #[test]
    fn test_parameters_keep_declaration_order() {
        let config = git_config();
        let names: Vec<_> = config.tool("commit").unwrap().parameters.keys().cloned().collect();
        assert_eq!(names, vec!["message", "amend"]);
        assert_eq!(config.tool("commit").unwrap().required_parameters(), vec!["message"]);
    }

    #[test]
    fn test_empty_config() {
        let config = CliConfig::new("test-cli", "test", "Test CLI");
        assert!(config.tools.is_empty());
        assert!(config.resources.is_empty());
        assert!(config.validate().unwrap().is_empty());
    }

    #[test]
    fn test_lookup_not_found() {
        let config = git_config();

        let err = config.tool("push").unwrap_err();
        assert!(matches!(err, CoreError::ToolNotFound(ref n) if n == "push"));
        assert!(err.is_not_found());

        let err = config.resource("git://nope").unwrap_err();
        assert!(matches!(err, CoreError::ResourceNotFound(_)));
    }

    #[test]
    fn test_file_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("git.json");
        let config = git_config();

        config.to_file(&path).unwrap();
        let loaded = CliConfig::from_file(&path).unwrap();

        assert_eq!(loaded, config);
    }

    #[test]
    fn test_load_toml() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("echo.toml");
        std::fs::write(
            &path,
            r#"
name = "echo-cli"
command = "echo"
description = "Echo"
working_directory = "/tmp"

[[tools]]
name = "say"
description = "Say something"
command_template = "echo {message}"

[tools.parameters.message]
type = "string"
description = "Message"
"#,
        )
        .unwrap();

        let config = CliConfig::from_file(&path).unwrap();
        assert_eq!(config.tools[0].name, "say");
        assert_eq!(config.working_dir(), PathBuf::from("/tmp"));
    }

    #[test]
    fn test_missing_file_names_path() {
        let err = CliConfig::from_file(Path::new("/nonexistent/cfg.json")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/cfg.json"));
    }

    #[test]
    fn test_validate_rejects_duplicates() {
        let mut config = git_config();
        config.tools.push(ToolConfig::new("status", "again", "git status -s"));
        assert!(matches!(config.validate(), Err(CoreError::Config(_))));

        let mut config = git_config();
        let dup = config.resources[0].clone();
        config.resources.push(dup);
        assert!(matches!(config.validate(), Err(CoreError::Config(_))));
    }

    #[test]
    fn test_validate_warnings() {
        let mut config = git_config();
        assert!(config.validate().unwrap().is_empty());

        let mut tool = ToolConfig::new("grep", "Search", "grep {pattern} {path}{#if icase} -i{/if}");
        tool.parameters.insert(
            "pattern".to_string(),
            ParameterConfig {
                param_type: "string".to_string(),
                description: "Pattern".to_string(),
                default: None,
                required: true,
            },
        );
        tool.parameters.insert(
            "unused".to_string(),
            ParameterConfig {
                param_type: "string".to_string(),
                description: "Unused".to_string(),
                default: None,
                required: true,
            },
        );
        config.tools.push(tool);

        let warnings = config.validate().unwrap();
        assert_eq!(
            warnings,
            vec![
                ConfigWarning::UndeclaredPlaceholder {
                    tool: "grep".to_string(),
                    parameter: "path".to_string()
                },
                ConfigWarning::UndeclaredConditional {
                    tool: "grep".to_string(),
                    parameter: "icase".to_string()
                },
                ConfigWarning::UnreferencedParameter {
                    tool: "grep".to_string(),
                    parameter: "unused".to_string()
                },
            ]
        );
    }
}
