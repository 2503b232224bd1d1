//! Error types for configuration loading and descriptor lookup.
//!
//! Process execution failures are not errors here: they are reported as
//! [`ExecutionOutcome`](crate::executor::ExecutionOutcome) values.

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors raised by the core.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// No tool with the given name is declared.
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    /// No resource with the given URI is declared.
    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    /// The configuration document is structurally invalid.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Reading or writing a configuration file failed.
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// JSON (de)serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML deserialization error.
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl CoreError {
    /// Whether this is one of the two lookup failures.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::ToolNotFound(_) | Self::ResourceNotFound(_))
    }

    pub(crate) fn io(path: &std::path::Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.display().to_string(),
            source,
        }
    }
}
