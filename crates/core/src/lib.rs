// Core of cliwrap: expose a command-line tool as configured tools and resources

pub mod config;
pub mod env;
pub mod error;
pub mod executor;
pub mod invoker;
pub mod template;

pub use config::{CliConfig, ConfigWarning, ParameterConfig, ResourceConfig, ToolConfig};
pub use error::{CoreError, CoreResult};
pub use executor::{ExecutionOutcome, FailureKind, DEFAULT_TIMEOUT};
pub use invoker::CliInvoker;
pub use template::{CommandTemplate, Parameters};
