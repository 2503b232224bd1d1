use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use cliwrap_core::{CliConfig, CliInvoker, ConfigWarning};
use cliwrap_mcp::McpServer;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "cliwrap", version)]
#[command(about = "Expose any command-line tool as an MCP server", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,

    /// Logging level (RUST_LOG takes precedence)
    #[arg(long, global = true, value_enum, ignore_case = true, default_value_t = LogLevel::Info)]
    log_level: LogLevel,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the MCP server on stdin/stdout
    Serve {
        /// Path to configuration file
        #[arg(short, long, env = "CLIWRAP_CONFIG")]
        config: PathBuf,
    },

    /// Write a starter configuration file
    Init {
        /// Name of the wrapped CLI
        name: String,

        /// Base CLI command
        #[arg(short, long)]
        command: String,

        /// CLI tool description
        #[arg(short, long, default_value = "")]
        description: String,

        /// Output configuration file path
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Validate a configuration file and list what it exposes
    Check {
        /// Path to configuration file
        #[arg(short, long, env = "CLIWRAP_CONFIG")]
        config: PathBuf,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl LogLevel {
    fn as_filter(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warning => "warn",
            Self::Error => "error",
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Logs go to stderr; stdout carries protocol traffic
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| args.log_level.as_filter().into()),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    match args.command {
        Commands::Serve { config } => serve(&config).await,
        Commands::Init {
            name,
            command,
            description,
            output,
        } => init(name, command, description, &output),
        Commands::Check { config } => check(&config),
    }
}

async fn serve(config_path: &Path) -> Result<()> {
    tracing::info!("Loading configuration from {}", config_path.display());
    let (config, _) = load_config(config_path)?;

    let invoker = Arc::new(CliInvoker::new(Arc::new(config)));
    let server = Arc::new(McpServer::new(invoker));
    server.start().await
}

fn init(name: String, command: String, description: String, output: &Path) -> Result<()> {
    let config = starter_config(name, command, description);
    config
        .to_file(output)
        .with_context(|| format!("Failed to write configuration to {}", output.display()))?;

    println!("Configuration created at: {}", output.display());
    println!("\nNext steps:");
    println!("1. Edit the configuration to add tools and resources");
    println!("2. Start the server: cliwrap serve --config {}", output.display());
    Ok(())
}

fn check(config_path: &Path) -> Result<()> {
    let (config, warnings) = load_config(config_path)?;
    print!("{}", check_report(&config, &warnings));
    Ok(())
}

/// Summary printed by `check`
fn check_report(config: &CliConfig, warnings: &[ConfigWarning]) -> String {
    let mut report = format!("{}: {}\n", config.name, config.description);
    report.push_str(&format!("Working directory: {}\n", config.working_dir().display()));

    report.push_str(&format!("\nTools ({}):\n", config.tools.len()));
    for tool in &config.tools {
        report.push_str(&format!(
            "  {} (timeout {}s): {}\n",
            tool.name,
            tool.timeout().as_secs(),
            tool.command_template
        ));
    }

    report.push_str(&format!("\nResources ({}):\n", config.resources.len()));
    for resource in &config.resources {
        report.push_str(&format!("  {}: {}\n", resource.uri, resource.command));
    }

    if !warnings.is_empty() {
        report.push_str(&format!("\nWarnings ({}):\n", warnings.len()));
        for warning in warnings {
            report.push_str(&format!("  {}\n", warning));
        }
    }

    report
}

/// Load and validate a configuration, logging any warnings
fn load_config(path: &Path) -> Result<(CliConfig, Vec<ConfigWarning>)> {
    let config = CliConfig::from_file(path)
        .with_context(|| format!("Failed to load configuration from {}", path.display()))?;

    let warnings = config
        .validate()
        .with_context(|| format!("Invalid configuration in {}", path.display()))?;
    for warning in &warnings {
        tracing::warn!("{}", warning);
    }

    Ok((config, warnings))
}

fn starter_config(name: String, command: String, description: String) -> CliConfig {
    let description = if description.is_empty() {
        format!("{} as MCP server", name)
    } else {
        description
    };
    CliConfig::new(name, command, description)
}
