//! Muster CLI - provision multi-node systems from the terminal
//!
//! Commands:
//! - `provision <file>`: provision a system description with the configured provider
//! - `graph <file>`: resolve the dependency graph without creating anything
//! - `providers`: list the registered providers

#![deny(unsafe_code)]

use std::ffi::OsString;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use muster_provisioner::ProviderRegistry;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub mod commands;
pub mod config;
pub mod error;
pub mod output;

pub use config::{LoggingConfig, MusterConfig};
pub use error::{CliError, CliResult};
use output::OutputFormat;

/// Muster CLI application
#[derive(Parser)]
#[command(name = "muster")]
#[command(
    about = "Muster - dependency-ordered provisioning of multi-node systems",
    long_about = None
)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "MUSTER_CONFIG")]
    config: Option<String>,

    /// Log level (overrides the configuration file)
    #[arg(long, env = "MUSTER_LOG_LEVEL")]
    log_level: Option<String>,

    /// Enable JSON logging
    #[arg(long)]
    json: bool,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
    output: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands
#[derive(Subcommand)]
enum Commands {
    /// Provision a system description (JSON or YAML)
    Provision {
        /// System description file
        file: PathBuf,

        /// Provider used when the system does not name one
        #[arg(short, long)]
        provider: Option<String>,

        /// Failed attempts tolerated before creation halts
        #[arg(long)]
        max_failures: Option<u32>,
    },

    /// Resolve and print a system's dependency graph
    Graph {
        /// System description file
        file: PathBuf,
    },

    /// List registered providers
    Providers,
}

/// Run using the current process arguments.
pub async fn run() -> CliResult<()> {
    run_with_args(std::env::args_os()).await
}

/// Run using the provided argument iterator.
pub async fn run_with_args<I, T>(args: I) -> CliResult<()>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli = Cli::parse_from(args);

    // Load config
    let mut config = MusterConfig::load(cli.config.as_deref())?;
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    config.logging.json |= cli.json;

    init_tracing(&config.logging);
    tracing::debug!(config = ?config, "Configuration loaded");

    match cli.command {
        Commands::Provision {
            file,
            provider,
            max_failures,
        } => {
            let mut provisioner = config.provisioner;
            if let Some(provider) = provider {
                provisioner.provider = provider;
            }
            if let Some(max_failures) = max_failures {
                provisioner.max_failures = max_failures;
            }
            provisioner
                .validate()
                .map_err(|e| CliError::Config(e.to_string()))?;
            commands::provision::execute(&file, &provisioner, cli.output).await
        }
        Commands::Graph { file } => {
            commands::graph::execute(&file, config.provisioner.parent_multiplier, cli.output)
        }
        Commands::Providers => commands::providers::execute(
            &ProviderRegistry::with_defaults(),
            &config.provisioner.provider,
            cli.output,
        ),
    }
}

fn init_tracing(logging: &LoggingConfig) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| logging.level.clone().into());

    if logging.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_provision_overrides() {
        let cli = Cli::parse_from([
            "muster",
            "--output",
            "json",
            "provision",
            "system.yaml",
            "--provider",
            "local",
            "--max-failures",
            "5",
        ]);
        assert_eq!(cli.output, OutputFormat::Json);
        match cli.command {
            Commands::Provision {
                file,
                provider,
                max_failures,
            } => {
                assert_eq!(file, PathBuf::from("system.yaml"));
                assert_eq!(provider.as_deref(), Some("local"));
                assert_eq!(max_failures, Some(5));
            }
            _ => panic!("expected provision command"),
        }
    }
}
