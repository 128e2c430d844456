//! CLI commands implementation.
//!
//! This module contains the CLI parser and dispatches to command-specific modules.

mod admin;
mod health;
mod helpers;
mod init;
mod providers;
mod serve;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::{load_settings_with_options, LoadOptions};

#[derive(Parser)]
#[command(name = "khobor")]
#[command(about = "News aggregation backend: publish state and AI provider health")]
#[command(version)]
pub struct Cli {
    /// Target directory or database file (overrides config file).
    /// Can be a directory containing khobor.db or a .db file directly.
    #[arg(long, short = 't', global = true)]
    target: Option<PathBuf>,

    /// Config file path (overrides auto-discovery)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Resolve relative paths from current working directory instead of config file location
    #[arg(long, global = true)]
    cwd: bool,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the data directory and database
    Init,

    /// Start the HTTP API
    Serve {
        /// Address to bind (port, host, or host:port)
        bind: Option<String>,
    },

    /// Manage the admin registry
    Admin {
        #[command(subcommand)]
        command: AdminCommands,
    },

    /// Run one AI provider health check and print the report as JSON
    HealthCheck,

    /// Show AI providers (API keys masked)
    Providers {
        #[command(subcommand)]
        command: Option<ProviderCommands>,
    },
}

#[derive(Subcommand)]
enum AdminCommands {
    /// Grant admin rights to an email address
    Add {
        email: String,
        /// Who granted the rights (recorded on the entry)
        #[arg(long)]
        by: Option<String>,
    },
    /// Revoke admin rights
    Remove { email: String },
    /// List admins
    List,
}

#[derive(Subcommand)]
enum ProviderCommands {
    /// List providers in priority order
    List,
    /// Test one provider now and record the result
    Test { id: String },
}

/// Parse arguments, load settings, and run the chosen command.
pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let options = LoadOptions {
        config_path: cli.config,
        use_cwd: cli.cwd,
        data: cli.target,
    };
    let (settings, _config) = load_settings_with_options(options).await;

    match cli.command {
        Commands::Init => init::cmd_init(&settings).await,
        Commands::Serve { bind } => {
            let bind = bind.unwrap_or_else(|| settings.bind.clone());
            serve::cmd_serve(&settings, &bind).await
        }
        Commands::Admin { command } => match command {
            AdminCommands::Add { email, by } => {
                admin::cmd_admin_add(&settings, &email, by.as_deref()).await
            }
            AdminCommands::Remove { email } => admin::cmd_admin_remove(&settings, &email).await,
            AdminCommands::List => admin::cmd_admin_list(&settings).await,
        },
        Commands::HealthCheck => health::cmd_health_check(&settings).await,
        Commands::Providers { command } => match command.unwrap_or(ProviderCommands::List) {
            ProviderCommands::List => providers::cmd_providers_list(&settings).await,
            ProviderCommands::Test { id } => providers::cmd_providers_test(&settings, &id).await,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["khobor", "serve", "0.0.0.0:8080", "-v", "--target", "/srv/k"])
            .unwrap();
        assert!(cli.verbose);
        assert_eq!(cli.target, Some(PathBuf::from("/srv/k")));
        assert!(matches!(cli.command, Commands::Serve { bind: Some(ref b) } if b == "0.0.0.0:8080"));
    }

    #[test]
    fn test_parse_admin_and_providers() {
        let cli = Cli::try_parse_from(["khobor", "admin", "add", "a@b.c", "--by", "root@b.c"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Admin { command: AdminCommands::Add { ref email, by: Some(_) } } if email == "a@b.c"
        ));

        let cli = Cli::try_parse_from(["khobor", "providers"]).unwrap();
        assert!(matches!(cli.command, Commands::Providers { command: None }));

        assert!(Cli::try_parse_from(["khobor", "admin"]).is_err());
    }
}
