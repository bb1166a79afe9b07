//! pulsarctl
//!
//! Admin CLI for Apache Pulsar clusters protected by OAuth 2.0:
//! 1. `oauth2 login` / `oauth2 activate` obtain and store a grant per audience
//! 2. Admin requests pick up the stored grant and attach a bearer token,
//!    refreshing it when it is about to expire

mod commands;
mod config;
mod prompt;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{Config, Overrides};

#[derive(Parser)]
#[command(name = "pulsarctl", about = "Pulsar admin CLI", version)]
struct Cli {
    /// Path to configuration file
    #[arg(long, global = true)]
    config: Option<String>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,

    #[command(flatten)]
    overrides: Overrides,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage OAuth 2.0 credentials
    #[command(name = "oauth2", subcommand)]
    OAuth2(OAuth2Command),
    /// GET an admin API path and print the JSON response
    Get {
        /// Path under the web service URL, e.g. /admin/v2/clusters
        path: String,
    },
}

#[derive(Subcommand)]
enum OAuth2Command {
    /// Log in interactively with a device code
    Login {
        /// Additional scope to request (repeatable)
        #[arg(long = "scope")]
        scopes: Vec<String>,
        /// Do not request a refresh token
        #[arg(long)]
        no_refresh: bool,
    },
    /// Log in with a service account key file
    Activate,
    /// Show the identity stored for the audience
    Whoami,
    /// Remove all stored credentials
    Logout,
    /// Print a valid access token for the audience
    Token,
}

fn init_tracing(json: bool) {
    // stdout carries command output; logs go to stderr
    let filter = EnvFilter::try_from_env("LOG_LEVEL")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let config_path = Config::resolve_path(cli.config.as_deref())?;
    debug!(path = %config_path.display(), "loading configuration");
    let mut config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;
    config.apply(&cli.overrides)?;

    match cli.command {
        Commands::OAuth2(OAuth2Command::Login { scopes, no_refresh }) => {
            commands::oauth2::login(&config, scopes, !no_refresh).await?;
        }
        Commands::OAuth2(OAuth2Command::Activate) => commands::oauth2::activate(&config).await?,
        Commands::OAuth2(OAuth2Command::Whoami) => commands::oauth2::whoami(&config).await?,
        Commands::OAuth2(OAuth2Command::Logout) => commands::oauth2::logout(&config).await?,
        Commands::OAuth2(OAuth2Command::Token) => commands::oauth2::token(&config).await?,
        Commands::Get { path } => commands::get::run(&config, &path).await?,
    }

    Ok(())
}
