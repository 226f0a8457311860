//! Lodestone CLI - Minecraft account login and game file downloads

mod commands;
mod config;
mod output;
mod progress;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Lodestone - Minecraft launcher core
#[derive(Parser)]
#[command(name = "lodestone")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Data directory for settings and the stored account
    #[arg(long, env = "LODESTONE_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Game directory, overriding the settings file
    #[arg(long, env = "LODESTONE_GAME_DIR")]
    game_dir: Option<PathBuf>,

    /// Output format
    #[arg(long, default_value = "human")]
    output: OutputFormat,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
enum OutputFormat {
    Human,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign in and store the account
    Login {
        #[command(subcommand)]
        method: LoginMethod,
    },

    /// Show the stored account
    Account,

    /// Refresh the stored account's tokens
    Refresh,

    /// Check whether the stored account's game token is still accepted
    Validate,

    /// Sign out and forget the stored account
    Logout,

    /// Download a version into the game directory
    Download {
        /// Version id, e.g. 1.20.1
        version: String,

        /// Install under a different name
        #[arg(short, long)]
        name: Option<String>,

        /// Read the version descriptor from this file instead of
        /// versions/<id>/<id>.json
        #[arg(long)]
        descriptor: Option<PathBuf>,

        /// Keep libraries inside the version directory
        #[arg(long)]
        isolate: bool,

        /// Number of concurrent transfers
        #[arg(short, long)]
        parallelism: Option<usize>,

        /// Mirror base URL
        #[arg(long)]
        mirror: Option<String>,
    },

    /// Show settings
    Config {
        #[command(subcommand)]
        action: Option<ConfigAction>,
    },
}

#[derive(Subcommand)]
enum LoginMethod {
    /// Microsoft device code flow
    Device,

    /// Microsoft refresh token
    Refresh {
        /// Refresh token
        token: String,
    },

    /// Offline account without authentication
    Offline {
        /// Player name
        name: String,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show all settings
    Show,

    /// Print the settings file path
    Path,

    /// Write the default settings file
    Init,
}

fn init_tracing(verbose: bool) {
    let default_filter = if verbose {
        "lodestone_core=debug,lodestone_cli=debug"
    } else {
        "warn"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let data_dir = config::data_dir(cli.data_dir);
    let mut settings = config::load_settings(&data_dir)?;
    if let Some(game_dir) = cli.game_dir {
        settings.game_dir = game_dir;
    }
    let ctx = commands::Context {
        data_dir,
        settings,
        format: cli.output,
    };

    match cli.command {
        Commands::Login { method } => match method {
            LoginMethod::Device => commands::login_device(&ctx).await?,
            LoginMethod::Refresh { token } => commands::login_refresh(&ctx, &token).await?,
            LoginMethod::Offline { name } => commands::login_offline(&ctx, &name)?,
        },

        Commands::Account => commands::show_account(&ctx)?,

        Commands::Refresh => commands::refresh_account(&ctx).await?,

        Commands::Validate => commands::validate_account(&ctx).await?,

        Commands::Logout => commands::logout(&ctx).await?,

        Commands::Download {
            version,
            name,
            descriptor,
            isolate,
            parallelism,
            mirror,
        } => {
            let request = commands::DownloadRequest {
                version,
                name,
                descriptor,
                isolate,
                parallelism,
                mirror,
            };
            commands::download(ctx, request).await?
        }

        Commands::Config { action } => commands::config_action(&ctx, action)?,
    }

    Ok(())
}
