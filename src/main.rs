use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lmdesk::config::Config;
use lmdesk::core::SortKey;
use lmdesk::gateway::{Gateway, HttpGateway};
use lmdesk::transport::{cli as commands, CliContext};

#[derive(Parser)]
#[command(name = "lmdesk")]
#[command(
    author,
    version = concat!(env!("CARGO_PKG_VERSION"), env!("LMDESK_VERSION_SUFFIX")),
    about = "lmdesk - client for a locally hosted LLM query service",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Use the built-in simulated backend instead of the query service
    #[arg(long, global = true)]
    sim: bool,

    /// Config file (default: platform config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// List chats (the active one is marked)
    Chats,

    /// Create a chat
    New {
        /// Title (the server picks one when omitted)
        title: Option<String>,
    },

    /// Delete a chat
    Delete {
        /// Chat id
        id: String,

        /// Do not ask for confirmation
        #[arg(short, long)]
        yes: bool,
    },

    /// Show the messages of a chat
    History {
        /// Chat id
        id: String,
    },

    /// Send a message and print the reply
    Ask {
        /// Chat id (default: most recent chat, or a new one)
        #[arg(short, long)]
        chat: Option<String>,

        /// Let the backend look things up online
        #[arg(long)]
        internet: bool,

        /// Message text
        text: String,
    },

    /// Browse the model catalog
    Models {
        /// Number of pages to load
        #[arg(short, long, default_value = "1")]
        pages: usize,

        /// Sort by (catalog, name, size, parameters, family)
        #[arg(short, long, default_value = "catalog")]
        sort: SortKey,
    },

    /// Install a model from the catalog
    Install {
        /// Model name
        name: String,
    },

    /// Select the model used by `ask`
    Select {
        /// Model name (must be installed)
        name: String,
    },

    /// Show or change generation settings
    Settings {
        #[command(subcommand)]
        action: SettingsAction,
    },

    /// Store the token for gated catalog entries
    Token {
        /// Token value
        value: String,
    },

    /// Show which model the backend has loaded
    Status,

    /// Reset the backend's dialog context (stored chats are kept)
    ClearHistory,
}

#[derive(Subcommand)]
enum SettingsAction {
    /// Print the stored settings
    Show,

    /// Change one or more settings
    Set {
        #[arg(long)]
        max_tokens: Option<u32>,

        #[arg(long)]
        temperature: Option<f32>,

        #[arg(long)]
        top_p: Option<f32>,
    },
}

fn build_gateway(sim: bool, config: &Config) -> Result<Arc<dyn Gateway>> {
    if sim {
        #[cfg(feature = "test-sim")]
        {
            tracing::info!("Using simulated backend");
            return Ok(Arc::new(lmdesk::gateway::SimGateway::demo()));
        }
        #[cfg(not(feature = "test-sim"))]
        anyhow::bail!("This build has no simulated backend (feature `test-sim`)");
    }
    tracing::info!("Using query service at {}", config.gateway.base_url);
    Ok(Arc::new(HttpGateway::from_config(&config.gateway)?))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        "lmdesk=debug"
    } else {
        "lmdesk=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = match &cli.config {
        Some(path) if path.exists() => Config::load_from(path)?,
        Some(_) => Config::default(),
        None => Config::load().unwrap_or_default(),
    };
    let gateway = build_gateway(cli.sim, &config)?;
    let mut ctx = CliContext::new(gateway, config, cli.config.clone());

    match cli.command {
        Commands::Chats => commands::run_chats(&mut ctx).await?,
        Commands::New { title } => commands::run_new(&mut ctx, title.as_deref()).await?,
        Commands::Delete { id, yes } => commands::run_delete(&mut ctx, &id, yes).await?,
        Commands::History { id } => commands::run_history(&mut ctx, &id).await?,
        Commands::Ask {
            chat,
            internet,
            text,
        } => commands::run_ask(&mut ctx, chat.as_deref(), &text, internet).await?,
        Commands::Models { pages, sort } => commands::run_models(&mut ctx, pages, sort).await?,
        Commands::Install { name } => commands::run_install(&mut ctx, &name).await?,
        Commands::Select { name } => commands::run_select(&mut ctx, &name).await?,
        Commands::Settings { action } => match action {
            SettingsAction::Show => commands::run_settings_show(&mut ctx).await?,
            SettingsAction::Set {
                max_tokens,
                temperature,
                top_p,
            } => commands::run_settings_set(&mut ctx, max_tokens, temperature, top_p).await?,
        },
        Commands::Token { value } => commands::run_token(&mut ctx, &value).await?,
        Commands::Status => commands::run_status(&mut ctx).await?,
        Commands::ClearHistory => commands::run_clear_history(&mut ctx).await?,
    }

    Ok(())
}
