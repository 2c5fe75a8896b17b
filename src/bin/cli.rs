//! media-relay CLI
//!
//! Runs the MAX polling loop, or processes a single link by hand.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use media_relay::{
    config::{Relay, load_config},
    error::Result,
    models::{ChatId, Config},
    pipeline,
    storage::{CursorStore, FileCursorStore},
    utils::find_binary,
};

/// media-relay - link-to-media bot for MAX
#[derive(Parser, Debug)]
#[command(
    name = "relay",
    version,
    about = "Relays media behind links into MAX chats"
)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "relay.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the long-polling loop
    Run,

    /// Process one link and post the result into a chat
    Process {
        /// Link to process
        url: String,

        /// Chat to answer in
        #[arg(long)]
        chat: ChatId,
    },

    /// Validate the configuration
    Validate,

    /// Show persisted cursor and configured backends
    Info,
}

/// Initialize logging based on verbosity flag and configured level.
fn init_logging(verbose: bool, config: &Config) {
    let level = if verbose {
        "debug"
    } else {
        config.logging.level.as_str()
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();
}

/// Main entry point for the CLI application.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli.config)?;
    init_logging(cli.verbose, &config);

    log::info!("media-relay starting...");

    match cli.command {
        Command::Run => {
            let relay = Relay::from_config(&config).await?;
            let (ctx, ingestor, options) = relay.into_loop(&config).await;

            let shutdown = async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    log::error!("Cannot listen for Ctrl-C: {}", e);
                    std::future::pending::<()>().await;
                }
                log::info!("Shutdown requested");
            };
            pipeline::run(ctx, ingestor, options, shutdown).await?;
        }

        Command::Process { url, chat } => {
            let relay = Relay::from_config(&config).await?;
            let report = relay.processor.process(Some(chat), &url).await;

            println!("State:    {:?}", report.state());
            if let Some(kind) = report.kind {
                println!("Kind:     {:?}", kind);
            }
            for (i, outcome) in report.outcomes.iter().enumerate() {
                println!("Item {:>2}:  {:?}", i + 1, outcome);
            }
        }

        Command::Validate => {
            config.validate()?;
            log::info!("Configuration at {} is valid", cli.config.display());
        }

        Command::Info => {
            let store = FileCursorStore::new(&config.ingest.cursor_file);
            match store.load().await? {
                Some(cursor) => println!("Cursor:    {} ({})", cursor.value(), store.path().display()),
                None => println!("Cursor:    none persisted ({})", store.path().display()),
            }
            println!("API base:  {}", config.max.api_base);
            println!("Fallback:  {:?}", config.fallback.provider);
            println!(
                "yt-dlp:    {}",
                find_binary(&config.acquisition.ytdlp_binary)
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "not found".to_string())
            );
            println!(
                "ffmpeg:    {}",
                find_binary("ffmpeg")
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "not found (stream merging disabled)".to_string())
            );
            println!("Chats:     {}", if config.ingest.concurrent_chats { "concurrent" } else { "sequential" });
        }
    }

    Ok(())
}
