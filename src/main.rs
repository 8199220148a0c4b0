use anyhow::{Context, Result};
use clap::Parser;
use deckfeed::app::{run, App, TradePost};
use deckfeed::clock::SystemClock;
use deckfeed::config::Config;
use deckfeed::feed::FeedController;
use deckfeed::reaction::ReactionToggle;
use deckfeed::remote::{build_client, HttpBackend};
use deckfeed::session::SessionStore;
use secrecy::SecretString;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Get the default config file path (~/.config/deckfeed/config.toml)
fn default_config_path() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home)
        .join(".config")
        .join("deckfeed")
        .join("config.toml"))
}

#[derive(Parser, Debug)]
#[command(name = "deckfeed", about = "Browse the trade board feed from the terminal")]
struct Args {
    /// Config file (default: ~/.config/deckfeed/config.toml)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Override the API base URL
    #[arg(long, value_name = "URL")]
    base_url: Option<String>,

    /// Override the number of posts per page
    #[arg(long, value_name = "N")]
    page_size: Option<u32>,

    /// Bearer token (overrides config and DECKFEED_API_TOKEN)
    #[arg(long, value_name = "TOKEN")]
    token: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so they don't interleave with the feed on stdout
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let config_path = match args.config {
        Some(path) => path,
        None => default_config_path()?,
    };
    let mut config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;
    if let Some(base_url) = args.base_url {
        config.base_url = base_url;
    }
    if let Some(page_size) = args.page_size {
        anyhow::ensure!(page_size > 0, "--page-size must be at least 1");
        config.page_size = page_size;
    }
    tracing::debug!(?config, "Effective configuration");

    let mut http_options = config.http_options();
    if let Some(token) = args.token {
        http_options.api_token = Some(SecretString::from(token));
    }
    let authenticated = http_options.api_token.is_some();

    let client = build_client().context("Failed to build HTTP client")?;
    let backend = Arc::new(
        HttpBackend::<TradePost>::new(client, &config.base_url, http_options)
            .with_context(|| format!("Invalid base URL: {}", config.base_url))?,
    );

    let (feed_tx, feed_rx) = mpsc::channel(32);
    let (reaction_tx, reaction_rx) = mpsc::channel(32);

    let clock = Arc::new(SystemClock);
    let feed = FeedController::new(
        Arc::clone(&backend),
        SessionStore::new(),
        clock.clone(),
        config.feed_options(),
        feed_tx,
    );
    let reactions = ReactionToggle::new(backend, config.reaction_gate(), reaction_tx)
        .with_reconcile_delay(config.reconcile_delay())
        .with_clock(clock);
    let mut app = App::new(feed, reactions, authenticated);

    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let mut stdout = std::io::stdout();
    run(&mut app, feed_rx, reaction_rx, stdin, &mut stdout).await?;

    println!("Goodbye!");
    Ok(())
}
