//! auto_forward CLI - main entry point
//!
//! Forwards the messages of one chat to another, optionally restarting every
//! four hours to pick up new ones.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use auto_forward::config::{bot_id_from_token, RESTART_INTERVAL};
use auto_forward::session::{self, SessionKind};
use auto_forward::{
    metrics, run_forever, run_once, ChatService, CheckpointStore, ForwardService, KindFilter,
    Mode, RunOptions, Settings, TelegramBackend,
};

#[derive(Parser)]
#[command(name = "auto_forward")]
#[command(about = "Forward messages from one Telegram chat to another", long_about = None)]
#[command(version)]
struct Cli {
    /// Which account forwards the messages
    #[arg(short, long, value_enum, default_value_t = Mode::User)]
    mode: Mode,

    /// Repeat the run every four hours
    #[arg(short = 'R', long)]
    restart: bool,

    /// Source chat: id, @username or t.me link
    #[arg(short, long)]
    orig: String,

    /// Destination chat; a new channel is created when omitted
    #[arg(short, long)]
    dest: Option<String>,

    /// Only forward messages matching this text search
    #[arg(short, long, default_value = "")]
    query: String,

    /// Continue after the last forwarded message
    #[arg(short, long)]
    resume: bool,

    /// Maximum number of messages to forward (0 = no limit)
    #[arg(short, long, default_value = "0")]
    limit: usize,

    /// Message kinds to keep, comma separated (e.g. photo,video,text)
    #[arg(short, long, value_delimiter = ',')]
    filter: Vec<String>,

    /// Telegram API id
    #[arg(short = 'i', long, env = "TELEGRAM_API_ID")]
    api_id: Option<i32>,

    /// Telegram API hash
    #[arg(short = 's', long, env = "TELEGRAM_API_HASH")]
    api_hash: Option<String>,

    /// Bot token used to sign the bot session in
    #[arg(short, long, env = "TELEGRAM_BOT_TOKEN")]
    bot_token: Option<String>,

    /// Settings file
    #[arg(long, default_value = auto_forward::config::CONFIG_FILE)]
    config: PathBuf,

    /// Directory holding resume checkpoints
    #[arg(long, default_value = auto_forward::config::CHECKPOINT_DIR)]
    checkpoint_dir: PathBuf,

    /// Directory holding the session files
    #[arg(long, default_value = ".")]
    session_dir: PathBuf,

    /// Address to expose Prometheus metrics (e.g., 0.0.0.0:9898)
    #[arg(long, env = "METRICS_ADDR")]
    metrics_addr: Option<String>,
}

/// Merge command-line credentials into the stored settings.
///
/// Returns whether anything changed and needs to be written back.
fn merge_credentials(settings: &mut Settings, cli: &Cli) -> bool {
    let mut changed = false;
    if cli.api_id.is_some() && cli.api_id != settings.api_id {
        settings.api_id = cli.api_id;
        changed = true;
    }
    if cli.api_hash.is_some() && cli.api_hash != settings.api_hash {
        settings.api_hash = cli.api_hash.clone();
        changed = true;
    }
    if let Some(id) = cli.bot_token.as_deref().and_then(bot_id_from_token) {
        if settings.bot_id != Some(id) {
            settings.bot_id = Some(id);
            changed = true;
        }
    }
    changed
}

async fn execute<C, F>(
    lookup: &C,
    sender: &F,
    store: &CheckpointStore,
    options: RunOptions,
    restart: bool,
) -> auto_forward::Result<()>
where
    C: ChatService,
    F: ForwardService,
{
    if restart {
        run_forever(lookup, sender, store, options, RESTART_INTERVAL).await
    } else {
        run_once(lookup, sender, store, &options).await.map(|_| ())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env for local development
    let _ = dotenvy::dotenv();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("auto_forward=info".parse()?))
        .init();

    let cli = Cli::parse();

    if let Some(addr) = cli.metrics_addr.as_deref() {
        match addr.parse::<SocketAddr>() {
            Ok(socket) => metrics::spawn_metrics_server(socket),
            Err(err) => warn!(%addr, "Invalid metrics address: {}", err),
        }
    }

    let mut settings = Settings::load_or_create(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    if merge_credentials(&mut settings, &cli) {
        settings.save(&cli.config)?;
    }
    let api_id = settings
        .api_id
        .context("Telegram API id missing: pass --api-id or set TELEGRAM_API_ID")?;

    let user = session::open(SessionKind::User, &cli.session_dir, api_id).await?;
    session::ensure_user_login(&user, settings.api_hash.as_deref()).await?;

    let bot = if cli.mode == Mode::Bot || cli.bot_token.is_some() {
        let bot = session::open(SessionKind::Bot, &cli.session_dir, api_id).await?;
        let username = session::ensure_bot_login(
            &bot,
            cli.bot_token.as_deref(),
            settings.api_hash.as_deref(),
        )
        .await?;
        if username.is_some() && username != settings.bot_username {
            settings.bot_username = username;
            settings.save(&cli.config)?;
        }
        Some(bot)
    } else {
        None
    };

    let options = RunOptions {
        source: cli.orig.clone(),
        destination: cli.dest.clone(),
        mode: cli.mode,
        query: cli.query.clone(),
        filter: KindFilter::from_tags(&cli.filter),
        limit: cli.limit,
        resume: cli.resume,
        delay: settings.delay_for(cli.mode),
        bot: settings.bot(),
    };
    info!(mode = cli.mode.as_str(), source = %options.source, "Starting");

    let store = CheckpointStore::new(&cli.checkpoint_dir);
    let lookup = TelegramBackend::user(&user);
    let work = async {
        match &bot {
            Some(bot) if cli.mode == Mode::Bot => {
                let sender = TelegramBackend::bot(bot);
                execute(&lookup, &sender, &store, options, cli.restart).await
            }
            _ => execute(&lookup, &lookup, &store, options, cli.restart).await,
        }
    };

    tokio::select! {
        result = work => result?,
        _ = tokio::signal::ctrl_c() => {
            println!("\nInterrupted, exiting.");
        }
    }

    Ok(())
}
