//! `osa` — local-first conversational agent runtime.
//!
//! `osa serve` starts the HTTP/SSE gateway; `osa chat` opens the
//! terminal REPL; `osa classify` is a one-shot classification probe.

use osa_gateway::{api, bootstrap, cli};

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use osa_domain::signal::ChannelKind;

#[derive(Parser)]
#[command(name = "osa", about = "local-first conversational agent runtime")]
struct Cli {
    /// State directory (default: ~/.osa).
    #[arg(long, global = true)]
    state_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Start the HTTP gateway.
    Serve {
        /// Bind address override (default from config).
        #[arg(long)]
        bind: Option<String>,
    },
    /// Interactive terminal chat (default).
    Chat {
        /// Named session to resume.
        #[arg(long)]
        session: Option<String>,
    },
    /// Classify one message and print the signal JSON.
    Classify {
        text: String,
        /// Channel tag (cli, http, telegram, ...).
        #[arg(long, default_value = "cli")]
        channel: String,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let runtime = tokio::runtime::Runtime::new().expect("tokio runtime");
    let result = runtime.block_on(run(cli));

    if let Err(e) = result {
        tracing::error!(error = %e, "fatal");
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = bootstrap::load_config(cli.state_dir)?;

    match cli.command.unwrap_or(Command::Chat { session: None }) {
        Command::Serve { bind } => {
            let bind = bind.unwrap_or_else(|| config.server.bind.clone());
            let state = bootstrap::build_app_state(config)?;
            bootstrap::spawn_background_tasks(&state);
            api::serve(state, &bind).await
        }
        Command::Chat { session } => {
            let state = bootstrap::build_app_state(config)?;
            cli::chat::chat(state, session).await
        }
        Command::Classify { text, channel } => {
            let state = bootstrap::build_app_state(config)?;
            let channel = match channel.as_str() {
                "cli" => ChannelKind::Cli,
                "http" => ChannelKind::Http,
                "telegram" => ChannelKind::Telegram,
                "discord" => ChannelKind::Discord,
                "slack" => ChannelKind::Slack,
                "whatsapp" => ChannelKind::Whatsapp,
                "webhook" => ChannelKind::Webhook,
                "filesystem" => ChannelKind::Filesystem,
                _ => ChannelKind::Other,
            };
            cli::chat::classify_once(&state, &text, channel).await
        }
    }
}
