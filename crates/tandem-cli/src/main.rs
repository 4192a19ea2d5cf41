//! Tandem terminal client.
//!
//! # Usage
//!
//! ```bash
//! # Sign in as user 42 against a local relay
//! tandem --relay ws://localhost:8080/ws --api http://localhost:8080/api --user 42
//!
//! # Same, configured from the environment
//! TANDEM_RELAY=wss://relay.example/ws TANDEM_USER=42 tandem
//! ```

use clap::Parser;
use tandem_app::{AppHandle, Snapshot};
use tandem_cli::{Command, HELP, render};
use tandem_client::ClientConfig;
use tandem_proto::UserId;
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Stdout},
    sync::broadcast::error::RecvError,
};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Tandem terminal client
#[derive(Parser, Debug)]
#[command(name = "tandem")]
#[command(about = "Line-oriented client for the Tandem chat and call relay")]
#[command(version)]
struct Args {
    /// Relay endpoint (ws:// or wss:// with long-poll fallback, http(s):// for long-polling)
    #[arg(long, env = "TANDEM_RELAY", default_value = "ws://localhost:8080/ws")]
    relay: String,

    /// Base URL of the history and directory API
    #[arg(long, env = "TANDEM_API", default_value = "http://localhost:8080/api")]
    api: String,

    /// User to sign in as on startup
    #[arg(short, long, env = "TANDEM_USER")]
    user: Option<u64>,

    /// Bearer token for the API
    #[arg(long, env = "TANDEM_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "TANDEM_LOG_LEVEL", default_value = "warn")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    // stdout carries the conversation; logs go to stderr
    tracing_subscriber::registry().with(fmt::layer().with_writer(std::io::stderr)).with(filter).init();

    let config = ClientConfig {
        relay_url: args.relay,
        api_url: args.api,
        token: args.token,
        ..ClientConfig::default()
    };

    #[cfg(feature = "webrtc")]
    let (runtime, handle) = tandem_client::runtime(&config, tandem_client::WebRtcMedia::new()?)?;
    #[cfg(not(feature = "webrtc"))]
    let (runtime, handle) = tandem_client::runtime(&config, tandem_client::HeadlessMedia::new())?;

    tracing::info!(relay = %config.relay_url, "tandem starting");
    let task = tokio::spawn(runtime.run());

    if let Some(user) = args.user {
        handle.connect(UserId::new(user)?)?;
    }

    let mut out = tokio::io::stdout();
    write_lines(&mut out, ["type /help for commands".to_string()]).await?;
    interact(&handle, &mut out).await?;

    let _ = handle.quit();
    task.await?;
    Ok(())
}

async fn interact(handle: &AppHandle, out: &mut Stdout) -> std::io::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut snapshots = handle.subscribe_snapshots();
    let mut notifications = handle.notifications();
    let mut last: Snapshot = snapshots.borrow_and_update().clone();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { return Ok(()) };
                let command = match Command::parse(&line) {
                    Ok(Some(command)) => command,
                    Ok(None) => continue,
                    Err(e) => {
                        write_lines(out, [format!("! {e}")]).await?;
                        continue;
                    },
                };
                match command {
                    Command::Help => write_lines(out, HELP.lines().map(str::to_string)).await?,
                    Command::List => write_lines(out, render::conversations(&last)).await?,
                    Command::Quit => return Ok(()),
                    command => {
                        if let Err(e) = command.apply(handle, &last) {
                            write_lines(out, [format!("! {e}")]).await?;
                        }
                    },
                }
            },
            changed = snapshots.changed() => {
                if changed.is_err() {
                    return Ok(());
                }
                let next = snapshots.borrow_and_update().clone();
                write_lines(out, render::changes(&last, &next)).await?;
                last = next;
            },
            notification = notifications.recv() => match notification {
                Ok(notification) => write_lines(out, render::notification(&notification)).await?,
                Err(RecvError::Lagged(skipped)) => tracing::warn!(skipped, "notifications dropped"),
                Err(RecvError::Closed) => return Ok(()),
            },
        }
    }
}

async fn write_lines(
    out: &mut Stdout,
    lines: impl IntoIterator<Item = String>,
) -> std::io::Result<()> {
    for line in lines {
        out.write_all(line.as_bytes()).await?;
        out.write_all(b"\n").await?;
    }
    out.flush().await
}
