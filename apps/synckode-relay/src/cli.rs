use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use futures_util::{SinkExt, StreamExt};
use std::path::PathBuf;
use tokio::time::{timeout, Duration, Instant};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::debug;

use crate::protocol::{ClientEvent, ServerEvent};

#[derive(Parser, Debug)]
#[command(name = "synckode-relay", author, version)]
#[command(about = "SyncKode room relay and code runner")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    #[command(flatten)]
    pub server: ServerArgs,
}

#[derive(Args, Debug, Clone)]
pub struct ServerArgs {
    /// Address to bind the HTTP and websocket listener to.
    #[arg(long, env = "SYNCKODE_LISTEN_ADDR", default_value = "0.0.0.0:3000")]
    pub listen_addr: String,

    /// Directory for command working dirs and per-run source files
    /// (defaults to `<tmp>/synckode`).
    #[arg(long, env = "SYNCKODE_SCRATCH_DIR")]
    pub scratch_dir: Option<PathBuf>,

    /// Wall-clock limit for a single run.
    #[arg(long, env = "SYNCKODE_EXEC_TIMEOUT_SECS", default_value_t = 30)]
    pub exec_timeout_secs: u64,

    /// Extra room ids to create at startup.
    #[arg(long = "room", env = "SYNCKODE_ROOMS", value_delimiter = ',')]
    pub rooms: Vec<String>,

    /// Grace period applied during shutdown.
    #[arg(long, env = "SYNCKODE_SHUTDOWN_GRACE_SECS", default_value_t = 5)]
    pub shutdown_grace_secs: u64,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Connect to a running relay, join a room and print every event
    Probe {
        /// Relay URL (e.g., ws://localhost:3000)
        #[arg(short, long, default_value = "ws://localhost:3000")]
        url: String,

        /// Room to join
        #[arg(short, long, default_value = "nexus-hackathon")]
        room: String,

        /// Display name to join with
        #[arg(short, long, default_value = "probe")]
        name: String,

        /// Raw command to run after joining
        #[arg(long, conflicts_with = "code")]
        command: Option<String>,

        /// Source text to run after joining
        #[arg(long)]
        code: Option<String>,

        /// Language of `--code`
        #[arg(long)]
        language: Option<String>,

        /// How long to keep printing events
        #[arg(long, default_value_t = 5)]
        wait_secs: u64,
    },
}

#[derive(Debug, Clone)]
pub struct ProbeOptions {
    pub url: String,
    pub room: String,
    pub name: String,
    pub command: Option<String>,
    pub code: Option<String>,
    pub language: Option<String>,
    pub wait: Duration,
}

impl ProbeOptions {
    fn runs_something(&self) -> bool {
        self.command.is_some() || self.code.is_some()
    }
}

impl From<Commands> for ProbeOptions {
    fn from(command: Commands) -> Self {
        let Commands::Probe {
            url,
            room,
            name,
            command,
            code,
            language,
            wait_secs,
        } = command;
        Self {
            url,
            room,
            name,
            command,
            code,
            language,
            wait: Duration::from_secs(wait_secs),
        }
    }
}

fn ws_url(base: &str) -> String {
    let base = base.trim_end_matches('/');
    if base.ends_with("/ws") {
        base.to_string()
    } else {
        format!("{base}/ws")
    }
}

/// Print every event the relay sends, one JSON object per line. Stops early
/// once a requested run reports its exit status.
pub async fn run_probe(options: ProbeOptions) -> Result<()> {
    let url = ws_url(&options.url);
    debug!(url = %url, room = %options.room, "connecting probe");

    let (ws_stream, _) = timeout(Duration::from_secs(5), connect_async(url.as_str()))
        .await
        .map_err(|_| anyhow!("connection timeout - is the relay running at {url}?"))?
        .with_context(|| format!("failed to connect to {url}"))?;
    let (mut write, mut read) = ws_stream.split();

    let mut outgoing = vec![ClientEvent::JoinRoom {
        room_id: Some(options.room.clone()),
        user_id: None,
        name: Some(options.name.clone()),
        avatar: None,
    }];
    if options.runs_something() {
        outgoing.push(ClientEvent::TerminalRun {
            code: options.code.clone(),
            language: options.language.clone(),
            command: options.command.clone(),
        });
    }
    for event in &outgoing {
        let text = serde_json::to_string(event)?;
        write.send(Message::Text(text.into())).await?;
    }

    let deadline = Instant::now() + options.wait;
    loop {
        let frame = match tokio::time::timeout_at(deadline, read.next()).await {
            Ok(Some(frame)) => frame.context("websocket error")?,
            Ok(None) => break,
            Err(_) => break,
        };
        let Message::Text(text) = frame else {
            continue;
        };
        println!("{}", text.as_str());

        match serde_json::from_str::<ServerEvent>(text.as_str()) {
            Ok(ServerEvent::TerminalExit { .. }) if options.runs_something() => break,
            Ok(ServerEvent::Error { message }) => eprintln!("relay error: {message}"),
            Ok(_) => {}
            Err(err) => debug!(error = %err, "unrecognised event"),
        }
    }

    let _ = write.send(Message::Close(None)).await;
    Ok(())
}
