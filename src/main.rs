use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing::{info, warn};

use gatelink::transport::Message;
use gatelink::{AppError, ConfigManager, DuplexReconnectSocket, SocketHandler, init_tracing};

#[derive(Parser, Debug)]
#[command(name = "gatelink", version, about = "Remote-access gateway session bridge")]
struct Cli {
    /// Config file, defaults to the platform config directory
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List saved session profiles
    Profiles,
    /// Print the tunnel handshake a profile would send
    Handshake {
        /// Profile id or display name
        profile: String,
    },
    /// Open a duplex socket and log what happens on it
    Dial {
        url: String,
        /// Closures to tolerate before giving up
        #[arg(long, default_value_t = 3)]
        attempts: u32,
        /// Give up after this many seconds
        #[arg(long, default_value_t = 60)]
        timeout: u64,
    },
}

enum DialEvent {
    Open,
    Text(String),
    Binary(usize),
    Error(String),
    Closed { retry_in: Duration, final_close: bool },
}

struct DialHandler {
    remaining: u32,
    events: mpsc::UnboundedSender<DialEvent>,
}

impl SocketHandler for DialHandler {
    fn on_open(&mut self) {
        let _ = self.events.send(DialEvent::Open);
    }

    fn on_message(&mut self, message: Message) {
        let event = match message {
            Message::Text(text) => DialEvent::Text(text.to_string()),
            Message::Binary(data) => DialEvent::Binary(data.len()),
            _ => return,
        };
        let _ = self.events.send(event);
    }

    fn on_error(&mut self, error: &AppError) {
        let _ = self.events.send(DialEvent::Error(error.to_string()));
    }

    fn on_close(&mut self, reconnect_delay: Duration) -> bool {
        self.remaining = self.remaining.saturating_sub(1);
        let final_close = self.remaining == 0;
        let _ = self.events.send(DialEvent::Closed {
            retry_in: reconnect_delay,
            final_close,
        });
        !final_close
    }
}

fn load_config(path: Option<PathBuf>) -> Result<ConfigManager> {
    let manager = match path {
        Some(path) => ConfigManager::with_path(&path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => ConfigManager::new().context("loading config")?,
    };
    Ok(manager)
}

async fn dial(url: &str, attempts: u32, timeout: Duration, base_delay: Duration) -> Result<()> {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut socket = DuplexReconnectSocket::new(base_delay);
    socket.connect(
        url,
        DialHandler {
            remaining: attempts.max(1),
            events: tx,
        },
    );

    let watch = async {
        while let Some(event) = rx.recv().await {
            match event {
                DialEvent::Open => println!("open {url}"),
                DialEvent::Text(text) => println!("text: {text}"),
                DialEvent::Binary(len) => println!("binary: {len} bytes"),
                DialEvent::Error(error) => println!("error: {error}"),
                DialEvent::Closed {
                    retry_in,
                    final_close,
                } => {
                    if final_close {
                        println!("closed");
                        break;
                    }
                    println!("closed, retrying in {:.1}s", retry_in.as_secs_f64());
                }
            }
        }
    };

    let timed_out = tokio::time::timeout(timeout, watch).await.is_err();
    socket.disconnect();
    if timed_out {
        warn!("Dial of {} timed out", url);
        bail!("no final close within {}s", timeout.as_secs());
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level)?;
    info!("gatelink starting: {:?}", cli.command);

    let manager = load_config(cli.config)?;

    match cli.command {
        Command::Profiles => {
            for profile in manager.profiles() {
                let remote = &profile.session.remote;
                println!(
                    "{}  {}  {:?} {}@{}:{}",
                    profile.id,
                    profile.display_name,
                    remote.protocol,
                    remote.username,
                    remote.host,
                    remote.port
                );
            }
        }
        Command::Handshake { profile } => {
            let Some(profile) = manager.find_profile(&profile) else {
                bail!("no profile named {profile}");
            };
            profile.validate()?;
            println!("{}", manager.settings().endpoint);
            println!("{}", profile.session.handshake_param()?);
        }
        Command::Dial {
            url,
            attempts,
            timeout,
        } => {
            let base_delay = manager.settings().reconnect_delay();
            dial(&url, attempts, Duration::from_secs(timeout), base_delay).await?;
        }
    }

    Ok(())
}
