//! parley — encrypted two-party terminal chat.
//!
//! Usage:
//!   parley listen [bind_addr] [port] [--generate | --keys <path>]
//!   parley dial   [addr]      [port] [--generate | --keys <path>]
//!
//! The listener defaults to generating fresh keys and saving them to the
//! configured key path; the dialer defaults to loading that same file.
//! Type lines to send them; /quit (or EOF) hangs up.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use tokio::io::AsyncBufReadExt;

use parley_channel::{ChannelState, KeySource, Session, SessionController, SessionEvent};
use parley_core::config::ParleyConfig;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    if let Err(e) = ParleyConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let config = ParleyConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        ParleyConfig::default()
    });

    let args: Vec<String> = std::env::args().skip(1).collect();
    let invocation = Invocation::parse(&args, &config)?;

    let controller = SessionController::new(config);
    let mut session = match invocation.mode {
        Mode::Listen => {
            controller
                .act_as_listener(&invocation.addr, invocation.port, invocation.key_source)
                .await
                .context("failed to start listener")?
        }
        Mode::Dial => {
            controller
                .act_as_dialer(&invocation.addr, invocation.port, invocation.key_source)
                .await
                .context("failed to connect")?
        }
    };

    run_chat(&mut session).await;
    session.close().await;
    Ok(())
}

// ── Argument parsing ──────────────────────────────────────────────────────────

enum Mode {
    Listen,
    Dial,
}

struct Invocation {
    mode: Mode,
    addr: String,
    port: u16,
    key_source: KeySource,
}

impl Invocation {
    fn parse(args: &[String], config: &ParleyConfig) -> Result<Self> {
        let mode = match args.first().map(String::as_str) {
            Some("listen") => Mode::Listen,
            Some("dial") => Mode::Dial,
            Some(other) => bail!("unknown mode '{other}'\n{USAGE}"),
            None => bail!("missing mode\n{USAGE}"),
        };

        let mut addr = match mode {
            Mode::Listen => config.network.bind_addr.clone(),
            Mode::Dial => "127.0.0.1".to_string(),
        };
        let mut port = config.network.port;
        let mut key_source = match mode {
            // The listener mints the shared secret; the dialer loads it.
            Mode::Listen => KeySource::Generate,
            Mode::Dial => KeySource::LoadFrom(config.keys.path.clone()),
        };

        let mut positional = 0;
        let mut rest = args[1..].iter();
        while let Some(arg) = rest.next() {
            match arg.as_str() {
                "--generate" => key_source = KeySource::Generate,
                "--keys" => {
                    let path = rest.next().context("--keys requires a path")?;
                    key_source = KeySource::LoadFrom(PathBuf::from(path));
                }
                flag if flag.starts_with("--") => bail!("unknown flag '{flag}'\n{USAGE}"),
                value => {
                    match positional {
                        0 => addr = value.to_string(),
                        1 => port = value.parse().context("port must be a number")?,
                        _ => bail!("too many arguments\n{USAGE}"),
                    }
                    positional += 1;
                }
            }
        }

        Ok(Self {
            mode,
            addr,
            port,
            key_source,
        })
    }
}

const USAGE: &str = "usage:
  parley listen [bind_addr] [port] [--generate | --keys <path>]
  parley dial   [addr]      [port] [--generate | --keys <path>]";

// ── Chat loop ─────────────────────────────────────────────────────────────────

async fn run_chat(session: &mut Session) {
    let mut events = match session.take_events() {
        Some(events) => events,
        None => return,
    };
    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(SessionEvent::Message(text)) => println!("peer: {text}"),
                Some(SessionEvent::Status(text)) => {
                    println!("* {text}");
                    if session.state().await == ChannelState::Closed {
                        return;
                    }
                }
                None => return,
            },

            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    if line == "/quit" {
                        return;
                    }
                    match session.send(line).await {
                        Ok(()) => println!("you: {line}"),
                        Err(e) => {
                            println!("* send failed: {e}");
                            if session.state().await == ChannelState::Closed {
                                return;
                            }
                        }
                    }
                }
                Ok(None) => return, // stdin closed
                Err(e) => {
                    println!("* stdin error: {e}");
                    return;
                }
            }
        }
    }
}
