//! Command-line arguments.

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tether_core::Credential;
use tether_settings::{TetherSettings, load_settings, load_settings_from_path};

/// Talk to a tether endpoint from the terminal.
#[derive(Parser, Debug)]
#[command(name = "tether", about = "Persistent RPC/event session client")]
pub struct Cli {
    /// Settings file (defaults to `~/.tether/settings.json`).
    #[arg(long, global = true)]
    pub settings: Option<PathBuf>,

    /// Endpoint base URL, overriding settings.
    #[arg(long, global = true)]
    pub url: Option<String>,

    /// Endpoint channel, overriding settings.
    #[arg(long, global = true)]
    pub channel: Option<String>,

    /// Bearer token. Expiry is read from its `exp` claim unless
    /// `--expires-in` is given.
    #[arg(long, env = "TETHER_TOKEN", global = true, hide_env_values = true)]
    pub token: Option<String>,

    /// Treat the token as opaque, valid for this many seconds.
    #[arg(long, global = true)]
    pub expires_in: Option<u64>,

    /// Emit JSON log lines.
    #[arg(long, global = true)]
    pub log_json: bool,

    /// What to do.
    #[command(subcommand)]
    pub command: Command,
}

/// Subcommands.
#[derive(Subcommand, Debug, PartialEq)]
pub enum Command {
    /// Print pushed events as JSON lines until interrupted.
    Listen {
        /// Topic to subscribe to (repeatable).
        #[arg(long = "topic")]
        topics: Vec<String>,
    },
    /// Perform one call and print its result.
    Call {
        /// Action name.
        action: String,
        /// Params as JSON.
        #[arg(value_parser = parse_json)]
        params: Option<Value>,
    },
    /// List chats.
    Chats {
        /// Page size.
        #[arg(long, default_value_t = tether_session::chat::DEFAULT_CHATS_LIMIT)]
        limit: u32,
        /// Cursor from a previous page.
        #[arg(long)]
        cursor: Option<String>,
    },
    /// Send a text message to a chat.
    Send {
        /// Chat id.
        chat_id: String,
        /// Message text.
        text: String,
    },
}

fn parse_json(raw: &str) -> Result<Value, String> {
    serde_json::from_str(raw).map_err(|e| format!("invalid JSON params: {e}"))
}

impl Cli {
    /// Load settings and apply command-line overrides.
    pub fn settings(&self) -> Result<TetherSettings> {
        let mut settings = match &self.settings {
            Some(path) => load_settings_from_path(path)
                .with_context(|| format!("loading settings from {}", path.display()))?,
            None => load_settings().context("loading settings")?,
        };
        if let Some(url) = &self.url {
            settings.endpoint.base_url.clone_from(url);
        }
        if let Some(channel) = &self.channel {
            settings.endpoint.channel.clone_from(channel);
        }
        if self.log_json {
            settings.logging.json = true;
        }
        if matches!(self.command, Command::Chats { .. } | Command::Send { .. }) {
            settings.rpc.topic_param = tether_session::chat::CHAT_TOPIC_PARAM.to_string();
        }
        settings.validate();
        Ok(settings)
    }

    /// Build the credential from `--token`.
    pub fn credential(&self) -> Result<Credential> {
        let token = self
            .token
            .clone()
            .context("no token: pass --token or set TETHER_TOKEN")?;
        match self.expires_in {
            Some(secs) => {
                let secs = i64::try_from(secs).context("--expires-in out of range")?;
                Ok(Credential::new(token, Utc::now() + Duration::seconds(secs)))
            }
            None => Credential::from_jwt(token).context("token is not a JWT with an exp claim"),
        }
    }
}
