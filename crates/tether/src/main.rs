//! # tether
//!
//! Command-line client: opens one session, runs a subcommand, closes.

#![deny(unsafe_code)]

mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use tether_core::logging::{LogFormat, init_subscriber};
use tether_session::{ChatClient, Session};
use tokio::sync::mpsc;

use cli::{Cli, Command};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = cli.settings()?;
    let format = if settings.logging.json {
        LogFormat::Json
    } else {
        LogFormat::Pretty
    };
    init_subscriber(&settings.logging.level, format).context("installing log subscriber")?;

    let credential = cli.credential()?;
    let session = Session::websocket(&settings);
    session.open(credential).await.context("opening session")?;
    session.ready().await.context("waiting for session")?;
    tracing::info!(url = %settings.endpoint.base_url, "session ready");

    let outcome = run(&session, cli.command).await;
    session.close().await;
    outcome
}

async fn run(session: &Session, command: Command) -> Result<()> {
    match command {
        Command::Listen { topics } => listen(session, &topics).await,
        Command::Call { action, params } => {
            let result = session.call(&action, params).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(())
        }
        Command::Chats { limit, cursor } => {
            let page = ChatClient::new(session.clone())
                .get_chats(limit, cursor.as_deref())
                .await?;
            println!("{}", serde_json::to_string_pretty(&page)?);
            Ok(())
        }
        Command::Send { chat_id, text } => {
            let message = ChatClient::new(session.clone())
                .send_message(&chat_id, &text)
                .await?;
            println!("{}", serde_json::to_string_pretty(&message)?);
            Ok(())
        }
    }
}

async fn listen(session: &Session, topics: &[String]) -> Result<()> {
    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let listener = session.add_listener(move |event| {
        let _ = events_tx.send(event.clone());
    });
    for topic in topics {
        session
            .subscribe(topic)
            .await
            .with_context(|| format!("subscribing to {topic}"))?;
    }

    let mut status = session.watch_status();
    let interrupted = tokio::signal::ctrl_c();
    tokio::pin!(interrupted);
    loop {
        tokio::select! {
            Some(event) = events_rx.recv() => {
                println!("{}", serde_json::to_string(&event)?);
            }
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = status.borrow_and_update().clone();
                tracing::info!(
                    state = %snapshot.state,
                    ready = snapshot.ready,
                    reconnect_attempt = snapshot.reconnect_attempt,
                    "status"
                );
                if snapshot.awaits_caller() {
                    let _ = listener.remove();
                    return Err(snapshot
                        .error
                        .map_or_else(|| anyhow::anyhow!("connection closed"), anyhow::Error::from));
                }
            }
            _ = &mut interrupted => {
                tracing::info!("interrupted");
                break;
            }
        }
    }
    let _ = listener.remove();
    Ok(())
}
