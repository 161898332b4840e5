//! Tail command - subscribe through a connection manager and print events.

use std::path::PathBuf;

use tokio::io::{AsyncBufReadExt, BufReader};

use crate::client::{ConnectionManager, ConnectionState, Notice, WsConnector};
use crate::config::Settings;
use crate::error::SyncError;
use crate::protocol::ServerMessage;

pub struct TailArgs {
    pub root: PathBuf,
    pub url: Option<String>,
    pub json: bool,
}

pub async fn run(args: TailArgs, config: Settings) -> anyhow::Result<()> {
    let root = args.root.canonicalize().unwrap_or(args.root);
    let url = args.url.unwrap_or_else(|| config.client.url.clone());

    let connector = WsConnector::new(&url, &root)?;
    let manager = ConnectionManager::new(connector, config.client.clone());
    let mut subscription = manager.subscribe();

    eprintln!("Tailing {} via {url} (Ctrl+C to stop)", root.display());

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            notice = subscription.recv() => {
                let Some(notice) = notice else { break };
                print_notice(&notice, args.json)?;
            }
            line = stdin.next_line(), if stdin_open => match line {
                Ok(Some(_)) if manager.state() == ConnectionState::Rejected => {
                    if let Err(e) = manager.retry() {
                        eprintln!("{}", SyncError::from(e));
                    }
                }
                Ok(Some(_)) => {}
                Ok(None) | Err(_) => stdin_open = false,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    subscription.unsubscribe();
    Ok(())
}

fn print_notice(notice: &Notice, json: bool) -> anyhow::Result<()> {
    match notice {
        Notice::Message(message) if json => println!("{}", serde_json::to_string(message)?),
        Notice::Message(ServerMessage::WatchUnavailable { path, reason, .. }) => {
            eprintln!(
                "watch unavailable for {}: {}",
                path.display(),
                reason.as_deref().unwrap_or("unknown reason")
            );
        }
        Notice::Message(message) => {
            if let Some(event) = message.change_event() {
                let origin = event
                    .origin
                    .as_ref()
                    .map(|tag| format!(" (by {tag})"))
                    .unwrap_or_default();
                println!("{:<16} {}{origin}", format!("{:?}", event.kind), event.path.display());
            }
        }
        Notice::Status(ConnectionState::Rejected) => {
            eprintln!("{}", SyncError::ConnectionRejected { retry_after: None });
            eprintln!("Press Enter to retry.");
        }
        Notice::Status(state) => eprintln!("[{state:?}]"),
    }
    Ok(())
}
