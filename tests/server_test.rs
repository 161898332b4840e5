//! End to end over a real socket: hub, file API and client connection.

#![cfg(feature = "http-server")]

use std::path::PathBuf;
use std::time::Duration;

use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::time::timeout;

use tabsync::client::{ConnectionManager, ConnectionState, Notice, Subscription, WsConnector};
use tabsync::config::{ClientConfig, Settings};
use tabsync::files::{FileApi, FileApiError, HttpFileApi};
use tabsync::protocol::{OriginTag, ServerMessage};
use tabsync::server::{self, AppState};

async fn start_hub(max_connections: usize) -> String {
    let mut settings = Settings::default();
    settings.server.max_connections = max_connections;
    settings.watch.debounce_ms = 150;

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(server::run(listener, AppState::new(&settings)));
    format!("127.0.0.1:{}", addr.port())
}

fn manager_for(addr: &str, root: &std::path::Path) -> ConnectionManager {
    let connector = WsConnector::new(&format!("ws://{addr}/ws"), root).unwrap();
    let config = ClientConfig {
        ping_interval_ms: 0,
        ..ClientConfig::default()
    };
    ConnectionManager::new(connector, config)
}

async fn wait_for_state(manager: &ConnectionManager, state: ConnectionState) {
    let mut status = manager.status();
    timeout(Duration::from_secs(5), status.wait_for(|s| *s == state))
        .await
        .unwrap_or_else(|_| panic!("never reached {state:?}"))
        .unwrap();
}

async fn next_change(subscription: &mut Subscription, path: &PathBuf) -> ServerMessage {
    timeout(Duration::from_secs(5), async {
        loop {
            match subscription.recv().await {
                Some(Notice::Message(message)) if message.path() == Some(path.as_path()) => {
                    return message;
                }
                Some(_) => continue,
                None => panic!("subscription closed"),
            }
        }
    })
    .await
    .expect("no change event")
}

#[tokio::test]
async fn test_save_through_api_reaches_subscribers_with_origin() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().canonicalize().unwrap();
    let addr = start_hub(8).await;

    let manager = manager_for(&addr, &root);
    let mut subscription = manager.subscribe();
    wait_for_state(&manager, ConnectionState::Connected).await;
    tokio::time::sleep(Duration::from_millis(400)).await;

    let files = HttpFileApi::new(&format!("http://{addr}"), Duration::from_secs(5))
        .unwrap()
        .with_origin(OriginTag::new("tab-1"));
    let file = root.join("readme.md");
    files.write(&file, "# hello").await.unwrap();

    match next_change(&mut subscription, &file).await {
        ServerMessage::ContentChanged { origin_tag, .. } => {
            assert_eq!(origin_tag, Some(OriginTag::new("tab-1")));
        }
        other => panic!("unexpected {other:?}"),
    }

    let content = files.read(&file).await.unwrap();
    assert_eq!(content.content, "# hello");
    assert!(!content.is_binary);

    let tree = files.list(&root).await.unwrap();
    assert_eq!(tree.entry_count(), 1);
}

#[tokio::test]
async fn test_missing_file_maps_to_not_found() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().canonicalize().unwrap();
    let addr = start_hub(8).await;

    let files = HttpFileApi::new(&format!("http://{addr}"), Duration::from_secs(5)).unwrap();
    let err = files.read(&root.join("nope.txt")).await.unwrap_err();
    assert!(matches!(err, FileApiError::Service { status: 404, .. }), "{err:?}");
}

#[tokio::test]
async fn test_connection_over_ceiling_is_rejected() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().canonicalize().unwrap();
    let addr = start_hub(1).await;

    let first = manager_for(&addr, &root);
    let _first_sub = first.subscribe();
    wait_for_state(&first, ConnectionState::Connected).await;

    let second = manager_for(&addr, &root);
    let _second_sub = second.subscribe();
    wait_for_state(&second, ConnectionState::Rejected).await;
    assert_eq!(second.links_opened(), 1);

    // No automatic reconnection while rejected
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(second.state(), ConnectionState::Rejected);
    assert_eq!(second.links_opened(), 1);
    assert!(second.retry().is_err());
}

#[tokio::test]
async fn test_health_and_status() {
    let addr = start_hub(4).await;
    let client = reqwest::Client::new();

    let health = client
        .get(format!("http://{addr}/health"))
        .send()
        .await
        .unwrap();
    assert_eq!(health.text().await.unwrap(), "OK");

    let status: serde_json::Value = client
        .get(format!("http://{addr}/api/status"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["maxConnections"], 4);
    assert_eq!(status["connections"], 0);
}
