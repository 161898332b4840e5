//! Workspace synchronization for multi-tab directory viewers.
//!
//! The server side ([`hub`], [`watcher`], [`server`]) turns filesystem
//! activity under a root into debounced change events and fans them out to
//! every connected viewer. The client side ([`client`]) keeps one shared
//! connection per process and reconciles each open view with those events
//! without clobbering the user's cursor.

pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod files;
pub mod hub;
pub mod logging;
pub mod protocol;
#[cfg(feature = "http-server")]
pub mod server;
pub mod watcher;

pub use client::{ConnectionManager, ConnectionState, Notice, ReconciliationEngine};
pub use config::Settings;
pub use error::SyncError;
pub use hub::{Connection, Handshake, Hub, HubSettings};
pub use protocol::{ChangeEvent, ChangeKind, ClientMessage, OriginTag, ServerMessage};
