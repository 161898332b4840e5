//! Client side of synchronization.
//!
//! A process creates one [`ConnectionManager`]; each view creates a
//! [`ReconciliationEngine`] that listens through it.

mod connection;
pub mod cursor;
mod error;
mod reconcile;
mod transport;

pub use connection::{ConnectionManager, ConnectionState, Notice, Subscription, backoff_delay};
pub use cursor::{Position, Selection, remap_selection, resolve_position};
pub use error::{ClientError, ReconcileError};
pub use reconcile::{
    DocumentSurface, ListenerHandle, ReconcileAction, ReconciliationEngine, TextBuffer, ViewSnapshot,
    decide,
};
pub use transport::{Connector, Link, LinkFrame, WsConnector};
