//! Change broadcast hub.
//!
//! Owns every client connection and one watch subscription per distinct
//! root. Raw filesystem notifications are debounced per path, compared
//! against the last broadcast state and fanned out to the connections
//! whose root contains the path.
//!
//! ```text
//! FsWatcher ─┐
//!            ├─> ChangeNormalizer ─> Hub::broadcast_from ─> Connection queues
//! claims  ───┘        (origin tags from OriginClaims)
//! ```

mod broadcast;
mod error;
mod normalize;
mod origin;
mod subscription;

pub use broadcast::{
    Connection, ConnectionId, Handshake, Hub, HubSettings, WeakHub,
};
pub use error::{HubError, HubResult};
pub use normalize::ChangeNormalizer;
pub use origin::OriginClaims;
