//! Event delivery from nodes to application code.
//!
//! Implement [`EventHandler`] and hand it to
//! [`NodePool::create_node`](crate::pool::NodePool::create_node) (or
//! [`Node::new`](crate::node::Node::new)); every method has a default
//! no-op body so handlers only spell out what they care about. Handlers
//! run on their own tasks, so a slow handler never stalls the node's
//! websocket listener.

use std::time::Duration;

use async_trait::async_trait;

use crate::node::Node;
use crate::player::Player;
use crate::protocol::{ErrorSeverity, TrackEndReason};
use crate::stats::Stats;

/// A track started playing.
#[derive(Debug, Clone)]
pub struct TrackStartEvent {
    /// The player the track started on.
    pub player: Player,
    /// Encoded id of the track.
    pub track_id: String,
}

/// A track stopped playing.
#[derive(Debug, Clone)]
pub struct TrackEndEvent {
    pub player: Player,
    pub track_id: String,
    /// Why the track ended.
    pub reason: TrackEndReason,
}

impl TrackEndEvent {
    /// Whether it is safe to start the next track, e.g. from a
    /// [`TrackQueue`](crate::queue::TrackQueue).
    pub fn may_start_next(&self) -> bool {
        self.reason.may_start_next()
    }
}

/// The node hit an error while playing a track.
#[derive(Debug, Clone)]
pub struct TrackExceptionEvent {
    pub player: Player,
    pub track_id: String,
    pub message: String,
    pub severity: ErrorSeverity,
    pub cause: Option<String>,
}

/// A track stopped producing audio frames for longer than the node's
/// configured threshold.
#[derive(Debug, Clone)]
pub struct TrackStuckEvent {
    pub player: Player,
    pub track_id: String,
    /// How long the track was stuck before the node gave up.
    pub threshold: Duration,
}

/// Discord closed the voice websocket for a guild. The player's voice
/// session is cleared before this fires; feed it fresh voice updates to
/// reconnect.
#[derive(Debug, Clone)]
pub struct WebSocketCloseEvent {
    pub player: Player,
    /// Discord voice close code (4xxx range for protocol errors).
    pub code: u16,
    pub reason: String,
    /// Whether Discord initiated the close.
    pub by_remote: bool,
}

/// Receives node lifecycle and playback events.
///
/// ```no_run
/// use async_trait::async_trait;
/// use tephra::events::{EventHandler, TrackEndEvent};
///
/// struct Handler;
///
/// #[async_trait]
/// impl EventHandler for Handler {
///     async fn track_end(&self, event: TrackEndEvent) {
///         if event.may_start_next() {
///             // pull the next track from your queue here
///         }
///     }
/// }
/// ```
#[async_trait]
pub trait EventHandler: Send + Sync + 'static {
    /// The node finished its websocket handshake. `resumed` is true when
    /// the node accepted the resume key and kept the previous session.
    async fn node_ready(&self, node: Node, resumed: bool) {
        let _ = (node, resumed);
    }

    /// The node pushed a fresh statistics frame.
    async fn stats_update(&self, node: Node, stats: Stats) {
        let _ = (node, stats);
    }

    async fn track_start(&self, event: TrackStartEvent) {
        let _ = event;
    }

    async fn track_end(&self, event: TrackEndEvent) {
        let _ = event;
    }

    async fn track_exception(&self, event: TrackExceptionEvent) {
        let _ = event;
    }

    async fn track_stuck(&self, event: TrackStuckEvent) {
        let _ = event;
    }

    async fn websocket_closed(&self, event: WebSocketCloseEvent) {
        let _ = event;
    }
}

/// Handler used when a node is created without one.
pub(crate) struct NoopHandler;

#[async_trait]
impl EventHandler for NoopHandler {}
