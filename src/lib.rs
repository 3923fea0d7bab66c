//! # tephra
//!
//! Async client for Lavalink-compatible audio nodes.
//!
//! The crate does not talk to the Discord gateway itself; it manages the
//! node side of the voice handoff. Your gateway library of choice feeds
//! each player the guild's `VOICE_SERVER_UPDATE` / `VOICE_STATE_UPDATE`
//! payloads and the node takes over from there.
//!
//! ## Architecture
//!
//! - [`NodePool`] — registry of nodes; routes guilds to the least-loaded
//!   node, optionally by voice region
//! - [`Node`] — one websocket + REST connection to a backend node; loads
//!   and decodes tracks, owns the players of its guilds
//! - [`Player`] — playback control for one guild: play, pause, seek,
//!   volume, filters
//! - [`FilterSink`] — batched filter state, pushed in one round trip
//! - [`TrackQueue`] — optional FIFO queue to drive from track-end events
//! - [`EventHandler`] — trait your application implements to receive
//!   playback and lifecycle events
//!
//! ## Example
//!
//! ```no_run
//! use tephra::{NodeConfig, NodePool, PlayOptions, Source};
//!
//! # async fn run() -> tephra::Result<()> {
//! let pool = NodePool::new();
//! let node = pool
//!     .start_node(NodeConfig::from_env()?, None)
//!     .await?;
//!
//! let player = node.player(123456789012345678);
//! // ... feed the player its voice updates from your gateway ...
//!
//! if let Some(track) = node
//!     .search_track("never gonna give you up", Some(Source::Youtube))
//!     .await?
//! {
//!     player.play(&track, PlayOptions::new()).await?;
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod events;
pub mod filters;
pub mod node;
pub mod player;
pub mod pool;
pub mod protocol;
pub mod queue;
pub mod stats;
pub mod track;

pub use config::{NodeConfig, NodeConfigBuilder};
pub use error::{Error, Result};
pub use events::EventHandler;
pub use filters::{Equalizer, Filter, FilterKind, FilterSink, Pitch, Timescale, VolumeFilter};
pub use node::{Node, SearchOptions, SearchResult};
pub use player::{PlayOptions, Player};
pub use pool::NodePool;
pub use protocol::{ErrorSeverity, LoadSource, Source, TrackEndReason};
pub use queue::TrackQueue;
pub use stats::Stats;
pub use track::{Playlist, Track};
