//! Guild players.
//!
//! A [`Player`] is a cheap cloneable handle to the playback state of one
//! guild on one node. It does not talk to the Discord gateway itself:
//! forward the gateway's `VOICE_SERVER_UPDATE` and `VOICE_STATE_UPDATE`
//! payloads via [`Player::voice_server_update`] and
//! [`Player::voice_state_update`] and the node takes the voice connection
//! from there.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tracing::debug;

use crate::error::{Error, Result};
use crate::filters::{Filter, FilterKind, FilterSink};
use crate::node::Node;
use crate::protocol::{OutgoingMessage, PlayerUpdateState, VoiceServerEvent};
use crate::track::Track;

const MAX_VOLUME: u16 = 1000;

/// Handle to the audio player of a single guild.
#[derive(Clone)]
pub struct Player {
    inner: Arc<PlayerInner>,
}

struct PlayerInner {
    node: Node,
    guild_id: u64,
    state: RwLock<PlayerState>,
}

#[derive(Default)]
struct PlayerState {
    track: Option<Track>,
    paused: bool,
    volume: u16,
    filters: FilterSink,
    session_id: Option<String>,
    voice_event: Option<VoiceServerEvent>,
    channel_id: Option<u64>,
    connected: bool,
    last_position: u64,
    last_update: Option<Instant>,
}

/// Options for [`Player::play`].
#[derive(Debug, Clone, Default)]
pub struct PlayOptions {
    /// Where to start playback. Defaults to the beginning.
    pub start: Option<Duration>,
    /// Where to stop playback. Defaults to the end of the track.
    pub end: Option<Duration>,
    /// Initial volume, `0..=1000`. Defaults to the player's current one.
    pub volume: Option<u16>,
    /// Replace the current track if one is playing. When false and a
    /// track is already playing, the node ignores the request.
    pub replace: bool,
    /// Start paused.
    pub pause: bool,
}

impl PlayOptions {
    pub fn new() -> Self {
        Self {
            replace: true,
            ..Self::default()
        }
    }

    fn validate(&self) -> Result<()> {
        if let Some(volume) = self.volume {
            if volume > MAX_VOLUME {
                return Err(Error::invalid(format!(
                    "volume must be at most {MAX_VOLUME}, got {volume}"
                )));
            }
        }
        if let (Some(start), Some(end)) = (self.start, self.end) {
            if end <= start {
                return Err(Error::invalid(
                    "end time must come after the start time",
                ));
            }
        }
        Ok(())
    }
}

impl Player {
    pub(crate) fn new(node: Node, guild_id: u64) -> Self {
        Self {
            inner: Arc::new(PlayerInner {
                node,
                guild_id,
                state: RwLock::new(PlayerState {
                    volume: 100,
                    ..PlayerState::default()
                }),
            }),
        }
    }

    /// The node this player runs on.
    pub fn node(&self) -> &Node {
        &self.inner.node
    }

    pub fn guild_id(&self) -> u64 {
        self.inner.guild_id
    }

    /// The track currently loaded on the player, if any.
    pub fn track(&self) -> Option<Track> {
        self.inner.state.read().track.clone()
    }

    pub fn is_paused(&self) -> bool {
        self.inner.state.read().paused
    }

    /// Player-level volume, `0..=1000`, default `100`.
    pub fn volume(&self) -> u16 {
        self.inner.state.read().volume
    }

    /// Voice channel the player was last seen in.
    pub fn channel_id(&self) -> Option<u64> {
        self.inner.state.read().channel_id
    }

    /// Whether both halves of the voice handshake have been supplied, so
    /// the node can (or already does) hold a voice connection.
    pub fn is_connected(&self) -> bool {
        let state = self.inner.state.read();
        state.session_id.is_some() && state.voice_event.is_some()
    }

    /// Estimated playback position, interpolated from the node's last
    /// `playerUpdate`. Frozen while the player is paused and clamped to
    /// the track's duration.
    pub fn position(&self) -> Duration {
        let state = self.inner.state.read();
        let mut position = state.last_position;
        if !state.paused {
            if let Some(updated) = state.last_update {
                position += updated.elapsed().as_millis() as u64;
            }
        }
        if let Some(track) = &state.track {
            if !track.is_stream() {
                position = position.min(track.duration().as_millis() as u64);
            }
        }
        Duration::from_millis(position)
    }

    /// Forwards a Discord `VOICE_SERVER_UPDATE` for this guild. Completes
    /// the handshake and tells the node when the session half is already
    /// known.
    pub async fn voice_server_update(
        &self,
        token: impl Into<String>,
        endpoint: Option<String>,
    ) -> Result<()> {
        let update = {
            let mut state = self.inner.state.write();
            state.voice_event = Some(VoiceServerEvent {
                token: token.into(),
                guild_id: self.inner.guild_id.to_string(),
                endpoint,
            });
            self.pending_voice_update(&state)
        };
        self.flush_voice_update(update).await
    }

    /// Forwards the bot's `VOICE_STATE_UPDATE` for this guild. A `None`
    /// channel means the bot left voice and clears the session.
    pub async fn voice_state_update(
        &self,
        session_id: impl Into<String>,
        channel_id: Option<u64>,
    ) -> Result<()> {
        let update = {
            let mut state = self.inner.state.write();
            match channel_id {
                Some(channel) => {
                    state.session_id = Some(session_id.into());
                    state.channel_id = Some(channel);
                    self.pending_voice_update(&state)
                }
                None => {
                    state.session_id = None;
                    state.voice_event = None;
                    state.channel_id = None;
                    state.connected = false;
                    None
                }
            }
        };
        self.flush_voice_update(update).await
    }

    fn pending_voice_update(&self, state: &PlayerState) -> Option<OutgoingMessage> {
        let session_id = state.session_id.clone()?;
        let event = state.voice_event.clone()?;
        Some(OutgoingMessage::VoiceUpdate {
            guild_id: self.inner.guild_id.to_string(),
            session_id,
            event,
        })
    }

    async fn flush_voice_update(&self, update: Option<OutgoingMessage>) -> Result<()> {
        if let Some(message) = update {
            debug!(guild_id = self.inner.guild_id, "forwarding voice update");
            self.inner.node.send(message).await?;
        }
        Ok(())
    }

    /// Plays a track, replacing whatever is playing unless
    /// [`PlayOptions::replace`] says otherwise.
    pub async fn play(&self, track: &Track, options: PlayOptions) -> Result<()> {
        options.validate()?;
        if !self.is_connected() {
            return Err(Error::NotConnected(self.inner.guild_id));
        }

        let message = OutgoingMessage::Play {
            guild_id: self.inner.guild_id.to_string(),
            track: track.id().to_string(),
            start_time: options.start.map_or(0, |d| d.as_millis() as u64),
            end_time: options.end.map(|d| d.as_millis() as u64),
            volume: options.volume,
            no_replace: !options.replace,
            pause: options.pause,
        };
        self.inner.node.send(message).await?;

        let mut state = self.inner.state.write();
        state.track = Some(track.clone());
        state.paused = options.pause;
        if let Some(volume) = options.volume {
            state.volume = volume;
        }
        state.last_position = options.start.map_or(0, |d| d.as_millis() as u64);
        state.last_update = Some(Instant::now());
        Ok(())
    }

    /// Stops the current track without disconnecting.
    pub async fn stop(&self) -> Result<()> {
        self.inner
            .node
            .send(OutgoingMessage::Stop {
                guild_id: self.inner.guild_id.to_string(),
            })
            .await?;
        self.inner.state.write().track = None;
        Ok(())
    }

    pub async fn set_paused(&self, paused: bool) -> Result<()> {
        self.inner
            .node
            .send(OutgoingMessage::Pause {
                guild_id: self.inner.guild_id.to_string(),
                pause: paused,
            })
            .await?;
        let mut state = self.inner.state.write();
        // Snapshot the interpolated position so it freezes cleanly.
        if let Some(updated) = state.last_update.take() {
            if !state.paused {
                state.last_position += updated.elapsed().as_millis() as u64;
            }
        }
        state.paused = paused;
        state.last_update = Some(Instant::now());
        Ok(())
    }

    pub async fn pause(&self) -> Result<()> {
        self.set_paused(true).await
    }

    pub async fn resume(&self) -> Result<()> {
        self.set_paused(false).await
    }

    /// Flips the pause state and returns the new one.
    pub async fn toggle_pause(&self) -> Result<bool> {
        let paused = !self.is_paused();
        self.set_paused(paused).await?;
        Ok(paused)
    }

    /// Seeks to a position in the current track.
    pub async fn seek(&self, position: Duration) -> Result<()> {
        self.inner
            .node
            .send(OutgoingMessage::Seek {
                guild_id: self.inner.guild_id.to_string(),
                position: position.as_millis() as u64,
            })
            .await?;
        let mut state = self.inner.state.write();
        state.last_position = position.as_millis() as u64;
        state.last_update = Some(Instant::now());
        Ok(())
    }

    /// Sets the player volume, `0..=1000`.
    pub async fn set_volume(&self, volume: u16) -> Result<()> {
        if volume > MAX_VOLUME {
            return Err(Error::invalid(format!(
                "volume must be at most {MAX_VOLUME}, got {volume}"
            )));
        }
        self.inner
            .node
            .send(OutgoingMessage::Volume {
                guild_id: self.inner.guild_id.to_string(),
                volume,
            })
            .await?;
        self.inner.state.write().volume = volume;
        Ok(())
    }

    /// Snapshot of the player's filter sink.
    pub fn filters(&self) -> FilterSink {
        self.inner.state.read().filters.clone()
    }

    /// Mutates the filter sink locally without touching the node. Call
    /// [`Player::apply_filters`] to push the result in one round trip.
    pub fn edit_filters(&self, edit: impl FnOnce(&mut FilterSink)) {
        edit(&mut self.inner.state.write().filters);
    }

    /// Pushes the accumulated filter state to the node as a single
    /// `filters` op. Unset filters are sent with their defaults so that
    /// removed ones reset instead of lingering.
    pub async fn apply_filters(&self) -> Result<()> {
        let payload = self.inner.state.read().filters.to_payload();
        self.inner
            .node
            .send(OutgoingMessage::Filters {
                guild_id: self.inner.guild_id.to_string(),
                payload,
            })
            .await
    }

    /// Adds filters and applies the sink immediately.
    pub async fn add_filters(
        &self,
        filters: impl IntoIterator<Item = Filter>,
    ) -> Result<()> {
        self.edit_filters(|sink| {
            for filter in filters {
                sink.add(filter);
            }
        });
        self.apply_filters().await
    }

    /// Removes filters by kind and applies the sink immediately.
    pub async fn remove_filters(
        &self,
        kinds: impl IntoIterator<Item = FilterKind>,
    ) -> Result<()> {
        self.edit_filters(|sink| {
            for kind in kinds {
                sink.remove(kind);
            }
        });
        self.apply_filters().await
    }

    /// Replaces the sink's contents and applies it immediately.
    pub async fn overwrite_filters(
        &self,
        filters: impl IntoIterator<Item = Filter>,
    ) -> Result<()> {
        self.edit_filters(|sink| sink.overwrite(filters));
        self.apply_filters().await
    }

    /// Clears all filters and resets the node to defaults.
    pub async fn clear_filters(&self) -> Result<()> {
        self.edit_filters(FilterSink::clear);
        self.apply_filters().await
    }

    /// Destroys the player on the node and removes it from the node's
    /// player registry. The handle is dead afterwards.
    pub async fn destroy(&self) -> Result<()> {
        self.inner
            .node
            .send(OutgoingMessage::Destroy {
                guild_id: self.inner.guild_id.to_string(),
            })
            .await?;
        self.inner.node.remove_player(self.inner.guild_id);
        Ok(())
    }

    /// The voice update the node needs to restore this guild's voice
    /// connection, used when a node session is re-established.
    pub(crate) fn voice_update_message(&self) -> Option<OutgoingMessage> {
        let state = self.inner.state.read();
        self.pending_voice_update(&state)
    }

    pub(crate) fn update_state(&self, update: &PlayerUpdateState) {
        let mut state = self.inner.state.write();
        state.last_position = update.position.unwrap_or(0);
        state.last_update = Some(Instant::now());
        if let Some(connected) = update.connected {
            state.connected = connected;
        }
    }

    pub(crate) fn clear_track(&self) {
        let mut state = self.inner.state.write();
        state.track = None;
        state.last_position = 0;
        state.last_update = None;
    }

    /// Drops the voice session after Discord closed the voice socket; the
    /// next pair of voice updates rebuilds it.
    pub(crate) fn clear_voice(&self) {
        let mut state = self.inner.state.write();
        state.session_id = None;
        state.voice_event = None;
        state.connected = false;
    }

    #[cfg(test)]
    pub(crate) fn seed_position(&self, position: Duration, paused: bool) {
        let mut state = self.inner.state.write();
        state.last_position = position.as_millis() as u64;
        state.last_update = Some(Instant::now());
        state.paused = paused;
    }

    #[cfg(test)]
    pub(crate) fn seed_track(&self, track: Track) {
        self.inner.state.write().track = Some(track);
    }
}

impl fmt::Debug for Player {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Player")
            .field("guild_id", &self.inner.guild_id)
            .field("node", &self.inner.node.identifier())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NodeConfig;
    use crate::protocol::{TrackInfo, TrackPayload};
    use pretty_assertions::assert_eq;

    fn test_player() -> Player {
        let node = Node::new(NodeConfig::builder(1).build(), None);
        Player::new(node, 42)
    }

    fn test_track(length_ms: u64) -> Track {
        Track::new(TrackPayload {
            track: "encoded".to_string(),
            info: TrackInfo {
                title: "song".to_string(),
                author: None,
                uri: None,
                identifier: None,
                length: length_ms,
                position: None,
                source_name: None,
                is_stream: false,
                is_seekable: true,
            },
        })
    }

    #[test]
    fn test_play_options_validation() {
        assert!(PlayOptions::new().validate().is_ok());

        let too_loud = PlayOptions {
            volume: Some(1001),
            ..PlayOptions::new()
        };
        assert!(too_loud.validate().is_err());

        let inverted = PlayOptions {
            start: Some(Duration::from_secs(10)),
            end: Some(Duration::from_secs(5)),
            ..PlayOptions::new()
        };
        assert!(inverted.validate().is_err());
    }

    #[test]
    fn test_position_frozen_while_paused() {
        let player = test_player();
        player.seed_position(Duration::from_secs(30), true);

        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(player.position(), Duration::from_secs(30));
    }

    #[test]
    fn test_position_advances_while_playing() {
        let player = test_player();
        player.seed_position(Duration::from_secs(30), false);

        std::thread::sleep(Duration::from_millis(30));
        assert!(player.position() > Duration::from_secs(30));
    }

    #[test]
    fn test_position_clamped_to_duration() {
        let player = test_player();
        player.seed_track(test_track(1000));
        player.seed_position(Duration::from_secs(10), false);

        assert_eq!(player.position(), Duration::from_millis(1000));
    }

    #[test]
    fn test_defaults() {
        let player = test_player();
        assert_eq!(player.volume(), 100);
        assert!(!player.is_paused());
        assert!(!player.is_connected());
        assert!(player.track().is_none());
    }

    #[tokio::test]
    async fn test_play_requires_voice_session() {
        let player = test_player();
        let err = player
            .play(&test_track(1000), PlayOptions::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotConnected(42)));
    }
}
