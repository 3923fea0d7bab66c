//! Wire model for the Lavalink v3 protocol.
//!
//! Everything the websocket and REST layers put on the wire (or read off
//! it) lives here as plain serde types. Field names follow the protocol's
//! camelCase convention; guild IDs travel as strings.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::stats::Stats;

/// A raw Discord `VOICE_SERVER_UPDATE` payload, forwarded verbatim to the
/// node so it can open the voice connection itself.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VoiceServerEvent {
    pub token: String,
    #[serde(rename = "guildId")]
    pub guild_id: String,
    pub endpoint: Option<String>,
}

/// Messages sent to the node over the websocket, tagged by op code.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum OutgoingMessage {
    #[serde(rename_all = "camelCase")]
    VoiceUpdate {
        guild_id: String,
        session_id: String,
        event: VoiceServerEvent,
    },
    #[serde(rename_all = "camelCase")]
    Play {
        guild_id: String,
        track: String,
        start_time: u64,
        #[serde(skip_serializing_if = "Option::is_none")]
        end_time: Option<u64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        volume: Option<u16>,
        no_replace: bool,
        pause: bool,
    },
    #[serde(rename_all = "camelCase")]
    Stop { guild_id: String },
    #[serde(rename_all = "camelCase")]
    Pause { guild_id: String, pause: bool },
    #[serde(rename_all = "camelCase")]
    Seek { guild_id: String, position: u64 },
    #[serde(rename_all = "camelCase")]
    Volume { guild_id: String, volume: u16 },
    #[serde(rename_all = "camelCase")]
    Destroy { guild_id: String },
    #[serde(rename_all = "camelCase")]
    Filters {
        guild_id: String,
        #[serde(flatten)]
        payload: Map<String, Value>,
    },
    ConfigureResuming { key: String, timeout: u64 },
}

/// Messages pushed by the node over the websocket, tagged by op code.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum IncomingMessage {
    #[serde(rename_all = "camelCase")]
    PlayerUpdate {
        guild_id: String,
        state: PlayerUpdateState,
    },
    Stats(Stats),
    Event(EventPayload),
}

/// The `state` object of a `playerUpdate` message.
#[derive(Debug, Clone, Deserialize)]
pub struct PlayerUpdateState {
    /// Unix timestamp of the update in milliseconds.
    pub time: u64,
    /// Track position in milliseconds. Absent when nothing is playing.
    #[serde(default)]
    pub position: Option<u64>,
    /// Whether the node holds a live voice connection for the player.
    #[serde(default)]
    pub connected: Option<bool>,
}

/// Backend-pushed events, tagged by their protocol type name.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum EventPayload {
    #[serde(rename = "TrackStartEvent", rename_all = "camelCase")]
    TrackStart { guild_id: String, track: String },
    #[serde(rename = "TrackEndEvent", rename_all = "camelCase")]
    TrackEnd {
        guild_id: String,
        track: String,
        reason: TrackEndReason,
    },
    #[serde(rename = "TrackExceptionEvent", rename_all = "camelCase")]
    TrackException {
        guild_id: String,
        track: String,
        exception: TrackException,
    },
    #[serde(rename = "TrackStuckEvent", rename_all = "camelCase")]
    TrackStuck {
        guild_id: String,
        track: String,
        threshold_ms: u64,
    },
    #[serde(rename = "WebSocketClosedEvent", rename_all = "camelCase")]
    WebSocketClosed {
        guild_id: String,
        code: u16,
        reason: String,
        #[serde(default)]
        by_remote: bool,
    },
}

impl EventPayload {
    /// The guild the event belongs to, parsed from the wire string.
    pub fn guild_id(&self) -> Option<u64> {
        let raw = match self {
            Self::TrackStart { guild_id, .. }
            | Self::TrackEnd { guild_id, .. }
            | Self::TrackException { guild_id, .. }
            | Self::TrackStuck { guild_id, .. }
            | Self::WebSocketClosed { guild_id, .. } => guild_id,
        };
        raw.parse().ok()
    }
}

/// The exception object attached to `TrackExceptionEvent` and failed loads.
#[derive(Debug, Clone, Deserialize)]
pub struct TrackException {
    pub message: String,
    pub severity: ErrorSeverity,
    #[serde(default)]
    pub cause: Option<String>,
}

/// How severe a playback or load exception is, as reported by the node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorSeverity {
    /// The cause is known and expected, e.g. an unavailable video.
    Common,
    /// The cause might not be caused by us.
    Suspicious,
    /// A bug inside the node or one of its dependencies.
    Fault,
}

/// Why a track stopped playing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrackEndReason {
    Finished,
    LoadFailed,
    Stopped,
    Replaced,
    Cleanup,
}

impl TrackEndReason {
    /// Whether it is safe for the player to start the next track.
    pub fn may_start_next(self) -> bool {
        matches!(self, Self::Finished | Self::LoadFailed)
    }
}

/// The outcome class of a `loadtracks` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LoadType {
    TrackLoaded,
    PlaylistLoaded,
    SearchResult,
    NoMatches,
    LoadFailed,
}

/// Response body of the `loadtracks` REST endpoint.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadResponse {
    pub load_type: LoadType,
    #[serde(default)]
    pub playlist_info: Option<PlaylistInfo>,
    #[serde(default)]
    pub tracks: Vec<TrackPayload>,
    #[serde(default)]
    pub exception: Option<TrackException>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaylistInfo {
    pub name: String,
    /// Index of the selected track, `-1` when none is selected.
    #[serde(default = "no_selected_track")]
    pub selected_track: i64,
}

fn no_selected_track() -> i64 {
    -1
}

/// One encoded track plus its decoded metadata, as returned by the node.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TrackPayload {
    pub track: String,
    pub info: TrackInfo,
}

/// Decoded track metadata.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackInfo {
    pub title: String,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub uri: Option<String>,
    #[serde(default)]
    pub identifier: Option<String>,
    /// Track length in milliseconds.
    pub length: u64,
    /// Current position in milliseconds, when applicable.
    #[serde(default)]
    pub position: Option<u64>,
    #[serde(default)]
    pub source_name: Option<LoadSource>,
    // Older node versions omit these two fields entirely.
    #[serde(default)]
    pub is_stream: bool,
    #[serde(default = "seekable_default")]
    pub is_seekable: bool,
}

fn seekable_default() -> bool {
    true
}

/// The platform a track was loaded from, as reported in `sourceName`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadSource {
    Youtube,
    Soundcloud,
    Bandcamp,
    Twitch,
    Vimeo,
    Http,
    Local,
    #[serde(other)]
    Unknown,
}

/// A search platform, used to prefix queries sent to `loadtracks`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Youtube,
    YoutubeMusic,
    SoundCloud,
    Spotify,
    Local,
}

impl Source {
    /// The query prefix the node understands for this platform.
    pub fn prefix(self) -> Option<&'static str> {
        match self {
            Self::Youtube => Some("ytsearch"),
            Self::YoutubeMusic => Some("ytmsearch"),
            Self::SoundCloud => Some("scsearch"),
            Self::Spotify => Some("spsearch"),
            // Local files are addressed by plain path, no prefix.
            Self::Local => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_play_message_shape() {
        let msg = OutgoingMessage::Play {
            guild_id: "123".into(),
            track: "QAAA...".into(),
            start_time: 5000,
            end_time: None,
            volume: Some(250),
            no_replace: false,
            pause: false,
        };

        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "op": "play",
                "guildId": "123",
                "track": "QAAA...",
                "startTime": 5000,
                "volume": 250,
                "noReplace": false,
                "pause": false,
            })
        );
    }

    #[test]
    fn test_filters_message_flattens_payload() {
        let mut payload = Map::new();
        payload.insert("volume".into(), serde_json::json!(0.5));

        let msg = OutgoingMessage::Filters {
            guild_id: "42".into(),
            payload,
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["op"], "filters");
        assert_eq!(value["guildId"], "42");
        assert_eq!(value["volume"], 0.5);
    }

    #[test]
    fn test_configure_resuming_op_name() {
        let msg = OutgoingMessage::ConfigureResuming {
            key: "abc".into(),
            timeout: 60,
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["op"], "configureResuming");
    }

    #[test]
    fn test_player_update_roundtrip() {
        let raw = r#"{"op":"playerUpdate","guildId":"123","state":{"time":1650000000000,"position":31000,"connected":true}}"#;
        let msg: IncomingMessage = serde_json::from_str(raw).unwrap();

        match msg {
            IncomingMessage::PlayerUpdate { guild_id, state } => {
                assert_eq!(guild_id, "123");
                assert_eq!(state.position, Some(31000));
                assert_eq!(state.connected, Some(true));
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn test_track_end_event() {
        let raw = r#"{"op":"event","type":"TrackEndEvent","guildId":"99","track":"xyz","reason":"FINISHED"}"#;
        let msg: IncomingMessage = serde_json::from_str(raw).unwrap();

        match msg {
            IncomingMessage::Event(event) => {
                assert_eq!(event.guild_id(), Some(99));
                match event {
                    EventPayload::TrackEnd { reason, .. } => {
                        assert_eq!(reason, TrackEndReason::Finished);
                        assert!(reason.may_start_next());
                    }
                    other => panic!("unexpected event: {other:?}"),
                }
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn test_websocket_closed_event_defaults() {
        let raw = r#"{"op":"event","type":"WebSocketClosedEvent","guildId":"7","code":4006,"reason":"Session invalid"}"#;
        let msg: IncomingMessage = serde_json::from_str(raw).unwrap();

        match msg {
            IncomingMessage::Event(EventPayload::WebSocketClosed {
                code, by_remote, ..
            }) => {
                assert_eq!(code, 4006);
                assert!(!by_remote);
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn test_load_response_playlist() {
        let raw = r#"{
            "loadType": "PLAYLIST_LOADED",
            "playlistInfo": {"name": "Mix", "selectedTrack": 1},
            "tracks": [
                {"track": "aaa", "info": {"title": "one", "length": 1000}},
                {"track": "bbb", "info": {"title": "two", "length": 2000, "sourceName": "youtube"}}
            ]
        }"#;

        let response: LoadResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(response.load_type, LoadType::PlaylistLoaded);
        assert_eq!(response.playlist_info.unwrap().selected_track, 1);
        assert_eq!(response.tracks.len(), 2);
        assert_eq!(
            response.tracks[1].info.source_name,
            Some(LoadSource::Youtube)
        );
        // Missing flags fall back to non-stream, seekable.
        assert!(!response.tracks[0].info.is_stream);
        assert!(response.tracks[0].info.is_seekable);
    }

    #[test]
    fn test_unknown_load_source_tolerated() {
        let raw = r#"{"title": "x", "length": 1, "sourceName": "somefutureplatform"}"#;
        let info: TrackInfo = serde_json::from_str(raw).unwrap();
        assert_eq!(info.source_name, Some(LoadSource::Unknown));
    }

    #[test]
    fn test_source_prefixes() {
        assert_eq!(Source::Youtube.prefix(), Some("ytsearch"));
        assert_eq!(Source::YoutubeMusic.prefix(), Some("ytmsearch"));
        assert_eq!(Source::SoundCloud.prefix(), Some("scsearch"));
        assert_eq!(Source::Local.prefix(), None);
    }
}
