//! Tracks and playlists returned by the node's REST API.

use std::time::Duration;

use crate::protocol::{LoadSource, PlaylistInfo, TrackInfo, TrackPayload};

/// A playable track: the node's opaque encoded id plus its decoded
/// metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct Track {
    id: String,
    info: TrackInfo,
}

impl Track {
    pub(crate) fn new(payload: TrackPayload) -> Self {
        Self {
            id: payload.track,
            info: payload.info,
        }
    }

    /// The base64 id the node uses to reference this track.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn title(&self) -> &str {
        &self.info.title
    }

    pub fn author(&self) -> Option<&str> {
        self.info.author.as_deref()
    }

    pub fn uri(&self) -> Option<&str> {
        self.info.uri.as_deref()
    }

    /// Source-specific identifier, e.g. the YouTube video id.
    pub fn identifier(&self) -> Option<&str> {
        self.info.identifier.as_deref()
    }

    /// Total length of the track. Meaningless for streams.
    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.info.length)
    }

    /// Position the node reported when the track was decoded.
    pub fn position(&self) -> Duration {
        Duration::from_millis(self.info.position.unwrap_or(0))
    }

    pub fn source(&self) -> Option<LoadSource> {
        self.info.source_name
    }

    pub fn is_stream(&self) -> bool {
        self.info.is_stream
    }

    pub fn is_seekable(&self) -> bool {
        self.info.is_seekable
    }

    /// Thumbnail URL, for sources that expose one.
    pub fn thumbnail(&self) -> Option<String> {
        match (self.info.source_name, self.info.identifier.as_deref()) {
            (Some(LoadSource::Youtube), Some(id)) => {
                Some(format!("https://i.ytimg.com/vi/{id}/hq720.jpg"))
            }
            _ => None,
        }
    }
}

/// An ordered collection of tracks loaded as one unit.
#[derive(Debug, Clone, PartialEq)]
pub struct Playlist {
    name: String,
    selected: Option<usize>,
    tracks: Vec<Track>,
}

impl Playlist {
    pub(crate) fn new(info: PlaylistInfo, tracks: Vec<TrackPayload>) -> Self {
        let tracks: Vec<Track> = tracks.into_iter().map(Track::new).collect();
        let selected = usize::try_from(info.selected_track)
            .ok()
            .filter(|&index| index < tracks.len());
        Self {
            name: info.name,
            selected,
            tracks,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn first(&self) -> Option<&Track> {
        self.tracks.first()
    }

    /// The track the load request pointed at, when the source URL carried
    /// a selection (e.g. a `?v=` parameter inside a playlist link).
    pub fn selected_track(&self) -> Option<&Track> {
        self.selected.and_then(|index| self.tracks.get(index))
    }

    pub fn select(&self, index: usize) -> Option<&Track> {
        self.tracks.get(index)
    }

    /// Source of the playlist, taken from its first track.
    pub fn source(&self) -> Option<LoadSource> {
        self.first().and_then(Track::source)
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    /// Consumes the playlist, yielding its tracks.
    pub fn into_tracks(self) -> Vec<Track> {
        self.tracks
    }
}

impl IntoIterator for Playlist {
    type Item = Track;
    type IntoIter = std::vec::IntoIter<Track>;

    fn into_iter(self) -> Self::IntoIter {
        self.tracks.into_iter()
    }
}

impl<'a> IntoIterator for &'a Playlist {
    type Item = &'a Track;
    type IntoIter = std::slice::Iter<'a, Track>;

    fn into_iter(self) -> Self::IntoIter {
        self.tracks.iter()
    }
}
