//! A waiting line of tracks, one per player.

use std::collections::VecDeque;
use std::ops::Index;

use rand::seq::SliceRandom;

use crate::error::{Error, Result};
use crate::track::{Playlist, Track};

/// FIFO track queue with an optional size cap.
///
/// The queue does not drive playback by itself; pull the next track with
/// [`TrackQueue::next`] when a `TrackEndEvent` says another one may start.
#[derive(Debug, Clone, Default)]
pub struct TrackQueue {
    tracks: VecDeque<Track>,
    max_size: Option<usize>,
}

impl TrackQueue {
    /// Creates an unbounded queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a queue that holds at most `max_size` tracks.
    pub fn bounded(max_size: usize) -> Self {
        Self {
            tracks: VecDeque::with_capacity(max_size.min(512)),
            max_size: Some(max_size),
        }
    }

    /// Appends a track to the back of the queue.
    ///
    /// When the queue is full and `discard` is set, the track at the back
    /// is evicted to make room and returned; otherwise adding to a full
    /// queue fails with [`Error::QueueFull`].
    pub fn add(&mut self, track: Track, discard: bool) -> Result<Option<Track>> {
        let evicted = if self.is_full() {
            if !discard {
                return Err(Error::QueueFull {
                    max_size: self.max_size.unwrap_or(0),
                });
            }
            self.tracks.pop_back()
        } else {
            None
        };
        self.tracks.push_back(track);
        Ok(evicted)
    }

    /// Appends every track in order, evicting from the back as needed
    /// when `discard` is set. Returns the evicted tracks.
    pub fn extend(
        &mut self,
        tracks: impl IntoIterator<Item = Track>,
        discard: bool,
    ) -> Result<Vec<Track>> {
        let mut evicted = Vec::new();
        for track in tracks {
            if let Some(old) = self.add(track, discard)? {
                evicted.push(old);
            }
        }
        Ok(evicted)
    }

    /// Appends a whole playlist, in its original order.
    pub fn add_playlist(&mut self, playlist: Playlist, discard: bool) -> Result<Vec<Track>> {
        self.extend(playlist, discard)
    }

    /// Takes the next track from the front of the queue.
    pub fn next(&mut self) -> Option<Track> {
        self.tracks.pop_front()
    }

    /// Removes and returns the most recently added track.
    pub fn pop(&mut self) -> Option<Track> {
        self.tracks.pop_back()
    }

    /// Inserts a track at `index`, shifting later tracks back. Errors
    /// when the queue is full or the index is past the end.
    pub fn insert(&mut self, index: usize, track: Track) -> Result<()> {
        if self.is_full() {
            return Err(Error::QueueFull {
                max_size: self.max_size.unwrap_or(0),
            });
        }
        if index > self.tracks.len() {
            return Err(Error::invalid(format!(
                "insert index {index} out of range (len {})",
                self.tracks.len()
            )));
        }
        self.tracks.insert(index, track);
        Ok(())
    }

    /// Removes and returns the track at `index`, if any.
    pub fn remove(&mut self, index: usize) -> Option<Track> {
        self.tracks.remove(index)
    }

    pub fn clear(&mut self) {
        self.tracks.clear();
    }

    /// Shuffles the queue in place.
    pub fn shuffle(&mut self) {
        self.tracks
            .make_contiguous()
            .shuffle(&mut rand::thread_rng());
    }

    pub fn get(&self, index: usize) -> Option<&Track> {
        self.tracks.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Track> {
        self.tracks.iter()
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.max_size
            .is_some_and(|max| self.tracks.len() >= max)
    }

    pub fn max_size(&self) -> Option<usize> {
        self.max_size
    }
}

impl Index<usize> for TrackQueue {
    type Output = Track;

    fn index(&self, index: usize) -> &Self::Output {
        &self.tracks[index]
    }
}

impl IntoIterator for TrackQueue {
    type Item = Track;
    type IntoIter = std::collections::vec_deque::IntoIter<Track>;

    fn into_iter(self) -> Self::IntoIter {
        self.tracks.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{TrackInfo, TrackPayload};
    use pretty_assertions::assert_eq;

    fn track(title: &str) -> Track {
        Track::new(TrackPayload {
            track: format!("encoded-{title}"),
            info: TrackInfo {
                title: title.to_string(),
                author: Some("author".to_string()),
                uri: Some(format!("https://example.com/{title}")),
                identifier: Some(title.to_string()),
                length: 1000,
                position: None,
                source_name: None,
                is_stream: false,
                is_seekable: true,
            },
        })
    }

    #[test]
    fn test_fifo_order() {
        let mut queue = TrackQueue::new();
        queue.add(track("a"), false).unwrap();
        queue.add(track("b"), false).unwrap();

        assert_eq!(queue.next().unwrap().title(), "a");
        assert_eq!(queue.next().unwrap().title(), "b");
        assert!(queue.next().is_none());
    }

    #[test]
    fn test_full_queue_rejects_without_discard() {
        let mut queue = TrackQueue::bounded(1);
        queue.add(track("a"), false).unwrap();

        let err = queue.add(track("b"), false).unwrap_err();
        assert!(matches!(err, Error::QueueFull { max_size: 1 }));
        assert_eq!(queue[0].title(), "a");
    }

    #[test]
    fn test_full_queue_evicts_back_with_discard() {
        let mut queue = TrackQueue::bounded(2);
        queue.add(track("a"), false).unwrap();
        queue.add(track("b"), false).unwrap();

        let evicted = queue.add(track("c"), true).unwrap();
        assert_eq!(evicted.unwrap().title(), "b");
        assert_eq!(queue.len(), 2);
        assert_eq!(queue[0].title(), "a");
        assert_eq!(queue[1].title(), "c");
    }

    #[test]
    fn test_extend_reports_evictions() {
        let mut queue = TrackQueue::bounded(2);
        let evicted = queue
            .extend([track("a"), track("b"), track("c")], true)
            .unwrap();
        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].title(), "b");
    }

    #[test]
    fn test_insert_and_remove() {
        let mut queue = TrackQueue::new();
        queue.add(track("a"), false).unwrap();
        queue.add(track("c"), false).unwrap();
        queue.insert(1, track("b")).unwrap();

        assert_eq!(queue[1].title(), "b");
        assert!(queue.insert(10, track("x")).is_err());

        let removed = queue.remove(1).unwrap();
        assert_eq!(removed.title(), "b");
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_shuffle_preserves_contents() {
        let mut queue = TrackQueue::new();
        for id in ["a", "b", "c", "d", "e"] {
            queue.add(track(id), false).unwrap();
        }
        queue.shuffle();

        let mut ids: Vec<&str> = queue.iter().map(Track::title).collect();
        ids.sort_unstable();
        assert_eq!(ids, vec!["a", "b", "c", "d", "e"]);
    }
}
