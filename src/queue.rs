use std::collections::VecDeque;

use crate::error::{PlayerError, Result};
use crate::models::Track;

/// Pending tracks of one guild, in play order.
///
/// Positions reported to users are 1-based.
#[derive(Debug, Default)]
pub struct PlaybackQueue {
    tracks: VecDeque<Track>,
}

impl PlaybackQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, track: Track) {
        self.tracks.push_back(track);
    }

    pub fn pop_front(&mut self) -> Option<Track> {
        self.tracks.pop_front()
    }

    /// Removes the track at the 1-based `position`, leaving the queue untouched
    /// when the position is out of range.
    pub fn remove(&mut self, position: usize) -> Result<Track> {
        let len = self.tracks.len();

        if position == 0 || position > len {
            return Err(PlayerError::IndexOutOfRange { position, len });
        }

        self.tracks
            .remove(position - 1)
            .ok_or(PlayerError::IndexOutOfRange { position, len })
    }

    pub fn clear(&mut self) {
        self.tracks.clear();
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Track> {
        self.tracks.iter()
    }

    /// Copy of the pending tracks with their current 1-based positions.
    pub fn positions(&self) -> Vec<(usize, Track)> {
        self.tracks
            .iter()
            .cloned()
            .enumerate()
            .map(|(index, track)| (index + 1, track))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TrackInfo;

    fn track(title: &str) -> Track {
        Track::new(
            TrackInfo {
                title: title.to_string(),
                url: format!("https://example.com/{title}"),
                duration: None,
            },
            7,
        )
    }

    fn titles(queue: &PlaybackQueue) -> Vec<String> {
        queue.iter().map(|t| t.title.clone()).collect()
    }

    #[test]
    fn pops_in_insertion_order() {
        let mut queue = PlaybackQueue::new();
        queue.push(track("a"));
        queue.push(track("b"));

        assert_eq!(queue.pop_front().map(|t| t.title), Some("a".to_string()));
        assert_eq!(queue.pop_front().map(|t| t.title), Some("b".to_string()));
        assert!(queue.pop_front().is_none());
    }

    #[test]
    fn remove_keeps_identity_of_other_entries() {
        let mut queue = PlaybackQueue::new();
        let (a, b, c) = (track("a"), track("b"), track("c"));
        let c_id = c.id;
        queue.push(a);
        queue.push(b);
        queue.push(c);

        let removed = queue.remove(2).unwrap();
        assert_eq!(removed.title, "b");

        let positions = queue.positions();
        assert_eq!(positions[1].0, 2);
        assert_eq!(positions[1].1.id, c_id);
    }

    #[test]
    fn remove_out_of_range_does_not_mutate() {
        let mut queue = PlaybackQueue::new();
        queue.push(track("a"));
        queue.push(track("b"));

        for position in [0, 3, 100] {
            assert_eq!(
                queue.remove(position).unwrap_err(),
                PlayerError::IndexOutOfRange { position, len: 2 }
            );
        }
        assert_eq!(titles(&queue), vec!["a", "b"]);
    }

    #[test]
    fn remove_on_empty_queue_is_out_of_range() {
        let mut queue = PlaybackQueue::new();
        assert_eq!(
            queue.remove(1).unwrap_err(),
            PlayerError::IndexOutOfRange { position: 1, len: 0 }
        );
    }

    #[test]
    fn length_tracks_unplayed_count() {
        let mut queue = PlaybackQueue::new();
        for name in ["a", "b", "c", "d"] {
            queue.push(track(name));
        }
        queue.pop_front();
        queue.remove(2).unwrap();
        assert_eq!(queue.len(), 2);
        assert_eq!(titles(&queue), vec!["b", "d"]);

        queue.clear();
        assert!(queue.is_empty());
    }
}
