use std::{collections::VecDeque, sync::Arc, time::Duration};

use super::track::Track;

/// FIFO of tracks waiting to play. Insertion order is play order.
///
/// Has no synchronization of its own; it is only ever touched from the owning
/// session's task.
#[derive(Debug, Default)]
pub struct TrackQueue {
    tracks: VecDeque<Track>,
}

impl TrackQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a track and returns its 1-based position.
    pub fn push(&mut self, track: Track) -> usize {
        self.tracks.push_back(track);
        self.tracks.len()
    }

    /// Appends every track in order and returns how many were added.
    pub fn extend(&mut self, tracks: impl IntoIterator<Item = Track>) -> usize {
        let before = self.tracks.len();
        self.tracks.extend(tracks);
        self.tracks.len() - before
    }

    pub fn pop(&mut self) -> Option<Track> {
        self.tracks.pop_front()
    }

    /// Drops every queued track and returns how many there were.
    pub fn clear(&mut self) -> usize {
        let cleared = self.tracks.len();
        self.tracks.clear();
        cleared
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        QueueSnapshot {
            tracks: self.tracks.iter().cloned().collect(),
        }
    }
}

/// Point-in-time copy of a queue, in play order.
///
/// Iterating does not consume it, so the same snapshot can be walked any number of
/// times while the live queue keeps changing.
#[derive(Debug, Clone, Default)]
pub struct QueueSnapshot {
    tracks: Arc<[Track]>,
}

impl QueueSnapshot {
    pub fn iter(&self) -> std::slice::Iter<'_, Track> {
        self.tracks.iter()
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    /// Combined length of every non-live track.
    pub fn total_duration(&self) -> Duration {
        self.tracks
            .iter()
            .filter(|track| !track.info().is_stream)
            .map(Track::duration)
            .sum()
    }

    /// Numbered listing, one `N. title (m:ss)` line per track.
    pub fn render(&self) -> String {
        self.tracks
            .iter()
            .enumerate()
            .map(|(index, track)| format!("{}. {}\n", index + 1, track.describe()))
            .collect()
    }
}

impl<'a> IntoIterator for &'a QueueSnapshot {
    type Item = &'a Track;
    type IntoIter = std::slice::Iter<'a, Track>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::track::TrackInfo;
    use pretty_assertions::assert_eq;

    fn track(title: &str, length_ms: u64) -> Track {
        Track::new(TrackInfo::new(title, title, length_ms))
    }

    fn titles(snapshot: &QueueSnapshot) -> Vec<&str> {
        snapshot.iter().map(Track::title).collect()
    }

    #[test]
    fn test_fifo_order() {
        let mut queue = TrackQueue::new();
        assert_eq!(queue.push(track("a", 1_000)), 1);
        assert_eq!(queue.push(track("b", 1_000)), 2);
        assert_eq!(queue.extend([track("c", 1_000), track("d", 1_000)]), 2);

        assert_eq!(queue.pop().map(|t| t.title().to_owned()), Some("a".to_owned()));
        assert_eq!(titles(&queue.snapshot()), vec!["b", "c", "d"]);
    }

    #[test]
    fn test_snapshot_is_detached_and_restartable() {
        let mut queue = TrackQueue::new();
        queue.extend([track("a", 1_000), track("b", 1_000)]);

        let snapshot = queue.snapshot();
        queue.clear();

        assert!(queue.is_empty());
        assert_eq!(titles(&snapshot), vec!["a", "b"]);
        // a second walk sees the same sequence
        assert_eq!((&snapshot).into_iter().count(), 2);
        assert_eq!(titles(&snapshot), vec!["a", "b"]);
    }

    #[test]
    fn test_clear_reports_count() {
        let mut queue = TrackQueue::new();
        queue.extend([track("a", 1_000), track("b", 1_000), track("c", 1_000)]);

        assert_eq!(queue.clear(), 3);
        assert_eq!(queue.clear(), 0);
        assert!(queue.snapshot().is_empty());
    }

    #[test]
    fn test_render_and_total_duration() {
        let mut queue = TrackQueue::new();
        queue.push(track("First", 65_000));
        queue.push(track("Second", 3_600_000));
        queue.push(Track::new(TrackInfo::new("live", "Radio", 0).live()));

        let snapshot = queue.snapshot();
        assert_eq!(
            snapshot.render(),
            "1. First (1:05)\n2. Second (1:00:00)\n3. Radio (LIVE)\n"
        );
        assert_eq!(snapshot.total_duration(), Duration::from_millis(3_665_000));
    }
}
