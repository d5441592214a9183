//! Per-track lifecycle accounting.
//!
//! A track's state lives exactly as long as the upstream tracker keeps
//! reporting it as confirmed. One absent frame evicts everything the engine
//! holds for that id: lifecycle counters here, and rule state through
//! [`TrackEvictor`].

use std::collections::{BTreeSet, HashMap};

use crate::TrackId;

/// Implemented by every component that keeps per-track state.
pub trait TrackEvictor {
    /// Drops all state held for `track_id`. Unknown ids are a no-op.
    fn evict(&mut self, track_id: TrackId);
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TrackLifecycle {
    pub frame_count: u64,
    pub last_seen_frame: u64,
}

#[derive(Debug, Default)]
pub struct LifecycleTracker {
    tracks: HashMap<TrackId, TrackLifecycle>,
}

impl LifecycleTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts one confirmed observation and returns the updated frame count.
    ///
    /// Callers must observe a track at most once per frame.
    pub fn observe(&mut self, track_id: TrackId, frame_index: u64) -> u64 {
        let entry = self.tracks.entry(track_id).or_insert(TrackLifecycle {
            frame_count: 0,
            last_seen_frame: frame_index,
        });
        entry.frame_count += 1;
        entry.last_seen_frame = frame_index;
        entry.frame_count
    }

    /// Removes every track not in `active` and evicts it from `evictors`.
    ///
    /// Returns the evicted ids in ascending order.
    pub fn prune(
        &mut self,
        active: &BTreeSet<TrackId>,
        evictors: &mut [&mut dyn TrackEvictor],
    ) -> Vec<TrackId> {
        let mut stale: Vec<TrackId> = self
            .tracks
            .keys()
            .filter(|id| !active.contains(id))
            .copied()
            .collect();
        stale.sort_unstable();

        for id in &stale {
            self.tracks.remove(id);
            for evictor in evictors.iter_mut() {
                evictor.evict(*id);
            }
            log::debug!("track {} gone, state evicted", id);
        }
        stale
    }

    pub fn get(&self, track_id: TrackId) -> Option<&TrackLifecycle> {
        self.tracks.get(&track_id)
    }

    /// Frame count for a track, 0 when unknown.
    pub fn frame_count(&self, track_id: TrackId) -> u64 {
        self.tracks
            .get(&track_id)
            .map(|t| t.frame_count)
            .unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        evicted: Vec<TrackId>,
    }

    impl TrackEvictor for Recorder {
        fn evict(&mut self, track_id: TrackId) {
            self.evicted.push(track_id);
        }
    }

    fn active(ids: &[u64]) -> BTreeSet<TrackId> {
        ids.iter().map(|id| TrackId(*id)).collect()
    }

    #[test]
    fn observe_counts_contiguous_frames() {
        let mut lc = LifecycleTracker::new();
        assert_eq!(lc.observe(TrackId(1), 1), 1);
        assert_eq!(lc.observe(TrackId(1), 2), 2);
        assert_eq!(lc.observe(TrackId(1), 3), 3);
        let entry = lc.get(TrackId(1)).expect("tracked");
        assert_eq!(entry.last_seen_frame, 3);
        assert_eq!(lc.frame_count(TrackId(2)), 0);
    }

    #[test]
    fn prune_evicts_absent_tracks_everywhere() {
        let mut lc = LifecycleTracker::new();
        lc.observe(TrackId(1), 1);
        lc.observe(TrackId(5), 1);
        lc.observe(TrackId(3), 1);

        let mut a = Recorder::default();
        let mut b = Recorder::default();
        let evicted = lc.prune(&active(&[3]), &mut [&mut a, &mut b]);

        assert_eq!(evicted, vec![TrackId(1), TrackId(5)]);
        assert_eq!(a.evicted, vec![TrackId(1), TrackId(5)]);
        assert_eq!(b.evicted, vec![TrackId(1), TrackId(5)]);
        assert_eq!(lc.len(), 1);
    }

    #[test]
    fn reappearing_track_starts_over() {
        let mut lc = LifecycleTracker::new();
        lc.observe(TrackId(9), 1);
        lc.observe(TrackId(9), 2);
        lc.prune(&active(&[]), &mut []);
        assert!(lc.is_empty());
        assert_eq!(lc.observe(TrackId(9), 4), 1);
    }
}
