//! Unattended-object detection.
//!
//! Each eligible bag track carries a dwell window anchored at a reference
//! center. Small jitter around the anchor keeps the window running; a move
//! beyond the tolerance re-anchors it and restarts the clock. A bag that
//! dwells long enough with no person nearby raises `UNATTENDED_BAG`, after
//! which its window restarts so it must dwell again before re-alerting.

use std::collections::HashMap;

use crate::classify::normalize_label;
use crate::lifecycle::TrackEvictor;
use crate::{AlertRecord, AlertType, Point, TrackId, TrackObservation};

use super::{CooldownState, FrameContext, Rule, RuleDescriptor};

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StationaryEntry {
    pub anchor_center: Point,
    pub window_start_time: f64,
    pub last_update_time: f64,
}

impl StationaryEntry {
    pub fn duration(&self) -> f64 {
        self.last_update_time - self.window_start_time
    }
}

#[derive(Clone, Copy, Debug)]
pub struct StationarySettings {
    pub stationary_seconds: f64,
    pub min_frames: u64,
    pub movement_tolerance_px: f64,
    pub ownership_radius_px: f64,
}

#[derive(Debug)]
pub struct StationaryObjectRule {
    settings: StationarySettings,
    entries: HashMap<TrackId, StationaryEntry>,
}

impl StationaryObjectRule {
    pub fn new(settings: StationarySettings) -> Self {
        Self {
            settings,
            entries: HashMap::new(),
        }
    }

    pub fn entry(&self, track_id: TrackId) -> Option<&StationaryEntry> {
        self.entries.get(&track_id)
    }

    pub fn tracked(&self) -> usize {
        self.entries.len()
    }

    fn has_owner(&self, center: Point, persons: &[Point]) -> bool {
        persons
            .iter()
            .any(|p| p.distance(center) < self.settings.ownership_radius_px)
    }

    /// Advances the dwell window of one bag. Returns the dwell duration, or
    /// `None` when the entry was created this frame.
    fn update_window(&mut self, track_id: TrackId, center: Point, now: f64) -> Option<f64> {
        let tolerance = self.settings.movement_tolerance_px;
        let Some(entry) = self.entries.get_mut(&track_id) else {
            self.entries.insert(
                track_id,
                StationaryEntry {
                    anchor_center: center,
                    window_start_time: now,
                    last_update_time: now,
                },
            );
            log::debug!(
                "bag {} anchored at ({:.1}, {:.1})",
                track_id,
                center.x,
                center.y
            );
            return None;
        };

        if entry.anchor_center.distance(center) > tolerance {
            log::debug!(
                "bag {} moved {:.1}px, dwell window restarted",
                track_id,
                entry.anchor_center.distance(center)
            );
            entry.anchor_center = center;
            entry.window_start_time = now;
        }
        entry.last_update_time = now;
        Some(entry.duration())
    }

    fn evaluate_bag(
        &mut self,
        frame: &FrameContext<'_>,
        persons: &[Point],
        track_id: TrackId,
        obs: &TrackObservation,
        cooldowns: &mut CooldownState,
    ) -> Option<AlertRecord> {
        if frame.lifecycle.frame_count(track_id) < self.settings.min_frames {
            return None;
        }
        let center = obs.center();
        let duration = self.update_window(track_id, center, frame.now)?;

        if duration < self.settings.stationary_seconds || self.has_owner(center, persons) {
            return None;
        }
        if !cooldowns.ready(AlertType::UnattendedBag, frame.now) {
            return None;
        }

        cooldowns.mark(AlertType::UnattendedBag, frame.now);
        if let Some(entry) = self.entries.get_mut(&track_id) {
            entry.window_start_time = frame.now;
        }
        Some(
            AlertRecord::new(
                AlertType::UnattendedBag,
                format!("Bag {} unattended for {:.1}s", track_id, duration),
                frame.now,
                frame.frame_index,
            )
            .with_track(track_id, obs.bbox, &normalize_label(&obs.class_label)),
        )
    }
}

impl TrackEvictor for StationaryObjectRule {
    fn evict(&mut self, track_id: TrackId) {
        self.entries.remove(&track_id);
    }
}

impl Rule for StationaryObjectRule {
    fn descriptor(&self) -> RuleDescriptor {
        RuleDescriptor {
            id: "unattended_bag",
            emits: AlertType::UnattendedBag,
        }
    }

    fn evaluate(
        &mut self,
        frame: &FrameContext<'_>,
        cooldowns: &mut CooldownState,
    ) -> Vec<AlertRecord> {
        let persons: Vec<Point> = frame
            .partitions
            .persons
            .values()
            .map(TrackObservation::center)
            .collect();

        let mut alerts = Vec::new();
        for (track_id, obs) in &frame.partitions.bags {
            if let Some(alert) = self.evaluate_bag(frame, &persons, *track_id, obs, cooldowns) {
                alerts.push(alert);
            }
        }
        // Dwell only accumulates while the track keeps a bag label.
        self.entries
            .retain(|id, _| frame.partitions.bags.contains_key(id));
        alerts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::LifecycleTracker;
    use crate::rules::{CooldownConfig, TrackPartitions};
    use crate::BBox;

    fn settings() -> StationarySettings {
        StationarySettings {
            stationary_seconds: 8.0,
            min_frames: 1,
            movement_tolerance_px: 10.0,
            ownership_radius_px: 150.0,
        }
    }

    struct Harness {
        rule: StationaryObjectRule,
        cooldowns: CooldownState,
        lifecycle: LifecycleTracker,
        frame_index: u64,
    }

    impl Harness {
        fn new(settings: StationarySettings, bag_cooldown: f64) -> Self {
            Self {
                rule: StationaryObjectRule::new(settings),
                cooldowns: CooldownState::new(CooldownConfig {
                    bag: bag_cooldown,
                    ..CooldownConfig::default()
                }),
                lifecycle: LifecycleTracker::new(),
                frame_index: 0,
            }
        }

        fn step(
            &mut self,
            now: f64,
            bags: &[(u64, BBox)],
            persons: &[(u64, BBox)],
        ) -> Vec<AlertRecord> {
            self.frame_index += 1;
            let mut p = TrackPartitions::default();
            for (id, bbox) in bags {
                self.lifecycle.observe(TrackId(*id), self.frame_index);
                p.bags
                    .insert(TrackId(*id), TrackObservation::confirmed(*id, *bbox, "suitcase"));
            }
            for (id, bbox) in persons {
                self.lifecycle.observe(TrackId(*id), self.frame_index);
                p.persons
                    .insert(TrackId(*id), TrackObservation::confirmed(*id, *bbox, "person"));
            }
            let frame = FrameContext {
                frame_index: self.frame_index,
                now,
                partitions: &p,
                lifecycle: &self.lifecycle,
            };
            self.rule.evaluate(&frame, &mut self.cooldowns)
        }
    }

    // center (100, 100)
    fn bag_box() -> BBox {
        BBox::new(90, 90, 110, 110)
    }

    #[test]
    fn first_eligible_frame_only_anchors() {
        let mut h = Harness::new(settings(), 10.0);
        assert!(h.step(0.0, &[(7, bag_box())], &[]).is_empty());
        let entry = h.rule.entry(TrackId(7)).expect("anchored");
        assert_eq!(entry.anchor_center, Point::new(100.0, 100.0));
        assert_eq!(entry.duration(), 0.0);
    }

    #[test]
    fn stationary_bag_fires_once_then_restarts_window() {
        let mut h = Harness::new(settings(), 10.0);
        assert!(h.step(0.0, &[(7, bag_box())], &[]).is_empty());
        let alerts = h.step(8.0, &[(7, bag_box())], &[]);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].track_id, Some(TrackId(7)));
        assert_eq!(alerts[0].bbox, Some(bag_box()));
        assert_eq!(alerts[0].message, "Bag 7 unattended for 8.0s");

        assert!(h.step(9.0, &[(7, bag_box())], &[]).is_empty());
        assert_eq!(h.rule.entry(TrackId(7)).unwrap().duration(), 1.0);
    }

    #[test]
    fn frame_without_bag_label_drops_window() {
        let mut h = Harness::new(settings(), 10.0);
        h.step(0.0, &[(7, bag_box())], &[]);
        h.step(4.0, &[], &[]);
        assert!(h.rule.entry(TrackId(7)).is_none());
        assert!(h.step(8.0, &[(7, bag_box())], &[]).is_empty());
        assert_eq!(h.rule.entry(TrackId(7)).unwrap().window_start_time, 8.0);
    }

    #[test]
    fn jitter_within_tolerance_keeps_dwell_clock() {
        let mut h = Harness::new(settings(), 10.0);
        h.step(0.0, &[(7, bag_box())], &[]);
        // 6px drift
        h.step(4.0, &[(7, BBox::new(96, 90, 116, 110))], &[]);
        let alerts = h.step(8.0, &[(7, BBox::new(94, 92, 114, 112))], &[]);
        assert_eq!(alerts.len(), 1);
        // anchor never moved
        assert_eq!(
            h.rule.entry(TrackId(7)).unwrap().anchor_center,
            Point::new(100.0, 100.0)
        );
    }

    #[test]
    fn movement_beyond_tolerance_restarts_clock() {
        let mut h = Harness::new(settings(), 10.0);
        h.step(0.0, &[(7, bag_box())], &[]);
        h.step(5.0, &[(7, BBox::new(140, 90, 160, 110))], &[]);
        assert!(h.step(8.0, &[(7, BBox::new(140, 90, 160, 110))], &[]).is_empty());
        let entry = h.rule.entry(TrackId(7)).unwrap();
        assert_eq!(entry.anchor_center, Point::new(150.0, 100.0));
        assert_eq!(entry.window_start_time, 5.0);
        assert_eq!(h.step(13.0, &[(7, BBox::new(140, 90, 160, 110))], &[]).len(), 1);
    }

    #[test]
    fn nearby_person_suppresses_alert() {
        let mut h = Harness::new(settings(), 0.0);
        let owner = BBox::new(180, 80, 220, 180); // center (200, 130), ~104px away
        for t in 0..30 {
            assert!(h.step(t as f64, &[(7, bag_box())], &[(1, owner)]).is_empty());
        }
    }

    #[test]
    fn distant_person_is_not_an_owner() {
        let mut h = Harness::new(settings(), 10.0);
        let stranger = BBox::new(400, 400, 440, 480);
        h.step(0.0, &[(7, bag_box())], &[(1, stranger)]);
        assert_eq!(h.step(8.0, &[(7, bag_box())], &[(1, stranger)]).len(), 1);
    }

    #[test]
    fn young_tracks_are_not_eligible() {
        let mut h = Harness::new(
            StationarySettings {
                min_frames: 3,
                ..settings()
            },
            10.0,
        );
        h.step(0.0, &[(7, bag_box())], &[]);
        h.step(1.0, &[(7, bag_box())], &[]);
        assert!(h.rule.entry(TrackId(7)).is_none());
        h.step(2.0, &[(7, bag_box())], &[]);
        assert_eq!(h.rule.entry(TrackId(7)).unwrap().window_start_time, 2.0);
    }

    #[test]
    fn bag_cooldown_is_global_across_tracks() {
        let mut h = Harness::new(settings(), 10.0);
        let far = BBox::new(490, 490, 510, 510);
        h.step(0.0, &[(7, bag_box()), (8, far)], &[]);
        let alerts = h.step(8.0, &[(7, bag_box()), (8, far)], &[]);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].track_id, Some(TrackId(7)));
        // bag 8 has dwelled 9s but the global gate is closed until t=18
        assert!(h.step(9.0, &[(7, bag_box()), (8, far)], &[]).is_empty());
        let alerts = h.step(18.0, &[(7, bag_box()), (8, far)], &[]);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].track_id, Some(TrackId(7)));
    }

    #[test]
    fn degenerate_box_is_still_tracked() {
        let mut h = Harness::new(settings(), 10.0);
        let point = BBox::new(50, 50, 50, 50);
        h.step(0.0, &[(2, point)], &[]);
        assert_eq!(h.step(8.0, &[(2, point)], &[]).len(), 1);
    }

    #[test]
    fn evict_forgets_entry() {
        let mut h = Harness::new(settings(), 10.0);
        h.step(0.0, &[(7, bag_box())], &[]);
        h.rule.evict(TrackId(7));
        assert_eq!(h.rule.tracked(), 0);
    }
}
