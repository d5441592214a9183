//! Weapon-candidate persistence.
//!
//! A weapon candidate must be seen for `persist_frames` frames before it can
//! alert, which filters single-frame classifier flicker. Alerts pass a dual
//! gate: the candidate's own cooldown and the global weapon cooldown. When
//! the gate is closed the streak is kept, so the alert fires as soon as both
//! cooldowns clear.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::classify::normalize_label;
use crate::lifecycle::TrackEvictor;
use crate::{AlertRecord, AlertType, Point, TrackId, TrackObservation};

use super::{CooldownState, FrameContext, Rule, RuleDescriptor};

const DEFAULT_NEAR_MIN_DISTANCE_PX: f64 = 40.0;
const DEFAULT_NEAR_PERSON_WIDTH_FACTOR: f64 = 0.9;
const DEFAULT_NEAR_MAX_DRIFT_PX: f64 = 30.0;

/// When a weapon candidate's streak advances.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum WeaponPolicy {
    /// Every frame the track is a weapon candidate counts.
    #[default]
    Unconditional,
    /// Only frames with a person close by count. Isolated candidates lose
    /// their streak, and a candidate drifting more than `max_drift_px` from
    /// its anchor starts over at 1.
    NearPerson {
        min_distance_px: f64,
        person_width_factor: f64,
        max_drift_px: f64,
    },
}

impl WeaponPolicy {
    pub fn near_person() -> Self {
        WeaponPolicy::NearPerson {
            min_distance_px: DEFAULT_NEAR_MIN_DISTANCE_PX,
            person_width_factor: DEFAULT_NEAR_PERSON_WIDTH_FACTOR,
            max_drift_px: DEFAULT_NEAR_MAX_DRIFT_PX,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if let WeaponPolicy::NearPerson {
            min_distance_px,
            person_width_factor,
            max_drift_px,
        } = self
        {
            for (name, value) in [
                ("min_distance_px", *min_distance_px),
                ("person_width_factor", *person_width_factor),
                ("max_drift_px", *max_drift_px),
            ] {
                if !value.is_finite() || value < 0.0 {
                    return Err(anyhow!("weapon_policy.{} must be finite and >= 0", name));
                }
            }
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PersistenceEntry {
    pub streak_count: u32,
    pub anchor_center: Point,
}

#[derive(Debug)]
pub struct WeaponPersistenceRule {
    persist_frames: u32,
    policy: WeaponPolicy,
    entries: HashMap<TrackId, PersistenceEntry>,
}

impl WeaponPersistenceRule {
    pub fn new(persist_frames: u32, policy: WeaponPolicy) -> Self {
        Self {
            persist_frames,
            policy,
            entries: HashMap::new(),
        }
    }

    pub fn entry(&self, track_id: TrackId) -> Option<&PersistenceEntry> {
        self.entries.get(&track_id)
    }

    pub fn streak(&self, track_id: TrackId) -> u32 {
        self.entries
            .get(&track_id)
            .map(|e| e.streak_count)
            .unwrap_or(0)
    }

    pub fn tracked(&self) -> usize {
        self.entries.len()
    }

    /// Applies the policy and returns the new streak, or `None` when the
    /// candidate does not count this frame.
    fn advance(
        &mut self,
        track_id: TrackId,
        center: Point,
        persons: &[TrackObservation],
    ) -> Option<u32> {
        match self.policy {
            WeaponPolicy::Unconditional => {
                let entry = self.entries.entry(track_id).or_insert(PersistenceEntry {
                    streak_count: 0,
                    anchor_center: center,
                });
                entry.streak_count += 1;
                entry.anchor_center = center;
                Some(entry.streak_count)
            }
            WeaponPolicy::NearPerson {
                min_distance_px,
                person_width_factor,
                max_drift_px,
            } => {
                let near = persons.iter().any(|p| {
                    let width = f64::from(p.bbox.width().max(1));
                    let reach = min_distance_px.max(person_width_factor * width);
                    p.center().distance(center) <= reach
                });
                if !near {
                    if self.entries.remove(&track_id).is_some() {
                        log::debug!("weapon candidate {} isolated, streak dropped", track_id);
                    }
                    return None;
                }
                let entry = self.entries.entry(track_id).or_insert(PersistenceEntry {
                    streak_count: 0,
                    anchor_center: center,
                });
                if entry.anchor_center.distance(center) <= max_drift_px {
                    entry.streak_count += 1;
                } else {
                    log::debug!("weapon candidate {} drifted, streak restarted", track_id);
                    entry.streak_count = 1;
                    entry.anchor_center = center;
                }
                Some(entry.streak_count)
            }
        }
    }
}

impl TrackEvictor for WeaponPersistenceRule {
    fn evict(&mut self, track_id: TrackId) {
        self.entries.remove(&track_id);
    }
}

impl Rule for WeaponPersistenceRule {
    fn descriptor(&self) -> RuleDescriptor {
        RuleDescriptor {
            id: "weapon_persistence",
            emits: AlertType::Weapon,
        }
    }

    fn evaluate(
        &mut self,
        frame: &FrameContext<'_>,
        cooldowns: &mut CooldownState,
    ) -> Vec<AlertRecord> {
        let persons: Vec<TrackObservation> =
            frame.partitions.persons.values().cloned().collect();
        let now = frame.now;

        let mut alerts = Vec::new();
        for (track_id, obs) in &frame.partitions.weapons {
            let track_id = *track_id;
            let Some(streak) = self.advance(track_id, obs.center(), &persons) else {
                continue;
            };
            if streak < self.persist_frames {
                continue;
            }
            if !cooldowns.track_ready(AlertType::Weapon, track_id, now)
                || !cooldowns.ready(AlertType::Weapon, now)
            {
                continue;
            }

            cooldowns.mark(AlertType::Weapon, now);
            cooldowns.mark_track(AlertType::Weapon, track_id, now);
            if let Some(entry) = self.entries.get_mut(&track_id) {
                entry.streak_count = 0;
            }
            let label = normalize_label(&obs.class_label);
            alerts.push(
                AlertRecord::new(
                    AlertType::Weapon,
                    format!("Weapon ({}) detected!", label),
                    now,
                    frame.frame_index,
                )
                .with_track(track_id, obs.bbox, &label),
            );
        }
        // A frame under any other label breaks the streak.
        self.entries
            .retain(|id, _| frame.partitions.weapons.contains_key(id));
        alerts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::LifecycleTracker;
    use crate::rules::{CooldownConfig, TrackPartitions};
    use crate::BBox;

    struct Harness {
        rule: WeaponPersistenceRule,
        cooldowns: CooldownState,
        lifecycle: LifecycleTracker,
        frame_index: u64,
    }

    impl Harness {
        fn new(persist_frames: u32, policy: WeaponPolicy, weapon_cooldown: f64) -> Self {
            Self {
                rule: WeaponPersistenceRule::new(persist_frames, policy),
                cooldowns: CooldownState::new(CooldownConfig {
                    weapon: weapon_cooldown,
                    ..CooldownConfig::default()
                }),
                lifecycle: LifecycleTracker::new(),
                frame_index: 0,
            }
        }

        fn step(
            &mut self,
            now: f64,
            weapons: &[(u64, BBox)],
            persons: &[(u64, BBox)],
        ) -> Vec<AlertRecord> {
            self.frame_index += 1;
            let mut p = TrackPartitions::default();
            for (id, bbox) in weapons {
                p.weapons
                    .insert(TrackId(*id), TrackObservation::confirmed(*id, *bbox, "Knife"));
            }
            for (id, bbox) in persons {
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

    fn knife() -> BBox {
        BBox::new(100, 100, 120, 110)
    }

    fn holder() -> BBox {
        // center (115, 130), 60px wide
        BBox::new(85, 80, 145, 180)
    }

    #[test]
    fn fires_exactly_when_streak_reaches_threshold() {
        let mut h = Harness::new(5, WeaponPolicy::Unconditional, 5.0);
        for frame in 1..=4 {
            assert!(h.step(frame as f64 * 0.1, &[(3, knife())], &[]).is_empty());
        }
        let alerts = h.step(0.5, &[(3, knife())], &[]);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].frame_index, 5);
        assert_eq!(alerts[0].message, "Weapon (knife) detected!");
        assert_eq!(alerts[0].label.as_deref(), Some("knife"));
        assert_eq!(h.rule.streak(TrackId(3)), 0);
    }

    #[test]
    fn sustained_candidate_fires_once_per_cooldown() {
        let mut h = Harness::new(2, WeaponPolicy::Unconditional, 5.0);
        let mut fired = Vec::new();
        for i in 0..40 {
            let now = i as f64 * 0.5;
            if !h.step(now, &[(3, knife())], &[]).is_empty() {
                fired.push(now);
            }
        }
        assert_eq!(fired, vec![0.5, 5.5, 10.5, 15.5]);
    }

    #[test]
    fn frame_without_candidate_breaks_streak() {
        let mut h = Harness::new(3, WeaponPolicy::Unconditional, 5.0);
        h.step(0.0, &[(3, knife())], &[]);
        h.step(0.1, &[(3, knife())], &[]);
        h.step(0.2, &[], &[]);
        assert!(h.rule.entry(TrackId(3)).is_none());
        assert!(h.step(0.3, &[(3, knife())], &[]).is_empty());
        assert_eq!(h.rule.streak(TrackId(3)), 1);
    }

    #[test]
    fn closed_gate_keeps_streak() {
        let mut h = Harness::new(2, WeaponPolicy::Unconditional, 5.0);
        h.step(0.0, &[(3, knife())], &[]);
        assert_eq!(h.step(1.0, &[(3, knife())], &[]).len(), 1);
        h.step(2.0, &[(3, knife())], &[]);
        h.step(3.0, &[(3, knife())], &[]);
        h.step(4.0, &[(3, knife())], &[]);
        assert_eq!(h.rule.streak(TrackId(3)), 3);
        assert_eq!(h.step(6.0, &[(3, knife())], &[]).len(), 1);
    }

    #[test]
    fn global_gate_lets_only_one_track_fire() {
        let mut h = Harness::new(2, WeaponPolicy::Unconditional, 5.0);
        let other = BBox::new(400, 400, 420, 410);
        h.step(0.0, &[(3, knife()), (4, other)], &[]);
        let alerts = h.step(1.0, &[(3, knife()), (4, other)], &[]);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].track_id, Some(TrackId(3)));
        assert_eq!(h.rule.streak(TrackId(4)), 2);

        let alerts = h.step(6.0, &[(3, knife()), (4, other)], &[]);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].track_id, Some(TrackId(4)));
    }

    #[test]
    fn per_track_gate_blocks_repeat_after_global_reopens() {
        let mut h = Harness::new(1, WeaponPolicy::Unconditional, 5.0);
        assert_eq!(h.step(0.0, &[(3, knife())], &[]).len(), 1);
        // keep only the per-track stamp
        h.cooldowns = {
            let mut cd = CooldownState::new(*h.cooldowns.periods());
            cd.mark_track(AlertType::Weapon, TrackId(3), 0.0);
            cd
        };
        assert!(h.step(2.0, &[(3, knife())], &[]).is_empty());
        assert_eq!(h.step(5.0, &[(3, knife())], &[]).len(), 1);
    }

    #[test]
    fn unconditional_policy_counts_isolated_candidates() {
        let mut h = Harness::new(3, WeaponPolicy::Unconditional, 5.0);
        h.step(0.0, &[(3, knife())], &[]);
        h.step(0.1, &[(3, knife())], &[]);
        assert_eq!(h.step(0.2, &[(3, knife())], &[]).len(), 1);
    }

    #[test]
    fn near_person_policy_requires_a_person() {
        let mut h = Harness::new(3, WeaponPolicy::near_person(), 5.0);
        for i in 0..10 {
            assert!(h.step(i as f64, &[(3, knife())], &[]).is_empty());
        }
        assert!(h.rule.entry(TrackId(3)).is_none());
    }

    #[test]
    fn near_person_policy_fires_beside_a_person() {
        let mut h = Harness::new(3, WeaponPolicy::near_person(), 5.0);
        h.step(0.0, &[(3, knife())], &[(1, holder())]);
        h.step(0.1, &[(3, knife())], &[(1, holder())]);
        let alerts = h.step(0.2, &[(3, knife())], &[(1, holder())]);
        assert_eq!(alerts.len(), 1);
    }

    #[test]
    fn near_person_policy_drops_streak_when_isolated() {
        let mut h = Harness::new(3, WeaponPolicy::near_person(), 5.0);
        h.step(0.0, &[(3, knife())], &[(1, holder())]);
        h.step(0.1, &[(3, knife())], &[(1, holder())]);
        h.step(0.2, &[(3, knife())], &[]);
        assert_eq!(h.rule.streak(TrackId(3)), 0);
        h.step(0.3, &[(3, knife())], &[(1, holder())]);
        assert_eq!(h.rule.streak(TrackId(3)), 1);
    }

    #[test]
    fn near_person_policy_restarts_on_drift() {
        let mut h = Harness::new(3, WeaponPolicy::near_person(), 5.0);
        let moved = BBox::new(140, 100, 160, 110); // center moved 40px
        h.step(0.0, &[(3, knife())], &[(1, holder())]);
        h.step(0.1, &[(3, knife())], &[(1, holder())]);
        assert!(h.step(0.2, &[(3, moved)], &[(1, holder())]).is_empty());
        assert_eq!(h.rule.streak(TrackId(3)), 1);
        assert_eq!(
            h.rule.entry(TrackId(3)).unwrap().anchor_center,
            Point::new(150.0, 105.0)
        );
    }

    #[test]
    fn evict_forgets_streak() {
        let mut h = Harness::new(5, WeaponPolicy::Unconditional, 5.0);
        h.step(0.0, &[(3, knife())], &[]);
        h.rule.evict(TrackId(3));
        assert_eq!(h.rule.tracked(), 0);
    }

    #[test]
    fn near_person_policy_validation() {
        assert!(WeaponPolicy::near_person().validate().is_ok());
        let bad = WeaponPolicy::NearPerson {
            min_distance_px: -1.0,
            person_width_factor: 0.9,
            max_drift_px: 30.0,
        };
        assert!(bad.validate().is_err());
    }
}
