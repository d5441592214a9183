//! Anomaly Kernel
//!
//! This crate implements the rule engine that turns a per-frame stream of
//! confirmed tracks into a de-duplicated, rate-limited stream of alerts.
//!
//! # Architecture
//!
//! Detection and tracking happen upstream. Each call to
//! [`RuleEngine::process`] receives the confirmed tracks of one frame and
//! runs, in order:
//!
//! 1. **Classification**: labels are mapped to person / bag / weapon
//!    candidate / ignored.
//! 2. **Lifecycle**: per-track frame counters advance; tracks missing from
//!    the frame are evicted from every component.
//! 3. **Rules**: crowd, unattended bag, weapon persistence. Each owns its
//!    per-track state; cooldowns are owned by the engine.
//!
//! Alerts are returned as CROWD first, then UNATTENDED_BAG by track id, then
//! WEAPON by track id. The engine performs no I/O; [`sink`] adapters hand
//! alerts to logs, files or bounded in-memory history.
//!
//! # Module Structure
//!
//! - `classify`: label categories and match policy
//! - `lifecycle`: frame counters and eviction
//! - `rules`: cooldowns and the three anomaly rules
//! - `config`: engine configuration (file + env)
//! - `replay`: recorded track streams (JSON lines)
//! - `sink`: alert sinks

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

pub mod classify;
pub mod config;
pub mod lifecycle;
pub mod replay;
pub mod rules;
pub mod sink;

pub use classify::{Category, LabelClassifier, LabelConfig, LabelMatch};
pub use config::EngineConfig;
pub use lifecycle::{LifecycleTracker, TrackEvictor, TrackLifecycle};
pub use replay::{parse_frame_record, FrameRecord, ReplaySource};
pub use rules::{
    CooldownConfig, CooldownState, CrowdRule, FrameContext, Rule, StationaryObjectRule,
    StationarySettings, TrackPartitions, WeaponPersistenceRule, WeaponPolicy,
};
pub use sink::{AlertHistory, AlertSink, JsonLinesSink, LogSink, MemorySink};

// -------------------- Geometry --------------------

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: Point) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}

/// Pixel rectangle `(x1, y1, x2, y2)`. Serialized as a 4-element array.
///
/// Zero-area boxes are valid input; their center is still well defined.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "[i32; 4]", into = "[i32; 4]")]
pub struct BBox {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl BBox {
    pub fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn center(&self) -> Point {
        Point::new(
            (f64::from(self.x1) + f64::from(self.x2)) / 2.0,
            (f64::from(self.y1) + f64::from(self.y2)) / 2.0,
        )
    }

    pub fn width(&self) -> i32 {
        self.x2.saturating_sub(self.x1)
    }

    pub fn height(&self) -> i32 {
        self.y2.saturating_sub(self.y1)
    }
}

impl From<[i32; 4]> for BBox {
    fn from(v: [i32; 4]) -> Self {
        BBox::new(v[0], v[1], v[2], v[3])
    }
}

impl From<BBox> for [i32; 4] {
    fn from(b: BBox) -> Self {
        [b.x1, b.y1, b.x2, b.y2]
    }
}

// -------------------- Tracks --------------------

/// Tracker-assigned identity, stable across frames while the track lives.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrackId(pub u64);

impl std::fmt::Display for TrackId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One track as reported by the tracker for one frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrackObservation {
    pub track_id: TrackId,
    pub bbox: BBox,
    pub class_label: String,
    /// Provisional tracks are reported with `confirmed = false` and skipped.
    pub confirmed: bool,
}

impl TrackObservation {
    pub fn new(track_id: TrackId, bbox: BBox, class_label: &str, confirmed: bool) -> Self {
        Self {
            track_id,
            bbox,
            class_label: class_label.to_string(),
            confirmed,
        }
    }

    pub fn confirmed(track_id: u64, bbox: BBox, class_label: &str) -> Self {
        Self::new(TrackId(track_id), bbox, class_label, true)
    }

    pub fn center(&self) -> Point {
        self.bbox.center()
    }
}

// -------------------- Alerts --------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertType {
    Crowd,
    UnattendedBag,
    Weapon,
}

impl AlertType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertType::Crowd => "CROWD",
            AlertType::UnattendedBag => "UNATTENDED_BAG",
            AlertType::Weapon => "WEAPON",
        }
    }
}

impl std::fmt::Display for AlertType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An operator-facing alert. The engine never stores these.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AlertRecord {
    #[serde(rename = "type")]
    pub alert_type: AlertType,
    pub message: String,
    pub timestamp: f64,
    pub frame_index: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bbox: Option<BBox>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub track_id: Option<TrackId>,
    /// Track class label, trimmed and lowercased.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl AlertRecord {
    pub fn new(alert_type: AlertType, message: String, timestamp: f64, frame_index: u64) -> Self {
        Self {
            alert_type,
            message,
            timestamp,
            frame_index,
            bbox: None,
            track_id: None,
            label: None,
        }
    }

    pub fn with_track(mut self, track_id: TrackId, bbox: BBox, label: &str) -> Self {
        self.track_id = Some(track_id);
        self.bbox = Some(bbox);
        self.label = Some(label.to_string());
        self
    }
}

// -------------------- Rule Engine --------------------

#[derive(Clone, Debug, Default, Serialize)]
pub struct EngineStats {
    pub frames_processed: u64,
    pub crowd_alerts: u64,
    pub bag_alerts: u64,
    pub weapon_alerts: u64,
    pub tracks_evicted: u64,
    pub duplicate_observations: u64,
    pub active_tracks: usize,
}

impl EngineStats {
    pub fn total_alerts(&self) -> u64 {
        self.crowd_alerts + self.bag_alerts + self.weapon_alerts
    }

    fn record(&mut self, alert_type: AlertType, count: usize) {
        let counter = match alert_type {
            AlertType::Crowd => &mut self.crowd_alerts,
            AlertType::UnattendedBag => &mut self.bag_alerts,
            AlertType::Weapon => &mut self.weapon_alerts,
        };
        *counter += count as u64;
    }
}

/// Stateful anomaly rule engine for one monitored stream.
///
/// Calls must be serialized by the host; one engine per stream.
#[derive(Debug)]
pub struct RuleEngine {
    config: EngineConfig,
    classifier: LabelClassifier,
    lifecycle: LifecycleTracker,
    cooldowns: CooldownState,
    crowd: CrowdRule,
    stationary: StationaryObjectRule,
    persistence: WeaponPersistenceRule,
    last_frame: Option<(u64, f64)>,
    stats: EngineStats,
}

impl RuleEngine {
    /// Validates `config` and builds an engine with empty state.
    pub fn new(mut config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let stationary = StationaryObjectRule::new(StationarySettings {
            stationary_seconds: config.bag_stationary_seconds,
            min_frames: config.min_frames_before_bag_rule,
            movement_tolerance_px: config.movement_tolerance_px,
            ownership_radius_px: config.ownership_radius_px,
        });
        Ok(Self {
            classifier: LabelClassifier::new(config.labels.clone()),
            lifecycle: LifecycleTracker::new(),
            cooldowns: CooldownState::new(config.cooldowns),
            crowd: CrowdRule::new(config.crowd_threshold),
            stationary,
            persistence: WeaponPersistenceRule::new(
                config.weapon_persist_frames,
                config.weapon_policy,
            ),
            last_frame: None,
            stats: EngineStats::default(),
            config,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn stats(&self) -> &EngineStats {
        &self.stats
    }

    pub fn lifecycle(&self) -> &LifecycleTracker {
        &self.lifecycle
    }

    pub fn stationary(&self) -> &StationaryObjectRule {
        &self.stationary
    }

    pub fn persistence(&self) -> &WeaponPersistenceRule {
        &self.persistence
    }

    pub fn cooldowns(&self) -> &CooldownState {
        &self.cooldowns
    }

    /// Evaluates one frame and returns its alerts.
    ///
    /// Never fails: malformed labels are ignored, duplicate track ids after
    /// the first are dropped, and out-of-order frames are processed as given.
    /// A frame with a non-finite timestamp only advances track lifecycles.
    pub fn process(
        &mut self,
        tracks: &[TrackObservation],
        frame_index: u64,
        timestamp: f64,
    ) -> Vec<AlertRecord> {
        self.check_ordering(frame_index, timestamp);

        let (partitions, active) = self.partition(tracks, frame_index);

        let evicted = self.lifecycle.prune(
            &active,
            &mut [
                &mut self.crowd,
                &mut self.stationary,
                &mut self.persistence,
                &mut self.cooldowns,
            ],
        );
        self.stats.tracks_evicted += evicted.len() as u64;
        self.stats.frames_processed += 1;
        self.stats.active_tracks = self.lifecycle.len();

        // Lifecycle still advances; rules and cooldowns need a usable clock.
        if !timestamp.is_finite() {
            log::warn!(
                "frame {} has non-finite timestamp {}; rules skipped",
                frame_index,
                timestamp
            );
            return Vec::new();
        }

        let frame = FrameContext {
            frame_index,
            now: timestamp,
            partitions: &partitions,
            lifecycle: &self.lifecycle,
        };

        let mut alerts = Vec::new();
        let rules: [&mut dyn Rule; 3] = [
            &mut self.crowd,
            &mut self.stationary,
            &mut self.persistence,
        ];
        for rule in rules {
            let descriptor = rule.descriptor();
            let produced = rule.evaluate(&frame, &mut self.cooldowns);
            for alert in &produced {
                log::info!(
                    "alert {} from {} frame={} track={}: {}",
                    alert.alert_type,
                    descriptor.id,
                    alert.frame_index,
                    alert
                        .track_id
                        .map(|id| id.to_string())
                        .unwrap_or_else(|| "-".to_string()),
                    alert.message
                );
            }
            self.stats.record(descriptor.emits, produced.len());
            alerts.extend(produced);
        }

        self.last_frame = Some((frame_index, timestamp));
        alerts
    }

    /// Runs [`RuleEngine::process`] and hands every alert to `sink`.
    ///
    /// Engine state advances even when the sink fails.
    pub fn process_into(
        &mut self,
        tracks: &[TrackObservation],
        frame_index: u64,
        timestamp: f64,
        sink: &mut dyn AlertSink,
    ) -> Result<usize> {
        let alerts = self.process(tracks, frame_index, timestamp);
        for alert in &alerts {
            sink.deliver(alert).map_err(|e| anyhow!("sink {}: {}", sink.name(), e))?;
        }
        Ok(alerts.len())
    }

    fn check_ordering(&self, frame_index: u64, timestamp: f64) {
        if frame_index == 0 {
            log::warn!("frame index 0 received; indices are expected to start at 1");
        }
        if let Some((last_index, last_ts)) = self.last_frame {
            if frame_index < last_index {
                log::warn!(
                    "frame index went backwards ({} -> {})",
                    last_index,
                    frame_index
                );
            }
            if timestamp < last_ts {
                log::warn!(
                    "timestamp went backwards ({:.3} -> {:.3}) at frame {}",
                    last_ts,
                    timestamp,
                    frame_index
                );
            }
        }
    }

    /// Splits confirmed tracks by category and advances lifecycle counters.
    fn partition(
        &mut self,
        tracks: &[TrackObservation],
        frame_index: u64,
    ) -> (TrackPartitions, BTreeSet<TrackId>) {
        let mut partitions = TrackPartitions::default();
        let mut active = BTreeSet::new();

        for obs in tracks.iter().filter(|t| t.confirmed) {
            if !active.insert(obs.track_id) {
                log::warn!(
                    "track {} reported twice in frame {}; keeping the first",
                    obs.track_id,
                    frame_index
                );
                self.stats.duplicate_observations += 1;
                continue;
            }
            self.lifecycle.observe(obs.track_id, frame_index);

            let bucket = match self.classifier.classify(&obs.class_label) {
                Category::Person => &mut partitions.persons,
                Category::Bag => &mut partitions.bags,
                Category::WeaponCandidate => &mut partitions.weapons,
                Category::Ignored => continue,
            };
            bucket.insert(obs.track_id, obs.clone());
        }
        (partitions, active)
    }
}
