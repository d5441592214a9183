//! Anomaly rules.
//!
//! Each rule reads the per-frame category partitions and the shared lifecycle
//! counters, keeps its own per-track state, and proposes alerts. Rules never
//! talk to each other. Cooldown timestamps are owned by the engine and lent to
//! each rule for the duration of one evaluation.

use std::collections::BTreeMap;

use crate::lifecycle::{LifecycleTracker, TrackEvictor};
use crate::{AlertRecord, AlertType, TrackId, TrackObservation};

pub mod cooldown;
pub mod crowd;
pub mod persistence;
pub mod stationary;

pub use cooldown::{CooldownConfig, CooldownState};
pub use crowd::CrowdRule;
pub use persistence::{PersistenceEntry, WeaponPersistenceRule, WeaponPolicy};
pub use stationary::{StationaryEntry, StationaryObjectRule, StationarySettings};

/// Confirmed tracks of one frame, split by category and ordered by track id.
#[derive(Clone, Debug, Default)]
pub struct TrackPartitions {
    pub persons: BTreeMap<TrackId, TrackObservation>,
    pub bags: BTreeMap<TrackId, TrackObservation>,
    pub weapons: BTreeMap<TrackId, TrackObservation>,
}

/// Everything a rule may read while evaluating one frame.
pub struct FrameContext<'a> {
    pub frame_index: u64,
    pub now: f64,
    pub partitions: &'a TrackPartitions,
    pub lifecycle: &'a LifecycleTracker,
}

/// Rule metadata. `emits` is the only alert type the rule produces.
#[derive(Clone, Copy, Debug)]
pub struct RuleDescriptor {
    pub id: &'static str,
    pub emits: AlertType,
}

/// A stateful anomaly rule.
///
/// Evaluation must not fail: missing categories simply produce no alerts.
pub trait Rule: TrackEvictor {
    fn descriptor(&self) -> RuleDescriptor;

    fn evaluate(
        &mut self,
        frame: &FrameContext<'_>,
        cooldowns: &mut CooldownState,
    ) -> Vec<AlertRecord>;
}
