use crate::lifecycle::TrackEvictor;
use crate::{AlertRecord, AlertType, TrackId};

use super::{CooldownState, FrameContext, Rule, RuleDescriptor};

/// Fires when the number of confirmed persons reaches a threshold.
///
/// Holds no per-track state; the only memory is the crowd cooldown.
#[derive(Debug)]
pub struct CrowdRule {
    threshold: usize,
}

impl CrowdRule {
    pub fn new(threshold: usize) -> Self {
        Self { threshold }
    }
}

impl TrackEvictor for CrowdRule {
    fn evict(&mut self, _track_id: TrackId) {}
}

impl Rule for CrowdRule {
    fn descriptor(&self) -> RuleDescriptor {
        RuleDescriptor {
            id: "crowd",
            emits: AlertType::Crowd,
        }
    }

    fn evaluate(
        &mut self,
        frame: &FrameContext<'_>,
        cooldowns: &mut CooldownState,
    ) -> Vec<AlertRecord> {
        let count = frame.partitions.persons.len();
        if count < self.threshold || !cooldowns.ready(AlertType::Crowd, frame.now) {
            return vec![];
        }
        cooldowns.mark(AlertType::Crowd, frame.now);
        vec![AlertRecord::new(
            AlertType::Crowd,
            format!("Crowd detected: {} people", count),
            frame.now,
            frame.frame_index,
        )]
    }
}
