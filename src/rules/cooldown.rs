use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::lifecycle::TrackEvictor;
use crate::{AlertType, TrackId};

const DEFAULT_CROWD_COOLDOWN_S: f64 = 10.0;
const DEFAULT_BAG_COOLDOWN_S: f64 = 10.0;
const DEFAULT_WEAPON_COOLDOWN_S: f64 = 5.0;

/// Minimum seconds between two alerts of the same type.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct CooldownConfig {
    pub crowd: f64,
    pub bag: f64,
    pub weapon: f64,
}

impl Default for CooldownConfig {
    fn default() -> Self {
        Self {
            crowd: DEFAULT_CROWD_COOLDOWN_S,
            bag: DEFAULT_BAG_COOLDOWN_S,
            weapon: DEFAULT_WEAPON_COOLDOWN_S,
        }
    }
}

impl CooldownConfig {
    pub fn period(&self, alert_type: AlertType) -> f64 {
        match alert_type {
            AlertType::Crowd => self.crowd,
            AlertType::UnattendedBag => self.bag,
            AlertType::Weapon => self.weapon,
        }
    }

    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("crowd", self.crowd),
            ("bag", self.bag),
            ("weapon", self.weapon),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(anyhow!(
                    "cooldown.{} must be a finite number of seconds >= 0",
                    name
                ));
            }
        }
        Ok(())
    }
}

/// Last-fired timestamps, per alert type and per (alert type, track).
///
/// A gate that has never fired is open.
#[derive(Debug)]
pub struct CooldownState {
    periods: CooldownConfig,
    global: HashMap<AlertType, f64>,
    per_track: HashMap<(AlertType, TrackId), f64>,
}

impl CooldownState {
    pub fn new(periods: CooldownConfig) -> Self {
        Self {
            periods,
            global: HashMap::new(),
            per_track: HashMap::new(),
        }
    }

    pub fn periods(&self) -> &CooldownConfig {
        &self.periods
    }

    pub fn ready(&self, alert_type: AlertType, now: f64) -> bool {
        elapsed_at_least(
            self.global.get(&alert_type).copied(),
            now,
            self.periods.period(alert_type),
        )
    }

    pub fn track_ready(&self, alert_type: AlertType, track_id: TrackId, now: f64) -> bool {
        elapsed_at_least(
            self.per_track.get(&(alert_type, track_id)).copied(),
            now,
            self.periods.period(alert_type),
        )
    }

    pub fn mark(&mut self, alert_type: AlertType, now: f64) {
        self.global.insert(alert_type, now);
    }

    pub fn mark_track(&mut self, alert_type: AlertType, track_id: TrackId, now: f64) {
        self.per_track.insert((alert_type, track_id), now);
    }

    pub fn last_fired(&self, alert_type: AlertType) -> Option<f64> {
        self.global.get(&alert_type).copied()
    }

    pub fn last_fired_for_track(&self, alert_type: AlertType, track_id: TrackId) -> Option<f64> {
        self.per_track.get(&(alert_type, track_id)).copied()
    }
}

impl TrackEvictor for CooldownState {
    fn evict(&mut self, track_id: TrackId) {
        self.per_track.retain(|(_, id), _| *id != track_id);
    }
}

fn elapsed_at_least(last: Option<f64>, now: f64, period: f64) -> bool {
    match last {
        Some(last) if last.is_finite() => now - last >= period,
        _ => true,
    }
}
