use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::classify::{LabelConfig, LabelMatch};
use crate::rules::{CooldownConfig, WeaponPolicy};

const DEFAULT_CROWD_THRESHOLD: usize = 20;
const DEFAULT_BAG_STATIONARY_SECS: f64 = 10.0;
const DEFAULT_WEAPON_PERSIST_FRAMES: u32 = 4;
const DEFAULT_MIN_FRAMES_BEFORE_BAG: u64 = 8;
const DEFAULT_MOVEMENT_TOLERANCE_PX: f64 = 10.0;
const DEFAULT_OWNERSHIP_RADIUS_PX: f64 = 150.0;

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct EngineConfigFile {
    crowd_threshold: Option<usize>,
    bag_stationary_seconds: Option<f64>,
    weapon_persist_frames: Option<u32>,
    min_frames_before_bag_rule: Option<u64>,
    movement_tolerance_px: Option<f64>,
    ownership_radius_px: Option<f64>,
    cooldowns: Option<CooldownConfigFile>,
    labels: Option<LabelConfigFile>,
    weapon_policy: Option<WeaponPolicy>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct CooldownConfigFile {
    crowd: Option<f64>,
    bag: Option<f64>,
    weapon: Option<f64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct LabelConfigFile {
    bags: Option<Vec<String>>,
    weapons: Option<Vec<String>>,
    match_policy: Option<LabelMatch>,
}

/// Rule engine configuration. Immutable once the engine is built.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineConfig {
    /// Person count at or above which a crowd alert fires.
    pub crowd_threshold: usize,
    /// Dwell time before an unowned bag is reported.
    pub bag_stationary_seconds: f64,
    /// Consecutive weapon-candidate frames required before alerting.
    pub weapon_persist_frames: u32,
    /// Bag tracks younger than this many frames are not evaluated.
    pub min_frames_before_bag_rule: u64,
    pub cooldowns: CooldownConfig,
    /// Center displacement tolerated before a bag counts as moved.
    pub movement_tolerance_px: f64,
    /// A person closer than this to a bag owns it.
    pub ownership_radius_px: f64,
    pub labels: LabelConfig,
    pub weapon_policy: WeaponPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            crowd_threshold: DEFAULT_CROWD_THRESHOLD,
            bag_stationary_seconds: DEFAULT_BAG_STATIONARY_SECS,
            weapon_persist_frames: DEFAULT_WEAPON_PERSIST_FRAMES,
            min_frames_before_bag_rule: DEFAULT_MIN_FRAMES_BEFORE_BAG,
            cooldowns: CooldownConfig::default(),
            movement_tolerance_px: DEFAULT_MOVEMENT_TOLERANCE_PX,
            ownership_radius_px: DEFAULT_OWNERSHIP_RADIUS_PX,
            labels: LabelConfig::default(),
            weapon_policy: WeaponPolicy::default(),
        }
    }
}

impl EngineConfig {
    /// Loads defaults, then the file named by `ANOMALY_CONFIG` (if set), then
    /// `ANOMALY_*` environment overrides, then validates.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("ANOMALY_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Loads a config file without consulting the environment.
    pub fn from_path(path: &Path) -> Result<Self> {
        let mut cfg = Self::from_file(read_config_file(path)?);
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: EngineConfigFile) -> Self {
        let defaults = Self::default();
        let cooldowns = file.cooldowns.unwrap_or_default();
        let labels = file.labels.unwrap_or_default();
        Self {
            crowd_threshold: file.crowd_threshold.unwrap_or(defaults.crowd_threshold),
            bag_stationary_seconds: file
                .bag_stationary_seconds
                .unwrap_or(defaults.bag_stationary_seconds),
            weapon_persist_frames: file
                .weapon_persist_frames
                .unwrap_or(defaults.weapon_persist_frames),
            min_frames_before_bag_rule: file
                .min_frames_before_bag_rule
                .unwrap_or(defaults.min_frames_before_bag_rule),
            cooldowns: CooldownConfig {
                crowd: cooldowns.crowd.unwrap_or(defaults.cooldowns.crowd),
                bag: cooldowns.bag.unwrap_or(defaults.cooldowns.bag),
                weapon: cooldowns.weapon.unwrap_or(defaults.cooldowns.weapon),
            },
            movement_tolerance_px: file
                .movement_tolerance_px
                .unwrap_or(defaults.movement_tolerance_px),
            ownership_radius_px: file
                .ownership_radius_px
                .unwrap_or(defaults.ownership_radius_px),
            labels: LabelConfig {
                bags: labels.bags.unwrap_or(defaults.labels.bags),
                weapons: labels.weapons.unwrap_or(defaults.labels.weapons),
                match_policy: labels.match_policy.unwrap_or(defaults.labels.match_policy),
            },
            weapon_policy: file.weapon_policy.unwrap_or(defaults.weapon_policy),
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(v) = env_parse::<usize>("ANOMALY_CROWD_THRESHOLD")? {
            self.crowd_threshold = v;
        }
        if let Some(v) = env_parse::<f64>("ANOMALY_BAG_SECONDS")? {
            self.bag_stationary_seconds = v;
        }
        if let Some(v) = env_parse::<u32>("ANOMALY_WEAPON_FRAMES")? {
            self.weapon_persist_frames = v;
        }
        if let Some(v) = env_parse::<u64>("ANOMALY_MIN_BAG_FRAMES")? {
            self.min_frames_before_bag_rule = v;
        }
        if let Some(v) = env_parse::<f64>("ANOMALY_COOLDOWN_CROWD")? {
            self.cooldowns.crowd = v;
        }
        if let Some(v) = env_parse::<f64>("ANOMALY_COOLDOWN_BAG")? {
            self.cooldowns.bag = v;
        }
        if let Some(v) = env_parse::<f64>("ANOMALY_COOLDOWN_WEAPON")? {
            self.cooldowns.weapon = v;
        }
        if let Ok(policy) = std::env::var("ANOMALY_LABEL_MATCH") {
            if !policy.trim().is_empty() {
                self.labels.match_policy = LabelMatch::parse(&policy)?;
            }
        }
        Ok(())
    }

    /// Rejects unusable values and normalizes label sets in place.
    pub fn validate(&mut self) -> Result<()> {
        if self.crowd_threshold == 0 {
            return Err(anyhow!("config: crowd_threshold must be >= 1"));
        }
        if self.weapon_persist_frames == 0 {
            return Err(anyhow!("config: weapon_persist_frames must be >= 1"));
        }
        if self.min_frames_before_bag_rule == 0 {
            return Err(anyhow!("config: min_frames_before_bag_rule must be >= 1"));
        }
        if !self.bag_stationary_seconds.is_finite() || self.bag_stationary_seconds <= 0.0 {
            return Err(anyhow!("config: bag_stationary_seconds must be > 0"));
        }
        for (name, value) in [
            ("movement_tolerance_px", self.movement_tolerance_px),
            ("ownership_radius_px", self.ownership_radius_px),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(anyhow!("config: {} must be finite and >= 0", name));
            }
        }
        self.cooldowns
            .validate()
            .map_err(|e| anyhow!("config: {}", e))?;
        self.weapon_policy
            .validate()
            .map_err(|e| anyhow!("config: {}", e))?;
        self.labels = self
            .labels
            .normalized()
            .map_err(|e| anyhow!("config: {}", e))?;
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>> {
    match std::env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| anyhow!("{} has an invalid value '{}'", key, raw)),
        _ => Ok(None),
    }
}

fn read_config_file(path: &Path) -> Result<EngineConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("toml"))
        .unwrap_or(false);
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}
