//! Track classification.
//!
//! Maps a track's class label onto the categories the rules care about.
//! Classification is a pure function of the label: position, confidence and
//! track history are never consulted.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

pub const PERSON_LABEL: &str = "person";

pub const DEFAULT_BAG_LABELS: &[&str] = &["backpack", "handbag", "suitcase", "briefcase", "bag"];
pub const DEFAULT_WEAPON_LABELS: &[&str] =
    &["knife", "gun", "pistol", "firearm", "weapon", "scissors"];

/// Category a confirmed track falls into for one frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Category {
    Person,
    Bag,
    WeaponCandidate,
    Ignored,
}

/// How configured label names are compared with normalized track labels.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LabelMatch {
    /// Normalized label must equal a configured name.
    #[default]
    Exact,
    /// Normalized label must contain a configured name.
    Substring,
}

impl LabelMatch {
    pub fn parse(raw: &str) -> Result<Self> {
        match raw.trim().to_lowercase().as_str() {
            "exact" => Ok(LabelMatch::Exact),
            "substring" => Ok(LabelMatch::Substring),
            other => Err(anyhow!(
                "label match policy must be 'exact' or 'substring' (got '{}')",
                other
            )),
        }
    }

    fn matches(self, label: &str, name: &str) -> bool {
        match self {
            LabelMatch::Exact => label == name,
            LabelMatch::Substring => label.contains(name),
        }
    }
}

/// Label sets and match policy used by [`LabelClassifier`].
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct LabelConfig {
    pub bags: Vec<String>,
    pub weapons: Vec<String>,
    #[serde(default)]
    pub match_policy: LabelMatch,
}

impl Default for LabelConfig {
    fn default() -> Self {
        Self {
            bags: DEFAULT_BAG_LABELS.iter().map(|s| s.to_string()).collect(),
            weapons: DEFAULT_WEAPON_LABELS.iter().map(|s| s.to_string()).collect(),
            match_policy: LabelMatch::Exact,
        }
    }
}

/// Configured label names must be short lowercase tokens.
///
/// Allowed: "handbag", "cell phone", "box-cutter"
/// Disallowed: empty names, uppercase, punctuation outside [ _-].
pub fn validate_label_name(name: &str) -> Result<()> {
    static LABEL_RE: OnceLock<regex::Regex> = OnceLock::new();
    let re = LABEL_RE.get_or_init(|| {
        regex::Regex::new(r"^[a-z0-9][a-z0-9 _-]{0,63}$").expect("label regex compiles")
    });
    if !re.is_match(name) {
        return Err(anyhow!(
            "label '{}' must match ^[a-z0-9][a-z0-9 _-]{{0,63}}$",
            name
        ));
    }
    Ok(())
}

impl LabelConfig {
    /// Lowercases and trims every configured name, then validates the sets.
    pub fn normalized(&self) -> Result<Self> {
        let normalize = |names: &[String]| -> Vec<String> {
            names.iter().map(|n| n.trim().to_lowercase()).collect()
        };
        let cfg = Self {
            bags: normalize(&self.bags),
            weapons: normalize(&self.weapons),
            match_policy: self.match_policy,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<()> {
        if self.bags.is_empty() {
            return Err(anyhow!("bag label set must not be empty"));
        }
        if self.weapons.is_empty() {
            return Err(anyhow!("weapon label set must not be empty"));
        }
        for name in self.bags.iter().chain(self.weapons.iter()) {
            validate_label_name(name)?;
            if name == PERSON_LABEL {
                return Err(anyhow!("'{}' is reserved for the person category", name));
            }
        }
        if let Some(shared) = self.bags.iter().find(|b| self.weapons.contains(b)) {
            return Err(anyhow!(
                "label '{}' appears in both bag and weapon sets",
                shared
            ));
        }
        Ok(())
    }
}

/// Classifies class labels into [`Category`] values.
#[derive(Clone, Debug)]
pub struct LabelClassifier {
    labels: LabelConfig,
}

impl LabelClassifier {
    /// Builds a classifier from an already validated label configuration.
    pub fn new(labels: LabelConfig) -> Self {
        Self { labels }
    }

    /// Person is checked first, then bags, then weapons. Anything else,
    /// including empty or unreadable labels, is ignored.
    pub fn classify(&self, class_label: &str) -> Category {
        let label = normalize_label(class_label);
        if label.is_empty() {
            return Category::Ignored;
        }
        if label == PERSON_LABEL {
            return Category::Person;
        }
        let policy = self.labels.match_policy;
        if self.labels.bags.iter().any(|name| policy.matches(&label, name)) {
            return Category::Bag;
        }
        if self
            .labels
            .weapons
            .iter()
            .any(|name| policy.matches(&label, name))
        {
            return Category::WeaponCandidate;
        }
        Category::Ignored
    }
}

impl Default for LabelClassifier {
    fn default() -> Self {
        Self::new(LabelConfig::default())
    }
}

/// Trims and lowercases a raw tracker label.
pub fn normalize_label(raw: &str) -> String {
    raw.trim().to_lowercase()
}
