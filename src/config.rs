//! Session configuration
//!
//! Every threshold and cadence the integrity monitor uses lives here. The pixel
//! and noise thresholds are empirical and kept configurable so they can be
//! calibrated against real hardware.

use crate::error::ConfigError;
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default assessment length (30 minutes)
pub const DEFAULT_ASSESSMENT_SECS: u32 = 30 * 60;

/// Default age after which a draft may no longer be restored (1 hour)
pub const DEFAULT_DRAFT_TTL_SECS: i64 = 60 * 60;

/// Longest accepted sampling or autosave interval (1 hour)
pub const MAX_INTERVAL_MS: u64 = 60 * 60 * 1000;

/// Largest accepted noise window, in samples
pub const MAX_NOISE_WINDOW: usize = 120;

/// Longest accepted draft TTL or noise cooldown (7 days)
pub const MAX_RETENTION_SECS: i64 = 7 * 24 * 60 * 60;

/// Presence detector thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PresenceConfig {
    /// Sampling period
    pub interval_ms: u64,
    /// Presence when skin-tone ratio exceeds this...
    pub skin_tone_min_ratio: f64,
    /// ...or bright ratio exceeds this...
    pub bright_min_ratio: f64,
    /// ...and dark ratio stays below this
    pub dark_max_ratio: f64,
    /// Luma band counted as "bright" (exclusive bounds)
    pub bright_luma_low: f64,
    pub bright_luma_high: f64,
    /// Luma at or below this counts as near-black
    pub dark_luma_max: f64,
    /// Minimum red-green difference for the skin-tone heuristic
    pub skin_red_green_floor: i16,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            interval_ms: 2000,
            skin_tone_min_ratio: 0.08,
            bright_min_ratio: 0.25,
            dark_max_ratio: 0.7,
            bright_luma_low: 80.0,
            bright_luma_high: 220.0,
            dark_luma_max: 40.0,
            skin_red_green_floor: 15,
        }
    }
}

/// Noise detector thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NoiseConfig {
    pub interval_ms: u64,
    /// Average spectral energy above which a sample counts as loud
    pub floor: f64,
    /// Rolling window length
    pub window: usize,
    /// How many of the newest samples are inspected
    pub recent: usize,
    /// Loud samples required among the recent ones
    pub min_loud: usize,
    /// Minimum spacing between two noise violations
    pub cooldown_secs: i64,
}

impl Default for NoiseConfig {
    fn default() -> Self {
        Self {
            interval_ms: 1000,
            floor: 60.0,
            window: 5,
            recent: 3,
            min_loud: 2,
            cooldown_secs: 10,
        }
    }
}

/// Violation counts that force a lockout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockoutConfig {
    pub presence_lost_limit: u32,
    pub tab_switch_limit: u32,
}

impl Default for LockoutConfig {
    fn default() -> Self {
        Self {
            presence_lost_limit: 2,
            tab_switch_limit: 3,
        }
    }
}

/// Draft persistence settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DraftConfig {
    pub ttl_secs: i64,
    pub save_interval_ms: u64,
}

impl Default for DraftConfig {
    fn default() -> Self {
        Self {
            ttl_secs: DEFAULT_DRAFT_TTL_SECS,
            save_interval_ms: 2000,
        }
    }
}

/// Complete configuration for one assessment kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProctorConfig {
    /// Assessment kind; also namespaces the draft key
    pub assessment_kind: String,
    pub assessment_duration_secs: u32,
    /// Remaining-time marks at which a one-time advisory fires
    pub advisory_marks_secs: Vec<u32>,
    pub submission_endpoint: Option<String>,
    pub presence: PresenceConfig,
    pub noise: NoiseConfig,
    pub lockout: LockoutConfig,
    pub draft: DraftConfig,
}

impl Default for ProctorConfig {
    fn default() -> Self {
        Self {
            assessment_kind: "campus-hiring".to_string(),
            assessment_duration_secs: DEFAULT_ASSESSMENT_SECS,
            advisory_marks_secs: vec![300, 60],
            submission_endpoint: None,
            presence: PresenceConfig::default(),
            noise: NoiseConfig::default(),
            lockout: LockoutConfig::default(),
            draft: DraftConfig::default(),
        }
    }
}

impl ProctorConfig {
    /// Parse and validate a TOML document; missing keys take defaults
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: ProctorConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Serialize to TOML
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    /// Apply `PROCTOR_*` overrides from any name→value lookup
    pub fn apply_overrides(&mut self, lookup: &dyn ConfigProvider) -> Result<(), ConfigError> {
        if let Some(v) = lookup.get("PROCTOR_ASSESSMENT_KIND") {
            self.assessment_kind = v;
        }
        if let Some(v) = lookup.get("PROCTOR_DURATION_SECS") {
            self.assessment_duration_secs = parse_value("PROCTOR_DURATION_SECS", &v)?;
        }
        if let Some(v) = lookup.get("PROCTOR_SUBMISSION_ENDPOINT") {
            self.submission_endpoint = Some(v);
        }
        if let Some(v) = lookup.get("PROCTOR_NOISE_FLOOR") {
            self.noise.floor = parse_value("PROCTOR_NOISE_FLOOR", &v)?;
        }
        if let Some(v) = lookup.get("PROCTOR_DRAFT_TTL_SECS") {
            self.draft.ttl_secs = parse_value("PROCTOR_DRAFT_TTL_SECS", &v)?;
        }
        self.validate()
    }

    /// Apply overrides from the process environment
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(&EnvConfigProvider)
    }

    /// Reject values the detectors cannot work with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.assessment_kind.trim().is_empty() {
            return Err(ConfigError::Invalid("assessment_kind is empty".to_string()));
        }
        if self.assessment_duration_secs == 0 {
            return Err(ConfigError::Invalid(
                "assessment_duration_secs must be positive".to_string(),
            ));
        }
        if self.presence.interval_ms == 0
            || self.noise.interval_ms == 0
            || self.draft.save_interval_ms == 0
        {
            return Err(ConfigError::Invalid("intervals must be positive".to_string()));
        }
        for (name, ms) in [
            ("presence.interval_ms", self.presence.interval_ms),
            ("noise.interval_ms", self.noise.interval_ms),
            ("draft.save_interval_ms", self.draft.save_interval_ms),
        ] {
            if ms > MAX_INTERVAL_MS {
                return Err(ConfigError::Invalid(format!(
                    "{name} cannot exceed {MAX_INTERVAL_MS}"
                )));
            }
        }
        for (name, ratio) in [
            ("skin_tone_min_ratio", self.presence.skin_tone_min_ratio),
            ("bright_min_ratio", self.presence.bright_min_ratio),
            ("dark_max_ratio", self.presence.dark_max_ratio),
        ] {
            if !(0.0..=1.0).contains(&ratio) {
                return Err(ConfigError::Invalid(format!("{name} must be within 0..1")));
            }
        }
        if self.presence.bright_luma_low >= self.presence.bright_luma_high {
            return Err(ConfigError::Invalid("bright luma band is empty".to_string()));
        }
        let noise = &self.noise;
        if noise.recent == 0 || noise.min_loud == 0 {
            return Err(ConfigError::Invalid(
                "noise.recent and noise.min_loud must be positive".to_string(),
            ));
        }
        if noise.min_loud > noise.recent {
            return Err(ConfigError::Invalid(
                "noise.min_loud cannot exceed noise.recent".to_string(),
            ));
        }
        if noise.recent > noise.window {
            return Err(ConfigError::Invalid(
                "noise.recent cannot exceed noise.window".to_string(),
            ));
        }
        if noise.window > MAX_NOISE_WINDOW {
            return Err(ConfigError::Invalid(format!(
                "noise.window cannot exceed {MAX_NOISE_WINDOW}"
            )));
        }
        if noise.cooldown_secs < 0 || self.draft.ttl_secs < 0 {
            return Err(ConfigError::Invalid("durations cannot be negative".to_string()));
        }
        if noise.cooldown_secs > MAX_RETENTION_SECS || self.draft.ttl_secs > MAX_RETENTION_SECS {
            return Err(ConfigError::Invalid(format!(
                "noise.cooldown_secs and draft.ttl_secs cannot exceed {MAX_RETENTION_SECS}"
            )));
        }
        if self.lockout.presence_lost_limit == 0 || self.lockout.tab_switch_limit == 0 {
            return Err(ConfigError::Invalid("lockout limits must be positive".to_string()));
        }
        Ok(())
    }

    pub fn presence_interval(&self) -> Duration {
        interval(self.presence.interval_ms)
    }

    pub fn noise_interval(&self) -> Duration {
        interval(self.noise.interval_ms)
    }

    pub fn draft_save_interval(&self) -> Duration {
        interval(self.draft.save_interval_ms)
    }
}

/// Milliseconds to a duration, clamped to `MAX_INTERVAL_MS`
fn interval(ms: u64) -> Duration {
    let ms = i64::try_from(ms.min(MAX_INTERVAL_MS)).unwrap_or(i64::MAX);
    Duration::milliseconds(ms)
}

fn parse_value<T: std::str::FromStr>(name: &str, raw: &str) -> Result<T, ConfigError> {
    raw.trim()
        .parse()
        .map_err(|_| ConfigError::Invalid(format!("{name}: cannot parse {raw:?}")))
}

/// Read-only name→value lookup for environment-specific settings
pub trait ConfigProvider {
    fn get(&self, name: &str) -> Option<String>;

    fn get_or(&self, name: &str, default: &str) -> String {
        self.get(name).unwrap_or_else(|| default.to_string())
    }
}

/// Lookup backed by the process environment
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvConfigProvider;

impl ConfigProvider for EnvConfigProvider {
    fn get(&self, name: &str) -> Option<String> {
        std::env::var(name).ok().filter(|v| !v.is_empty())
    }
}

impl ConfigProvider for ProctorConfig {
    fn get(&self, name: &str) -> Option<String> {
        match name {
            "assessment_kind" => Some(self.assessment_kind.clone()),
            "submission_endpoint" => self.submission_endpoint.clone(),
            "assessment_duration_secs" => Some(self.assessment_duration_secs.to_string()),
            _ => None,
        }
    }
}

impl ConfigProvider for std::collections::HashMap<String, String> {
    fn get(&self, name: &str) -> Option<String> {
        std::collections::HashMap::get(self, name).cloned()
    }
}
