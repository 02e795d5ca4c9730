// src/config/personalization.rs
//! Personalization settings loaded from TOML.
//!
//! `[weights]` and `[thresholds]` have no defaults: a config without them is
//! rejected at load. The remaining sections fall back to the defaults below.

use anyhow::{anyhow, bail, Context};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

// --- env defaults & names ---
pub const DEFAULT_CONFIG_PATH: &str = "config/personalization.toml";

pub const ENV_CONFIG_PATH: &str = "PERSONALIZATION_CONFIG_PATH";
pub const ENV_MIN_RELEVANCE: &str = "PERSONALIZATION_MIN_RELEVANCE";
pub const ENV_CACHE_TTL_MINUTES: &str = "PERSONALIZATION_CACHE_TTL_MINUTES";

const WEIGHT_SUM_TOLERANCE: f64 = 1e-6;

#[derive(Debug, Clone, Deserialize)]
pub struct PersonalizationConfig {
    pub weights: ScoringWeights,
    pub thresholds: Thresholds,
    #[serde(default)]
    pub time_decay: TimeDecay,
    #[serde(default)]
    pub cache: CacheSettings,
    #[serde(default)]
    pub paging: PagingSettings,
    #[serde(default)]
    pub signals: SignalSettings,
}

/// Coefficients of the four score components. Operators keep them summing to 1.0.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct ScoringWeights {
    pub topic_preference: f64,
    pub reading_history: f64,
    pub positive_feedback: f64,
    pub recency: f64,
}

impl ScoringWeights {
    pub fn sum(&self) -> f64 {
        self.topic_preference + self.reading_history + self.positive_feedback + self.recency
    }

    fn as_named(&self) -> [(&'static str, f64); 4] {
        [
            ("topic_preference", self.topic_preference),
            ("reading_history", self.reading_history),
            ("positive_feedback", self.positive_feedback),
            ("recency", self.recency),
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct Thresholds {
    /// Completion percentage at which a read counts as engaged.
    pub min_completion_pct: u8,
    /// Read duration at which a read counts as engaged.
    pub min_read_secs: u32,
    /// Feedback level (1-5) at which feedback counts as high interest.
    pub high_interest_level: i8,
    /// Articles scoring below this are left out of the feed.
    pub min_relevance_score: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct TimeDecay {
    #[serde(default = "default_decay_days")]
    pub decay_days: i64,
    #[serde(default = "default_decay_rate")]
    pub decay_rate: f64,
}

fn default_decay_days() -> i64 {
    30
}
fn default_decay_rate() -> f64 {
    0.95
}

impl Default for TimeDecay {
    fn default() -> Self {
        Self {
            decay_days: default_decay_days(),
            decay_rate: default_decay_rate(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct CacheSettings {
    #[serde(default = "default_ttl_minutes")]
    pub ttl_minutes: u64,
    #[serde(default = "default_max_cache_size")]
    pub max_cache_size: usize,
}

fn default_ttl_minutes() -> u64 {
    10
}
fn default_max_cache_size() -> usize {
    1000
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            ttl_minutes: default_ttl_minutes(),
            max_cache_size: default_max_cache_size(),
        }
    }
}

impl CacheSettings {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_minutes.saturating_mul(60))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct PagingSettings {
    #[serde(default = "default_limit")]
    pub default_limit: usize,
    #[serde(default = "default_max_limit")]
    pub max_limit: usize,
}

fn default_limit() -> usize {
    20
}
fn default_max_limit() -> usize {
    100
}

impl Default for PagingSettings {
    fn default() -> Self {
        Self {
            default_limit: default_limit(),
            max_limit: default_max_limit(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct SignalSettings {
    /// Most recent related history/feedback entries considered per topic.
    #[serde(default = "default_history_window")]
    pub history_window: usize,
}

fn default_history_window() -> usize {
    50
}

impl Default for SignalSettings {
    fn default() -> Self {
        Self {
            history_window: default_history_window(),
        }
    }
}

impl PersonalizationConfig {
    /// Load from a TOML file. Uses PERSONALIZATION_CONFIG_PATH or defaults to
    /// "config/personalization.toml", then applies env overrides.
    pub fn from_toml() -> anyhow::Result<Self> {
        let path = std::env::var(ENV_CONFIG_PATH)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));

        // validated once, after the overrides
        let mut cfg = Self::parse_file(&path)?;
        cfg.apply_env_overrides();
        cfg.validate()
            .with_context(|| format!("invalid personalization config at {}", path.display()))?;
        Ok(cfg)
    }

    /// Load from an explicit path (no env overrides).
    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        let cfg = Self::parse_file(path)?;
        cfg.validate()
            .with_context(|| format!("invalid personalization config at {}", path.display()))?;
        Ok(cfg)
    }

    /// Parse and validate a TOML string.
    pub fn from_toml_str(toml_str: &str) -> anyhow::Result<Self> {
        let cfg: PersonalizationConfig = toml::from_str(toml_str)?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn parse_file(path: &Path) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path).with_context(|| {
            format!(
                "failed to read personalization config at {}",
                path.display()
            )
        })?;
        toml::from_str(&content)
            .with_context(|| format!("invalid personalization config at {}", path.display()))
    }

    /// Override the relevance cutoff and cache TTL from env. Unparsable values are ignored.
    pub fn apply_env_overrides(&mut self) {
        if let Some(t) = parse_min_relevance_env(std::env::var(ENV_MIN_RELEVANCE).ok()) {
            self.thresholds.min_relevance_score = t;
        }
        if let Some(m) = parse_ttl_env(std::env::var(ENV_CACHE_TTL_MINUTES).ok()) {
            self.cache.ttl_minutes = m;
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        for (name, w) in self.weights.as_named() {
            if !w.is_finite() || w < 0.0 {
                bail!("weight `{name}` must be a finite, non-negative number (got {w})");
            }
        }

        let t = &self.thresholds;
        if t.min_completion_pct > 100 {
            bail!(
                "min_completion_pct must be within 0..=100 (got {})",
                t.min_completion_pct
            );
        }
        if !(1..=5).contains(&t.high_interest_level) {
            bail!(
                "high_interest_level must be within 1..=5 (got {})",
                t.high_interest_level
            );
        }
        if !t.min_relevance_score.is_finite() {
            bail!("min_relevance_score must be finite");
        }

        let d = &self.time_decay;
        if d.decay_days < 0 {
            bail!("decay_days must not be negative (got {})", d.decay_days);
        }
        // 1.0 would never decay
        if !(d.decay_rate > 0.0 && d.decay_rate < 1.0) {
            bail!("decay_rate must be within (0, 1) (got {})", d.decay_rate);
        }

        if self.cache.ttl_minutes == 0 {
            bail!("cache ttl_minutes must be at least 1");
        }
        if self.cache.max_cache_size == 0 {
            bail!("cache max_cache_size must be at least 1");
        }

        let p = &self.paging;
        if p.default_limit == 0 || p.max_limit < p.default_limit {
            return Err(anyhow!(
                "paging requires 1 <= default_limit <= max_limit (got {} / {})",
                p.default_limit,
                p.max_limit
            ));
        }
        if self.signals.history_window == 0 {
            bail!("signals history_window must be at least 1");
        }

        let sum = self.weights.sum();
        if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            warn!(
                target: "personalization",
                weight_sum = sum,
                "scoring weights do not sum to 1.0; scores are used unnormalized"
            );
        }
        Ok(())
    }
}

// parse optional float env and clamp to <0.0..=1.0>
fn parse_min_relevance_env(raw: Option<String>) -> Option<f64> {
    raw.and_then(|s| s.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite())
        .map(|v| v.clamp(0.0, 1.0))
}

fn parse_ttl_env(raw: Option<String>) -> Option<u64> {
    raw.and_then(|s| s.trim().parse::<u64>().ok())
        .filter(|m| *m >= 1)
}
