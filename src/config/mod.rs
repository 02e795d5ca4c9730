// src/config/mod.rs
pub mod personalization;

pub use personalization::{
    CacheSettings, PagingSettings, PersonalizationConfig, ScoringWeights, SignalSettings,
    Thresholds, TimeDecay,
};
