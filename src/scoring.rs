//! # Scoring Engine
//! Weighted four-signal relevance for a (user, article) pair.
//!
//! score = w_topic * topic + w_history * history + w_feedback * feedback + w_recency * recency
//!
//! - Components are each in `[0, 1]`; the weighted sum is used as-is.
//! - Articles scoring below `min_relevance_score` are excluded, not zeroed.
//! - Ranking: score desc, then `published_at` desc, then id asc.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::cmp::Ordering;
use std::sync::Arc;

use crate::config::{PersonalizationConfig, ScoringWeights, TimeDecay};
use crate::error::{PersonalizationError, Result};
use crate::model::Article;
use crate::signals::UserSignals;

// Component levels above which a component explains the recommendation.
const STRONG_COMPONENT: f64 = 0.7;
const FRESH_RECENCY: f64 = 0.9;

pub const REASON_TOPIC: &str = "matches your interests";
pub const REASON_HISTORY: &str = "similar to articles you've engaged with";
pub const REASON_FEEDBACK: &str = "based on your positive feedback";
pub const REASON_RECENT: &str = "newly published";
pub const REASON_DEFAULT: &str = "recommended for you";

/// Per-component values before weighting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ScoreBreakdown {
    pub topic: f64,
    pub history: f64,
    pub feedback: f64,
    pub recency: f64,
}

impl ScoreBreakdown {
    /// Human-readable explanations, strongest signals first.
    pub fn reasons(&self) -> Vec<&'static str> {
        let mut out = Vec::new();
        if self.topic > STRONG_COMPONENT {
            out.push(REASON_TOPIC);
        }
        if self.history > STRONG_COMPONENT {
            out.push(REASON_HISTORY);
        }
        if self.feedback > STRONG_COMPONENT {
            out.push(REASON_FEEDBACK);
        }
        if self.recency > FRESH_RECENCY {
            out.push(REASON_RECENT);
        }
        if out.is_empty() {
            out.push(REASON_DEFAULT);
        }
        out
    }
}

/// An article that passed the relevance cutoff.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredArticle {
    pub article: Arc<Article>,
    pub score: f64,
    pub breakdown: ScoreBreakdown,
    pub reasons: Vec<&'static str>,
}

/// Total ranking order.
pub fn rank_order(a: &ScoredArticle, b: &ScoredArticle) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| b.article.published_at.cmp(&a.article.published_at))
        .then_with(|| a.article.id.cmp(&b.article.id))
}

/// 1.0 up to `decay_days` of age (whole days), then `decay_rate^(age - decay_days)`.
/// Articles dated in the future count as brand new.
pub fn recency_factor(published_at: DateTime<Utc>, now: DateTime<Utc>, decay: &TimeDecay) -> f64 {
    let age_days = (now - published_at).num_days();
    if age_days <= decay.decay_days {
        return 1.0;
    }
    let excess = i32::try_from(age_days - decay.decay_days).unwrap_or(i32::MAX);
    decay.decay_rate.powi(excess).max(0.0)
}

#[derive(Debug, Clone)]
pub struct ScoringEngine {
    weights: ScoringWeights,
    decay: TimeDecay,
    min_relevance: f64,
}

impl ScoringEngine {
    pub fn new(weights: ScoringWeights, decay: TimeDecay, min_relevance: f64) -> Self {
        Self {
            weights,
            decay,
            min_relevance,
        }
    }

    pub fn from_config(cfg: &PersonalizationConfig) -> Self {
        Self::new(cfg.weights, cfg.time_decay, cfg.thresholds.min_relevance_score)
    }

    /// Weighted sum of the components, no normalization.
    pub fn combine(&self, b: &ScoreBreakdown) -> f64 {
        let w = &self.weights;
        w.topic_preference * b.topic
            + w.reading_history * b.history
            + w.positive_feedback * b.feedback
            + w.recency * b.recency
    }

    pub fn breakdown(
        &self,
        signals: &UserSignals,
        article: &Article,
        now: DateTime<Utc>,
    ) -> ScoreBreakdown {
        let topic = article.topic_id;
        ScoreBreakdown {
            topic: signals.topic_preference(topic),
            history: signals.history_engagement(topic),
            feedback: signals.feedback_interest(topic),
            recency: recency_factor(article.published_at, now, &self.decay),
        }
    }

    /// Score one published article. `Ok(None)` means it fell below the cutoff.
    pub fn score(
        &self,
        signals: &UserSignals,
        article: &Arc<Article>,
        now: DateTime<Utc>,
    ) -> Result<Option<ScoredArticle>> {
        if !article.is_published() {
            return Err(PersonalizationError::InvalidInput(format!(
                "article {} is {}, only PUBLISHED articles can be scored",
                article.id, article.status
            )));
        }
        let breakdown = self.breakdown(signals, article, now);
        let score = self.combine(&breakdown);
        if score < self.min_relevance {
            return Ok(None);
        }
        Ok(Some(ScoredArticle {
            article: Arc::clone(article),
            score,
            reasons: breakdown.reasons(),
            breakdown,
        }))
    }

    /// Score every candidate, drop the excluded ones and sort by rank.
    pub fn rank<I>(&self, signals: &UserSignals, candidates: I, now: DateTime<Utc>) -> Result<Vec<ScoredArticle>>
    where
        I: IntoIterator<Item = Arc<Article>>,
    {
        let mut ranked = Vec::new();
        for article in candidates {
            if let Some(scored) = self.score(signals, &article, now)? {
                ranked.push(scored);
            }
        }
        ranked.sort_by(rank_order);
        Ok(ranked)
    }
}
