//! # Signal Extractor
//! Turns a user's raw engagement facts into per-topic ratios the scoring
//! engine can read in O(1) per candidate.
//!
//! Missing data is never an error here: a user without preferences, history
//! or feedback simply yields zero for the matching component.

use serde::Serialize;
use std::collections::HashMap;
use tracing::debug;

use crate::config::Thresholds;
use crate::error::StoreError;
use crate::model::{FeedbackEntry, ReadingHistoryEntry, TopicId, UserId};
use crate::store::SignalRepository;

/// Reads of one topic at which its inferred interest saturates at 1.0.
pub const INFERRED_SATURATION_READS: u32 = 20;

/// A read counts as engaged if EITHER threshold is met.
pub fn is_engaged(entry: &ReadingHistoryEntry, thresholds: &Thresholds) -> bool {
    entry.completion_pct >= thresholds.min_completion_pct
        || entry.read_secs >= thresholds.min_read_secs
}

pub fn is_high_interest(entry: &FeedbackEntry, thresholds: &Thresholds) -> bool {
    entry.interest_level >= thresholds.high_interest_level
}

/// `hits` out of `total` considered entries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Ratio {
    pub hits: u32,
    pub total: u32,
}

impl Ratio {
    pub fn value(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            f64::from(self.hits) / f64::from(self.total)
        }
    }

    fn push(&mut self, hit: bool) {
        self.total += 1;
        if hit {
            self.hits += 1;
        }
    }
}

/// A topic the user reads, with how much and what they said about it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InferredInterest {
    pub topic_id: TopicId,
    pub reads: u32,
    pub inferred_score: f64,
    pub explicit_weight: Option<f64>,
}

/// Per-user signals, grouped by topic.
#[derive(Debug, Clone, Default)]
pub struct UserSignals {
    preferences: HashMap<TopicId, f64>,
    history: HashMap<TopicId, Ratio>,
    feedback: HashMap<TopicId, Ratio>,
    reads: HashMap<TopicId, u32>,
}

impl UserSignals {
    /// Explicit preference for the topic, clamped to `[0, 1]`; 0 without one.
    pub fn topic_preference(&self, topic: Option<TopicId>) -> f64 {
        topic
            .and_then(|t| self.preferences.get(&t))
            .map(|w| w.clamp(0.0, 1.0))
            .unwrap_or(0.0)
    }

    /// Fraction of engaged reads among the recent reads of the topic.
    pub fn history_engagement(&self, topic: Option<TopicId>) -> f64 {
        topic
            .and_then(|t| self.history.get(&t))
            .map(Ratio::value)
            .unwrap_or(0.0)
    }

    /// Fraction of high-interest feedback among the recent feedback on the topic.
    pub fn feedback_interest(&self, topic: Option<TopicId>) -> f64 {
        topic
            .and_then(|t| self.feedback.get(&t))
            .map(Ratio::value)
            .unwrap_or(0.0)
    }

    pub fn is_empty(&self) -> bool {
        self.preferences.is_empty() && self.history.is_empty() && self.feedback.is_empty()
    }

    /// Topics ordered by read count (desc), then topic id.
    pub fn inferred_interests(&self) -> Vec<InferredInterest> {
        let mut out: Vec<InferredInterest> = self
            .reads
            .iter()
            .map(|(&topic_id, &reads)| InferredInterest {
                topic_id,
                reads,
                inferred_score: (f64::from(reads) / f64::from(INFERRED_SATURATION_READS)).min(1.0),
                explicit_weight: self.preferences.get(&topic_id).copied(),
            })
            .collect();
        out.sort_by(|a, b| b.reads.cmp(&a.reads).then(a.topic_id.cmp(&b.topic_id)));
        out
    }
}

#[derive(Debug, Clone)]
pub struct SignalExtractor {
    thresholds: Thresholds,
    history_window: usize,
}

impl SignalExtractor {
    pub fn new(thresholds: Thresholds, history_window: usize) -> Self {
        Self {
            thresholds,
            history_window: history_window.max(1),
        }
    }

    /// Load everything scoring needs for `user` in three repository calls.
    pub fn extract(
        &self,
        user: UserId,
        repo: &dyn SignalRepository,
    ) -> Result<UserSignals, StoreError> {
        let preferences = repo.topic_preferences(user)?;
        let history = repo.reading_history(user)?;
        let feedback = repo.feedback(user)?;
        Ok(self.summarize(
            preferences.iter().map(|p| (p.topic_id, p.weight)),
            &history,
            &feedback,
        ))
    }

    /// Group already-loaded facts. `history` and `feedback` must be most recent first.
    pub fn summarize(
        &self,
        preferences: impl IntoIterator<Item = (TopicId, f64)>,
        history: &[ReadingHistoryEntry],
        feedback: &[FeedbackEntry],
    ) -> UserSignals {
        let mut signals = UserSignals {
            preferences: preferences.into_iter().collect(),
            ..Default::default()
        };

        for entry in history {
            let Some(topic) = entry.topic_id else { continue };
            *signals.reads.entry(topic).or_default() += 1;
            let ratio = signals.history.entry(topic).or_default();
            if (ratio.total as usize) < self.history_window {
                ratio.push(is_engaged(entry, &self.thresholds));
            }
        }

        for entry in feedback {
            let Some(topic) = entry.topic_id else { continue };
            let ratio = signals.feedback.entry(topic).or_default();
            if (ratio.total as usize) < self.history_window {
                ratio.push(is_high_interest(entry, &self.thresholds));
            }
        }

        debug!(
            preferences = signals.preferences.len(),
            history_topics = signals.history.len(),
            feedback_topics = signals.feedback.len(),
            "signals extracted"
        );
        signals
    }
}
