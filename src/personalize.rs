//! # Personalized Feed Orchestrator
//! Filter → extract signals → score → sort → cache → paginate.
//!
//! The cache holds each user's full ranked feed over all published articles.
//! Every request (hit or miss) intersects that ranking with the candidate set
//! freshly selected by its own filters, keeping the ranked order. A cached
//! feed therefore serves any filter combination, and articles that left
//! `PUBLISHED` out-of-band drop out at once.

use chrono::{DateTime, Utc};
use metrics::histogram;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

use crate::cache::{FeedCache, Lookup};
use crate::config::{PagingSettings, PersonalizationConfig};
use crate::error::{PersonalizationError, Result};
use crate::filter::{build_article_filter, build_feed_filter, ArticleFilter, FeedFilter};
use crate::model::{ArticleId, Feed, FeedbackEntry, ReadingHistoryEntry, TopicId, UserId};
use crate::scoring::{ScoredArticle, ScoringEngine};
use crate::signals::{InferredInterest, SignalExtractor};
use crate::store::{ArticleRepository, InMemoryStore, SignalRepository, SignalWriter};

pub const ENV_DEV_LOG: &str = "PERSONALIZATION_DEV_LOG";

// Dev logging gate: PERSONALIZATION_DEV_LOG=1 AND dev env (debug or SHUTTLE_ENV in {local,development,dev})
pub(crate) fn dev_logging_enabled() -> bool {
    let on = std::env::var(ENV_DEV_LOG).ok().as_deref() == Some("1");
    if !on {
        return false;
    }
    if cfg!(debug_assertions) {
        return true;
    }
    matches!(
        std::env::var("SHUTTLE_ENV")
            .unwrap_or_default()
            .to_ascii_lowercase()
            .as_str(),
        "local" | "development" | "dev"
    )
}

/// Short SHA-256 prefix so user ids never reach the logs raw.
pub(crate) fn anon_hash(user: UserId) -> String {
    use sha2::{Digest, Sha256};
    let digest = Sha256::digest(user.to_string().as_bytes());
    let mut out = String::with_capacity(12);
    for b in digest.iter().take(6) {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

fn log_failure(op: &'static str, user: UserId, err: &PersonalizationError) {
    let user = anon_hash(user);
    match err {
        PersonalizationError::Storage(e) => {
            error!(target: "personalization", op, %user, error = %e, "storage failure")
        }
        PersonalizationError::InvalidInput(msg) => {
            warn!(target: "personalization", op, %user, %msg, "invalid scoring input")
        }
        other => debug!(target: "personalization", op, %user, code = other.code(), "request rejected"),
    }
}

/// Offset/limit pair; a missing limit falls back to the configured default.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct PageRequest {
    #[serde(default)]
    pub offset: usize,
    #[serde(default)]
    pub limit: Option<usize>,
}

impl PageRequest {
    pub fn new(offset: usize, limit: usize) -> Self {
        Self {
            offset,
            limit: Some(limit),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CacheStatus {
    Hit,
    Miss,
}

impl CacheStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheStatus::Hit => "HIT",
            CacheStatus::Miss => "MISS",
        }
    }
}

/// One page of the ranked feed.
#[derive(Debug, Clone)]
pub struct FeedPage {
    pub items: Vec<ScoredArticle>,
    /// Ranked articles matching the filters, before pagination.
    pub total_count: usize,
    pub offset: usize,
    pub limit: usize,
    pub cache: CacheStatus,
}

pub struct PersonalizedFeedService {
    articles: Arc<dyn ArticleRepository>,
    signals: Arc<dyn SignalRepository>,
    writer: Arc<dyn SignalWriter>,
    engine: ScoringEngine,
    extractor: SignalExtractor,
    cache: Arc<FeedCache>,
    paging: PagingSettings,
}

impl PersonalizedFeedService {
    pub fn new(
        cfg: &PersonalizationConfig,
        articles: Arc<dyn ArticleRepository>,
        signals: Arc<dyn SignalRepository>,
        writer: Arc<dyn SignalWriter>,
        cache: Arc<FeedCache>,
    ) -> Self {
        Self {
            articles,
            signals,
            writer,
            engine: ScoringEngine::from_config(cfg),
            extractor: SignalExtractor::new(cfg.thresholds, cfg.signals.history_window),
            cache,
            paging: cfg.paging,
        }
    }

    /// Service over one in-memory store, with a cache sized from `cfg`.
    pub fn in_memory(cfg: &PersonalizationConfig, store: Arc<InMemoryStore>) -> Self {
        let cache = Arc::new(FeedCache::from_settings(&cfg.cache));
        Self::new(cfg, store.clone(), store.clone(), store, cache)
    }

    pub fn cache(&self) -> &Arc<FeedCache> {
        &self.cache
    }

    fn resolve_limit(&self, limit: Option<usize>) -> Result<usize> {
        match limit {
            Some(0) => Err(PersonalizationError::Validation(
                "limit must be at least 1".into(),
            )),
            Some(n) => Ok(n.min(self.paging.max_limit)),
            None => Ok(self.paging.default_limit),
        }
    }

    fn ensure_user(&self, user: UserId) -> Result<()> {
        if self.signals.user_exists(user)? {
            Ok(())
        } else {
            Err(PersonalizationError::not_found("user", user))
        }
    }

    pub fn get_personalized_feed(
        &self,
        user: UserId,
        filters: &ArticleFilter,
        page: PageRequest,
    ) -> Result<FeedPage> {
        self.get_personalized_feed_at(user, filters, page, Utc::now())
    }

    /// Ranked, filtered page for `user` as of `now`.
    pub fn get_personalized_feed_at(
        &self,
        user: UserId,
        filters: &ArticleFilter,
        page: PageRequest,
        now: DateTime<Utc>,
    ) -> Result<FeedPage> {
        self.feed_inner(user, filters, page, now)
            .inspect_err(|e| log_failure("feed", user, e))
    }

    fn feed_inner(
        &self,
        user: UserId,
        filters: &ArticleFilter,
        page: PageRequest,
        now: DateTime<Utc>,
    ) -> Result<FeedPage> {
        filters.validate()?;
        let limit = self.resolve_limit(page.limit)?;
        self.ensure_user(user)?;
        if let Some(feed_id) = filters.feed_id {
            if !self.articles.feed_exists(feed_id)? {
                return Err(PersonalizationError::not_found("feed", feed_id));
            }
        }

        let started = Instant::now();
        let published = self.articles.published_articles()?;
        let predicate = build_article_filter(filters);
        let candidates: HashSet<ArticleId> = published
            .iter()
            .filter(|a| predicate.matches(a))
            .map(|a| a.id)
            .collect();

        let (ranked, cache) = match self.cache.lookup_at(user, now) {
            Lookup::Hit(hit) => (hit.ranked, CacheStatus::Hit),
            Lookup::Miss(ticket) => {
                // scoring runs outside the cache lock
                let signals = self.extractor.extract(user, self.signals.as_ref())?;
                let ranked = self.engine.rank(&signals, published, now)?;
                (self.cache.fill_at(ticket, ranked, now).ranked, CacheStatus::Miss)
            }
        };

        let matching: Vec<&ScoredArticle> = ranked
            .iter()
            .filter(|s| candidates.contains(&s.article.id))
            .collect();
        let total_count = matching.len();
        let items: Vec<ScoredArticle> = matching
            .into_iter()
            .skip(page.offset)
            .take(limit)
            .cloned()
            .collect();

        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        histogram!("feed_rank_duration_ms").record(elapsed_ms);

        if dev_logging_enabled() {
            info!(
                target: "personalization",
                user = %anon_hash(user),
                cache = cache.as_str(),
                candidates = candidates.len(),
                total_count,
                returned = items.len(),
                elapsed_ms,
                "feed served"
            );
        }

        Ok(FeedPage {
            items,
            total_count,
            offset: page.offset,
            limit,
            cache,
        })
    }

    pub fn similar_articles(
        &self,
        user: UserId,
        article_id: ArticleId,
        limit: Option<usize>,
    ) -> Result<Vec<ScoredArticle>> {
        self.similar_articles_at(user, article_id, limit, Utc::now())
    }

    /// Published articles sharing the source article's topic, ranked for `user`.
    /// Not cached.
    pub fn similar_articles_at(
        &self,
        user: UserId,
        article_id: ArticleId,
        limit: Option<usize>,
        now: DateTime<Utc>,
    ) -> Result<Vec<ScoredArticle>> {
        let run = || -> Result<Vec<ScoredArticle>> {
            let limit = self.resolve_limit(limit)?;
            self.ensure_user(user)?;
            let source = self
                .articles
                .article(article_id)?
                .ok_or_else(|| PersonalizationError::not_found("article", article_id))?;
            let Some(topic) = source.topic_id else {
                return Ok(Vec::new());
            };

            let candidates: Vec<_> = self
                .articles
                .published_articles()?
                .into_iter()
                .filter(|a| a.id != article_id && a.topic_id == Some(topic))
                .collect();
            let signals = self.extractor.extract(user, self.signals.as_ref())?;
            let mut ranked = self.engine.rank(&signals, candidates, now)?;
            ranked.truncate(limit);
            Ok(ranked)
        };
        run().inspect_err(|e| log_failure("similar", user, e))
    }

    /// Topics the user reads, most read first.
    pub fn inferred_interests(&self, user: UserId) -> Result<Vec<InferredInterest>> {
        let run = || -> Result<Vec<InferredInterest>> {
            self.ensure_user(user)?;
            let signals = self.extractor.extract(user, self.signals.as_ref())?;
            Ok(signals.inferred_interests())
        };
        run().inspect_err(|e| log_failure("interests", user, e))
    }

    /// Feeds matching the filter, ordered by id.
    pub fn list_feeds(&self, filter: &FeedFilter) -> Result<Vec<Feed>> {
        let predicate = build_feed_filter(filter);
        Ok(predicate.select(self.articles.feeds()?))
    }

    /// Drop the user's cached feed. Returns whether one was resident.
    pub fn invalidate_user(&self, user: UserId) -> bool {
        let removed = self.cache.invalidate(user);
        if removed && dev_logging_enabled() {
            debug!(target: "personalization", user = %anon_hash(user), "feed cache invalidated");
        }
        removed
    }

    pub fn record_reading(
        &self,
        user: UserId,
        article_id: ArticleId,
        read_secs: u32,
        completion_pct: u8,
        at: DateTime<Utc>,
    ) -> Result<ReadingHistoryEntry> {
        let run = || -> Result<ReadingHistoryEntry> {
            if completion_pct > 100 {
                return Err(PersonalizationError::Validation(format!(
                    "completion_pct must be within 0..=100 (got {completion_pct})"
                )));
            }
            self.ensure_user(user)?;
            self.ensure_article(article_id)?;
            let entry = self
                .writer
                .record_reading(user, article_id, read_secs, completion_pct, at)?;
            self.invalidate_user(user);
            Ok(entry)
        };
        run().inspect_err(|e| log_failure("record_reading", user, e))
    }

    pub fn record_feedback(
        &self,
        user: UserId,
        article_id: ArticleId,
        interest_level: i8,
        at: DateTime<Utc>,
    ) -> Result<FeedbackEntry> {
        let run = || -> Result<FeedbackEntry> {
            if !(1..=5).contains(&interest_level) {
                return Err(PersonalizationError::Validation(format!(
                    "interest_level must be within 1..=5 (got {interest_level})"
                )));
            }
            self.ensure_user(user)?;
            self.ensure_article(article_id)?;
            let entry = self
                .writer
                .record_feedback(user, article_id, interest_level, at)?;
            self.invalidate_user(user);
            Ok(entry)
        };
        run().inspect_err(|e| log_failure("record_feedback", user, e))
    }

    pub fn set_preference(&self, user: UserId, topic: TopicId, weight: f64) -> Result<()> {
        let run = || -> Result<()> {
            if !(0.0..=1.0).contains(&weight) {
                return Err(PersonalizationError::Validation(format!(
                    "preference weight must be within 0..=1 (got {weight})"
                )));
            }
            self.ensure_user(user)?;
            self.writer.set_preference(user, topic, weight)?;
            self.invalidate_user(user);
            Ok(())
        };
        run().inspect_err(|e| log_failure("set_preference", user, e))
    }

    fn ensure_article(&self, id: ArticleId) -> Result<()> {
        match self.articles.article(id)? {
            Some(_) => Ok(()),
            None => Err(PersonalizationError::not_found("article", id)),
        }
    }
}
