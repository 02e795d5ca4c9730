//! # Storage seams
//! Read-only repository traits the ranking core consumes, plus an in-memory
//! store used by the server binary and the tests.
//!
//! Calls are synchronous: the core treats storage as a call that returns data
//! or fails with [`StoreError`].

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::StoreError;
use crate::model::{
    Article, ArticleId, ArticleStatus, Feed, FeedId, FeedbackEntry, ReadingHistoryEntry, TopicId,
    UserId, UserTopicPreference,
};

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Source of rankable articles and the feeds they come from.
pub trait ArticleRepository: Send + Sync {
    /// Every article currently in `PUBLISHED` status.
    fn published_articles(&self) -> StoreResult<Vec<Arc<Article>>>;
    /// Any article by id, whatever its status.
    fn article(&self, id: ArticleId) -> StoreResult<Option<Arc<Article>>>;
    fn feed_exists(&self, id: FeedId) -> StoreResult<bool>;
    fn feeds(&self) -> StoreResult<Vec<Feed>>;
}

/// Per-user engagement facts. History and feedback come back most recent first.
pub trait SignalRepository: Send + Sync {
    fn user_exists(&self, user: UserId) -> StoreResult<bool>;
    fn topic_preferences(&self, user: UserId) -> StoreResult<Vec<UserTopicPreference>>;
    fn reading_history(&self, user: UserId) -> StoreResult<Vec<ReadingHistoryEntry>>;
    fn feedback(&self, user: UserId) -> StoreResult<Vec<FeedbackEntry>>;
}

#[derive(Default)]
struct StoreState {
    users: HashSet<UserId>,
    articles: HashMap<ArticleId, Arc<Article>>,
    feeds: HashMap<FeedId, Feed>,
    preferences: HashMap<UserId, HashMap<TopicId, f64>>,
    history: HashMap<UserId, Vec<ReadingHistoryEntry>>,
    feedback: HashMap<UserId, Vec<FeedbackEntry>>,
}

/// Write side for user interactions.
pub trait SignalWriter: Send + Sync {
    /// Unique per (user, topic); the weight is clamped to `[0, 1]`.
    fn set_preference(&self, user: UserId, topic: TopicId, weight: f64) -> StoreResult<()>;

    /// Record a read. Reading the same article again merges into the existing entry.
    fn record_reading(
        &self,
        user: UserId,
        article_id: ArticleId,
        read_secs: u32,
        completion_pct: u8,
        at: DateTime<Utc>,
    ) -> StoreResult<ReadingHistoryEntry>;

    /// Record feedback. A later rating of the same article replaces the earlier one.
    fn record_feedback(
        &self,
        user: UserId,
        article_id: ArticleId,
        interest_level: i8,
        at: DateTime<Utc>,
    ) -> StoreResult<FeedbackEntry>;
}

/// Initial catalogue for the in-memory store, read from JSON.
#[derive(Debug, Default, Deserialize)]
pub struct SeedData {
    #[serde(default)]
    pub users: Vec<UserId>,
    #[serde(default)]
    pub feeds: Vec<Feed>,
    #[serde(default)]
    pub articles: Vec<Article>,
}

/// Thread-safe in-memory implementation of the repositories.
#[derive(Default)]
pub struct InMemoryStore {
    state: RwLock<StoreState>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    // Poisoning only means another writer panicked; the maps stay usable.
    fn read(&self) -> RwLockReadGuard<'_, StoreState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, StoreState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Build a store from a seed file. Feeds go in before articles so topics resolve.
    pub fn from_seed_file(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read seed data at {}", path.display()))?;
        let seed: SeedData = serde_json::from_str(&raw)
            .with_context(|| format!("invalid seed data at {}", path.display()))?;
        Ok(Self::from_seed(seed))
    }

    pub fn from_seed(seed: SeedData) -> Self {
        let store = Self::new();
        for u in seed.users {
            store.add_user(u);
        }
        for f in seed.feeds {
            store.upsert_feed(f);
        }
        for a in seed.articles {
            store.upsert_article(a);
        }
        store
    }

    pub fn add_user(&self, user: UserId) {
        self.write().users.insert(user);
    }

    /// Insert or replace a feed. Its topic is copied onto articles added later.
    pub fn upsert_feed(&self, feed: Feed) {
        self.write().feeds.insert(feed.id, feed);
    }

    /// Insert or replace an article. A missing topic is taken from its feed.
    pub fn upsert_article(&self, mut article: Article) {
        let mut st = self.write();
        if article.topic_id.is_none() {
            article.topic_id = st.feeds.get(&article.feed_id).and_then(|f| f.topic_id);
        }
        st.articles.insert(article.id, Arc::new(article));
    }

    /// Change an article's lifecycle status. Returns false for an unknown id.
    pub fn set_article_status(&self, id: ArticleId, status: ArticleStatus) -> bool {
        let mut st = self.write();
        match st.articles.get_mut(&id) {
            Some(a) => {
                Arc::make_mut(a).status = status;
                true
            }
            None => false,
        }
    }
}

impl SignalWriter for InMemoryStore {
    fn set_preference(&self, user: UserId, topic: TopicId, weight: f64) -> StoreResult<()> {
        let mut st = self.write();
        st.users.insert(user);
        st.preferences
            .entry(user)
            .or_default()
            .insert(topic, weight.clamp(0.0, 1.0));
        Ok(())
    }

    fn record_reading(
        &self,
        user: UserId,
        article_id: ArticleId,
        read_secs: u32,
        completion_pct: u8,
        at: DateTime<Utc>,
    ) -> StoreResult<ReadingHistoryEntry> {
        let mut st = self.write();
        let topic_id = st.articles.get(&article_id).and_then(|a| a.topic_id);
        st.users.insert(user);
        let entries = st.history.entry(user).or_default();

        let entry = match entries.iter().position(|e| e.article_id == article_id) {
            Some(i) => {
                let mut e = entries.remove(i);
                e.record_reread(read_secs, completion_pct, at);
                e
            }
            None => ReadingHistoryEntry {
                article_id,
                topic_id,
                completion_pct: completion_pct.min(100),
                read_secs,
                read_at: at,
                access_count: 1,
            },
        };
        entries.insert(0, entry.clone());
        entries.sort_by(|a, b| b.read_at.cmp(&a.read_at));
        Ok(entry)
    }

    fn record_feedback(
        &self,
        user: UserId,
        article_id: ArticleId,
        interest_level: i8,
        at: DateTime<Utc>,
    ) -> StoreResult<FeedbackEntry> {
        let mut st = self.write();
        let topic_id = st.articles.get(&article_id).and_then(|a| a.topic_id);
        st.users.insert(user);
        let entries = st.feedback.entry(user).or_default();
        entries.retain(|e| e.article_id != article_id);

        let entry = FeedbackEntry {
            article_id,
            topic_id,
            interest_level,
            recorded_at: at,
        };
        entries.push(entry.clone());
        entries.sort_by(|a, b| b.recorded_at.cmp(&a.recorded_at));
        Ok(entry)
    }
}

impl ArticleRepository for InMemoryStore {
    fn published_articles(&self) -> StoreResult<Vec<Arc<Article>>> {
        let st = self.read();
        let mut out: Vec<Arc<Article>> = st
            .articles
            .values()
            .filter(|a| a.is_published())
            .cloned()
            .collect();
        out.sort_by_key(|a| a.id);
        Ok(out)
    }

    fn article(&self, id: ArticleId) -> StoreResult<Option<Arc<Article>>> {
        Ok(self.read().articles.get(&id).cloned())
    }

    fn feed_exists(&self, id: FeedId) -> StoreResult<bool> {
        Ok(self.read().feeds.contains_key(&id))
    }

    fn feeds(&self) -> StoreResult<Vec<Feed>> {
        let mut out: Vec<Feed> = self.read().feeds.values().cloned().collect();
        out.sort_by_key(|f| f.id);
        Ok(out)
    }
}

impl SignalRepository for InMemoryStore {
    fn user_exists(&self, user: UserId) -> StoreResult<bool> {
        Ok(self.read().users.contains(&user))
    }

    fn topic_preferences(&self, user: UserId) -> StoreResult<Vec<UserTopicPreference>> {
        let st = self.read();
        let mut out: Vec<UserTopicPreference> = st
            .preferences
            .get(&user)
            .map(|m| {
                m.iter()
                    .map(|(&topic_id, &weight)| UserTopicPreference { topic_id, weight })
                    .collect()
            })
            .unwrap_or_default();
        out.sort_by_key(|p| p.topic_id);
        Ok(out)
    }

    fn reading_history(&self, user: UserId) -> StoreResult<Vec<ReadingHistoryEntry>> {
        Ok(self.read().history.get(&user).cloned().unwrap_or_default())
    }

    fn feedback(&self, user: UserId) -> StoreResult<Vec<FeedbackEntry>> {
        Ok(self.read().feedback.get(&user).cloned().unwrap_or_default())
    }
}
