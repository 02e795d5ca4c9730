//! # Model
//! In-memory representation of the facts the ranking core reads: articles with
//! their feed/source/topic denormalized, feeds, and per-user engagement signals.
//!
//! Storage owns these records; the core only reads them (see `store`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub type UserId = u64;
pub type ArticleId = u64;
pub type FeedId = u64;
pub type SourceId = u64;
pub type TopicId = u64;

/// Lifecycle status of an article. Only `Published` articles are ranked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ArticleStatus {
    Pending,
    Published,
    Archived,
    Failed,
}

impl ArticleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArticleStatus::Pending => "PENDING",
            ArticleStatus::Published => "PUBLISHED",
            ArticleStatus::Archived => "ARCHIVED",
            ArticleStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for ArticleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ArticleStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PENDING" => Ok(ArticleStatus::Pending),
            "PUBLISHED" => Ok(ArticleStatus::Published),
            "ARCHIVED" => Ok(ArticleStatus::Archived),
            "FAILED" => Ok(ArticleStatus::Failed),
            other => Err(format!("unknown article status `{other}`")),
        }
    }
}

/// An article as seen by filtering and scoring.
///
/// `source_name` and `topic_id` come from the owning feed; `language`,
/// `body` and `description` may be missing on ingested content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Article {
    pub id: ArticleId,
    pub title: String,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    pub published_at: DateTime<Utc>,
    #[serde(default)]
    pub language: Option<String>,
    pub status: ArticleStatus,
    pub feed_id: FeedId,
    #[serde(default)]
    pub source_name: Option<String>,
    #[serde(default)]
    pub topic_id: Option<TopicId>,
}

impl Article {
    pub fn is_published(&self) -> bool {
        self.status == ArticleStatus::Published
    }
}

/// Syndication format of a feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FeedType {
    Rss,
    Atom,
    Json,
    Other,
}

impl FromStr for FeedType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "RSS" => Ok(FeedType::Rss),
            "ATOM" => Ok(FeedType::Atom),
            "JSON" => Ok(FeedType::Json),
            "OTHER" => Ok(FeedType::Other),
            other => Err(format!("unknown feed type `{other}`")),
        }
    }
}

/// A feed belongs to exactly one source and optionally one topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feed {
    pub id: FeedId,
    pub source_id: SourceId,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub url: String,
    pub feed_type: FeedType,
    #[serde(default)]
    pub topic_id: Option<TopicId>,
    pub is_active: bool,
    /// 1-10, higher is more important.
    pub priority: i32,
    #[serde(default)]
    pub last_crawled: Option<DateTime<Utc>>,
    pub failure_count: u32,
}

/// Explicit (user, topic) preference; weight in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UserTopicPreference {
    pub topic_id: TopicId,
    pub weight: f64,
}

/// One (user, article) reading record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadingHistoryEntry {
    pub article_id: ArticleId,
    /// Topic of the article that was read, if it had one.
    #[serde(default)]
    pub topic_id: Option<TopicId>,
    /// 0-100.
    pub completion_pct: u8,
    pub read_secs: u32,
    pub read_at: DateTime<Utc>,
    #[serde(default = "one")]
    pub access_count: u32,
}

fn one() -> u32 {
    1
}

impl ReadingHistoryEntry {
    /// Merge a repeated read into this record: time accumulates, completion keeps its max.
    pub fn record_reread(&mut self, read_secs: u32, completion_pct: u8, at: DateTime<Utc>) {
        self.read_secs = self.read_secs.saturating_add(read_secs);
        self.completion_pct = self.completion_pct.max(completion_pct.min(100));
        self.access_count = self.access_count.saturating_add(1);
        self.read_at = at;
    }
}

/// One (user, article) feedback record with an interest level on a 1-5 scale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackEntry {
    pub article_id: ArticleId,
    #[serde(default)]
    pub topic_id: Option<TopicId>,
    pub interest_level: i8,
    pub recorded_at: DateTime<Utc>,
}
