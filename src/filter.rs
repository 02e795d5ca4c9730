//! # Candidate Filters
//!
//! Composable, independently optional match conditions over in-memory records.
//!
//! - Each supplied parameter contributes one predicate; an absent or blank
//!   parameter contributes an always-true predicate, so an empty parameter set
//!   matches everything.
//! - Predicates are combined by AND; their order never changes the result.
//! - Text matches are case-insensitive substring matches; language is a
//!   case-insensitive equality.
//! - A record whose optional field is missing never matches a supplied bound
//!   on that field.
//!
//! Filters are rebuilt per request; nothing here is cached or touches storage.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::borrow::Borrow;
use std::fmt;

use crate::error::{PersonalizationError, Result};
use crate::model::{Article, ArticleStatus, Feed, FeedId, FeedType, SourceId, TopicId};

/// A single boxed match condition.
pub type Predicate<T> = Box<dyn Fn(&T) -> bool + Send + Sync>;

/// Conjunction of predicates over `T`.
pub struct CandidateFilter<T> {
    predicates: Vec<Predicate<T>>,
}

impl<T> CandidateFilter<T> {
    /// The empty conjunction: matches every record.
    pub fn match_all() -> Self {
        Self {
            predicates: Vec::new(),
        }
    }

    /// Add one more condition to the conjunction.
    pub fn and(mut self, predicate: Predicate<T>) -> Self {
        self.predicates.push(predicate);
        self
    }

    pub fn matches(&self, item: &T) -> bool {
        self.predicates
            .iter()
            .fold(true, |acc, predicate| acc && predicate(item))
    }

    /// Keep the items that match, preserving input order.
    pub fn select<R, I>(&self, items: I) -> Vec<R>
    where
        I: IntoIterator<Item = R>,
        R: Borrow<T>,
    {
        items
            .into_iter()
            .filter(|it| self.matches(it.borrow()))
            .collect()
    }

    /// Number of composed predicates (absent parameters included).
    pub fn len(&self) -> usize {
        self.predicates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }
}

impl<T> Default for CandidateFilter<T> {
    fn default() -> Self {
        Self::match_all()
    }
}

impl<T> fmt::Debug for CandidateFilter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CandidateFilter")
            .field("predicates", &self.predicates.len())
            .finish()
    }
}

fn always<T>() -> Predicate<T> {
    Box::new(|_| true)
}

/// Trimmed, lowercased value of a text parameter, or `None` when absent/blank.
fn non_blank(raw: Option<&str>) -> Option<String> {
    raw.map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_lowercase)
}

fn contains_ci(field: Option<&str>, needle_lower: &str) -> bool {
    field.is_some_and(|v| v.to_lowercase().contains(needle_lower))
}

/* ----------------------------
Article filters
---------------------------- */

/// Optional article filter parameters.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ArticleFilter {
    #[serde(default)]
    pub status: Option<ArticleStatus>,
    #[serde(default)]
    pub feed_id: Option<FeedId>,
    /// Source name substring, e.g. "BBC".
    #[serde(default)]
    pub source: Option<String>,
    /// Inclusive lower bound on publication time.
    #[serde(default)]
    pub start_date: Option<DateTime<Utc>>,
    /// Inclusive upper bound on publication time.
    #[serde(default)]
    pub end_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub language: Option<String>,
    /// Free-text term looked up in title, body and description.
    #[serde(default)]
    pub search: Option<String>,
}

static LANGUAGE_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z]{2,3}(?:[-_][A-Za-z]{2})?$").expect("language tag regex"));

impl ArticleFilter {
    /// Reject malformed values before any predicate is built.
    pub fn validate(&self) -> Result<()> {
        if let (Some(start), Some(end)) = (self.start_date, self.end_date) {
            if start > end {
                return Err(PersonalizationError::Validation(format!(
                    "start_date {start} is after end_date {end}"
                )));
            }
        }
        if let Some(lang) = non_blank(self.language.as_deref()) {
            if !LANGUAGE_TAG.is_match(&lang) {
                return Err(PersonalizationError::Validation(format!(
                    "language `{lang}` is not a language code"
                )));
            }
        }
        Ok(())
    }
}

pub fn has_status(status: Option<ArticleStatus>) -> Predicate<Article> {
    match status {
        None => always(),
        Some(s) => Box::new(move |a: &Article| a.status == s),
    }
}

pub fn has_feed_id(feed_id: Option<FeedId>) -> Predicate<Article> {
    match feed_id {
        None => always(),
        Some(id) => Box::new(move |a: &Article| a.feed_id == id),
    }
}

pub fn has_source_name(source: Option<&str>) -> Predicate<Article> {
    match non_blank(source) {
        None => always(),
        Some(needle) => Box::new(move |a: &Article| contains_ci(a.source_name.as_deref(), &needle)),
    }
}

pub fn published_after(start: Option<DateTime<Utc>>) -> Predicate<Article> {
    match start {
        None => always(),
        Some(start) => Box::new(move |a: &Article| a.published_at >= start),
    }
}

pub fn published_before(end: Option<DateTime<Utc>>) -> Predicate<Article> {
    match end {
        None => always(),
        Some(end) => Box::new(move |a: &Article| a.published_at <= end),
    }
}

pub fn has_language(language: Option<&str>) -> Predicate<Article> {
    match non_blank(language) {
        None => always(),
        Some(lang) => Box::new(move |a: &Article| {
            a.language
                .as_deref()
                .is_some_and(|l| l.trim().to_lowercase() == lang)
        }),
    }
}

pub fn matches_search_term(term: Option<&str>) -> Predicate<Article> {
    match non_blank(term) {
        None => always(),
        Some(needle) => Box::new(move |a: &Article| {
            contains_ci(Some(a.title.as_str()), &needle)
                || contains_ci(a.body.as_deref(), &needle)
                || contains_ci(a.description.as_deref(), &needle)
        }),
    }
}

/// Compose every article parameter into one predicate.
pub fn build_article_filter(params: &ArticleFilter) -> CandidateFilter<Article> {
    CandidateFilter::match_all()
        .and(has_status(params.status))
        .and(has_feed_id(params.feed_id))
        .and(has_source_name(params.source.as_deref()))
        .and(published_after(params.start_date))
        .and(published_before(params.end_date))
        .and(has_language(params.language.as_deref()))
        .and(matches_search_term(params.search.as_deref()))
}

/* ----------------------------
Feed filters
---------------------------- */

/// Optional feed filter parameters.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct FeedFilter {
    #[serde(default)]
    pub source_id: Option<SourceId>,
    #[serde(default)]
    pub feed_type: Option<FeedType>,
    #[serde(default)]
    pub is_active: Option<bool>,
    #[serde(default)]
    pub topic_id: Option<TopicId>,
    #[serde(default)]
    pub min_priority: Option<i32>,
    #[serde(default)]
    pub max_priority: Option<i32>,
    #[serde(default)]
    pub last_crawled_after: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_crawled_before: Option<DateTime<Utc>>,
    #[serde(default)]
    pub min_failure_count: Option<u32>,
    #[serde(default)]
    pub max_failure_count: Option<u32>,
    /// Free-text term looked up in title, description and url.
    #[serde(default)]
    pub search: Option<String>,
}

fn optional_eq<T, V, F>(wanted: Option<V>, field: F) -> Predicate<T>
where
    T: 'static,
    V: PartialEq + Send + Sync + 'static,
    F: Fn(&T) -> Option<V> + Send + Sync + 'static,
{
    match wanted {
        None => always(),
        Some(v) => Box::new(move |item: &T| field(item).is_some_and(|got| got == v)),
    }
}

fn at_least<T, V, F>(bound: Option<V>, field: F) -> Predicate<T>
where
    T: 'static,
    V: PartialOrd + Send + Sync + 'static,
    F: Fn(&T) -> Option<V> + Send + Sync + 'static,
{
    match bound {
        None => always(),
        Some(b) => Box::new(move |item: &T| field(item).is_some_and(|got| got >= b)),
    }
}

fn at_most<T, V, F>(bound: Option<V>, field: F) -> Predicate<T>
where
    T: 'static,
    V: PartialOrd + Send + Sync + 'static,
    F: Fn(&T) -> Option<V> + Send + Sync + 'static,
{
    match bound {
        None => always(),
        Some(b) => Box::new(move |item: &T| field(item).is_some_and(|got| got <= b)),
    }
}

pub fn build_feed_filter(params: &FeedFilter) -> CandidateFilter<Feed> {
    let search: Predicate<Feed> = match non_blank(params.search.as_deref()) {
        None => always(),
        Some(needle) => Box::new(move |f: &Feed| {
            contains_ci(Some(f.title.as_str()), &needle)
                || contains_ci(f.description.as_deref(), &needle)
                || contains_ci(Some(f.url.as_str()), &needle)
        }),
    };

    CandidateFilter::match_all()
        .and(optional_eq(params.source_id, |f: &Feed| Some(f.source_id)))
        .and(optional_eq(params.feed_type, |f: &Feed| Some(f.feed_type)))
        .and(optional_eq(params.is_active, |f: &Feed| Some(f.is_active)))
        .and(optional_eq(params.topic_id, |f: &Feed| f.topic_id))
        .and(at_least(params.min_priority, |f: &Feed| Some(f.priority)))
        .and(at_most(params.max_priority, |f: &Feed| Some(f.priority)))
        .and(at_least(params.last_crawled_after, |f: &Feed| f.last_crawled))
        .and(at_most(params.last_crawled_before, |f: &Feed| f.last_crawled))
        .and(at_least(params.min_failure_count, |f: &Feed| Some(f.failure_count)))
        .and(at_most(params.max_failure_count, |f: &Feed| Some(f.failure_count)))
        .and(search)
}
