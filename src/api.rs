use std::str::FromStr;
use std::sync::Arc;

use axum::{
    extract::{rejection::QueryRejection, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;

use crate::cache::CacheStats;
use crate::error::{PersonalizationError, Result};
use crate::filter::{ArticleFilter, FeedFilter};
use crate::model::{ArticleId, ArticleStatus, Feed, FeedId, FeedType, SourceId, TopicId, UserId};
use crate::personalize::{PageRequest, PersonalizedFeedService};
use crate::scoring::{ScoreBreakdown, ScoredArticle};
use crate::signals::InferredInterest;

/// Diagnostic header telling whether the ranked feed came from cache.
pub const CACHE_HEADER: &str = "X-Feed-Cache";

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<PersonalizedFeedService>,
}

impl AppState {
    pub fn new(service: PersonalizedFeedService) -> Self {
        Self {
            service: Arc::new(service),
        }
    }
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/feed/{user_id}", get(get_feed))
        .route("/similar/{user_id}/{article_id}", get(get_similar))
        .route("/interests/{user_id}", get(get_interests))
        .route("/feeds", get(list_feeds))
        .route("/interactions/{user_id}/read", post(record_read))
        .route("/interactions/{user_id}/feedback", post(record_feedback))
        .route("/preferences/{user_id}", put(set_preference))
        .route("/debug/cache", get(debug_cache))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

/// Query string with malformed values reported as `INVALID_REQUEST`.
type QueryResult<T> = std::result::Result<Query<T>, QueryRejection>;

// Enum values arrive as text so their case does not matter.
fn parse_enum<T>(raw: Option<&str>) -> Result<Option<T>>
where
    T: FromStr<Err = String>,
{
    match raw.map(str::trim) {
        None | Some("") => Ok(None),
        Some(s) => s.parse().map(Some).map_err(PersonalizationError::Validation),
    }
}

// Flat on purpose: `#[serde(flatten)]` loses number parsing for query strings.
#[derive(Debug, Default, Deserialize)]
struct FeedQuery {
    status: Option<String>,
    feed_id: Option<FeedId>,
    source: Option<String>,
    start_date: Option<DateTime<Utc>>,
    end_date: Option<DateTime<Utc>>,
    language: Option<String>,
    search: Option<String>,
    #[serde(default)]
    offset: usize,
    limit: Option<usize>,
}

impl FeedQuery {
    fn into_parts(self) -> Result<(ArticleFilter, PageRequest)> {
        let filter = ArticleFilter {
            status: parse_enum::<ArticleStatus>(self.status.as_deref())?,
            feed_id: self.feed_id,
            source: self.source,
            start_date: self.start_date,
            end_date: self.end_date,
            language: self.language,
            search: self.search,
        };
        let page = PageRequest {
            offset: self.offset,
            limit: self.limit,
        };
        Ok((filter, page))
    }
}

#[derive(Serialize)]
struct FeedItemOut {
    article_id: ArticleId,
    title: String,
    source_name: Option<String>,
    topic_id: Option<TopicId>,
    language: Option<String>,
    published_at: DateTime<Utc>,
    score: f64,
    breakdown: ScoreBreakdown,
    reasons: Vec<&'static str>,
}

impl From<&ScoredArticle> for FeedItemOut {
    fn from(s: &ScoredArticle) -> Self {
        Self {
            article_id: s.article.id,
            title: s.article.title.clone(),
            source_name: s.article.source_name.clone(),
            topic_id: s.article.topic_id,
            language: s.article.language.clone(),
            published_at: s.article.published_at,
            score: s.score,
            breakdown: s.breakdown,
            reasons: s.reasons.clone(),
        }
    }
}

#[derive(Serialize)]
struct FeedPageOut {
    items: Vec<FeedItemOut>,
    total_count: usize,
    offset: usize,
    limit: usize,
}

async fn get_feed(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
    query: QueryResult<FeedQuery>,
) -> Result<impl IntoResponse> {
    let Query(q) = query?;
    let (filter, page) = q.into_parts()?;
    let page = state.service.get_personalized_feed(user_id, &filter, page)?;
    let body = FeedPageOut {
        items: page.items.iter().map(FeedItemOut::from).collect(),
        total_count: page.total_count,
        offset: page.offset,
        limit: page.limit,
    };
    Ok(([(CACHE_HEADER, page.cache.as_str())], Json(body)))
}

#[derive(Debug, Default, Deserialize)]
struct LimitQuery {
    limit: Option<usize>,
}

async fn get_similar(
    State(state): State<AppState>,
    Path((user_id, article_id)): Path<(UserId, ArticleId)>,
    query: QueryResult<LimitQuery>,
) -> Result<Json<Vec<FeedItemOut>>> {
    let Query(q) = query?;
    let ranked = state.service.similar_articles(user_id, article_id, q.limit)?;
    Ok(Json(ranked.iter().map(FeedItemOut::from).collect()))
}

async fn get_interests(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
) -> Result<Json<Vec<InferredInterest>>> {
    Ok(Json(state.service.inferred_interests(user_id)?))
}

#[derive(Debug, Default, Deserialize)]
struct FeedsQuery {
    source_id: Option<SourceId>,
    feed_type: Option<String>,
    is_active: Option<bool>,
    topic_id: Option<TopicId>,
    min_priority: Option<i32>,
    max_priority: Option<i32>,
    last_crawled_after: Option<DateTime<Utc>>,
    last_crawled_before: Option<DateTime<Utc>>,
    min_failure_count: Option<u32>,
    max_failure_count: Option<u32>,
    search: Option<String>,
}

impl FeedsQuery {
    fn into_filter(self) -> Result<FeedFilter> {
        Ok(FeedFilter {
            source_id: self.source_id,
            feed_type: parse_enum::<FeedType>(self.feed_type.as_deref())?,
            is_active: self.is_active,
            topic_id: self.topic_id,
            min_priority: self.min_priority,
            max_priority: self.max_priority,
            last_crawled_after: self.last_crawled_after,
            last_crawled_before: self.last_crawled_before,
            min_failure_count: self.min_failure_count,
            max_failure_count: self.max_failure_count,
            search: self.search,
        })
    }
}

async fn list_feeds(
    State(state): State<AppState>,
    query: QueryResult<FeedsQuery>,
) -> Result<Json<Vec<Feed>>> {
    let Query(q) = query?;
    Ok(Json(state.service.list_feeds(&q.into_filter()?)?))
}

#[derive(Deserialize)]
struct ReadReq {
    article_id: ArticleId,
    read_secs: u32,
    completion_pct: u8,
    #[serde(default)]
    read_at: Option<DateTime<Utc>>, // defaults to now
}

async fn record_read(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
    Json(body): Json<ReadReq>,
) -> Result<impl IntoResponse> {
    let entry = state.service.record_reading(
        user_id,
        body.article_id,
        body.read_secs,
        body.completion_pct,
        body.read_at.unwrap_or_else(Utc::now),
    )?;
    Ok((StatusCode::CREATED, Json(entry)))
}

#[derive(Deserialize)]
struct FeedbackReq {
    article_id: ArticleId,
    interest_level: i8,
}

async fn record_feedback(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
    Json(body): Json<FeedbackReq>,
) -> Result<impl IntoResponse> {
    let entry =
        state
            .service
            .record_feedback(user_id, body.article_id, body.interest_level, Utc::now())?;
    Ok((StatusCode::CREATED, Json(entry)))
}

#[derive(Deserialize, Serialize)]
struct PreferenceReq {
    topic_id: TopicId,
    weight: f64,
}

async fn set_preference(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
    Json(body): Json<PreferenceReq>,
) -> Result<Json<PreferenceReq>> {
    state
        .service
        .set_preference(user_id, body.topic_id, body.weight)?;
    Ok(Json(body))
}

async fn debug_cache(State(state): State<AppState>) -> Json<CacheStats> {
    Json(state.service.cache().stats())
}
