// tests/personalized_feed.rs
//
// Orchestrator-level tests over the in-memory store with a fixed clock.
//
// Covered:
// - ranking + min-relevance cutoff + pagination metadata
// - cache MISS → HIT, reuse across filters, TTL expiry
// - out-of-band status change drops an article from a cached feed
// - not-found vs validation errors
// - interactions invalidate the cache and change the ranking
// - an interaction landing while a miss is being ranked is not masked
// - similar articles and inferred interests

use chrono::{DateTime, Duration, TimeZone, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use feed_personalizer::cache::FeedCache;
use feed_personalizer::config::PersonalizationConfig;
use feed_personalizer::filter::{ArticleFilter, FeedFilter};
use feed_personalizer::model::{
    Article, ArticleStatus, Feed, FeedType, FeedbackEntry, ReadingHistoryEntry, UserId,
    UserTopicPreference,
};
use feed_personalizer::store::{InMemoryStore, SignalRepository, SignalWriter, StoreResult};
use feed_personalizer::{CacheStatus, PageRequest, PersonalizationError, PersonalizedFeedService};

const SPORTS: u64 = 1;
const TECH: u64 = 2;
const FAN: u64 = 100;
const STRANGER: u64 = 999;

const TEST_TOML: &str = r#"
[weights]
topic_preference = 0.40
reading_history = 0.30
positive_feedback = 0.20
recency = 0.10

[thresholds]
min_completion_pct = 70
min_read_secs = 60
high_interest_level = 3
min_relevance_score = 0.3

[cache]
ttl_minutes = 10
max_cache_size = 100
"#;

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 10, 20, 12, 0, 0).unwrap()
}

fn feed(id: u64, topic: u64) -> Feed {
    Feed {
        id,
        source_id: id,
        title: format!("feed {id}"),
        description: None,
        url: format!("https://example.org/{id}.xml"),
        feed_type: FeedType::Rss,
        topic_id: Some(topic),
        is_active: true,
        priority: 5,
        last_crawled: None,
        failure_count: 0,
    }
}

fn article(id: u64, feed_id: u64, age_days: i64, title: &str) -> Article {
    Article {
        id,
        title: title.to_string(),
        body: None,
        description: None,
        published_at: now() - Duration::days(age_days),
        language: Some("en".into()),
        status: ArticleStatus::Published,
        feed_id,
        source_name: Some(if feed_id == 1 { "BBC Sport" } else { "Reuters" }.into()),
        topic_id: None,
    }
}

/// Sports fan with preference 0.8; six sports articles of various ages and two tech ones.
fn fixture() -> (PersonalizedFeedService, Arc<InMemoryStore>) {
    let cfg = PersonalizationConfig::from_toml_str(TEST_TOML).expect("config");
    let store = Arc::new(InMemoryStore::new());
    store.upsert_feed(feed(1, SPORTS));
    store.upsert_feed(feed(2, TECH));

    store.upsert_article(article(1, 1, 0, "Derby day"));
    store.upsert_article(article(2, 1, 2, "Cup final preview"));
    store.upsert_article(article(3, 1, 40, "Season review"));
    store.upsert_article(article(4, 1, 90, "Archive interview"));
    store.upsert_article(article(5, 1, 1, "Category winners"));
    store.upsert_article(article(6, 1, 5, "Transfer rumours"));
    store.upsert_article(article(7, 2, 0, "Chip shortage"));
    store.upsert_article(article(8, 2, 1, "Cloud outage"));
    let mut pending = article(9, 1, 0, "Not yet out");
    pending.status = ArticleStatus::Pending;
    store.upsert_article(pending);

    store.add_user(FAN);
    store.set_preference(FAN, SPORTS, 0.8).unwrap();

    let svc = PersonalizedFeedService::in_memory(&cfg, store.clone());
    (svc, store)
}

fn ids(page: &feed_personalizer::FeedPage) -> Vec<u64> {
    page.items.iter().map(|s| s.article.id).collect()
}

#[test]
fn ranks_by_score_then_recency_and_applies_cutoff() {
    let (svc, _store) = fixture();
    let page = svc
        .get_personalized_feed_at(FAN, &ArticleFilter::default(), PageRequest::default(), now())
        .expect("feed");

    // tech articles score 0.1 (recency only) and fall below 0.3;
    // the 90-day article scores 0.32 + 0.1 * 0.95^60 ≈ 0.3246 and stays.
    assert_eq!(ids(&page), vec![1, 5, 2, 6, 3, 4]);
    assert_eq!(page.total_count, 6);
    assert_eq!(page.cache, CacheStatus::Miss);
    assert!((page.items[0].score - 0.42).abs() < 1e-9);
    assert!((page.items[4].score - 0.3799).abs() < 1e-4);
    assert!(page.items.iter().all(|s| s.score >= 0.3));
}

#[test]
fn pagination_reports_total_before_paging() {
    let (svc, _store) = fixture();
    let page = svc
        .get_personalized_feed_at(FAN, &ArticleFilter::default(), PageRequest::new(2, 3), now())
        .unwrap();
    assert_eq!(ids(&page), vec![2, 6, 3]);
    assert_eq!(page.total_count, 6);
    assert_eq!((page.offset, page.limit), (2, 3));

    let capped = svc
        .get_personalized_feed_at(FAN, &ArticleFilter::default(), PageRequest::new(0, 10_000), now())
        .unwrap();
    assert_eq!(capped.limit, 100);

    let past_end = svc
        .get_personalized_feed_at(FAN, &ArticleFilter::default(), PageRequest::new(50, 5), now())
        .unwrap();
    assert!(past_end.items.is_empty());
    assert_eq!(past_end.total_count, 6);
}

#[test]
fn cached_ranking_is_reused_across_filters_and_expires() {
    let (svc, _store) = fixture();
    let first = svc
        .get_personalized_feed_at(FAN, &ArticleFilter::default(), PageRequest::default(), now())
        .unwrap();
    assert_eq!(first.cache, CacheStatus::Miss);

    let search = ArticleFilter {
        search: Some("cat".into()),
        ..Default::default()
    };
    let filtered = svc
        .get_personalized_feed_at(FAN, &search, PageRequest::default(), now() + Duration::minutes(1))
        .unwrap();
    assert_eq!(filtered.cache, CacheStatus::Hit);
    assert_eq!(ids(&filtered), vec![5]);
    assert_eq!(filtered.total_count, 1);

    let expired = svc
        .get_personalized_feed_at(
            FAN,
            &ArticleFilter::default(),
            PageRequest::default(),
            now() + Duration::minutes(10),
        )
        .unwrap();
    assert_eq!(expired.cache, CacheStatus::Miss);

    let stats = svc.cache().stats();
    assert_eq!((stats.hits, stats.misses), (1, 2));
}

#[test]
fn filtered_order_matches_unfiltered_order() {
    let (svc, _store) = fixture();
    let all = svc
        .get_personalized_feed_at(FAN, &ArticleFilter::default(), PageRequest::default(), now())
        .unwrap();
    let recent = ArticleFilter {
        start_date: Some(now() - Duration::days(5)),
        end_date: Some(now()),
        ..Default::default()
    };
    let page = svc
        .get_personalized_feed_at(FAN, &recent, PageRequest::default(), now())
        .unwrap();
    let expected: Vec<u64> = ids(&all).into_iter().filter(|id| [1, 2, 5, 6].contains(id)).collect();
    assert_eq!(ids(&page), expected);
}

#[test]
fn article_leaving_published_drops_out_of_cached_feed() {
    let (svc, store) = fixture();
    svc.get_personalized_feed_at(FAN, &ArticleFilter::default(), PageRequest::default(), now())
        .unwrap();
    assert!(store.set_article_status(1, ArticleStatus::Archived));

    let page = svc
        .get_personalized_feed_at(FAN, &ArticleFilter::default(), PageRequest::default(), now())
        .unwrap();
    assert_eq!(page.cache, CacheStatus::Hit);
    assert!(!ids(&page).contains(&1));
    assert_eq!(page.total_count, 5);
}

#[test]
fn status_filter_other_than_published_yields_nothing() {
    let (svc, _store) = fixture();
    let pending = ArticleFilter {
        status: Some(ArticleStatus::Pending),
        ..Default::default()
    };
    let page = svc
        .get_personalized_feed_at(FAN, &pending, PageRequest::default(), now())
        .unwrap();
    assert!(page.items.is_empty());
}

#[test]
fn unknown_references_are_not_found_and_bad_values_are_validation() {
    let (svc, _store) = fixture();
    let err = svc
        .get_personalized_feed_at(STRANGER, &ArticleFilter::default(), PageRequest::default(), now())
        .unwrap_err();
    assert!(matches!(err, PersonalizationError::NotFound { entity: "user", id: STRANGER }));

    let unknown_feed = ArticleFilter {
        feed_id: Some(42),
        ..Default::default()
    };
    let err = svc
        .get_personalized_feed_at(FAN, &unknown_feed, PageRequest::default(), now())
        .unwrap_err();
    assert_eq!(err.code(), "NOT_FOUND");

    let err = svc
        .get_personalized_feed_at(FAN, &ArticleFilter::default(), PageRequest::new(0, 0), now())
        .unwrap_err();
    assert_eq!(err.code(), "INVALID_REQUEST");

    let inverted = ArticleFilter {
        start_date: Some(now()),
        end_date: Some(now() - Duration::days(1)),
        ..Default::default()
    };
    let err = svc
        .get_personalized_feed_at(FAN, &inverted, PageRequest::default(), now())
        .unwrap_err();
    assert!(matches!(err, PersonalizationError::Validation(_)));

    // rejected requests never touch the cache
    assert_eq!(svc.cache().stats().misses, 0);
}

#[test]
fn user_without_signals_gets_empty_feed_not_error() {
    let (svc, store) = fixture();
    store.add_user(7);
    let page = svc
        .get_personalized_feed_at(7, &ArticleFilter::default(), PageRequest::default(), now())
        .expect("no signals is not an error");
    assert!(page.items.is_empty(), "recency alone (0.1) is below the 0.3 cutoff");
}

#[test]
fn interactions_invalidate_and_reshape_the_feed() {
    let (svc, _store) = fixture();
    svc.get_personalized_feed_at(FAN, &ArticleFilter::default(), PageRequest::default(), now())
        .unwrap();
    assert_eq!(svc.cache().len(), 1);

    // engaged tech reads + high-interest tech feedback lift tech articles over the cutoff
    svc.record_reading(FAN, 7, 120, 30, now()).unwrap();
    assert_eq!(svc.cache().len(), 0, "recording a read drops the cached feed");
    svc.record_feedback(FAN, 8, 5, now()).unwrap();

    let page = svc
        .get_personalized_feed_at(FAN, &ArticleFilter::default(), PageRequest::default(), now())
        .unwrap();
    assert_eq!(page.cache, CacheStatus::Miss);
    let tech: Vec<_> = page.items.iter().filter(|s| s.article.topic_id == Some(TECH)).collect();
    assert_eq!(tech.len(), 2);
    // history 1.0 * 0.3 + feedback 1.0 * 0.2 + recency 0.1
    assert!((tech[0].score - 0.6).abs() < 1e-9);
    assert!(tech[0].reasons.contains(&"similar to articles you've engaged with"));
    assert_eq!(ids(&page)[..2], [7, 8]);

    svc.set_preference(FAN, TECH, 0.0).unwrap();
    assert_eq!(svc.cache().len(), 0);
}

/// Hands out the feedback snapshot, then lets one high-interest rating land
/// (store write followed by cache invalidation) before the caller ranks it.
struct RatingLandsMidRanking {
    store: Arc<InMemoryStore>,
    cache: Arc<FeedCache>,
    armed: AtomicBool,
}

impl SignalRepository for RatingLandsMidRanking {
    fn user_exists(&self, user: UserId) -> StoreResult<bool> {
        self.store.user_exists(user)
    }

    fn topic_preferences(&self, user: UserId) -> StoreResult<Vec<UserTopicPreference>> {
        self.store.topic_preferences(user)
    }

    fn reading_history(&self, user: UserId) -> StoreResult<Vec<ReadingHistoryEntry>> {
        self.store.reading_history(user)
    }

    fn feedback(&self, user: UserId) -> StoreResult<Vec<FeedbackEntry>> {
        let snapshot = self.store.feedback(user)?;
        if self.armed.swap(false, Ordering::SeqCst) {
            self.store.record_feedback(user, 7, 5, now())?;
            self.cache.invalidate(user);
        }
        Ok(snapshot)
    }
}

#[test]
fn rating_recorded_while_ranking_is_not_masked_by_cache() {
    let (_svc, store) = fixture();
    let cfg = PersonalizationConfig::from_toml_str(TEST_TOML).expect("config");
    let cache = Arc::new(FeedCache::from_settings(&cfg.cache));
    let signals = Arc::new(RatingLandsMidRanking {
        store: store.clone(),
        cache: cache.clone(),
        armed: AtomicBool::new(true),
    });
    let svc = PersonalizedFeedService::new(&cfg, store.clone(), signals, store, cache);

    let first = svc
        .get_personalized_feed_at(FAN, &ArticleFilter::default(), PageRequest::default(), now())
        .unwrap();
    assert_eq!(first.cache, CacheStatus::Miss);
    assert!(!ids(&first).contains(&7), "ranked from the snapshot before the rating");
    assert!(!svc.cache().contains(FAN), "stale ranking must not be cached");

    let second = svc
        .get_personalized_feed_at(FAN, &ArticleFilter::default(), PageRequest::default(), now())
        .unwrap();
    assert_eq!(second.cache, CacheStatus::Miss);
    let rated = second
        .items
        .iter()
        .find(|s| s.article.id == 7)
        .expect("rated tech article now clears the cutoff");
    assert!((rated.breakdown.feedback - 1.0).abs() < 1e-12);

    let third = svc
        .get_personalized_feed_at(FAN, &ArticleFilter::default(), PageRequest::default(), now())
        .unwrap();
    assert_eq!(third.cache, CacheStatus::Hit);
}

#[test]
fn interaction_validation() {
    let (svc, _store) = fixture();
    assert_eq!(
        svc.record_reading(FAN, 1, 10, 101, now()).unwrap_err().code(),
        "INVALID_REQUEST"
    );
    assert_eq!(svc.record_feedback(FAN, 1, 6, now()).unwrap_err().code(), "INVALID_REQUEST");
    assert_eq!(svc.record_feedback(FAN, 404, 3, now()).unwrap_err().code(), "NOT_FOUND");
    assert_eq!(svc.set_preference(FAN, SPORTS, 1.5).unwrap_err().code(), "INVALID_REQUEST");
    assert_eq!(svc.set_preference(STRANGER, SPORTS, 0.5).unwrap_err().code(), "NOT_FOUND");
}

#[test]
fn similar_articles_share_topic_and_exclude_source() {
    let (svc, store) = fixture();
    let similar = svc.similar_articles_at(FAN, 1, Some(3), now()).unwrap();
    let got: Vec<_> = similar.iter().map(|s| s.article.id).collect();
    assert_eq!(got, vec![5, 2, 6]);

    assert_eq!(
        svc.similar_articles_at(FAN, 404, None, now()).unwrap_err().code(),
        "NOT_FOUND"
    );

    let mut orphan = article(50, 99, 0, "No feed, no topic");
    orphan.topic_id = None;
    store.upsert_article(orphan);
    assert!(svc.similar_articles_at(FAN, 50, None, now()).unwrap().is_empty());
}

#[test]
fn inferred_interests_follow_reading_volume() {
    let (svc, store) = fixture();
    for (i, article_id) in [1u64, 2, 5].into_iter().enumerate() {
        store
            .record_reading(FAN, article_id, 30, 50, now() - Duration::minutes(i as i64))
            .unwrap();
    }
    store.record_reading(FAN, 7, 30, 50, now()).unwrap();

    let interests = svc.inferred_interests(FAN).unwrap();
    assert_eq!(interests.len(), 2);
    assert_eq!(interests[0].topic_id, SPORTS);
    assert_eq!(interests[0].reads, 3);
    assert!((interests[0].inferred_score - 0.15).abs() < 1e-12);
    assert_eq!(interests[0].explicit_weight, Some(0.8));
    assert_eq!(interests[1].topic_id, TECH);

    assert_eq!(svc.inferred_interests(STRANGER).unwrap_err().code(), "NOT_FOUND");
}

#[test]
fn feed_listing_uses_feed_filter() {
    let (svc, _store) = fixture();
    let sports = svc
        .list_feeds(&FeedFilter {
            topic_id: Some(SPORTS),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(sports.len(), 1);
    assert_eq!(sports[0].id, 1);
    assert_eq!(svc.list_feeds(&FeedFilter::default()).unwrap().len(), 2);
}
