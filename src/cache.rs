//! # Feed Cache
//! Per-user memo of fully ranked feeds, bounded in size and age.
//!
//! - Key is the user id alone; filters are applied after a hit.
//! - An entry expires `ttl` after it was written. An expired entry is a miss
//!   even while still resident, and is dropped on that lookup.
//! - Inserting a new key into a full cache evicts exactly one entry, chosen
//!   by the configured [`EvictionPolicy`] (LRU by default).
//! - One lock guards the map and the policy together and is held only for
//!   the lookup or the store/evict step, never while scoring.
//! - `invalidate` bumps a per-user generation. A miss hands out a
//!   [`FillTicket`] holding the generation it saw, and [`FeedCache::fill_at`]
//!   refuses to store a ranking once that generation has moved, so an
//!   interaction landing mid-computation is never masked by a stale entry.

use chrono::{DateTime, Duration, Utc};
use metrics::{counter, gauge};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

use crate::config::CacheSettings;
use crate::model::UserId;
use crate::scoring::ScoredArticle;

/// A ranked feed and the moment it was computed. Replaced wholesale, never edited.
#[derive(Debug, Clone)]
pub struct CachedFeed {
    pub ranked: Arc<[ScoredArticle]>,
    pub computed_at: DateTime<Utc>,
}

/// Proof of a miss: which user, and the invalidation generation seen at lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FillTicket {
    user: UserId,
    generation: u64,
}

impl FillTicket {
    pub fn user(&self) -> UserId {
        self.user
    }
}

#[derive(Debug, Clone)]
pub enum Lookup {
    Hit(CachedFeed),
    Miss(FillTicket),
}

/// Chooses which resident key to drop when the cache is full.
pub trait EvictionPolicy: Send {
    fn on_insert(&mut self, user: UserId);
    fn on_access(&mut self, user: UserId);
    fn on_remove(&mut self, user: UserId);
    /// Key to evict next, if any is tracked.
    fn victim(&self) -> Option<UserId>;
}

/// Least recently used: every insert or hit moves the key to the back.
#[derive(Debug, Default)]
pub struct LruPolicy {
    tick: u64,
    order: BTreeMap<u64, UserId>,
    last_used: HashMap<UserId, u64>,
}

impl LruPolicy {
    fn bump(&mut self, user: UserId) {
        self.tick += 1;
        if let Some(old) = self.last_used.insert(user, self.tick) {
            self.order.remove(&old);
        }
        self.order.insert(self.tick, user);
    }
}

impl EvictionPolicy for LruPolicy {
    fn on_insert(&mut self, user: UserId) {
        self.bump(user);
    }

    fn on_access(&mut self, user: UserId) {
        self.bump(user);
    }

    fn on_remove(&mut self, user: UserId) {
        if let Some(t) = self.last_used.remove(&user) {
            self.order.remove(&t);
        }
    }

    fn victim(&self) -> Option<UserId> {
        self.order.values().next().copied()
    }
}

/// Counters and sizing, for `/debug/cache`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub entries: usize,
    pub capacity: usize,
    pub ttl_seconds: i64,
}

struct CacheInner {
    entries: HashMap<UserId, CachedFeed>,
    policy: Box<dyn EvictionPolicy>,
    // only users that were ever invalidated have an entry
    generations: HashMap<UserId, u64>,
}

impl CacheInner {
    fn generation(&self, user: UserId) -> u64 {
        self.generations.get(&user).copied().unwrap_or(0)
    }
}

pub struct FeedCache {
    ttl: Duration,
    capacity: usize,
    inner: Mutex<CacheInner>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl FeedCache {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self::with_policy(ttl, capacity, Box::new(LruPolicy::default()))
    }

    pub fn with_policy(ttl: Duration, capacity: usize, policy: Box<dyn EvictionPolicy>) -> Self {
        Self {
            ttl,
            capacity: capacity.max(1),
            inner: Mutex::new(CacheInner {
                entries: HashMap::new(),
                policy,
                generations: HashMap::new(),
            }),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    pub fn from_settings(settings: &CacheSettings) -> Self {
        let ttl = Duration::from_std(settings.ttl()).unwrap_or_else(|_| Duration::days(365));
        Self::new(ttl, settings.max_cache_size)
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    // A panic elsewhere while holding the lock leaves the map consistent:
    // every mutation below is a single insert/remove.
    fn lock(&self) -> MutexGuard<'_, CacheInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn is_fresh(&self, entry: &CachedFeed, now: DateTime<Utc>) -> bool {
        now - entry.computed_at < self.ttl
    }

    /// Valid entry for `user` at `now`, or a ticket to fill the miss with.
    pub fn lookup_at(&self, user: UserId, now: DateTime<Utc>) -> Lookup {
        let mut inner = self.lock();
        let found = match inner.entries.get(&user).cloned() {
            Some(entry) if self.is_fresh(&entry, now) => Some(entry),
            Some(_) => {
                inner.entries.remove(&user);
                inner.policy.on_remove(user);
                gauge!("feed_cache_entries").set(inner.entries.len() as f64);
                debug!(target: "personalization", "cache entry expired");
                None
            }
            None => None,
        };

        match found {
            Some(entry) => {
                inner.policy.on_access(user);
                self.hits.fetch_add(1, Ordering::Relaxed);
                counter!("feed_cache_hits_total").increment(1);
                Lookup::Hit(entry)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                counter!("feed_cache_misses_total").increment(1);
                Lookup::Miss(FillTicket {
                    user,
                    generation: inner.generation(user),
                })
            }
        }
    }

    /// Valid entry for `user` at `now`, or `None` on miss/expiry.
    pub fn get_at(&self, user: UserId, now: DateTime<Utc>) -> Option<CachedFeed> {
        match self.lookup_at(user, now) {
            Lookup::Hit(entry) => Some(entry),
            Lookup::Miss(_) => None,
        }
    }

    /// Store the ranking computed for a miss, unless the user was invalidated
    /// since the lookup. The feed is returned either way for the caller to serve.
    pub fn fill_at(
        &self,
        ticket: FillTicket,
        ranked: Vec<ScoredArticle>,
        now: DateTime<Utc>,
    ) -> CachedFeed {
        let feed = CachedFeed {
            ranked: ranked.into(),
            computed_at: now,
        };

        let mut inner = self.lock();
        if inner.generation(ticket.user) == ticket.generation {
            self.store(&mut inner, ticket.user, feed.clone());
        } else {
            debug!(target: "personalization", "invalidated while ranking; fill not cached");
        }
        feed
    }

    /// Store a freshly ranked feed, evicting one entry if a new key would overflow.
    pub fn put_at(&self, user: UserId, ranked: Vec<ScoredArticle>, now: DateTime<Utc>) -> CachedFeed {
        let feed = CachedFeed {
            ranked: ranked.into(),
            computed_at: now,
        };
        let mut inner = self.lock();
        self.store(&mut inner, user, feed.clone());
        feed
    }

    fn store(&self, inner: &mut CacheInner, user: UserId, feed: CachedFeed) {
        if !inner.entries.contains_key(&user) && inner.entries.len() >= self.capacity {
            if let Some(victim) = inner.policy.victim() {
                inner.entries.remove(&victim);
                inner.policy.on_remove(victim);
                self.evictions.fetch_add(1, Ordering::Relaxed);
                counter!("feed_cache_evictions_total").increment(1);
            }
        }
        inner.entries.insert(user, feed);
        inner.policy.on_insert(user);
        gauge!("feed_cache_entries").set(inner.entries.len() as f64);
    }

    pub fn get(&self, user: UserId) -> Option<CachedFeed> {
        self.get_at(user, Utc::now())
    }

    pub fn put(&self, user: UserId, ranked: Vec<ScoredArticle>) -> CachedFeed {
        self.put_at(user, ranked, Utc::now())
    }

    /// Drop the user's entry and void outstanding fill tickets for them.
    /// Returns whether an entry was resident.
    pub fn invalidate(&self, user: UserId) -> bool {
        let mut inner = self.lock();
        *inner.generations.entry(user).or_insert(0) += 1;
        let removed = inner.entries.remove(&user).is_some();
        if removed {
            inner.policy.on_remove(user);
            gauge!("feed_cache_entries").set(inner.entries.len() as f64);
        }
        removed
    }

    /// Resident entries, expired ones included until they are looked up.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, user: UserId) -> bool {
        self.lock().entries.contains_key(&user)
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            entries: self.len(),
            capacity: self.capacity,
            ttl_seconds: self.ttl.num_seconds(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Article, ArticleStatus};
    use crate::scoring::ScoreBreakdown;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 8, 0, 0).unwrap()
    }

    fn scored(id: u64, score: f64) -> ScoredArticle {
        ScoredArticle {
            article: Arc::new(Article {
                id,
                title: format!("a{id}"),
                body: None,
                description: None,
                published_at: t0(),
                language: None,
                status: ArticleStatus::Published,
                feed_id: 1,
                source_name: None,
                topic_id: None,
            }),
            score,
            breakdown: ScoreBreakdown::default(),
            reasons: vec![],
        }
    }

    fn ids(feed: &CachedFeed) -> Vec<u64> {
        feed.ranked.iter().map(|s| s.article.id).collect()
    }

    #[test]
    fn round_trip_within_ttl() {
        let c = FeedCache::new(Duration::minutes(10), 4);
        c.put_at(1, vec![scored(3, 0.9), scored(1, 0.5)], t0());
        let got = c.get_at(1, t0() + Duration::minutes(9)).expect("hit");
        assert_eq!(ids(&got), vec![3, 1]);
        assert_eq!(got.computed_at, t0());
        assert_eq!(c.stats().hits, 1);
    }

    #[test]
    fn expired_entry_is_a_miss_and_is_dropped() {
        let c = FeedCache::new(Duration::minutes(10), 4);
        c.put_at(1, vec![scored(1, 0.5)], t0());
        assert!(c.contains(1));
        assert!(c.get_at(1, t0() + Duration::minutes(10)).is_none());
        assert!(!c.contains(1));
        let s = c.stats();
        assert_eq!((s.hits, s.misses, s.evictions), (0, 1, 0));
    }

    #[test]
    fn overflow_evicts_exactly_one_least_recently_used() {
        let c = FeedCache::new(Duration::minutes(10), 3);
        for u in 1..=3 {
            c.put_at(u, vec![scored(u, 0.5)], t0());
        }
        // touch 1 so 2 becomes the oldest
        assert!(c.get_at(1, t0()).is_some());

        c.put_at(4, vec![scored(4, 0.5)], t0());
        assert_eq!(c.len(), 3);
        assert_eq!(c.stats().evictions, 1);
        assert!(!c.contains(2));
        assert!(c.contains(1) && c.contains(3) && c.contains(4));
    }

    #[test]
    fn replacing_a_resident_key_does_not_evict() {
        let c = FeedCache::new(Duration::minutes(10), 2);
        c.put_at(1, vec![scored(1, 0.5)], t0());
        c.put_at(2, vec![scored(2, 0.5)], t0());
        c.put_at(1, vec![scored(7, 0.9)], t0() + Duration::minutes(1));
        assert_eq!(c.len(), 2);
        assert_eq!(c.stats().evictions, 0);
        let got = c.get_at(1, t0() + Duration::minutes(2)).unwrap();
        assert_eq!(ids(&got), vec![7]);
    }

    #[test]
    fn invalidate_drops_entry_and_policy_key() {
        let c = FeedCache::new(Duration::minutes(10), 2);
        c.put_at(1, vec![], t0());
        c.put_at(2, vec![], t0());
        assert!(c.invalidate(1));
        assert!(!c.invalidate(1));
        assert!(c.get_at(1, t0()).is_none());
        assert_eq!(c.len(), 1);
        // the policy forgot user 1 too: one free slot, no eviction
        c.put_at(3, vec![], t0());
        assert_eq!(c.stats().evictions, 0);
        assert!(c.contains(2) && c.contains(3));
        c.invalidate(2);
        c.invalidate(3);
        assert!(c.is_empty());
    }

    #[test]
    fn fill_after_invalidation_is_served_but_not_stored() {
        let c = FeedCache::new(Duration::minutes(10), 4);
        let Lookup::Miss(ticket) = c.lookup_at(1, t0()) else {
            panic!("empty cache must miss");
        };
        assert_eq!(ticket.user(), 1);
        // nothing resident, but the generation still moves
        assert!(!c.invalidate(1));

        let served = c.fill_at(ticket, vec![scored(5, 0.7)], t0());
        assert_eq!(ids(&served), vec![5]);
        assert!(!c.contains(1));

        let Lookup::Miss(ticket) = c.lookup_at(1, t0()) else {
            panic!("stale fill must not have been cached");
        };
        c.fill_at(ticket, vec![scored(6, 0.7)], t0());
        match c.lookup_at(1, t0()) {
            Lookup::Hit(feed) => assert_eq!(ids(&feed), vec![6]),
            Lookup::Miss(_) => panic!("fresh ticket must be stored"),
        }
    }

    #[test]
    fn invalidating_another_user_keeps_ticket_valid() {
        let c = FeedCache::new(Duration::minutes(10), 4);
        let Lookup::Miss(ticket) = c.lookup_at(1, t0()) else {
            panic!("empty cache must miss");
        };
        c.invalidate(2);
        c.fill_at(ticket, vec![scored(1, 0.5)], t0());
        assert!(c.contains(1));
    }

    #[test]
    fn lru_policy_orders_by_last_use() {
        let mut p = LruPolicy::default();
        p.on_insert(1);
        p.on_insert(2);
        p.on_insert(3);
        assert_eq!(p.victim(), Some(1));
        p.on_access(1);
        assert_eq!(p.victim(), Some(2));
        p.on_remove(2);
        assert_eq!(p.victim(), Some(3));
        p.on_remove(3);
        p.on_remove(1);
        assert_eq!(p.victim(), None);
    }

    #[test]
    fn settings_ttl_converts_to_minutes() {
        let c = FeedCache::from_settings(&CacheSettings {
            ttl_minutes: 10,
            max_cache_size: 5,
        });
        assert_eq!(c.ttl(), Duration::minutes(10));
        assert_eq!(c.stats().ttl_seconds, 600);
        assert_eq!(c.capacity(), 5);
    }
}
