// src/lib.rs
// Public library surface for the server binary and integration tests.

pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod filter;
pub mod metrics;
pub mod model;
pub mod personalize;
pub mod scoring;
pub mod signals;
pub mod store;

// ---- Re-exports for stable public API ----
pub use crate::api::{create_router, AppState};
pub use crate::error::{PersonalizationError, StoreError};
pub use crate::personalize::{CacheStatus, FeedPage, PageRequest, PersonalizedFeedService};
