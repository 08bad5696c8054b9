pub mod expiration;
pub mod key;
pub mod memory;

use std::time::Duration;

use async_trait::async_trait;

use crate::pipeline::state::StepResult;

pub use expiration::parse_expiration;
pub use key::{derive_key, make_key_fn, source_cache_key, KeyFn};
pub use memory::MemoryCache;

/// Pluggable store for memoized step results.
#[async_trait]
pub trait ResultCache: Send + Sync {
    async fn get(&self, key: &str) -> Option<StepResult>;
    async fn put(&self, key: &str, result: &StepResult, ttl: Duration);
}
