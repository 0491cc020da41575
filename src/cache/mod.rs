//! RecipeHub cache layer
//!
//! Two components share one [`KeyValueCache`]:
//!
//! - **CounterStore**: current/committed hash planes per metric, the
//!   write-behind side of views, likes and saves
//! - **DetailCache**: denormalized recipe blobs with a jittered TTL
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! backend = "redis"
//! redis_url = "redis://127.0.0.1:6379"
//! operation_timeout_ms = 250
//! detail_ttl_min_secs = 1500
//! detail_ttl_max_secs = 1800
//! ```

mod config;
mod counters;
mod detail;
pub mod keys;
mod kv;
mod lease;
mod lock;
mod memory;

pub use config::CacheConfig;
pub use counters::{CounterError, CounterStore, InitOutcome};
pub use detail::{DetailCache, TtlWindow};
pub use kv::{CacheError, KeyValueCache};
pub use lease::CacheLease;
pub use memory::MemoryCache;
