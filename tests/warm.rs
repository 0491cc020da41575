mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{Harness, StubEngagement, StubRecipes, recipe};
use recipehub::cache::keys::detail_key;
use recipehub::cache::{CacheConfig, MemoryCache};
use recipehub::domain::types::{CounterPolicy, Metric};

fn harness_over(memory: &Arc<MemoryCache>) -> Harness {
    Harness::build(
        memory.clone(),
        StubRecipes::with([recipe(1, 50, 0, 0), recipe(2, 900, 4, 0), recipe(3, 10, 0, 0)]),
        StubEngagement::default(),
        CounterPolicy::Strict,
    )
}

#[tokio::test]
async fn warms_the_most_viewed_recipes() {
    let memory = Arc::new(MemoryCache::new(&CacheConfig::default()));
    let harness = harness_over(&memory);

    let report = harness.warmer(Some(2)).warm().await.unwrap();

    assert_eq!(report.loaded, 2);
    assert!(harness.details.get(2).await.unwrap().is_some());
    assert!(harness.details.get(1).await.unwrap().is_some());
    assert!(harness.details.get(3).await.unwrap().is_none());
}

#[tokio::test]
async fn warmed_entries_carry_live_counters() {
    let memory = Arc::new(MemoryCache::new(&CacheConfig::default()));
    let harness = harness_over(&memory);
    harness.bootstrap().await;
    harness.counters.bump(Metric::Likes, 2, 3).await;

    let report = harness.warmer(None).warm().await.unwrap();

    assert_eq!(report.loaded, 3);
    assert_eq!(report.overlaid, 3);
    let detail = harness.details.get(2).await.unwrap().unwrap();
    assert_eq!(detail.likes, 7);
    assert_eq!(detail.views, 900);
}

#[tokio::test]
async fn warm_without_counters_caches_row_values() {
    let memory = Arc::new(MemoryCache::new(&CacheConfig::default()));
    let harness = harness_over(&memory);

    let report = harness.warmer(None).warm().await.unwrap();

    assert_eq!(report.overlaid, 0);
    assert_eq!(harness.details.get(1).await.unwrap().unwrap().views, 50);
}

#[tokio::test]
async fn warm_refreshes_ttl_inside_the_window() {
    let memory = Arc::new(MemoryCache::new(&CacheConfig::default()));
    let harness = harness_over(&memory);
    let window = harness.details.ttl_window();

    harness.warmer(None).warm().await.unwrap();

    for id in [1, 2, 3] {
        let ttl = memory.ttl(&detail_key(id)).expect("entry is live");
        assert!(ttl <= window.max());
        assert!(ttl + Duration::from_secs(1) >= window.min());
    }
}
