use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use async_trait::async_trait;
use bulk_annotator::{
    access::AccessResolver,
    error::{PipelineError, StoreError},
    ports::ContentStore,
    store::InMemoryContentStore,
    testing::RejectingStore,
    types::{EntryPoint, Label, UnitId, UnitSnapshot},
};

use crate::support::{SPACE, space_access, space_store, unit};

#[tokio::test]
async fn given_only_single_entry_points_when_resolved_then_set_size_equals_entry_count() {
    let store: Arc<dyn ContentStore> = Arc::new(space_store().await);
    let access = [(
        "DOCS".to_string(),
        vec![EntryPoint::single(10), EntryPoint::single(20), EntryPoint::single(10)],
    )]
    .into_iter()
    .collect();
    let resolver = AccessResolver::new(access, store);

    let allowed = resolver.resolve("DOCS").await.expect("resolution should succeed");

    assert_eq!(allowed.len(), 2);
    assert!(allowed.contains(&10));
    assert!(allowed.contains(&20));
    assert!(!allowed.contains(&11), "single entry points must not pull children");
}

#[tokio::test]
async fn given_subtree_entry_point_when_resolved_then_every_descendant_is_allowed() {
    let store = Arc::new(space_store().await);
    let resolver = AccessResolver::new(space_access(), store.clone());

    let allowed = resolver.resolve(SPACE).await.expect("resolution should succeed");
    let descendants = store.enumerate_subtree(10).await.expect("subtree should exist");

    assert!(allowed.contains(&10));
    for id in descendants {
        assert!(allowed.contains(&id), "descendant {id} should be allowed");
    }
    assert!(!allowed.contains(&20));
}

#[tokio::test]
async fn given_unknown_collection_when_resolved_then_config_error_is_returned() {
    let resolver = AccessResolver::new(space_access(), Arc::new(space_store().await));

    let err = resolver
        .resolve("UNKNOWN")
        .await
        .expect_err("unconfigured key must be rejected");

    assert!(matches!(err, PipelineError::Config(key) if key == "UNKNOWN"));
}

#[tokio::test]
async fn given_empty_entry_point_list_when_resolved_then_config_error_is_returned() {
    let access = [("EMPTY".to_string(), Vec::new())].into_iter().collect();
    let resolver = AccessResolver::new(access, Arc::new(InMemoryContentStore::new()));

    let err = resolver.resolve("EMPTY").await.expect_err("empty list is forbidden");

    assert!(matches!(err, PipelineError::Config(_)));
}

#[tokio::test]
async fn given_resolved_key_when_tree_changes_then_cache_holds_until_invalidated() {
    let store = Arc::new(space_store().await);
    let resolver = AccessResolver::new(space_access(), store.clone());

    let before = resolver.resolve(SPACE).await.expect("first resolution");
    assert!(resolver.is_cached(SPACE));

    store.insert_unit(unit(13, Some(12), "New nested page")).await;
    let cached = resolver.resolve(SPACE).await.expect("cached resolution");
    assert_eq!(before, cached);
    assert!(!cached.contains(&13));

    assert!(resolver.invalidate(SPACE));
    assert!(!resolver.is_cached(SPACE));
    let refreshed = resolver.resolve(SPACE).await.expect("fresh resolution");
    assert!(refreshed.contains(&13));
}

#[tokio::test]
async fn given_missing_subtree_root_when_resolved_then_root_is_kept_and_walk_skipped() {
    let access = [("GHOST".to_string(), vec![EntryPoint::subtree(404), EntryPoint::single(20)])]
        .into_iter()
        .collect();
    let resolver = AccessResolver::new(access, Arc::new(space_store().await));

    let allowed = resolver.resolve("GHOST").await.expect("missing roots are skipped");

    assert_eq!(allowed.iter().copied().collect::<Vec<_>>(), vec![20, 404]);
}

#[tokio::test]
async fn given_store_outage_when_resolved_then_store_error_propagates_and_nothing_is_cached() {
    let store = RejectingStore::new(space_store().await).with_unavailable_subtrees();
    let resolver = AccessResolver::new(space_access(), Arc::new(store));

    let err = resolver.resolve(SPACE).await.expect_err("outage must surface");

    assert!(matches!(err, PipelineError::Store(_)));
    assert!(!resolver.is_cached(SPACE));
}

/// Counts subtree walks and yields mid-walk so overlapping resolutions interleave.
struct WalkCountingStore {
    inner: InMemoryContentStore,
    walks: AtomicUsize,
}

#[async_trait]
impl ContentStore for WalkCountingStore {
    async fn list_unit_ids(&self, collection_key: &str) -> Result<Vec<UnitId>, StoreError> {
        self.inner.list_unit_ids(collection_key).await
    }

    async fn get_unit(&self, id: UnitId) -> Result<UnitSnapshot, StoreError> {
        self.inner.get_unit(id).await
    }

    async fn enumerate_subtree(&self, root: UnitId) -> Result<Vec<UnitId>, StoreError> {
        self.walks.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        self.inner.enumerate_subtree(root).await
    }

    async fn write_annotations(&self, id: UnitId, labels: &[Label]) -> Result<(), StoreError> {
        self.inner.write_annotations(id, labels).await
    }
}

#[tokio::test]
async fn given_concurrent_first_resolutions_when_resolved_then_tree_is_walked_once() {
    let store = Arc::new(WalkCountingStore {
        inner: space_store().await,
        walks: AtomicUsize::new(0),
    });
    let resolver = AccessResolver::new(space_access(), store.clone());

    let (first, second) = tokio::join!(resolver.resolve(SPACE), resolver.resolve(SPACE));
    let first = first.expect("first resolution should succeed");
    let second = second.expect("second resolution should succeed");

    assert_eq!(store.walks.load(Ordering::SeqCst), 1);
    assert!(Arc::ptr_eq(&first, &second));
    assert!(first.contains(&11));
}
