use bulk_annotator::{
    cache::{ResultCache, content_hash},
    types::AnnotationResult,
};

fn result(label: &str) -> AnnotationResult {
    AnnotationResult {
        labels: vec![label.to_string()],
        provider_id: "primary".to_string(),
    }
}

#[test]
fn given_stored_result_when_read_with_same_hash_and_version_then_it_is_returned() {
    let cache = ResultCache::new(4);
    let hash = content_hash("hello");
    cache.put(1, &hash, 3, result("greeting"));

    assert_eq!(cache.get(1, &hash, 3), Some(result("greeting")));

    let stats = cache.stats();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 0);
}

#[test]
fn given_stored_result_when_version_advances_then_lookup_misses_and_entry_is_dropped() {
    let cache = ResultCache::new(4);
    let hash = content_hash("hello");
    cache.put(1, &hash, 3, result("greeting"));

    assert_eq!(cache.get(1, &hash, 4), None);
    assert!(!cache.contains(1), "stale entry should be evicted");

    let stats = cache.stats();
    assert_eq!(stats.stale_evictions, 1);
    assert_eq!(stats.misses, 1);
}

#[test]
fn given_stored_result_when_content_changes_then_lookup_misses() {
    let cache = ResultCache::new(4);
    cache.put(1, &content_hash("hello"), 3, result("greeting"));

    assert_eq!(cache.get(1, &content_hash("hello, world"), 3), None);
}

#[test]
fn given_full_cache_when_one_more_is_inserted_then_least_recently_used_is_evicted() {
    let cache = ResultCache::new(3);
    let hash = content_hash("body");
    for id in 1..=3 {
        cache.put(id, &hash, 1, result("x"));
    }
    // Touch 1 so that 2 becomes the least recently used entry.
    assert!(cache.get(1, &hash, 1).is_some());

    cache.put(4, &hash, 1, result("x"));

    assert_eq!(cache.len(), 3);
    assert!(!cache.contains(2));
    for id in [1, 3, 4] {
        assert!(cache.contains(id), "entry {id} should survive");
    }
    assert_eq!(cache.stats().evictions, 1);
}

#[test]
fn given_zero_capacity_when_used_then_cache_stays_empty() {
    let cache = ResultCache::new(0);
    let hash = content_hash("body");
    cache.put(1, &hash, 1, result("x"));

    assert!(cache.is_empty());
    assert_eq!(cache.get(1, &hash, 1), None);
    assert_eq!(cache.stats().misses, 1);
}

#[test]
fn given_entries_when_invalidated_or_cleared_then_they_are_gone() {
    let cache = ResultCache::new(4);
    let hash = content_hash("body");
    cache.put(1, &hash, 1, result("x"));
    cache.put(2, &hash, 1, result("y"));

    assert!(cache.invalidate(1));
    assert!(!cache.invalidate(1));
    assert_eq!(cache.len(), 1);

    cache.clear();
    assert!(cache.is_empty());
}

#[test]
fn given_identical_bodies_when_hashed_then_hashes_match_and_differ_from_other_bodies() {
    assert_eq!(content_hash("same"), content_hash("same"));
    assert_ne!(content_hash("same"), content_hash("Same"));
    assert_eq!(content_hash("").len(), 64);
}
