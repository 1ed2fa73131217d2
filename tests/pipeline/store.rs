use bulk_annotator::{
    error::StoreError,
    ports::ContentStore,
    store::{InMemoryContentStore, snapshot},
};
use uuid::Uuid;

use crate::support::{SPACE, space_store, unit};

#[tokio::test]
async fn given_nested_tree_when_subtree_enumerated_then_all_descendants_excluding_root_return() {
    let store = space_store().await;
    store.insert_unit(unit(13, Some(12), "Nested")).await;

    let mut descendants = store.enumerate_subtree(10).await.expect("root exists");
    descendants.sort_unstable();

    assert_eq!(descendants, vec![11, 12, 13]);
    assert_eq!(store.enumerate_subtree(20).await.expect("leaf exists"), Vec::<u64>::new());
}

#[tokio::test]
async fn given_reparented_and_removed_units_when_subtree_enumerated_then_index_follows_tree() {
    let store = space_store().await;
    store.insert_unit(unit(13, Some(12), "Nested")).await;

    store.insert_unit(unit(12, Some(20), "Moved page")).await;
    let mut under_root = store.enumerate_subtree(10).await.expect("root exists");
    under_root.sort_unstable();
    let mut under_twenty = store.enumerate_subtree(20).await.expect("unit exists");
    under_twenty.sort_unstable();

    assert_eq!(under_root, vec![11]);
    assert_eq!(under_twenty, vec![12, 13]);

    store.remove_unit(11).await.expect("unit exists");
    assert_eq!(store.enumerate_subtree(10).await.expect("root exists"), Vec::<u64>::new());
}

#[tokio::test]
async fn given_missing_root_when_subtree_enumerated_then_not_found_is_returned() {
    let store = InMemoryContentStore::new();

    let err = store.enumerate_subtree(5).await.expect_err("root is missing");

    assert_eq!(err, StoreError::NotFound(5));
}

#[tokio::test]
async fn given_label_write_when_applied_then_labels_merge_and_version_is_unchanged() {
    let store = space_store().await;

    store
        .write_annotations(11, &["hiring".to_string()])
        .await
        .expect("write should succeed");
    store
        .write_annotations(11, &["hiring".to_string(), "q3".to_string()])
        .await
        .expect("write should succeed");

    assert_eq!(store.labels(11).await, Some(vec!["hiring".to_string(), "q3".to_string()]));
    assert_eq!(store.get_unit(11).await.expect("unit exists").version, 1);
}

#[tokio::test]
async fn given_content_edit_when_applied_then_version_is_bumped() {
    let store = space_store().await;

    let version = store.update_content(12, "Revised budget").await.expect("unit exists");

    let snapshot = store.get_unit(12).await.expect("unit exists");
    assert_eq!(version, 2);
    assert_eq!(snapshot.version, 2);
    assert_eq!(snapshot.content, "Revised budget");
}

#[tokio::test]
async fn given_saved_snapshot_when_reloaded_then_tree_collections_and_labels_survive() {
    let store = space_store().await;
    store
        .write_annotations(10, &["planning".to_string()])
        .await
        .expect("write should succeed");
    let path = std::env::temp_dir().join(format!("bulk-annotator-content-{}.json", Uuid::now_v7()));

    snapshot::save(&store, &path).await.expect("snapshot should save");
    let reloaded = snapshot::load(&path).expect("snapshot should load");
    let raw = std::fs::read_to_string(&path).expect("snapshot file exists");
    assert!(raw.contains("\"saved_at\""));

    assert_eq!(reloaded.list_unit_ids(SPACE).await.expect("collection"), vec![10, 11, 12, 20]);
    assert_eq!(reloaded.labels(10).await, Some(vec!["planning".to_string()]));
    let mut descendants = reloaded.enumerate_subtree(10).await.expect("root exists");
    descendants.sort_unstable();
    assert_eq!(descendants, vec![11, 12]);

    let _ = std::fs::remove_file(&path);
}

#[test]
fn given_malformed_snapshot_when_loaded_then_error_names_the_file() {
    let path = std::env::temp_dir().join(format!("bulk-annotator-bad-{}.json", Uuid::now_v7()));
    std::fs::write(&path, "{ not json").expect("temp file should be written");

    let err = snapshot::load(&path).err().expect("malformed snapshot must fail");

    assert!(err.to_string().contains("failed to parse content snapshot"));
    let _ = std::fs::remove_file(&path);
}
