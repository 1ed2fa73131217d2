use std::{
    collections::{BTreeSet, HashMap},
    sync::Arc,
};

use parking_lot::Mutex;
use tokio::sync::OnceCell;

use crate::{
    config::AccessConfig,
    error::{PipelineError, StoreError},
    ports::ContentStore,
    types::{CollectionKey, EntryPoint, UnitId},
};

pub type AllowedSet = BTreeSet<UnitId>;

type AllowedCell = Arc<OnceCell<Arc<AllowedSet>>>;

/// Resolves which units a collection key authorizes for bulk mutation.
///
/// Results are cached per key. Concurrent first resolutions of the same key share
/// one tree walk; later calls read the cached set until it is invalidated.
pub struct AccessResolver {
    entry_points: AccessConfig,
    store: Arc<dyn ContentStore>,
    resolved: Mutex<HashMap<CollectionKey, AllowedCell>>,
}

impl AccessResolver {
    pub fn new(entry_points: AccessConfig, store: Arc<dyn ContentStore>) -> Self {
        Self {
            entry_points,
            store,
            resolved: Mutex::new(HashMap::new()),
        }
    }

    pub fn entry_points(&self, collection_key: &str) -> Option<&[EntryPoint]> {
        self.entry_points
            .get(collection_key)
            .map(Vec::as_slice)
            .filter(|entries| !entries.is_empty())
    }

    pub async fn resolve(&self, collection_key: &str) -> Result<Arc<AllowedSet>, PipelineError> {
        let entry_points = self
            .entry_points(collection_key)
            .ok_or_else(|| PipelineError::Config(collection_key.to_string()))?;

        let cell = {
            let mut resolved = self.resolved.lock();
            Arc::clone(resolved.entry(collection_key.to_string()).or_default())
        };

        let allowed = cell
            .get_or_try_init(|| self.walk(collection_key, entry_points))
            .await?;
        Ok(Arc::clone(allowed))
    }

    pub fn invalidate(&self, collection_key: &str) -> bool {
        self.resolved.lock().remove(collection_key).is_some()
    }

    pub fn invalidate_all(&self) {
        self.resolved.lock().clear();
    }

    pub fn is_cached(&self, collection_key: &str) -> bool {
        self.resolved
            .lock()
            .get(collection_key)
            .is_some_and(|cell| cell.initialized())
    }

    async fn walk(
        &self,
        collection_key: &str,
        entry_points: &[EntryPoint],
    ) -> Result<Arc<AllowedSet>, PipelineError> {
        let mut allowed = AllowedSet::new();
        let mut skipped_subtrees = 0_usize;

        for entry in entry_points {
            allowed.insert(entry.unit_id);
            if !entry.includes_subtree {
                continue;
            }

            match self.store.enumerate_subtree(entry.unit_id).await {
                Ok(descendants) => allowed.extend(descendants),
                Err(StoreError::NotFound(missing)) => {
                    skipped_subtrees += 1;
                    tracing::warn!(
                        target: "access",
                        collection_key = collection_key,
                        root = entry.unit_id,
                        missing = missing,
                        "subtree_walk_skipped_missing_unit"
                    );
                }
                Err(err) => return Err(err.into()),
            }
        }

        tracing::info!(
            target: "access",
            collection_key = collection_key,
            entry_points = entry_points.len(),
            allowed = allowed.len(),
            skipped_subtrees = skipped_subtrees,
            "allowed_set_resolved"
        );
        Ok(Arc::new(allowed))
    }
}
