use std::collections::{BTreeMap, BTreeSet, VecDeque};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::{
    error::StoreError,
    ports::ContentStore,
    store::snapshot::ContentSnapshot,
    types::{CollectionKey, Label, UnitId, UnitSnapshot},
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredUnit {
    pub id: UnitId,
    #[serde(default)]
    pub parent: Option<UnitId>,
    pub content: String,
    #[serde(default = "default_version")]
    pub version: u64,
    #[serde(default)]
    pub labels: Vec<Label>,
}

fn default_version() -> u64 {
    1
}

#[derive(Debug, Default)]
struct Tree {
    units: BTreeMap<UnitId, StoredUnit>,
    children: BTreeMap<UnitId, BTreeSet<UnitId>>,
    collections: BTreeMap<CollectionKey, Vec<UnitId>>,
}

impl Tree {
    fn insert(&mut self, unit: StoredUnit) {
        if let Some(old_parent) = self.units.get(&unit.id).and_then(|existing| existing.parent) {
            self.unlink(old_parent, unit.id);
        }
        if let Some(parent) = unit.parent {
            self.children.entry(parent).or_default().insert(unit.id);
        }
        self.units.insert(unit.id, unit);
    }

    fn remove(&mut self, id: UnitId) -> Option<StoredUnit> {
        let removed = self.units.remove(&id)?;
        if let Some(parent) = removed.parent {
            self.unlink(parent, id);
        }
        Some(removed)
    }

    fn unlink(&mut self, parent: UnitId, child: UnitId) {
        if let Some(siblings) = self.children.get_mut(&parent) {
            siblings.remove(&child);
            if siblings.is_empty() {
                self.children.remove(&parent);
            }
        }
    }

    fn children_of(&self, parent: UnitId) -> impl Iterator<Item = UnitId> + '_ {
        self.children
            .get(&parent)
            .into_iter()
            .flat_map(|children| children.iter().copied())
    }
}

/// Content tree held in memory. Label writes do not change a unit's version;
/// body edits through [`InMemoryContentStore::update_content`] do.
#[derive(Debug, Default)]
pub struct InMemoryContentStore {
    tree: RwLock<Tree>,
}

impl InMemoryContentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: ContentSnapshot) -> Self {
        let mut tree = Tree {
            collections: snapshot.collections,
            ..Tree::default()
        };
        for unit in snapshot.units {
            tree.insert(unit);
        }
        Self {
            tree: RwLock::new(tree),
        }
    }

    pub async fn to_snapshot(&self) -> ContentSnapshot {
        let tree = self.tree.read().await;
        ContentSnapshot {
            collections: tree.collections.clone(),
            units: tree.units.values().cloned().collect(),
            saved_at: None,
        }
    }

    pub async fn insert_unit(&self, unit: StoredUnit) {
        self.tree.write().await.insert(unit);
    }

    pub async fn add_to_collection(
        &self,
        collection_key: impl Into<CollectionKey>,
        ids: impl IntoIterator<Item = UnitId>,
    ) {
        let mut tree = self.tree.write().await;
        tree.collections
            .entry(collection_key.into())
            .or_default()
            .extend(ids);
    }

    pub async fn remove_unit(&self, id: UnitId) -> Option<StoredUnit> {
        self.tree.write().await.remove(id)
    }

    /// Replaces a unit body and bumps its version. Returns the new version.
    pub async fn update_content(
        &self,
        id: UnitId,
        content: impl Into<String>,
    ) -> Result<u64, StoreError> {
        let mut tree = self.tree.write().await;
        let unit = tree.units.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        unit.content = content.into();
        unit.version += 1;
        Ok(unit.version)
    }

    pub async fn labels(&self, id: UnitId) -> Option<Vec<Label>> {
        self.tree
            .read()
            .await
            .units
            .get(&id)
            .map(|unit| unit.labels.clone())
    }
}

#[async_trait]
impl ContentStore for InMemoryContentStore {
    async fn list_unit_ids(&self, collection_key: &str) -> Result<Vec<UnitId>, StoreError> {
        Ok(self
            .tree
            .read()
            .await
            .collections
            .get(collection_key)
            .cloned()
            .unwrap_or_default())
    }

    async fn get_unit(&self, id: UnitId) -> Result<UnitSnapshot, StoreError> {
        let tree = self.tree.read().await;
        let unit = tree.units.get(&id).ok_or(StoreError::NotFound(id))?;
        Ok(UnitSnapshot {
            id,
            content: unit.content.clone(),
            version: unit.version,
        })
    }

    async fn enumerate_subtree(&self, root: UnitId) -> Result<Vec<UnitId>, StoreError> {
        let tree = self.tree.read().await;
        if !tree.units.contains_key(&root) {
            return Err(StoreError::NotFound(root));
        }

        let mut descendants = Vec::new();
        let mut visited = BTreeSet::from([root]);
        let mut queue = VecDeque::from([root]);
        while let Some(current) = queue.pop_front() {
            for child in tree.children_of(current) {
                if !visited.insert(child) {
                    continue;
                }
                descendants.push(child);
                queue.push_back(child);
            }
        }
        Ok(descendants)
    }

    async fn write_annotations(&self, id: UnitId, labels: &[Label]) -> Result<(), StoreError> {
        let mut tree = self.tree.write().await;
        let unit = tree.units.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        for label in labels {
            if !unit.labels.contains(label) {
                unit.labels.push(label.clone());
            }
        }
        Ok(())
    }
}
