use std::{collections::BTreeMap, fs, path::Path};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use time::{OffsetDateTime, format_description::well_known::Rfc3339};

use crate::{
    store::memory::{InMemoryContentStore, StoredUnit},
    types::{CollectionKey, UnitId},
};

/// On-disk form of the content tree used by the command-line runner.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContentSnapshot {
    #[serde(default)]
    pub collections: BTreeMap<CollectionKey, Vec<UnitId>>,
    #[serde(default)]
    pub units: Vec<StoredUnit>,
    /// RFC 3339 UTC time of the last [`save`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub saved_at: Option<String>,
}

pub fn load(path: &Path) -> Result<InMemoryContentStore> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read content snapshot {}", path.display()))?;
    let snapshot: ContentSnapshot = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse content snapshot {}", path.display()))?;
    Ok(InMemoryContentStore::from_snapshot(snapshot))
}

pub async fn save(store: &InMemoryContentStore, path: &Path) -> Result<()> {
    let mut snapshot = store.to_snapshot().await;
    snapshot.saved_at = Some(
        OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .context("failed to format snapshot timestamp")?,
    );
    let serialized =
        serde_json::to_string_pretty(&snapshot).context("failed to serialize content snapshot")?;
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, serialized)
        .with_context(|| format!("failed to write {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path)
        .with_context(|| format!("failed to replace content snapshot {}", path.display()))?;
    Ok(())
}
