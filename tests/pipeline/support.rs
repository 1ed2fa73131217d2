use std::collections::BTreeMap;

use bulk_annotator::{
    config::{
        AccessConfig, CacheConfig, Config, CredentialRef, GovernorConfig, LoggingConfig,
        PipelineConfig, ProviderProfile, ProvidersConfig, RetryConfig, StoreConfig,
    },
    store::{InMemoryContentStore, StoredUnit},
    types::{EntryPoint, OperatingMode},
};

pub const SPACE: &str = "SPACE1";

pub fn unit(id: u64, parent: Option<u64>, content: &str) -> StoredUnit {
    StoredUnit {
        id,
        parent,
        content: content.to_string(),
        version: 1,
        labels: Vec::new(),
    }
}

/// Unit 10 with children 11 and 12; unit 20 sits outside the subtree but is
/// listed in the collection.
pub async fn space_store() -> InMemoryContentStore {
    let store = InMemoryContentStore::new();
    store.insert_unit(unit(10, None, "Quarterly planning overview")).await;
    store.insert_unit(unit(11, Some(10), "Hiring plan for Q3")).await;
    store.insert_unit(unit(12, Some(10), "Budget assumptions")).await;
    store.insert_unit(unit(20, None, "Unrelated team wiki")).await;
    store.add_to_collection(SPACE, [10, 11, 12, 20]).await;
    store
}

pub fn space_access() -> AccessConfig {
    BTreeMap::from([(SPACE.to_string(), vec![EntryPoint::subtree(10)])])
}

pub fn profile(id: &str) -> ProviderProfile {
    ProviderProfile {
        id: id.to_string(),
        endpoint: "http://127.0.0.1:9/v1".to_string(),
        model: "annotator-small".to_string(),
        credential: CredentialRef::None,
        instructions: "label units".to_string(),
    }
}

pub fn retry_config() -> RetryConfig {
    RetryConfig {
        max_retries: 3,
        backoff_ms: vec![10, 20, 40],
        jitter: false,
        call_timeout_ms: 1_000,
    }
}

pub fn config(mode: OperatingMode) -> Config {
    Config {
        mode,
        access: space_access(),
        pipeline: PipelineConfig::default(),
        governor: GovernorConfig::default(),
        retry: retry_config(),
        cache: CacheConfig::default(),
        providers: ProvidersConfig {
            primary: profile("primary"),
            secondary: Some(profile("secondary")),
        },
        store: StoreConfig::default(),
        logging: LoggingConfig::default(),
    }
}
