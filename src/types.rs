use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{
    cache::CacheStats, governor::GovernorSnapshot, metrics::RunMetricsSnapshot,
};

pub type UnitId = u64;
pub type CollectionKey = String;
pub type ProviderId = String;
pub type Label = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryPoint {
    pub unit_id: UnitId,
    #[serde(default)]
    pub includes_subtree: bool,
}

impl EntryPoint {
    pub fn single(unit_id: UnitId) -> Self {
        Self {
            unit_id,
            includes_subtree: false,
        }
    }

    pub fn subtree(unit_id: UnitId) -> Self {
        Self {
            unit_id,
            includes_subtree: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperatingMode {
    #[default]
    Test,
    SafeTest,
    Prod,
}

/// Body and version tag of a unit as currently held by the content store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitSnapshot {
    pub id: UnitId,
    pub content: String,
    pub version: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnotationResult {
    pub labels: Vec<Label>,
    pub provider_id: ProviderId,
}

/// One unit as submitted to a provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InvocationItem {
    pub unit_id: UnitId,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InvocationRequest {
    pub request_id: String,
    pub items: Vec<InvocationItem>,
}

impl InvocationRequest {
    pub fn unit_ids(&self) -> Vec<UnitId> {
        self.items.iter().map(|item| item.unit_id).collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvocationResponse {
    pub annotations: BTreeMap<UnitId, Vec<Label>>,
    pub usage: TokenUsage,
}

/// Successful invoker output: the response plus which provider produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchResult {
    pub provider_id: ProviderId,
    pub response: InvocationResponse,
    pub attempts: u32,
}

#[derive(Debug, Clone, Default)]
pub struct RunRequest {
    pub collection_key: CollectionKey,
    pub requested_unit_ids: Option<Vec<UnitId>>,
    pub requested_dry_run: Option<bool>,
}

impl RunRequest {
    pub fn new(collection_key: impl Into<CollectionKey>) -> Self {
        Self {
            collection_key: collection_key.into(),
            requested_unit_ids: None,
            requested_dry_run: None,
        }
    }

    pub fn with_units(mut self, unit_ids: impl IntoIterator<Item = UnitId>) -> Self {
        self.requested_unit_ids = Some(unit_ids.into_iter().collect());
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.requested_dry_run = Some(dry_run);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitStatus {
    Done,
    Simulated,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnitOutcome {
    pub unit_id: UnitId,
    pub status: UnitStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub applied_labels: Option<Vec<Label>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proposed_labels: Option<Vec<Label>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
    pub from_cache: bool,
}

impl UnitOutcome {
    pub fn done(unit_id: UnitId, labels: Vec<Label>, from_cache: bool) -> Self {
        Self {
            unit_id,
            status: UnitStatus::Done,
            applied_labels: Some(labels),
            proposed_labels: None,
            error_detail: None,
            from_cache,
        }
    }

    pub fn simulated(unit_id: UnitId, labels: Vec<Label>, from_cache: bool) -> Self {
        Self {
            unit_id,
            status: UnitStatus::Simulated,
            applied_labels: None,
            proposed_labels: Some(labels),
            error_detail: None,
            from_cache,
        }
    }

    pub fn error(unit_id: UnitId, detail: impl Into<String>) -> Self {
        Self {
            unit_id,
            status: UnitStatus::Error,
            applied_labels: None,
            proposed_labels: None,
            error_detail: Some(detail.into()),
            from_cache: false,
        }
    }

    pub fn is_success(&self) -> bool {
        !matches!(self.status, UnitStatus::Error)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunResult {
    pub collection_key: CollectionKey,
    pub mode: OperatingMode,
    pub total_requested: usize,
    pub total_authorized: usize,
    pub total_processed: usize,
    pub success_count: usize,
    pub failure_count: usize,
    pub dry_run: bool,
    pub cancelled: bool,
    pub outcomes: Vec<UnitOutcome>,
    pub metrics: RunMetricsSnapshot,
    pub cache: CacheStats,
    pub governor: GovernorSnapshot,
}

impl RunResult {
    pub fn outcome(&self, unit_id: UnitId) -> Option<&UnitOutcome> {
        self.outcomes
            .iter()
            .find(|outcome| outcome.unit_id == unit_id)
    }
}
