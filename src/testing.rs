//! Deterministic in-process doubles for the provider and store ports.

use std::{
    collections::{BTreeMap, BTreeSet, HashMap, VecDeque},
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::{
    error::{ProviderError, StoreError},
    ports::{AnnotationProvider, ContentStore},
    store::InMemoryContentStore,
    types::{InvocationRequest, InvocationResponse, Label, TokenUsage, UnitId, UnitSnapshot},
};

#[derive(Default)]
struct Script {
    unit_failures: HashMap<UnitId, VecDeque<ProviderError>>,
    persistent_failure: Option<ProviderError>,
    labels: HashMap<UnitId, Vec<Label>>,
    omitted: BTreeSet<UnitId>,
    requests: Vec<InvocationRequest>,
}

/// Provider whose answers are scripted per unit. Units without a script get
/// `["reviewed"]`; every call reports one input and one output token per unit.
pub struct ScriptedProvider {
    id: String,
    script: Mutex<Script>,
    delay: Option<Duration>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl ScriptedProvider {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            script: Mutex::new(Script::default()),
            delay: None,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
        }
    }

    /// Every call sleeps for `delay` (on the tokio clock) before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// The next `times` calls that include `unit_id` fail with `err`.
    pub fn fail_unit(self, unit_id: UnitId, err: ProviderError, times: usize) -> Self {
        self.script
            .lock()
            .unit_failures
            .entry(unit_id)
            .or_default()
            .extend(std::iter::repeat_n(err, times));
        self
    }

    pub fn fail_always(self, err: ProviderError) -> Self {
        self.script.lock().persistent_failure = Some(err);
        self
    }

    pub fn with_labels(self, unit_id: UnitId, labels: &[&str]) -> Self {
        self.script
            .lock()
            .labels
            .insert(unit_id, labels.iter().map(|label| label.to_string()).collect());
        self
    }

    /// Successful responses leave `unit_id` out of the annotation map.
    pub fn omit_unit(self, unit_id: UnitId) -> Self {
        self.script.lock().omitted.insert(unit_id);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<InvocationRequest> {
        self.script.lock().requests.clone()
    }

    fn answer(&self, request: &InvocationRequest) -> Result<InvocationResponse, ProviderError> {
        let mut script = self.script.lock();
        script.requests.push(request.clone());

        if let Some(err) = &script.persistent_failure {
            return Err(err.clone());
        }
        for unit_id in request.unit_ids() {
            if let Some(err) = script
                .unit_failures
                .get_mut(&unit_id)
                .and_then(VecDeque::pop_front)
            {
                return Err(err);
            }
        }

        let annotations = request
            .unit_ids()
            .into_iter()
            .filter(|unit_id| !script.omitted.contains(unit_id))
            .map(|unit_id| {
                let labels = script
                    .labels
                    .get(&unit_id)
                    .cloned()
                    .unwrap_or_else(|| vec!["reviewed".to_string()]);
                (unit_id, labels)
            })
            .collect::<BTreeMap<_, _>>();
        let units = request.items.len() as u64;

        Ok(InvocationResponse {
            annotations,
            usage: TokenUsage {
                input_tokens: units,
                output_tokens: units,
            },
        })
    }
}

#[async_trait]
impl AnnotationProvider for ScriptedProvider {
    fn provider_id(&self) -> &str {
        &self.id
    }

    async fn invoke(
        &self,
        request: InvocationRequest,
    ) -> Result<InvocationResponse, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now_in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now_in_flight, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let answer = self.answer(&request);

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        answer
    }
}

/// Wraps an in-memory store and rejects writes for selected units.
pub struct RejectingStore {
    inner: InMemoryContentStore,
    rejected: BTreeSet<UnitId>,
    unavailable_subtrees: bool,
}

impl RejectingStore {
    pub fn new(inner: InMemoryContentStore) -> Self {
        Self {
            inner,
            rejected: BTreeSet::new(),
            unavailable_subtrees: false,
        }
    }

    pub fn reject_writes_for(mut self, unit_id: UnitId) -> Self {
        self.rejected.insert(unit_id);
        self
    }

    pub fn with_unavailable_subtrees(mut self) -> Self {
        self.unavailable_subtrees = true;
        self
    }

    pub fn inner(&self) -> &InMemoryContentStore {
        &self.inner
    }
}

#[async_trait]
impl ContentStore for RejectingStore {
    async fn list_unit_ids(&self, collection_key: &str) -> Result<Vec<UnitId>, StoreError> {
        self.inner.list_unit_ids(collection_key).await
    }

    async fn get_unit(&self, id: UnitId) -> Result<UnitSnapshot, StoreError> {
        self.inner.get_unit(id).await
    }

    async fn enumerate_subtree(&self, root: UnitId) -> Result<Vec<UnitId>, StoreError> {
        if self.unavailable_subtrees {
            return Err(StoreError::Unavailable("tree index offline".to_string()));
        }
        self.inner.enumerate_subtree(root).await
    }

    async fn write_annotations(&self, id: UnitId, labels: &[Label]) -> Result<(), StoreError> {
        if self.rejected.contains(&id) {
            return Err(StoreError::WriteRejected {
                unit_id: id,
                reason: "unit is locked".to_string(),
            });
        }
        self.inner.write_annotations(id, labels).await
    }
}
