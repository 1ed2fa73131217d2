use std::{
    collections::{BTreeMap, HashSet},
    sync::Arc,
};

use futures_util::future::join_all;
use tokio::time::Instant;
use uuid::Uuid;

use crate::{
    access::AccessResolver,
    batch::{Batch, make_batches},
    cache::{ResultCache, content_hash},
    config::{Config, PipelineConfig},
    error::{PipelineError, invalid_request},
    governor::ConcurrencyGovernor,
    invoker::RetryingInvoker,
    metrics::RunMetrics,
    mode::ModePolicy,
    ports::{AnnotationProvider, CancellationSource, ContentStore, ProgressSink},
    types::{AnnotationResult, Label, RunRequest, RunResult, UnitId, UnitOutcome, UnitSnapshot},
};

/// Labels for one fetched unit, or the reason it has none.
enum Resolution {
    Labeled {
        labels: Vec<Label>,
        from_cache: bool,
    },
    Failed(String),
}

/// Bulk annotation run: access check, batching, cached or governed provider
/// calls, then simulate or write back.
///
/// The access resolver, result cache and governor live as long as the pipeline
/// and are shared by every run; metrics are per run.
pub struct Pipeline {
    resolver: AccessResolver,
    store: Arc<dyn ContentStore>,
    cache: ResultCache,
    governor: ConcurrencyGovernor,
    invoker: RetryingInvoker,
    mode: ModePolicy,
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(
        config: &Config,
        store: Arc<dyn ContentStore>,
        primary: Arc<dyn AnnotationProvider>,
        secondary: Option<Arc<dyn AnnotationProvider>>,
    ) -> Self {
        let governor = ConcurrencyGovernor::new(config.governor.clone());
        let invoker =
            RetryingInvoker::new(primary, secondary, config.retry.clone(), governor.clone());

        Self {
            resolver: AccessResolver::new(config.access.clone(), Arc::clone(&store)),
            store,
            cache: ResultCache::new(config.cache.max_entries),
            governor,
            invoker,
            mode: ModePolicy::new(config.mode),
            config: config.pipeline.clone(),
        }
    }

    pub fn resolver(&self) -> &AccessResolver {
        &self.resolver
    }

    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    pub fn governor(&self) -> &ConcurrencyGovernor {
        &self.governor
    }

    #[tracing::instrument(
        name = "pipeline_run",
        target = "pipeline",
        skip(self, request, progress, cancellation),
        fields(
            run_id = %Uuid::now_v7(),
            collection_key = %request.collection_key,
            mode = ?self.mode.current_mode()
        )
    )]
    pub async fn run(
        &self,
        request: RunRequest,
        progress: &dyn ProgressSink,
        cancellation: &dyn CancellationSource,
    ) -> Result<RunResult, PipelineError> {
        let started_at = Instant::now();
        if self.config.units_per_call == 0 {
            return Err(invalid_request("units_per_call must be positive"));
        }

        let allowed = self.resolver.resolve(&request.collection_key).await?;
        let candidates = match request.requested_unit_ids {
            Some(ids) => dedup_in_order(ids),
            None => dedup_in_order(self.store.list_unit_ids(&request.collection_key).await?),
        };
        let authorized = candidates
            .iter()
            .copied()
            .filter(|id| allowed.contains(id))
            .collect::<Vec<_>>();
        if authorized.is_empty() {
            tracing::warn!(
                target: "pipeline",
                requested = candidates.len(),
                allowed = allowed.len(),
                "no_authorized_units"
            );
            return Err(PipelineError::NoAuthorizedUnits(request.collection_key));
        }

        let dry_run = self.mode.resolve_dry_run(request.requested_dry_run);
        let batches = make_batches(&authorized, self.config.batch_size)?;
        tracing::info!(
            target: "pipeline",
            requested = candidates.len(),
            authorized = authorized.len(),
            batches = batches.len(),
            dry_run = dry_run,
            "run_started"
        );

        let metrics = RunMetrics::default();
        let mut outcomes = Vec::with_capacity(authorized.len());
        let mut cancelled = false;

        for batch in &batches {
            if cancellation.is_cancelled() {
                cancelled = true;
                tracing::warn!(
                    target: "pipeline",
                    next_batch = batch.index,
                    processed = outcomes.len(),
                    "run_cancelled"
                );
                break;
            }

            outcomes.extend(self.process_batch(batch, dry_run, &metrics).await);
            progress.on_progress(outcomes.len(), authorized.len());
            tracing::debug!(
                target: "pipeline",
                batch = batch.index,
                processed = outcomes.len(),
                total = authorized.len(),
                concurrency_limit = self.governor.current_limit(),
                "batch_completed"
            );
        }

        let success_count = outcomes.iter().filter(|o| o.is_success()).count();
        let result = RunResult {
            collection_key: request.collection_key,
            mode: self.mode.current_mode(),
            total_requested: candidates.len(),
            total_authorized: authorized.len(),
            total_processed: outcomes.len(),
            success_count,
            failure_count: outcomes.len() - success_count,
            dry_run,
            cancelled,
            outcomes,
            metrics: metrics.snapshot(started_at.elapsed().as_millis() as u64),
            cache: self.cache.stats(),
            governor: self.governor.snapshot(),
        };

        tracing::info!(
            target: "pipeline",
            processed = result.total_processed,
            success = result.success_count,
            failure = result.failure_count,
            cancelled = result.cancelled,
            total_calls = result.metrics.total_calls,
            retries = result.metrics.retries,
            cache_hits = result.metrics.cache_hits,
            elapsed_ms = result.metrics.elapsed_ms,
            "run_finished"
        );
        Ok(result)
    }

    async fn process_batch(
        &self,
        batch: &Batch<UnitId>,
        dry_run: bool,
        metrics: &RunMetrics,
    ) -> Vec<UnitOutcome> {
        let fetched = join_all(batch.items.iter().map(|&id| self.store.get_unit(id))).await;

        let mut resolutions: BTreeMap<UnitId, Resolution> = BTreeMap::new();
        let mut misses = Vec::new();
        for (&id, fetched) in batch.items.iter().zip(fetched) {
            let unit = match fetched {
                Ok(unit) => unit,
                Err(err) => {
                    tracing::warn!(target: "pipeline", unit_id = id, error = %err, "unit_fetch_failed");
                    resolutions.insert(id, Resolution::Failed(err.to_string()));
                    continue;
                }
            };

            let hash = content_hash(&unit.content);
            match self.cache.get(id, &hash, unit.version) {
                Some(cached) => {
                    metrics.record_cache_hit();
                    resolutions.insert(
                        id,
                        Resolution::Labeled {
                            labels: cached.labels,
                            from_cache: true,
                        },
                    );
                }
                None => {
                    metrics.record_cache_miss();
                    misses.push(unit);
                }
            }
        }

        if !misses.is_empty() {
            let groups = make_batches(&misses, self.config.units_per_call).unwrap_or_default();
            let invoked = join_all(groups.iter().map(|group| self.annotate_group(group, metrics)))
                .await;
            for group_resolutions in invoked {
                resolutions.extend(group_resolutions);
            }
        }

        join_all(batch.items.iter().map(|&id| {
            let resolution = resolutions.remove(&id);
            self.finalize(id, resolution, dry_run, metrics)
        }))
        .await
    }

    /// Calls the provider for one invocation group under a governor ticket and
    /// caches every unit the response labels.
    async fn annotate_group(
        &self,
        group: &Batch<UnitSnapshot>,
        metrics: &RunMetrics,
    ) -> Vec<(UnitId, Resolution)> {
        let ticket = self.governor.acquire().await;
        let invoked = self.invoker.invoke(group, metrics).await;
        self.governor.release(ticket);

        let batch_result = match invoked {
            Ok(batch_result) => batch_result,
            Err(err) => {
                let detail = err.to_string();
                tracing::warn!(
                    target: "pipeline",
                    units = ?group.items.iter().map(|unit| unit.id).collect::<Vec<_>>(),
                    error = %detail,
                    "invocation_failed"
                );
                return group
                    .items
                    .iter()
                    .map(|unit| (unit.id, Resolution::Failed(detail.clone())))
                    .collect();
            }
        };

        group
            .items
            .iter()
            .map(|unit| {
                let Some(labels) = batch_result.response.annotations.get(&unit.id) else {
                    return (
                        unit.id,
                        Resolution::Failed(format!(
                            "provider {} returned no annotations for unit {}",
                            batch_result.provider_id, unit.id
                        )),
                    );
                };

                self.cache.put(
                    unit.id,
                    &content_hash(&unit.content),
                    unit.version,
                    AnnotationResult {
                        labels: labels.clone(),
                        provider_id: batch_result.provider_id.clone(),
                    },
                );
                (
                    unit.id,
                    Resolution::Labeled {
                        labels: labels.clone(),
                        from_cache: false,
                    },
                )
            })
            .collect()
    }

    async fn finalize(
        &self,
        id: UnitId,
        resolution: Option<Resolution>,
        dry_run: bool,
        metrics: &RunMetrics,
    ) -> UnitOutcome {
        let (labels, from_cache) = match resolution {
            Some(Resolution::Labeled { labels, from_cache }) => (labels, from_cache),
            Some(Resolution::Failed(detail)) => return UnitOutcome::error(id, detail),
            None => return UnitOutcome::error(id, "unit was not processed"),
        };

        if dry_run {
            return UnitOutcome::simulated(id, labels, from_cache);
        }

        match self.store.write_annotations(id, &labels).await {
            Ok(()) => {
                metrics.record_write_back();
                UnitOutcome::done(id, labels, from_cache)
            }
            Err(err) => {
                tracing::warn!(target: "pipeline", unit_id = id, error = %err, "write_back_failed");
                UnitOutcome::error(id, format!("write-back failed: {err}"))
            }
        }
    }
}

fn dedup_in_order(ids: Vec<UnitId>) -> Vec<UnitId> {
    let mut seen = HashSet::with_capacity(ids.len());
    ids.into_iter().filter(|id| seen.insert(*id)).collect()
}
