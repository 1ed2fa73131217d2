use std::{sync::Arc, time::Duration};

use tokio::time::{Instant, sleep, timeout};

use crate::{
    batch::{Batch, format_for_invocation},
    config::RetryConfig,
    error::{InvokeError, ProviderError, ProviderErrorKind, timeout as call_timeout},
    governor::ConcurrencyGovernor,
    metrics::RunMetrics,
    ports::AnnotationProvider,
    types::{BatchResult, InvocationRequest, InvocationResponse, UnitSnapshot},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    RateLimit,
    Transient,
    Fatal,
}

pub fn classify(err: &ProviderError) -> FailureClass {
    match err.kind {
        ProviderErrorKind::RateLimited => FailureClass::RateLimit,
        _ if err.retryable => FailureClass::Transient,
        _ => FailureClass::Fatal,
    }
}

/// One provider call with bounded fixed-sequence backoff and a single switch to
/// the secondary provider once the primary's attempts are exhausted.
///
/// This is the only layer that sleeps between attempts; the governor only gates
/// admission. The delay before attempt `n + 1` is `backoff_ms[n]` (the last entry
/// repeats), optionally scaled by a deterministic jitter factor.
pub struct RetryingInvoker {
    primary: Arc<dyn AnnotationProvider>,
    secondary: Option<Arc<dyn AnnotationProvider>>,
    config: RetryConfig,
    governor: ConcurrencyGovernor,
}

enum SequenceFailure {
    Fatal(ProviderError),
    Exhausted(ProviderError),
}

impl RetryingInvoker {
    pub fn new(
        primary: Arc<dyn AnnotationProvider>,
        secondary: Option<Arc<dyn AnnotationProvider>>,
        config: RetryConfig,
        governor: ConcurrencyGovernor,
    ) -> Self {
        Self {
            primary,
            secondary,
            config,
            governor,
        }
    }

    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let Some(last) = self.config.backoff_ms.last().copied() else {
            return Duration::ZERO;
        };
        let base = self
            .config
            .backoff_ms
            .get(attempt as usize)
            .copied()
            .unwrap_or(last);
        if !self.config.jitter {
            return Duration::from_millis(base);
        }
        let jitter_factor = 0.9 + (attempt as f64 % 3.0) * 0.05;
        Duration::from_millis((base as f64 * jitter_factor) as u64)
    }

    fn fallback_provider(&self) -> Option<&Arc<dyn AnnotationProvider>> {
        self.secondary
            .as_ref()
            .filter(|secondary| secondary.provider_id() != self.primary.provider_id())
    }

    pub async fn invoke(
        &self,
        batch: &Batch<UnitSnapshot>,
        metrics: &RunMetrics,
    ) -> Result<BatchResult, InvokeError> {
        let request = format_for_invocation(batch);
        let mut attempts = 0_u32;

        let exhausted = match self
            .run_sequence(&self.primary, &request, metrics, &mut attempts)
            .await
        {
            Ok(response) => {
                return Ok(BatchResult {
                    provider_id: self.primary.provider_id().to_string(),
                    response,
                    attempts,
                });
            }
            Err(SequenceFailure::Fatal(err)) => return Err(InvokeError::Fatal(err)),
            Err(SequenceFailure::Exhausted(err)) => err,
        };

        let Some(fallback) = self.fallback_provider() else {
            return Err(InvokeError::ExhaustedRetries {
                attempts,
                fallback_used: false,
                last_error: exhausted,
            });
        };

        metrics.record_fallback_switch();
        tracing::warn!(
            target: "invoker",
            request_id = %request.request_id,
            from = self.primary.provider_id(),
            to = fallback.provider_id(),
            attempts = attempts,
            error = %exhausted,
            "provider_fallback_switch"
        );

        match self
            .run_sequence(fallback, &request, metrics, &mut attempts)
            .await
        {
            Ok(response) => Ok(BatchResult {
                provider_id: fallback.provider_id().to_string(),
                response,
                attempts,
            }),
            Err(SequenceFailure::Fatal(err)) => Err(InvokeError::Fatal(err)),
            Err(SequenceFailure::Exhausted(err)) => Err(InvokeError::ExhaustedRetries {
                attempts,
                fallback_used: true,
                last_error: err,
            }),
        }
    }

    async fn run_sequence(
        &self,
        provider: &Arc<dyn AnnotationProvider>,
        request: &InvocationRequest,
        metrics: &RunMetrics,
        total_attempts: &mut u32,
    ) -> Result<InvocationResponse, SequenceFailure> {
        let provider_id = provider.provider_id();
        let mut attempt = 0_u32;

        loop {
            if attempt > 0 {
                metrics.record_retry();
            }
            metrics.record_call();
            *total_attempts += 1;
            let started_at = Instant::now();

            let call = provider.invoke(request.clone());
            let outcome = match timeout(self.config.call_timeout(), call).await {
                Ok(result) => result.map_err(|err| {
                    if err.provider_id.is_none() {
                        err.with_provider_id(provider_id)
                    } else {
                        err
                    }
                }),
                Err(_) => Err(call_timeout(format!(
                    "provider call exceeded {} ms",
                    self.config.call_timeout_ms
                ))
                .with_provider_id(provider_id)),
            };

            let err = match outcome {
                Ok(response) => {
                    metrics.record_success(response.usage);
                    self.governor.record_success();
                    tracing::debug!(
                        target: "invoker",
                        request_id = %request.request_id,
                        provider_id = provider_id,
                        attempt = attempt,
                        elapsed_ms = started_at.elapsed().as_millis() as u64,
                        "attempt_completed"
                    );
                    return Ok(response);
                }
                Err(err) => err,
            };

            metrics.record_failure();
            let class = classify(&err);
            if class == FailureClass::RateLimit {
                metrics.record_rate_limit();
                self.governor.record_rate_limit_error();
            }

            let can_retry = class != FailureClass::Fatal && attempt < self.config.max_retries;
            tracing::debug!(
                target: "invoker",
                request_id = %request.request_id,
                provider_id = provider_id,
                attempt = attempt,
                kind = ?err.kind,
                class = ?class,
                can_retry = can_retry,
                elapsed_ms = started_at.elapsed().as_millis() as u64,
                error = %err,
                "attempt_failed"
            );

            if class == FailureClass::Fatal {
                return Err(SequenceFailure::Fatal(err));
            }
            if !can_retry {
                return Err(SequenceFailure::Exhausted(err));
            }

            sleep(self.backoff_delay(attempt)).await;
            attempt += 1;
        }
    }
}
