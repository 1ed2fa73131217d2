use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::types::TokenUsage;

/// Per-run counters shared by every worker of one pipeline run.
#[derive(Debug, Default)]
pub struct RunMetrics {
    total_calls: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    rate_limit_events: AtomicU64,
    fallback_switches: AtomicU64,
    retries: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    write_backs: AtomicU64,
    input_tokens: AtomicU64,
    output_tokens: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunMetricsSnapshot {
    pub total_calls: u64,
    pub successes: u64,
    pub failures: u64,
    pub rate_limit_events: u64,
    pub fallback_switches: u64,
    pub retries: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub write_backs: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub elapsed_ms: u64,
}

impl RunMetrics {
    pub fn record_call(&self) {
        self.total_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_success(&self, usage: TokenUsage) {
        self.successes.fetch_add(1, Ordering::Relaxed);
        self.input_tokens
            .fetch_add(usage.input_tokens, Ordering::Relaxed);
        self.output_tokens
            .fetch_add(usage.output_tokens, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rate_limit(&self) {
        self.rate_limit_events.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fallback_switch(&self) {
        self.fallback_switches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_write_back(&self) {
        self.write_backs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, elapsed_ms: u64) -> RunMetricsSnapshot {
        RunMetricsSnapshot {
            total_calls: self.total_calls.load(Ordering::Relaxed),
            successes: self.successes.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            rate_limit_events: self.rate_limit_events.load(Ordering::Relaxed),
            fallback_switches: self.fallback_switches.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            write_backs: self.write_backs.load(Ordering::Relaxed),
            input_tokens: self.input_tokens.load(Ordering::Relaxed),
            output_tokens: self.output_tokens.load(Ordering::Relaxed),
            elapsed_ms,
        }
    }
}
