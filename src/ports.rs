use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::{
    error::{ProviderError, StoreError},
    types::{InvocationRequest, InvocationResponse, Label, UnitId, UnitSnapshot},
};

#[async_trait]
pub trait ContentStore: Send + Sync {
    async fn list_unit_ids(&self, collection_key: &str) -> Result<Vec<UnitId>, StoreError>;

    async fn get_unit(&self, id: UnitId) -> Result<UnitSnapshot, StoreError>;

    /// Every descendant of `root`, excluding `root` itself.
    async fn enumerate_subtree(&self, root: UnitId) -> Result<Vec<UnitId>, StoreError>;

    async fn write_annotations(&self, id: UnitId, labels: &[Label]) -> Result<(), StoreError>;
}

#[async_trait]
pub trait AnnotationProvider: Send + Sync {
    fn provider_id(&self) -> &str;

    async fn invoke(&self, request: InvocationRequest)
    -> Result<InvocationResponse, ProviderError>;
}

pub trait ProgressSink: Send + Sync {
    fn on_progress(&self, processed: usize, total: usize);
}

impl<F> ProgressSink for F
where
    F: Fn(usize, usize) + Send + Sync,
{
    fn on_progress(&self, processed: usize, total: usize) {
        self(processed, total)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopProgress;

impl ProgressSink for NoopProgress {
    fn on_progress(&self, _processed: usize, _total: usize) {}
}

pub trait CancellationSource: Send + Sync {
    fn is_cancelled(&self) -> bool;
}

impl CancellationSource for AtomicBool {
    fn is_cancelled(&self) -> bool {
        self.load(Ordering::SeqCst)
    }
}

impl CancellationSource for CancellationToken {
    fn is_cancelled(&self) -> bool {
        CancellationToken::is_cancelled(self)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NeverCancelled;

impl CancellationSource for NeverCancelled {
    fn is_cancelled(&self) -> bool {
        false
    }
}
