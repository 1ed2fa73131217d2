use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{CollectionKey, ProviderId, UnitId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderErrorKind {
    RateLimited,
    Timeout,
    Transient,
    InvalidRequest,
    Authentication,
    ProtocolViolation,
}

/// Failure reported by an annotation provider for one call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderError {
    pub kind: ProviderErrorKind,
    pub message: String,
    pub retryable: bool,
    pub provider_id: Option<ProviderId>,
    pub http_status: Option<u16>,
}

impl ProviderError {
    pub fn new(kind: ProviderErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retryable: matches!(
                kind,
                ProviderErrorKind::RateLimited
                    | ProviderErrorKind::Timeout
                    | ProviderErrorKind::Transient
            ),
            provider_id: None,
            http_status: None,
        }
    }

    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    pub fn with_provider_id(mut self, provider_id: impl Into<String>) -> Self {
        self.provider_id = Some(provider_id.into());
        self
    }

    pub fn with_http_status(mut self, status: u16) -> Self {
        self.http_status = Some(status);
        self
    }
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.provider_id, self.http_status) {
            (Some(provider_id), Some(status)) => write!(
                f,
                "{} (provider={}, status={})",
                self.message, provider_id, status
            ),
            (Some(provider_id), None) => write!(f, "{} (provider={})", self.message, provider_id),
            (None, Some(status)) => write!(f, "{} (status={})", self.message, status),
            (None, None) => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for ProviderError {}

pub fn rate_limited(message: impl Into<String>) -> ProviderError {
    ProviderError::new(ProviderErrorKind::RateLimited, message)
}

pub fn transient(message: impl Into<String>) -> ProviderError {
    ProviderError::new(ProviderErrorKind::Transient, message)
}

pub fn timeout(message: impl Into<String>) -> ProviderError {
    ProviderError::new(ProviderErrorKind::Timeout, message)
}

pub fn fatal(message: impl Into<String>) -> ProviderError {
    ProviderError::new(ProviderErrorKind::InvalidRequest, message).with_retryable(false)
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("unit {0} not found")]
    NotFound(UnitId),
    #[error("content store unavailable: {0}")]
    Unavailable(String),
    #[error("write rejected for unit {unit_id}: {reason}")]
    WriteRejected { unit_id: UnitId, reason: String },
}

/// Terminal outcome of the retrying invoker for one batch.
#[derive(Debug, Clone, Error)]
pub enum InvokeError {
    #[error("provider call failed without retry: {0}")]
    Fatal(ProviderError),
    #[error("retries exhausted after {attempts} attempts (fallback used: {fallback_used}): {last_error}")]
    ExhaustedRetries {
        attempts: u32,
        fallback_used: bool,
        last_error: ProviderError,
    },
}

impl InvokeError {
    pub fn last_error(&self) -> &ProviderError {
        match self {
            InvokeError::Fatal(err) => err,
            InvokeError::ExhaustedRetries { last_error, .. } => last_error,
        }
    }
}

/// Run-level failures. Per-unit failures never surface here.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("no entry points configured for collection '{0}'; bulk operation forbidden")]
    Config(CollectionKey),
    #[error("none of the requested units are authorized for collection '{0}'")]
    NoAuthorizedUnits(CollectionKey),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("content store failure: {0}")]
    Store(#[from] StoreError),
}

pub fn invalid_request(message: impl Into<String>) -> PipelineError {
    PipelineError::InvalidRequest(message.into())
}
