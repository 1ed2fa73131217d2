use std::{collections::BTreeMap, env, time::Duration};

use async_trait::async_trait;
use reqwest::{Client, header};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::{
    config::{CredentialRef, ProviderProfile},
    error::{ProviderError, ProviderErrorKind, fatal, rate_limited, timeout, transient},
    ports::AnnotationProvider,
    types::{InvocationRequest, InvocationResponse, Label, TokenUsage, UnitId},
};

/// Chat-completions provider speaking the OpenAI-compatible JSON dialect.
pub struct OpenAiCompatibleProvider {
    profile: ProviderProfile,
    client: Client,
    auth_header: Option<String>,
}

impl OpenAiCompatibleProvider {
    pub fn new(profile: ProviderProfile) -> Result<Self, ProviderError> {
        let auth_header = resolve_credential(&profile.credential, &profile.id)?;
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(30))
            .build()
            .map_err(|err| {
                fatal(format!("failed to build http client: {err}")).with_provider_id(&profile.id)
            })?;

        Ok(Self {
            profile,
            client,
            auth_header,
        })
    }

    fn request_body(&self, request: &InvocationRequest) -> Value {
        let units = request
            .items
            .iter()
            .map(|item| json!({"unit_id": item.unit_id, "content": item.content}))
            .collect::<Vec<_>>();

        json!({
            "model": self.profile.model,
            "stream": false,
            "response_format": {"type": "json_object"},
            "messages": [
                {"role": "system", "content": self.profile.instructions},
                {"role": "user", "content": json!({"units": units}).to_string()},
            ],
        })
    }
}

#[async_trait]
impl AnnotationProvider for OpenAiCompatibleProvider {
    fn provider_id(&self) -> &str {
        &self.profile.id
    }

    async fn invoke(
        &self,
        request: InvocationRequest,
    ) -> Result<InvocationResponse, ProviderError> {
        let url = format!(
            "{}/chat/completions",
            self.profile.endpoint.trim_end_matches('/')
        );

        let mut builder = self
            .client
            .post(url)
            .header(header::CONTENT_TYPE, "application/json")
            .header("x-request-id", &request.request_id)
            .json(&self.request_body(&request));
        if let Some(auth_header) = &self.auth_header {
            builder = builder.header(header::AUTHORIZATION, auth_header);
        }

        let response = builder.send().await.map_err(|err| {
            let kind = if err.is_timeout() {
                ProviderErrorKind::Timeout
            } else {
                ProviderErrorKind::Transient
            };
            ProviderError::new(kind, format!("request failed: {err}"))
                .with_provider_id(&self.profile.id)
        })?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(map_http_error(status, &self.profile.id, &body));
        }

        let completion: ChatCompletion = response.json().await.map_err(|err| {
            ProviderError::new(
                ProviderErrorKind::ProtocolViolation,
                format!("malformed completion body: {err}"),
            )
            .with_retryable(false)
            .with_provider_id(&self.profile.id)
        })?;

        let content = completion
            .choices
            .first()
            .and_then(|choice| choice.message.content.as_deref())
            .ok_or_else(|| {
                ProviderError::new(
                    ProviderErrorKind::ProtocolViolation,
                    "completion has no message content",
                )
                .with_retryable(false)
                .with_provider_id(&self.profile.id)
            })?;

        Ok(InvocationResponse {
            annotations: parse_annotations(content, &self.profile.id)?,
            usage: completion
                .usage
                .map(|usage| TokenUsage {
                    input_tokens: usage.prompt_tokens,
                    output_tokens: usage.completion_tokens,
                })
                .unwrap_or_default(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct AnnotationPayload {
    annotations: Vec<UnitAnnotation>,
}

#[derive(Debug, Deserialize)]
struct UnitAnnotation {
    unit_id: UnitId,
    #[serde(default)]
    labels: Vec<Label>,
}

/// Parses `{"annotations":[{"unit_id":..,"labels":[..]}]}`. Labels are trimmed,
/// lowercased and deduplicated; empty labels are dropped.
pub fn parse_annotations(
    content: &str,
    provider_id: &str,
) -> Result<BTreeMap<UnitId, Vec<Label>>, ProviderError> {
    let payload: AnnotationPayload = serde_json::from_str(content).map_err(|err| {
        ProviderError::new(
            ProviderErrorKind::ProtocolViolation,
            format!("annotation payload is not valid: {err}"),
        )
        .with_retryable(false)
        .with_provider_id(provider_id)
    })?;

    let mut annotations = BTreeMap::new();
    for item in payload.annotations {
        let mut labels: Vec<Label> = Vec::new();
        for label in item.labels {
            let normalized = label.trim().to_lowercase();
            if !normalized.is_empty() && !labels.contains(&normalized) {
                labels.push(normalized);
            }
        }
        annotations.insert(item.unit_id, labels);
    }
    Ok(annotations)
}

pub fn map_http_error(status: u16, provider_id: &str, body: &str) -> ProviderError {
    let normalized_body = body.chars().take(240).collect::<String>();

    let mut err = match status {
        401 => ProviderError::new(ProviderErrorKind::Authentication, "authentication failed")
            .with_retryable(false),
        403 => ProviderError::new(ProviderErrorKind::Authentication, "authorization failed")
            .with_retryable(false),
        408 => timeout(format!("provider returned status {status}")),
        429 => rate_limited(format!("provider returned status {status}")),
        400..=499 => fatal(format!("provider returned status {status}")),
        _ => transient(format!("provider returned status {status}")),
    }
    .with_provider_id(provider_id)
    .with_http_status(status);

    if !normalized_body.is_empty() {
        err.message = format!("{}: {}", err.message, normalized_body);
    }

    err
}

fn resolve_credential(
    reference: &CredentialRef,
    provider_id: &str,
) -> Result<Option<String>, ProviderError> {
    match reference {
        CredentialRef::Env { var } => {
            let token = env::var(var).map_err(|_| {
                ProviderError::new(
                    ProviderErrorKind::Authentication,
                    format!("missing credential environment variable {var}"),
                )
                .with_retryable(false)
                .with_provider_id(provider_id)
            })?;
            Ok(Some(format!("Bearer {token}")))
        }
        CredentialRef::InlineToken { token } => {
            if token.trim().is_empty() {
                return Err(fatal("inline credential token cannot be empty")
                    .with_provider_id(provider_id));
            }
            Ok(Some(format!("Bearer {token}")))
        }
        CredentialRef::None => Ok(None),
    }
}
