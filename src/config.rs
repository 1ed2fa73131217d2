use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result, anyhow, bail};
use jsonschema::{JSONSchema, ValidationError};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{CollectionKey, EntryPoint, OperatingMode, ProviderId};

const SCHEMA_FILE_NAME: &str = "bulk-annotator.schema.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub mode: OperatingMode,
    #[serde(default)]
    pub access: AccessConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub governor: GovernorConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Entry points per collection key, in declaration order.
pub type AccessConfig = BTreeMap<CollectionKey, Vec<EntryPoint>>;

fn default_batch_size() -> usize {
    10
}

fn default_units_per_call() -> usize {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_units_per_call")]
    pub units_per_call: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            units_per_call: default_units_per_call(),
        }
    }
}

fn default_initial_limit() -> usize {
    3
}

fn default_min_limit() -> usize {
    1
}

fn default_max_limit() -> usize {
    8
}

fn default_burst_window_ms() -> u64 {
    10_000
}

fn default_burst_threshold() -> usize {
    1
}

fn default_decrease_factor() -> f64 {
    0.5
}

fn default_increase_factor() -> f64 {
    0.2
}

fn default_quiet_period_ms() -> u64 {
    5 * 60 * 1_000
}

fn default_max_adjustment_history() -> usize {
    32
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GovernorConfig {
    #[serde(default = "default_initial_limit")]
    pub initial_limit: usize,
    #[serde(default = "default_min_limit")]
    pub min_limit: usize,
    #[serde(default = "default_max_limit")]
    pub max_limit: usize,
    #[serde(default = "default_burst_window_ms")]
    pub burst_window_ms: u64,
    #[serde(default = "default_burst_threshold")]
    pub burst_threshold: usize,
    #[serde(default = "default_decrease_factor")]
    pub decrease_factor: f64,
    #[serde(default = "default_increase_factor")]
    pub increase_factor: f64,
    #[serde(default = "default_quiet_period_ms")]
    pub quiet_period_ms: u64,
    #[serde(default = "default_max_adjustment_history")]
    pub max_adjustment_history: usize,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            initial_limit: default_initial_limit(),
            min_limit: default_min_limit(),
            max_limit: default_max_limit(),
            burst_window_ms: default_burst_window_ms(),
            burst_threshold: default_burst_threshold(),
            decrease_factor: default_decrease_factor(),
            increase_factor: default_increase_factor(),
            quiet_period_ms: default_quiet_period_ms(),
            max_adjustment_history: default_max_adjustment_history(),
        }
    }
}

impl GovernorConfig {
    pub fn burst_window(&self) -> Duration {
        Duration::from_millis(self.burst_window_ms)
    }

    pub fn quiet_period(&self) -> Duration {
        Duration::from_millis(self.quiet_period_ms)
    }
}

fn default_max_retries() -> u32 {
    3
}

fn default_backoff_ms() -> Vec<u64> {
    vec![500, 1_000, 2_000]
}

fn default_call_timeout_ms() -> u64 {
    60_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: Vec<u64>,
    #[serde(default)]
    pub jitter: bool,
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            backoff_ms: default_backoff_ms(),
            jitter: false,
            call_timeout_ms: default_call_timeout_ms(),
        }
    }
}

impl RetryConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms.max(1))
    }
}

fn default_cache_max_entries() -> usize {
    1_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_max_entries")]
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: default_cache_max_entries(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CredentialRef {
    Env { var: String },
    InlineToken { token: String },
    None,
}

fn default_instructions() -> String {
    "Assign concise topical labels to each unit. Respond with JSON: \
     {\"annotations\":[{\"unit_id\":<id>,\"labels\":[\"...\"]}]}"
        .to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderProfile {
    pub id: ProviderId,
    pub endpoint: String,
    pub model: String,
    #[serde(default = "default_credential")]
    pub credential: CredentialRef,
    #[serde(default = "default_instructions")]
    pub instructions: String,
}

fn default_credential() -> CredentialRef {
    CredentialRef::None
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvidersConfig {
    pub primary: ProviderProfile,
    #[serde(default)]
    pub secondary: Option<ProviderProfile>,
}

fn default_snapshot_path() -> PathBuf {
    PathBuf::from("./content.json")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_snapshot_path")]
    pub snapshot_path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            snapshot_path: default_snapshot_path(),
        }
    }
}

fn default_enabled_true() -> bool {
    true
}

fn default_logging_dir() -> PathBuf {
    PathBuf::from("./logs")
}

fn default_logging_filter() -> String {
    "info".to_string()
}

fn default_logging_rotation() -> LoggingRotation {
    LoggingRotation::Daily
}

fn default_logging_retention_days() -> usize {
    14
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum LoggingRotation {
    Daily,
    Hourly,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_logging_filter")]
    pub filter: String,
    #[serde(default = "default_logging_rotation")]
    pub rotation: LoggingRotation,
    #[serde(default = "default_logging_retention_days")]
    pub retention_days: usize,
    #[serde(default = "default_enabled_true")]
    pub stderr_warn_enabled: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            dir: default_logging_dir(),
            filter: default_logging_filter(),
            rotation: default_logging_rotation(),
            retention_days: default_logging_retention_days(),
            stderr_warn_enabled: true,
        }
    }
}

impl Config {
    pub fn load(config_path: &Path) -> Result<Self> {
        let config_content = fs::read_to_string(config_path)
            .with_context(|| format!("failed to read {}", config_path.display()))?;
        let config_value: Value = json5::from_str(&config_content)
            .with_context(|| format!("failed to parse {}", config_path.display()))?;

        let config_base = config_path.parent().unwrap_or_else(|| Path::new("."));
        let schema_path = resolve_schema_path(config_base, &config_value)?;
        validate_against_schema(&config_value, &schema_path)?;

        let mut config: Config =
            serde_json::from_value(config_value).context("failed to deserialize config")?;
        config.validate()?;

        if !config.store.snapshot_path.is_absolute() {
            config.store.snapshot_path = config_base.join(&config.store.snapshot_path);
        }
        if !config.logging.dir.is_absolute() {
            config.logging.dir = config_base.join(&config.logging.dir);
        }

        Ok(config)
    }

    /// Cross-field checks the schema cannot express.
    pub fn validate(&self) -> Result<()> {
        let governor = &self.governor;
        if governor.min_limit == 0 {
            bail!("governor.min_limit must be at least 1");
        }
        if !(governor.min_limit <= governor.initial_limit
            && governor.initial_limit <= governor.max_limit)
        {
            bail!(
                "governor limits must satisfy min_limit <= initial_limit <= max_limit (got {} <= {} <= {})",
                governor.min_limit,
                governor.initial_limit,
                governor.max_limit
            );
        }
        if !(governor.decrease_factor > 0.0 && governor.decrease_factor < 1.0) {
            bail!("governor.decrease_factor must be within (0, 1)");
        }
        if governor.increase_factor <= 0.0 {
            bail!("governor.increase_factor must be positive");
        }
        if self.retry.backoff_ms.is_empty() {
            bail!("retry.backoff_ms cannot be empty");
        }
        if self.pipeline.batch_size == 0 || self.pipeline.units_per_call == 0 {
            bail!("pipeline.batch_size and pipeline.units_per_call must be positive");
        }
        Ok(())
    }

    /// Suspicious but legal settings, for the caller to log once tracing is up.
    pub fn warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if let Some(secondary) = &self.providers.secondary
            && secondary.id == self.providers.primary.id
        {
            warnings.push(format!(
                "providers.secondary reuses primary id '{}'; fallback will hit the same provider",
                secondary.id
            ));
        }
        warnings
    }
}

fn resolve_schema_path(config_base: &Path, config_value: &Value) -> Result<PathBuf> {
    if let Some(path_text) = config_value.get("$schema").and_then(|value| value.as_str()) {
        let configured = PathBuf::from(path_text);
        if configured.is_absolute() {
            return Ok(configured);
        }
        return Ok(config_base.join(&configured));
    }

    let local_default = config_base.join(SCHEMA_FILE_NAME);
    if local_default.exists() {
        return Ok(local_default);
    }

    Err(anyhow!(
        "unable to resolve schema path: expected $schema in config or {SCHEMA_FILE_NAME} next to it"
    ))
}

fn validate_against_schema(config_value: &Value, schema_path: &Path) -> Result<()> {
    let schema_content = fs::read_to_string(schema_path)
        .with_context(|| format!("failed to read schema {}", schema_path.display()))?;
    let schema: Value = serde_json::from_str(&schema_content)
        .with_context(|| format!("failed to parse schema {}", schema_path.display()))?;

    let compiled =
        JSONSchema::compile(&schema).map_err(|e| anyhow!("failed to compile schema: {e}"))?;

    match compiled.validate(config_value) {
        Ok(()) => Ok(()),
        Err(errors_iter) => {
            let validation_errors: Vec<ValidationError> = errors_iter.collect();
            let messages: Vec<String> = validation_errors
                .into_iter()
                .map(|error| error.to_string())
                .collect();
            Err(anyhow!("config validation failed: {}", messages.join("; ")))
        }
    }
}
