//! Centralized configuration management for kodit
//!
//! Configuration follows a simple hierarchy:
//! 1. Safe defaults (defined as constants)
//! 2. Environment variable overrides (after dotenv bootstrap)
//! 3. Runtime validation

pub mod error;
pub mod profile;
pub mod validation;

pub use error::{ConfigError, ConfigResult};
pub use profile::Profile;

use std::path::PathBuf;
use std::time::Duration;

// =============================================================================
// SAFE DEFAULTS - Work for any environment (dev, prod, test)
// =============================================================================

const DEFAULT_DB_MAX_CONNECTIONS: u32 = 5;

// Worker pool
const DEFAULT_WORKER_COUNT: usize = 1;
const DEFAULT_WORKER_POLL_PERIOD_SECS: u64 = 1;

// Task queue retry policy
const DEFAULT_TASK_MAX_RETRIES: u32 = 3;
const DEFAULT_TASK_RETRY_INITIAL_SECS: u64 = 5;
const DEFAULT_TASK_RETRY_BACKOFF: f64 = 2.0;

// Provider endpoints
const DEFAULT_ENDPOINT_TIMEOUT_SECS: u64 = 60;
const DEFAULT_ENDPOINT_MAX_RETRIES: u32 = 3;
const DEFAULT_MAX_BATCH_CHARS: usize = 32_768;
const DEFAULT_NUM_PARALLEL_TASKS: usize = 4;
const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";
const DEFAULT_ENRICHMENT_MODEL: &str = "gpt-4o-mini";

// Periodic sync
const DEFAULT_PERIODIC_SYNC_INTERVAL_SECS: u64 = 1800;

/// Top-level application configuration
///
/// All settings have safe defaults and can be overridden via `KODIT_*`
/// environment variables.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct AppConfig {
    /// Deployment profile
    pub profile: Profile,

    /// Root directory for the database and derived state
    pub data_dir: PathBuf,

    /// Directory under which working copies are cloned
    pub clone_dir: PathBuf,

    /// Database URL; the scheme selects the dialect
    /// (`sqlite:` or `postgres://`)
    pub db_url: String,

    /// Maximum database connections in the pool
    pub db_max_connections: u32,

    /// Worker pool configuration
    pub worker: WorkerConfig,

    /// Embedding provider endpoint
    pub embedding_endpoint: EndpointConfig,

    /// Enrichment (text generation) provider endpoint
    pub enrichment_endpoint: EndpointConfig,

    /// Periodic re-sync scheduler
    pub periodic_sync: PeriodicSyncConfig,

    /// Bearer keys accepted by the external HTTP surface
    pub api_keys: Vec<String>,

    /// Test-only: disables the startup provider round-trip check
    pub skip_provider_validation: bool,
}

/// Worker pool and task queue configuration
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct WorkerConfig {
    /// Number of concurrent workers
    pub count: usize,

    /// How long a worker waits on an empty queue before re-polling
    pub poll_period_secs: u64,

    /// Retry cap before a task is terminally failed
    pub max_retries: u32,

    /// Base delay of the retry schedule `initial * backoff^n`
    pub retry_initial_secs: u64,

    /// Multiplier of the retry schedule
    pub retry_backoff: f64,
}

impl WorkerConfig {
    pub const fn poll_period(&self) -> Duration {
        Duration::from_secs(self.poll_period_secs)
    }
}

/// One OpenAI-compatible provider endpoint
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct EndpointConfig {
    /// Base URL, e.g. `https://api.openai.com/v1`
    pub base_url: String,

    /// Model identifier sent with every request
    pub model: String,

    /// Bearer token; optional for unauthenticated local servers
    pub api_key: Option<String>,

    /// Per-request timeout in seconds
    pub timeout_secs: u64,

    /// Retry attempts on 429/5xx before giving up
    pub max_retries: u32,

    /// Character budget per embedding batch
    pub max_batch_chars: usize,

    /// Bounded parallelism for batch fan-out
    pub num_parallel_tasks: usize,
}

impl EndpointConfig {
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Periodic re-sync scheduler configuration
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct PeriodicSyncConfig {
    pub enabled: bool,
    pub interval_seconds: u64,
}

impl AppConfig {
    /// Load configuration from the environment with defaults
    ///
    /// # Errors
    ///
    /// Returns an error if an environment variable is present but cannot
    /// be parsed into the expected type.
    pub fn from_env() -> ConfigResult<Self> {
        kodit_common::initialize_environment();

        let profile = match env_var("KODIT_PROFILE") {
            Some(raw) => raw.parse()?,
            None => Profile::default(),
        };

        let data_dir = env_var("KODIT_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(default_data_dir);

        let clone_dir = env_var("KODIT_CLONE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("clones"));

        let db_url = env_var("KODIT_DB_URL")
            .unwrap_or_else(|| format!("sqlite://{}", data_dir.join("kodit.db").display()));

        let config = Self {
            profile,
            data_dir,
            clone_dir,
            db_url,
            db_max_connections: parse_env("KODIT_DB_MAX_CONNECTIONS", DEFAULT_DB_MAX_CONNECTIONS)?,
            worker: WorkerConfig {
                count: parse_env("KODIT_WORKER_COUNT", DEFAULT_WORKER_COUNT)?,
                poll_period_secs: parse_env(
                    "KODIT_WORKER_POLL_PERIOD_SECS",
                    DEFAULT_WORKER_POLL_PERIOD_SECS,
                )?,
                max_retries: parse_env("KODIT_TASK_MAX_RETRIES", DEFAULT_TASK_MAX_RETRIES)?,
                retry_initial_secs: parse_env(
                    "KODIT_TASK_RETRY_INITIAL_SECS",
                    DEFAULT_TASK_RETRY_INITIAL_SECS,
                )?,
                retry_backoff: parse_env("KODIT_TASK_RETRY_BACKOFF", DEFAULT_TASK_RETRY_BACKOFF)?,
            },
            embedding_endpoint: endpoint_from_env("KODIT_EMBEDDING", DEFAULT_EMBEDDING_MODEL)?,
            enrichment_endpoint: endpoint_from_env("KODIT_ENRICHMENT", DEFAULT_ENRICHMENT_MODEL)?,
            periodic_sync: PeriodicSyncConfig {
                enabled: parse_env("KODIT_PERIODIC_SYNC_ENABLED", false)?,
                interval_seconds: parse_env(
                    "KODIT_PERIODIC_SYNC_INTERVAL_SECONDS",
                    DEFAULT_PERIODIC_SYNC_INTERVAL_SECS,
                )?,
            },
            api_keys: env_var("KODIT_API_KEYS")
                .map(|raw| {
                    raw.split(',')
                        .map(str::trim)
                        .filter(|k| !k.is_empty())
                        .map(String::from)
                        .collect()
                })
                .unwrap_or_default(),
            skip_provider_validation: parse_env("KODIT_SKIP_PROVIDER_VALIDATION", false)?,
        };

        Ok(config)
    }

    /// Validate the loaded configuration
    ///
    /// # Errors
    ///
    /// Returns the first validation failure found.
    pub fn validate(&self) -> ConfigResult<()> {
        validation::validate(self)
    }

    /// A configuration suitable for tests: temp dirs, in-memory SQLite,
    /// provider validation skipped.
    pub fn for_tests(data_dir: PathBuf) -> Self {
        let clone_dir = data_dir.join("clones");
        Self {
            profile: Profile::Test,
            data_dir,
            clone_dir,
            db_url: "sqlite::memory:".to_string(),
            db_max_connections: 1,
            worker: WorkerConfig {
                count: 1,
                poll_period_secs: 1,
                max_retries: DEFAULT_TASK_MAX_RETRIES,
                retry_initial_secs: 0,
                retry_backoff: DEFAULT_TASK_RETRY_BACKOFF,
            },
            embedding_endpoint: EndpointConfig {
                base_url: "http://localhost:8000/v1".to_string(),
                model: DEFAULT_EMBEDDING_MODEL.to_string(),
                api_key: None,
                timeout_secs: DEFAULT_ENDPOINT_TIMEOUT_SECS,
                max_retries: 0,
                max_batch_chars: DEFAULT_MAX_BATCH_CHARS,
                num_parallel_tasks: 2,
            },
            enrichment_endpoint: EndpointConfig {
                base_url: "http://localhost:8000/v1".to_string(),
                model: DEFAULT_ENRICHMENT_MODEL.to_string(),
                api_key: None,
                timeout_secs: DEFAULT_ENDPOINT_TIMEOUT_SECS,
                max_retries: 0,
                max_batch_chars: DEFAULT_MAX_BATCH_CHARS,
                num_parallel_tasks: 2,
            },
            periodic_sync: PeriodicSyncConfig {
                enabled: false,
                interval_seconds: DEFAULT_PERIODIC_SYNC_INTERVAL_SECS,
            },
            api_keys: Vec::new(),
            skip_provider_validation: true,
        }
    }
}

fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".kodit")
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn parse_env<T>(name: &str, default: T) -> ConfigResult<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env_var(name) {
        Some(raw) => raw.parse().map_err(|e| ConfigError::InvalidValue {
            field: name.to_string(),
            message: format!("{e}"),
        }),
        None => Ok(default),
    }
}

fn endpoint_from_env(prefix: &str, default_model: &str) -> ConfigResult<EndpointConfig> {
    Ok(EndpointConfig {
        base_url: env_var(&format!("{prefix}_BASE_URL"))
            .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
        model: env_var(&format!("{prefix}_MODEL")).unwrap_or_else(|| default_model.to_string()),
        api_key: env_var(&format!("{prefix}_API_KEY")),
        timeout_secs: parse_env(&format!("{prefix}_TIMEOUT_SECS"), DEFAULT_ENDPOINT_TIMEOUT_SECS)?,
        max_retries: parse_env(&format!("{prefix}_MAX_RETRIES"), DEFAULT_ENDPOINT_MAX_RETRIES)?,
        max_batch_chars: parse_env(&format!("{prefix}_MAX_BATCH_CHARS"), DEFAULT_MAX_BATCH_CHARS)?,
        num_parallel_tasks: parse_env(
            &format!("{prefix}_NUM_PARALLEL_TASKS"),
            DEFAULT_NUM_PARALLEL_TASKS,
        )?,
    })
}
