//! Application configuration.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Database configuration.
    pub database: DatabaseConfig,
    /// Redis configuration. Enables the pub/sub observer when present.
    #[serde(default)]
    pub redis: Option<RedisConfig>,
    /// Worker loop configuration.
    #[serde(default)]
    pub worker: WorkerConfig,
    /// Distribution scheduling configuration.
    #[serde(default)]
    pub distribution: DistributionConfig,
    /// External parser and push renderer endpoints.
    pub collaborators: CollaboratorConfig,
    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Database connection configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// `PostgreSQL` connection URL.
    pub url: String,
    /// Maximum number of connections in the pool.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Minimum number of connections in the pool.
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
}

/// Redis configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    /// Redis connection URL.
    pub url: String,
    /// Key prefix for all pub/sub channels.
    #[serde(default = "default_redis_prefix")]
    pub prefix: String,
}

/// Worker loop configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
    /// Number of worker loops sharing the task queue.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Sleep between empty polls, in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// How long a single dequeue call waits for work, in seconds.
    #[serde(default = "default_poll_timeout_secs")]
    pub poll_timeout_secs: u64,
    /// Parse attempts before a task is dead-lettered.
    #[serde(default = "default_parse_max_attempts")]
    pub parse_max_attempts: u32,
    /// Base delay of the exponential backoff, in milliseconds.
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    /// Upper bound of the exponential backoff, in seconds.
    #[serde(default = "default_retry_max_delay_secs")]
    pub retry_max_delay_secs: u64,
    /// RUNNING tasks older than this are returned to PENDING.
    #[serde(default = "default_stuck_task_timeout_secs")]
    pub stuck_task_timeout_secs: u64,
    /// Interval of the janitor tick, in seconds.
    #[serde(default = "default_janitor_interval_secs")]
    pub janitor_interval_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            poll_interval_ms: default_poll_interval_ms(),
            poll_timeout_secs: default_poll_timeout_secs(),
            parse_max_attempts: default_parse_max_attempts(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            retry_max_delay_secs: default_retry_max_delay_secs(),
            stuck_task_timeout_secs: default_stuck_task_timeout_secs(),
            janitor_interval_secs: default_janitor_interval_secs(),
        }
    }
}

impl WorkerConfig {
    /// Sleep between empty polls.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Maximum wait of a single dequeue call.
    #[must_use]
    pub const fn poll_timeout(&self) -> Duration {
        Duration::from_secs(self.poll_timeout_secs)
    }
}

/// Distribution scheduling configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DistributionConfig {
    /// Spacing floor for rules without `rate_limit`/`time_window`, in seconds.
    #[serde(default = "default_min_interval_secs")]
    pub default_min_interval_secs: u64,
    /// Gap kept around manually pinned items, in seconds.
    #[serde(default = "default_manual_min_gap_secs")]
    pub manual_min_gap_secs: u64,
    /// Delivery attempts per queue item.
    #[serde(default = "default_queue_item_max_attempts")]
    pub queue_item_max_attempts: i32,
    /// Interval of the dispatcher tick, in seconds.
    #[serde(default = "default_dispatch_interval_secs")]
    pub dispatch_interval_secs: u64,
    /// Due items claimed per dispatcher tick.
    #[serde(default = "default_dispatch_batch_size")]
    pub dispatch_batch_size: u64,
    /// PROCESSING items locked longer than this are released, in seconds.
    #[serde(default = "default_item_lock_timeout_secs")]
    pub item_lock_timeout_secs: u64,
    /// COMPLETED tasks older than this are purged, in days.
    #[serde(default = "default_task_retention_days")]
    pub task_retention_days: i64,
}

impl Default for DistributionConfig {
    fn default() -> Self {
        Self {
            default_min_interval_secs: default_min_interval_secs(),
            manual_min_gap_secs: default_manual_min_gap_secs(),
            queue_item_max_attempts: default_queue_item_max_attempts(),
            dispatch_interval_secs: default_dispatch_interval_secs(),
            dispatch_batch_size: default_dispatch_batch_size(),
            item_lock_timeout_secs: default_item_lock_timeout_secs(),
            task_retention_days: default_task_retention_days(),
        }
    }
}

/// External collaborator endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct CollaboratorConfig {
    /// Base URL of the parser service.
    pub parser_url: String,
    /// Base URL of the push renderer service.
    pub renderer_url: String,
    /// Request timeout, in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// User agent sent to both services.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

/// Logging configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoggingConfig {
    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,
}

const fn default_max_connections() -> u32 {
    20
}

const fn default_min_connections() -> u32 {
    2
}

fn default_redis_prefix() -> String {
    "fanout".to_string()
}

const fn default_concurrency() -> usize {
    4
}

const fn default_poll_interval_ms() -> u64 {
    500
}

const fn default_poll_timeout_secs() -> u64 {
    5
}

const fn default_parse_max_attempts() -> u32 {
    3
}

const fn default_retry_base_delay_ms() -> u64 {
    2000
}

const fn default_retry_max_delay_secs() -> u64 {
    300
}

const fn default_stuck_task_timeout_secs() -> u64 {
    900
}

const fn default_janitor_interval_secs() -> u64 {
    60
}

const fn default_min_interval_secs() -> u64 {
    300
}

const fn default_manual_min_gap_secs() -> u64 {
    10
}

const fn default_queue_item_max_attempts() -> i32 {
    3
}

const fn default_dispatch_interval_secs() -> u64 {
    10
}

const fn default_dispatch_batch_size() -> u64 {
    20
}

const fn default_item_lock_timeout_secs() -> u64 {
    600
}

const fn default_task_retention_days() -> i64 {
    14
}

const fn default_timeout_secs() -> u64 {
    30
}

fn default_user_agent() -> String {
    format!("fanout/{}", env!("CARGO_PKG_VERSION"))
}

impl Config {
    /// Load configuration from files and environment variables.
    ///
    /// Configuration is loaded in the following order:
    /// 1. `.env` (via dotenvy, if present)
    /// 2. `config/default.toml`
    /// 3. `config/{environment}.toml` (based on `FANOUT_ENV`)
    /// 4. Environment variables with `FANOUT__` prefix
    pub fn load() -> Result<Self, config::ConfigError> {
        dotenvy::dotenv().ok();
        let env = std::env::var("FANOUT_ENV").unwrap_or_else(|_| "development".to_string());

        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name(&format!("config/{env}")).required(false))
            .add_source(
                config::Environment::with_prefix("FANOUT")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Load configuration from a specific file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, config::ConfigError> {
        let config = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .add_source(
                config::Environment::with_prefix("FANOUT")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }
}
