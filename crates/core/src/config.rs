use serde::Deserialize;
use std::time::Duration;

/// Root application configuration. Loaded from an optional config file,
/// then environment variables with the prefix `SEQUENCE_FLOW__`.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_node_id")]
    pub node_id: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub delivery: DeliveryConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

/// How drip runs are driven.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerMode {
    /// One sleeping tokio task per run; progress is lost on restart.
    InProcess,
    /// Checkpointed runs advanced by a poll loop.
    Durable,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_scheduler_mode")]
    pub mode: SchedulerMode,
    #[serde(default = "default_max_concurrent_sends")]
    pub max_concurrent_sends: usize,
    #[serde(default = "default_max_concurrent_runs")]
    pub max_concurrent_runs: usize,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Real-time length of one `waitDays` unit.
    #[serde(default = "default_seconds_per_day")]
    pub seconds_per_day: u64,
    /// How long finished in-process runs stay queryable.
    #[serde(default = "default_run_retention_secs")]
    pub run_retention_secs: u64,
    #[serde(default = "default_maintenance_interval_secs")]
    pub maintenance_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeliveryConfig {
    #[serde(default = "default_sender_email")]
    pub sender_email: String,
    #[serde(default = "default_recipients")]
    pub recipients: Vec<String>,
    /// Messages the outbox transport retains before evicting the oldest.
    #[serde(default = "default_outbox_capacity")]
    pub outbox_capacity: usize,
    #[serde(default)]
    pub retry: RetryConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

// Default functions
fn default_node_id() -> String {
    "node-01".to_string()
}
fn default_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_http_port() -> u16 {
    8080
}
fn default_metrics_enabled() -> bool {
    true
}
fn default_metrics_port() -> u16 {
    9090
}
fn default_scheduler_mode() -> SchedulerMode {
    SchedulerMode::InProcess
}
fn default_max_concurrent_sends() -> usize {
    8
}
fn default_max_concurrent_runs() -> usize {
    16
}
fn default_poll_interval_ms() -> u64 {
    1000
}
fn default_seconds_per_day() -> u64 {
    86_400
}
fn default_run_retention_secs() -> u64 {
    3_600
}
fn default_maintenance_interval_secs() -> u64 {
    60
}
fn default_outbox_capacity() -> usize {
    10_000
}
fn default_sender_email() -> String {
    "no-reply@example.com".to_string()
}
fn default_recipients() -> Vec<String> {
    vec![
        "recipient1@example.com".to_string(),
        "recipient2@example.com".to_string(),
    ]
}
fn default_max_retries() -> u32 {
    0
}
fn default_initial_backoff_ms() -> u64 {
    500
}
fn default_max_backoff_ms() -> u64 {
    30_000
}
fn default_backoff_multiplier() -> f64 {
    2.0
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            http_port: default_http_port(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            port: default_metrics_port(),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            mode: default_scheduler_mode(),
            max_concurrent_sends: default_max_concurrent_sends(),
            max_concurrent_runs: default_max_concurrent_runs(),
            poll_interval_ms: default_poll_interval_ms(),
            seconds_per_day: default_seconds_per_day(),
            run_retention_secs: default_run_retention_secs(),
            maintenance_interval_secs: default_maintenance_interval_secs(),
        }
    }
}

impl SchedulerConfig {
    pub fn day_length(&self) -> Duration {
        Duration::from_secs(self.seconds_per_day)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn run_retention(&self) -> Duration {
        Duration::from_secs(self.run_retention_secs)
    }

    pub fn maintenance_interval(&self) -> Duration {
        Duration::from_secs(self.maintenance_interval_secs.max(1))
    }
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            sender_email: default_sender_email(),
            recipients: default_recipients(),
            outbox_capacity: default_outbox_capacity(),
            retry: RetryConfig::default(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
            version: default_version(),
            api: ApiConfig::default(),
            metrics: MetricsConfig::default(),
            scheduler: SchedulerConfig::default(),
            delivery: DeliveryConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from an optional config file and the environment.
    ///
    /// An explicitly given `path` must exist; the default
    /// `config/sequence-flow.{yaml,toml,json}` is optional.
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let builder = config::Config::builder()
            .add_source(
                config::File::with_name(path.unwrap_or("config/sequence-flow"))
                    .required(path.is_some()),
            )
            .add_source(
                config::Environment::with_prefix("SEQUENCE_FLOW")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("delivery.recipients"),
            );

        let config = builder.build()?;
        config.try_deserialize()
    }
}
