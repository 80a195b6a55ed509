use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub server: ServerConfig,
    pub jwt: JwtConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub live_channel: LiveChannelConfig,
    #[serde(default)]
    pub otel: OtelConfig,
}

/// Long-poll tuning for the comment feed
#[derive(Debug, Clone, Deserialize)]
pub struct PollingConfig {
    /// Inner polling timeout in milliseconds
    #[serde(default = "default_poll_timeout_ms")]
    pub timeout_ms: u64,
    /// Sleep between storage queries in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub interval_ms: u64,
    /// Upper bound on items returned by a single poll
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
    /// Extra time on top of `timeout_ms` before the outer safety net fires
    #[serde(default = "default_outer_timeout_margin_ms")]
    pub outer_timeout_margin_ms: u64,
    /// Maximum number of polls running at once
    #[serde(default = "default_poll_worker_pool_size")]
    pub worker_pool_size: usize,
    /// Retry-After hint sent with 503 when the pool is saturated
    #[serde(default = "default_retry_after_seconds")]
    pub retry_after_seconds: u64,
}

fn default_poll_timeout_ms() -> u64 {
    30_000
}

fn default_poll_interval_ms() -> u64 {
    1_000
}

fn default_max_batch_size() -> usize {
    50
}

fn default_outer_timeout_margin_ms() -> u64 {
    5_000
}

fn default_poll_worker_pool_size() -> usize {
    256
}

fn default_retry_after_seconds() -> u64 {
    1
}

impl PollingConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Wall-clock limit for the whole request, always longer than `timeout()`
    pub fn outer_timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms + self.outer_timeout_margin_ms)
    }
}

/// Live notification channel (SSE) tuning
#[derive(Debug, Clone, Deserialize)]
pub struct LiveChannelConfig {
    /// Maximum lifetime of a single stream in seconds
    #[serde(default = "default_channel_timeout")]
    pub channel_timeout_seconds: u64,
    /// Keepalive ping interval in seconds
    #[serde(default = "default_health_check_interval")]
    pub health_check_interval_seconds: u64,
    /// Stale connection sweep interval in seconds
    #[serde(default = "default_reap_interval")]
    pub reap_interval_seconds: u64,
    /// Connections older than this are reaped
    #[serde(default = "default_stale_threshold")]
    pub stale_threshold_seconds: u64,
    /// Maximum number of concurrent replays
    #[serde(default = "default_replay_pool_size")]
    pub replay_pool_size: usize,
    /// Page size for the reconnect replay query
    #[serde(default = "default_max_replay")]
    pub max_replay: usize,
    /// Per-connection outbound buffer (frames)
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    /// Timeout for a single keepalive send during health checks
    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,
}

fn default_channel_timeout() -> u64 {
    1800 // 30 minutes
}

fn default_health_check_interval() -> u64 {
    30
}

fn default_reap_interval() -> u64 {
    60
}

fn default_stale_threshold() -> u64 {
    3600 // 1 hour
}

fn default_replay_pool_size() -> usize {
    64
}

fn default_max_replay() -> usize {
    500
}

fn default_buffer_size() -> usize {
    64
}

fn default_send_timeout_ms() -> u64 {
    5000
}

impl LiveChannelConfig {
    pub fn channel_timeout(&self) -> Duration {
        Duration::from_secs(self.channel_timeout_seconds)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_seconds)
    }

    pub fn reap_interval(&self) -> Duration {
        Duration::from_secs(self.reap_interval_seconds)
    }

    pub fn stale_threshold(&self) -> Duration {
        Duration::from_secs(self.stale_threshold_seconds)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: Option<String>,
    pub audience: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiConfig {
    /// Key required on internal producer endpoints; unset disables the check
    pub key: Option<String>,
}

/// PostgreSQL settings. Without a URL the service runs on in-memory stores.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_seconds: u64,
}

fn default_pool_size() -> u32 {
    10
}

fn default_connect_timeout() -> u64 {
    5
}

#[derive(Debug, Clone, Deserialize)]
pub struct OtelConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_otel_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_service_name")]
    pub service_name: String,
    #[serde(default = "default_sampling_ratio")]
    pub sampling_ratio: f64,
}

fn default_otel_endpoint() -> String {
    "http://localhost:4317".to_string()
}

fn default_service_name() -> String {
    "ara-realtime-delivery".to_string()
}

fn default_sampling_ratio() -> f64 {
    1.0
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8081
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        // Load .env file if exists
        let _ = dotenvy::dotenv();

        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let builder = Config::builder()
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8081)?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // SERVER__PORT, JWT__SECRET, POLLING__TIMEOUT_MS, LIVE_CHANNEL__BUFFER_SIZE, ...
            .add_source(
                Environment::default()
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(","),
            );

        let settings: Settings = builder.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// Reject tunings that would break the delivery guarantees
    pub fn validate(&self) -> Result<(), ConfigError> {
        let polling = &self.polling;
        if polling.interval_ms == 0 || polling.timeout_ms == 0 {
            return Err(ConfigError::Message(
                "polling.interval_ms and polling.timeout_ms must be positive".into(),
            ));
        }
        if polling.outer_timeout_margin_ms == 0 {
            return Err(ConfigError::Message(
                "polling.outer_timeout_margin_ms must be positive".into(),
            ));
        }
        if polling.max_batch_size == 0 || polling.worker_pool_size == 0 {
            return Err(ConfigError::Message(
                "polling.max_batch_size and polling.worker_pool_size must be positive".into(),
            ));
        }

        let live = &self.live_channel;
        if live.health_check_interval_seconds == 0
            || live.reap_interval_seconds == 0
            || live.stale_threshold_seconds == 0
            || live.channel_timeout_seconds == 0
        {
            return Err(ConfigError::Message(
                "live_channel intervals and timeouts must be positive".into(),
            ));
        }
        if live.replay_pool_size == 0 || live.buffer_size == 0 || live.max_replay == 0 {
            return Err(ConfigError::Message(
                "live_channel.replay_pool_size, buffer_size and max_replay must be positive"
                    .into(),
            ));
        }

        Ok(())
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origins: vec![],
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            pool_size: default_pool_size(),
            connect_timeout_seconds: default_connect_timeout(),
        }
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_poll_timeout_ms(),
            interval_ms: default_poll_interval_ms(),
            max_batch_size: default_max_batch_size(),
            outer_timeout_margin_ms: default_outer_timeout_margin_ms(),
            worker_pool_size: default_poll_worker_pool_size(),
            retry_after_seconds: default_retry_after_seconds(),
        }
    }
}

impl Default for LiveChannelConfig {
    fn default() -> Self {
        Self {
            channel_timeout_seconds: default_channel_timeout(),
            health_check_interval_seconds: default_health_check_interval(),
            reap_interval_seconds: default_reap_interval(),
            stale_threshold_seconds: default_stale_threshold(),
            replay_pool_size: default_replay_pool_size(),
            max_replay: default_max_replay(),
            buffer_size: default_buffer_size(),
            send_timeout_ms: default_send_timeout_ms(),
        }
    }
}

impl Default for OtelConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: default_otel_endpoint(),
            service_name: default_service_name(),
            sampling_ratio: default_sampling_ratio(),
        }
    }
}
