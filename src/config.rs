//! Configuration for slot-stress.
//!
//! Loaded from a TOML file with environment variable overrides for
//! credentials. All durations are seconds unless the field name says
//! otherwise.

use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Logging level (trace/debug/info/warn/error).
    pub log_level: String,

    /// Control API bind address.
    pub http_addr: String,

    /// Launch / gaming API targets.
    pub launch: LaunchConfig,

    /// Synthetic player loader.
    pub players: PlayerLoaderConfig,

    /// Scheduler limits.
    pub scheduler: SchedulerConfig,

    /// Backing stores.
    pub database: DatabaseConfig,
    pub redis: RedisConfig,

    /// Chart artifact generation.
    pub chart: ChartConfig,

    /// Object store for artifacts.
    pub s3: S3Config,

    /// Completion notifications.
    pub notify: NotifyConfig,

    /// Terminal-task retention sweep.
    pub cleanup: CleanupConfig,
}

/// Targets and credentials for the game back-end under test.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LaunchConfig {
    /// Base URL of the launch service (`/v1/game/launch`).
    pub launch_url: String,

    /// Base URL of the gaming API (`/api/...`).
    pub api_url: String,

    /// Merchant identifier sent on launch.
    pub merchant: String,

    /// Whether launch requests carry an MD5 `Sign` header.
    pub sign_required: bool,

    /// Signing secret for the merchant. Empty + sign_required is a
    /// validation error.
    pub secret: String,

    /// Sites whose `{site}:*` Redis keys are purged on cleanup.
    pub sites: Vec<String>,

    /// Amount marking merchant-side "bonus credit" rows, excluded from
    /// order scopes when the task's base_money is unset.
    pub exclude_amount: f64,
}

/// Background loader that mints and persists synthetic players.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PlayerLoaderConfig {
    /// Whether the loader runs at all.
    pub auto_load: bool,

    /// Seconds between loader ticks.
    pub interval_secs: u64,

    /// Players minted per tick.
    pub batch_size: u32,

    /// Total players to mint before the loader parks.
    pub max_total: u32,

    /// Name prefix; the numeric suffix is offset so first-run names never
    /// collide with suffix 0.
    pub name_prefix: String,

    /// Balance assigned to freshly minted players.
    pub initial_balance: f64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Cap on concurrently RUNNING/PROCESSING tasks.
    pub max_running: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// MySQL DSN for the member database.
    pub members_url: String,

    /// MySQL DSN for the order database.
    pub orders_url: String,

    /// Connection pool size per database.
    pub max_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChartConfig {
    /// Render the RTP chart at task completion.
    pub enabled: bool,

    /// Also write the HTML next to the process.
    pub save_local: bool,

    /// Upload to the object store and record the presigned URL.
    pub upload: bool,

    /// Local output directory when save_local is set.
    pub output_dir: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct S3Config {
    pub enabled: bool,
    pub bucket: String,
    pub region: String,
    /// Custom endpoint for S3-compatible stores; empty for AWS.
    pub endpoint: String,
    pub access_key_id: String,
    pub secret_access_key: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    pub enabled: bool,
    pub webhook_url: String,
    /// Optional HMAC-SHA256 signing secret for the webhook.
    pub signing_secret: String,
    /// Prefix prepended to every message title.
    pub prefix: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CleanupConfig {
    /// Hours a terminal task is kept in the pool.
    pub retention_hours: u64,

    /// Hours between sweep runs.
    pub interval_hours: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            http_addr: "0.0.0.0:8000".to_string(),
            launch: LaunchConfig::default(),
            players: PlayerLoaderConfig::default(),
            scheduler: SchedulerConfig::default(),
            database: DatabaseConfig::default(),
            redis: RedisConfig::default(),
            chart: ChartConfig::default(),
            s3: S3Config::default(),
            notify: NotifyConfig::default(),
            cleanup: CleanupConfig::default(),
        }
    }
}

impl Default for LaunchConfig {
    fn default() -> Self {
        Self {
            launch_url: "http://127.0.0.1:8080".to_string(),
            api_url: "http://127.0.0.1:8081".to_string(),
            merchant: "default".to_string(),
            sign_required: false,
            secret: String::new(),
            sites: Vec::new(),
            exclude_amount: 0.01,
        }
    }
}

impl Default for PlayerLoaderConfig {
    fn default() -> Self {
        Self {
            auto_load: true,
            interval_secs: 5,
            batch_size: 1000,
            max_total: 10_000,
            name_prefix: "ldp".to_string(),
            initial_balance: 10_000.0,
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self { max_running: 1 }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            members_url: "mysql://root@127.0.0.1:3306/egame".to_string(),
            orders_url: "mysql://root@127.0.0.1:3306/egame_order".to_string(),
            max_connections: 10,
        }
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
        }
    }
}

impl Default for ChartConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            save_local: false,
            upload: true,
            output_dir: "./rtp_charts".to_string(),
        }
    }
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            enabled: false,
            bucket: String::new(),
            region: "ap-southeast-1".to_string(),
            endpoint: String::new(),
            access_key_id: String::new(),
            secret_access_key: String::new(),
        }
    }
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            webhook_url: String::new(),
            signing_secret: String::new(),
            prefix: String::new(),
        }
    }
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            retention_hours: 24,
            interval_hours: 1,
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        let cfg: AppConfig =
            toml::from_str(&raw).with_context(|| format!("parse config {}", path.display()))?;
        Ok(cfg)
    }

    /// Apply environment overrides for credentials and endpoints so secrets
    /// stay out of the config file.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("STRESS_MEMBERS_DB_URL") {
            self.database.members_url = v;
        }
        if let Ok(v) = std::env::var("STRESS_ORDERS_DB_URL") {
            self.database.orders_url = v;
        }
        if let Ok(v) = std::env::var("STRESS_REDIS_URL") {
            self.redis.url = v;
        }
        if let Ok(v) = std::env::var("STRESS_LAUNCH_SECRET") {
            self.launch.secret = v;
        }
        if let Ok(v) = std::env::var("STRESS_S3_ACCESS_KEY_ID") {
            self.s3.access_key_id = v;
        }
        if let Ok(v) = std::env::var("STRESS_S3_SECRET_ACCESS_KEY") {
            self.s3.secret_access_key = v;
        }
        if let Ok(v) = std::env::var("STRESS_NOTIFY_WEBHOOK_URL") {
            self.notify.webhook_url = v;
        }
    }

    /// Validate cross-field constraints before anything spins up.
    pub fn validate(&self) -> Result<()> {
        if self.launch.launch_url.is_empty() || self.launch.api_url.is_empty() {
            bail!("launch.launch_url and launch.api_url are required");
        }
        if self.launch.sign_required && self.launch.secret.is_empty() {
            bail!("launch.sign_required is set but launch.secret is empty");
        }
        if self.launch.exclude_amount <= 0.0 {
            bail!("launch.exclude_amount must be positive");
        }
        if self.scheduler.max_running == 0 {
            bail!("scheduler.max_running must be at least 1");
        }
        if self.players.auto_load && self.players.batch_size == 0 {
            bail!("players.batch_size must be positive when auto_load is set");
        }
        if self.chart.upload && !self.s3.enabled {
            bail!("chart.upload requires the s3 section to be enabled");
        }
        if self.s3.enabled && self.s3.bucket.is_empty() {
            bail!("s3.bucket is required when s3 is enabled");
        }
        if self.notify.enabled && self.notify.webhook_url.is_empty() {
            bail!("notify.webhook_url is required when notify is enabled");
        }
        Ok(())
    }

    pub fn cleanup_retention(&self) -> Duration {
        Duration::from_secs(self.cleanup.retention_hours * 3600)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup.interval_hours.max(1) * 3600)
    }
}
