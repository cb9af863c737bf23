//! Configuration management for CLI, environment variables, and config files.

use crate::error::{CounterError, ValidationIssue};
use crate::types::ActionKind;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Main configuration for blog-counters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub kv: KvConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub dedup: DedupConfig,
    #[serde(default)]
    pub flush: FlushConfig,
    #[serde(default)]
    pub stats: StatsConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Configuration for the HTTP surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    /// Bearer secret required by the flush trigger when set
    pub cron_secret: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KvBackend {
    Memory,
    Upstash,
}

/// Configuration for the key-value cache holding markers and pending counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KvConfig {
    pub backend: KvBackend,
    pub url: String,
    pub token: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    Postgrest,
}

/// Configuration for the durable relational store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub url: String,
    pub key: Option<String>,
}

/// Dedup windows per action kind, in seconds. Zero disables deduplication.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    pub view_ttl_secs: u64,
    pub like_ttl_secs: u64,
    pub share_ttl_secs: u64,
}

/// Configuration for the reconciler.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FlushConfig {
    pub interval_secs: u64,
    /// Run the flush loop inside `serve` instead of relying on an external cron
    pub embedded: bool,
    pub lock_ttl_secs: u64,
    /// Permit the non-atomic read-modify-write path when the delta RPC is missing
    pub allow_fallback: bool,
}

/// Configuration for the stats read path.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StatsConfig {
    pub cache_ttl_secs: u64,
    pub max_entries: usize,
    pub daily_window_days: u32,
}

/// Configuration shared by the remote REST backends.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub breaker_threshold: u32,
    pub breaker_timeout_secs: u64,
}

/// Configuration for logging output.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// Seconds between periodic metrics summaries; zero disables them
    pub metrics_interval_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:3000".to_string(),
            cron_secret: None,
        }
    }
}

impl Default for KvConfig {
    fn default() -> Self {
        Self {
            backend: KvBackend::Memory,
            url: String::new(),
            token: None,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            url: String::new(),
            key: None,
        }
    }
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            view_ttl_secs: 24 * 60 * 60,
            like_ttl_secs: 90 * 24 * 60 * 60,
            share_ttl_secs: 0,
        }
    }
}

impl Default for FlushConfig {
    fn default() -> Self {
        Self {
            interval_secs: 300,
            embedded: false,
            lock_ttl_secs: 60,
            allow_fallback: true,
        }
    }
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: 30,
            max_entries: 1000,
            daily_window_days: 30,
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 10,
            max_retries: 3,
            retry_delay_ms: 200,
            breaker_threshold: 5,
            breaker_timeout_secs: 30,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            metrics_interval_secs: 0,
        }
    }
}

impl DedupConfig {
    /// Dedup window for `kind`, or `None` when the kind is not deduplicated.
    pub fn window(&self, kind: ActionKind) -> Option<Duration> {
        let secs = match kind {
            ActionKind::View => self.view_ttl_secs,
            ActionKind::Like => self.like_ttl_secs,
            ActionKind::Share => self.share_ttl_secs,
        };
        (secs > 0).then(|| Duration::from_secs(secs))
    }
}

fn env_parse<T: FromStr>(name: &str) -> Result<Option<T>, CounterError> {
    match std::env::var(name) {
        Ok(val) => val
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| CounterError::InvalidArgument(format!("{} has invalid format", name))),
        Err(_) => Ok(None),
    }
}

fn first_env(names: &[&str]) -> Option<String> {
    names
        .iter()
        .find_map(|name| std::env::var(name).ok().filter(|v| !v.is_empty()))
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_file(path: &PathBuf) -> Result<Self, CounterError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| CounterError::IoError(e.to_string()))?;

        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase());
        match ext.as_deref() {
            Some("json") => serde_json::from_str(&content)
                .map_err(|e| CounterError::ParseError(e.to_string())),
            _ => toml::from_str(&content).map_err(|e| CounterError::ParseError(e.to_string())),
        }
    }

    pub fn from_default_locations() -> Result<Self, CounterError> {
        let config_dirs = [
            dirs::config_dir().map(|d| d.join("blog-counters/config.toml")),
            Some(PathBuf::from("/etc/blog-counters/config.toml")),
            Some(PathBuf::from("./blog-counters.toml")),
        ];

        for path in config_dirs.iter().flatten() {
            if path.exists() {
                tracing::info!("Loading config from: {}", path.display());
                return Self::from_file(path);
            }
        }

        Ok(Self::default())
    }

    pub fn merge_from_env(mut self) -> Result<Self, CounterError> {
        if let Ok(val) = std::env::var("BLOG_COUNTERS_BIND") {
            self.server.bind = val;
        }
        if let Some(val) = first_env(&["BLOG_COUNTERS_CRON_SECRET", "CRON_SECRET"]) {
            self.server.cron_secret = Some(val);
        }

        if let Ok(val) = std::env::var("BLOG_COUNTERS_KV_BACKEND") {
            self.kv.backend = parse_kv_backend(&val)?;
        }
        if let Some(val) = first_env(&["BLOG_COUNTERS_KV_URL", "UPSTASH_REDIS_REST_URL"]) {
            // A deployment that only exports the Upstash variables expects Upstash
            if std::env::var("BLOG_COUNTERS_KV_BACKEND").is_err() {
                self.kv.backend = KvBackend::Upstash;
            }
            self.kv.url = val;
        }
        if let Some(val) = first_env(&["BLOG_COUNTERS_KV_TOKEN", "UPSTASH_REDIS_REST_TOKEN"]) {
            self.kv.token = Some(val);
        }

        if let Ok(val) = std::env::var("BLOG_COUNTERS_STORE_BACKEND") {
            self.store.backend = parse_store_backend(&val)?;
        }
        if let Some(val) = first_env(&[
            "BLOG_COUNTERS_STORE_URL",
            "SUPABASE_URL",
            "VITE_SUPABASE_URL",
        ]) {
            if std::env::var("BLOG_COUNTERS_STORE_BACKEND").is_err() {
                self.store.backend = StoreBackend::Postgrest;
            }
            self.store.url = val;
        }
        if let Some(val) = first_env(&[
            "BLOG_COUNTERS_STORE_KEY",
            "SUPABASE_SERVICE_ROLE_KEY",
            "VITE_SUPABASE_ANON_KEY",
        ]) {
            self.store.key = Some(val);
        }

        if let Some(val) = env_parse("BLOG_COUNTERS_VIEW_TTL")? {
            self.dedup.view_ttl_secs = val;
        }
        if let Some(val) = env_parse("BLOG_COUNTERS_LIKE_TTL")? {
            self.dedup.like_ttl_secs = val;
        }
        if let Some(val) = env_parse("BLOG_COUNTERS_SHARE_TTL")? {
            self.dedup.share_ttl_secs = val;
        }

        if let Some(val) = env_parse("BLOG_COUNTERS_FLUSH_INTERVAL")? {
            self.flush.interval_secs = val;
        }
        if let Some(val) = env_parse("BLOG_COUNTERS_FLUSH_EMBEDDED")? {
            self.flush.embedded = val;
        }
        if let Some(val) = env_parse("BLOG_COUNTERS_FLUSH_LOCK_TTL")? {
            self.flush.lock_ttl_secs = val;
        }
        if let Some(val) = env_parse("BLOG_COUNTERS_ALLOW_FALLBACK")? {
            self.flush.allow_fallback = val;
        }

        if let Some(val) = env_parse("BLOG_COUNTERS_HTTP_TIMEOUT")? {
            self.http.timeout_secs = val;
        }

        if let Ok(val) = std::env::var("BLOG_COUNTERS_LOG_LEVEL") {
            self.logging.level = val;
        }

        Ok(self)
    }

    pub fn merge_from_cli(mut self, cli: &CliArgs) -> Self {
        if let Some(ref bind) = cli.bind {
            self.server.bind = bind.clone();
        }

        if let Some(ref url) = cli.kv_url {
            self.kv.backend = KvBackend::Upstash;
            self.kv.url = url.clone();
        }

        if let Some(ref url) = cli.store_url {
            self.store.backend = StoreBackend::Postgrest;
            self.store.url = url.clone();
        }

        if cli.embedded_flush {
            self.flush.embedded = true;
        }

        self
    }

    pub fn load() -> Result<Self, CounterError> {
        Self::from_default_locations()?.merge_from_env()
    }

    pub fn load_with_cli(cli: &CliArgs) -> Result<Self, CounterError> {
        let base = match cli.config_file {
            Some(ref path) => Self::from_file(path)?,
            None => Self::from_default_locations()?,
        };
        Ok(base.merge_from_env()?.merge_from_cli(cli))
    }

    pub fn validate(&self) -> Result<(), CounterError> {
        let mut issues = Vec::new();

        if self.server.bind.parse::<SocketAddr>().is_err() {
            issues.push(ValidationIssue {
                field: "server.bind".to_string(),
                message: format!("Invalid socket address '{}'", self.server.bind),
            });
        }

        if self.kv.backend == KvBackend::Upstash {
            check_url(&mut issues, "kv.url", &self.kv.url);
            if self.kv.token.as_deref().unwrap_or("").is_empty() {
                issues.push(ValidationIssue {
                    field: "kv.token".to_string(),
                    message: "Upstash backend requires a REST token".to_string(),
                });
            }
        }

        if self.store.backend == StoreBackend::Postgrest {
            check_url(&mut issues, "store.url", &self.store.url);
            if self.store.key.as_deref().unwrap_or("").is_empty() {
                issues.push(ValidationIssue {
                    field: "store.key".to_string(),
                    message: "PostgREST backend requires an API key".to_string(),
                });
            }
        }

        if self.dedup.view_ttl_secs == 0 {
            issues.push(ValidationIssue {
                field: "dedup.view_ttl_secs".to_string(),
                message: "Views must be deduplicated".to_string(),
            });
        }
        if self.dedup.like_ttl_secs == 0 {
            issues.push(ValidationIssue {
                field: "dedup.like_ttl_secs".to_string(),
                message: "Likes must be deduplicated".to_string(),
            });
        }

        if self.flush.lock_ttl_secs == 0 {
            issues.push(ValidationIssue {
                field: "flush.lock_ttl_secs".to_string(),
                message: "Lock TTL must be positive".to_string(),
            });
        }
        if self.flush.embedded && self.flush.interval_secs <= self.flush.lock_ttl_secs {
            issues.push(ValidationIssue {
                field: "flush.interval_secs".to_string(),
                message: "Flush interval must exceed the lock TTL".to_string(),
            });
        }

        if self.http.timeout_secs == 0 || self.http.timeout_secs > 300 {
            issues.push(ValidationIssue {
                field: "http.timeout_secs".to_string(),
                message: "Timeout must be between 1 and 300 seconds".to_string(),
            });
        }

        if self.stats.max_entries == 0 {
            issues.push(ValidationIssue {
                field: "stats.max_entries".to_string(),
                message: "Stats cache needs at least one entry".to_string(),
            });
        }

        let valid_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            issues.push(ValidationIssue {
                field: "logging.level".to_string(),
                message: format!(
                    "Invalid log level '{}'. Valid levels: {}",
                    self.logging.level,
                    valid_levels.join(", ")
                ),
            });
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(CounterError::ValidationError(issues))
        }
    }
}

fn check_url(issues: &mut Vec<ValidationIssue>, field: &str, url: &str) {
    if url.is_empty() {
        issues.push(ValidationIssue {
            field: field.to_string(),
            message: "URL cannot be empty".to_string(),
        });
    } else if let Err(e) = reqwest::Url::parse(url) {
        issues.push(ValidationIssue {
            field: field.to_string(),
            message: format!("Invalid URL format: {}", e),
        });
    }
}

fn parse_kv_backend(val: &str) -> Result<KvBackend, CounterError> {
    match val.to_lowercase().as_str() {
        "memory" => Ok(KvBackend::Memory),
        "upstash" => Ok(KvBackend::Upstash),
        _ => Err(CounterError::InvalidArgument(format!(
            "Unknown kv backend '{}'",
            val
        ))),
    }
}

fn parse_store_backend(val: &str) -> Result<StoreBackend, CounterError> {
    match val.to_lowercase().as_str() {
        "memory" => Ok(StoreBackend::Memory),
        "postgrest" => Ok(StoreBackend::Postgrest),
        _ => Err(CounterError::InvalidArgument(format!(
            "Unknown store backend '{}'",
            val
        ))),
    }
}

/// Command-line arguments that override configuration values.
#[derive(Debug, Clone, Default)]
pub struct CliArgs {
    pub config_file: Option<PathBuf>,
    pub bind: Option<String>,
    pub kv_url: Option<String>,
    pub store_url: Option<String>,
    pub embedded_flush: bool,
}
