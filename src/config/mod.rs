//! Configuration layer: typed settings with layered precedence (file → env → CLI).

mod cli;

use std::{
    net::SocketAddr,
    num::{NonZeroU32, NonZeroUsize},
    str::FromStr,
    time::Duration,
};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::application::jobs::parse_schedule;
use crate::domain::types::CounterPolicy;

pub use cli::{CliArgs, Command, ConnectionOverrides, OneShotArgs, ServeArgs, ServeOverrides};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "recipehub";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_DB_HTTP_MAX_CONNECTIONS: u32 = 8;
const DEFAULT_DB_JOBS_MAX_CONNECTIONS: u32 = 4;
const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";
const DEFAULT_CACHE_OPERATION_TIMEOUT_MS: u64 = 250;
const DEFAULT_DETAIL_TTL_MIN_SECS: u64 = 1500;
const DEFAULT_DETAIL_TTL_MAX_SECS: u64 = 1800;
const DEFAULT_MEMORY_DETAIL_LIMIT: usize = 10_000;
const DEFAULT_RECONCILE_CRON: &str = "0 */15 * * * *";
const DEFAULT_WARM_CRON: &str = "0 */30 * * * *";
const DEFAULT_WARM_TOP_N: u32 = 500;
const DEFAULT_RECONCILE_BATCH_SIZE: usize = 500;
const DEFAULT_BATCH_TIMEOUT_SECS: u64 = 30;
const DEFAULT_WRITE_ATTEMPTS: u32 = 3;
const DEFAULT_RETRY_BACKOFF_MS: u64 = 500;
const DEFAULT_RECONCILE_LEASE_SECS: u64 = 600;

#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub database: DatabaseSettings,
    pub cache: CacheSettings,
    pub jobs: JobsSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
    pub graceful_shutdown: Duration,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct DatabaseSettings {
    pub url: Option<String>,
    pub http_max_connections: NonZeroU32,
    pub jobs_max_connections: NonZeroU32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheBackend {
    Redis,
    Memory,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub backend: CacheBackend,
    pub redis_url: String,
    pub operation_timeout: Duration,
    pub detail_ttl_min: Duration,
    pub detail_ttl_max: Duration,
    pub memory_detail_limit: NonZeroUsize,
    pub counter_policy: CounterPolicy,
}

#[derive(Debug, Clone)]
pub struct JobsSettings {
    pub reconcile_cron: String,
    pub warm_cron: String,
    /// `None` warms every recipe.
    pub warm_top_n: Option<u32>,
    pub reconcile_batch_size: NonZeroUsize,
    pub batch_timeout: Duration,
    pub write_attempts: NonZeroU32,
    pub retry_backoff: Duration,
    pub reconcile_lease: Duration,
    pub bootstrap_on_start: bool,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix("RECIPEHUB").separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;
    raw.apply_command_overrides(cli.command.as_ref());

    Settings::from_raw(raw)
}

pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    database: RawDatabaseSettings,
    cache: RawCacheSettings,
    jobs: RawJobsSettings,
}

impl RawSettings {
    fn apply_command_overrides(&mut self, command: Option<&Command>) {
        match command {
            Some(Command::Serve(args)) => self.apply_serve_overrides(&args.overrides),
            Some(Command::Bootstrap(args) | Command::Reconcile(args) | Command::Warm(args)) => {
                self.apply_connection_overrides(&args.connections)
            }
            None => self.apply_serve_overrides(&ServeOverrides::default()),
        }
    }

    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        self.apply_connection_overrides(&overrides.connections);

        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.server_port {
            self.server.port = Some(port);
        }
        if let Some(seconds) = overrides.server_graceful_shutdown_seconds {
            self.server.graceful_shutdown_seconds = Some(seconds);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(policy) = overrides.counter_policy.as_ref() {
            self.cache.counter_policy = Some(policy.clone());
        }
        if let Some(cron) = overrides.reconcile_cron.as_ref() {
            self.jobs.reconcile_cron = Some(cron.clone());
        }
        if let Some(cron) = overrides.warm_cron.as_ref() {
            self.jobs.warm_cron = Some(cron.clone());
        }
        if let Some(top_n) = overrides.warm_top_n {
            self.jobs.warm_top_n = Some(top_n);
        }
        if let Some(enabled) = overrides.bootstrap_on_start {
            self.jobs.bootstrap_on_start = Some(enabled);
        }
    }

    fn apply_connection_overrides(&mut self, overrides: &ConnectionOverrides) {
        if let Some(url) = overrides.database_url.as_ref() {
            self.database.url = Some(url.clone());
        }
        if let Some(backend) = overrides.cache_backend.as_ref() {
            self.cache.backend = Some(backend.clone());
        }
        if let Some(url) = overrides.redis_url.as_ref() {
            self.cache.redis_url = Some(url.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            database,
            cache,
            jobs,
        } = raw;

        Ok(Self {
            server: build_server_settings(server)?,
            logging: build_logging_settings(logging)?,
            database: build_database_settings(database)?,
            cache: build_cache_settings(cache)?,
            jobs: build_jobs_settings(jobs)?,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());

    let port = server.port.unwrap_or(DEFAULT_PORT);
    if port == 0 {
        return Err(LoadError::invalid(
            "server.port",
            "port must be greater than zero",
        ));
    }

    let addr =
        parse_socket_addr(&host, port).map_err(|reason| LoadError::invalid("server.addr", reason))?;

    let graceful_secs = server
        .graceful_shutdown_seconds
        .unwrap_or(DEFAULT_GRACEFUL_SHUTDOWN_SECS);
    if graceful_secs == 0 {
        return Err(LoadError::invalid(
            "server.graceful_shutdown_seconds",
            "must be greater than zero",
        ));
    }

    Ok(ServerSettings {
        addr,
        graceful_shutdown: Duration::from_secs(graceful_secs),
    })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_database_settings(database: RawDatabaseSettings) -> Result<DatabaseSettings, LoadError> {
    let url = non_blank(database.url);

    let http_value = database
        .http_max_connections
        .unwrap_or(DEFAULT_DB_HTTP_MAX_CONNECTIONS);
    let jobs_value = database
        .jobs_max_connections
        .unwrap_or(DEFAULT_DB_JOBS_MAX_CONNECTIONS);

    Ok(DatabaseSettings {
        url,
        http_max_connections: non_zero_u32(http_value.into(), "database.http_max_connections")?,
        jobs_max_connections: non_zero_u32(jobs_value.into(), "database.jobs_max_connections")?,
    })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let backend = match cache.backend.as_deref().map(str::trim) {
        None | Some("redis") => CacheBackend::Redis,
        Some("memory") => CacheBackend::Memory,
        Some(other) => {
            return Err(LoadError::invalid(
                "cache.backend",
                format!("unknown backend `{other}`; expected redis or memory"),
            ));
        }
    };

    let redis_url = non_blank(cache.redis_url).unwrap_or_else(|| DEFAULT_REDIS_URL.to_string());

    let timeout_ms = cache
        .operation_timeout_ms
        .unwrap_or(DEFAULT_CACHE_OPERATION_TIMEOUT_MS);
    if timeout_ms == 0 || timeout_ms >= 1000 {
        return Err(LoadError::invalid(
            "cache.operation_timeout_ms",
            "must be between 1 and 999 milliseconds",
        ));
    }

    let ttl_min = cache.detail_ttl_min_secs.unwrap_or(DEFAULT_DETAIL_TTL_MIN_SECS);
    let ttl_max = cache.detail_ttl_max_secs.unwrap_or(DEFAULT_DETAIL_TTL_MAX_SECS);
    if ttl_min == 0 {
        return Err(LoadError::invalid(
            "cache.detail_ttl_min_secs",
            "must be greater than zero",
        ));
    }
    if ttl_max < ttl_min {
        return Err(LoadError::invalid(
            "cache.detail_ttl_max_secs",
            "must not be lower than cache.detail_ttl_min_secs",
        ));
    }

    let memory_detail_limit = NonZeroUsize::new(
        cache
            .memory_detail_limit
            .unwrap_or(DEFAULT_MEMORY_DETAIL_LIMIT),
    )
    .ok_or_else(|| LoadError::invalid("cache.memory_detail_limit", "must be greater than zero"))?;

    let counter_policy = match cache.counter_policy.as_deref() {
        None => CounterPolicy::default(),
        Some(value) => CounterPolicy::try_from(value).map_err(|_| {
            LoadError::invalid(
                "cache.counter_policy",
                format!("unknown policy `{value}`; expected strict or auto-initialize"),
            )
        })?,
    };

    Ok(CacheSettings {
        backend,
        redis_url,
        operation_timeout: Duration::from_millis(timeout_ms),
        detail_ttl_min: Duration::from_secs(ttl_min),
        detail_ttl_max: Duration::from_secs(ttl_max),
        memory_detail_limit,
        counter_policy,
    })
}

fn build_jobs_settings(jobs: RawJobsSettings) -> Result<JobsSettings, LoadError> {
    let reconcile_cron = jobs
        .reconcile_cron
        .unwrap_or_else(|| DEFAULT_RECONCILE_CRON.to_string());
    parse_schedule(&reconcile_cron)
        .map_err(|reason| LoadError::invalid("jobs.reconcile_cron", reason))?;

    let warm_cron = jobs
        .warm_cron
        .unwrap_or_else(|| DEFAULT_WARM_CRON.to_string());
    parse_schedule(&warm_cron).map_err(|reason| LoadError::invalid("jobs.warm_cron", reason))?;

    let warm_top_n = match jobs.warm_top_n.unwrap_or(DEFAULT_WARM_TOP_N) {
        0 => None,
        n => Some(n),
    };

    let reconcile_batch_size = NonZeroUsize::new(
        jobs.reconcile_batch_size
            .unwrap_or(DEFAULT_RECONCILE_BATCH_SIZE),
    )
    .ok_or_else(|| LoadError::invalid("jobs.reconcile_batch_size", "must be greater than zero"))?;

    let batch_timeout_secs = jobs
        .batch_timeout_seconds
        .unwrap_or(DEFAULT_BATCH_TIMEOUT_SECS);
    if batch_timeout_secs == 0 {
        return Err(LoadError::invalid(
            "jobs.batch_timeout_seconds",
            "must be greater than zero",
        ));
    }

    let write_attempts = non_zero_u32(
        jobs.write_attempts.unwrap_or(DEFAULT_WRITE_ATTEMPTS).into(),
        "jobs.write_attempts",
    )?;

    let lease_secs = jobs
        .reconcile_lease_seconds
        .unwrap_or(DEFAULT_RECONCILE_LEASE_SECS);
    if lease_secs == 0 {
        return Err(LoadError::invalid(
            "jobs.reconcile_lease_seconds",
            "must be greater than zero",
        ));
    }

    Ok(JobsSettings {
        reconcile_cron,
        warm_cron,
        warm_top_n,
        reconcile_batch_size,
        batch_timeout: Duration::from_secs(batch_timeout_secs),
        write_attempts,
        retry_backoff: Duration::from_millis(
            jobs.retry_backoff_ms.unwrap_or(DEFAULT_RETRY_BACKOFF_MS),
        ),
        reconcile_lease: Duration::from_secs(lease_secs),
        bootstrap_on_start: jobs.bootstrap_on_start.unwrap_or(true),
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
    graceful_shutdown_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawDatabaseSettings {
    url: Option<String>,
    http_max_connections: Option<u32>,
    jobs_max_connections: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    backend: Option<String>,
    redis_url: Option<String>,
    operation_timeout_ms: Option<u64>,
    detail_ttl_min_secs: Option<u64>,
    detail_ttl_max_secs: Option<u64>,
    memory_detail_limit: Option<usize>,
    counter_policy: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawJobsSettings {
    reconcile_cron: Option<String>,
    warm_cron: Option<String>,
    warm_top_n: Option<u32>,
    reconcile_batch_size: Option<usize>,
    batch_timeout_seconds: Option<u64>,
    write_attempts: Option<u32>,
    retry_backoff_ms: Option<u64>,
    reconcile_lease_seconds: Option<u64>,
    bootstrap_on_start: Option<bool>,
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    })
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

fn non_zero_u32(value: u64, key: &'static str) -> Result<NonZeroU32, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    let value_u32: u32 = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for u32"))?;
    NonZeroU32::new(value_u32).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

#[cfg(test)]
mod tests;
