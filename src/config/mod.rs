//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{
    net::SocketAddr,
    num::{NonZeroU32, NonZeroUsize},
    path::PathBuf,
    str::FromStr,
    time::Duration,
};

use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::domain::types::UserId;

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "cuplore";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 8080;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 8;
const DEFAULT_INGEST_CAPACITY: u64 = 1000;
const DEFAULT_INGEST_MAX_ATTEMPTS: u64 = 3;
const DEFAULT_INGEST_RETRY_BACKOFF_MS: u64 = 100;
const DEFAULT_INGEST_DRAIN_TIMEOUT_SECS: u64 = 10;
const DEFAULT_DEAD_LETTER_CAPACITY: u64 = 10_000;
const DEFAULT_RECONCILE_INTERVAL_SECS: u64 = 60;
const DEFAULT_RECONCILE_FULL_SCAN_INTERVAL_SECS: u64 = 600;
const DEFAULT_RECONCILE_DIRTY_BATCH_SIZE: u64 = 500;
const MAX_QUEUE_CAPACITY: u64 = 1_000_000;
const MAX_DIRTY_BATCH_SIZE: u64 = 100_000;
const MAX_INTERVAL_SECS: u64 = 86_400;
const ADMIN_USER_IDS_KEY: &str = "api.admin_user_ids";

/// Command-line arguments for the cuplore binary.
#[derive(Debug, Parser)]
#[command(name = "cuplore", version, about = "cuplore social backend")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "CUPLORE_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the HTTP service with the follow worker and like reconciler.
    Serve(Box<ServeArgs>),
    /// Run a single like reconciliation pass and exit.
    Reconcile(ReconcileArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct StorageOverrides {
    /// Override the database connection URL.
    #[arg(long = "database-url", value_name = "URL")]
    pub database_url: Option<String>,

    /// Override the cache (Redis) connection URL.
    #[arg(long = "cache-url", value_name = "URL")]
    pub cache_url: Option<String>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    #[command(flatten)]
    pub storage: StorageOverrides,

    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the listener port.
    #[arg(long = "server-port", value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Override the graceful shutdown timeout.
    #[arg(long = "server-graceful-shutdown-seconds", value_name = "SECONDS")]
    pub server_graceful_shutdown_seconds: Option<u64>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    /// Override the database pool size.
    #[arg(long = "database-max-connections", value_name = "COUNT")]
    pub database_max_connections: Option<u32>,

    /// Override the follow ingest queue capacity.
    #[arg(long = "ingest-capacity", value_name = "COUNT")]
    pub ingest_capacity: Option<u64>,

    /// Override the number of persistence attempts per follow.
    #[arg(long = "ingest-max-attempts", value_name = "COUNT")]
    pub ingest_max_attempts: Option<u64>,

    /// Override the like reconciliation interval.
    #[arg(long = "reconcile-interval-seconds", value_name = "SECONDS")]
    pub reconcile_interval_seconds: Option<u64>,

    /// Override the interval between full like scans.
    #[arg(long = "reconcile-full-scan-interval-seconds", value_name = "SECONDS")]
    pub reconcile_full_scan_interval_seconds: Option<u64>,

    /// Toggle dirty tracking; when disabled every tick scans the whole namespace.
    #[arg(
        long = "reconcile-dirty-tracking",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub reconcile_dirty_tracking: Option<bool>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ReconcileArgs {
    #[command(flatten)]
    pub storage: StorageOverrides,

    /// Scan the whole like namespace instead of only notes marked dirty.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub full: bool,
}

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub database: DatabaseSettings,
    pub cache: CacheSettings,
    pub ingest: IngestSettings,
    pub reconcile: ReconcileSettings,
    pub api: ApiSettings,
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
    pub max_connections: NonZeroU32,
}

#[derive(Debug, Clone, Default)]
pub struct CacheSettings {
    /// Redis URL; `None` selects the in-process cache.
    pub url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct IngestSettings {
    pub capacity: NonZeroUsize,
    pub max_attempts: NonZeroU32,
    pub retry_backoff: Duration,
    pub drain_timeout: Duration,
    pub dead_letter_capacity: NonZeroUsize,
}

#[derive(Debug, Clone)]
pub struct ReconcileSettings {
    pub interval: Duration,
    pub full_scan_interval: Duration,
    pub dirty_tracking: bool,
    pub dirty_batch_size: NonZeroUsize,
}

#[derive(Debug, Clone, Default)]
pub struct ApiSettings {
    /// Users allowed on `/admin/*`; empty closes the admin routes to everyone.
    pub admin_user_ids: Vec<UserId>,
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

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(
        Environment::with_prefix("CUPLORE")
            .separator("__")
            .try_parsing(true)
            .list_separator(",")
            .with_list_parse_key(ADMIN_USER_IDS_KEY),
    );

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::Reconcile(args)) => raw.apply_storage_overrides(&args.storage),
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    database: RawDatabaseSettings,
    cache: RawCacheSettings,
    ingest: RawIngestSettings,
    reconcile: RawReconcileSettings,
    api: RawApiSettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        self.apply_storage_overrides(&overrides.storage);

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
        if let Some(max) = overrides.database_max_connections {
            self.database.max_connections = Some(max);
        }
        if let Some(capacity) = overrides.ingest_capacity {
            self.ingest.capacity = Some(capacity);
        }
        if let Some(attempts) = overrides.ingest_max_attempts {
            self.ingest.max_attempts = Some(attempts);
        }
        if let Some(seconds) = overrides.reconcile_interval_seconds {
            self.reconcile.interval_seconds = Some(seconds);
        }
        if let Some(seconds) = overrides.reconcile_full_scan_interval_seconds {
            self.reconcile.full_scan_interval_seconds = Some(seconds);
        }
        if let Some(enabled) = overrides.reconcile_dirty_tracking {
            self.reconcile.dirty_tracking = Some(enabled);
        }
    }

    fn apply_storage_overrides(&mut self, overrides: &StorageOverrides) {
        if let Some(url) = overrides.database_url.as_ref() {
            self.database.url = Some(url.clone());
        }
        if let Some(url) = overrides.cache_url.as_ref() {
            self.cache.url = Some(url.clone());
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
            ingest,
            reconcile,
            api,
        } = raw;

        Ok(Self {
            server: build_server_settings(server)?,
            logging: build_logging_settings(logging)?,
            database: build_database_settings(database)?,
            cache: build_cache_settings(cache),
            ingest: build_ingest_settings(ingest)?,
            reconcile: build_reconcile_settings(reconcile)?,
            api: build_api_settings(api)?,
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

    let addr = parse_socket_addr(&host, port)
        .map_err(|reason| LoadError::invalid("server.addr", reason))?;

    let graceful_secs = server
        .graceful_shutdown_seconds
        .unwrap_or(DEFAULT_GRACEFUL_SHUTDOWN_SECS);
    let graceful_secs = seconds_in_range(graceful_secs, "server.graceful_shutdown_seconds")?;

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
    let max_connections = non_zero_u32(
        database
            .max_connections
            .unwrap_or(DEFAULT_DB_MAX_CONNECTIONS)
            .into(),
        "database.max_connections",
    )?;

    Ok(DatabaseSettings {
        url: trimmed(database.url),
        max_connections,
    })
}

fn build_cache_settings(cache: RawCacheSettings) -> CacheSettings {
    CacheSettings {
        url: trimmed(cache.url),
    }
}

fn build_ingest_settings(ingest: RawIngestSettings) -> Result<IngestSettings, LoadError> {
    let capacity = bounded_usize(
        ingest.capacity.unwrap_or(DEFAULT_INGEST_CAPACITY),
        MAX_QUEUE_CAPACITY,
        "ingest.capacity",
    )?;
    let max_attempts = non_zero_u32(
        ingest.max_attempts.unwrap_or(DEFAULT_INGEST_MAX_ATTEMPTS),
        "ingest.max_attempts",
    )?;
    let dead_letter_capacity = bounded_usize(
        ingest
            .dead_letter_capacity
            .unwrap_or(DEFAULT_DEAD_LETTER_CAPACITY),
        MAX_QUEUE_CAPACITY,
        "ingest.dead_letter_capacity",
    )?;

    let drain_secs = seconds_in_range(
        ingest
            .drain_timeout_seconds
            .unwrap_or(DEFAULT_INGEST_DRAIN_TIMEOUT_SECS),
        "ingest.drain_timeout_seconds",
    )?;

    Ok(IngestSettings {
        capacity,
        max_attempts,
        retry_backoff: Duration::from_millis(
            ingest
                .retry_backoff_ms
                .unwrap_or(DEFAULT_INGEST_RETRY_BACKOFF_MS),
        ),
        drain_timeout: Duration::from_secs(drain_secs),
        dead_letter_capacity,
    })
}

fn build_reconcile_settings(
    reconcile: RawReconcileSettings,
) -> Result<ReconcileSettings, LoadError> {
    let interval_secs = seconds_in_range(
        reconcile
            .interval_seconds
            .unwrap_or(DEFAULT_RECONCILE_INTERVAL_SECS),
        "reconcile.interval_seconds",
    )?;

    let full_scan_secs = seconds_in_range(
        reconcile
            .full_scan_interval_seconds
            .unwrap_or(DEFAULT_RECONCILE_FULL_SCAN_INTERVAL_SECS),
        "reconcile.full_scan_interval_seconds",
    )?;
    if full_scan_secs < interval_secs {
        return Err(LoadError::invalid(
            "reconcile.full_scan_interval_seconds",
            "must not be shorter than reconcile.interval_seconds",
        ));
    }

    let dirty_batch_size = bounded_usize(
        reconcile
            .dirty_batch_size
            .unwrap_or(DEFAULT_RECONCILE_DIRTY_BATCH_SIZE),
        MAX_DIRTY_BATCH_SIZE,
        "reconcile.dirty_batch_size",
    )?;

    Ok(ReconcileSettings {
        interval: Duration::from_secs(interval_secs),
        full_scan_interval: Duration::from_secs(full_scan_secs),
        dirty_tracking: reconcile.dirty_tracking.unwrap_or(true),
        dirty_batch_size,
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
    max_connections: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    url: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawIngestSettings {
    capacity: Option<u64>,
    max_attempts: Option<u64>,
    retry_backoff_ms: Option<u64>,
    drain_timeout_seconds: Option<u64>,
    dead_letter_capacity: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawApiSettings {
    admin_user_ids: Option<Vec<i64>>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawReconcileSettings {
    interval_seconds: Option<u64>,
    full_scan_interval_seconds: Option<u64>,
    dirty_tracking: Option<bool>,
    dirty_batch_size: Option<u64>,
}

fn build_api_settings(api: RawApiSettings) -> Result<ApiSettings, LoadError> {
    let mut admin_user_ids = api
        .admin_user_ids
        .unwrap_or_default()
        .into_iter()
        .map(|id| {
            UserId::new(id).map_err(|err| LoadError::invalid(ADMIN_USER_IDS_KEY, err.to_string()))
        })
        .collect::<Result<Vec<_>, _>>()?;
    admin_user_ids.sort_unstable();
    admin_user_ids.dedup();

    Ok(ApiSettings { admin_user_ids })
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

fn trimmed(value: Option<String>) -> Option<String> {
    value.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    })
}

fn non_zero_u32(value: u64, key: &'static str) -> Result<NonZeroU32, LoadError> {
    let value_u32: u32 = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for u32"))?;
    NonZeroU32::new(value_u32).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

fn bounded_usize(value: u64, max: u64, key: &'static str) -> Result<NonZeroUsize, LoadError> {
    if value > max {
        return Err(LoadError::invalid(key, format!("must not exceed {max}")));
    }
    let value_usize: usize = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for usize"))?;
    NonZeroUsize::new(value_usize)
        .ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

/// Timer settings are added to `Instant::now()`, so they stay within a day.
fn seconds_in_range(value: u64, key: &'static str) -> Result<u64, LoadError> {
    match value {
        0 => Err(LoadError::invalid(key, "must be greater than zero")),
        value if value > MAX_INTERVAL_SECS => Err(LoadError::invalid(
            key,
            format!("must not exceed {MAX_INTERVAL_SECS} seconds"),
        )),
        value => Ok(value),
    }
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}
