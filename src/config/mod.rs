//! Configuration layer: typed settings with layered precedence (file → env → CLI).

mod cli;

use std::{net::SocketAddr, num::NonZeroUsize, path::PathBuf, str::FromStr, time::Duration};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use url::Url;

use crate::cache::{CacheConfig, StaticInstructionConfig};

pub use cli::{CliArgs, Command, ServeArgs, ServeOverrides};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "advanced-cache";
const ENV_PREFIX: &str = "ADVANCED_CACHE";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_ADMIN_HOST: &str = "127.0.0.1";
const DEFAULT_PUBLIC_PORT: u16 = 3000;
const DEFAULT_ADMIN_PORT: u16 = 3001;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_UPSTREAM_ORIGIN: &str = "http://127.0.0.1:8080";
const DEFAULT_UPSTREAM_TIMEOUT_SECS: u64 = 30;
const DEFAULT_UPSTREAM_MAX_REQUEST_BYTES: u64 = 10 * 1024 * 1024;
const DEFAULT_REDIS_NAMESPACE: &str = "advanced-cache";

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub upstream: UpstreamSettings,
    pub cache: CacheSettings,
    pub admin: AdminSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub public_addr: SocketAddr,
    pub admin_addr: SocketAddr,
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
pub struct UpstreamSettings {
    pub origin: Url,
    pub timeout: Duration,
    pub max_request_bytes: NonZeroUsize,
}

/// Where cached pages live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendSettings {
    Memory,
    Redis { url: String, namespace: String },
}

impl BackendSettings {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Redis { .. } => "redis",
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub enabled: bool,
    pub backend: BackendSettings,
    pub backend_timeout: Duration,
    /// `None` keeps entries until invalidated.
    pub default_ttl: Option<Duration>,
    pub memory_capacity: NonZeroUsize,
    pub body_limit_bytes: NonZeroUsize,
    pub policies: Vec<String>,
    pub logged_in_cookie_prefixes: Vec<String>,
    pub bypass_paths: Vec<String>,
    pub bypass_query_params: Vec<String>,
    pub variant_cookies: Vec<String>,
    pub max_variants_per_url: NonZeroUsize,
    pub instructions: Vec<String>,
    pub static_instructions: Vec<StaticInstructionConfig>,
}

#[derive(Debug, Clone, Default)]
pub struct AdminSettings {
    /// Bearer token for the admin API; the API refuses every call when unset.
    pub token: Option<String>,
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

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) | Some(Command::CheckConfig(args)) => {
            raw.apply_serve_overrides(&args.overrides)
        }
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

/// Load settings from a single file, ignoring the environment. Used by tooling and tests.
pub fn load_from_file(path: impl Into<PathBuf>) -> Result<Settings, LoadError> {
    let path = path.into();
    let raw: RawSettings = Config::builder()
        .add_source(File::from(path.as_path()).required(true))
        .build()?
        .try_deserialize()?;
    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    upstream: RawUpstreamSettings,
    cache: RawCacheSettings,
    admin: RawAdminSettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(host) = overrides.server_admin_host.as_ref() {
            self.server.admin_host = Some(host.clone());
        }
        if let Some(port) = overrides.public_port {
            self.server.public_port = Some(port);
        }
        if let Some(port) = overrides.admin_port {
            self.server.admin_port = Some(port);
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
        if let Some(origin) = overrides.upstream_origin.as_ref() {
            self.upstream.origin = Some(origin.clone());
        }
        if let Some(seconds) = overrides.upstream_timeout_seconds {
            self.upstream.timeout_seconds = Some(seconds);
        }
        if let Some(enabled) = overrides.cache_enabled {
            self.cache.enabled = Some(enabled);
        }
        if let Some(backend) = overrides.cache_backend.as_ref() {
            self.cache.backend = Some(backend.clone());
        }
        if let Some(url) = overrides.cache_redis_url.as_ref() {
            self.cache.redis_url = Some(url.clone());
        }
        if let Some(seconds) = overrides.cache_default_ttl_seconds {
            self.cache.default_ttl_secs = Some(seconds);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            upstream,
            cache,
            admin,
        } = raw;

        let server = build_server_settings(server)?;
        let logging = build_logging_settings(logging)?;
        let upstream = build_upstream_settings(upstream)?;
        let cache = build_cache_settings(cache)?;
        let admin = build_admin_settings(admin);

        Ok(Self {
            server,
            logging,
            upstream,
            cache,
            admin,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());
    let admin_host = server
        .admin_host
        .unwrap_or_else(|| DEFAULT_ADMIN_HOST.to_string());

    let public_port = server.public_port.unwrap_or(DEFAULT_PUBLIC_PORT);
    if public_port == 0 {
        return Err(LoadError::invalid(
            "server.public_port",
            "port must be greater than zero",
        ));
    }

    let admin_port = server.admin_port.unwrap_or(DEFAULT_ADMIN_PORT);
    if admin_port == 0 {
        return Err(LoadError::invalid(
            "server.admin_port",
            "port must be greater than zero",
        ));
    }

    let public_addr = parse_socket_addr(&host, public_port)
        .map_err(|reason| LoadError::invalid("server.public_addr", reason))?;
    let admin_addr = parse_socket_addr(&admin_host, admin_port)
        .map_err(|reason| LoadError::invalid("server.admin_addr", reason))?;
    if public_addr == admin_addr {
        return Err(LoadError::invalid(
            "server.admin_port",
            "admin listener must not share the public address",
        ));
    }

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
        public_addr,
        admin_addr,
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

fn build_upstream_settings(upstream: RawUpstreamSettings) -> Result<UpstreamSettings, LoadError> {
    let raw_origin = upstream
        .origin
        .unwrap_or_else(|| DEFAULT_UPSTREAM_ORIGIN.to_string());
    let origin = Url::parse(raw_origin.trim())
        .map_err(|err| LoadError::invalid("upstream.origin", format!("invalid url: {err}")))?;
    if !matches!(origin.scheme(), "http" | "https") || origin.host_str().is_none() {
        return Err(LoadError::invalid(
            "upstream.origin",
            "origin must be an absolute http or https url",
        ));
    }

    let timeout_secs = upstream
        .timeout_seconds
        .unwrap_or(DEFAULT_UPSTREAM_TIMEOUT_SECS);
    if timeout_secs == 0 {
        return Err(LoadError::invalid(
            "upstream.timeout_seconds",
            "must be greater than zero",
        ));
    }

    let max_request_bytes = non_zero_usize(
        upstream
            .max_request_bytes
            .unwrap_or(DEFAULT_UPSTREAM_MAX_REQUEST_BYTES),
        "upstream.max_request_bytes",
    )?;

    Ok(UpstreamSettings {
        origin,
        timeout: Duration::from_secs(timeout_secs),
        max_request_bytes,
    })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let defaults = CacheConfig::default();

    let backend = match cache.backend.as_deref().map(str::trim) {
        None | Some("memory") => BackendSettings::Memory,
        Some("redis") => {
            let url = cache
                .redis_url
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
                .ok_or_else(|| {
                    LoadError::invalid("cache.redis_url", "required when cache.backend = \"redis\"")
                })?;
            BackendSettings::Redis {
                url,
                namespace: cache
                    .redis_namespace
                    .unwrap_or_else(|| DEFAULT_REDIS_NAMESPACE.to_string()),
            }
        }
        Some(other) => {
            return Err(LoadError::invalid(
                "cache.backend",
                format!("unknown backend `{other}` (expected memory or redis)"),
            ));
        }
    };

    let timeout_ms = cache
        .backend_timeout_ms
        .unwrap_or(defaults.backend_timeout_ms);
    if timeout_ms == 0 {
        return Err(LoadError::invalid(
            "cache.backend_timeout_ms",
            "must be greater than zero",
        ));
    }

    let ttl_secs = cache.default_ttl_secs.unwrap_or(defaults.default_ttl_secs);
    let memory_capacity = non_zero_usize(
        cache
            .memory_capacity
            .unwrap_or(defaults.memory_capacity as u64),
        "cache.memory_capacity",
    )?;
    let body_limit_bytes = non_zero_usize(
        cache
            .body_limit_bytes
            .unwrap_or(defaults.body_limit_bytes as u64),
        "cache.body_limit_bytes",
    )?;
    let max_variants_per_url = non_zero_usize(
        cache
            .max_variants_per_url
            .unwrap_or(defaults.max_variants_per_url as u64),
        "cache.max_variants_per_url",
    )?;

    Ok(CacheSettings {
        enabled: cache.enabled.unwrap_or(defaults.enabled),
        backend,
        backend_timeout: Duration::from_millis(timeout_ms),
        default_ttl: (ttl_secs > 0).then(|| Duration::from_secs(ttl_secs)),
        memory_capacity,
        body_limit_bytes,
        policies: cache.policies.unwrap_or(defaults.policies),
        logged_in_cookie_prefixes: cache
            .logged_in_cookie_prefixes
            .unwrap_or(defaults.logged_in_cookie_prefixes),
        bypass_paths: cache.bypass_paths.unwrap_or(defaults.bypass_paths),
        bypass_query_params: cache
            .bypass_query_params
            .unwrap_or(defaults.bypass_query_params),
        variant_cookies: cache.variant_cookies.unwrap_or(defaults.variant_cookies),
        max_variants_per_url,
        instructions: cache.instructions.unwrap_or(defaults.instructions),
        static_instructions: cache
            .static_instructions
            .unwrap_or(defaults.static_instructions),
    })
}

fn build_admin_settings(admin: RawAdminSettings) -> AdminSettings {
    let token = admin.token.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    });
    AdminSettings { token }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    admin_host: Option<String>,
    public_port: Option<u16>,
    admin_port: Option<u16>,
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
struct RawUpstreamSettings {
    origin: Option<String>,
    timeout_seconds: Option<u64>,
    max_request_bytes: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    enabled: Option<bool>,
    backend: Option<String>,
    redis_url: Option<String>,
    redis_namespace: Option<String>,
    backend_timeout_ms: Option<u64>,
    default_ttl_secs: Option<u64>,
    memory_capacity: Option<u64>,
    body_limit_bytes: Option<u64>,
    policies: Option<Vec<String>>,
    logged_in_cookie_prefixes: Option<Vec<String>>,
    bypass_paths: Option<Vec<String>>,
    bypass_query_params: Option<Vec<String>>,
    variant_cookies: Option<Vec<String>>,
    max_variants_per_url: Option<u64>,
    instructions: Option<Vec<String>>,
    static_instructions: Option<Vec<StaticInstructionConfig>>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawAdminSettings {
    token: Option<String>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

fn non_zero_usize(value: u64, key: &'static str) -> Result<NonZeroUsize, LoadError> {
    let value: usize = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for usize"))?;
    NonZeroUsize::new(value).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}
