//! Configuration loading with env-var overrides.
//!
//! Reads `config/default.toml` relative to the current working directory (or
//! an explicit path), then applies `RECONCILER_DATA_DIR`,
//! `RECONCILER_LOG_LEVEL` and `PORT` env overrides.

use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::Deserialize;

use crate::error::AppError;

/// Which [`ContactStore`](crate::store::ContactStore) backend to open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Sqlite,
    Memory,
}

/// Store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    /// Database file (already resolved against `data_dir`).
    pub db_path: PathBuf,
    /// Bound on every engine call, including waits on concurrent writers.
    pub timeout: Duration,
}

/// HTTP channel configuration.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub enabled: bool,
    /// Socket address to bind the HTTP channel to.
    pub bind: String,
}

/// Fully-resolved service configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub service_name: String,
    /// Directory for all persistent data (already expanded, no `~`).
    pub data_dir: PathBuf,
    pub log_level: String,
    /// Optional log file (absolute, or resolved against `data_dir`).
    pub log_file: Option<PathBuf>,
    pub store: StoreConfig,
    pub http: HttpConfig,
}

/// Overrides normally sourced from the environment.
/// Tests pass these directly instead of mutating env vars.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub data_dir: Option<String>,
    pub log_level: Option<String>,
    pub port: Option<String>,
}

impl Overrides {
    pub fn from_env() -> Self {
        Self {
            data_dir: env::var("RECONCILER_DATA_DIR").ok(),
            log_level: env::var("RECONCILER_LOG_LEVEL").ok(),
            port: env::var("PORT").ok(),
        }
    }
}

/// Raw TOML shape — `serde` target before resolution.
#[derive(Deserialize)]
struct RawConfig {
    service: RawService,
    #[serde(default)]
    store: RawStore,
    #[serde(default)]
    http: RawHttp,
}

#[derive(Deserialize)]
struct RawService {
    #[serde(default = "default_service_name")]
    name: String,
    data_dir: String,
    #[serde(default = "default_log_level")]
    log_level: String,
    #[serde(default)]
    log_file: Option<String>,
}

#[derive(Deserialize)]
struct RawStore {
    #[serde(default = "default_backend")]
    backend: StoreBackend,
    #[serde(default = "default_db_file")]
    db_file: String,
    #[serde(default = "default_timeout_ms")]
    timeout_ms: u64,
}

impl Default for RawStore {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            db_file: default_db_file(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

#[derive(Deserialize)]
struct RawHttp {
    /// Defaults to `true`: the HTTP channel is the only transport.
    #[serde(default = "default_true")]
    enabled: bool,
    #[serde(default = "default_http_bind")]
    bind: String,
}

impl Default for RawHttp {
    fn default() -> Self {
        Self {
            enabled: true,
            bind: default_http_bind(),
        }
    }
}

fn default_service_name() -> String { "contact-reconciler".to_string() }
fn default_log_level() -> String { "info".to_string() }
fn default_backend() -> StoreBackend { StoreBackend::Sqlite }
fn default_db_file() -> String { "contacts.db".to_string() }
fn default_timeout_ms() -> u64 { 5000 }
fn default_http_bind() -> String { "127.0.0.1:3000".to_string() }
fn default_true() -> bool { true }

/// Load config from `path` (default `config/default.toml`), then apply env-var overrides.
pub fn load(path: Option<&str>) -> Result<Config, AppError> {
    let path = Path::new(path.unwrap_or("config/default.toml"));
    load_from(path, &Overrides::from_env())
}

/// Internal loader — accepts an explicit path and overrides.
pub fn load_from(path: &Path, overrides: &Overrides) -> Result<Config, AppError> {
    let raw = fs::read_to_string(path)
        .map_err(|e| AppError::Config(format!("cannot read {}: {e}", path.display())))?;

    let parsed: RawConfig = toml::from_str(&raw)
        .map_err(|e| AppError::Config(format!("parse error in {}: {e}", path.display())))?;

    let s = parsed.service;

    let data_dir = expand_home(overrides.data_dir.as_deref().unwrap_or(&s.data_dir));
    let log_level = overrides.log_level.clone().unwrap_or(s.log_level);

    if parsed.store.timeout_ms == 0 {
        return Err(AppError::Config("store.timeout_ms must be > 0".into()));
    }

    let bind = match overrides.port.as_deref() {
        Some(port) => with_port(&parsed.http.bind, port)?,
        None => parsed.http.bind,
    };

    Ok(Config {
        service_name: s.name,
        log_file: s.log_file.map(|f| resolve_in(&data_dir, &f)),
        store: StoreConfig {
            backend: parsed.store.backend,
            db_path: resolve_in(&data_dir, &parsed.store.db_file),
            timeout: Duration::from_millis(parsed.store.timeout_ms),
        },
        http: HttpConfig {
            enabled: parsed.http.enabled,
            bind,
        },
        data_dir,
        log_level,
    })
}

/// Replace the port of a `host:port` bind address.
fn with_port(bind: &str, port: &str) -> Result<String, AppError> {
    let port: u16 = port
        .trim()
        .parse()
        .map_err(|_| AppError::Config(format!("invalid PORT '{port}'")))?;
    let host = bind.rsplit_once(':').map(|(h, _)| h).unwrap_or(bind);
    Ok(format!("{host}:{port}"))
}

fn resolve_in(dir: &Path, file: &str) -> PathBuf {
    let path = expand_home(file);
    if path.is_absolute() {
        path
    } else {
        dir.join(path)
    }
}

/// Expand a leading `~` to the user's home directory.
/// Absolute or relative paths without `~` are returned unchanged.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    PathBuf::from(path)
}

// ── test helpers ──────────────────────────────────────────────────────────────

/// In-memory `Config` for unit tests — no files, HTTP disabled.
#[cfg(test)]
impl Config {
    pub fn test_default(data_dir: &Path) -> Self {
        Self {
            service_name: "test".into(),
            data_dir: data_dir.to_path_buf(),
            log_level: "info".into(),
            log_file: None,
            store: StoreConfig {
                backend: StoreBackend::Memory,
                db_path: data_dir.join("contacts.db"),
                timeout: Duration::from_secs(1),
            },
            http: HttpConfig {
                enabled: false,
                bind: default_http_bind(),
            },
        }
    }
}
