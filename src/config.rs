use std::{path::Path, time::Duration};

use serde::Deserialize;

use crate::rate_limit::RatePolicy;

const DEFAULTS: &str = include_str!("../config/default.toml");

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Origin prepended to `file_url` in upload responses.
    pub base_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    pub master_key: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: usize,
    pub acquire_timeout_ms: u64,
}

impl DatabaseConfig {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    pub dir: String,
    pub max_upload_bytes: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitsConfig {
    pub api: RatePolicy,
    pub upload: RatePolicy,
    pub files: RatePolicy,
    /// Keys idle for this many windows are dropped by the cleanup task.
    pub idle_multiple: u32,
    pub cleanup_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ProxyConfig {
    /// Honour X-Forwarded-For / X-Real-IP. Only enable behind a proxy that sets them.
    #[serde(default)]
    pub trust_forwarded_headers: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExpiryConfig {
    pub sweep_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub database: DatabaseConfig,
    pub storage: StorageConfig,
    pub rate_limits: RateLimitsConfig,
    #[serde(default)]
    pub proxy: ProxyConfig,
    pub expiry: ExpiryConfig,
}

impl AppConfig {
    /// The embedded defaults, without files or environment applied.
    pub fn defaults() -> anyhow::Result<Self> {
        let cfg = ::config::Config::builder()
            .add_source(::config::File::from_str(DEFAULTS, ::config::FileFormat::Toml))
            .build()?;
        Ok(cfg.try_deserialize()?)
    }
}

pub fn load() -> anyhow::Result<AppConfig> {
    // Load .env first (optional)
    let _ = dotenvy::dotenv();

    let mut builder = ::config::Config::builder()
        .add_source(::config::File::from_str(DEFAULTS, ::config::FileFormat::Toml))
        // Optional local file: ablage.toml (in CWD)
        .add_source(::config::File::with_name("ablage").required(false));

    if let Ok(custom_path) = std::env::var("ABLAGE_CONFIG") {
        builder = builder.add_source(::config::File::with_name(&custom_path).required(false));
    }
    // Environment variables last to have highest precedence
    builder = builder.add_source(::config::Environment::with_prefix("ABLAGE").separator("__"));

    let app_cfg: AppConfig = builder.build()?.try_deserialize()?;
    validate(&app_cfg)?;
    Ok(app_cfg)
}

/// Defaults overlaid with a single TOML file. No environment lookup.
pub fn load_file(path: &Path) -> anyhow::Result<AppConfig> {
    let app_cfg: AppConfig = ::config::Config::builder()
        .add_source(::config::File::from_str(DEFAULTS, ::config::FileFormat::Toml))
        .add_source(::config::File::from(path).format(::config::FileFormat::Toml))
        .build()?
        .try_deserialize()?;
    validate(&app_cfg)?;
    Ok(app_cfg)
}

pub fn validate(cfg: &AppConfig) -> anyhow::Result<()> {
    // Server
    if cfg.server.port == 0 {
        return Err(anyhow::anyhow!("invalid server.port: {}", cfg.server.port));
    }
    #[cfg(unix)]
    if cfg.server.port < 1024 {
        tracing::warn!("Using privileged port {} - may require elevated permissions", cfg.server.port);
    }
    if cfg.server.base_url.trim().is_empty() {
        return Err(anyhow::anyhow!("server.base_url must not be empty"));
    }

    // Auth
    if cfg.auth.master_key.trim().is_empty() {
        return Err(anyhow::anyhow!("auth.master_key must not be empty"));
    }

    // Database
    if cfg.database.max_connections == 0 || cfg.database.max_connections > 256 {
        return Err(anyhow::anyhow!("database.max_connections must be in 1..=256"));
    }

    // Storage
    if cfg.storage.max_upload_bytes == 0 {
        return Err(anyhow::anyhow!("storage.max_upload_bytes must be > 0"));
    }
    if cfg.storage.dir.trim().is_empty() {
        return Err(anyhow::anyhow!("storage.dir must not be empty"));
    }

    // Rate limits
    for (scope, policy) in
        [("api", &cfg.rate_limits.api), ("upload", &cfg.rate_limits.upload), ("files", &cfg.rate_limits.files)]
    {
        if policy.limit == 0 {
            return Err(anyhow::anyhow!("rate_limits.{}.limit must be > 0", scope));
        }
        if policy.window_seconds == 0 {
            return Err(anyhow::anyhow!("rate_limits.{}.window_seconds must be > 0", scope));
        }
    }
    if cfg.rate_limits.idle_multiple == 0 {
        return Err(anyhow::anyhow!("rate_limits.idle_multiple must be > 0"));
    }
    if cfg.rate_limits.cleanup_interval_secs == 0 {
        return Err(anyhow::anyhow!("rate_limits.cleanup_interval_secs must be > 0"));
    }

    if cfg.expiry.sweep_interval_secs == 0 {
        return Err(anyhow::anyhow!("expiry.sweep_interval_secs must be > 0"));
    }

    Ok(())
}

pub fn ensure_sqlite_parent_dir(url: &str) -> anyhow::Result<()> {
    let path = url.strip_prefix("sqlite://").or_else(|| url.strip_prefix("sqlite:"));
    if let Some(path) = path {
        // sqlite::memory: and friends have no file behind them
        if path.starts_with(':') {
            return Ok(());
        }
        let path = path.split('?').next().unwrap_or(path);
        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
    }
    Ok(())
}
