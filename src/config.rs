use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Env var that overrides the `[telemetry] enabled` switch.
pub const TELEMETRY_ENV: &str = "SISO_WRAPPER_TELEMETRY";

/// Top-level configuration loaded from `siso-wrapper/config.toml`.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct WrapperConfig {
    pub telemetry: TelemetryConfig,
    pub collector: CollectorConfig,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub enabled: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    /// Port of the collector's own HTTP health API.
    pub health_port: u16,
    /// Receiver endpoint used where local sockets are not available.
    pub default_tcp_endpoint: String,
    pub startup_timeout_ms: u64,
    pub poll_interval_ms: u64,
    pub request_timeout_ms: u64,
}

impl CollectorConfig {
    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

// --- Default implementations ---

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            health_port: 13133,
            default_tcp_endpoint: "127.0.0.1:4317".to_string(),
            startup_timeout_ms: 1000,
            poll_interval_ms: 50,
            request_timeout_ms: 500,
        }
    }
}

/// Errors that can occur while loading the wrapper config.
#[derive(Debug)]
pub enum ConfigError {
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Read { path, source } => {
                write!(f, "failed to read config {}: {}", path.display(), source)
            }
            ConfigError::Parse { path, source } => {
                write!(f, "invalid config {}: {}", path.display(), source)
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Read { source, .. } => Some(source),
            ConfigError::Parse { source, .. } => Some(source),
        }
    }
}

impl WrapperConfig {
    /// Load config from `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no wrapper config, using defaults");
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source: e,
                })
            }
        };
        toml::from_str(&contents).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Whether telemetry collection is consented to, after applying the
    /// `SISO_WRAPPER_TELEMETRY` override from `env_value`.
    pub fn telemetry_enabled(&self, env_value: Option<&str>) -> bool {
        match env_value.map(|v| v.trim().to_ascii_lowercase()) {
            Some(v) if matches!(v.as_str(), "0" | "false" | "off" | "no") => false,
            Some(v) if matches!(v.as_str(), "1" | "true" | "on" | "yes") => true,
            _ => self.telemetry.enabled,
        }
    }
}

/// Default config location: `{config_dir}/siso-wrapper/config.toml`.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("siso-wrapper")
        .join("config.toml")
}
