use serde::Deserialize;
use std::path::PathBuf;

/// Raw configuration as defined in a TOML file.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct FileConfig {
    pub packaged: Option<bool>,
    #[serde(default)]
    pub backend: FileBackendConfig,
    #[serde(default)]
    pub readiness: FileReadinessConfig,
    #[serde(default)]
    pub updates: FileUpdateConfig,
    #[serde(default)]
    pub window: FileWindowConfig,
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct FileBackendConfig {
    pub base_dir: Option<PathBuf>,
    pub packaged_path: Option<PathBuf>,
    pub development_path: Option<PathBuf>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub args: Option<Vec<String>>,
    /// Humantime duration, e.g. `"5s"`.
    pub grace_period: Option<String>,
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct FileReadinessConfig {
    pub health_path: Option<String>,
    pub max_attempts: Option<u32>,
    pub interval: Option<String>,
    pub probe_timeout: Option<String>,
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct FileUpdateConfig {
    pub enabled: Option<bool>,
    pub manifest_url: Option<String>,
    pub download_policy: Option<String>,
    pub check_delay: Option<String>,
    pub staging_dir: Option<PathBuf>,
    pub current_version: Option<String>,
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct FileWindowConfig {
    pub title: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub entry: Option<String>,
}

/// Environment-derived configuration values.
#[derive(Debug, Default, Clone)]
pub struct EnvConfig {
    pub config_path: Option<PathBuf>,
    pub packaged: Option<bool>,
    pub base_dir: Option<PathBuf>,
    pub backend_host: Option<String>,
    pub backend_port: Option<u16>,
    pub grace_period: Option<String>,
    pub health_path: Option<String>,
    pub ready_max_attempts: Option<u32>,
    pub ready_interval: Option<String>,
    pub probe_timeout: Option<String>,
    pub updates_enabled: Option<bool>,
    pub update_manifest_url: Option<String>,
    pub auto_download: Option<bool>,
    pub update_check_delay: Option<String>,
    pub update_staging_dir: Option<PathBuf>,
}

impl EnvConfig {
    /// Read every `COURIER_*` key from the process environment.
    pub fn gather() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary key lookup; `gather` passes the process
    /// environment.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| {
            lookup(name).filter(|value| !value.trim().is_empty())
        };

        Self {
            config_path: var("COURIER_CONFIG").map(PathBuf::from),
            packaged: var("COURIER_PACKAGED").and_then(|raw| parse_bool(&raw)),
            base_dir: var("COURIER_BASE_DIR").map(PathBuf::from),
            backend_host: var("COURIER_BACKEND_HOST"),
            backend_port: var("COURIER_BACKEND_PORT")
                .and_then(|s| s.trim().parse().ok()),
            grace_period: var("COURIER_GRACE_PERIOD"),
            health_path: var("COURIER_HEALTH_PATH"),
            ready_max_attempts: var("COURIER_READY_MAX_ATTEMPTS")
                .and_then(|s| s.trim().parse().ok()),
            ready_interval: var("COURIER_READY_INTERVAL"),
            probe_timeout: var("COURIER_PROBE_TIMEOUT"),
            updates_enabled: var("COURIER_UPDATES_ENABLED")
                .and_then(|raw| parse_bool(&raw)),
            update_manifest_url: var("COURIER_UPDATE_MANIFEST_URL"),
            auto_download: var("COURIER_AUTO_DOWNLOAD")
                .and_then(|raw| parse_bool(&raw)),
            update_check_delay: var("COURIER_UPDATE_CHECK_DELAY"),
            update_staging_dir: var("COURIER_UPDATE_STAGING_DIR")
                .map(PathBuf::from),
        }
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
