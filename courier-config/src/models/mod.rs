pub mod sources;

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use url::Url;

use crate::constants::{BACKEND_HOST_ENV, BACKEND_PORT_ENV};

/// Fully resolved shell configuration.
#[derive(Debug, Clone)]
pub struct ShellConfig {
    /// Whether the shell runs from a packaged build.
    pub packaged: bool,
    pub backend: BackendConfig,
    pub readiness: ReadinessConfig,
    pub updates: UpdateConfig,
    pub window: WindowConfig,
    pub metadata: ConfigMetadata,
}

#[derive(Debug, Clone)]
pub struct BackendConfig {
    /// Directory the executable locations are resolved against.
    pub base_dir: PathBuf,
    /// Location of the backend inside a packaged build, relative to `base_dir`.
    pub packaged_path: PathBuf,
    /// Location of the backend in a development checkout, relative to
    /// `base_dir`.
    pub development_path: PathBuf,
    pub host: String,
    pub port: u16,
    pub args: Vec<String>,
    pub grace_period: Duration,
}

impl BackendConfig {
    /// Environment handed to the backend so it binds where the shell probes.
    pub fn launch_env(&self) -> Vec<(String, String)> {
        vec![
            (BACKEND_HOST_ENV.to_string(), self.host.clone()),
            (BACKEND_PORT_ENV.to_string(), self.port.to_string()),
        ]
    }
}

#[derive(Debug, Clone)]
pub struct ReadinessConfig {
    pub health_path: String,
    /// Derived from the backend host/port and `health_path`.
    pub health_url: Url,
    pub max_attempts: u32,
    pub interval: Duration,
    pub probe_timeout: Duration,
}

/// Whether a discovered release downloads on its own or waits for the user.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DownloadPolicy {
    /// Download only after the presentation layer sends `download_update`.
    #[default]
    Manual,
    /// Start downloading as soon as a release is found.
    Automatic,
}

impl DownloadPolicy {
    pub fn is_automatic(self) -> bool {
        matches!(self, DownloadPolicy::Automatic)
    }
}

impl FromStr for DownloadPolicy {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "manual" | "gated" => Ok(DownloadPolicy::Manual),
            "automatic" | "auto" => Ok(DownloadPolicy::Automatic),
            other => Err(format!("unknown download policy `{other}`")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct UpdateConfig {
    pub enabled: bool,
    pub manifest_url: Option<Url>,
    pub download_policy: DownloadPolicy,
    pub check_delay: Duration,
    pub staging_dir: PathBuf,
    pub current_version: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub entry: String,
}

#[derive(Debug, Clone, Default)]
pub struct ConfigMetadata {
    pub config_path: Option<PathBuf>,
    pub env_file_loaded: bool,
}
