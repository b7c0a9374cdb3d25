pub mod error;

use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use tracing::debug;
use url::Url;

use crate::constants::{
    DEFAULT_BACKEND_HOST, DEFAULT_BACKEND_PORT, DEFAULT_BACKEND_STEM,
    DEFAULT_DEVELOPMENT_DIR, DEFAULT_GRACE_PERIOD, DEFAULT_HEALTH_PATH,
    DEFAULT_PACKAGED_DIR, DEFAULT_PROBE_TIMEOUT, DEFAULT_READY_INTERVAL,
    DEFAULT_READY_MAX_ATTEMPTS, DEFAULT_STAGING_DIR_NAME,
    DEFAULT_UPDATE_CHECK_DELAY, DEFAULT_WINDOW_ENTRY, DEFAULT_WINDOW_HEIGHT,
    DEFAULT_WINDOW_TITLE, DEFAULT_WINDOW_WIDTH, SHELL_VERSION,
};
use crate::models::{
    BackendConfig, ConfigMetadata, DownloadPolicy, ReadinessConfig,
    ShellConfig, UpdateConfig, WindowConfig,
    sources::{EnvConfig, FileConfig},
};
use crate::validation::{self, ConfigGuardRailError, ConfigWarnings};
use error::ConfigLoadError;

const DEFAULT_CONFIG_LOCATIONS: [&str; 2] =
    ["courier.toml", "config/courier.toml"];

#[derive(Debug, Default, Clone)]
pub struct ConfigLoaderOptions {
    pub config_path: Option<PathBuf>,
    pub env_file: Option<PathBuf>,
    /// Overrides the packaging flag from every other source.
    pub packaged: Option<bool>,
}

#[derive(Debug, Default)]
pub struct ConfigLoader {
    options: ConfigLoaderOptions,
    env: Option<EnvConfig>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: ConfigLoaderOptions) -> Self {
        Self { options, env: None }
    }

    pub fn with_config_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.options.config_path = Some(path.into());
        self
    }

    pub fn with_env_file<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.options.env_file = Some(path.into());
        self
    }

    pub fn with_packaged(mut self, packaged: bool) -> Self {
        self.options.packaged = Some(packaged);
        self
    }

    /// Use the given values instead of reading `.env` and the process
    /// environment.
    pub fn with_env(mut self, env: EnvConfig) -> Self {
        self.env = Some(env);
        self
    }

    pub fn load(&self) -> Result<ConfigLoad, ConfigLoadError> {
        let (env_config, env_file_loaded) = match &self.env {
            Some(env) => (env.clone(), false),
            None => {
                // dotenvy must populate the process env before it is read.
                let loaded = self.load_env_file()?;
                (EnvConfig::gather(), loaded)
            }
        };

        let (file_config, config_path) = self.load_file_config(&env_config)?;

        let mut warnings = ConfigWarnings::default();
        if config_path.is_none() {
            warnings.push_with_hint(
                "No courier.toml detected; using environment variables and defaults",
                "Create courier.toml or pass --config to customise the shell",
            );
        }

        let metadata = ConfigMetadata {
            config_path,
            env_file_loaded,
        };
        let mut config = self.compose_config(
            file_config.unwrap_or_default(),
            env_config,
            metadata,
        )?;

        warnings.extend(validation::apply_guard_rails(&mut config)?);

        Ok(ConfigLoad { config, warnings })
    }

    fn load_env_file(&self) -> Result<bool, ConfigLoadError> {
        let loaded = match &self.options.env_file {
            Some(path) => dotenvy::from_path(path).map(|_| true),
            None => dotenvy::dotenv().map(|_| true),
        };
        match loaded {
            Ok(loaded) => Ok(loaded),
            Err(dotenvy::Error::Io(_)) => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    fn load_file_config(
        &self,
        env_config: &EnvConfig,
    ) -> Result<(Option<FileConfig>, Option<PathBuf>), ConfigLoadError> {
        let source = ConfigPathSource {
            explicit: self.options.config_path.clone(),
            env: env_config.config_path.clone(),
            default: DEFAULT_CONFIG_LOCATIONS
                .iter()
                .map(PathBuf::from)
                .find(|candidate| candidate.exists()),
        };

        let Some((path, provenance)) = source.resolved_path() else {
            return Ok((None, None));
        };

        if !path.exists() {
            if provenance.is_explicit() {
                return Err(ConfigLoadError::MissingConfig { path });
            }
            return Ok((None, None));
        }

        let contents =
            fs::read_to_string(&path).map_err(|source| ConfigLoadError::Io {
                path: path.clone(),
                source,
            })?;
        let file_config: FileConfig =
            toml::from_str(&contents).map_err(|source| {
                ConfigLoadError::Parse {
                    path: path.clone(),
                    source,
                }
            })?;

        debug!(
            path = %path.display(),
            provenance = ?provenance,
            "parsed shell config file"
        );
        Ok((Some(file_config), Some(path)))
    }

    fn compose_config(
        &self,
        file: FileConfig,
        env: EnvConfig,
        metadata: ConfigMetadata,
    ) -> Result<ShellConfig, ConfigLoadError> {
        let FileConfig {
            packaged: file_packaged,
            backend: file_backend,
            readiness: file_readiness,
            updates: file_updates,
            window: file_window,
        } = file;

        let packaged = self
            .options
            .packaged
            .or(env.packaged)
            .or(file_packaged)
            .unwrap_or(!cfg!(debug_assertions));

        let base_dir = match env.base_dir.clone().or(file_backend.base_dir) {
            Some(dir) => dir,
            None => default_base_dir(packaged)?,
        };

        let host = env
            .backend_host
            .clone()
            .or(file_backend.host)
            .unwrap_or_else(|| DEFAULT_BACKEND_HOST.to_string());
        let port = env
            .backend_port
            .or(file_backend.port)
            .unwrap_or(DEFAULT_BACKEND_PORT);

        let backend = BackendConfig {
            base_dir,
            packaged_path: file_backend.packaged_path.unwrap_or_else(|| {
                default_executable(DEFAULT_PACKAGED_DIR)
            }),
            development_path: file_backend
                .development_path
                .unwrap_or_else(|| default_executable(DEFAULT_DEVELOPMENT_DIR)),
            host,
            port,
            args: file_backend.args.unwrap_or_default(),
            grace_period: resolve_duration(
                "backend.grace_period",
                env.grace_period
                    .as_deref()
                    .or(file_backend.grace_period.as_deref()),
                DEFAULT_GRACE_PERIOD,
            )?,
        };

        let health_path = normalize_health_path(
            env.health_path
                .clone()
                .or(file_readiness.health_path)
                .unwrap_or_else(|| DEFAULT_HEALTH_PATH.to_string()),
        );
        let health_url = health_url(&backend, &health_path)?;

        let readiness = ReadinessConfig {
            health_path,
            health_url,
            max_attempts: env
                .ready_max_attempts
                .or(file_readiness.max_attempts)
                .unwrap_or(DEFAULT_READY_MAX_ATTEMPTS),
            interval: resolve_duration(
                "readiness.interval",
                env.ready_interval
                    .as_deref()
                    .or(file_readiness.interval.as_deref()),
                DEFAULT_READY_INTERVAL,
            )?,
            probe_timeout: resolve_duration(
                "readiness.probe_timeout",
                env.probe_timeout
                    .as_deref()
                    .or(file_readiness.probe_timeout.as_deref()),
                DEFAULT_PROBE_TIMEOUT,
            )?,
        };

        let manifest_url = env
            .update_manifest_url
            .clone()
            .or(file_updates.manifest_url)
            .map(|raw| {
                Url::parse(raw.trim()).map_err(|source| {
                    ConfigGuardRailError::InvalidManifestUrl {
                        value: raw.clone(),
                        source,
                    }
                })
            })
            .transpose()?;

        let download_policy = match env.auto_download {
            Some(true) => DownloadPolicy::Automatic,
            Some(false) => DownloadPolicy::Manual,
            None => match file_updates.download_policy {
                Some(raw) => raw.parse::<DownloadPolicy>().map_err(|_| {
                    ConfigLoadError::InvalidDownloadPolicy { value: raw }
                })?,
                None => DownloadPolicy::default(),
            },
        };

        let updates = UpdateConfig {
            enabled: env
                .updates_enabled
                .or(file_updates.enabled)
                .unwrap_or(packaged),
            manifest_url,
            download_policy,
            check_delay: resolve_duration(
                "updates.check_delay",
                env.update_check_delay
                    .as_deref()
                    .or(file_updates.check_delay.as_deref()),
                DEFAULT_UPDATE_CHECK_DELAY,
            )?,
            staging_dir: env
                .update_staging_dir
                .clone()
                .or(file_updates.staging_dir)
                .unwrap_or_else(|| {
                    std::env::temp_dir().join(DEFAULT_STAGING_DIR_NAME)
                }),
            current_version: file_updates
                .current_version
                .unwrap_or_else(|| SHELL_VERSION.to_string()),
        };

        let window = WindowConfig {
            title: file_window
                .title
                .unwrap_or_else(|| DEFAULT_WINDOW_TITLE.to_string()),
            width: file_window.width.unwrap_or(DEFAULT_WINDOW_WIDTH),
            height: file_window.height.unwrap_or(DEFAULT_WINDOW_HEIGHT),
            entry: file_window
                .entry
                .unwrap_or_else(|| DEFAULT_WINDOW_ENTRY.to_string()),
        };

        Ok(ShellConfig {
            packaged,
            backend,
            readiness,
            updates,
            window,
            metadata,
        })
    }
}

#[derive(Debug)]
pub struct ConfigLoad {
    pub config: ShellConfig,
    pub warnings: ConfigWarnings,
}

#[derive(Debug, Default)]
struct ConfigPathSource {
    explicit: Option<PathBuf>,
    env: Option<PathBuf>,
    default: Option<PathBuf>,
}

impl ConfigPathSource {
    fn resolved_path(&self) -> Option<(PathBuf, ConfigPathProvenance)> {
        if let Some(path) = &self.explicit {
            return Some((path.clone(), ConfigPathProvenance::Explicit));
        }
        if let Some(path) = &self.env {
            return Some((path.clone(), ConfigPathProvenance::Env));
        }
        if let Some(path) = &self.default {
            return Some((path.clone(), ConfigPathProvenance::Default));
        }
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConfigPathProvenance {
    Explicit,
    Env,
    Default,
}

impl ConfigPathProvenance {
    fn is_explicit(self) -> bool {
        matches!(
            self,
            ConfigPathProvenance::Explicit | ConfigPathProvenance::Env
        )
    }
}

fn default_executable(dir: &str) -> PathBuf {
    Path::new(dir).join(format!(
        "{DEFAULT_BACKEND_STEM}{}",
        std::env::consts::EXE_SUFFIX
    ))
}

/// Packaged builds resolve next to the shell binary, development builds
/// against the working directory.
fn default_base_dir(packaged: bool) -> Result<PathBuf, ConfigLoadError> {
    if packaged {
        let exe = std::env::current_exe()
            .map_err(|source| ConfigLoadError::BaseDir { source })?;
        Ok(exe
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(".")))
    } else {
        std::env::current_dir()
            .map_err(|source| ConfigLoadError::BaseDir { source })
    }
}

fn resolve_duration(
    field: &'static str,
    raw: Option<&str>,
    default: Duration,
) -> Result<Duration, ConfigLoadError> {
    match raw {
        Some(value) => humantime::parse_duration(value.trim()).map_err(
            |source| ConfigLoadError::InvalidDuration {
                field,
                value: value.to_string(),
                source,
            },
        ),
        None => Ok(default),
    }
}

fn normalize_health_path(path: String) -> String {
    if path.starts_with('/') {
        path
    } else {
        format!("/{path}")
    }
}

fn health_url(
    backend: &BackendConfig,
    health_path: &str,
) -> Result<Url, ConfigGuardRailError> {
    let raw =
        format!("http://{}:{}{}", backend.host, backend.port, health_path);
    Url::parse(&raw).map_err(|source| ConfigGuardRailError::InvalidHealthUrl {
        value: raw.clone(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .expect("temp config");
        file.write_all(contents.as_bytes()).expect("write config");
        file
    }

    fn loader() -> ConfigLoader {
        ConfigLoader::new().with_env(EnvConfig {
            base_dir: Some(PathBuf::from("/opt/courier")),
            ..EnvConfig::default()
        })
    }

    #[test]
    fn defaults_apply_without_file_or_env() {
        let ConfigLoad { config, warnings } = loader()
            .with_packaged(false)
            .load()
            .expect("defaults load");

        assert!(!config.packaged);
        assert_eq!(config.backend.host, "127.0.0.1");
        assert_eq!(config.backend.port, 8000);
        assert_eq!(config.backend.grace_period, Duration::from_secs(5));
        assert_eq!(
            config.readiness.health_url.as_str(),
            "http://127.0.0.1:8000/health"
        );
        assert_eq!(config.readiness.max_attempts, 30);
        assert_eq!(config.readiness.interval, Duration::from_millis(1000));
        assert!(!config.updates.enabled);
        assert_eq!(config.updates.download_policy, DownloadPolicy::Manual);
        assert_eq!(config.updates.check_delay, Duration::from_secs(5));
        assert_eq!(config.window.title, "Courier");
        assert_eq!((config.window.width, config.window.height), (1200, 800));
        assert!(
            warnings.iter().any(|w| w.message.contains("No courier.toml")),
            "missing config file should be reported"
        );
    }

    #[test]
    fn executable_defaults_follow_build_layout() {
        let config = loader().with_packaged(true).load().expect("load").config;
        let suffix = std::env::consts::EXE_SUFFIX;

        assert_eq!(
            config.backend.packaged_path,
            PathBuf::from(format!("resources/backend/run_server{suffix}"))
        );
        assert_eq!(
            config.backend.development_path,
            PathBuf::from(format!("backend/dist/run_server{suffix}"))
        );
        assert_eq!(config.backend.base_dir, PathBuf::from("/opt/courier"));
    }

    #[test]
    fn environment_overrides_file_values() {
        let file = write_config(
            r#"
                [backend]
                host = "127.0.0.2"
                port = 8100
                grace_period = "2s"

                [readiness]
                health_path = "status"
                max_attempts = 5
            "#,
        );
        let env = EnvConfig {
            backend_port: Some(9100),
            ready_interval: Some("250ms".into()),
            base_dir: Some(PathBuf::from("/opt/courier")),
            ..EnvConfig::default()
        };

        let config = ConfigLoader::new()
            .with_env(env)
            .with_config_path(file.path())
            .with_packaged(false)
            .load()
            .expect("load")
            .config;

        assert_eq!(config.backend.host, "127.0.0.2");
        assert_eq!(config.backend.port, 9100);
        assert_eq!(config.backend.grace_period, Duration::from_secs(2));
        assert_eq!(config.readiness.max_attempts, 5);
        assert_eq!(config.readiness.interval, Duration::from_millis(250));
        assert_eq!(
            config.readiness.health_url.as_str(),
            "http://127.0.0.2:9100/status"
        );
        assert_eq!(config.metadata.config_path.as_deref(), Some(file.path()));
    }

    #[test]
    fn explicit_missing_config_is_an_error() {
        let err = loader()
            .with_config_path("/definitely/not/here/courier.toml")
            .load()
            .expect_err("missing explicit config must fail");
        assert!(matches!(err, ConfigLoadError::MissingConfig { .. }));
    }

    #[test]
    fn malformed_durations_name_the_field() {
        let file = write_config(
            r#"
                [readiness]
                interval = "soon"
            "#,
        );
        let err = loader()
            .with_config_path(file.path())
            .load()
            .expect_err("bad duration must fail");
        match err {
            ConfigLoadError::InvalidDuration { field, value, .. } => {
                assert_eq!(field, "readiness.interval");
                assert_eq!(value, "soon");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn zero_attempts_trips_guard_rail() {
        let file = write_config(
            r#"
                [readiness]
                max_attempts = 0
            "#,
        );
        let err = loader()
            .with_config_path(file.path())
            .load()
            .expect_err("zero attempts must fail");
        assert!(matches!(
            err,
            ConfigLoadError::GuardRail(
                ConfigGuardRailError::ZeroReadinessAttempts
            )
        ));
    }

    #[test]
    fn huge_readiness_interval_loads_without_overflow() {
        let file = write_config(
            r#"
                [readiness]
                interval = "100000000000y"
                probe_timeout = "1h"
            "#,
        );
        let ConfigLoad { config, warnings } = loader()
            .with_config_path(file.path())
            .load()
            .expect("huge interval still loads");

        assert!(config.readiness.interval > Duration::from_secs(u64::MAX / 10));
        assert!(
            !warnings
                .iter()
                .any(|w| w.message.contains("probe_timeout"))
        );
    }

    #[test]
    fn updates_without_manifest_are_disabled_with_warning() {
        let ConfigLoad { config, warnings } =
            loader().with_packaged(true).load().expect("load");

        assert!(config.packaged);
        assert!(!config.updates.enabled);
        assert!(
            warnings
                .iter()
                .any(|w| w.message.contains("no manifest URL"))
        );
    }

    #[test]
    fn download_policy_comes_from_file_or_env_toggle() {
        let file = write_config(
            r#"
                [updates]
                enabled = true
                manifest_url = "https://updates.example.com/courier/latest.json"
                download_policy = "automatic"
            "#,
        );

        let from_file = loader()
            .with_config_path(file.path())
            .load()
            .expect("load")
            .config;
        assert!(from_file.updates.enabled);
        assert_eq!(
            from_file.updates.download_policy,
            DownloadPolicy::Automatic
        );

        let from_env = ConfigLoader::new()
            .with_env(EnvConfig {
                auto_download: Some(false),
                base_dir: Some(PathBuf::from("/opt/courier")),
                ..EnvConfig::default()
            })
            .with_config_path(file.path())
            .load()
            .expect("load")
            .config;
        assert_eq!(from_env.updates.download_policy, DownloadPolicy::Manual);
    }

    #[test]
    fn unknown_download_policy_is_rejected() {
        let file = write_config(
            r#"
                [updates]
                download_policy = "whenever"
            "#,
        );
        let err = loader()
            .with_config_path(file.path())
            .load()
            .expect_err("unknown policy must fail");
        assert!(matches!(err, ConfigLoadError::InvalidDownloadPolicy { .. }));
    }

    #[test]
    fn backend_env_carries_bind_address() {
        let config = loader().load().expect("load").config;
        let env = config.backend.launch_env();
        assert!(env.contains(&("FASTAPI_HOST".into(), "127.0.0.1".into())));
        assert!(env.contains(&("FASTAPI_PORT".into(), "8000".into())));
    }
}
