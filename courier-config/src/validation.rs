use std::time::Duration;

use thiserror::Error;

use crate::models::ShellConfig;

#[derive(Debug, Error)]
pub enum ConfigGuardRailError {
    #[error("readiness.max_attempts must be at least 1")]
    ZeroReadinessAttempts,
    #[error("readiness.interval must be greater than zero")]
    ZeroReadinessInterval,
    #[error("backend.port must be a fixed, non-zero port")]
    ZeroBackendPort,
    #[error("invalid health-check URL `{value}`")]
    InvalidHealthUrl {
        value: String,
        #[source]
        source: url::ParseError,
    },
    #[error("invalid update manifest URL `{value}`")]
    InvalidManifestUrl {
        value: String,
        #[source]
        source: url::ParseError,
    },
}

#[derive(Debug, Clone)]
pub struct ConfigWarning {
    pub message: String,
    pub hint: Option<String>,
}

#[derive(Debug, Default, Clone)]
pub struct ConfigWarnings {
    pub items: Vec<ConfigWarning>,
}

impl ConfigWarnings {
    pub fn push<S: Into<String>>(&mut self, message: S) {
        self.items.push(ConfigWarning {
            message: message.into(),
            hint: None,
        });
    }

    pub fn push_with_hint<S: Into<String>, H: Into<String>>(
        &mut self,
        message: S,
        hint: H,
    ) {
        self.items.push(ConfigWarning {
            message: message.into(),
            hint: Some(hint.into()),
        });
    }

    pub fn extend(&mut self, other: ConfigWarnings) {
        self.items.extend(other.items);
    }

    pub fn iter(&self) -> impl Iterator<Item = &ConfigWarning> {
        self.items.iter()
    }
}

/// Reject configurations the shell cannot run with and collect warnings for
/// ones it can run with in a degraded way.
///
/// Updates that are enabled without a manifest URL are switched off here,
/// which is why the config is taken mutably.
pub fn apply_guard_rails(
    config: &mut ShellConfig,
) -> Result<ConfigWarnings, ConfigGuardRailError> {
    let mut warnings = ConfigWarnings::default();

    if config.readiness.max_attempts == 0 {
        return Err(ConfigGuardRailError::ZeroReadinessAttempts);
    }
    if config.readiness.interval.is_zero() {
        return Err(ConfigGuardRailError::ZeroReadinessInterval);
    }
    if config.backend.port == 0 {
        return Err(ConfigGuardRailError::ZeroBackendPort);
    }

    if config.updates.enabled && config.updates.manifest_url.is_none() {
        config.updates.enabled = false;
        warnings.push_with_hint(
            "Updates are enabled but no manifest URL is configured; update checks are disabled",
            "Set updates.manifest_url or COURIER_UPDATE_MANIFEST_URL",
        );
    }

    if config.backend.grace_period == Duration::ZERO {
        warnings.push(
            "backend.grace_period is zero; the backend is killed without a chance to shut down",
        );
    }

    if config
        .readiness
        .interval
        .checked_mul(10)
        .is_some_and(|limit| config.readiness.probe_timeout > limit)
    {
        warnings.push_with_hint(
            "readiness.probe_timeout is much longer than readiness.interval",
            "A hung probe delays the next attempt by the full timeout",
        );
    }

    Ok(warnings)
}
