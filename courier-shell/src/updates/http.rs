use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::str::FromStr;

use async_trait::async_trait;
use courier_config::UpdateConfig;
use futures_util::StreamExt;
use parking_lot::Mutex;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};
use url::Url;

use super::service::{
    UpdateEventSender, UpdateService, UpdateServiceError, UpdateServiceEvent,
};

/// Release description served at the manifest URL.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ReleaseManifest {
    pub version: String,
    pub url: Url,
    #[serde(default)]
    pub sha256: Option<String>,
}

/// Dotted numeric version; pre-release and build suffixes are ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseVersion {
    parts: Vec<u64>,
}

impl FromStr for ReleaseVersion {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let trimmed = raw.trim();
        let trimmed = trimmed
            .strip_prefix('v')
            .or_else(|| trimmed.strip_prefix('V'))
            .unwrap_or(trimmed);
        let core = trimmed
            .split(['-', '+'])
            .next()
            .unwrap_or_default();
        if core.is_empty() {
            return Err(format!("`{raw}` is not a version"));
        }

        let mut parts = core
            .split('.')
            .map(|part| part.parse::<u64>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| format!("`{raw}` is not a dotted numeric version"))?;
        while parts.len() > 1 && parts.last() == Some(&0) {
            parts.pop();
        }
        Ok(Self { parts })
    }
}

impl PartialOrd for ReleaseVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ReleaseVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.parts.cmp(&other.parts)
    }
}

#[derive(Debug, Clone)]
struct StagedRelease {
    version: String,
    path: PathBuf,
}

/// Update service speaking to a static JSON manifest over HTTP.
#[derive(Debug)]
pub struct HttpUpdateService {
    client: reqwest::Client,
    manifest_url: Url,
    current_version: ReleaseVersion,
    staging_dir: PathBuf,
    events: UpdateEventSender,
    available: Mutex<Option<ReleaseManifest>>,
    staged: Mutex<Option<StagedRelease>>,
}

impl HttpUpdateService {
    pub fn new(
        manifest_url: Url,
        current_version: &str,
        staging_dir: PathBuf,
        events: UpdateEventSender,
    ) -> Result<Self, UpdateServiceError> {
        let current_version = current_version
            .parse()
            .map_err(|reason| UpdateServiceError::Manifest { reason })?;
        let client = reqwest::Client::builder()
            .user_agent(concat!("courier-shell/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            manifest_url,
            current_version,
            staging_dir,
            events,
            available: Mutex::new(None),
            staged: Mutex::new(None),
        })
    }

    pub fn from_config(
        config: &UpdateConfig,
        events: UpdateEventSender,
    ) -> Result<Self, UpdateServiceError> {
        let manifest_url = config.manifest_url.clone().ok_or_else(|| {
            UpdateServiceError::Manifest {
                reason: "no manifest URL configured".into(),
            }
        })?;
        Self::new(
            manifest_url,
            &config.current_version,
            config.staging_dir.clone(),
            events,
        )
    }

    fn emit(&self, event: UpdateServiceEvent) {
        if self.events.send(event).is_err() {
            debug!("update event receiver dropped");
        }
    }

    async fn fetch_manifest(&self) -> Result<ReleaseManifest, UpdateServiceError> {
        let manifest = self
            .client
            .get(self.manifest_url.clone())
            .send()
            .await?
            .error_for_status()?
            .json::<ReleaseManifest>()
            .await?;
        Ok(manifest)
    }

    /// Stream the release body into `path`, reporting progress and checking
    /// the digest when one is published. Returns the number of bytes written.
    async fn write_artifact(
        &self,
        response: reqwest::Response,
        path: &Path,
        expected_sha256: Option<&str>,
    ) -> Result<u64, UpdateServiceError> {
        let total = response.content_length().filter(|len| *len > 0);
        let io_error = |source| UpdateServiceError::Io {
            path: path.to_path_buf(),
            source,
        };

        let mut file = tokio::fs::File::create(path).await.map_err(io_error)?;
        let mut hasher = Sha256::new();
        let mut received: u64 = 0;
        let mut reported: u64 = 0;
        self.emit(UpdateServiceEvent::Progress { percent: 0.0 });

        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            hasher.update(&chunk);
            file.write_all(&chunk).await.map_err(io_error)?;
            received += chunk.len() as u64;

            if let Some(total) = total {
                let percent = (received.saturating_mul(100) / total).min(100);
                if percent > reported {
                    reported = percent;
                    self.emit(UpdateServiceEvent::Progress {
                        percent: percent as f64,
                    });
                }
            }
        }
        file.flush().await.map_err(io_error)?;
        drop(file);

        if reported < 100 {
            self.emit(UpdateServiceEvent::Progress { percent: 100.0 });
        }

        if let Some(expected) = expected_sha256 {
            let actual = hex::encode(hasher.finalize());
            if !actual.eq_ignore_ascii_case(expected.trim()) {
                return Err(UpdateServiceError::ChecksumMismatch {
                    expected: expected.trim().to_string(),
                    actual,
                });
            }
        }
        mark_executable(path).await.map_err(io_error)?;
        Ok(received)
    }
}

#[async_trait]
impl UpdateService for HttpUpdateService {
    async fn check_for_updates(&self) -> Result<(), UpdateServiceError> {
        self.emit(UpdateServiceEvent::Checking);
        let manifest = self.fetch_manifest().await?;
        let offered: ReleaseVersion = manifest
            .version
            .parse()
            .map_err(|reason| UpdateServiceError::Manifest { reason })?;

        if offered > self.current_version {
            info!(version = %manifest.version, url = %manifest.url, "newer release published");
            let version = manifest.version.clone();
            *self.available.lock() = Some(manifest);
            self.emit(UpdateServiceEvent::Available { version });
        } else {
            debug!(version = %manifest.version, "published release is not newer");
            *self.available.lock() = None;
            self.emit(UpdateServiceEvent::NotAvailable);
        }
        Ok(())
    }

    async fn download_update(&self) -> Result<(), UpdateServiceError> {
        let manifest = self
            .available
            .lock()
            .clone()
            .ok_or(UpdateServiceError::NothingToDownload)?;

        tokio::fs::create_dir_all(&self.staging_dir)
            .await
            .map_err(|source| UpdateServiceError::Io {
                path: self.staging_dir.clone(),
                source,
            })?;
        let path = self.staging_dir.join(artifact_name(&manifest));

        let response = self
            .client
            .get(manifest.url.clone())
            .send()
            .await?
            .error_for_status()?;
        let received = match self
            .write_artifact(response, &path, manifest.sha256.as_deref())
            .await
        {
            Ok(received) => received,
            Err(err) => {
                // Never leave a partial or unverified installer behind.
                if let Err(cleanup) = tokio::fs::remove_file(&path).await {
                    debug!(path = %path.display(), error = %cleanup, "no partial download to remove");
                }
                return Err(err);
            }
        };

        info!(version = %manifest.version, path = %path.display(), bytes = received, "update staged");
        *self.staged.lock() = Some(StagedRelease {
            version: manifest.version.clone(),
            path,
        });
        self.emit(UpdateServiceEvent::Downloaded {
            version: manifest.version,
        });
        Ok(())
    }

    async fn quit_and_install(&self) -> Result<(), UpdateServiceError> {
        let staged = self
            .staged
            .lock()
            .clone()
            .ok_or(UpdateServiceError::NothingToInstall)?;

        std::process::Command::new(&staged.path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| UpdateServiceError::Launch {
                path: staged.path.clone(),
                source,
            })?;
        info!(version = %staged.version, path = %staged.path.display(), "installer launched");
        Ok(())
    }
}

fn artifact_name(manifest: &ReleaseManifest) -> String {
    manifest
        .url
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| format!("courier-{}", manifest.version))
}

#[cfg(unix)]
async fn mark_executable(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
        .await
}

#[cfg(not(unix))]
async fn mark_executable(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn version(raw: &str) -> ReleaseVersion {
        raw.parse().expect("valid version")
    }

    #[test]
    fn versions_compare_numerically() {
        assert!(version("2.0.0") > version("1.9.9"));
        assert!(version("1.10.0") > version("1.9.0"));
        assert!(version("v2.0.1") > version("2.0"));
        assert_eq!(version("2"), version("2.0.0"));
        assert_eq!(version("2.0.0-beta.1"), version("2.0.0"));
        assert!(version("0.1.0") < version("0.1.1+build.7"));
    }

    #[test]
    fn malformed_versions_are_rejected() {
        for raw in ["", "latest", "1..2", "v", "1.x"] {
            assert!(raw.parse::<ReleaseVersion>().is_err(), "{raw}");
        }
    }

    #[test]
    fn artifact_name_prefers_url_file_name() {
        let manifest = ReleaseManifest {
            version: "2.0.0".into(),
            url: Url::parse("https://updates.example.com/courier/Courier-2.0.0.AppImage")
                .expect("url"),
            sha256: None,
        };
        assert_eq!(artifact_name(&manifest), "Courier-2.0.0.AppImage");

        let bare = ReleaseManifest {
            url: Url::parse("https://updates.example.com/").expect("url"),
            ..manifest
        };
        assert_eq!(artifact_name(&bare), "courier-2.0.0");
    }
}
