use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

/// Notifications pushed by an [`UpdateService`] while it works.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateServiceEvent {
    Checking,
    Available { version: String },
    NotAvailable,
    Progress { percent: f64 },
    Downloaded { version: String },
    /// A failure the service noticed outside of a call it is answering.
    Error { message: String },
}

pub type UpdateEventSender = mpsc::UnboundedSender<UpdateServiceEvent>;
pub type UpdateEventReceiver = mpsc::UnboundedReceiver<UpdateServiceEvent>;

pub fn event_channel() -> (UpdateEventSender, UpdateEventReceiver) {
    mpsc::unbounded_channel()
}

#[derive(Debug, Error)]
pub enum UpdateServiceError {
    #[error("update server request failed")]
    Http(#[from] reqwest::Error),
    #[error("invalid release manifest: {reason}")]
    Manifest { reason: String },
    #[error("failed to stage update at {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("downloaded update failed verification: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },
    #[error("no update is available to download")]
    NothingToDownload,
    #[error("no downloaded update is ready to install")]
    NothingToInstall,
    #[error("failed to launch installer {}", path.display())]
    Launch {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// The update distribution backend.
///
/// Outcomes are reported as [`UpdateServiceEvent`]s on the sender the
/// service was built with. A call that fails returns the error instead of
/// also emitting [`UpdateServiceEvent::Error`].
#[async_trait]
pub trait UpdateService: Send + Sync {
    async fn check_for_updates(&self) -> Result<(), UpdateServiceError>;

    async fn download_update(&self) -> Result<(), UpdateServiceError>;

    /// Start the installer for the downloaded release. On success the
    /// caller is expected to exit.
    async fn quit_and_install(&self) -> Result<(), UpdateServiceError>;
}
