use serde::{Deserialize, Serialize};

/// Events the shell pushes to the presentation layer.
///
/// Encoded as `{"event": "<name>", "payload": ...}`; events without a payload
/// omit the `payload` key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "kebab-case")]
pub enum ShellEvent {
    /// Human-readable update progress message.
    UpdateStatus(String),
    /// A newer release exists; carries its version.
    UpdateAvailable(String),
    /// Download progress as a percentage in `0.0..=100.0`.
    UpdateProgress(f64),
    /// The release has been downloaded and can be installed.
    UpdateDownloaded,
}

impl ShellEvent {
    /// Wire name of the event.
    pub const fn name(&self) -> &'static str {
        match self {
            ShellEvent::UpdateStatus(_) => "update-status",
            ShellEvent::UpdateAvailable(_) => "update-available",
            ShellEvent::UpdateProgress(_) => "update-progress",
            ShellEvent::UpdateDownloaded => "update-downloaded",
        }
    }
}
