use std::sync::Arc;

use courier_config::DownloadPolicy;
use courier_contracts::{ShellCommand, ShellEvent};
use tracing::{debug, info, warn};

use super::service::UpdateServiceEvent;
use super::session::{TransitionResult, UpdateEvent, UpdateSession};
use crate::presentation::EventSink;

/// Work the coordinator needs the update service to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateAction {
    Check,
    Download,
    Install,
}

/// Drives the [`UpdateSession`] from shell triggers, user commands and
/// service notifications, and tells the presentation layer what happened.
///
/// The coordinator never calls the update service itself; it returns an
/// [`UpdateAction`] and the shell carries it out.
pub struct UpdateCoordinator<S: EventSink + ?Sized> {
    session: UpdateSession,
    sink: Arc<S>,
}

impl<S: EventSink + ?Sized> std::fmt::Debug for UpdateCoordinator<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpdateCoordinator")
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}

impl<S: EventSink + ?Sized> UpdateCoordinator<S> {
    pub fn new(policy: DownloadPolicy, sink: Arc<S>) -> Self {
        Self {
            session: UpdateSession::new(policy),
            sink,
        }
    }

    pub fn session(&self) -> &UpdateSession {
        &self.session
    }

    /// Start a new cycle. Ignored while one is already under way.
    pub fn begin_check(&mut self) -> Option<UpdateAction> {
        self.apply(UpdateEvent::CheckRequested)
    }

    pub fn handle_command(
        &mut self,
        command: ShellCommand,
    ) -> Option<UpdateAction> {
        match command {
            ShellCommand::DownloadUpdate => {
                self.apply(UpdateEvent::DownloadRequested)
            }
            ShellCommand::RestartApp => self.apply(UpdateEvent::RestartRequested),
        }
    }

    pub fn handle_service_event(
        &mut self,
        event: UpdateServiceEvent,
    ) -> Option<UpdateAction> {
        let event = match event {
            UpdateServiceEvent::Checking => {
                debug!("update service is checking");
                return None;
            }
            UpdateServiceEvent::Available { version } => {
                UpdateEvent::Found { version }
            }
            UpdateServiceEvent::NotAvailable => UpdateEvent::NotFound,
            UpdateServiceEvent::Progress { percent } => {
                UpdateEvent::Progress { percent }
            }
            UpdateServiceEvent::Downloaded { version } => {
                if self.session.target_version() != Some(version.as_str()) {
                    warn!(
                        %version,
                        expected = ?self.session.target_version(),
                        "downloaded release differs from the one announced"
                    );
                }
                UpdateEvent::Completed
            }
            UpdateServiceEvent::Error { message } => {
                UpdateEvent::Failed { message }
            }
        };
        self.apply(event)
    }

    fn apply(&mut self, event: UpdateEvent) -> Option<UpdateAction> {
        if let TransitionResult::InvalidTransition { from_state, event } =
            self.session.transition(event.clone())
        {
            warn!(state = from_state, event, "ignoring update event");
            return None;
        }
        debug!(
            state = self.session.description(),
            event = event.name(),
            "update session advanced"
        );
        self.publish(event)
    }

    fn publish(&self, event: UpdateEvent) -> Option<UpdateAction> {
        let version = self.session.target_version().unwrap_or_default();
        match event {
            UpdateEvent::CheckRequested => {
                self.status("Checking for updates...");
                Some(UpdateAction::Check)
            }
            UpdateEvent::Found { version } => {
                info!(%version, "update available");
                self.sink.emit(ShellEvent::UpdateAvailable(version.clone()));
                if self.session.policy().is_automatic() {
                    self.status(format!("Downloading update {version}..."));
                    Some(UpdateAction::Download)
                } else {
                    self.status(format!("Update {version} is available."));
                    None
                }
            }
            UpdateEvent::NotFound => {
                info!("no update available");
                self.status("You are running the latest version.");
                None
            }
            UpdateEvent::DownloadRequested => {
                self.status(format!("Downloading update {version}..."));
                Some(UpdateAction::Download)
            }
            UpdateEvent::Progress { .. } => {
                let percent = self.session.progress().unwrap_or_default();
                self.sink.emit(ShellEvent::UpdateProgress(percent));
                None
            }
            UpdateEvent::Completed => {
                info!(%version, "update downloaded");
                self.sink.emit(ShellEvent::UpdateDownloaded);
                self.status(format!(
                    "Update {version} downloaded. Restart to install."
                ));
                None
            }
            UpdateEvent::RestartRequested => {
                self.status(format!("Installing update {version}..."));
                Some(UpdateAction::Install)
            }
            UpdateEvent::Failed { message } => {
                warn!(error = %message, "update cycle failed");
                self.status(format!("Update error: {message}"));
                None
            }
        }
    }

    fn status(&self, message: impl Into<String>) {
        self.sink.emit(ShellEvent::UpdateStatus(message.into()));
    }
}
