//! Update session state machine.

use courier_config::DownloadPolicy;

/// Where the current update cycle stands.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateState {
    /// No cycle in progress
    Idle,

    /// Asking the update service for a newer release
    Checking,

    /// A newer release exists; waiting for the user to download it
    Available { version: String },

    /// Release is downloading
    Downloading { version: String, percent: f64 },

    /// Release downloaded, waiting for the user to restart
    Downloaded { version: String },

    /// Handed to the installer; the shell is about to exit
    Installing { version: String },

    /// The cycle failed; a later check may start a new one
    Error { message: String },
}

/// Inputs that move an [`UpdateSession`] between states.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateEvent {
    CheckRequested,
    Found { version: String },
    NotFound,
    DownloadRequested,
    Progress { percent: f64 },
    Completed,
    RestartRequested,
    Failed { message: String },
}

impl UpdateEvent {
    pub fn name(&self) -> &'static str {
        match self {
            UpdateEvent::CheckRequested => "check-requested",
            UpdateEvent::Found { .. } => "found",
            UpdateEvent::NotFound => "not-found",
            UpdateEvent::DownloadRequested => "download-requested",
            UpdateEvent::Progress { .. } => "progress",
            UpdateEvent::Completed => "completed",
            UpdateEvent::RestartRequested => "restart-requested",
            UpdateEvent::Failed { .. } => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionResult {
    /// Transition successful, new state applied
    Success,

    /// Transition not valid from current state; state unchanged
    InvalidTransition {
        from_state: &'static str,
        event: &'static str,
    },
}

impl TransitionResult {
    pub fn is_success(&self) -> bool {
        matches!(self, TransitionResult::Success)
    }
}

/// The single live update cycle of a shell instance.
#[derive(Debug, Clone)]
pub struct UpdateSession {
    state: UpdateState,
    policy: DownloadPolicy,
}

impl UpdateSession {
    pub fn new(policy: DownloadPolicy) -> Self {
        Self {
            state: UpdateState::Idle,
            policy,
        }
    }

    pub fn state(&self) -> &UpdateState {
        &self.state
    }

    pub fn policy(&self) -> DownloadPolicy {
        self.policy
    }

    pub fn transition(&mut self, event: UpdateEvent) -> TransitionResult {
        let new_state = match (&self.state, &event) {
            (
                UpdateState::Idle | UpdateState::Error { .. },
                UpdateEvent::CheckRequested,
            ) => UpdateState::Checking,

            (UpdateState::Checking, UpdateEvent::Found { version }) => {
                if self.policy.is_automatic() {
                    UpdateState::Downloading {
                        version: version.clone(),
                        percent: 0.0,
                    }
                } else {
                    UpdateState::Available {
                        version: version.clone(),
                    }
                }
            }

            (UpdateState::Checking, UpdateEvent::NotFound) => UpdateState::Idle,

            (
                UpdateState::Available { version },
                UpdateEvent::DownloadRequested,
            ) => UpdateState::Downloading {
                version: version.clone(),
                percent: 0.0,
            },

            (
                UpdateState::Downloading { version, percent },
                UpdateEvent::Progress { percent: reported },
            ) => UpdateState::Downloading {
                version: version.clone(),
                percent: advance(*percent, *reported),
            },

            (UpdateState::Downloading { version, .. }, UpdateEvent::Completed) => {
                UpdateState::Downloaded {
                    version: version.clone(),
                }
            }

            (
                UpdateState::Downloaded { version },
                UpdateEvent::RestartRequested,
            ) => UpdateState::Installing {
                version: version.clone(),
            },

            // Failures from anywhere but an already failed session
            (state, UpdateEvent::Failed { message })
                if !matches!(state, UpdateState::Error { .. }) =>
            {
                UpdateState::Error {
                    message: message.clone(),
                }
            }

            _ => {
                return TransitionResult::InvalidTransition {
                    from_state: self.description(),
                    event: event.name(),
                };
            }
        };

        self.state = new_state;
        TransitionResult::Success
    }

    /// Get a human-readable description of the current state
    pub fn description(&self) -> &'static str {
        match self.state {
            UpdateState::Idle => "idle",
            UpdateState::Checking => "checking",
            UpdateState::Available { .. } => "available",
            UpdateState::Downloading { .. } => "downloading",
            UpdateState::Downloaded { .. } => "downloaded",
            UpdateState::Installing { .. } => "installing",
            UpdateState::Error { .. } => "error",
        }
    }

    /// Release the session is working towards, once one has been found.
    pub fn target_version(&self) -> Option<&str> {
        match &self.state {
            UpdateState::Available { version }
            | UpdateState::Downloading { version, .. }
            | UpdateState::Downloaded { version }
            | UpdateState::Installing { version } => Some(version),
            _ => None,
        }
    }

    pub fn progress(&self) -> Option<f64> {
        match self.state {
            UpdateState::Downloading { percent, .. } => Some(percent),
            UpdateState::Downloaded { .. } | UpdateState::Installing { .. } => {
                Some(100.0)
            }
            _ => None,
        }
    }

    pub fn last_error(&self) -> Option<&str> {
        match &self.state {
            UpdateState::Error { message } => Some(message),
            _ => None,
        }
    }
}

/// Progress never moves backwards and stays within `0..=100`.
fn advance(current: f64, reported: f64) -> f64 {
    if reported.is_nan() {
        return current;
    }
    current.max(reported.clamp(0.0, 100.0))
}
