//! Shell lifecycle: launch the backend, wait for it, show the window, then
//! serve the bridge until the window closes, the user interrupts or an
//! update takes over.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use courier_config::ShellConfig;
use courier_contracts::ShellCommand;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::presentation::{
    PresentationError, PresentationSurface, WindowSpec,
};
use crate::readiness::{HealthProbe, ProbeError, Readiness, ReadinessGate};
use crate::supervisor::{
    ProcessLauncher, Supervisor, SupervisorError, SupervisorNotice,
    SupervisorSettings, TokioLauncher,
};
use crate::updates::{
    HttpUpdateService, UpdateAction, UpdateCoordinator, UpdateEventReceiver,
    UpdateEventSender, UpdateService, UpdateServiceError, UpdateServiceEvent,
    event_channel,
};

const FATAL_TITLE: &str = "Backend Error";
const CRASH_TITLE: &str = "Backend Crashed";

/// Why [`Shell::run`] returned normally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShellExit {
    /// The presentation layer closed its command stream.
    Closed,
    /// The shutdown future resolved (Ctrl-C for the binary).
    Interrupted,
    /// The update installer was launched; the new version takes over.
    Relaunching,
}

#[derive(Debug, Error)]
pub enum ShellError {
    #[error(transparent)]
    Launch(#[from] SupervisorError),
    #[error("backend at {url} did not become ready after {attempts} attempts")]
    ReadinessTimedOut { url: Url, attempts: u32 },
    #[error(transparent)]
    Presentation(#[from] PresentationError),
    #[error("failed to build health probe")]
    Probe(#[from] ProbeError),
    #[error("failed to set up the update service")]
    Update(#[from] UpdateServiceError),
}

type UpdateServiceFactory<'a> = Box<
    dyn FnOnce(
            UpdateEventSender,
        ) -> Result<Arc<dyn UpdateService>, UpdateServiceError>
        + 'a,
>;

/// Assembles a [`Shell`] from configuration, with seams for the process
/// launcher, the health probe and the update service.
pub struct ShellBuilder<'a> {
    config: &'a ShellConfig,
    launcher: Option<Arc<dyn ProcessLauncher>>,
    probe: Option<Arc<dyn HealthProbe>>,
    update_service: Option<UpdateServiceFactory<'a>>,
}

impl std::fmt::Debug for ShellBuilder<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShellBuilder")
            .field("custom_launcher", &self.launcher.is_some())
            .field("custom_probe", &self.probe.is_some())
            .field("custom_update_service", &self.update_service.is_some())
            .finish_non_exhaustive()
    }
}

impl<'a> ShellBuilder<'a> {
    pub fn new(config: &'a ShellConfig) -> Self {
        Self {
            config,
            launcher: None,
            probe: None,
            update_service: None,
        }
    }

    pub fn with_launcher(mut self, launcher: Arc<dyn ProcessLauncher>) -> Self {
        self.launcher = Some(launcher);
        self
    }

    pub fn with_probe(mut self, probe: Arc<dyn HealthProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    /// Replace the HTTP update service. The factory receives the sender the
    /// service must publish its events on.
    pub fn with_update_service<F>(mut self, factory: F) -> Self
    where
        F: FnOnce(UpdateEventSender) -> Arc<dyn UpdateService> + 'a,
    {
        self.update_service = Some(Box::new(move |events| Ok(factory(events))));
        self
    }

    pub fn build(
        self,
        surface: Arc<dyn PresentationSurface>,
        commands: mpsc::Receiver<ShellCommand>,
    ) -> Result<Shell, ShellError> {
        let config = self.config;

        let launcher = self
            .launcher
            .unwrap_or_else(|| Arc::new(TokioLauncher));
        let (supervisor, notices) =
            Supervisor::new(SupervisorSettings::from_config(config), launcher);

        let readiness = &config.readiness;
        let gate = match self.probe {
            Some(probe) => ReadinessGate::new(
                probe,
                readiness.health_url.clone(),
                readiness.max_attempts,
                readiness.interval,
            ),
            None => ReadinessGate::from_config(readiness)?,
        };

        let updates = if config.updates.enabled {
            let (sender, events) = event_channel();
            let service = match self.update_service {
                Some(factory) => factory(sender.clone())?,
                None => Arc::new(HttpUpdateService::from_config(
                    &config.updates,
                    sender.clone(),
                )?) as Arc<dyn UpdateService>,
            };
            Some(UpdatePlumbing {
                coordinator: UpdateCoordinator::new(
                    config.updates.download_policy,
                    Arc::clone(&surface),
                ),
                service,
                sender,
                events,
                check_delay: config.updates.check_delay,
            })
        } else {
            info!("self-update disabled");
            None
        };

        Ok(Shell {
            supervisor,
            notices,
            gate,
            surface,
            commands,
            window: WindowSpec::from(&config.window),
            grace_period: config.backend.grace_period,
            updates,
        })
    }
}

struct UpdatePlumbing {
    coordinator: UpdateCoordinator<dyn PresentationSurface>,
    service: Arc<dyn UpdateService>,
    /// Kept so spawned service calls can report their failures.
    sender: UpdateEventSender,
    events: UpdateEventReceiver,
    check_delay: Duration,
}

impl UpdatePlumbing {
    fn spawn_call(&self, action: UpdateAction) {
        let service = Arc::clone(&self.service);
        let sender = self.sender.clone();
        tokio::spawn(async move {
            let result = match action {
                UpdateAction::Check => service.check_for_updates().await,
                UpdateAction::Download => service.download_update().await,
                UpdateAction::Install => service.quit_and_install().await,
            };
            if let Err(err) = result {
                report_failure(&sender, action, &err);
            }
        });
    }
}

fn report_failure(
    sender: &UpdateEventSender,
    action: UpdateAction,
    err: &UpdateServiceError,
) {
    let message = error_chain(err);
    warn!(?action, error = %message, "update service call failed");
    let _ = sender.send(UpdateServiceEvent::Error { message });
}

fn error_chain(err: &dyn std::error::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

/// One running shell instance. Owns the single backend handle and the single
/// update session for its whole lifetime.
pub struct Shell {
    supervisor: Supervisor,
    notices: mpsc::UnboundedReceiver<SupervisorNotice>,
    gate: ReadinessGate,
    surface: Arc<dyn PresentationSurface>,
    commands: mpsc::Receiver<ShellCommand>,
    window: WindowSpec,
    grace_period: Duration,
    updates: Option<UpdatePlumbing>,
}

impl std::fmt::Debug for Shell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shell")
            .field("supervisor", &self.supervisor)
            .field("gate", &self.gate)
            .field("window", &self.window)
            .field("grace_period", &self.grace_period)
            .field("updates_enabled", &self.updates.is_some())
            .finish_non_exhaustive()
    }
}

impl Shell {
    pub fn builder(config: &ShellConfig) -> ShellBuilder<'_> {
        ShellBuilder::new(config)
    }

    /// Run the shell to completion.
    ///
    /// Launch failures and a readiness timeout are shown in a blocking error
    /// box and returned as errors. The backend is terminated on every path
    /// out of this function once it has been started.
    pub async fn run<F>(mut self, shutdown: F) -> Result<ShellExit, ShellError>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        if let Err(err) = self.supervisor.start() {
            error!(error = %err, "backend launch failed");
            self.show_fatal(&launch_failure_message(&err)).await;
            return Err(err.into());
        }

        let readiness = tokio::select! {
            readiness = self.gate.wait_until_ready() => readiness,
            () = &mut shutdown => {
                info!("interrupted while waiting for the backend");
                self.supervisor.terminate(self.grace_period).await;
                return Ok(ShellExit::Interrupted);
            }
        };
        if let Readiness::TimedOut { attempts } = readiness {
            let url = self.gate.url().clone();
            self.show_fatal(&format!(
                "The backend did not respond at {url} after {attempts} attempts."
            ))
            .await;
            self.supervisor.terminate(self.grace_period).await;
            return Err(ShellError::ReadinessTimedOut { url, attempts });
        }
        self.supervisor.mark_ready();

        if let Err(err) = self.surface.open_window(&self.window).await {
            error!(error = %err, "failed to open the main window");
            self.supervisor.terminate(self.grace_period).await;
            return Err(err.into());
        }
        info!(title = %self.window.title, "main window opened");

        let exit = self.event_loop(shutdown).await;

        let outcome = self.supervisor.terminate(self.grace_period).await;
        info!(?exit, ?outcome, "shell stopped");
        Ok(exit)
    }

    async fn event_loop<F>(&mut self, mut shutdown: std::pin::Pin<&mut F>) -> ShellExit
    where
        F: Future<Output = ()>,
    {
        let check_delay = self.updates.as_ref().map(|u| u.check_delay);
        let check_timer = tokio::time::sleep(check_delay.unwrap_or_default());
        tokio::pin!(check_timer);
        let mut check_pending = check_delay.is_some();

        loop {
            tokio::select! {
                () = &mut shutdown => {
                    info!("shutdown requested");
                    return ShellExit::Interrupted;
                }
                command = self.commands.recv() => {
                    let Some(command) = command else {
                        info!("presentation layer closed");
                        return ShellExit::Closed;
                    };
                    if let Some(exit) = self.handle_command(command).await {
                        return exit;
                    }
                }
                Some(notice) = self.notices.recv() => self.handle_notice(notice),
                Some(event) = next_update_event(&mut self.updates) => {
                    let action = self
                        .updates
                        .as_mut()
                        .and_then(|u| u.coordinator.handle_service_event(event));
                    if let Some(exit) = self.dispatch(action).await {
                        return exit;
                    }
                }
                () = &mut check_timer, if check_pending => {
                    check_pending = false;
                    let action = self
                        .updates
                        .as_mut()
                        .and_then(|u| u.coordinator.begin_check());
                    if let Some(exit) = self.dispatch(action).await {
                        return exit;
                    }
                }
            }
        }
    }

    async fn handle_command(&mut self, command: ShellCommand) -> Option<ShellExit> {
        debug!(%command, "command from presentation layer");
        let Some(updates) = self.updates.as_mut() else {
            warn!(%command, "self-update is disabled; ignoring command");
            return None;
        };
        let action = updates.coordinator.handle_command(command);
        self.dispatch(action).await
    }

    fn handle_notice(&self, notice: SupervisorNotice) {
        match notice {
            SupervisorNotice::Crashed { pid, code } => {
                warn!(pid = ?pid, code, "backend crashed; shell keeps running");
                self.surface.notify(
                    CRASH_TITLE,
                    &format!("The backend exited unexpectedly with code {code}."),
                );
            }
        }
    }

    async fn dispatch(&mut self, action: Option<UpdateAction>) -> Option<ShellExit> {
        let updates = self.updates.as_ref()?;
        match action? {
            UpdateAction::Install => {
                let service = Arc::clone(&updates.service);
                let sender = updates.sender.clone();
                // The installer replaces the backend executable.
                let outcome = self.supervisor.terminate(self.grace_period).await;
                info!(?outcome, "backend stopped ahead of the installer");
                match service.quit_and_install().await {
                    Ok(()) => {
                        info!("installer launched; shutting down to relaunch");
                        Some(ShellExit::Relaunching)
                    }
                    Err(err) => {
                        report_failure(&sender, UpdateAction::Install, &err);
                        None
                    }
                }
            }
            action => {
                updates.spawn_call(action);
                None
            }
        }
    }

    async fn show_fatal(&self, message: &str) {
        if let Err(err) = self.surface.show_error_box(FATAL_TITLE, message).await {
            warn!(error = %err, "could not show error box");
        }
    }
}

async fn next_update_event(
    updates: &mut Option<UpdatePlumbing>,
) -> Option<UpdateServiceEvent> {
    match updates {
        Some(updates) => updates.events.recv().await,
        None => std::future::pending().await,
    }
}

fn launch_failure_message(err: &SupervisorError) -> String {
    match err {
        SupervisorError::ExecutableMissing { path } => {
            format!("Backend executable not found at {}", path.display())
        }
        SupervisorError::Spawn { path, source } => {
            format!("Failed to start backend {}: {source}", path.display())
        }
        SupervisorError::AlreadyStarted => err.to_string(),
    }
}
