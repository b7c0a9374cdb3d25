//! Backend process supervision.
//!
//! The [`Supervisor`] resolves where the backend executable lives, spawns it,
//! mirrors its output into the log and watches for it to exit. Handle state
//! is written only by the monitor task that owns the child and is published
//! through a `watch` channel, so every reader sees the same lifecycle.

pub mod process;

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use courier_config::ShellConfig;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, info, warn};

pub use process::{
    BackendProcess, ExitReport, LaunchSpec, OutputStream, ProcessLauncher,
    StreamKind, TokioLauncher,
};

/// Lifecycle of the backend process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendState {
    NotStarted,
    Starting,
    Running,
    ExitedClean,
    ExitedError,
    LaunchFailed,
}

impl BackendState {
    pub fn has_exited(self) -> bool {
        matches!(self, BackendState::ExitedClean | BackendState::ExitedError)
    }

    pub fn description(self) -> &'static str {
        match self {
            BackendState::NotStarted => "not started",
            BackendState::Starting => "starting",
            BackendState::Running => "running",
            BackendState::ExitedClean => "exited cleanly",
            BackendState::ExitedError => "exited with an error",
            BackendState::LaunchFailed => "failed to launch",
        }
    }
}

/// Snapshot of the supervised backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendHandle {
    pub pid: Option<u32>,
    pub state: BackendState,
    pub exit_code: Option<i32>,
}

impl BackendHandle {
    fn not_started() -> Self {
        Self {
            pid: None,
            state: BackendState::NotStarted,
            exit_code: None,
        }
    }
}

/// Non-fatal events the shell should tell the user about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorNotice {
    /// The backend exited on its own with a non-zero code.
    Crashed { pid: Option<u32>, code: i32 },
}

/// How a call to [`Supervisor::terminate`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationOutcome {
    /// Nothing to stop: never started, or already terminated.
    NoProcess,
    /// The process had exited before termination began; nothing was sent.
    AlreadyExited,
    /// The process exited within the grace period.
    Graceful,
    /// The grace period elapsed and the process was killed.
    Killed,
    /// The grace period elapsed but the process exited before the kill.
    ExitedBeforeKill,
    /// Neither signal could be delivered.
    Unresponsive,
}

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("backend executable not found at {}", path.display())]
    ExecutableMissing { path: PathBuf },
    #[error("failed to start backend {}", path.display())]
    Spawn {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("backend has already been started")]
    AlreadyStarted,
}

/// The two fixed places the backend can live, relative to a base directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutableLayout {
    pub base_dir: PathBuf,
    pub packaged: PathBuf,
    pub development: PathBuf,
}

impl ExecutableLayout {
    /// Pure: the same flag always yields the same path.
    pub fn resolve(&self, packaged: bool) -> PathBuf {
        let relative: &Path = if packaged {
            &self.packaged
        } else {
            &self.development
        };
        self.base_dir.join(relative)
    }
}

#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    pub layout: ExecutableLayout,
    pub packaged: bool,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
}

impl SupervisorSettings {
    pub fn from_config(config: &ShellConfig) -> Self {
        let backend = &config.backend;
        Self {
            layout: ExecutableLayout {
                base_dir: backend.base_dir.clone(),
                packaged: backend.packaged_path.clone(),
                development: backend.development_path.clone(),
            },
            packaged: config.packaged,
            args: backend.args.clone(),
            env: backend.launch_env(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum SignalKind {
    Graceful,
    Forceful,
}

#[derive(Debug)]
struct ControlRequest {
    signal: SignalKind,
    reply: oneshot::Sender<io::Result<()>>,
}

/// Owns the single backend process of a shell instance.
pub struct Supervisor {
    settings: SupervisorSettings,
    launcher: Arc<dyn ProcessLauncher>,
    state_tx: Option<watch::Sender<BackendHandle>>,
    handle: watch::Receiver<BackendHandle>,
    control: Option<mpsc::UnboundedSender<ControlRequest>>,
    /// Same channel the output pipes use to report the first line.
    activity: Option<mpsc::UnboundedSender<()>>,
    notices: mpsc::UnboundedSender<SupervisorNotice>,
    terminating: Arc<AtomicBool>,
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("settings", &self.settings)
            .field("handle", &*self.handle.borrow())
            .finish_non_exhaustive()
    }
}

impl Supervisor {
    /// Create a supervisor and the receiver for its notices.
    pub fn new(
        settings: SupervisorSettings,
        launcher: Arc<dyn ProcessLauncher>,
    ) -> (Self, mpsc::UnboundedReceiver<SupervisorNotice>) {
        let (state_tx, handle) = watch::channel(BackendHandle::not_started());
        let (notices, notice_rx) = mpsc::unbounded_channel();
        let supervisor = Self {
            settings,
            launcher,
            state_tx: Some(state_tx),
            handle,
            control: None,
            activity: None,
            notices,
            terminating: Arc::new(AtomicBool::new(false)),
        };
        (supervisor, notice_rx)
    }

    pub fn resolve_executable_path(&self, packaged: bool) -> PathBuf {
        self.settings.layout.resolve(packaged)
    }

    /// Current snapshot of the backend handle.
    pub fn handle(&self) -> BackendHandle {
        self.handle.borrow().clone()
    }

    /// Follow handle changes.
    pub fn subscribe(&self) -> watch::Receiver<BackendHandle> {
        self.handle.clone()
    }

    /// Spawn the backend. Must be called from within a tokio runtime.
    pub fn start(&mut self) -> Result<BackendHandle, SupervisorError> {
        let Some(state_tx) = self.state_tx.take() else {
            return Err(SupervisorError::AlreadyStarted);
        };

        let path = self.resolve_executable_path(self.settings.packaged);
        if !path.exists() {
            state_tx.send_modify(|h| h.state = BackendState::LaunchFailed);
            return Err(SupervisorError::ExecutableMissing { path });
        }

        let spec = LaunchSpec {
            program: path.clone(),
            args: self.settings.args.clone(),
            env: self.settings.env.clone(),
        };
        let mut process = match self.launcher.launch(&spec) {
            Ok(process) => process,
            Err(source) => {
                state_tx.send_modify(|h| h.state = BackendState::LaunchFailed);
                return Err(SupervisorError::Spawn { path, source });
            }
        };

        let pid = process.pid();
        state_tx.send_replace(BackendHandle {
            pid,
            state: BackendState::Starting,
            exit_code: None,
        });
        info!(pid = ?pid, path = %path.display(), "backend process spawned");

        let (activity_tx, activity_rx) = mpsc::unbounded_channel();
        for stream in process.take_output() {
            tokio::spawn(pipe_output(stream, pid, activity_tx.clone()));
        }
        self.activity = Some(activity_tx);

        let (control_tx, control_rx) = mpsc::unbounded_channel();
        tokio::spawn(monitor(
            process,
            MonitorChannels {
                state: state_tx,
                control: control_rx,
                activity: activity_rx,
                notices: self.notices.clone(),
            },
            Arc::clone(&self.terminating),
        ));
        self.control = Some(control_tx);

        Ok(self.handle())
    }

    /// Promote a `Starting` backend to `Running`. Used once the backend has
    /// answered its health check, since a quiet backend never writes the
    /// output line that would otherwise do this.
    pub fn mark_ready(&self) {
        if let Some(activity) = &self.activity {
            let _ = activity.send(());
        }
    }

    /// Stop the backend: graceful signal, then a kill if it is still alive
    /// after `grace_period`.
    ///
    /// Calling this more than once is harmless; later calls return
    /// [`TerminationOutcome::NoProcess`] without signalling anything.
    pub async fn terminate(
        &mut self,
        grace_period: Duration,
    ) -> TerminationOutcome {
        let Some(control) = self.control.take() else {
            return TerminationOutcome::NoProcess;
        };
        let pid = self.handle.borrow().pid;

        if self.handle.borrow().state.has_exited() {
            debug!(pid = ?pid, "backend already exited; nothing to terminate");
            return TerminationOutcome::AlreadyExited;
        }

        self.terminating.store(true, Ordering::SeqCst);

        let graceful = request(&control, SignalKind::Graceful).await;
        match &graceful {
            Ok(()) => {
                info!(pid = ?pid, grace = ?grace_period, "sent graceful termination signal")
            }
            Err(err) if is_already_exited(err) => {
                return TerminationOutcome::AlreadyExited;
            }
            Err(err) => {
                warn!(pid = ?pid, error = %err, "graceful termination signal failed")
            }
        }

        let mut exited = self.handle.clone();
        tokio::select! {
            () = wait_for_exit(&mut exited) => {
                info!(pid = ?pid, "backend exited within grace period");
                TerminationOutcome::Graceful
            }
            _ = tokio::time::sleep(grace_period) => {
                warn!(pid = ?pid, "backend still running after grace period; killing");
                match request(&control, SignalKind::Forceful).await {
                    Ok(()) => TerminationOutcome::Killed,
                    Err(err) if is_already_exited(&err) => {
                        TerminationOutcome::ExitedBeforeKill
                    }
                    Err(err) => {
                        error!(
                            pid = ?pid,
                            error = %err,
                            graceful_failed = graceful.is_err(),
                            "failed to kill backend; leaving it behind"
                        );
                        TerminationOutcome::Unresponsive
                    }
                }
            }
        }
    }
}

async fn wait_for_exit(handle: &mut watch::Receiver<BackendHandle>) {
    // A closed channel means the monitor is gone, which only happens on exit.
    let _ = handle.wait_for(|h| h.state.has_exited()).await;
}

async fn request(
    control: &mpsc::UnboundedSender<ControlRequest>,
    signal: SignalKind,
) -> io::Result<()> {
    let (reply, response) = oneshot::channel();
    control
        .send(ControlRequest { signal, reply })
        .map_err(|_| already_exited())?;
    response.await.unwrap_or_else(|_| Err(already_exited()))
}

fn already_exited() -> io::Error {
    io::Error::new(io::ErrorKind::NotFound, "backend has already exited")
}

fn is_already_exited(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::NotFound | io::ErrorKind::InvalidInput
    )
}

struct MonitorChannels {
    state: watch::Sender<BackendHandle>,
    control: mpsc::UnboundedReceiver<ControlRequest>,
    activity: mpsc::UnboundedReceiver<()>,
    notices: mpsc::UnboundedSender<SupervisorNotice>,
}

async fn monitor(
    mut process: Box<dyn BackendProcess>,
    channels: MonitorChannels,
    terminating: Arc<AtomicBool>,
) {
    let MonitorChannels {
        state,
        mut control,
        mut activity,
        notices,
    } = channels;
    let pid = process.pid();
    let mut activity_open = true;
    let mut control_open = true;

    let exit = loop {
        tokio::select! {
            result = process.wait() => break result,
            seen = activity.recv(), if activity_open => match seen {
                Some(()) => {
                    state.send_if_modified(|h| {
                        if h.state == BackendState::Starting {
                            h.state = BackendState::Running;
                            true
                        } else {
                            false
                        }
                    });
                }
                None => activity_open = false,
            },
            req = control.recv(), if control_open => match req {
                Some(ControlRequest { signal, reply }) => {
                    let result = match signal {
                        SignalKind::Graceful => process.signal_graceful(),
                        SignalKind::Forceful => process.signal_forceful(),
                    };
                    let _ = reply.send(result);
                }
                None => control_open = false,
            },
        }
    };

    let code = match exit {
        Ok(report) => report.code,
        Err(err) => {
            warn!(pid = ?pid, error = %err, "failed to observe backend exit");
            None
        }
    };
    let next = if code == Some(0) {
        BackendState::ExitedClean
    } else {
        BackendState::ExitedError
    };
    state.send_modify(|h| {
        h.state = next;
        h.exit_code = code;
    });

    let expected = terminating.load(Ordering::SeqCst);
    match code {
        Some(code) if code != 0 && !expected => {
            error!(pid = ?pid, code, "backend crashed");
            let _ = notices.send(SupervisorNotice::Crashed { pid, code });
        }
        _ if expected => info!(pid = ?pid, code = ?code, "backend stopped"),
        _ => warn!(pid = ?pid, code = ?code, "backend exited"),
    }

    control.close();
    while let Ok(ControlRequest { reply, .. }) = control.try_recv() {
        let _ = reply.send(Err(already_exited()));
    }
}

async fn pipe_output(
    stream: OutputStream,
    pid: Option<u32>,
    activity: mpsc::UnboundedSender<()>,
) {
    let OutputStream { kind, reader } = stream;
    let mut lines = BufReader::new(reader).lines();
    let mut announced = false;

    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if !announced {
                    announced = true;
                    let _ = activity.send(());
                }
                match kind {
                    StreamKind::Stdout => {
                        info!(target: "backend::stdout", pid = ?pid, "{line}")
                    }
                    StreamKind::Stderr => {
                        warn!(target: "backend::stderr", pid = ?pid, "{line}")
                    }
                }
            }
            Ok(None) => break,
            Err(err) => {
                debug!(pid = ?pid, error = %err, "backend output stream closed");
                break;
            }
        }
    }
}
