use std::io;
use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncRead;
use tokio::process::{Child, Command};

/// Everything needed to start the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
}

/// How the backend process ended. `code` is `None` when the process was
/// terminated by a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitReport {
    pub code: Option<i32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Stdout,
    Stderr,
}

/// One of the child's piped output streams.
pub struct OutputStream {
    pub kind: StreamKind,
    pub reader: Box<dyn AsyncRead + Send + Unpin>,
}

impl std::fmt::Debug for OutputStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputStream")
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

/// A running backend process as seen by the supervisor.
///
/// Signal methods report an already-exited process as
/// [`io::ErrorKind::NotFound`] or [`io::ErrorKind::InvalidInput`].
#[async_trait]
pub trait BackendProcess: Send {
    fn pid(&self) -> Option<u32>;

    /// Hand over the piped output streams. Later calls return nothing.
    fn take_output(&mut self) -> Vec<OutputStream>;

    /// Resolve once the process exits. Must be cancel safe.
    async fn wait(&mut self) -> io::Result<ExitReport>;

    /// Ask the process to shut down (SIGTERM on unix).
    fn signal_graceful(&mut self) -> io::Result<()>;

    /// Kill the process outright.
    fn signal_forceful(&mut self) -> io::Result<()>;
}

/// Starts backend processes.
pub trait ProcessLauncher: Send + Sync {
    fn launch(&self, spec: &LaunchSpec) -> io::Result<Box<dyn BackendProcess>>;
}

/// Launches real OS processes through `tokio::process`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioLauncher;

impl ProcessLauncher for TokioLauncher {
    fn launch(&self, spec: &LaunchSpec) -> io::Result<Box<dyn BackendProcess>> {
        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let child = command.spawn()?;
        Ok(Box::new(TokioBackend { child }))
    }
}

#[derive(Debug)]
struct TokioBackend {
    child: Child,
}

#[async_trait]
impl BackendProcess for TokioBackend {
    fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    fn take_output(&mut self) -> Vec<OutputStream> {
        let mut streams = Vec::with_capacity(2);
        if let Some(stdout) = self.child.stdout.take() {
            streams.push(OutputStream {
                kind: StreamKind::Stdout,
                reader: Box::new(stdout),
            });
        }
        if let Some(stderr) = self.child.stderr.take() {
            streams.push(OutputStream {
                kind: StreamKind::Stderr,
                reader: Box::new(stderr),
            });
        }
        streams
    }

    async fn wait(&mut self) -> io::Result<ExitReport> {
        let status = self.child.wait().await?;
        Ok(ExitReport {
            code: status.code(),
        })
    }

    fn signal_graceful(&mut self) -> io::Result<()> {
        let Some(pid) = self.child.id() else {
            return Err(already_exited());
        };
        send_terminate(pid)
    }

    fn signal_forceful(&mut self) -> io::Result<()> {
        self.child.start_kill()
    }
}

fn already_exited() -> io::Error {
    io::Error::new(io::ErrorKind::NotFound, "process has already exited")
}

#[cfg(unix)]
fn send_terminate(pid: u32) -> io::Result<()> {
    use nix::errno::Errno;
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    let raw = i32::try_from(pid).map_err(|_| {
        io::Error::new(io::ErrorKind::InvalidInput, "pid out of range")
    })?;
    match kill(Pid::from_raw(raw), Signal::SIGTERM) {
        Ok(()) => Ok(()),
        Err(Errno::ESRCH) => Err(already_exited()),
        Err(errno) => Err(io::Error::from(errno)),
    }
}

#[cfg(windows)]
fn send_terminate(pid: u32) -> io::Result<()> {
    // Without /F taskkill asks the process tree to close.
    let status = std::process::Command::new("taskkill")
        .args(["/PID", &pid.to_string(), "/T"])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()?;
    if status.success() {
        Ok(())
    } else {
        Err(io::Error::other(format!("taskkill exited with {status}")))
    }
}
