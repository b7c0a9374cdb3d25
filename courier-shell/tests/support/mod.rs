//! Fakes shared by the shell scenario tests.
#![allow(dead_code)]

use std::io;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use courier_config::{ConfigLoader, EnvConfig, ShellConfig};
use courier_contracts::ShellEvent;
use courier_shell::presentation::{
    EventSink, PresentationError, PresentationSurface, WindowSpec,
};
use courier_shell::readiness::{HealthProbe, ProbeError};
use courier_shell::supervisor::{
    BackendProcess, ExitReport, LaunchSpec, OutputStream, ProcessLauncher,
    StreamKind,
};
use courier_shell::updates::{
    UpdateEventSender, UpdateService, UpdateServiceError, UpdateServiceEvent,
};
use parking_lot::Mutex;
use tokio::sync::{Notify, mpsc};
use tokio::time::Instant;

pub const FAKE_PID: u32 = 7001;

/// Resolved development-build configuration rooted at `base_dir`.
pub fn shell_config(base_dir: &Path, updates: bool) -> ShellConfig {
    let env = EnvConfig {
        base_dir: Some(base_dir.to_path_buf()),
        updates_enabled: Some(updates),
        update_manifest_url: Some(
            "http://127.0.0.1:9/courier/manifest.json".to_string(),
        ),
        ..EnvConfig::default()
    };
    ConfigLoader::new()
        .with_packaged(false)
        .with_env(env)
        .load()
        .expect("config loads")
        .config
}

/// Put a placeholder executable where the supervisor will look for it.
pub fn install_backend(config: &ShellConfig) {
    let path = config
        .backend
        .base_dir
        .join(&config.backend.development_path);
    std::fs::create_dir_all(path.parent().expect("parent"))
        .expect("create backend dir");
    std::fs::write(&path, b"#!/bin/sh\n").expect("write backend");
}

#[derive(Debug, Default)]
pub struct SignalLog {
    pub graceful: AtomicUsize,
    pub forceful: AtomicUsize,
}

/// Backend that prints one line, then runs until told to exit or until it
/// receives the graceful signal.
pub struct FakeProcess {
    exit_tx: mpsc::UnboundedSender<ExitReport>,
    exit_rx: mpsc::UnboundedReceiver<ExitReport>,
    exited: bool,
    output: Option<&'static [u8]>,
    signals: Arc<SignalLog>,
}

fn already_exited() -> io::Error {
    io::Error::new(io::ErrorKind::NotFound, "no such process")
}

#[async_trait]
impl BackendProcess for FakeProcess {
    fn pid(&self) -> Option<u32> {
        Some(FAKE_PID)
    }

    fn take_output(&mut self) -> Vec<OutputStream> {
        self.output
            .take()
            .map(|bytes| OutputStream {
                kind: StreamKind::Stdout,
                reader: Box::new(bytes),
            })
            .into_iter()
            .collect()
    }

    async fn wait(&mut self) -> io::Result<ExitReport> {
        match self.exit_rx.recv().await {
            Some(report) => {
                self.exited = true;
                Ok(report)
            }
            None => std::future::pending().await,
        }
    }

    fn signal_graceful(&mut self) -> io::Result<()> {
        if self.exited {
            return Err(already_exited());
        }
        self.signals.graceful.fetch_add(1, Ordering::SeqCst);
        let _ = self.exit_tx.send(ExitReport { code: Some(0) });
        Ok(())
    }

    fn signal_forceful(&mut self) -> io::Result<()> {
        if self.exited {
            return Err(already_exited());
        }
        self.signals.forceful.fetch_add(1, Ordering::SeqCst);
        let _ = self.exit_tx.send(ExitReport { code: None });
        Ok(())
    }
}

/// Handle the test keeps to drive and inspect the fake backend.
#[derive(Debug, Clone)]
pub struct BackendControl {
    exit: mpsc::UnboundedSender<ExitReport>,
    pub signals: Arc<SignalLog>,
}

impl BackendControl {
    pub fn exit_with(&self, code: i32) {
        self.exit
            .send(ExitReport { code: Some(code) })
            .expect("backend still observed");
    }
}

#[derive(Default)]
pub struct FakeLauncher {
    process: Mutex<Option<Box<dyn BackendProcess>>>,
    launches: AtomicUsize,
}

impl FakeLauncher {
    pub fn with_backend() -> (Arc<Self>, BackendControl) {
        let signals = Arc::new(SignalLog::default());
        let (exit_tx, exit_rx) = mpsc::unbounded_channel();
        let process = FakeProcess {
            exit_tx: exit_tx.clone(),
            exit_rx,
            exited: false,
            output: Some(b"INFO:     Uvicorn running on http://127.0.0.1:8000\n"),
            signals: Arc::clone(&signals),
        };
        let launcher = Arc::new(Self {
            process: Mutex::new(Some(Box::new(process))),
            launches: AtomicUsize::new(0),
        });
        (
            launcher,
            BackendControl {
                exit: exit_tx,
                signals,
            },
        )
    }

    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }
}

impl ProcessLauncher for FakeLauncher {
    fn launch(&self, _spec: &LaunchSpec) -> io::Result<Box<dyn BackendProcess>> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        self.process
            .lock()
            .take()
            .ok_or_else(|| io::Error::other("no backend scripted"))
    }
}

/// Health probe answering from a script; the last entry repeats.
#[derive(Debug)]
pub struct ScriptedProbe {
    statuses: Vec<u16>,
    calls: AtomicUsize,
}

impl ScriptedProbe {
    pub fn new(statuses: impl Into<Vec<u16>>) -> Self {
        Self {
            statuses: statuses.into(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HealthProbe for ScriptedProbe {
    async fn probe(&self) -> Result<u16, ProbeError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let status = self
            .statuses
            .get(call)
            .or(self.statuses.last())
            .copied()
            .unwrap_or(503);
        Ok(status)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SurfaceCall {
    OpenWindow(WindowSpec),
    ErrorBox { title: String, message: String },
    Notify { title: String, body: String },
    Event(ShellEvent),
}

/// Presentation surface that records every call.
#[derive(Debug, Default)]
pub struct RecordingSurface {
    calls: Mutex<Vec<SurfaceCall>>,
    window_opened_at: Mutex<Option<Instant>>,
    changed: Notify,
}

impl RecordingSurface {
    fn record(&self, call: SurfaceCall) {
        self.calls.lock().push(call);
        self.changed.notify_waiters();
    }

    pub fn calls(&self) -> Vec<SurfaceCall> {
        self.calls.lock().clone()
    }

    pub fn events(&self) -> Vec<ShellEvent> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                SurfaceCall::Event(event) => Some(event.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn window_opened_at(&self) -> Option<Instant> {
        *self.window_opened_at.lock()
    }

    /// Resolve once the recorded calls satisfy `predicate`.
    pub async fn wait_until<F>(&self, predicate: F)
    where
        F: Fn(&[SurfaceCall]) -> bool,
    {
        let wait = async {
            loop {
                let changed = self.changed.notified();
                if predicate(&self.calls.lock()) {
                    return;
                }
                changed.await;
            }
        };
        tokio::time::timeout(Duration::from_secs(300), wait)
            .await
            .expect("surface never reached the expected state");
    }

    pub async fn wait_for_event(&self, expected: ShellEvent) {
        self.wait_until(|calls| {
            calls.contains(&SurfaceCall::Event(expected.clone()))
        })
        .await;
    }
}

impl EventSink for RecordingSurface {
    fn emit(&self, event: ShellEvent) {
        self.record(SurfaceCall::Event(event));
    }
}

#[async_trait]
impl PresentationSurface for RecordingSurface {
    async fn open_window(&self, spec: &WindowSpec) -> Result<(), PresentationError> {
        *self.window_opened_at.lock() = Some(Instant::now());
        self.record(SurfaceCall::OpenWindow(spec.clone()));
        Ok(())
    }

    async fn show_error_box(
        &self,
        title: &str,
        message: &str,
    ) -> Result<(), PresentationError> {
        self.record(SurfaceCall::ErrorBox {
            title: title.to_string(),
            message: message.to_string(),
        });
        Ok(())
    }

    fn notify(&self, title: &str, body: &str) {
        self.record(SurfaceCall::Notify {
            title: title.to_string(),
            body: body.to_string(),
        });
    }
}

/// Update service that finds `version` and downloads it in four ticks.
#[derive(Debug)]
pub struct FakeUpdateService {
    version: String,
    progress: Vec<f64>,
    events: Mutex<Option<UpdateEventSender>>,
    checked_at: Mutex<Option<Instant>>,
    backend: Mutex<Option<Arc<SignalLog>>>,
    graceful_at_install: Mutex<Option<usize>>,
    pub checks: AtomicUsize,
    pub downloads: AtomicUsize,
    pub installs: AtomicUsize,
}

impl FakeUpdateService {
    pub fn offering(version: &str) -> Arc<Self> {
        Arc::new(Self {
            version: version.to_string(),
            progress: vec![0.0, 25.0, 60.0, 100.0],
            events: Mutex::new(None),
            checked_at: Mutex::new(None),
            backend: Mutex::new(None),
            graceful_at_install: Mutex::new(None),
            checks: AtomicUsize::new(0),
            downloads: AtomicUsize::new(0),
            installs: AtomicUsize::new(0),
        })
    }

    /// Factory for `ShellBuilder::with_update_service`.
    pub fn factory(
        self: &Arc<Self>,
    ) -> impl FnOnce(UpdateEventSender) -> Arc<dyn UpdateService> + 'static {
        let service = Arc::clone(self);
        move |events| {
            *service.events.lock() = Some(events);
            service as Arc<dyn UpdateService>
        }
    }

    pub fn checked_at(&self) -> Option<Instant> {
        *self.checked_at.lock()
    }

    /// Record the backend's graceful signal count when the installer runs.
    pub fn observe_backend(&self, signals: &Arc<SignalLog>) {
        *self.backend.lock() = Some(Arc::clone(signals));
    }

    pub fn graceful_at_install(&self) -> Option<usize> {
        *self.graceful_at_install.lock()
    }

    fn emit(&self, event: UpdateServiceEvent) {
        if let Some(events) = self.events.lock().as_ref() {
            let _ = events.send(event);
        }
    }
}

#[async_trait]
impl UpdateService for FakeUpdateService {
    async fn check_for_updates(&self) -> Result<(), UpdateServiceError> {
        self.checks.fetch_add(1, Ordering::SeqCst);
        *self.checked_at.lock() = Some(Instant::now());
        self.emit(UpdateServiceEvent::Checking);
        self.emit(UpdateServiceEvent::Available {
            version: self.version.clone(),
        });
        Ok(())
    }

    async fn download_update(&self) -> Result<(), UpdateServiceError> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        for percent in &self.progress {
            self.emit(UpdateServiceEvent::Progress { percent: *percent });
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        self.emit(UpdateServiceEvent::Downloaded {
            version: self.version.clone(),
        });
        Ok(())
    }

    async fn quit_and_install(&self) -> Result<(), UpdateServiceError> {
        self.installs.fetch_add(1, Ordering::SeqCst);
        if let Some(signals) = self.backend.lock().as_ref() {
            *self.graceful_at_install.lock() =
                Some(signals.graceful.load(Ordering::SeqCst));
        }
        Ok(())
    }
}
