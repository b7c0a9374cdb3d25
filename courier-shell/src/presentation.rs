//! Presentation layer boundary.
//!
//! The shell never hands process or filesystem primitives to the UI. It
//! talks to it through a [`PresentationSurface`] and accepts only the
//! [`ShellCommand`]s in the contracts crate. The binary speaks JSON lines:
//! frames go out on stdout, commands come in on stdin.

use async_trait::async_trait;
use courier_config::WindowConfig;
use courier_contracts::{ShellCommand, ShellEvent};
use serde::Serialize;
use thiserror::Error;
use tokio::io::{
    AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader,
};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum PresentationError {
    #[error("failed to write to the presentation layer")]
    Io(#[from] std::io::Error),
    #[error("failed to encode presentation frame")]
    Encode(#[from] serde_json::Error),
    #[error("presentation layer is closed")]
    Closed,
}

/// Outbound half handed to components that only publish bridge events.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: ShellEvent);
}

/// The window the shell asks the presentation layer to open.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WindowSpec {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub entry: String,
}

impl From<&WindowConfig> for WindowSpec {
    fn from(config: &WindowConfig) -> Self {
        Self {
            title: config.title.clone(),
            width: config.width,
            height: config.height,
            entry: config.entry.clone(),
        }
    }
}

#[async_trait]
pub trait PresentationSurface: EventSink {
    async fn open_window(
        &self,
        spec: &WindowSpec,
    ) -> Result<(), PresentationError>;

    /// Blocking dialog: resolves once the message has been delivered.
    async fn show_error_box(
        &self,
        title: &str,
        message: &str,
    ) -> Result<(), PresentationError>;

    /// Non-blocking notification.
    fn notify(&self, title: &str, body: &str);
}

/// Wire frames written by [`JsonLinesSurface`], one JSON object per line.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SurfaceFrame {
    OpenWindow(WindowSpec),
    ErrorBox { title: String, message: String },
    Notification { title: String, body: String },
    Event(ShellEvent),
}

struct Outbound {
    frame: SurfaceFrame,
    ack: Option<oneshot::Sender<Result<(), PresentationError>>>,
}

/// Surface that serialises frames onto any writer from a dedicated task.
#[derive(Debug, Clone)]
pub struct JsonLinesSurface {
    frames: mpsc::UnboundedSender<Outbound>,
}

impl std::fmt::Debug for Outbound {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Outbound")
            .field("frame", &self.frame)
            .field("acked", &self.ack.is_some())
            .finish()
    }
}

impl JsonLinesSurface {
    /// Start the writer task. Must be called from within a tokio runtime.
    pub fn spawn<W>(writer: W) -> Self
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (frames, rx) = mpsc::unbounded_channel();
        tokio::spawn(write_frames(writer, rx));
        Self { frames }
    }

    fn send(&self, frame: SurfaceFrame) {
        if self.frames.send(Outbound { frame, ack: None }).is_err() {
            debug!("presentation writer stopped; dropping frame");
        }
    }

    async fn send_acked(
        &self,
        frame: SurfaceFrame,
    ) -> Result<(), PresentationError> {
        let (ack, delivered) = oneshot::channel();
        self.frames
            .send(Outbound {
                frame,
                ack: Some(ack),
            })
            .map_err(|_| PresentationError::Closed)?;
        delivered.await.map_err(|_| PresentationError::Closed)?
    }
}

impl EventSink for JsonLinesSurface {
    fn emit(&self, event: ShellEvent) {
        self.send(SurfaceFrame::Event(event));
    }
}

#[async_trait]
impl PresentationSurface for JsonLinesSurface {
    async fn open_window(
        &self,
        spec: &WindowSpec,
    ) -> Result<(), PresentationError> {
        self.send_acked(SurfaceFrame::OpenWindow(spec.clone())).await
    }

    async fn show_error_box(
        &self,
        title: &str,
        message: &str,
    ) -> Result<(), PresentationError> {
        self.send_acked(SurfaceFrame::ErrorBox {
            title: title.to_string(),
            message: message.to_string(),
        })
        .await
    }

    fn notify(&self, title: &str, body: &str) {
        self.send(SurfaceFrame::Notification {
            title: title.to_string(),
            body: body.to_string(),
        });
    }
}

async fn write_frames<W>(
    mut writer: W,
    mut frames: mpsc::UnboundedReceiver<Outbound>,
) where
    W: AsyncWrite + Unpin,
{
    while let Some(Outbound { frame, ack }) = frames.recv().await {
        let result = write_frame(&mut writer, &frame).await;
        match ack {
            Some(ack) => {
                let _ = ack.send(result);
            }
            None => {
                if let Err(err) = result {
                    warn!(error = %err, "failed to deliver presentation frame");
                }
            }
        }
    }
}

async fn write_frame<W>(
    writer: &mut W,
    frame: &SurfaceFrame,
) -> Result<(), PresentationError>
where
    W: AsyncWrite + Unpin,
{
    let mut line = serde_json::to_vec(frame)?;
    line.push(b'\n');
    writer.write_all(&line).await?;
    writer.flush().await?;
    Ok(())
}

/// Forward JSON-lines commands from `reader` until EOF.
///
/// Lines that are not a known [`ShellCommand`] are logged and dropped.
/// Returning drops `commands`, which the shell reads as the presentation
/// layer going away.
pub async fn read_commands<R>(reader: R, commands: mpsc::Sender<ShellCommand>)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(err) => {
                warn!(error = %err, "failed to read from presentation layer");
                break;
            }
        };

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        match serde_json::from_str::<ShellCommand>(trimmed) {
            Ok(command) => {
                debug!(%command, "received command");
                if commands.send(command).await.is_err() {
                    break;
                }
            }
            Err(err) => {
                warn!(error = %err, line = trimmed, "rejected unknown command");
            }
        }
    }
    info!("presentation command stream closed");
}
