//! The Courier desktop shell.
//!
//! The shell owns a local backend service and a sandboxed presentation
//! layer. It launches the backend through the [`supervisor`], holds the UI
//! back until the [`readiness`] gate sees the backend answer, and keeps the
//! application current through the [`updates`] coordinator. The UI can only
//! reach the shell through the bridge types in `courier-contracts`, carried
//! by a [`presentation`] surface. [`shell::Shell`] ties these together.

pub mod logging;
pub mod presentation;
pub mod readiness;
pub mod shell;
pub mod supervisor;
pub mod updates;

pub use presentation::{
    EventSink, JsonLinesSurface, PresentationError, PresentationSurface,
    WindowSpec, read_commands,
};
pub use readiness::{HealthProbe, HttpHealthProbe, Readiness, ReadinessGate};
pub use shell::{Shell, ShellBuilder, ShellError, ShellExit};
pub use supervisor::{
    BackendHandle, BackendState, Supervisor, SupervisorError,
    SupervisorNotice, TerminationOutcome,
};
