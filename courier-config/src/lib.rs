//! Configuration for the Courier desktop shell.
//!
//! Values are composed from a TOML file, a `.env` file and the process
//! environment on top of built-in defaults, then checked by guard rails
//! before the shell sees them. The loader reports soft problems as
//! [`ConfigWarnings`] instead of failing so the binary can log them.

pub mod constants;
pub mod loader;
pub mod models;
pub mod validation;

pub use loader::{
    ConfigLoad, ConfigLoader, ConfigLoaderOptions, error::ConfigLoadError,
};
pub use models::sources::{EnvConfig, FileConfig};
pub use models::{
    BackendConfig, ConfigMetadata, DownloadPolicy, ReadinessConfig,
    ShellConfig, UpdateConfig, WindowConfig,
};
pub use validation::{ConfigGuardRailError, ConfigWarning, ConfigWarnings};
