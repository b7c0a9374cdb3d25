//! Built-in defaults applied when neither the file nor the environment
//! provide a value.

use std::time::Duration;

pub const DEFAULT_BACKEND_HOST: &str = "127.0.0.1";
pub const DEFAULT_BACKEND_PORT: u16 = 8000;
pub const DEFAULT_BACKEND_STEM: &str = "run_server";
pub const DEFAULT_PACKAGED_DIR: &str = "resources/backend";
pub const DEFAULT_DEVELOPMENT_DIR: &str = "backend/dist";
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(5);

pub const DEFAULT_HEALTH_PATH: &str = "/health";
pub const DEFAULT_READY_MAX_ATTEMPTS: u32 = 30;
pub const DEFAULT_READY_INTERVAL: Duration = Duration::from_millis(1000);
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

pub const DEFAULT_UPDATE_CHECK_DELAY: Duration = Duration::from_secs(5);
pub const DEFAULT_STAGING_DIR_NAME: &str = "courier-updates";

pub const DEFAULT_WINDOW_TITLE: &str = "Courier";
pub const DEFAULT_WINDOW_WIDTH: u32 = 1200;
pub const DEFAULT_WINDOW_HEIGHT: u32 = 800;
pub const DEFAULT_WINDOW_ENTRY: &str = "index.html";

/// Environment keys the backend reads to pick its bind address.
pub const BACKEND_HOST_ENV: &str = "FASTAPI_HOST";
pub const BACKEND_PORT_ENV: &str = "FASTAPI_PORT";

/// Version reported to the update service when none is configured.
pub const SHELL_VERSION: &str = env!("CARGO_PKG_VERSION");
