//! Application startup utilities module.

mod logging;
mod shutdown;

pub use logging::{LOG_FILE_NAME, LogRotation, LoggingConfig, LoggingGuard, init_logging};
pub use shutdown::{drain_tasks, install_signal_handler};
