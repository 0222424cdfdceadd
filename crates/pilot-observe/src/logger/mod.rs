//! Process-wide `tracing` setup.
//!
//! One call to [`logger_init`] at startup; the format decides the sink (stderr text, stderr
//! JSON, or the systemd journal when built with `journald`).

mod config;
mod error;
mod format;
mod log;

pub use config::LoggerConfig;
pub use error::LoggerError;
pub use format::LoggerFormat;

/// Install the global subscriber described by `cfg`.
///
/// The level directives are validated before anything is installed. A second call fails with
/// [`LoggerError::AlreadyInitialized`].
pub fn logger_init(cfg: &LoggerConfig) -> Result<(), LoggerError> {
    log::install(log::layer(cfg)?)?;
    tracing::debug!(format = %cfg.format, level = %cfg.level, "logger installed");
    Ok(())
}
