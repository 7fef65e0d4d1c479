use std::sync::{Arc, OnceLock};

/// Receives log records emitted by the policy core.
///
/// Implemented on the host side (Kotlin on a managed Android device) and
/// installed once with [`set_logger`].
///
/// # Examples
///
/// ```rust
/// use policykit_core::logger::{LogLevel, Logger};
///
/// struct StderrLogger;
///
/// impl Logger for StderrLogger {
///     fn log(&self, level: LogLevel, message: String) {
///         eprintln!("[{level:?}] {message}");
///     }
/// }
/// ```
///
/// ## Kotlin
///
/// ```kotlin
/// object PolicyKitLogcat : Logger {
///     override fun log(level: LogLevel, message: String) {
///         when (level) {
///             LogLevel.ERROR -> Log.e("policykit", message)
///             LogLevel.WARN -> Log.w("policykit", message)
///             else -> Log.i("policykit", message)
///         }
///     }
/// }
///
/// // Application.onCreate, once per process
/// setLogger(PolicyKitLogcat)
/// ```
#[uniffi::export(with_foreign)]
pub trait Logger: Sync + Send {
    /// Logs `message` at `level`.
    fn log(&self, level: LogLevel, message: String);
}

/// Severity of a forwarded log record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, uniffi::Enum)]
pub enum LogLevel {
    /// Very detailed tracing output.
    Trace,
    /// Debugging information.
    Debug,
    /// Progress of policy transitions and device actions.
    Info,
    /// Denied or partially applied actions.
    Warn,
    /// Failures that were reported back to the caller.
    Error,
}

/// `log::Log` implementation that forwards to the installed [`Logger`].
struct ForeignLogger;

impl log::Log for ForeignLogger {
    fn enabled(&self, _metadata: &log::Metadata) -> bool {
        true
    }

    fn log(&self, record: &log::Record) {
        if !should_forward(record.level(), record.module_path()) {
            return;
        }

        if let Some(logger) = LOGGER_INSTANCE.get() {
            logger.log(log_level(record.level()), format!("{}", record.args()));
        } else {
            eprintln!("Logger not set: {}", record.args());
        }
    }

    fn flush(&self) {}
}

/// Debug and trace records are only forwarded when they come from this crate.
fn should_forward(level: log::Level, module_path: Option<&str>) -> bool {
    let from_policykit = module_path.is_some_and(|path| path.starts_with("policykit"));
    let verbose = matches!(level, log::Level::Debug | log::Level::Trace);
    from_policykit || !verbose
}

const fn log_level(level: log::Level) -> LogLevel {
    match level {
        log::Level::Error => LogLevel::Error,
        log::Level::Warn => LogLevel::Warn,
        log::Level::Info => LogLevel::Info,
        log::Level::Debug => LogLevel::Debug,
        log::Level::Trace => LogLevel::Trace,
    }
}

static LOGGER_INSTANCE: OnceLock<Arc<dyn Logger>> = OnceLock::new();

/// Installs the process-wide logger.
///
/// Only the first call has an effect; later calls are reported and ignored.
#[uniffi::export]
pub fn set_logger(logger: Arc<dyn Logger>) {
    if LOGGER_INSTANCE.set(logger).is_err() {
        eprintln!("Logger already set");
    }

    if let Err(e) = init_logger() {
        eprintln!("Failed to set logger: {e}");
    }
}

fn init_logger() -> Result<(), log::SetLoggerError> {
    static LOGGER: ForeignLogger = ForeignLogger;
    log::set_logger(&LOGGER)?;
    log::set_max_level(log::LevelFilter::Trace);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbose_records_from_other_crates_are_dropped() {
        assert!(!should_forward(log::Level::Debug, Some("hyper::client")));
        assert!(!should_forward(log::Level::Trace, None));
        assert!(should_forward(
            log::Level::Debug,
            Some("policykit_core::agent")
        ));
        assert!(should_forward(log::Level::Warn, Some("hyper::client")));
    }

    #[test]
    fn levels_map_one_to_one() {
        assert_eq!(log_level(log::Level::Error), LogLevel::Error);
        assert_eq!(log_level(log::Level::Trace), LogLevel::Trace);
    }
}
