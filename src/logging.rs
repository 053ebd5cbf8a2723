use log::LevelFilter;

use crate::error::MergeError;

/// Log verbosity selected on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }

    /// `-q` wins over any number of `-v`; one `-v` is debug.
    pub fn from_flags(verbose: u8, quiet: bool) -> Self {
        match (quiet, verbose) {
            (true, _) => LogLevel::Error,
            (false, 0) => LogLevel::Info,
            (false, _) => LogLevel::Debug,
        }
    }
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Debug => LevelFilter::Debug,
            LogLevel::Info => LevelFilter::Info,
            LogLevel::Warn => LevelFilter::Warn,
            LogLevel::Error => LevelFilter::Error,
        }
    }
}

/// Initialize the stderr logger. `RUST_LOG`, when set, overrides `level`.
pub fn init_logging(level: LogLevel) {
    let result = env_logger::Builder::new()
        .filter_level(level.into())
        .parse_default_env()
        .format_timestamp_millis()
        .format_target(false)
        .try_init();
    if result.is_err() {
        eprintln!("Warning: Logging system already initialized");
    }
}

/// Log a merge failure at error level.
pub fn log_merge_error(error: &MergeError, context: Option<&str>) {
    match context {
        Some(ctx) => log::error!("{ctx}: {error}"),
        None => log::error!("{error}"),
    }
}

/// Result extension for convenient error logging
pub trait ResultExt<T, E> {
    fn log_error(self, context: Option<&str>) -> Self;
}

impl<T> ResultExt<T, MergeError> for Result<T, MergeError> {
    fn log_error(self, context: Option<&str>) -> Self {
        if let Err(ref error) = self {
            log_merge_error(error, context);
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn given_quiet_and_verbose_flags_when_resolving_level_then_quiet_wins() {
        assert_eq!(LogLevel::from_flags(2, true), LogLevel::Error);
        assert_eq!(LogLevel::from_flags(0, false), LogLevel::Info);
        assert_eq!(LogLevel::from_flags(1, false), LogLevel::Debug);
    }

    #[test]
    fn given_level_when_converting_then_filter_and_name_agree() {
        for level in [
            LogLevel::Debug,
            LogLevel::Info,
            LogLevel::Warn,
            LogLevel::Error,
        ] {
            let filter: LevelFilter = level.into();
            assert_eq!(filter.as_str().to_ascii_lowercase(), level.as_str());
        }
    }

    #[test]
    fn given_error_result_when_logging_then_result_is_passed_through() {
        let result: Result<(), MergeError> = Err(MergeError::EmptySkeleton);
        assert_eq!(
            result.log_error(Some("merge")),
            Err(MergeError::EmptySkeleton)
        );
    }
}
