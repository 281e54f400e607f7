use crate::console_trace;
use log::{LevelFilter, Log, Metadata, Record, SetLoggerError};

pub struct ConsoleLogger {
    max_level: LevelFilter,
}

impl ConsoleLogger {
    #[must_use]
    pub const fn new(max_level: LevelFilter) -> Self {
        Self { max_level }
    }

    #[must_use]
    pub const fn max_level(&self) -> LevelFilter {
        self.max_level
    }

    /// Install the logger. Call this once during boot.
    ///
    /// # Errors
    /// Fails if another logger was already installed; the kernel treats that
    /// as "already booted once in this process" and keeps the first one.
    pub fn init(self) -> Result<(), SetLoggerError> {
        let max_level = self.max_level;
        log::set_boxed_logger(Box::new(self))?;
        log::set_max_level(max_level);
        Ok(())
    }
}

impl Log for ConsoleLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.max_level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        console_trace!(
            "[{}] {}: {}\n",
            record.level(),
            record.target(),
            record.args()
        );
    }

    fn flush(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use log::Level;

    #[test]
    fn filters_by_level() {
        let logger = ConsoleLogger::new(LevelFilter::Info);
        let warn = Metadata::builder().level(Level::Warn).target("bcache").build();
        let debug = Metadata::builder().level(Level::Debug).target("bcache").build();
        assert!(logger.enabled(&warn));
        assert!(!logger.enabled(&debug));
    }

    #[test]
    fn off_disables_everything() {
        let logger = ConsoleLogger::new(LevelFilter::Off);
        let error = Metadata::builder().level(Level::Error).build();
        assert!(!logger.enabled(&error));
    }

    #[test]
    fn second_init_is_rejected() {
        // Other tests in this binary do not install a logger.
        assert!(ConsoleLogger::new(LevelFilter::Warn).init().is_ok());
        assert!(ConsoleLogger::new(LevelFilter::Trace).init().is_err());
        assert_eq!(log::max_level(), LevelFilter::Warn);
    }
}
