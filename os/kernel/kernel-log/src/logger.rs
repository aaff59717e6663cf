use crate::{LogSink, SinkWriter};
use log::{LevelFilter, Log, Metadata, Record, SetLoggerError};

pub struct KernelLogger<S: LogSink> {
    sink: S,
    max_level: LevelFilter,
}

impl<S: LogSink> KernelLogger<S> {
    #[must_use]
    pub const fn new(sink: S, max_level: LevelFilter) -> Self {
        Self { sink, max_level }
    }

    #[must_use]
    pub const fn max_level(&self) -> LevelFilter {
        self.max_level
    }

    #[must_use]
    pub const fn sink(&self) -> &S {
        &self.sink
    }

    /// Install as the global logger. Call this once during early init.
    ///
    /// # Errors
    /// Fails if another logger was installed first.
    pub fn init(&'static self) -> Result<(), SetLoggerError>
    where
        S: Send + Sync,
    {
        log::set_logger(self)?;
        log::set_max_level(self.max_level);
        Ok(())
    }
}

impl<S: LogSink + Send + Sync> Log for KernelLogger<S> {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.max_level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        // Best effort; a failing sink has nowhere to report to.
        let _ = core::fmt::write(
            &mut SinkWriter(&self.sink),
            format_args!(
                "[{}] {}: {}\n",
                record.level(),
                record.target(),
                record.args()
            ),
        );
    }

    fn flush(&self) {}
}
