use log::{LevelFilter, Log, Metadata, Record, SetLoggerError};

/// Forwards `log` records to the console, one line per record.
pub struct KernelLogger;

static LOGGER: KernelLogger = KernelLogger;

impl Log for KernelLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        if record.level() <= log::Level::Warn {
            crate::eprintln!("[{:<5} {}] {}", record.level(), record.target(), record.args());
        } else {
            crate::println!("[{:<5} {}] {}", record.level(), record.target(), record.args());
        }
    }

    fn flush(&self) {}
}

/// Installs the console logger. Only the first call installs it; later calls
/// only adjust the level and report the original installation as an error.
pub fn init(level: LevelFilter) -> Result<(), SetLoggerError> {
    log::set_max_level(level);
    log::set_logger(&LOGGER)
}
