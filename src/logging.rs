//! Level-filtered logging facade.
//!
//! Mirrors the source library's global logger: a small set of sinks, each
//! independently enabled with a floor level, receiving formatted events. The
//! sink itself is a trait (per the source's own design note that a rewrite
//! should expose an explicit sink trait) so tests can install a capturing
//! sink instead of redirecting real stdout or a real file.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::sync::Mutex;

use time::OffsetDateTime;

/// Severity of a log event, from most to least verbose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
            LogLevel::Fatal => "FATAL",
        };
        f.write_str(name)
    }
}

/// A single emitted log event, handed to every enabled, passing [`Sink`].
#[derive(Debug, Clone)]
pub struct LogRecord {
    pub level: LogLevel,
    pub message: String,
    pub timestamp: OffsetDateTime,
}

impl fmt::Display for LogRecord {
    /// Renders as `<timestamp> [<LEVEL>] <message>`, the textual form
    /// written to the standard-output and file sinks.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stamp = self
            .timestamp
            .format(&time::format_description::well_known::Rfc3339)
            .unwrap_or_else(|_| String::from("<unformattable timestamp>"));
        write!(f, "{stamp} [{}] {}", self.level, self.message)
    }
}

/// A destination for filtered log records.
///
/// Implementors decide how to render and deliver a [`LogRecord`]; the
/// [`Logger`] facade only decides *whether* a sink should see it.
pub trait Sink: Send {
    fn emit(&mut self, record: &LogRecord);
}

/// Writes formatted records to the process's standard output.
#[derive(Default)]
pub struct StdoutSink;

impl Sink for StdoutSink {
    fn emit(&mut self, record: &LogRecord) {
        println!("{record}");
    }
}

/// Appends formatted records to a file, opening (and creating) it lazily on
/// the first emitted record.
pub struct FileSink {
    path: std::path::PathBuf,
    file: Option<File>,
}

impl FileSink {
    pub fn new(path: impl Into<std::path::PathBuf>) -> Self {
        Self { path: path.into(), file: None }
    }

    fn file(&mut self) -> std::io::Result<&mut File> {
        if self.file.is_none() {
            self.file = Some(OpenOptions::new().create(true).append(true).open(&self.path)?);
        }
        Ok(self.file.as_mut().expect("just initialized"))
    }
}

impl Sink for FileSink {
    fn emit(&mut self, record: &LogRecord) {
        let message = format!("{record}\n");
        if let Ok(file) = self.file() {
            // Best-effort: a logging facade must never panic the caller's
            // allocation path over a write failure.
            let _ = file.write_all(message.as_bytes());
        }
    }
}

struct SinkSlot {
    sink: Option<Box<dyn Sink>>,
    floor: LogLevel,
    enabled: bool,
}

impl SinkSlot {
    const fn empty() -> Self {
        SinkSlot { sink: None, floor: LogLevel::Fatal, enabled: false }
    }
}

/// The process-wide logging facade: a small, fixed set of named sink slots,
/// each independently enabled with a floor level.
pub struct Logger {
    stdout: SinkSlot,
    file: SinkSlot,
}

impl Logger {
    const fn new() -> Self {
        Logger { stdout: SinkSlot::empty(), file: SinkSlot::empty() }
    }

    pub fn enable_stdout(&mut self, floor: LogLevel) {
        self.stdout = SinkSlot { sink: Some(Box::new(StdoutSink)), floor, enabled: true };
    }

    pub fn disable_stdout(&mut self) {
        self.stdout.enabled = false;
    }

    pub fn enable_file(&mut self, path: impl Into<std::path::PathBuf>, floor: LogLevel) {
        self.file = SinkSlot { sink: Some(Box::new(FileSink::new(path))), floor, enabled: true };
    }

    /// Disables file logging and releases the underlying file descriptor
    /// by dropping the sink outright, rather than just flipping a flag.
    pub fn disable_file(&mut self) {
        self.file = SinkSlot::empty();
    }

    /// Installs an arbitrary sink in the stdout slot (used by tests to
    /// install a [`CapturingSink`] without touching real stdout).
    #[cfg(test)]
    pub(crate) fn install_stdout_sink(&mut self, sink: Box<dyn Sink>, floor: LogLevel) {
        self.stdout = SinkSlot { sink: Some(sink), floor, enabled: true };
    }

    pub fn log(&mut self, level: LogLevel, message: impl Into<String>) {
        let record =
            LogRecord { level, message: message.into(), timestamp: now() };
        for slot in [&mut self.stdout, &mut self.file] {
            if slot.enabled && record.level >= slot.floor {
                if let Some(sink) = slot.sink.as_deref_mut() {
                    sink.emit(&record);
                }
            }
        }
    }
}

fn now() -> OffsetDateTime {
    OffsetDateTime::now_utc()
}

static LOGGER: Mutex<Logger> = Mutex::new(Logger::new());

/// Runs `f` with exclusive access to the process-wide [`Logger`].
pub fn with_logger<R>(f: impl FnOnce(&mut Logger) -> R) -> R {
    let mut guard = LOGGER.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    f(&mut guard)
}

/// Enable logging to standard output at the given floor level.
pub fn enable_stdout(floor: LogLevel) {
    with_logger(|logger| logger.enable_stdout(floor));
}

/// Disable standard-output logging.
pub fn disable_stdout() {
    with_logger(Logger::disable_stdout);
}

/// Enable logging to a file, created or appended to at `path`.
pub fn enable_file(path: impl Into<std::path::PathBuf>, floor: LogLevel) {
    with_logger(|logger| logger.enable_file(path, floor));
}

/// Disable file logging, releasing the underlying file descriptor.
pub fn disable_file() {
    with_logger(Logger::disable_file);
}

/// Emit a log event through whichever sinks are currently enabled.
pub fn log(level: LogLevel, message: impl Into<String>) {
    with_logger(|logger| logger.log(level, message));
}

/// A [`Sink`] that records every record it receives, for test assertions.
#[cfg(test)]
pub(crate) struct CapturingSink {
    pub records: std::sync::Arc<Mutex<Vec<LogRecord>>>,
}

#[cfg(test)]
impl Sink for CapturingSink {
    fn emit(&mut self, record: &LogRecord) {
        self.records.lock().unwrap().push(record.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    /// Serializes tests below: they all mutate the single process-wide
    /// [`LOGGER`], so running them concurrently would cross-contaminate.
    fn logging_test_lock() -> std::sync::MutexGuard<'static, ()> {
        static LOCK: Mutex<()> = Mutex::new(());
        LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    #[test]
    fn floor_filters_out_lower_levels() {
        let _guard = logging_test_lock();
        let records = Arc::new(Mutex::new(Vec::new()));
        with_logger(|logger| {
            logger.install_stdout_sink(
                Box::new(CapturingSink { records: records.clone() }),
                LogLevel::Warn,
            );
            logger.disable_file();
        });

        log(LogLevel::Debug, "should be filtered");
        log(LogLevel::Info, "should be filtered");
        log(LogLevel::Warn, "should pass");
        log(LogLevel::Error, "should pass");

        let seen = records.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].message, "should pass");
        assert_eq!(seen[1].message, "should pass");

        with_logger(Logger::disable_stdout);
    }

    #[test]
    fn disabling_a_sink_stops_delivery() {
        let _guard = logging_test_lock();
        let records = Arc::new(Mutex::new(Vec::new()));
        with_logger(|logger| {
            logger.install_stdout_sink(
                Box::new(CapturingSink { records: records.clone() }),
                LogLevel::Debug,
            );
        });

        log(LogLevel::Info, "seen");
        with_logger(Logger::disable_stdout);
        log(LogLevel::Info, "not seen");

        let seen = records.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].message, "seen");
    }

    #[test]
    fn enabling_file_logging_twice_appends() {
        let _guard = logging_test_lock();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pool.log");

        with_logger(|logger| {
            logger.enable_file(&path, LogLevel::Debug);
            logger.log(LogLevel::Info, "first line");
            logger.disable_file();

            logger.enable_file(&path, LogLevel::Debug);
            logger.log(LogLevel::Info, "second line");
            logger.disable_file();
        });

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("first line"));
        assert!(contents.contains("second line"));
    }
}
