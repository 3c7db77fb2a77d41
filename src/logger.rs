//! Logging infrastructure for lpc3230-bsp
//!
//! This module provides logging via the `log` crate. Lines are rendered into a
//! fixed-size buffer and handed to a board-provided [`LogSink`] (normally the
//! debug UART), prefixed with a timestamp from a registered tick source.

use core::fmt::{self, Write};
use log::{Level, LevelFilter, Metadata, Record};
use spin::Once;

/// Longest rendered log line; longer messages are truncated
const LINE_CAPACITY: usize = 256;

/// Marker appended to truncated lines
const TRUNCATED: &str = "...";

/// Destination for rendered log lines
pub trait LogSink: Sync {
    /// Write one complete line (including the line terminator)
    fn write_str(&self, s: &str);

    /// Whether the sink understands ANSI colour escapes
    fn ansi(&self) -> bool {
        true
    }
}

static SINK: Once<&'static dyn LogSink> = Once::new();

/// Tick source for timestamps (set during init)
static TIMESTAMP: Once<fn() -> u64> = Once::new();

/// Get the current timestamp, or 0 before a tick source is registered
pub fn get_timestamp() -> u64 {
    TIMESTAMP.get().map_or(0, |source| source())
}

/// Render one log line into `line`
///
/// Returns `false` if the line had to be truncated.
fn render<const N: usize>(
    line: &mut heapless::String<N>,
    ts: u64,
    level: Level,
    ansi: bool,
    args: &fmt::Arguments<'_>,
) -> bool {
    let level_str = if ansi {
        match level {
            Level::Error => "\x1b[31mERROR\x1b[0m",
            Level::Warn => "\x1b[33mWARN\x1b[0m ",
            Level::Info => "\x1b[32mINFO\x1b[0m ",
            Level::Debug => "\x1b[34mDEBUG\x1b[0m",
            Level::Trace => "\x1b[35mTRACE\x1b[0m",
        }
    } else {
        match level {
            Level::Error => "ERROR",
            Level::Warn => "WARN ",
            Level::Info => "INFO ",
            Level::Debug => "DEBUG",
            Level::Trace => "TRACE",
        }
    };

    line.clear();
    if write!(line, "[{:>10}] [{}] {}\r\n", ts, level_str, args).is_ok() {
        return true;
    }

    // Out of room: keep what fits and terminate the line explicitly
    let keep = N.saturating_sub(TRUNCATED.len() + 2);
    while line.len() > keep {
        line.pop();
    }
    let _ = line.push_str(TRUNCATED);
    let _ = line.push_str("\r\n");
    false
}

/// Logger writing to the registered sink
struct SinkLogger;

impl log::Log for SinkLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= Level::Trace
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let Some(sink) = SINK.get() else {
            return;
        };

        let mut line = heapless::String::<LINE_CAPACITY>::new();
        render(
            &mut line,
            get_timestamp(),
            record.level(),
            sink.ansi(),
            record.args(),
        );
        sink.write_str(&line);
    }

    fn flush(&self) {}
}

static LOGGER: SinkLogger = SinkLogger;

/// Initialize the logging subsystem
///
/// Installs the logger with `sink` as its output. Can only succeed once.
pub fn init(sink: &'static dyn LogSink) -> Result<(), log::SetLoggerError> {
    SINK.call_once(|| sink);
    log::set_logger(&LOGGER).map(|()| log::set_max_level(LevelFilter::Debug))
}

/// Register the tick source used for timestamps
pub fn set_timestamp_source(source: fn() -> u64) {
    TIMESTAMP.call_once(|| source);
}

/// Set the maximum log level
pub fn set_level(level: LevelFilter) {
    log::set_max_level(level);
}
