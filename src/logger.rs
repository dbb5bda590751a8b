//! Asynchronous logger.
//!
//! Producers on any thread format a fixed-size [`Record`] and `try_push` it
//! onto a bounded MPMC queue; a single background thread drains the queue,
//! batches records into an output buffer, and flushes to the configured
//! sinks. A full queue drops the record and counts the drop, so logging
//! never blocks a worker.
//!
//! Installed process-wide through the `log` facade: call
//! [`init`]/[`Builder::init`] once, then use `log::info!` and friends.

use std::fmt::{self, Write as _};
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use log::{LevelFilter, Log, Metadata};

use crate::error::Error;
use crate::metrics;
use crate::queue::BoundedQueue;

/// Fixed size of one formatted record. Longer lines are truncated.
pub const RECORD_SIZE: usize = 128;

/// Default capacity of the log queue.
pub const DEFAULT_LOG_QUEUE_CAPACITY: u64 = 1024;

const FLUSH_THRESHOLD: usize = RECORD_SIZE * 64;
const IDLE_SLEEP: Duration = Duration::from_micros(10);

/// One formatted log line. Fixed-size so records move through the queue
/// without touching the allocator.
pub(crate) struct Record {
    data: [u8; RECORD_SIZE],
    len: usize,
}

impl Record {
    fn format(level: log::Level, target: &str, args: &fmt::Arguments) -> Record {
        let mut record = Record {
            data: [0; RECORD_SIZE],
            len: 0,
        };
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();

        let mut sink = TruncWriter {
            buf: &mut record.data,
            len: 0,
        };
        let _ = writeln!(
            sink,
            "{}.{:03} {:5} {} {}",
            now.as_secs(),
            now.subsec_millis(),
            level,
            target,
            args
        );
        record.len = sink.len;
        // A truncated line still terminates cleanly.
        if record.len > 0 && record.data[record.len - 1] != b'\n' {
            record.data[record.len - 1] = b'\n';
        }
        record
    }

    fn as_bytes(&self) -> &[u8] {
        &self.data[..self.len]
    }
}

/// `fmt::Write` sink over a fixed buffer; excess bytes are discarded.
struct TruncWriter<'a> {
    buf: &'a mut [u8],
    len: usize,
}

impl fmt::Write for TruncWriter<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let available = self.buf.len() - self.len;
        let n = s.len().min(available);
        self.buf[self.len..self.len + n].copy_from_slice(&s.as_bytes()[..n]);
        self.len += n;
        Ok(())
    }
}

struct AsyncLogger {
    queue: Arc<BoundedQueue<Record>>,
    level: LevelFilter,
}

impl Log for AsyncLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &log::Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let accepted = self
            .queue
            .try_push(Record::format(record.level(), record.target(), record.args()));
        if !accepted {
            metrics::LOG_RECORDS_DROPPED.increment();
        }
    }

    fn flush(&self) {
        // Wait for the drain thread to catch up with what was queued.
        while !self.queue.is_empty() {
            thread::sleep(IDLE_SLEEP);
        }
    }
}

fn drain_loop(queue: Arc<BoundedQueue<Record>>, mut sinks: Vec<Box<dyn Write + Send>>) {
    let mut buf: Vec<u8> = Vec::with_capacity(FLUSH_THRESHOLD * 2);
    loop {
        let consumed = queue.try_consume_all(|record| buf.extend_from_slice(record.as_bytes()));
        if consumed == 0 {
            if !buf.is_empty() {
                flush_to(&mut sinks, &mut buf);
            }
            thread::sleep(IDLE_SLEEP);
        } else if buf.len() >= FLUSH_THRESHOLD {
            flush_to(&mut sinks, &mut buf);
        }
    }
}

fn flush_to(sinks: &mut [Box<dyn Write + Send>], buf: &mut Vec<u8>) {
    for sink in sinks.iter_mut() {
        let _ = sink.write_all(buf);
        let _ = sink.flush();
    }
    buf.clear();
}

/// Configure and install the process-wide async logger.
pub struct Builder {
    level: LevelFilter,
    queue_capacity: u64,
    file: Option<PathBuf>,
    truncate: bool,
}

impl Builder {
    pub fn new() -> Builder {
        Builder {
            level: LevelFilter::Info,
            queue_capacity: DEFAULT_LOG_QUEUE_CAPACITY,
            file: None,
            truncate: false,
        }
    }

    pub fn level(mut self, level: LevelFilter) -> Builder {
        self.level = level;
        self
    }

    /// Capacity of the record queue; must be a power of two.
    pub fn queue_capacity(mut self, capacity: u64) -> Builder {
        self.queue_capacity = capacity;
        self
    }

    /// Log to `path` instead of stderr. Appends unless `truncate`.
    pub fn file(mut self, path: impl AsRef<Path>, truncate: bool) -> Builder {
        self.file = Some(path.as_ref().to_path_buf());
        self.truncate = truncate;
        self
    }

    /// Install the logger and spawn its drain thread. May be called once
    /// per process.
    pub fn init(self) -> Result<(), Error> {
        if !self.queue_capacity.is_power_of_two() {
            return Err(Error::LogSetup(
                "log queue capacity must be a power of two".into(),
            ));
        }

        let sink: Box<dyn Write + Send> = match &self.file {
            Some(path) => {
                let mut options = OpenOptions::new();
                options.create(true);
                if self.truncate {
                    options.write(true).truncate(true);
                } else {
                    options.append(true);
                }
                let file = options
                    .open(path)
                    .map_err(|e| Error::LogSetup(format!("{}: {e}", path.display())))?;
                Box::new(file)
            }
            None => Box::new(io::stderr()),
        };

        let queue = Arc::new(BoundedQueue::new(self.queue_capacity));
        let logger = AsyncLogger {
            queue: Arc::clone(&queue),
            level: self.level,
        };

        log::set_boxed_logger(Box::new(logger)).map_err(|e| Error::LogSetup(e.to_string()))?;
        log::set_max_level(self.level);

        thread::Builder::new()
            .name("ringherd-logger".to_string())
            .spawn(move || drain_loop(queue, vec![sink]))
            .map_err(Error::Io)?;
        Ok(())
    }
}

impl Default for Builder {
    fn default() -> Self {
        Builder::new()
    }
}

/// Install the logger with defaults (info level, stderr sink).
pub fn init() -> Result<(), Error> {
    Builder::new().init()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_carries_level_target_and_message() {
        let record = Record::format(log::Level::Info, "ringherd::server", &format_args!("up"));
        let line = std::str::from_utf8(record.as_bytes()).unwrap();
        assert!(line.ends_with('\n'));
        assert!(line.contains("INFO"));
        assert!(line.contains("ringherd::server"));
        assert!(line.contains("up"));
    }

    #[test]
    fn oversized_record_truncates_with_newline() {
        let long = "x".repeat(RECORD_SIZE * 2);
        let record = Record::format(log::Level::Debug, "t", &format_args!("{long}"));
        assert_eq!(record.as_bytes().len(), RECORD_SIZE);
        assert_eq!(*record.as_bytes().last().unwrap(), b'\n');
    }

    #[test]
    fn full_queue_drops_instead_of_blocking() {
        let queue = Arc::new(BoundedQueue::new(4));
        let logger = AsyncLogger {
            queue: Arc::clone(&queue),
            level: LevelFilter::Trace,
        };
        for _ in 0..8 {
            logger.log(
                &log::Record::builder()
                    .args(format_args!("spam"))
                    .level(log::Level::Info)
                    .target("test")
                    .build(),
            );
        }
        // Queue holds exactly its capacity; the rest were dropped.
        assert_eq!(queue.len(), 4);
    }
}
