use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Local;
use colored::Colorize as _;
use log::{Level, LevelFilter, Log, Metadata, Record};
use parking_lot::Mutex;

use crate::{Error, Result};

/// Lines between forced sink flushes
const FLUSH_EVERY: u64 = 64;

/// The brief log file name
pub const BRIEF_LOG: &str = "log_brief.txt";
/// The detail log file name
pub const DETAIL_LOG: &str = "log_detail.txt";

/// Dual-sink logger: `log_brief.txt` (Info and above, mirrored to the console) and
/// `log_detail.txt` (everything the filter admits). Writers are buffered so workers never
/// block on the OS for a log line
pub struct SimLogger {
    brief: Mutex<BufWriter<File>>,
    detail: Mutex<BufWriter<File>>,
    filter: LevelFilter,
    console: bool,
    lines: AtomicU64,
}

impl SimLogger {
    /// Opens both sinks in `output_dir`, creating the directory as needed
    pub fn create<P: AsRef<Path>>(output_dir: P, filter: LevelFilter) -> Result<Self> {
        fs::create_dir_all(&output_dir)?;
        let brief = File::create(output_dir.as_ref().join(BRIEF_LOG))?;
        let detail = File::create(output_dir.as_ref().join(DETAIL_LOG))?;
        Ok(Self {
            brief: Mutex::new(BufWriter::new(brief)),
            detail: Mutex::new(BufWriter::new(detail)),
            filter,
            console: true,
            lines: AtomicU64::new(0),
        })
    }
    /// Disables the console mirror. Can be used as a build pattern
    pub fn silent(mut self) -> Self {
        self.console = false;
        self
    }
}

fn stamp() -> String {
    Local::now().format("[%Y-%m-%d %H:%M:%S%.3f] ").to_string()
}

impl Log for SimLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.filter
    }
    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let line = format!("{}{:<5} {}", stamp(), record.level(), record.args());
        {
            let mut detail = self.detail.lock();
            let _ = writeln!(detail, "{}", line);
        }
        if record.level() <= Level::Info {
            {
                let mut brief = self.brief.lock();
                let _ = writeln!(brief, "{}", line);
            }
            if self.console {
                match record.level() {
                    Level::Error => eprintln!("{}", line.red().bold()),
                    Level::Warn => eprintln!("{}", line.yellow()),
                    _ => println!("{}", line),
                }
            }
        }
        if self.lines.fetch_add(1, Ordering::AcqRel) % FLUSH_EVERY == 0 {
            self.flush();
        }
    }
    fn flush(&self) {
        let _ = self.brief.lock().flush();
        let _ = self.detail.lock().flush();
    }
}

/// Installs the dual-sink logger as the global logger. Fails if the sinks cannot be opened
/// or a logger is already installed
pub fn init_file_logging<P: AsRef<Path>>(output_dir: P, filter: LevelFilter) -> Result<()> {
    let logger = SimLogger::create(output_dir, filter)?;
    log::set_boxed_logger(Box::new(logger)).map_err(Error::failed)?;
    log::set_max_level(filter);
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use log::{Log, Record};

    fn record(level: Level, message: &str) -> String {
        // build and dispatch a record manually so the test does not need the global logger
        let dir = tempfile::tempdir().unwrap();
        let logger = SimLogger::create(dir.path(), LevelFilter::Debug)
            .unwrap()
            .silent();
        logger.log(
            &Record::builder()
                .level(level)
                .args(format_args!("{}", message))
                .build(),
        );
        logger.flush();
        let brief = fs::read_to_string(dir.path().join(BRIEF_LOG)).unwrap();
        let detail = fs::read_to_string(dir.path().join(DETAIL_LOG)).unwrap();
        format!("BRIEF:{}DETAIL:{}", brief, detail)
    }

    #[test]
    fn test_info_goes_to_both_sinks() {
        let out = record(Level::Info, "runway clear");
        let brief = out.split("DETAIL:").next().unwrap();
        let detail = out.split("DETAIL:").nth(1).unwrap();
        assert!(brief.contains("runway clear"));
        assert!(detail.contains("runway clear"));
    }

    #[test]
    fn test_debug_is_detail_only() {
        let out = record(Level::Debug, "tick detail");
        let brief = out.split("DETAIL:").next().unwrap();
        let detail = out.split("DETAIL:").nth(1).unwrap();
        assert!(!brief.contains("tick detail"));
        assert!(detail.contains("tick detail"));
    }

    #[test]
    fn test_timestamp_prefix_shape() {
        let out = record(Level::Info, "stamp check");
        let detail = out.split("DETAIL:").nth(1).unwrap();
        let line = detail.lines().next().unwrap();
        // [YYYY-MM-DD HH:MM:SS.mmm]
        assert!(line.starts_with('['));
        assert_eq!(&line[5..6], "-");
        assert_eq!(&line[11..12], " ");
        assert_eq!(&line[20..21], ".");
        assert_eq!(&line[24..25], "]");
    }

    #[test]
    fn test_filter_drops_below_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let logger = SimLogger::create(dir.path(), LevelFilter::Info)
            .unwrap()
            .silent();
        logger.log(
            &Record::builder()
                .level(Level::Debug)
                .args(format_args!("hidden"))
                .build(),
        );
        logger.flush();
        let detail = fs::read_to_string(dir.path().join(DETAIL_LOG)).unwrap();
        assert!(detail.is_empty());
    }
}
