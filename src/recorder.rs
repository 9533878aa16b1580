use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

use log::warn;

use crate::state::StateSnapshot;
use crate::Result;

/// Rows between forced flushes
const FLUSH_EVERY: u64 = 100;

/// Fixed-width CSV recorder for the per-tick vehicle state.
///
/// The header and the t=0.00 seed row are written on creation; afterwards the state manager
/// feeds one snapshot per committed tick. Recorded times must be strictly increasing — a
/// duplicate or backwards timestamp drops the row with a warning.
pub struct Recorder {
    writer: BufWriter<File>,
    last_time: Option<f64>,
    rows: u64,
    dropped: u64,
}

impl Recorder {
    /// Creates the output file (and its parent directory), writes the header and the seed row
    pub fn create<P: AsRef<Path>>(path: P, seed: &StateSnapshot) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }
        let mut writer = BufWriter::new(File::create(path)?);
        writeln!(
            writer,
            "{:>10}, {:>12}, {:>10}, {:>10}, {:>9}, {:>9}, {:>12}, {:>12}, {:>12}",
            "time", "position", "velocity", "acc", "throttle", "brake", "thrust", "drag",
            "brake_force"
        )?;
        let mut recorder = Self {
            writer,
            last_time: None,
            rows: 0,
            dropped: 0,
        };
        recorder.write_row(seed)?;
        recorder.last_time = Some(seed.time);
        recorder.writer.flush()?;
        Ok(recorder)
    }
    /// Records one snapshot row. Non-monotone times are dropped with a warning
    pub fn record(&mut self, snapshot: &StateSnapshot) {
        if let Some(last) = self.last_time {
            if snapshot.time <= last {
                self.dropped += 1;
                warn!(
                    "dropping out-of-order data row t={:.2} (last recorded t={:.2})",
                    snapshot.time, last
                );
                return;
            }
        }
        if let Err(e) = self.write_row(snapshot) {
            warn!("data row write failed: {}", e);
            return;
        }
        self.last_time = Some(snapshot.time);
        if self.rows % FLUSH_EVERY == 0 {
            let _ = self.writer.flush();
        }
    }
    fn write_row(&mut self, s: &StateSnapshot) -> Result<()> {
        writeln!(
            self.writer,
            "{:>10.2}, {:>12.3}, {:>10.3}, {:>10.3}, {:>9.3}, {:>9.3}, {:>12.1}, {:>12.1}, {:>12.1}",
            s.time,
            s.position,
            s.velocity,
            s.acceleration,
            s.throttle,
            s.brake,
            s.thrust,
            s.drag_force,
            s.brake_force
        )?;
        self.rows += 1;
        Ok(())
    }
    /// Rows written, including the seed row
    pub fn rows(&self) -> u64 {
        self.rows
    }
    /// Rows dropped for non-monotone time
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
    /// Flushes buffered rows to the OS
    pub fn flush(&mut self) {
        let _ = self.writer.flush();
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        self.flush();
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn snap(time: f64, position: f64) -> StateSnapshot {
        StateSnapshot {
            time,
            position,
            ..StateSnapshot::default()
        }
    }

    #[test]
    fn test_header_and_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.csv");
        let mut recorder = Recorder::create(&path, &snap(0.0, 0.0)).unwrap();
        recorder.record(&snap(0.01, 0.5));
        recorder.record(&snap(0.02, 1.0));
        recorder.flush();
        let text = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].contains("time"));
        assert!(lines[0].contains("brake_force"));
        assert!(lines[1].contains("0.00"));
        assert!(lines[2].contains("0.01"));
        // all rows share the header's column layout
        for line in &lines {
            assert_eq!(line.matches(',').count(), 8);
        }
    }

    #[test]
    fn test_non_monotone_row_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.csv");
        let mut recorder = Recorder::create(&path, &snap(0.0, 0.0)).unwrap();
        recorder.record(&snap(1.24, 10.0));
        // a stale worker reports an earlier tick
        recorder.record(&snap(1.23, 9.0));
        recorder.record(&snap(1.24, 10.0));
        recorder.record(&snap(1.25, 11.0));
        recorder.flush();
        assert_eq!(recorder.dropped(), 2);
        let text = fs::read_to_string(&path).unwrap();
        let times: Vec<f64> = text
            .lines()
            .skip(1)
            .map(|l| l.split(',').next().unwrap().trim().parse().unwrap())
            .collect();
        assert_eq!(times, vec![0.0, 1.24, 1.25]);
        // strictly increasing
        assert!(times.windows(2).all(|w| w[0] < w[1]));
    }
}
