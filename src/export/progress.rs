//! Progress tracking for dump operations
//!
//! Tracks how many rows a dump has produced and, when enabled, shows a
//! spinner on stderr with the live row rate.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use indicatif::{ProgressBar, ProgressStyle};

/// Row count and wall-clock duration of one finished dump
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DumpSummary {
    /// Rows emitted
    pub rows: u64,
    /// Time spent scanning and emitting
    pub elapsed: Duration,
}

impl DumpSummary {
    /// Rows per second (0 for an instantaneous dump)
    pub fn throughput(&self) -> f64 {
        rate(self.rows, self.elapsed)
    }
}

fn rate(rows: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 { rows as f64 / secs } else { 0.0 }
}

/// Progress tracker for dump operations
pub struct ProgressTracker {
    /// Number of rows processed so far
    processed: AtomicU64,
    /// Start time of the operation
    start_time: Instant,
    /// Spinner (optional, disabled for sheet tasks and non-interactive runs)
    bar: Option<ProgressBar>,
}

impl ProgressTracker {
    /// Create a new progress tracker
    ///
    /// # Arguments
    /// * `label` - Shown next to the row count
    /// * `enable_bar` - Whether to display a spinner
    pub fn new(label: &str, enable_bar: bool) -> Self {
        let bar = enable_bar.then(|| {
            let bar = ProgressBar::new_spinner();
            if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {prefix}: {pos} rows {msg}") {
                bar.set_style(style);
            }
            bar.set_prefix(label.to_string());
            bar
        });

        Self {
            processed: AtomicU64::new(0),
            start_time: Instant::now(),
            bar,
        }
    }

    /// Update progress with the total number of rows processed so far
    pub fn update(&self, count: u64) {
        self.processed.store(count, Ordering::Relaxed);

        if let Some(ref bar) = self.bar {
            bar.set_position(count);
            bar.set_message(format!("({:.0} rows/sec)", rate(count, self.start_time.elapsed())));
        }
    }

    /// Rows recorded by the last update
    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    /// Record the final count, clear the spinner and summarize
    pub fn finish(&self, rows: u64) -> DumpSummary {
        self.processed.store(rows, Ordering::Relaxed);
        if let Some(ref bar) = self.bar {
            bar.finish_and_clear();
        }

        DumpSummary {
            rows,
            elapsed: self.start_time.elapsed(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_tracker_records_count() {
        let tracker = ProgressTracker::new("csv", false);
        tracker.update(500);
        assert_eq!(tracker.processed(), 500);

        let summary = tracker.finish(501);
        assert_eq!(summary.rows, 501);
        assert_eq!(tracker.processed(), 501);
    }

    #[test]
    fn test_spinner_shows_label() {
        let tracker = ProgressTracker::new("Users", true);
        let bar = tracker.bar.as_ref().unwrap();
        assert_eq!(bar.prefix(), "Users");
        tracker.update(2048);
        assert_eq!(bar.position(), 2048);
        tracker.finish(2048);
        assert!(bar.is_finished());
    }

    #[test]
    fn test_throughput() {
        let summary = DumpSummary {
            rows: 3000,
            elapsed: Duration::from_millis(1500),
        };
        assert_eq!(summary.throughput(), 2000.0);

        let instant = DumpSummary {
            rows: 10,
            elapsed: Duration::ZERO,
        };
        assert_eq!(instant.throughput(), 0.0);
    }
}
