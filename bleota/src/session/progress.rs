//! Progress snapshots and upload summaries.

use std::fmt;
use std::time::Duration;

/// Progress after an acknowledged sector.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Progress {
    /// Bytes acknowledged so far.
    pub written: usize,
    /// Image length.
    pub total: usize,
    /// Rounded percentage, 0 to 100.
    pub percent: u8,
    /// Bytes per second since the session started.
    pub throughput: f64,
}

impl Progress {
    /// Compute a snapshot for `written` of `total` bytes after `elapsed`.
    pub fn new(written: usize, total: usize, elapsed: Duration) -> Self {
        let percent = if total == 0 {
            100
        } else {
            ((written as f64 * 100.0 / total as f64).round() as u8).min(100)
        };
        let seconds = elapsed.as_secs_f64();
        let throughput = if seconds > 0.0 {
            written as f64 / seconds
        } else {
            0.0
        };
        Self {
            written,
            total,
            percent,
            throughput,
        }
    }

    /// Whether every byte was acknowledged.
    pub fn is_complete(&self) -> bool {
        self.written >= self.total
    }
}

impl fmt::Display for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}% ({}/{} bytes, {:.1} kB/s)",
            self.percent,
            self.written,
            self.total,
            self.throughput / 1024.0
        )
    }
}

/// Outcome of a completed upload.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct UploadSummary {
    /// Image length.
    pub bytes: usize,
    /// Sectors acknowledged.
    pub sectors: usize,
    /// Data packets written, resends included.
    pub packets: usize,
    /// Wall time from start command to stop acknowledgment.
    pub elapsed: Duration,
    /// Last progress snapshot.
    pub progress: Progress,
}
