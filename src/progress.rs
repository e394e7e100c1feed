//! Progress reporting for diff jobs, plus the human-readable size and
//! throughput formatters used in log lines.

use std::fmt;
use std::time::Duration;

/// How much of the new buffer must be scanned between progress updates.
pub const PROGRESS_INTERVAL: usize = 64 * 1024 * 1024;

/// Advisory sink for scan-phase notifications. Implementations may drop
/// any or all of them without affecting the emitted stream.
pub trait ProgressSink {
    /// Human-readable phase label, sent once at the start of scanning.
    fn label(&mut self, _label: &str) {}

    /// Fraction of the new buffer scanned so far, in `[0.0, 1.0]`. Sent at
    /// most once per [`PROGRESS_INTERVAL`] of scanned input.
    fn progress(&mut self, _fraction: f32) {}
}

/// Sink that drops every notification.
pub struct NoProgress;

impl ProgressSink for NoProgress {}

pub(crate) struct DurationSpeed(pub u64, pub Duration);

impl fmt::Display for DurationSpeed {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let (size, duration) = (self.0, self.1);
        write!(f, "{:?} ({})", duration, Speed(size, duration))
    }
}

struct Speed(u64, Duration);

impl fmt::Display for Speed {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let (size, duration) = (self.0, self.1);
        let per_sec = size as f64 / duration.as_secs_f64();
        write!(f, "{} / s", Size(per_sec as u64))
    }
}

pub(crate) struct Size(pub u64);

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let x = self.0;

        if x > 1024 * 1024 {
            write!(f, "{:.2} MiB", x as f64 / (1024.0 * 1024.0))
        } else if x > 1024 {
            write!(f, "{:.1} KiB", x as f64 / 1024.0)
        } else {
            write!(f, "{} B", x)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn humanizes_sizes() {
        assert_eq!(Size(17).to_string(), "17 B");
        assert_eq!(Size(1024).to_string(), "1024 B");
        assert_eq!(Size(2048).to_string(), "2.0 KiB");
        assert_eq!(Size(3 * 1024 * 1024).to_string(), "3.00 MiB");
    }
}
