use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Integer percent of `sent` over `total`, floored and clamped to `[0, 100]`.
///
/// A zero `total` yields 0.
pub fn percent_of(sent: u64, total: u64) -> u8 {
    if total == 0 {
        return 0;
    }
    let pct = (sent as u128 * 100) / total as u128;
    pct.min(100) as u8
}

/// Formats a byte count with binary units, e.g. `1.5 MB`.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 6] = ["Bytes", "KB", "MB", "GB", "TB", "PB"];

    if bytes == 0 {
        return "0 Bytes".to_string();
    }

    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    if unit == 0 {
        return format!("{bytes} Bytes");
    }
    let formatted = format!("{value:.2}");
    let trimmed = formatted.trim_end_matches('0').trim_end_matches('.');
    format!("{trimmed} {}", UNITS[unit])
}

/// Byte counter for one transfer cycle.
///
/// Offsets only move forward; [`reset`](Self::reset) is the single way back
/// to zero and is reserved for a fresh remote upload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgressCounter {
    sent: u64,
    total: u64,
}

impl ProgressCounter {
    pub fn new(total: u64) -> Self {
        Self { sent: 0, total }
    }

    /// Records a new acknowledged offset. Returns `false` (and keeps the
    /// previous value) if `sent` would move backwards.
    pub fn advance(&mut self, sent: u64, total: u64) -> bool {
        if total > 0 {
            self.total = total;
        }
        if sent < self.sent {
            return false;
        }
        self.sent = sent;
        true
    }

    pub fn reset(&mut self, total: u64) {
        self.sent = 0;
        self.total = total;
    }

    pub fn sent(&self) -> u64 {
        self.sent
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn percent(&self) -> u8 {
        percent_of(self.sent, self.total)
    }
}

struct SpeedSample {
    bytes: u64,
    timestamp: Instant,
}

/// Calculates transfer speed using a sliding window of samples.
pub struct SpeedCalculator {
    inner: Mutex<SpeedInner>,
}

struct SpeedInner {
    samples: Vec<SpeedSample>,
    max_samples: usize,
    window_size: Duration,
}

impl Default for SpeedCalculator {
    fn default() -> Self {
        Self::new(None, None)
    }
}

impl SpeedCalculator {
    /// Creates a new calculator.
    ///
    /// - `window_size`: time window for speed calculation (default 5 s).
    /// - `max_samples`: maximum retained samples (default 100).
    pub fn new(window_size: Option<Duration>, max_samples: Option<usize>) -> Self {
        Self {
            inner: Mutex::new(SpeedInner {
                samples: Vec::new(),
                max_samples: max_samples.unwrap_or(100),
                window_size: window_size.unwrap_or(Duration::from_secs(5)),
            }),
        }
    }

    /// Records `bytes` transferred since the previous sample.
    pub fn add_sample(&self, bytes: u64) {
        let mut s = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();
        s.samples.push(SpeedSample {
            bytes,
            timestamp: now,
        });

        if let Some(cutoff) = now.checked_sub(s.window_size) {
            s.samples.retain(|sample| sample.timestamp >= cutoff);
        }

        if s.samples.len() > s.max_samples {
            let excess = s.samples.len() - s.max_samples;
            s.samples.drain(..excess);
        }
    }

    /// Average speed in bytes/second within the window; 0.0 with fewer than
    /// two samples.
    pub fn bytes_per_second(&self) -> f64 {
        let s = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if s.samples.len() < 2 {
            return 0.0;
        }
        let (Some(first), Some(last)) = (s.samples.first(), s.samples.last()) else {
            return 0.0;
        };

        let elapsed = last.timestamp.duration_since(first.timestamp);
        if elapsed.is_zero() {
            return 0.0;
        }

        let total_bytes: u64 = s.samples.iter().map(|sample| sample.bytes).sum();
        total_bytes as f64 / elapsed.as_secs_f64()
    }

    /// Estimates time remaining to transfer `remaining_bytes`.
    pub fn eta(&self, remaining_bytes: u64) -> Option<Duration> {
        let speed = self.bytes_per_second();
        if speed <= 0.0 {
            return None;
        }
        Some(Duration::from_secs_f64(remaining_bytes as f64 / speed))
    }

    pub fn reset(&self) {
        let mut s = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        s.samples.clear();
    }
}
