use std::time::Duration;

use tokio::time::Instant;

/// Intervals shorter than this are treated as zero when sampling speed.
pub const MIN_SAMPLE_INTERVAL: Duration = Duration::from_millis(1);

/// Instantaneous throughput derived from consecutive confirmed offsets.
///
/// Each sample divides the bytes confirmed since the previous sample by the
/// real time elapsed between the two confirmations.
#[derive(Debug, Clone)]
pub struct Throughput {
    last_sample_time: Instant,
    last_sample_bytes: u64,
    bytes_per_second: f64,
}

impl Throughput {
    /// Starts sampling from `bytes` at `now`.
    pub fn new(bytes: u64, now: Instant) -> Self {
        Self {
            last_sample_time: now,
            last_sample_bytes: bytes,
            bytes_per_second: 0.0,
        }
    }

    /// Records a confirmed offset and returns the updated speed.
    ///
    /// If the interval since the previous sample is effectively zero, the
    /// previous speed is returned and the baseline is kept, so the next
    /// sample covers both confirmations.
    pub fn sample(&mut self, bytes: u64, now: Instant) -> f64 {
        let elapsed = now.saturating_duration_since(self.last_sample_time);
        if elapsed < MIN_SAMPLE_INTERVAL {
            return self.bytes_per_second;
        }

        let delta = bytes.saturating_sub(self.last_sample_bytes);
        self.bytes_per_second = delta as f64 / elapsed.as_secs_f64();
        self.last_sample_time = now;
        self.last_sample_bytes = bytes;
        self.bytes_per_second
    }

    /// Moves the baseline without producing a sample.
    ///
    /// Used after a pause or a server probe so idle time and bytes that were
    /// not sent in this run do not distort the next sample.
    pub fn rebase(&mut self, bytes: u64, now: Instant) {
        self.last_sample_time = now;
        self.last_sample_bytes = bytes;
    }

    /// Most recent speed in bytes/second.
    pub fn bytes_per_second(&self) -> f64 {
        self.bytes_per_second
    }

    pub fn last_sample_time(&self) -> Instant {
        self.last_sample_time
    }

    pub fn last_sample_bytes(&self) -> u64 {
        self.last_sample_bytes
    }

    /// Estimates time remaining to transfer `remaining_bytes`.
    ///
    /// Returns `None` if speed is zero.
    pub fn eta(&self, remaining_bytes: u64) -> Option<Duration> {
        if self.bytes_per_second <= 0.0 {
            return None;
        }
        Some(Duration::from_secs_f64(
            remaining_bytes as f64 / self.bytes_per_second,
        ))
    }
}
