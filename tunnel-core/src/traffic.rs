//! Traffic Monitor
//!
//! Turns cumulative host network counters into per-tick throughput while a
//! session is connected. The monitor keeps exactly one previous sample; it
//! is re-based on every connect so totals accumulated before the session
//! never show up as a spike, and cleared on disconnect so no stale numbers
//! are reported.

use std::fmt;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::host::NetCounters;

/// One reading of the host counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrafficSample {
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub taken_at: Instant,
}

impl TrafficSample {
    pub fn new(counters: NetCounters, taken_at: Instant) -> Self {
        Self {
            bytes_sent: counters.bytes_sent,
            bytes_received: counters.bytes_received,
            taken_at,
        }
    }
}

/// Throughput in kilobytes per second
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrafficRate {
    pub upload_kbps: f64,
    pub download_kbps: f64,
}

impl TrafficRate {
    pub const ZERO: Self = Self {
        upload_kbps: 0.0,
        download_kbps: 0.0,
    };

    /// `("2.0 KB/s", "1.0 KB/s")`
    pub fn formatted(&self) -> (String, String) {
        (
            format!("{:.1} KB/s", self.upload_kbps),
            format!("{:.1} KB/s", self.download_kbps),
        )
    }
}

/// What the monitor reports to upper layers
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TrafficReading {
    /// No session, nothing to show
    Blank,
    Rate(TrafficRate),
}

impl TrafficReading {
    pub fn rate(&self) -> Option<TrafficRate> {
        match self {
            TrafficReading::Blank => None,
            TrafficReading::Rate(rate) => Some(*rate),
        }
    }
}

impl fmt::Display for TrafficReading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrafficReading::Blank => Ok(()),
            TrafficReading::Rate(rate) => {
                let (up, down) = rate.formatted();
                write!(f, "↑ {} | ↓ {}", up, down)
            }
        }
    }
}

/// Delta sampler over cumulative byte counters
#[derive(Debug)]
pub struct TrafficMonitor {
    interval: Duration,
    active: bool,
    last_sample: Option<TrafficSample>,
    last_reading: TrafficReading,
}

impl Default for TrafficMonitor {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

impl TrafficMonitor {
    /// Create a monitor for the given nominal sampling interval
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            active: false,
            last_sample: None,
            last_reading: TrafficReading::Blank,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn last_sample(&self) -> Option<&TrafficSample> {
        self.last_sample.as_ref()
    }

    pub fn reading(&self) -> TrafficReading {
        self.last_reading
    }

    /// Start a new session with `baseline` as the previous sample.
    ///
    /// Pass `None` when counters are unavailable at connect time; the first
    /// tick then becomes the baseline and reports zero.
    pub fn reset(&mut self, baseline: Option<TrafficSample>) {
        self.active = true;
        self.last_sample = baseline;
        self.last_reading = TrafficReading::Rate(TrafficRate::ZERO);
    }

    /// Drop the baseline and blank the reading
    pub fn clear(&mut self) {
        self.active = false;
        self.last_sample = None;
        self.last_reading = TrafficReading::Blank;
    }

    /// Record a tick and return the throughput since the previous sample
    pub fn sample(&mut self, sample: TrafficSample) -> TrafficReading {
        if !self.active {
            return TrafficReading::Blank;
        }

        let rate = match self.last_sample.replace(sample) {
            None => TrafficRate::ZERO,
            Some(previous) => {
                // One delta per tick, scaled by the nominal interval. Tick
                // jitter must not turn a short gap into a spike.
                let seconds = self.interval.as_secs_f64();
                // Counters can shrink when an interface disappears.
                let sent = sample.bytes_sent.saturating_sub(previous.bytes_sent);
                let received = sample.bytes_received.saturating_sub(previous.bytes_received);
                TrafficRate {
                    upload_kbps: sent as f64 / 1024.0 / seconds,
                    download_kbps: received as f64 / 1024.0 / seconds,
                }
            }
        };

        debug!(
            up_kbps = rate.upload_kbps,
            down_kbps = rate.download_kbps,
            "Traffic sample"
        );
        self.last_reading = TrafficReading::Rate(rate);
        self.last_reading
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(sent: u64, received: u64, at: Instant) -> TrafficSample {
        TrafficSample::new(
            NetCounters {
                bytes_sent: sent,
                bytes_received: received,
            },
            at,
        )
    }

    #[test]
    fn test_inactive_monitor_is_blank() {
        let mut monitor = TrafficMonitor::default();
        assert_eq!(monitor.sample(sample(1, 1, Instant::now())), TrafficReading::Blank);
        assert_eq!(monitor.reading().to_string(), "");
    }

    #[test]
    fn test_rate_over_one_second() {
        let t0 = Instant::now();
        let mut monitor = TrafficMonitor::default();
        monitor.reset(Some(sample(10_000, 20_000, t0)));

        let reading = monitor.sample(sample(12_048, 21_024, t0 + Duration::from_secs(1)));
        let (up, down) = reading.rate().unwrap().formatted();
        assert_eq!(up, "2.0 KB/s");
        assert_eq!(down, "1.0 KB/s");
        assert_eq!(reading.to_string(), "↑ 2.0 KB/s | ↓ 1.0 KB/s");
    }

    #[test]
    fn test_rate_ignores_tick_jitter() {
        let t0 = Instant::now();
        let mut monitor = TrafficMonitor::default();
        monitor.reset(Some(sample(0, 0, t0)));

        let early = monitor
            .sample(sample(2048, 1024, t0 + Duration::from_millis(10)))
            .rate()
            .unwrap();
        assert_eq!(early.formatted(), ("2.0 KB/s".to_string(), "1.0 KB/s".to_string()));

        let late = monitor
            .sample(sample(4096, 2048, t0 + Duration::from_millis(1510)))
            .rate()
            .unwrap();
        assert_eq!(late.upload_kbps, 2.0);
        assert_eq!(late.download_kbps, 1.0);
    }

    #[test]
    fn test_rate_scales_with_nominal_interval() {
        let t0 = Instant::now();
        let mut monitor = TrafficMonitor::new(Duration::from_secs(2));
        monitor.reset(Some(sample(0, 0, t0)));

        let rate = monitor
            .sample(sample(4096, 0, t0 + Duration::from_secs(2)))
            .rate()
            .unwrap();
        assert_eq!(rate.upload_kbps, 2.0);
        assert_eq!(rate.download_kbps, 0.0);
    }

    #[test]
    fn test_missing_baseline_reports_zero_first() {
        let t0 = Instant::now();
        let mut monitor = TrafficMonitor::default();
        monitor.reset(None);

        let first = monitor.sample(sample(5_000_000, 9_000_000, t0));
        assert_eq!(first.rate(), Some(TrafficRate::ZERO));

        let second = monitor.sample(sample(5_001_024, 9_000_000, t0 + Duration::from_secs(1)));
        assert_eq!(second.rate().unwrap().upload_kbps, 1.0);
    }

    #[test]
    fn test_shrinking_counters_never_negative() {
        let t0 = Instant::now();
        let mut monitor = TrafficMonitor::default();
        monitor.reset(Some(sample(9_000, 9_000, t0)));

        let rate = monitor
            .sample(sample(100, 100, t0 + Duration::from_secs(1)))
            .rate()
            .unwrap();
        assert_eq!(rate, TrafficRate::ZERO);
    }

    #[test]
    fn test_half_second_interval() {
        let t0 = Instant::now();
        let mut monitor = TrafficMonitor::new(Duration::from_millis(500));
        monitor.reset(Some(sample(0, 0, t0)));

        let rate = monitor.sample(sample(1024, 1024, t0)).rate().unwrap();
        assert_eq!(rate.upload_kbps, 2.0);
    }

    #[test]
    fn test_clear_blanks_reading() {
        let t0 = Instant::now();
        let mut monitor = TrafficMonitor::default();
        monitor.reset(Some(sample(0, 0, t0)));
        monitor.sample(sample(2048, 1024, t0 + Duration::from_secs(1)));

        monitor.clear();
        assert!(!monitor.is_active());
        assert!(monitor.last_sample().is_none());
        assert_eq!(monitor.reading(), TrafficReading::Blank);
    }
}
