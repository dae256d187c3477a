//! Shared logical clock and round-trip estimation.
//!
//! Every peer runs a logical time that counts ticks modulo the timeline
//! length and stamps it into each frame header. A Sync frame from the time
//! master pulls the local clock towards the master's when the two drift
//! apart; periodic pings feed a small window of round-trip samples used to
//! compensate for transit time.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::debug;

/// Number of round-trip samples kept.
pub const RTT_WINDOW: usize = 5;

/// Clock tuning. The thresholds are best-effort knobs, not guarantees.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClockConfig {
    /// Period of the logical clock in ticks (1..=256).
    pub timeline_length: u16,
    /// Ticks per second.
    pub tick_rate_hz: u32,
    /// Always snap when drift exceeds this many ticks.
    pub hard_threshold: u16,
    /// Snap above this drift when the one-way latency is small.
    pub soft_threshold: u16,
    /// One-way latency (ticks) below which the soft threshold applies.
    pub max_soft_latency: u32,
    /// Milliseconds between pings.
    pub ping_interval_ms: u64,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            timeline_length: 128,
            tick_rate_hz: 60,
            hard_threshold: 10,
            soft_threshold: 3,
            max_soft_latency: 8,
            ping_interval_ms: 1000,
        }
    }
}

impl ClockConfig {
    /// Clock period, clamped so it fits the header byte.
    pub fn period(&self) -> u16 {
        self.timeline_length.clamp(1, 256)
    }

    /// Time between ticks.
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.tick_rate_hz.max(1)))
    }

    /// Time between pings.
    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms.max(1))
    }
}

/// Shortest distance between two times on a circular timeline.
pub fn delta_time(a: u16, b: u16, period: u16) -> u16 {
    let period = i32::from(period.max(1));
    let (a, b) = (i32::from(a), i32::from(b));
    (a - b).rem_euclid(period).min((b - a).rem_euclid(period)) as u16
}

/// Sliding window of round-trip samples.
#[derive(Debug, Clone, Default)]
pub struct RttWindow {
    samples: VecDeque<u32>,
}

impl RttWindow {
    /// Empty window.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a sample, evicting the oldest once full.
    pub fn push(&mut self, sample: u32) {
        if self.samples.len() == RTT_WINDOW {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    /// Samples currently held.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether no sample has been recorded.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Mean of the samples without the largest one, rounded half away from zero.
    ///
    /// `None` until two samples exist.
    pub fn estimate(&self) -> Option<u32> {
        let count = self.samples.len();
        if count < 2 {
            return None;
        }
        let sum: u64 = self.samples.iter().map(|s| u64::from(*s)).sum();
        let max = self.samples.iter().copied().max().map_or(0, u64::from);
        let mean = (sum - max) as f64 / (count - 1) as f64;
        Some(mean.round() as u32)
    }
}

#[derive(Debug)]
struct ClockState {
    time: u16,
    ping_started: Option<u16>,
    window: RttWindow,
}

/// Logical clock shared by the session tasks and the router.
#[derive(Debug)]
pub struct ClockSync {
    config: ClockConfig,
    state: Mutex<ClockState>,
}

impl ClockSync {
    /// Clock at time 0.
    pub fn new(config: ClockConfig) -> Self {
        Self {
            config,
            state: Mutex::new(ClockState {
                time: 0,
                ping_started: None,
                window: RttWindow::new(),
            }),
        }
    }

    /// Tuning in effect.
    pub fn config(&self) -> &ClockConfig {
        &self.config
    }

    /// Current logical time.
    pub fn time(&self) -> u8 {
        self.state().time as u8
    }

    /// Overwrite the logical time.
    pub fn set_time(&self, time: u8) {
        self.state().time = u16::from(time) % self.config.period();
    }

    /// Advance one tick and return the new time.
    pub fn tick(&self) -> u8 {
        let mut state = self.state();
        state.time = (state.time + 1) % self.config.period();
        state.time as u8
    }

    /// Reconcile with a master time. Returns `true` if the clock snapped.
    pub fn on_sync(&self, remote: u8) -> bool {
        let period = self.config.period();
        let mut state = self.state();
        let remote = u16::from(remote) % period;
        let delta = delta_time(state.time, remote, period);
        let latency = state.window.estimate().map_or(0, |rtt| rtt / 2);
        let snap = delta > self.config.hard_threshold
            || (delta > self.config.soft_threshold && latency < self.config.max_soft_latency);
        if snap {
            let target = ((u32::from(remote) + latency) % u32::from(period)) as u16;
            debug!(local = state.time, remote, delta, latency, target, "clock snapped");
            state.time = target;
        }
        snap
    }

    /// Mark a ping as sent now and return the time stamped into it.
    pub fn begin_ping(&self) -> u8 {
        let mut state = self.state();
        state.ping_started = Some(state.time);
        state.time as u8
    }

    /// Complete the outstanding ping. Returns the measured round trip.
    pub fn on_pong(&self) -> Option<u32> {
        let period = self.config.period();
        let mut state = self.state();
        let started = state.ping_started.take()?;
        let rtt = u32::from(delta_time(state.time, started, period));
        state.window.push(rtt);
        Some(rtt)
    }

    /// Record an externally measured round trip.
    pub fn record_rtt(&self, rtt: u32) {
        self.state().window.push(rtt);
    }

    /// Current round-trip estimate in ticks.
    pub fn rtt_estimate(&self) -> Option<u32> {
        self.state().window.estimate()
    }

    fn state(&self) -> MutexGuard<'_, ClockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for ClockSync {
    fn default() -> Self {
        Self::new(ClockConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delta_wraps_around_the_period() {
        assert_eq!(delta_time(2, 126, 128), 4);
        assert_eq!(delta_time(126, 2, 128), 4);
        assert_eq!(delta_time(10, 10, 128), 0);
        assert_eq!(delta_time(0, 64, 128), 64);
    }

    #[test]
    fn rtt_discards_the_outlier() {
        let mut window = RttWindow::new();
        for sample in [10, 12, 11, 50, 9] {
            window.push(sample);
        }
        assert_eq!(window.estimate(), Some(11));
    }

    #[test]
    fn rtt_needs_two_samples_and_keeps_five() {
        let mut window = RttWindow::new();
        window.push(4);
        assert_eq!(window.estimate(), None);
        window.push(6);
        assert_eq!(window.estimate(), Some(4));
        for _ in 0..10 {
            window.push(2);
        }
        assert_eq!(window.len(), RTT_WINDOW);
        assert_eq!(window.estimate(), Some(2));
    }

    #[test]
    fn small_drift_is_tolerated() {
        let clock = ClockSync::default();
        clock.set_time(20);
        assert!(!clock.on_sync(23));
        assert_eq!(clock.time(), 20);
    }

    #[test]
    fn soft_drift_snaps_only_with_low_latency() {
        let clock = ClockSync::default();
        clock.set_time(20);
        assert!(clock.on_sync(25));
        assert_eq!(clock.time(), 25);

        for _ in 0..3 {
            clock.record_rtt(20);
        }
        clock.set_time(20);
        assert!(!clock.on_sync(25));
        assert!(clock.on_sync(40));
        assert_eq!(clock.time(), 50);
    }

    #[test]
    fn snap_wraps_past_the_period() {
        let clock = ClockSync::default();
        clock.record_rtt(8);
        clock.record_rtt(8);
        clock.set_time(50);
        assert!(clock.on_sync(125));
        assert_eq!(clock.time(), 1);
    }

    #[test]
    fn tick_wraps() {
        let clock = ClockSync::new(ClockConfig {
            timeline_length: 4,
            ..ClockConfig::default()
        });
        let times: Vec<u8> = (0..5).map(|_| clock.tick()).collect();
        assert_eq!(times, vec![1, 2, 3, 0, 1]);
    }

    #[test]
    fn ping_pong_measures_elapsed_ticks() {
        let clock = ClockSync::default();
        assert_eq!(clock.on_pong(), None);
        clock.begin_ping();
        for _ in 0..6 {
            clock.tick();
        }
        assert_eq!(clock.on_pong(), Some(6));
        assert_eq!(clock.on_pong(), None);
    }
}
