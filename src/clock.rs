//! Distributed play-position estimation without a shared clock.
//!
//! Peers exchange `(position, timestamp, latency)` triples; each side
//! extrapolates the other's current position from its own wall clock. The
//! formulas here are the protocol: changing them changes perceived sync
//! quality across every participant.
//!
//! ```text
//! current(now) = paused ? position
//!                       : position + (now - last_update) + latency
//! ```

use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Local, TimeZone};

use crate::config::{LATENCY_SANITY_MS, MAX_LATENCY_MS};

/// Local wall clock in milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Round-trip time for a response received at `now` to a request stamped
/// `request_timestamp`, corrected by the responder's self-reported processing
/// latency. Latencies beyond the sanity bound are ignored entirely, which
/// protects the estimate against clock skew and garbage values.
pub fn adjusted_rtt(now: u64, request_timestamp: u64, processing_latency_ms: i32) -> i32 {
    let raw = now.saturating_sub(request_timestamp) as i64;
    let latency = processing_latency_ms as i64;
    let adjusted = if (0..=LATENCY_SANITY_MS).contains(&latency) {
        raw - latency
    } else {
        raw
    };
    adjusted.clamp(0, i32::MAX as i64) as i32
}

/// Sender-side clock-sync state for one connected peer.
#[derive(Debug, Clone, Default)]
pub struct RemotePlayerInfo {
    /// Last reported playback position, milliseconds.
    position: u64,
    /// Wall clock at which `position` was recorded; `None` until first report.
    last_update: Option<u64>,
    /// Last reported one-way latency, milliseconds.
    latency: i32,
    paused: bool,
}

impl RemotePlayerInfo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a position report from the peer. Latencies outside the sanity
    /// bound leave the stored latency untouched.
    pub fn update(&mut self, position: u64, latency_ms: i32, paused: bool, now: u64) {
        self.position = position;
        self.last_update = Some(now);
        self.paused = paused;
        if (0..=LATENCY_SANITY_MS).contains(&(latency_ms as i64)) {
            self.latency = latency_ms;
        }
    }

    pub fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn has_update(&self) -> bool {
        self.last_update.is_some()
    }

    pub fn latency_ms(&self) -> i32 {
        self.latency
    }

    /// Latency usable for synchronization math: positive and within the
    /// protocol bound, otherwise zero.
    pub fn bounded_latency_ms(&self) -> u64 {
        if self.latency > 0 && self.latency <= MAX_LATENCY_MS {
            self.latency as u64
        } else {
            0
        }
    }

    /// Best-effort estimate of where this peer's playback is at `now`.
    /// A paused position is frozen by definition and gets no extrapolation
    /// and no latency add-on. Only the protocol-bounded latency enters the
    /// extrapolation; an out-of-bound reading must not shift the estimate.
    pub fn current_position(&self, now: u64) -> Option<u64> {
        let last_update = self.last_update?;
        if self.paused {
            Some(self.position)
        } else {
            Some(self.position + now.saturating_sub(last_update) + self.bounded_latency_ms())
        }
    }
}

/// Synchronization target for pausing: no peer may pause earlier than the
/// furthest point any peer has already reached, or it would replay content.
///
/// Returns `None` when no peer has reported a position yet.
pub fn pause_target<'a, I>(peers: I, now: u64) -> Option<u64>
where
    I: IntoIterator<Item = &'a RemotePlayerInfo>,
{
    let mut max_position: Option<u64> = None;
    let mut min_latency: Option<u64> = None;
    for peer in peers {
        let Some(position) = peer.current_position(now) else {
            continue;
        };
        max_position = Some(max_position.map_or(position, |p| p.max(position)));
        // Zero means "no usable reading", not "instant peer"; it must not
        // win the minimum and erase everyone else's padding.
        let latency = peer.bounded_latency_ms();
        if latency > 0 {
            min_latency = Some(min_latency.map_or(latency, |l| l.min(latency)));
        }
    }
    max_position.map(|p| p + min_latency.unwrap_or(0))
}

/// Synchronization target for resuming: resuming must not skip content the
/// slowest peer has not finished hearing, so the minimum position wins and
/// the largest latency pads the target.
pub fn resume_target<'a, I>(peers: I, now: u64) -> Option<u64>
where
    I: IntoIterator<Item = &'a RemotePlayerInfo>,
{
    let mut min_position: Option<u64> = None;
    let mut max_latency: u64 = 0;
    for peer in peers {
        let Some(position) = peer.current_position(now) else {
            continue;
        };
        min_position = Some(min_position.map_or(position, |p| p.min(position)));
        max_latency = max_latency.max(peer.bounded_latency_ms());
    }
    min_position.map(|p| p + max_latency)
}

/// Diagnostic snapshot of the local clock state.
#[derive(Debug, Clone, PartialEq)]
pub struct ClockDebugInfo {
    pub local_time_millis: u64,
    pub local_time_formatted: String,
}

impl ClockDebugInfo {
    pub fn capture() -> Self {
        let local_time_millis = now_millis();
        let secs = (local_time_millis / 1000) as i64;
        let millis = (local_time_millis % 1000) as u32;
        let local_time_formatted = Local
            .timestamp_opt(secs, millis * 1_000_000)
            .single()
            .map(|dt: DateTime<Local>| dt.format("%Y-%m-%d %H:%M:%S%.3f").to_string())
            .unwrap_or_else(|| "Invalid time".to_string());
        Self {
            local_time_millis,
            local_time_formatted,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adjusted_rtt_subtracts_processing_latency() {
        assert_eq!(adjusted_rtt(1_500, 1_000, 100), 400);
    }

    #[test]
    fn test_adjusted_rtt_ignores_insane_latency() {
        // 20s of claimed processing latency exceeds the sanity bound.
        assert_eq!(adjusted_rtt(1_500, 1_000, 20_000), 500);
        assert_eq!(adjusted_rtt(1_500, 1_000, -5), 500);
    }

    #[test]
    fn test_adjusted_rtt_never_negative() {
        assert_eq!(adjusted_rtt(1_100, 1_000, 500), 0);
        // Response apparently from the future.
        assert_eq!(adjusted_rtt(900, 1_000, 0), 0);
    }

    #[test]
    fn test_playing_position_extrapolates() {
        let mut peer = RemotePlayerInfo::new();
        peer.update(1_000, 50, false, 10_000);
        assert_eq!(peer.current_position(10_200), Some(1_250));
    }

    #[test]
    fn test_paused_position_is_frozen() {
        let mut peer = RemotePlayerInfo::new();
        peer.update(1_000, 50, true, 10_000);
        assert_eq!(peer.current_position(10_200), Some(1_000));
    }

    #[test]
    fn test_no_update_yields_no_position() {
        let peer = RemotePlayerInfo::new();
        assert_eq!(peer.current_position(10_000), None);
    }

    #[test]
    fn test_pause_target_takes_furthest_peer() {
        let now = 10_000;
        let mut a = RemotePlayerInfo::new();
        a.update(1_000, 50, false, now);
        let mut b = RemotePlayerInfo::new();
        b.update(1_200, 100, false, now);

        let target = pause_target([&a, &b], now).unwrap();
        let max_extrapolated = b.current_position(now).unwrap();
        assert!(target >= max_extrapolated);
        // min positive latency is 50
        assert_eq!(target, max_extrapolated + 50);
    }

    #[test]
    fn test_resume_target_takes_slowest_peer() {
        let now = 10_000;
        let mut a = RemotePlayerInfo::new();
        a.update(1_000, 50, false, now);
        let mut b = RemotePlayerInfo::new();
        b.update(1_200, 100, false, now);

        let target = resume_target([&a, &b], now).unwrap();
        let min_extrapolated = a.current_position(now).unwrap();
        // max latency is 100
        assert_eq!(target, min_extrapolated + 100);
    }

    #[test]
    fn test_targets_skip_peers_without_updates() {
        let silent = RemotePlayerInfo::new();
        assert_eq!(pause_target([&silent], 10_000), None);
        assert_eq!(resume_target([&silent], 10_000), None);
    }

    #[test]
    fn test_out_of_bound_latency_does_not_shift_extrapolation() {
        let now = 10_000;
        let mut peer = RemotePlayerInfo::new();
        // Within the sanity bound, beyond the protocol bound.
        peer.update(1_000, 5_000, false, now);
        assert_eq!(peer.current_position(now), Some(1_000));
        assert_eq!(peer.current_position(now + 200), Some(1_200));
    }

    #[test]
    fn test_pause_target_min_latency_skips_zero_readings() {
        let now = 10_000;
        let mut a = RemotePlayerInfo::new();
        a.update(1_200, 0, true, now);
        let mut b = RemotePlayerInfo::new();
        b.update(1_000, 50, true, now);

        // The furthest peer has no usable latency; the smallest positive
        // one still pads the target.
        assert_eq!(pause_target([&a, &b], now), Some(1_250));
    }

    #[test]
    fn test_pause_target_without_positive_latency_adds_nothing() {
        let now = 10_000;
        let mut a = RemotePlayerInfo::new();
        a.update(1_200, 0, true, now);
        assert_eq!(pause_target([&a], now), Some(1_200));
    }

    #[test]
    fn test_out_of_bound_latency_treated_as_zero() {
        let now = 10_000;
        let mut peer = RemotePlayerInfo::new();
        peer.update(1_000, 5_000, true, now);
        assert_eq!(peer.bounded_latency_ms(), 0);
    }

    #[test]
    fn test_debug_info_formats() {
        let info = ClockDebugInfo::capture();
        assert!(info.local_time_millis > 0);
        assert!(info.local_time_formatted.contains('-'));
    }
}
