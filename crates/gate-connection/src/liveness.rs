//! Device liveness derived from heartbeats.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;

use gate_protocol::HeartbeatStamp;

/// Tracks the last heartbeat and derives an online verdict.
///
/// Freshness uses the local receive time. The device's own stamp is kept
/// for display only, since its clock is not trusted for ordering.
#[derive(Debug, Clone)]
pub struct LivenessMonitor {
    timeout: Duration,
    last_seen: Option<Instant>,
    last_stamp: Option<HeartbeatStamp>,
    online: bool,
}

impl LivenessMonitor {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            last_seen: None,
            last_stamp: None,
            online: false,
        }
    }

    /// Records a heartbeat received at `now`.
    ///
    /// Returns the new verdict if it changed.
    pub fn record_heartbeat(&mut self, stamp: HeartbeatStamp, now: Instant) -> Option<bool> {
        self.last_seen = Some(now);
        self.last_stamp = Some(stamp);
        self.evaluate(now)
    }

    /// Online iff a heartbeat was seen within the timeout.
    pub fn is_online_at(&self, now: Instant) -> bool {
        self.last_seen
            .is_some_and(|seen| now.saturating_duration_since(seen) < self.timeout)
    }

    pub fn is_online(&self) -> bool {
        self.is_online_at(Instant::now())
    }

    /// Recomputes the cached verdict. Returns the new verdict if it changed.
    pub fn evaluate(&mut self, now: Instant) -> Option<bool> {
        let online = self.is_online_at(now);
        if online == self.online {
            return None;
        }
        self.online = online;
        Some(online)
    }

    /// Device-reported time of the last heartbeat, if parsable.
    pub fn remote_time(&self) -> Option<DateTime<Utc>> {
        self.last_stamp.as_ref().and_then(HeartbeatStamp::to_datetime)
    }

    pub fn last_seen(&self) -> Option<Instant> {
        self.last_seen
    }

    /// Forgets every heartbeat.
    pub fn reset(&mut self) {
        self.last_seen = None;
        self.last_stamp = None;
        self.online = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(120);

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    #[test]
    fn offline_before_any_heartbeat() {
        let mon = LivenessMonitor::new(TIMEOUT);
        assert!(!mon.is_online_at(Instant::now()));
        assert!(!mon.is_online_at(Instant::now() + secs(1000)));
        assert!(mon.last_seen().is_none());
    }

    #[test]
    fn online_window_follows_last_heartbeat() {
        let t0 = Instant::now();
        let mut mon = LivenessMonitor::new(TIMEOUT);
        mon.record_heartbeat(HeartbeatStamp::EpochMillis(0), t0);
        mon.record_heartbeat(HeartbeatStamp::EpochMillis(50_000), t0 + secs(50));

        assert!(mon.is_online_at(t0 + secs(100)));
        assert!(mon.is_online_at(t0 + secs(169)));
        assert!(!mon.is_online_at(t0 + secs(170)));
        assert!(!mon.is_online_at(t0 + secs(180)));
    }

    #[test]
    fn older_remote_stamp_still_counts_as_fresh() {
        let t0 = Instant::now();
        let mut mon = LivenessMonitor::new(TIMEOUT);
        mon.record_heartbeat(HeartbeatStamp::Text("2030-01-01T00:00:00Z".into()), t0);
        mon.record_heartbeat(
            HeartbeatStamp::Text("2020-01-01T00:00:00Z".into()),
            t0 + secs(100),
        );
        assert!(mon.is_online_at(t0 + secs(200)));
        assert_eq!(mon.remote_time().unwrap().to_rfc3339(), "2020-01-01T00:00:00+00:00");
    }

    #[test]
    fn evaluate_reports_flips_only() {
        let t0 = Instant::now();
        let mut mon = LivenessMonitor::new(TIMEOUT);
        assert_eq!(mon.evaluate(t0), None);
        assert_eq!(mon.record_heartbeat(HeartbeatStamp::EpochMillis(1), t0), Some(true));
        assert_eq!(
            mon.record_heartbeat(HeartbeatStamp::EpochMillis(2), t0 + secs(10)),
            None
        );
        assert_eq!(mon.evaluate(t0 + secs(60)), None);
        assert_eq!(mon.evaluate(t0 + secs(200)), Some(false));
        assert_eq!(mon.evaluate(t0 + secs(300)), None);
    }

    #[test]
    fn reset_returns_to_unknown() {
        let t0 = Instant::now();
        let mut mon = LivenessMonitor::new(TIMEOUT);
        mon.record_heartbeat(HeartbeatStamp::EpochMillis(1), t0);
        mon.reset();
        assert!(!mon.is_online_at(t0));
        assert!(mon.remote_time().is_none());
    }
}
