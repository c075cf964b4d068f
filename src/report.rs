//! Task report values and duration formatting helpers.
//!
//! A report is a plain, lockless value: the task computes it from atomic
//! counter loads and the executor augments it with order-store aggregates.

use std::time::Duration;

use crate::task::TaskStatus;

/// Point-in-time view of a task, suitable for gauges, notifications and the
/// control API.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskReport {
    pub task_id: String,
    pub game_id: i64,
    pub game_name: String,
    pub status: TaskStatus,

    /// Completed rounds.
    pub process: i64,
    /// member_count × times_per_member.
    pub target: i64,
    /// Successful API requests (bets + bonuses).
    pub step: i64,

    pub elapsed: Duration,
    pub qps: f64,
    pub avg_latency: Duration,
    pub progress_pct: f64,

    pub active_members: i64,
    pub completed_members: i64,
    pub failed_members: i64,
    pub failed_requests: i64,

    // Order-store augmentation, filled by the executor. Monetary totals are
    // ×1e4 to stay integral end-to-end.
    pub order_count: i64,
    pub bonus_order_count: i64,
    pub total_bet: i64,
    pub total_win: i64,
    pub rtp_pct: f64,

    pub record_url: Option<String>,
}

impl TaskReport {
    /// Rough time remaining extrapolated from current progress.
    pub fn eta(&self) -> Duration {
        if self.progress_pct <= 0.0 || self.progress_pct >= 100.0 {
            return Duration::ZERO;
        }
        let total = self.elapsed.as_secs_f64() / self.progress_pct * 100.0;
        Duration::from_secs_f64((total - self.elapsed.as_secs_f64()).max(0.0))
    }
}

/// `100·num/den` capped at 100; 0 when the denominator is not positive.
pub fn pct_cap100(num: i64, den: i64) -> f64 {
    if den <= 0 {
        return 0.0;
    }
    (num as f64 / den as f64 * 100.0).min(100.0)
}

/// Mean of a cumulative duration over `steps` samples.
pub fn avg_duration(total: Duration, steps: i64) -> Duration {
    if steps <= 0 {
        return Duration::ZERO;
    }
    Duration::from_nanos((total.as_nanos() / steps as u128) as u64)
}

const UNITS: [(f64, &str); 7] = [
    (86_400.0, "d"),
    (3_600.0, "h"),
    (60.0, "m"),
    (1.0, "s"),
    (1e-3, "ms"),
    (1e-6, "µs"),
    (1e-9, "ns"),
];

/// Compact human duration: `1.50h`, `12.3s`, `250ms`.
pub fn short_duration(d: Duration) -> String {
    let sec = d.as_secs_f64();
    if sec == 0.0 {
        return "0".to_string();
    }
    for (div, sym) in UNITS {
        if sec >= div {
            let val = sec / div;
            return if val >= 100.0 {
                format!("{val:.0}{sym}")
            } else if val >= 10.0 {
                format!("{val:.1}{sym}")
            } else {
                format!("{val:.2}{sym}")
            };
        }
    }
    "0".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pct_cap100() {
        assert_eq!(pct_cap100(0, 0), 0.0);
        assert_eq!(pct_cap100(5, 0), 0.0);
        assert_eq!(pct_cap100(50, 100), 50.0);
        assert_eq!(pct_cap100(300, 100), 100.0);
    }

    #[test]
    fn test_avg_duration() {
        assert_eq!(avg_duration(Duration::from_secs(10), 0), Duration::ZERO);
        assert_eq!(
            avg_duration(Duration::from_secs(10), 5),
            Duration::from_secs(2)
        );
    }

    #[test]
    fn test_short_duration_units() {
        assert_eq!(short_duration(Duration::ZERO), "0");
        assert_eq!(short_duration(Duration::from_secs(90)), "1.50m");
        assert_eq!(short_duration(Duration::from_secs(5)), "5.00s");
        assert_eq!(short_duration(Duration::from_millis(250)), "250ms");
        assert_eq!(short_duration(Duration::from_secs(36_000)), "10.0h");
        assert_eq!(short_duration(Duration::from_secs(400_000)), "4.63d");
    }

    #[test]
    fn test_eta_boundaries() {
        let mut r = TaskReport {
            task_id: "t".into(),
            game_id: 1,
            game_name: "g".into(),
            status: TaskStatus::Running,
            process: 50,
            target: 100,
            step: 50,
            elapsed: Duration::from_secs(10),
            qps: 5.0,
            avg_latency: Duration::from_millis(20),
            progress_pct: 50.0,
            active_members: 1,
            completed_members: 0,
            failed_members: 0,
            failed_requests: 0,
            order_count: 0,
            bonus_order_count: 0,
            total_bet: 0,
            total_win: 0,
            rtp_pct: 0.0,
            record_url: None,
        };
        assert_eq!(r.eta(), Duration::from_secs(10));

        r.progress_pct = 0.0;
        assert_eq!(r.eta(), Duration::ZERO);
        r.progress_pct = 100.0;
        assert_eq!(r.eta(), Duration::ZERO);
    }
}
