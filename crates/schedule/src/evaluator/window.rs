use chrono::{DateTime, Duration, Utc};
use powermgmt_core::config::CatchUpPolicy;
use serde::{Deserialize, Serialize};

/// The stretch of time one tick is responsible for: `(start, end]`.
///
/// Consecutive ticks produce adjoining windows, so every scheduled time
/// lands in exactly one of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvalWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl EvalWindow {
    /// The single tick-length window ending at `end`.
    pub fn ending_at(end: DateTime<Utc>, tick: Duration) -> Self {
        Self {
            start: end - tick,
            end,
        }
    }

    /// Window for the tick at `tick_at` (aligned down to the tick grid).
    ///
    /// Under [`CatchUpPolicy::CatchUp`], a gap since `previous_tick` widens the
    /// window back to it, by at most `catch_up_max`.
    pub fn for_tick(
        tick_at: DateTime<Utc>,
        tick: Duration,
        previous_tick: Option<DateTime<Utc>>,
        policy: CatchUpPolicy,
        catch_up_max: Duration,
    ) -> Self {
        let end = align_down(tick_at, tick);
        let regular = Self::ending_at(end, tick);

        match (policy, previous_tick) {
            (CatchUpPolicy::CatchUp, Some(previous)) => {
                let previous = align_down(previous, tick);
                let earliest = end - catch_up_max.max(tick);
                Self {
                    start: previous.max(earliest).min(regular.start),
                    end,
                }
            }
            _ => regular,
        }
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at > self.start && at <= self.end
    }

    pub fn length(&self) -> Duration {
        self.end - self.start
    }
}

/// Round `at` down to a multiple of `tick` since the epoch.
pub fn align_down(at: DateTime<Utc>, tick: Duration) -> DateTime<Utc> {
    let step = tick.num_seconds().max(1);
    let secs = at.timestamp().div_euclid(step) * step;
    DateTime::from_timestamp(secs, 0).unwrap_or(at)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, h, m, s).unwrap()
    }

    #[test]
    fn aligns_down_to_tick_grid() {
        let tick = Duration::minutes(5);
        assert_eq!(align_down(t(7, 7, 42), tick), t(7, 5, 0));
        assert_eq!(align_down(t(7, 5, 0), tick), t(7, 5, 0));
    }

    #[test]
    fn skip_policy_ignores_gaps() {
        let w = EvalWindow::for_tick(
            t(8, 0, 10),
            Duration::minutes(5),
            Some(t(7, 0, 0)),
            CatchUpPolicy::Skip,
            Duration::minutes(60),
        );
        assert_eq!(w, EvalWindow { start: t(7, 55, 0), end: t(8, 0, 0) });
    }

    #[test]
    fn catch_up_widens_to_previous_tick() {
        let w = EvalWindow::for_tick(
            t(8, 0, 0),
            Duration::minutes(5),
            Some(t(7, 30, 0)),
            CatchUpPolicy::CatchUp,
            Duration::minutes(60),
        );
        assert_eq!(w.start, t(7, 30, 0));
        assert!(w.contains(t(7, 45, 0)));
        assert!(!w.contains(t(7, 30, 0)));
    }

    #[test]
    fn catch_up_is_bounded() {
        let w = EvalWindow::for_tick(
            t(8, 0, 0),
            Duration::minutes(5),
            Some(t(2, 0, 0)),
            CatchUpPolicy::CatchUp,
            Duration::minutes(60),
        );
        assert_eq!(w.start, t(7, 0, 0));
        assert_eq!(w.length(), Duration::minutes(60));
    }

    #[test]
    fn catch_up_never_narrows_regular_window() {
        let w = EvalWindow::for_tick(
            t(8, 0, 0),
            Duration::minutes(5),
            Some(t(8, 0, 0)),
            CatchUpPolicy::CatchUp,
            Duration::minutes(60),
        );
        assert_eq!(w.start, t(7, 55, 0));
    }
}
