use chrono::NaiveDate;
use std::collections::BTreeSet;

/// Consecutive-day activity streaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Streaks {
    pub current: u32,
    pub longest: u32,
}

/// Compute streaks over the set of (UTC) days with learning activity.
///
/// The current streak only counts while the last active day is today or
/// yesterday; otherwise it is broken and reported as 0.
#[must_use]
pub fn streaks(active_days: &BTreeSet<NaiveDate>, today: NaiveDate) -> Streaks {
    let mut longest = 0_u32;
    let mut run = 0_u32;
    let mut prev: Option<NaiveDate> = None;

    for day in active_days.iter().copied().filter(|d| *d <= today) {
        run = match prev {
            Some(p) if p.succ_opt() == Some(day) => run + 1,
            _ => 1,
        };
        longest = longest.max(run);
        prev = Some(day);
    }

    let current = match prev {
        Some(last) if last == today || last.succ_opt() == Some(today) => run,
        _ => 0,
    };

    Streaks { current, longest }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
    }

    fn days(ds: &[u32]) -> BTreeSet<NaiveDate> {
        ds.iter().copied().map(day).collect()
    }

    #[test]
    fn no_activity_has_no_streak() {
        assert_eq!(streaks(&BTreeSet::new(), day(10)), Streaks::default());
    }

    #[test]
    fn streak_ending_today_or_yesterday_is_current() {
        let s = streaks(&days(&[7, 8, 9, 10]), day(10));
        assert_eq!(s, Streaks { current: 4, longest: 4 });

        let s = streaks(&days(&[7, 8, 9]), day(10));
        assert_eq!(s.current, 3);
    }

    #[test]
    fn gap_breaks_current_streak() {
        let s = streaks(&days(&[1, 2, 3, 4, 8]), day(12));
        assert_eq!(s, Streaks { current: 0, longest: 4 });
    }

    #[test]
    fn longest_is_tracked_across_runs() {
        let s = streaks(&days(&[1, 2, 5, 6, 7, 9, 10]), day(10));
        assert_eq!(s, Streaks { current: 2, longest: 3 });
    }

    #[test]
    fn future_days_are_ignored() {
        let s = streaks(&days(&[9, 10, 11]), day(10));
        assert_eq!(s, Streaks { current: 2, longest: 2 });
    }
}
