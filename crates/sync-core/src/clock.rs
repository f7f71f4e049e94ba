//! Timezone-aware "today" and inclusive window chunking.

use chrono::{NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;
use sync_types::Window;

/// The operational "today" in the given timezone, derived from the system
/// clock. Kept as the single place that calls into wall-clock time so the
/// rest of the engine can stay pure and testable.
pub fn today(tz: Tz) -> NaiveDate {
    Utc::now().with_timezone(&tz).date_naive()
}

/// Parse a timezone name (e.g. `"Asia/Kolkata"`), for use with values loaded
/// from configuration.
pub fn parse_tz(name: &str) -> Option<Tz> {
    name.parse().ok()
}

/// Split `[from, to]` into ordered, inclusive, non-overlapping windows of at
/// most `chunk_days` days each, with the last window's `to` equal to `to`.
///
/// Returns an empty vec if `from > to` or `chunk_days == 0`.
pub fn chunks(from: NaiveDate, to: NaiveDate, chunk_days: i64) -> Vec<Window> {
    if from > to || chunk_days <= 0 {
        return Vec::new();
    }
    let mut windows = Vec::new();
    let mut a = from;
    while a <= to {
        let span = chunk_days - 1;
        let b = (a + chrono::Duration::days(span)).min(to);
        windows.push(Window::new(a, b));
        a = b + chrono::Duration::days(1);
    }
    windows
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use proptest::prelude::*;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn chunks_single_day_window() {
        let w = chunks(d("2025-03-01"), d("2025-03-01"), 90);
        assert_eq!(w, vec![Window::new(d("2025-03-01"), d("2025-03-01"))]);
    }

    #[test]
    fn chunks_splits_at_n_days() {
        let w = chunks(d("2025-01-01"), d("2025-01-05"), 2);
        assert_eq!(
            w,
            vec![
                Window::new(d("2025-01-01"), d("2025-01-02")),
                Window::new(d("2025-01-03"), d("2025-01-04")),
                Window::new(d("2025-01-05"), d("2025-01-05")),
            ]
        );
    }

    #[test]
    fn chunks_rejects_inverted_range() {
        assert!(chunks(d("2025-01-05"), d("2025-01-01"), 10).is_empty());
    }

    #[test]
    fn parse_tz_accepts_operational_zone() {
        assert!(parse_tz("Asia/Kolkata").is_some());
        assert!(parse_tz("Not/AZone").is_none());
    }

    proptest! {
        #[test]
        fn chunks_cover_the_range_without_gaps_or_overflow(
            start_offset in 0i64..365,
            span in 0i64..365,
            n in 1i64..120,
        ) {
            let from = d("2024-01-01") + chrono::Duration::days(start_offset);
            let to = from + chrono::Duration::days(span);
            let windows = chunks(from, to, n);

            prop_assert!(!windows.is_empty());
            prop_assert_eq!(windows.first().unwrap().from, from);
            prop_assert_eq!(windows.last().unwrap().to, to);
            for w in &windows {
                prop_assert!(w.days() <= n);
            }
            for pair in windows.windows(2) {
                prop_assert_eq!(pair[1].from, pair[0].to + chrono::Duration::days(1));
            }
        }
    }
}
