use chrono::NaiveDate;

/// An inclusive date interval `[from, to]` bounding a single sync execution
/// for one (store, pipeline). `from <= to` is an invariant enforced at
/// construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Window {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

impl Window {
    /// Build a window, panicking if the range is inverted. Callers that
    /// derive windows from arithmetic (chunking) should prefer `try_new`
    /// and propagate a `SyncError` instead when dates come from the DB.
    pub fn new(from: NaiveDate, to: NaiveDate) -> Self {
        Self::try_new(from, to).expect("window: from must be <= to")
    }

    pub fn try_new(from: NaiveDate, to: NaiveDate) -> Option<Self> {
        if from <= to { Some(Self { from, to }) } else { None }
    }

    pub fn single_day(day: NaiveDate) -> Self {
        Self { from: day, to: day }
    }

    pub fn days(&self) -> i64 {
        (self.to - self.from).num_days() + 1
    }

    pub fn overlaps(&self, other: &Window) -> bool {
        self.from <= other.to && other.from <= self.to
    }

    pub fn contains(&self, day: NaiveDate) -> bool {
        self.from <= day && day <= self.to
    }
}

impl std::fmt::Display for Window {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {}]", self.from, self.to)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn try_new_rejects_inverted_range() {
        let a = NaiveDate::from_ymd_opt(2025, 3, 10).unwrap();
        let b = NaiveDate::from_ymd_opt(2025, 3, 1).unwrap();
        assert!(Window::try_new(a, b).is_none());
        assert!(Window::try_new(b, a).is_some());
    }

    #[test]
    fn days_is_inclusive() {
        let from = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        let to = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        assert_eq!(Window::new(from, to).days(), 1);
        let to2 = NaiveDate::from_ymd_opt(2025, 1, 5).unwrap();
        assert_eq!(Window::new(from, to2).days(), 5);
    }

    #[test]
    fn overlap_detection() {
        let d = |y, m, d| NaiveDate::from_ymd_opt(y, m, d).unwrap();
        let a = Window::new(d(2025, 1, 1), d(2025, 1, 5));
        let b = Window::new(d(2025, 1, 5), d(2025, 1, 10));
        let c = Window::new(d(2025, 1, 6), d(2025, 1, 10));
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c));
    }
}
