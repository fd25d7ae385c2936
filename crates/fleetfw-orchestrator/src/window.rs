//! Maintenance windows

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

/// How often a window repeats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recurrence {
    /// Single occurrence
    #[default]
    Once,
    /// Every 24 hours
    Daily,
    /// Every 7 days
    Weekly,
}

impl Recurrence {
    fn period(self) -> Option<TimeDelta> {
        match self {
            Recurrence::Once => None,
            Recurrence::Daily => TimeDelta::try_days(1),
            Recurrence::Weekly => TimeDelta::try_weeks(1),
        }
    }
}

/// A time range in which a cluster may be disrupted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaintenanceWindow {
    /// Cluster the window applies to
    pub cluster_name: String,
    /// First occurrence start
    pub start: DateTime<Utc>,
    /// Length of each occurrence
    pub duration_minutes: u32,
    /// Repetition
    #[serde(default)]
    pub recurrence: Recurrence,
}

impl MaintenanceWindow {
    fn length(&self) -> TimeDelta {
        TimeDelta::minutes(i64::from(self.duration_minutes))
    }

    // Start of the latest occurrence at or before `t`.
    fn occurrence_at_or_before(&self, t: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if t < self.start {
            return None;
        }
        let Some(period) = self.recurrence.period() else {
            return Some(self.start);
        };
        let elapsed = t.signed_duration_since(self.start).num_seconds();
        let k = elapsed.checked_div(period.num_seconds())?;
        let offset = TimeDelta::try_seconds(period.num_seconds().checked_mul(k)?)?;
        self.start.checked_add_signed(offset)
    }

    /// Whether `t` falls inside an occurrence.
    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        self.occurrence_at_or_before(t)
            .and_then(|s| s.checked_add_signed(self.length()))
            .is_some_and(|end| t < end)
    }

    /// Earliest occurrence starting at or after `after`.
    pub fn next_occurrence(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self.occurrence_at_or_before(after) {
            None => Some(self.start),
            Some(s) if s == after => Some(s),
            Some(s) => {
                let period = self.recurrence.period()?;
                s.checked_add_signed(period)
            }
        }
    }
}

/// Windows for every cluster.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaintenanceCalendar {
    /// All windows
    #[serde(default)]
    pub windows: Vec<MaintenanceWindow>,
}

impl MaintenanceCalendar {
    /// Create a calendar.
    pub fn new(windows: Vec<MaintenanceWindow>) -> Self {
        Self { windows }
    }

    /// Windows declared for `cluster`.
    pub fn for_cluster<'a>(&'a self, cluster: &'a str) -> impl Iterator<Item = &'a MaintenanceWindow> {
        self.windows.iter().filter(move |w| w.cluster_name == cluster)
    }

    /// Whether the cluster has any window.
    pub fn has_windows(&self, cluster: &str) -> bool {
        self.for_cluster(cluster).next().is_some()
    }

    /// Earliest allowed start for `cluster` at or after `at`.
    ///
    /// Returns `at` when it already falls inside a window, the next window
    /// start otherwise, and `None` when every window has passed.
    pub fn earliest_start(&self, cluster: &str, at: DateTime<Utc>) -> Option<(DateTime<Utc>, u32)> {
        if let Some(w) = self.for_cluster(cluster).find(|w| w.contains(at)) {
            let end = w
                .occurrence_at_or_before(at)
                .and_then(|s| s.checked_add_signed(w.length()))?;
            let remaining = end.signed_duration_since(at).num_minutes();
            return Some((at, u32::try_from(remaining).unwrap_or(u32::MAX)));
        }
        self.for_cluster(cluster)
            .filter_map(|w| w.next_occurrence(at).map(|s| (s, w.duration_minutes)))
            .min_by_key(|(s, _)| *s)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, day, hour, 0, 0)
            .single()
            .unwrap_or_default()
    }

    fn window(recurrence: Recurrence) -> MaintenanceWindow {
        MaintenanceWindow {
            cluster_name: "prod-01".to_string(),
            start: at(2, 22),
            duration_minutes: 240,
            recurrence,
        }
    }

    #[test]
    fn test_once_window() {
        let w = window(Recurrence::Once);
        assert!(w.contains(at(2, 23)));
        assert!(!w.contains(at(3, 2)));
        assert!(!w.contains(at(2, 21)));
        assert_eq!(w.next_occurrence(at(1, 0)), Some(at(2, 22)));
        assert_eq!(w.next_occurrence(at(3, 0)), None);
    }

    #[test]
    fn test_daily_window_wraps_midnight() {
        let w = window(Recurrence::Daily);
        assert!(w.contains(at(5, 1)));
        assert!(!w.contains(at(5, 12)));
        assert_eq!(w.next_occurrence(at(5, 12)), Some(at(5, 22)));
    }

    #[test]
    fn test_weekly_window() {
        let w = window(Recurrence::Weekly);
        assert!(w.contains(at(9, 23)));
        assert!(!w.contains(at(8, 23)));
        assert_eq!(w.next_occurrence(at(3, 12)), Some(at(9, 22)));
    }

    #[test]
    fn test_calendar_earliest_start() {
        let calendar = MaintenanceCalendar::new(vec![window(Recurrence::Daily)]);
        assert_eq!(
            calendar.earliest_start("prod-01", at(4, 23)),
            Some((at(4, 23), 180))
        );
        assert_eq!(
            calendar.earliest_start("prod-01", at(4, 10)),
            Some((at(4, 22), 240))
        );
        assert_eq!(calendar.earliest_start("other", at(4, 10)), None);
        assert!(!calendar.has_windows("other"));
    }
}
