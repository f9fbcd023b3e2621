/// Calendar-year fetch windows.
///
/// Each chunk is fetched one calendar year at a time. A window is the unit
/// of work for the fetch loop: one window, one outbound request.

use crate::grid::GridChunk;
use crate::model::GridPoint;
use chrono::{Datelike, NaiveDate, Utc};

// ---------------------------------------------------------------------------
// Time source
// ---------------------------------------------------------------------------

/// Supplies "now" for bounding the year range.
pub trait Clock {
    fn current_year(&self) -> i32;
}

/// Wall-clock time in UTC.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn current_year(&self) -> i32 {
        Utc::now().year()
    }
}

/// A pinned year, for tests and replays.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub i32);

impl Clock for FixedClock {
    fn current_year(&self) -> i32 {
        self.0
    }
}

// ---------------------------------------------------------------------------
// Year range
// ---------------------------------------------------------------------------

/// Inclusive range of calendar years to fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct YearRange {
    pub start: i32,
    pub end: i32,
}

impl YearRange {
    /// Builds `[start, min(end, current year)]`. The range is empty when the
    /// capped end lies before `start`.
    pub fn bounded(start: i32, end: i32, clock: &dyn Clock) -> Self {
        Self {
            start,
            end: end.min(clock.current_year()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.end < self.start
    }

    pub fn len(&self) -> usize {
        if self.is_empty() {
            0
        } else {
            (self.end - self.start + 1) as usize
        }
    }

    pub fn years(&self) -> std::ops::RangeInclusive<i32> {
        self.start..=self.end
    }
}

// ---------------------------------------------------------------------------
// Fetch windows
// ---------------------------------------------------------------------------

/// One (chunk, calendar year) unit of fetch work.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FetchWindow<'a> {
    pub chunk_index: usize,
    pub year: i32,
    pub points: &'a [GridPoint],
}

impl FetchWindow<'_> {
    /// January 1st of the window's year.
    pub fn start_date(&self) -> NaiveDate {
        NaiveDate::from_ymd_opt(self.year, 1, 1).unwrap_or(NaiveDate::MIN)
    }

    /// December 31st of the window's year.
    pub fn end_date(&self) -> NaiveDate {
        NaiveDate::from_ymd_opt(self.year, 12, 31).unwrap_or(NaiveDate::MAX)
    }

    /// Number of hourly steps the provider should return per point.
    pub fn expected_hours(&self) -> usize {
        let days = (self.end_date() - self.start_date()).num_days() + 1;
        days as usize * 24
    }
}

/// Yields one window per year of `range` for `chunk`, in ascending order.
pub fn chunk_windows<'a>(
    chunk: GridChunk<'a>,
    range: YearRange,
) -> impl Iterator<Item = FetchWindow<'a>> + 'a {
    range.years().map(move |year| FetchWindow {
        chunk_index: chunk.index,
        year,
        points: chunk.points,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_points() -> Vec<GridPoint> {
        vec![GridPoint::new(39.9, 116.4), GridPoint::new(40.0, 116.4)]
    }

    #[test]
    fn test_range_capped_at_current_year() {
        let range = YearRange::bounded(1990, 2030, &FixedClock(2024));
        assert_eq!(range, YearRange { start: 1990, end: 2024 });
        assert_eq!(range.len(), 35);
    }

    #[test]
    fn test_range_keeps_configured_end_when_in_past() {
        let range = YearRange::bounded(1990, 2023, &FixedClock(2026));
        assert_eq!(range.end, 2023);
        assert_eq!(range.len(), 34);
    }

    #[test]
    fn test_range_empty_when_start_in_future() {
        let range = YearRange::bounded(2030, 2035, &FixedClock(2026));
        assert!(range.is_empty());
        assert_eq!(range.len(), 0);
        assert_eq!(range.years().count(), 0);
    }

    #[test]
    fn test_windows_ascend_through_range() {
        let pts = sample_points();
        let chunk = GridChunk { index: 3, points: &pts };
        let windows: Vec<_> = chunk_windows(chunk, YearRange { start: 2020, end: 2023 }).collect();

        let years: Vec<i32> = windows.iter().map(|w| w.year).collect();
        assert_eq!(years, vec![2020, 2021, 2022, 2023]);
        assert!(windows.iter().all(|w| w.chunk_index == 3 && w.points.len() == 2));
    }

    #[test]
    fn test_window_dates_and_hours() {
        let pts = sample_points();
        let leap = FetchWindow { chunk_index: 0, year: 2020, points: &pts };
        assert_eq!(leap.start_date().to_string(), "2020-01-01");
        assert_eq!(leap.end_date().to_string(), "2020-12-31");
        assert_eq!(leap.expected_hours(), 8784);

        let common = FetchWindow { year: 2021, ..leap };
        assert_eq!(common.expected_hours(), 8760);
    }
}
