/// Read-only coverage summary of the grid table.
///
/// Answers "how far has the ingest got": row totals, how many grid points
/// have data, the covered time span, and per-year row counts.

use crate::model::GRID_TABLE;
use chrono::NaiveDateTime;
use postgres::Client;

#[derive(Debug, Clone, PartialEq)]
pub struct YearCount {
    pub year: i32,
    pub rows: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PointCount {
    pub latitude: f64,
    pub longitude: f64,
    pub rows: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GridStats {
    pub total_rows: i64,
    pub grid_points: i64,
    pub first_timestamp: Option<NaiveDateTime>,
    pub last_timestamp: Option<NaiveDateTime>,
    pub by_year: Vec<YearCount>,
    /// First few points with their row counts.
    pub preview: Vec<PointCount>,
}

impl GridStats {
    /// Rows one point should have for `year` when fully ingested.
    pub fn expected_rows_per_point(year: i32) -> i64 {
        if chrono::NaiveDate::from_ymd_opt(year, 2, 29).is_some() {
            8784
        } else {
            8760
        }
    }

    /// Share of the expected rows present for `year`, given the number of
    /// grid points with data.
    pub fn year_coverage(&self, year: i32) -> Option<f64> {
        let rows = self.by_year.iter().find(|y| y.year == year)?.rows;
        let expected = self.grid_points * Self::expected_rows_per_point(year);
        if expected == 0 {
            return None;
        }
        Some(rows as f64 / expected as f64)
    }
}

pub fn query_grid_stats(client: &mut Client, preview_limit: i64) -> Result<GridStats, postgres::Error> {
    let row = client.query_one(
        &format!(
            "SELECT COUNT(*), COUNT(DISTINCT (latitude, longitude)), MIN(timestamp), MAX(timestamp) FROM {}",
            GRID_TABLE
        ),
        &[],
    )?;

    let total_rows: i64 = row.get(0);
    let grid_points: i64 = row.get(1);
    let first_timestamp: Option<NaiveDateTime> = row.get(2);
    let last_timestamp: Option<NaiveDateTime> = row.get(3);

    let by_year = client
        .query(
            &format!(
                "SELECT EXTRACT(YEAR FROM timestamp)::INT AS year, COUNT(*)
                 FROM {} GROUP BY year ORDER BY year",
                GRID_TABLE
            ),
            &[],
        )?
        .iter()
        .map(|r| YearCount { year: r.get(0), rows: r.get(1) })
        .collect();

    let preview = client
        .query(
            &format!(
                "SELECT latitude, longitude, COUNT(*)
                 FROM {} GROUP BY latitude, longitude
                 ORDER BY latitude, longitude LIMIT $1",
                GRID_TABLE
            ),
            &[&preview_limit],
        )?
        .iter()
        .map(|r| PointCount {
            latitude: r.get(0),
            longitude: r.get(1),
            rows: r.get(2),
        })
        .collect();

    Ok(GridStats {
        total_rows,
        grid_points,
        first_timestamp,
        last_timestamp,
        by_year,
        preview,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(grid_points: i64, by_year: Vec<YearCount>) -> GridStats {
        GridStats {
            total_rows: by_year.iter().map(|y| y.rows).sum(),
            grid_points,
            first_timestamp: None,
            last_timestamp: None,
            by_year,
            preview: Vec::new(),
        }
    }

    #[test]
    fn test_expected_rows_per_point() {
        assert_eq!(GridStats::expected_rows_per_point(2020), 8784);
        assert_eq!(GridStats::expected_rows_per_point(2021), 8760);
        assert_eq!(GridStats::expected_rows_per_point(1900), 8760);
        assert_eq!(GridStats::expected_rows_per_point(2000), 8784);
    }

    #[test]
    fn test_year_coverage() {
        let s = stats(10, vec![YearCount { year: 2021, rows: 43800 }]);
        assert_eq!(s.year_coverage(2021), Some(0.5));
        assert_eq!(s.year_coverage(2022), None);
    }

    #[test]
    fn test_coverage_of_empty_table() {
        assert_eq!(stats(0, vec![YearCount { year: 2021, rows: 0 }]).year_coverage(2021), None);
    }
}
