//! Daily deltas and trailing rolling averages derived from cumulative matrices.

use crate::aggregate::TimeSeriesMatrix;
use crate::error::{PipelineError, Result};
use tracing::instrument;

/// Day-over-day differences of a cumulative matrix.
///
/// Each row is diffed against a synthetic zero column dated one day before the
/// first observed date, so the first delta equals the first cumulative value.
/// The anchor itself is never part of the output: columns are unchanged.
/// Downward corrections in the feed show up as negative deltas.
#[instrument(skip_all, fields(rows = cumulative.row_count()))]
pub fn daily_deltas(cumulative: &TimeSeriesMatrix<u64>) -> TimeSeriesMatrix<i64> {
    cumulative.derive(cumulative.dates().to_vec(), |row| {
        let mut prev = 0i64;
        row.iter()
            .map(|&v| {
                let v = v as i64;
                let delta = v - prev;
                prev = v;
                delta
            })
            .collect()
    })
}

/// Trailing mean over `window` consecutive columns, inclusive of the current one.
///
/// The first `window - 1` columns have no full window and are omitted; a
/// matrix with fewer than `window` columns yields empty rows.
#[instrument(skip_all, fields(rows = deltas.row_count(), window = window))]
pub fn rolling_mean(
    deltas: &TimeSeriesMatrix<i64>,
    window: usize,
) -> Result<TimeSeriesMatrix<f64>> {
    check_window(window)?;
    Ok(deltas.derive(rolling_dates(deltas, window), |row| {
        row.windows(window)
            .map(|w| w.iter().sum::<i64>() as f64 / window as f64)
            .collect()
    }))
}

/// [`rolling_mean`] rounded up to the next integer.
///
/// Rounding is a ceiling, never to nearest, so a published daily estimate is
/// never below the true mean. Computed with integer division to stay exact.
#[instrument(skip_all, fields(rows = deltas.row_count(), window = window))]
pub fn rolling_mean_rounded_up(
    deltas: &TimeSeriesMatrix<i64>,
    window: usize,
) -> Result<TimeSeriesMatrix<i64>> {
    check_window(window)?;
    let divisor = window as i64;
    Ok(deltas.derive(rolling_dates(deltas, window), |row| {
        row.windows(window)
            .map(|w| ceil_div(w.iter().sum::<i64>(), divisor))
            .collect()
    }))
}

fn check_window(window: usize) -> Result<()> {
    if window == 0 {
        return Err(PipelineError::Config(
            "rolling window must be at least 1".to_string(),
        ));
    }
    Ok(())
}

fn rolling_dates<V>(m: &TimeSeriesMatrix<V>, window: usize) -> Vec<chrono::NaiveDate> {
    m.dates()
        .get(window - 1..)
        .map(<[_]>::to_vec)
        .unwrap_or_default()
}

fn ceil_div(n: i64, d: i64) -> i64 {
    -((-n).div_euclid(d))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate};
    use std::collections::BTreeMap;

    fn matrix<V: Clone>(values: &[V]) -> TimeSeriesMatrix<V> {
        let start = NaiveDate::from_ymd_opt(2020, 3, 1).unwrap();
        let dates = (0..values.len())
            .map(|i| start + Duration::days(i as i64))
            .collect();
        let mut rows = BTreeMap::new();
        rows.insert("Foo".to_string(), values.to_vec());
        TimeSeriesMatrix::new("msas", dates, rows).unwrap()
    }

    #[test]
    fn deltas_are_anchored_at_zero() {
        let cumulative = matrix(&[0u64, 10, 10, 30]);
        let deltas = daily_deltas(&cumulative);
        assert_eq!(deltas.row("Foo").unwrap(), &[0, 10, 0, 20]);
        assert_eq!(deltas.dates(), cumulative.dates());

        let nonzero_start = matrix(&[12u64, 15]);
        let first = nonzero_start.dates()[0];
        assert_eq!(daily_deltas(&nonzero_start).value("Foo", first), Some(&12));
    }

    #[test]
    fn downward_revisions_give_negative_deltas() {
        let deltas = daily_deltas(&matrix(&[5u64, 3, 3]));
        assert_eq!(deltas.row("Foo").unwrap(), &[5, -2, 0]);
    }

    #[test]
    fn rolling_mean_drops_leading_columns() {
        let deltas = matrix(&[5i64, 5, 5, 5, 5, 5, 5, 10]);
        let rolling = rolling_mean(&deltas, 7).unwrap();

        assert_eq!(rolling.column_count(), deltas.column_count() - 6);
        assert_eq!(rolling.dates()[0], deltas.dates()[6]);
        let row = rolling.row("Foo").unwrap();
        assert_eq!(row[0], 5.0);
        assert!((row[1] - 40.0 / 7.0).abs() < 1e-12);
    }

    #[test]
    fn rounded_rolling_mean_is_a_ceiling() {
        let deltas = matrix(&[5i64, 5, 5, 5, 5, 5, 5, 10]);
        let rounded = rolling_mean_rounded_up(&deltas, 7).unwrap();
        assert_eq!(rounded.row("Foo").unwrap(), &[5, 6]);
        let last = *deltas.dates().last().unwrap();
        assert_eq!(rounded.value("Foo", last), Some(&6));
    }

    #[test]
    fn ceiling_bounds_hold_for_mixed_signs() {
        let deltas = matrix(&[3i64, -1, 0, 7, -20, 4, 1, 0, 0, 9, -3, 2, 1]);
        let exact = rolling_mean(&deltas, 7).unwrap();
        let rounded = rolling_mean_rounded_up(&deltas, 7).unwrap();
        for (mean, up) in exact.row("Foo").unwrap().iter().zip(rounded.row("Foo").unwrap()) {
            let up = *up as f64;
            assert!(up >= *mean, "{up} < {mean}");
            assert!(up < mean + 1.0, "{up} >= {mean} + 1");
        }
    }

    #[test]
    fn short_rows_have_no_rolling_values() {
        let rolling = rolling_mean(&matrix(&[1i64, 2, 3]), 7).unwrap();
        assert_eq!(rolling.column_count(), 0);
        assert_eq!(rolling.row("Foo").unwrap(), &[] as &[f64]);
    }

    #[test]
    fn zero_window_is_a_config_error() {
        assert!(rolling_mean(&matrix(&[1i64]), 0).is_err());
    }
}
