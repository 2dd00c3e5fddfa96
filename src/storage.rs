//! CSV persistence of time-series matrices.
//!
//! Artifacts have a header `<key_column>,<date_1>,<date_2>,...` and one row
//! per entity. Files are written next to their destination and renamed into
//! place so readers never observe a half-written artifact.

use crate::aggregate::TimeSeriesMatrix;
use crate::error::{PipelineError, Result};
use chrono::NaiveDate;
use std::collections::BTreeMap;
use std::fmt::Display;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info, instrument};

/// Write one matrix to `path`, replacing any existing file.
#[instrument(skip_all, fields(path = %path.display(), rows = matrix.row_count()))]
pub fn write_matrix<V: Display>(path: &Path, matrix: &TimeSeriesMatrix<V>) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| PipelineError::write(path, e))?;
    }

    let tmp = temp_path(path);
    let written = write_csv(&tmp, matrix).and_then(|()| fs::rename(&tmp, path));
    if let Err(e) = written {
        let _ = fs::remove_file(&tmp);
        return Err(PipelineError::write(path, e));
    }

    debug!(
        "Wrote {} rows x {} dates",
        matrix.row_count(),
        matrix.column_count()
    );
    Ok(())
}

/// Write the cases and deaths matrices of one run.
///
/// The writes are independent: if the deaths write fails after the cases
/// write succeeded, the error is still returned and the run must be repeated.
pub fn write_pair<V: Display>(
    cases: &TimeSeriesMatrix<V>,
    deaths: &TimeSeriesMatrix<V>,
    cases_path: &Path,
    deaths_path: &Path,
) -> Result<()> {
    write_matrix(cases_path, cases)?;
    write_matrix(deaths_path, deaths)?;
    info!(
        "💾 Saved {} and {}",
        cases_path.display(),
        deaths_path.display()
    );
    Ok(())
}

fn temp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{name}.tmp"))
}

fn write_csv<V: Display>(path: &Path, matrix: &TimeSeriesMatrix<V>) -> std::io::Result<()> {
    let mut writer = csv::Writer::from_path(path)?;

    let mut header = Vec::with_capacity(matrix.column_count() + 1);
    header.push(matrix.key_column().to_string());
    header.extend(matrix.dates().iter().map(|d| d.format("%Y-%m-%d").to_string()));
    writer.write_record(&header)?;

    for (key, row) in matrix.rows() {
        let mut record = Vec::with_capacity(row.len() + 1);
        record.push(key.to_string());
        record.extend(row.iter().map(ToString::to_string));
        writer.write_record(&record)?;
    }
    writer.flush()?;
    Ok(())
}

/// Untyped view of an artifact: header and string cells, in file order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Table {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

pub fn read_table(path: &Path) -> Result<Table> {
    let mut reader = csv::Reader::from_path(path).map_err(|e| PipelineError::read(path, e))?;
    let headers = reader
        .headers()
        .map_err(|e| PipelineError::read(path, e))?
        .iter()
        .map(str::to_string)
        .collect::<Vec<_>>();
    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| PipelineError::read(path, e))?;
        rows.push(record.iter().map(str::to_string).collect());
    }
    Ok(Table { headers, rows })
}

/// Read an artifact back into a matrix.
pub fn read_matrix<V>(path: &Path) -> Result<TimeSeriesMatrix<V>>
where
    V: FromStr,
    V::Err: Display,
{
    let table = read_table(path)?;
    let (key_column, date_headers) = table
        .headers
        .split_first()
        .ok_or_else(|| PipelineError::read(path, "artifact has no header"))?;

    let dates = date_headers
        .iter()
        .map(|h| {
            NaiveDate::parse_from_str(h, "%Y-%m-%d")
                .map_err(|e| PipelineError::read(path, format!("bad date column '{h}': {e}")))
        })
        .collect::<Result<Vec<_>>>()?;

    let mut rows = BTreeMap::new();
    for (line, record) in table.rows.into_iter().enumerate() {
        let mut cells = record.into_iter();
        let key = cells.next().unwrap_or_default();
        let values = cells
            .map(|c| {
                c.parse::<V>().map_err(|e| {
                    PipelineError::read(path, format!("row {}: bad value '{c}': {e}", line + 2))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        if rows.insert(key.clone(), values).is_some() {
            return Err(PipelineError::read(path, format!("duplicate row '{key}'")));
        }
    }

    TimeSeriesMatrix::new(key_column.clone(), dates, rows)
        .map_err(|e| PipelineError::read(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample() -> TimeSeriesMatrix<u64> {
        let dates = vec![
            NaiveDate::from_ymd_opt(2020, 3, 1).unwrap(),
            NaiveDate::from_ymd_opt(2020, 3, 2).unwrap(),
        ];
        let mut rows = BTreeMap::new();
        rows.insert("Kansas City, MO-KS".to_string(), vec![1, 4]);
        rows.insert("Abilene, TX".to_string(), vec![0, 2]);
        TimeSeriesMatrix::new("msas", dates, rows).unwrap()
    }

    #[test]
    fn writes_header_and_quoted_keys() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cases.csv");
        write_matrix(&path, &sample()).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "msas,2020-03-01,2020-03-02");
        assert_eq!(lines[1], "\"Abilene, TX\",0,2");
        assert_eq!(lines[2], "\"Kansas City, MO-KS\",1,4");
        assert!(!dir.path().join(".cases.csv.tmp").exists());
    }

    #[test]
    fn round_trips_through_csv() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested/out/cases.csv");
        let original = sample();
        write_matrix(&path, &original).unwrap();
        let back: TimeSeriesMatrix<u64> = read_matrix(&path).unwrap();
        assert_eq!(back, original);
    }

    #[test]
    fn unwritable_target_is_an_error() {
        let dir = tempdir().unwrap();
        // a directory where the file should go
        let path = dir.path().join("cases.csv");
        fs::create_dir(&path).unwrap();
        let err = write_matrix(&path, &sample()).unwrap_err();
        assert!(matches!(err, PipelineError::Write { .. }));
    }

    #[test]
    fn pair_write_reports_the_failing_side() {
        let dir = tempdir().unwrap();
        let cases = dir.path().join("cases.csv");
        let deaths = dir.path().join("deaths.csv");
        fs::create_dir(&deaths).unwrap();
        let err = write_pair(&sample(), &sample(), &cases, &deaths).unwrap_err();
        match err {
            PipelineError::Write { path, .. } => assert_eq!(path, deaths),
            other => panic!("unexpected error: {other}"),
        }
        assert!(cases.exists());
    }
}
