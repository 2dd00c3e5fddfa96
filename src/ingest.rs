//! Loading of the county feed and the FIPS→MSA reference table.
//!
//! Both inputs are read whole. Rows that cannot be parsed are collected as
//! [`RowError`]s and skipped; they never abort the run.

use crate::constants::{REFERENCE_FIPS_COLUMN, REFERENCE_MSA_COLUMN};
use crate::error::{PipelineError, Result};
use crate::types::{CountyDayRecord, FipsToMsaEntry};
use chrono::NaiveDate;
use csv::StringRecord;
use metrics::counter;
use serde::Deserialize;
use std::collections::HashMap;
use std::io::Read;
use std::path::Path;
use tracing::{debug, info, instrument, warn};

/// A row-level problem found while parsing an input table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowError {
    pub line: usize,
    pub message: String,
}

/// Parsed county feed.
#[derive(Debug, Clone, Default)]
pub struct IngestedRecords {
    pub records: Vec<CountyDayRecord>,
    pub row_errors: Vec<RowError>,
    pub rows_read: usize,
}

#[derive(Debug, Deserialize)]
struct RawCountyRow {
    date: Option<String>,
    county: Option<String>,
    state: Option<String>,
    fips: Option<String>,
    cases: Option<String>,
    deaths: Option<String>,
}

/// Fetch the whole source payload over HTTP.
#[instrument]
pub async fn fetch_source(url: &str) -> Result<String> {
    info!("📡 Fetching county feed from {}", url);
    let t0 = std::time::Instant::now();
    let resp = reqwest::Client::new().get(url).send().await?.error_for_status()?;
    let body = resp.text().await?;
    metrics::histogram!("msa_fetch_duration_seconds").record(t0.elapsed().as_secs_f64());
    info!("✅ Fetched {} bytes", body.len());
    Ok(body)
}

/// Read the feed from an http(s) URL or a local file path.
pub async fn load_source(location: &str) -> Result<String> {
    if location.starts_with("http://") || location.starts_with("https://") {
        fetch_source(location).await
    } else {
        debug!("Reading county feed from local file {}", location);
        Ok(tokio::fs::read_to_string(location).await?)
    }
}

const FEED_COLUMNS: [&str; 6] = ["date", "county", "state", "fips", "cases", "deaths"];

/// Parse the county feed (`date,county,state,fips,cases,deaths`).
///
/// A header missing any of those columns rejects the whole payload, so an
/// error page or a reshaped feed never replaces the previous artifacts.
pub fn parse_county_csv<R: Read>(reader: R) -> Result<IngestedRecords> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(reader);

    let headers = build_header_map(csv_reader.headers()?);
    for column in FEED_COLUMNS {
        required_column(&headers, "county feed", column)?;
    }

    let mut out = IngestedRecords::default();
    for (idx, row) in csv_reader.deserialize::<RawCountyRow>().enumerate() {
        // records start on line 2, after the header
        let line = idx + 2;
        out.rows_read += 1;

        let parsed = row
            .map_err(|e| format!("CSV parse error: {e}"))
            .and_then(normalize_county_row);
        match parsed {
            Ok(record) => out.records.push(record),
            Err(message) => out.row_errors.push(RowError { line, message }),
        }
    }

    counter!("msa_rows_ingested_total").increment(out.records.len() as u64);
    counter!("msa_row_errors_total").increment(out.row_errors.len() as u64);
    if !out.row_errors.is_empty() {
        warn!(
            "{} of {} feed rows could not be parsed",
            out.row_errors.len(),
            out.rows_read
        );
    }
    Ok(out)
}

fn normalize_county_row(raw: RawCountyRow) -> std::result::Result<CountyDayRecord, String> {
    let date_str = non_empty(raw.date).ok_or("missing date")?;
    let date = NaiveDate::parse_from_str(&date_str, "%Y-%m-%d")
        .map_err(|e| format!("invalid date '{date_str}': {e}"))?;

    let fips = non_empty(raw.fips)
        .map(|v| parse_whole_number(&v, "fips"))
        .transpose()?
        .map(|v| u32::try_from(v).map_err(|_| format!("fips {v} out of range")))
        .transpose()?;

    Ok(CountyDayRecord {
        date,
        county: non_empty(raw.county),
        state: non_empty(raw.state),
        fips,
        cases: non_empty(raw.cases)
            .map(|v| parse_whole_number(&v, "cases"))
            .transpose()?,
        deaths: non_empty(raw.deaths)
            .map(|v| parse_whole_number(&v, "deaths"))
            .transpose()?,
    })
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Parse a non-negative integer that may have been exported as `123.0`.
fn parse_whole_number(value: &str, field: &str) -> std::result::Result<u64, String> {
    let value = value.trim();
    if let Ok(n) = value.parse::<u64>() {
        return Ok(n);
    }
    match value.parse::<f64>() {
        Ok(f) if f >= 0.0 && f.fract() == 0.0 && f <= u64::MAX as f64 => Ok(f as u64),
        _ => Err(format!("invalid {field} '{value}'")),
    }
}

/// Load the FIPS→MSA reference table from a CSV file.
#[instrument(skip_all, fields(path = %path.as_ref().display()))]
pub fn load_reference(path: impl AsRef<Path>) -> Result<Vec<FipsToMsaEntry>> {
    let path = path.as_ref();
    let file = std::fs::File::open(path).map_err(|e| {
        PipelineError::Config(format!(
            "Failed to open reference table '{}': {e}",
            path.display()
        ))
    })?;
    let entries = parse_reference_csv(file)?;
    info!("Loaded {} reference entries", entries.len());
    Ok(entries)
}

/// Parse a reference table with at least `Geo_FIPS` and `MSA` columns.
pub fn parse_reference_csv<R: Read>(reader: R) -> Result<Vec<FipsToMsaEntry>> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(reader);

    let headers = build_header_map(csv_reader.headers()?);
    let fips_idx = required_column(&headers, "reference table", REFERENCE_FIPS_COLUMN)?;
    let msa_idx = required_column(&headers, "reference table", REFERENCE_MSA_COLUMN)?;

    let mut entries = Vec::new();
    for (idx, record) in csv_reader.records().enumerate() {
        let record = record?;
        let raw_fips = record.get(fips_idx).unwrap_or("");
        let fips = match parse_whole_number(raw_fips, REFERENCE_FIPS_COLUMN)
            .ok()
            .and_then(|v| u32::try_from(v).ok())
        {
            Some(f) => f,
            None => {
                debug!(line = idx + 2, "Skipping reference row with FIPS '{}'", raw_fips);
                continue;
            }
        };
        let msa = record
            .get(msa_idx)
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .map(str::to_string);
        entries.push(FipsToMsaEntry { fips, msa });
    }
    Ok(entries)
}

fn build_header_map(headers: &StringRecord) -> HashMap<String, usize> {
    headers
        .iter()
        .enumerate()
        .map(|(idx, name)| (normalize_header_name(name), idx))
        .collect()
}

fn normalize_header_name(name: &str) -> String {
    // spreadsheet exports may prefix the first header with a BOM
    name.trim().trim_start_matches('\u{feff}').to_ascii_lowercase()
}

fn required_column(headers: &HashMap<String, usize>, table: &str, name: &str) -> Result<usize> {
    headers
        .get(&normalize_header_name(name))
        .copied()
        .ok_or_else(|| PipelineError::InvalidInput(format!("{table} has no '{name}' column")))
}
