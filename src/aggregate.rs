//! Cumulative aggregation of county rows into dense entity × date matrices.

use crate::error::{PipelineError, Result};
use crate::types::{CountyDayRecord, GapFill, GroupKey, ReconciledRecord};
use chrono::NaiveDate;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::{info, instrument};

/// Dense matrix of values keyed by entity (rows, sorted) and date (columns, ascending).
#[derive(Debug, Clone, PartialEq)]
pub struct TimeSeriesMatrix<V> {
    key_column: String,
    dates: Vec<NaiveDate>,
    rows: BTreeMap<String, Vec<V>>,
}

impl<V> TimeSeriesMatrix<V> {
    /// Build a matrix, checking that dates ascend strictly and every row is dense.
    pub fn new(
        key_column: impl Into<String>,
        dates: Vec<NaiveDate>,
        rows: BTreeMap<String, Vec<V>>,
    ) -> Result<Self> {
        if dates.windows(2).any(|w| w[0] >= w[1]) {
            return Err(PipelineError::InvalidInput(
                "matrix dates must be strictly ascending".to_string(),
            ));
        }
        if let Some((key, row)) = rows.iter().find(|(_, row)| row.len() != dates.len()) {
            return Err(PipelineError::InvalidInput(format!(
                "row '{key}' has {} values for {} dates",
                row.len(),
                dates.len()
            )));
        }
        Ok(Self {
            key_column: key_column.into(),
            dates,
            rows,
        })
    }

    pub fn key_column(&self) -> &str {
        &self.key_column
    }

    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.rows.keys().map(String::as_str)
    }

    pub fn rows(&self) -> impl Iterator<Item = (&str, &[V])> {
        self.rows.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    pub fn row(&self, key: &str) -> Option<&[V]> {
        self.rows.get(key).map(Vec::as_slice)
    }

    pub fn value(&self, key: &str, date: NaiveDate) -> Option<&V> {
        let idx = self.dates.binary_search(&date).ok()?;
        self.rows.get(key)?.get(idx)
    }

    pub fn column_count(&self) -> usize {
        self.dates.len()
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Derive a new matrix with the same keys, transforming each row independently.
    ///
    /// `f` must return exactly `dates.len()` values per row.
    pub(crate) fn derive<W>(
        &self,
        dates: Vec<NaiveDate>,
        mut f: impl FnMut(&[V]) -> Vec<W>,
    ) -> TimeSeriesMatrix<W> {
        let rows = self
            .rows
            .iter()
            .map(|(k, v)| (k.clone(), f(v)))
            .collect::<BTreeMap<_, _>>();
        debug_assert!(rows.values().all(|r| r.len() == dates.len()));
        TimeSeriesMatrix {
            key_column: self.key_column.clone(),
            dates,
            rows,
        }
    }
}

/// Cumulative cases and deaths sharing the same row index and columns.
#[derive(Debug, Clone, PartialEq)]
pub struct CumulativeMatrices {
    pub cases: TimeSeriesMatrix<u64>,
    pub deaths: TimeSeriesMatrix<u64>,
}

/// Sum cumulative counts per MSA per date.
#[instrument(skip_all, fields(records = records.len()))]
pub fn aggregate_msas(records: &[ReconciledRecord], gap_fill: GapFill) -> CumulativeMatrices {
    let matrices = aggregate_by(
        records.iter().map(|r| (r.msa.as_str(), &r.record)),
        GroupKey::Msa,
        gap_fill,
    );
    info!(
        "✅ Aggregated {} MSAs over {} dates",
        matrices.cases.row_count(),
        matrices.cases.column_count()
    );
    matrices
}

/// Sum cumulative counts per state over rows that never gained an MSA.
#[instrument(skip_all, fields(records = records.len()))]
pub fn aggregate_unallocated(records: &[CountyDayRecord], gap_fill: GapFill) -> CumulativeMatrices {
    aggregate_by(
        records
            .iter()
            .filter_map(|r| r.state.as_deref().map(|state| (state, r))),
        GroupKey::State,
        gap_fill,
    )
}

fn aggregate_by<'a>(
    rows: impl Iterator<Item = (&'a str, &'a CountyDayRecord)>,
    group: GroupKey,
    gap_fill: GapFill,
) -> CumulativeMatrices {
    let mut dates = BTreeSet::new();
    let mut keys = BTreeSet::new();
    let mut sums: HashMap<(&str, NaiveDate), (u64, u64)> = HashMap::new();

    for (key, record) in rows {
        dates.insert(record.date);
        keys.insert(key);
        let slot = sums.entry((key, record.date)).or_default();
        // a null count on a kept row contributes nothing to the sum
        slot.0 += record.cases.unwrap_or(0);
        slot.1 += record.deaths.unwrap_or(0);
    }

    let dates: Vec<NaiveDate> = dates.into_iter().collect();
    let mut cases = BTreeMap::new();
    let mut deaths = BTreeMap::new();
    for key in keys {
        let mut case_row = Vec::with_capacity(dates.len());
        let mut death_row = Vec::with_capacity(dates.len());
        let mut last = (0u64, 0u64);
        for date in &dates {
            let value = match (sums.get(&(key, *date)), gap_fill) {
                (Some(v), _) => *v,
                (None, GapFill::Zero) => (0, 0),
                (None, GapFill::CarryForward) => last,
            };
            last = value;
            case_row.push(value.0);
            death_row.push(value.1);
        }
        cases.insert(key.to_string(), case_row);
        deaths.insert(key.to_string(), death_row);
    }

    CumulativeMatrices {
        cases: TimeSeriesMatrix {
            key_column: group.column_name().to_string(),
            dates: dates.clone(),
            rows: cases,
        },
        deaths: TimeSeriesMatrix {
            key_column: group.column_name().to_string(),
            dates,
            rows: deaths,
        },
    }
}
