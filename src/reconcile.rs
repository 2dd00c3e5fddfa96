//! County-to-MSA reconciliation.
//!
//! Two pseudo-counties in the feed (New York City and Kansas City, Missouri)
//! carry no usable FIPS code and are pinned to a fixed county and MSA before
//! the generic lookup runs. Every other row is looked up by FIPS; rows that
//! cannot be attributed to an MSA, or that carry a null field, are dropped.

use crate::constants::{
    KANSAS_CITY_COUNTY, KANSAS_CITY_FIPS, KANSAS_CITY_MSA, KANSAS_CITY_STATE, NYC_COUNTY, NYC_FIPS,
    NYC_MSA, NYC_STATE, UNKNOWN_COUNTY,
};
use crate::types::{CountyDayRecord, FipsToMsaEntry, MsaAssignment, ReconciledRecord};
use metrics::counter;
use serde::Serialize;
use std::collections::HashMap;
use tracing::{debug, info, instrument};

/// FIPS→MSA lookup built from the reference table.
#[derive(Debug, Clone, Default)]
pub struct MsaLookup {
    by_fips: HashMap<u32, Option<String>>,
}

impl MsaLookup {
    /// Build the lookup. When a FIPS code appears more than once the first row wins.
    pub fn from_entries(entries: impl IntoIterator<Item = FipsToMsaEntry>) -> Self {
        let mut by_fips = HashMap::new();
        for entry in entries {
            by_fips.entry(entry.fips).or_insert(entry.msa);
        }
        Self { by_fips }
    }

    pub fn len(&self) -> usize {
        self.by_fips.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_fips.is_empty()
    }

    pub fn assign(&self, fips: Option<u32>) -> MsaAssignment {
        let Some(fips) = fips else {
            return MsaAssignment::NotFound;
        };
        match self.by_fips.get(&fips) {
            None => MsaAssignment::NotFound,
            Some(Some(msa)) if !msa.trim().is_empty() => MsaAssignment::Mapped(msa.clone()),
            Some(_) => MsaAssignment::Blank,
        }
    }
}

/// Row counts per reconciliation outcome.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub input_rows: usize,
    pub mapped: usize,
    pub new_york_city: usize,
    pub kansas_city: usize,
    pub not_found: usize,
    pub blank_msa: usize,
    pub incomplete: usize,
    pub unknown_county: usize,
}

impl ReconcileReport {
    pub fn kept(&self) -> usize {
        self.mapped + self.new_york_city + self.kansas_city
    }
}

/// Reconciler output.
#[derive(Debug, Clone, Default)]
pub struct Reconciliation {
    pub records: Vec<ReconciledRecord>,
    /// Rows that never gain an MSA but are otherwise usable: complete rows
    /// whose FIPS has no MSA, and complete rows without a FIPS code.
    /// Input for the state-level view.
    pub unallocated: Vec<CountyDayRecord>,
    pub report: ReconcileReport,
}

enum SpecialCase {
    NewYorkCity,
    KansasCity,
}

fn special_case(record: &CountyDayRecord) -> Option<SpecialCase> {
    if record.is_county(NYC_COUNTY, NYC_STATE) {
        Some(SpecialCase::NewYorkCity)
    } else if record.is_county(KANSAS_CITY_COUNTY, KANSAS_CITY_STATE) {
        Some(SpecialCase::KansasCity)
    } else {
        None
    }
}

fn pin(mut record: CountyDayRecord, fips: u32, msa: &str) -> ReconciledRecord {
    record.fips = Some(fips);
    ReconciledRecord {
        record,
        msa: msa.to_string(),
    }
}

/// Attribute every county row to an MSA, dropping the rows that cannot be.
///
/// Output order is not meaningful: generic rows come first, then the
/// New York City rows, then the Kansas City rows.
#[instrument(skip_all, fields(rows = records.len()))]
pub fn reconcile(records: Vec<CountyDayRecord>, lookup: &MsaLookup) -> Reconciliation {
    let mut report = ReconcileReport {
        input_rows: records.len(),
        ..Default::default()
    };
    let mut generic = Vec::new();
    let mut new_york_city = Vec::new();
    let mut kansas_city = Vec::new();
    let mut unallocated = Vec::new();

    for record in records {
        match special_case(&record) {
            Some(SpecialCase::NewYorkCity) => {
                new_york_city.push(pin(record, NYC_FIPS, NYC_MSA));
                continue;
            }
            Some(SpecialCase::KansasCity) => {
                kansas_city.push(pin(record, KANSAS_CITY_FIPS, KANSAS_CITY_MSA));
                continue;
            }
            None => {}
        }

        if record.county.as_deref() == Some(UNKNOWN_COUNTY) {
            report.unknown_county += 1;
            continue;
        }

        if !record.is_complete() {
            report.incomplete += 1;
            if record.fips.is_none() && record.is_complete_except_fips() {
                unallocated.push(record);
            }
            continue;
        }
        match lookup.assign(record.fips) {
            MsaAssignment::Mapped(msa) => generic.push(ReconciledRecord { record, msa }),
            MsaAssignment::NotFound => {
                report.not_found += 1;
                unallocated.push(record);
            }
            MsaAssignment::Blank => {
                report.blank_msa += 1;
                unallocated.push(record);
            }
        }
    }

    report.mapped = generic.len();
    report.new_york_city = new_york_city.len();
    report.kansas_city = kansas_city.len();

    counter!("msa_rows_dropped_total", "reason" => "not_found").increment(report.not_found as u64);
    counter!("msa_rows_dropped_total", "reason" => "blank_msa").increment(report.blank_msa as u64);
    counter!("msa_rows_dropped_total", "reason" => "incomplete")
        .increment(report.incomplete as u64);
    counter!("msa_rows_dropped_total", "reason" => "unknown_county")
        .increment(report.unknown_county as u64);
    debug!(?report, "Reconciliation outcome");
    info!(
        "✅ Reconciled {} of {} rows ({} unmapped, {} incomplete, {} unknown county)",
        report.kept(),
        report.input_rows,
        report.not_found + report.blank_msa,
        report.incomplete,
        report.unknown_county
    );

    let mut out = generic;
    out.extend(new_york_city);
    out.extend(kansas_city);

    Reconciliation {
        records: out,
        unallocated,
        report,
    }
}
