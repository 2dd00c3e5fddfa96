use crate::aggregate::{aggregate_msas, aggregate_unallocated, CumulativeMatrices, TimeSeriesMatrix};
use crate::config::Config;
use crate::derive::{daily_deltas, rolling_mean, rolling_mean_rounded_up};
use crate::error::Result;
use crate::ingest::{load_reference, load_source, parse_county_csv, IngestedRecords};
use crate::reconcile::{reconcile, MsaLookup, ReconcileReport};
use crate::storage::write_pair;
use crate::types::FipsToMsaEntry;
use chrono::NaiveDate;
use metrics::{counter, histogram};
use serde::Serialize;
use std::io::Read;
use std::path::PathBuf;
use tracing::{info, instrument};

/// Daily new counts for cases and deaths.
#[derive(Debug, Clone, PartialEq)]
pub struct DeltaMatrices {
    pub cases: TimeSeriesMatrix<i64>,
    pub deaths: TimeSeriesMatrix<i64>,
}

/// Rolling averages, either rounded up to integers or left exact.
#[derive(Debug, Clone, PartialEq)]
pub enum RollingMatrices {
    Rounded {
        cases: TimeSeriesMatrix<i64>,
        deaths: TimeSeriesMatrix<i64>,
    },
    Exact {
        cases: TimeSeriesMatrix<f64>,
        deaths: TimeSeriesMatrix<f64>,
    },
}

impl RollingMatrices {
    pub fn column_count(&self) -> usize {
        match self {
            RollingMatrices::Rounded { cases, .. } => cases.column_count(),
            RollingMatrices::Exact { cases, .. } => cases.column_count(),
        }
    }
}

/// Everything one run computes, before persistence.
#[derive(Debug, Clone)]
pub struct PipelineOutputs {
    pub report: ReconcileReport,
    pub cumulative: CumulativeMatrices,
    pub deltas: DeltaMatrices,
    pub rolling: RollingMatrices,
    pub unallocated: Option<CumulativeMatrices>,
}

/// Result of a complete pipeline run
#[derive(Debug, Clone, Serialize)]
pub struct PipelineSummary {
    pub rows_read: usize,
    pub row_errors: usize,
    pub reconcile: ReconcileReport,
    pub msa_count: usize,
    pub first_date: Option<NaiveDate>,
    pub last_date: Option<NaiveDate>,
    pub rolling_columns: usize,
    pub files_written: Vec<PathBuf>,
}

pub struct Pipeline;

impl Pipeline {
    /// Fetch the feed, load the reference table and run every stage.
    #[instrument(skip_all, fields(source = %config.source_url))]
    pub async fn run(config: &Config) -> Result<PipelineSummary> {
        info!("🚀 Starting MSA pipeline");
        counter!("msa_pipeline_runs_total").increment(1);
        let started = std::time::Instant::now();

        let body = load_source(&config.source_url).await?;
        let reference = load_reference(&config.reference_path)?;
        let summary = Self::run_with_inputs(config, body.as_bytes(), reference)?;

        histogram!("msa_pipeline_duration_seconds").record(started.elapsed().as_secs_f64());
        Ok(summary)
    }

    /// Run the synchronous core over inputs that are already in hand.
    pub fn run_with_inputs<R: Read>(
        config: &Config,
        county_csv: R,
        reference: Vec<FipsToMsaEntry>,
    ) -> Result<PipelineSummary> {
        let ingested = parse_county_csv(county_csv)?;
        let rows_read = ingested.rows_read;
        let row_errors = ingested.row_errors.len();

        let outputs = Self::compute(config, ingested, reference)?;
        let files_written = Self::persist(config, &outputs)?;

        let dates = outputs.cumulative.cases.dates();
        let summary = PipelineSummary {
            rows_read,
            row_errors,
            reconcile: outputs.report.clone(),
            msa_count: outputs.cumulative.cases.row_count(),
            first_date: dates.first().copied(),
            last_date: dates.last().copied(),
            rolling_columns: outputs.rolling.column_count(),
            files_written,
        };
        info!(
            "✅ Pipeline finished: {} MSAs, {} files written",
            summary.msa_count,
            summary.files_written.len()
        );
        Ok(summary)
    }

    /// Reconcile, aggregate and derive. No I/O.
    #[instrument(skip_all, fields(rows = ingested.records.len()))]
    pub fn compute(
        config: &Config,
        ingested: IngestedRecords,
        reference: Vec<FipsToMsaEntry>,
    ) -> Result<PipelineOutputs> {
        let lookup = MsaLookup::from_entries(reference);
        info!("🔧 Reconciling counties against {} reference entries", lookup.len());
        let reconciled = reconcile(ingested.records, &lookup);

        let cumulative = aggregate_msas(&reconciled.records, config.gap_fill);
        let deltas = DeltaMatrices {
            cases: daily_deltas(&cumulative.cases),
            deaths: daily_deltas(&cumulative.deaths),
        };
        let rolling = if config.round_up {
            RollingMatrices::Rounded {
                cases: rolling_mean_rounded_up(&deltas.cases, config.rolling_window)?,
                deaths: rolling_mean_rounded_up(&deltas.deaths, config.rolling_window)?,
            }
        } else {
            RollingMatrices::Exact {
                cases: rolling_mean(&deltas.cases, config.rolling_window)?,
                deaths: rolling_mean(&deltas.deaths, config.rolling_window)?,
            }
        };
        let unallocated = config
            .unallocated
            .then(|| aggregate_unallocated(&reconciled.unallocated, config.gap_fill));

        Ok(PipelineOutputs {
            report: reconciled.report,
            cumulative,
            deltas,
            rolling,
            unallocated,
        })
    }

    /// Write the artifacts of a run; returns the paths written.
    pub fn persist(config: &Config, outputs: &PipelineOutputs) -> Result<Vec<PathBuf>> {
        let out = &config.output;
        let mut written = Vec::new();

        info!("💾 Writing artifacts to {}", out.dir.display());
        write_pair(
            &outputs.cumulative.cases,
            &outputs.cumulative.deaths,
            &out.cases(),
            &out.deaths(),
        )?;
        written.extend([out.cases(), out.deaths()]);

        match &outputs.rolling {
            RollingMatrices::Rounded { cases, deaths } => {
                write_pair(cases, deaths, &out.rolling_cases(), &out.rolling_deaths())?
            }
            RollingMatrices::Exact { cases, deaths } => {
                write_pair(cases, deaths, &out.rolling_cases(), &out.rolling_deaths())?
            }
        }
        written.extend([out.rolling_cases(), out.rolling_deaths()]);

        if let Some(unallocated) = &outputs.unallocated {
            write_pair(
                &unallocated.cases,
                &unallocated.deaths,
                &out.unallocated_cases(),
                &out.unallocated_deaths(),
            )?;
            written.extend([out.unallocated_cases(), out.unallocated_deaths()]);
        }

        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::NYC_MSA;

    const FEED: &str = "date,county,state,fips,cases,deaths\n\
        2020-03-01,New York City,New York,,100,1\n\
        2020-03-01,Autauga,Alabama,1001,50,0\n\
        2020-03-01,Unknown,Alabama,,3,0\n\
        2020-03-01,Nowhere,Alabama,1999,4,0\n";

    fn reference() -> Vec<FipsToMsaEntry> {
        vec![FipsToMsaEntry { fips: 1001, msa: Some("Foo".to_string()) }]
    }

    #[test]
    fn nyc_and_generic_rows_land_in_their_own_msas() {
        let ingested = parse_county_csv(FEED.as_bytes()).unwrap();
        let outputs = Pipeline::compute(&Config::default(), ingested, reference()).unwrap();

        let cases = &outputs.cumulative.cases;
        assert_eq!(cases.row_count(), 2);
        assert_eq!(cases.row(NYC_MSA).unwrap(), &[100]);
        assert_eq!(cases.row("Foo").unwrap(), &[50]);
        assert!(outputs.unallocated.is_none());
        assert_eq!(outputs.rolling.column_count(), 0);
    }

    #[test]
    fn unallocated_view_covers_unmapped_rows_only() {
        let config = Config {
            unallocated: true,
            ..Config::default()
        };
        let ingested = parse_county_csv(FEED.as_bytes()).unwrap();
        let outputs = Pipeline::compute(&config, ingested, reference()).unwrap();

        let unallocated = outputs.unallocated.unwrap();
        assert_eq!(unallocated.cases.keys().collect::<Vec<_>>(), vec!["Alabama"]);
        assert_eq!(unallocated.cases.row("Alabama").unwrap(), &[4]);
    }
}
