use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// One county's cumulative counts on one day, as reported by the source feed.
///
/// Everything but the date is nullable: the feed leaves cells empty for
/// territories, unknown geographies and pseudo-counties.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountyDayRecord {
    pub date: NaiveDate,
    pub county: Option<String>,
    pub state: Option<String>,
    pub fips: Option<u32>,
    pub cases: Option<u64>,
    pub deaths: Option<u64>,
}

impl CountyDayRecord {
    /// True when every nullable field carries a value.
    pub fn is_complete(&self) -> bool {
        self.fips.is_some() && self.is_complete_except_fips()
    }

    /// True when only the FIPS code may be missing.
    pub fn is_complete_except_fips(&self) -> bool {
        self.county.is_some()
            && self.state.is_some()
            && self.cases.is_some()
            && self.deaths.is_some()
    }

    pub fn is_county(&self, county: &str, state: &str) -> bool {
        self.county.as_deref() == Some(county) && self.state.as_deref() == Some(state)
    }
}

/// A row of the county-to-MSA reference table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FipsToMsaEntry {
    pub fips: u32,
    pub msa: Option<String>,
}

/// Outcome of looking a FIPS code up in the reference table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MsaAssignment {
    Mapped(String),
    /// No reference row for this FIPS code.
    NotFound,
    /// A reference row exists but its MSA cell is empty.
    Blank,
}

/// A county row that has been attributed to an MSA. `msa` is never empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconciledRecord {
    pub record: CountyDayRecord,
    pub msa: String,
}

/// Which entity the aggregator groups rows under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupKey {
    Msa,
    State,
}

impl GroupKey {
    /// Header of the first column in persisted artifacts.
    pub fn column_name(self) -> &'static str {
        match self {
            GroupKey::Msa => "msas",
            GroupKey::State => "state",
        }
    }
}

/// How the aggregator treats an entity with no rows on a given date.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GapFill {
    /// The empty sum, 0. Long-standing output behavior.
    #[default]
    Zero,
    /// Repeat the entity's last known cumulative value (0 before its first report).
    CarryForward,
}
