/// Default source feed: NYT county-level cumulative counts.
pub const DEFAULT_SOURCE_URL: &str =
    "https://raw.githubusercontent.com/nytimes/covid-19-data/master/us-counties.csv";

pub const DEFAULT_REFERENCE_PATH: &str = "data/fips_code_ref.csv";
pub const DEFAULT_OUTPUT_DIR: &str = "data";

pub const CASES_FILE: &str = "all_msas_cases.csv";
pub const DEATHS_FILE: &str = "all_msas_deaths.csv";
pub const ROLLING_CASES_FILE: &str = "all_msas_cases_7day.csv";
pub const ROLLING_DEATHS_FILE: &str = "all_msas_deaths_7day.csv";
pub const UNALLOCATED_CASES_FILE: &str = "unallocated_cases.csv";
pub const UNALLOCATED_DEATHS_FILE: &str = "unallocated_deaths.csv";

pub const DEFAULT_ROLLING_WINDOW: usize = 7;
pub const DEFAULT_SERVER_PORT: u16 = 3444;

// The feed reports these cities as single pseudo-counties without a FIPS code,
// so they are pinned to a county FIPS and MSA directly.
pub const NYC_COUNTY: &str = "New York City";
pub const NYC_STATE: &str = "New York";
pub const NYC_FIPS: u32 = 36061;
pub const NYC_MSA: &str = "New York-Newark-Jersey City, NY-NJ-PA";

pub const KANSAS_CITY_COUNTY: &str = "Kansas City";
pub const KANSAS_CITY_STATE: &str = "Missouri";
pub const KANSAS_CITY_FIPS: u32 = 29095;
pub const KANSAS_CITY_MSA: &str = "Kansas City, MO-KS";

pub const UNKNOWN_COUNTY: &str = "Unknown";

// Reference table columns
pub const REFERENCE_FIPS_COLUMN: &str = "Geo_FIPS";
pub const REFERENCE_MSA_COLUMN: &str = "MSA";

// Database tables replaced by the upload
pub const CASES_TABLE: &str = "cases";
pub const DEATHS_TABLE: &str = "deaths";
