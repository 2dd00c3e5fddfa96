use crate::constants::{
    CASES_FILE, DEATHS_FILE, DEFAULT_OUTPUT_DIR, DEFAULT_REFERENCE_PATH, DEFAULT_ROLLING_WINDOW,
    DEFAULT_SERVER_PORT, DEFAULT_SOURCE_URL, ROLLING_CASES_FILE, ROLLING_DEATHS_FILE,
    UNALLOCATED_CASES_FILE, UNALLOCATED_DEATHS_FILE,
};
use crate::error::{PipelineError, Result};
use crate::types::GapFill;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_PATH: &str = "msa_pipeline.toml";

/// Settings for one pipeline run and for the read API.
///
/// Every field has a default, so an absent or partial `msa_pipeline.toml` is fine.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// http(s) URL or local path of the county feed
    pub source_url: String,
    pub reference_path: PathBuf,
    pub output: OutputConfig,
    pub rolling_window: usize,
    pub round_up: bool,
    pub gap_fill: GapFill,
    pub unallocated: bool,
    pub server: ServerConfig,
    /// Never read from the config file; see [`DbCredentials::from_env`].
    #[serde(skip)]
    pub db: Option<DbCredentials>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            source_url: DEFAULT_SOURCE_URL.to_string(),
            reference_path: PathBuf::from(DEFAULT_REFERENCE_PATH),
            output: OutputConfig::default(),
            rolling_window: DEFAULT_ROLLING_WINDOW,
            round_up: true,
            gap_fill: GapFill::Zero,
            unallocated: false,
            server: ServerConfig::default(),
            db: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub dir: PathBuf,
    pub cases_file: String,
    pub deaths_file: String,
    pub rolling_cases_file: String,
    pub rolling_deaths_file: String,
    pub unallocated_cases_file: String,
    pub unallocated_deaths_file: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            cases_file: CASES_FILE.to_string(),
            deaths_file: DEATHS_FILE.to_string(),
            rolling_cases_file: ROLLING_CASES_FILE.to_string(),
            rolling_deaths_file: ROLLING_DEATHS_FILE.to_string(),
            unallocated_cases_file: UNALLOCATED_CASES_FILE.to_string(),
            unallocated_deaths_file: UNALLOCATED_DEATHS_FILE.to_string(),
        }
    }
}

impl OutputConfig {
    pub fn cases(&self) -> PathBuf {
        self.dir.join(&self.cases_file)
    }

    pub fn deaths(&self) -> PathBuf {
        self.dir.join(&self.deaths_file)
    }

    pub fn rolling_cases(&self) -> PathBuf {
        self.dir.join(&self.rolling_cases_file)
    }

    pub fn rolling_deaths(&self) -> PathBuf {
        self.dir.join(&self.rolling_deaths_file)
    }

    pub fn unallocated_cases(&self) -> PathBuf {
        self.dir.join(&self.unallocated_cases_file)
    }

    pub fn unallocated_deaths(&self) -> PathBuf {
        self.dir.join(&self.unallocated_deaths_file)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_SERVER_PORT,
        }
    }
}

/// The four credentials needed to reach the upload database.
#[derive(Clone, PartialEq, Eq)]
pub struct DbCredentials {
    pub server: String,
    pub database: String,
    pub user: String,
    pub password: String,
}

impl std::fmt::Debug for DbCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbCredentials")
            .field("server", &self.server)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"***")
            .finish()
    }
}

impl DbCredentials {
    /// Read `MSA_DB_SERVER`, `MSA_DB_NAME`, `MSA_DB_USER` and `MSA_DB_PASSWORD`.
    /// Returns `None` unless all four are set and non-empty.
    pub fn from_env() -> Option<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Option<Self> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        Some(Self {
            server: get("MSA_DB_SERVER")?,
            database: get("MSA_DB_NAME")?,
            user: get("MSA_DB_USER")?,
            password: get("MSA_DB_PASSWORD")?,
        })
    }
}

impl Config {
    /// Load `path` when it exists, then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        dotenv::dotenv().ok();

        let (path, required) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (PathBuf::from(DEFAULT_CONFIG_PATH), false),
        };

        let mut config = if path.exists() {
            let content = fs::read_to_string(&path).map_err(|e| {
                PipelineError::Config(format!(
                    "Failed to read config file '{}': {}",
                    path.display(),
                    e
                ))
            })?;
            Self::from_toml(&content)?
        } else if required {
            return Err(PipelineError::Config(format!(
                "Config file '{}' does not exist",
                path.display()
            )));
        } else {
            Self::default()
        };

        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Overlay `MSA_SOURCE_URL`, `MSA_REFERENCE_PATH`, `MSA_OUTPUT_DIR`, `MSA_PORT`
    /// and the database credentials.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(v) = lookup("MSA_SOURCE_URL") {
            self.source_url = v;
        }
        if let Some(v) = lookup("MSA_REFERENCE_PATH") {
            self.reference_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("MSA_OUTPUT_DIR") {
            self.output.dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("MSA_PORT") {
            self.server.port = v
                .parse()
                .map_err(|e| PipelineError::Config(format!("MSA_PORT '{v}': {e}")))?;
        }
        self.db = DbCredentials::from_lookup(&lookup);
        self.validate()
    }

    pub fn validate(&self) -> Result<()> {
        if self.rolling_window == 0 {
            return Err(PipelineError::Config(
                "rolling_window must be at least 1".to_string(),
            ));
        }
        if self.source_url.trim().is_empty() {
            return Err(PipelineError::Config("source_url is empty".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(env: &HashMap<&'static str, &'static str>) -> impl Fn(&str) -> Option<String> {
        let env = env.clone();
        move |k: &str| env.get(k).map(|v| v.to_string())
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = Config::from_toml(
            r#"
            gap_fill = "carry_forward"
            [output]
            dir = "out"
            "#,
        )
        .unwrap();
        assert_eq!(config.gap_fill, GapFill::CarryForward);
        assert_eq!(config.output.cases(), PathBuf::from("out").join(CASES_FILE));
        assert_eq!(config.rolling_window, 7);
        assert!(config.round_up);
        assert_eq!(config.server.port, DEFAULT_SERVER_PORT);
    }

    #[test]
    fn zero_window_is_rejected() {
        assert!(Config::from_toml("rolling_window = 0").is_err());
    }

    #[test]
    fn db_credentials_need_all_four_values() {
        let mut env: HashMap<&'static str, &'static str> = HashMap::from([
            ("MSA_DB_SERVER", "turso.io"),
            ("MSA_DB_NAME", "covid"),
            ("MSA_DB_USER", "org"),
        ]);
        assert!(DbCredentials::from_lookup(lookup(&env)).is_none());

        env.insert("MSA_DB_PASSWORD", "secret");
        let creds = DbCredentials::from_lookup(lookup(&env)).unwrap();
        assert_eq!(creds.database, "covid");
        assert!(!format!("{creds:?}").contains("secret"));
    }

    #[test]
    fn env_overrides_apply() {
        let mut config = Config::default();
        config
            .apply_env(|k| match k {
                "MSA_OUTPUT_DIR" => Some("/tmp/msa".to_string()),
                "MSA_PORT" => Some("8080".to_string()),
                _ => None,
            })
            .unwrap();
        assert_eq!(config.output.dir, PathBuf::from("/tmp/msa"));
        assert_eq!(config.server.port, 8080);
        assert!(config.db.is_none());
    }
}
