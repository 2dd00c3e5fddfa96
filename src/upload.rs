//! Best-effort replacement of the remote `cases` and `deaths` tables.
//!
//! The upload never fails a run: missing credentials, an unreachable
//! database or a rejected statement all end in [`UploadOutcome::Skipped`] or
//! [`UploadOutcome::Failed`] with a diagnostic.

use crate::config::Config;
use crate::storage::Table;
use serde::Serialize;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum UploadOutcome {
    Uploaded { tables: Vec<String>, rows: usize },
    Skipped { reason: String },
    Failed { reason: String },
}

/// Upload the cumulative cases and deaths artifacts.
pub async fn upload_artifacts(config: &Config) -> UploadOutcome {
    let Some(credentials) = config.db.clone() else {
        let reason = "DB credentials are undefined".to_string();
        warn!("Skipping upload: {}", reason);
        return UploadOutcome::Skipped { reason };
    };

    let outcome = upload_with(config, credentials).await;
    match &outcome {
        UploadOutcome::Uploaded { tables, rows } => {
            info!("✅ Uploaded {} rows into {:?}", rows, tables)
        }
        UploadOutcome::Skipped { reason } => warn!("Skipping upload: {}", reason),
        UploadOutcome::Failed { reason } => warn!("Upload failed: {}", reason),
    }
    outcome
}

#[cfg(feature = "db")]
async fn upload_with(config: &Config, credentials: crate::config::DbCredentials) -> UploadOutcome {
    use crate::constants::{CASES_TABLE, DEATHS_TABLE};
    use crate::db::DatabaseManager;
    use crate::storage::read_table;

    let tables = [
        (CASES_TABLE, config.output.cases()),
        (DEATHS_TABLE, config.output.deaths()),
    ];
    let mut loaded = Vec::with_capacity(tables.len());
    for (name, path) in &tables {
        match read_table(path) {
            Ok(table) => loaded.push((*name, table)),
            Err(e) => return UploadOutcome::Failed { reason: e.to_string() },
        }
    }

    let manager = match DatabaseManager::connect(&credentials).await {
        Ok(m) => m,
        Err(e) => {
            return UploadOutcome::Skipped {
                reason: format!("DB is inaccessible: {e}"),
            }
        }
    };

    let mut rows = 0;
    for (name, table) in &loaded {
        if let Err(e) = manager.replace_table(name, table).await {
            return UploadOutcome::Failed { reason: e.to_string() };
        }
        rows += table.rows.len();
    }
    UploadOutcome::Uploaded {
        tables: loaded.iter().map(|(n, _)| n.to_string()).collect(),
        rows,
    }
}

#[cfg(not(feature = "db"))]
async fn upload_with(
    _config: &Config,
    _credentials: crate::config::DbCredentials,
) -> UploadOutcome {
    UploadOutcome::Skipped {
        reason: "built without the `db` feature".to_string(),
    }
}

/// Quote an SQL identifier, doubling embedded quotes.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// `CREATE TABLE` for an artifact: text key column, integer date columns.
pub fn create_table_sql(table: &str, artifact: &Table) -> String {
    let columns = artifact
        .headers
        .iter()
        .enumerate()
        .map(|(i, h)| {
            if i == 0 {
                format!("{} TEXT PRIMARY KEY", quote_ident(h))
            } else {
                format!("{} INTEGER", quote_ident(h))
            }
        })
        .collect::<Vec<_>>()
        .join(", ");
    format!("CREATE TABLE {} ({})", quote_ident(table), columns)
}

/// Parameterized `INSERT` matching the artifact's column count.
pub fn insert_sql(table: &str, column_count: usize) -> String {
    let placeholders = vec!["?"; column_count].join(", ");
    format!("INSERT INTO {} VALUES ({})", quote_ident(table), placeholders)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> Table {
        Table {
            headers: vec!["msas".into(), "2020-03-01".into(), "2020-03-02".into()],
            rows: vec![vec!["Foo".into(), "1".into(), "2".into()]],
        }
    }

    #[test]
    fn builds_wide_table_statements() {
        assert_eq!(
            create_table_sql("cases", &table()),
            "CREATE TABLE \"cases\" (\"msas\" TEXT PRIMARY KEY, \
             \"2020-03-01\" INTEGER, \"2020-03-02\" INTEGER)"
        );
        assert_eq!(insert_sql("cases", 3), "INSERT INTO \"cases\" VALUES (?, ?, ?)");
        assert_eq!(quote_ident("a\"b"), "\"a\"\"b\"");
    }

    #[tokio::test]
    async fn missing_credentials_skip_the_upload() {
        let config = Config::default();
        assert!(config.db.is_none());
        let outcome = upload_artifacts(&config).await;
        assert!(matches!(outcome, UploadOutcome::Skipped { .. }));
    }
}

#[cfg(all(test, feature = "db"))]
mod db_tests {
    use super::*;
    use crate::config::DbCredentials;
    use tempfile::tempdir;

    #[tokio::test]
    async fn unreachable_database_does_not_fail_the_run() {
        let dir = tempdir().unwrap();
        let mut config = Config::default();
        config.output.dir = dir.path().to_path_buf();
        std::fs::write(config.output.cases(), "msas,2020-03-01\nFoo,1\n").unwrap();
        std::fs::write(config.output.deaths(), "msas,2020-03-01\nFoo,0\n").unwrap();
        config.db = Some(DbCredentials {
            server: "unreachable.invalid".to_string(),
            database: "covid".to_string(),
            user: "org".to_string(),
            password: "token".to_string(),
        });

        let outcome = upload_artifacts(&config).await;
        match outcome {
            UploadOutcome::Skipped { reason } | UploadOutcome::Failed { reason } => {
                assert!(!reason.is_empty())
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_artifacts_fail_before_connecting() {
        let dir = tempdir().unwrap();
        let mut config = Config::default();
        config.output.dir = dir.path().join("empty");
        config.db = DbCredentials::from_lookup(|_| Some("x".to_string()));

        let outcome = upload_artifacts(&config).await;
        assert!(matches!(outcome, UploadOutcome::Failed { .. }));
    }
}
