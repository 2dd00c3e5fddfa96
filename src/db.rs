use crate::config::DbCredentials;
use crate::error::{PipelineError, Result};
use crate::storage::Table;
use crate::upload::{create_table_sql, insert_sql, quote_ident};
use libsql::params::Params;
use libsql::{Builder, Connection, Database, Value};
use tracing::{debug, info};

fn upload_err(context: &str, e: impl std::fmt::Display) -> PipelineError {
    PipelineError::Upload {
        message: format!("{context}: {e}"),
    }
}

pub struct DatabaseManager {
    db: Database,
}

impl DatabaseManager {
    /// Remote URL for the credentials: `libsql://<database>-<user>.<server>`.
    pub fn url(credentials: &DbCredentials) -> String {
        format!(
            "libsql://{}-{}.{}",
            credentials.database, credentials.user, credentials.server
        )
    }

    /// Connect and verify the database answers a trivial query.
    pub async fn connect(credentials: &DbCredentials) -> Result<Self> {
        let url = Self::url(credentials);
        info!("Connecting to database at {}", url);

        let db = Builder::new_remote(url, credentials.password.clone())
            .build()
            .await
            .map_err(|e| upload_err("Failed to connect to database", e))?;
        let manager = Self { db };

        let conn = manager.get_connection()?;
        conn.query("SELECT 1", ())
            .await
            .map_err(|e| upload_err("Database is not reachable", e))?;
        Ok(manager)
    }

    pub fn get_connection(&self) -> Result<Connection> {
        self.db
            .connect()
            .map_err(|e| upload_err("Failed to get database connection", e))
    }

    /// Drop and recreate `name` with the artifact's contents in one transaction.
    pub async fn replace_table(&self, name: &str, table: &Table) -> Result<()> {
        let conn = self.get_connection()?;
        let tx = conn
            .transaction()
            .await
            .map_err(|e| upload_err("Failed to begin transaction", e))?;

        tx.execute(&format!("DROP TABLE IF EXISTS {}", quote_ident(name)), ())
            .await
            .map_err(|e| upload_err("Failed to drop table", e))?;
        tx.execute(&create_table_sql(name, table), ())
            .await
            .map_err(|e| upload_err("Failed to create table", e))?;

        let insert = insert_sql(name, table.headers.len());
        for row in &table.rows {
            let values = row
                .iter()
                .enumerate()
                .map(|(i, cell)| match cell.parse::<i64>() {
                    Ok(n) if i > 0 => Value::Integer(n),
                    _ => Value::Text(cell.clone()),
                })
                .collect::<Vec<_>>();
            tx.execute(&insert, Params::Positional(values))
                .await
                .map_err(|e| upload_err("Failed to insert row", e))?;
        }

        tx.commit()
            .await
            .map_err(|e| upload_err("Failed to commit", e))?;
        debug!("Replaced table {} with {} rows", name, table.rows.len());
        Ok(())
    }
}
