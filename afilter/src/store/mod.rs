//! Store - persists named filters and their sharing in DuckDB.

mod filters;

use duckdb::Connection;

use crate::query::QueryCodec;
use crate::{Config, Error, Result};

/// A filter store for reading and writing stored filters.
pub struct Store {
    config: Config,
}

impl Store {
    /// Open an existing filter store.
    pub fn open(config: Config) -> Result<Self> {
        if !config.db_path().exists() {
            return Err(Error::NotInitialized(config.root.clone()));
        }
        Ok(Self { config })
    }

    /// Get a DuckDB connection to the store.
    pub fn connection(&self) -> Result<Connection> {
        Ok(Connection::open(self.config.db_path())?)
    }

    /// Get config reference.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Codec used for the persisted `encoded_query` column.
    pub fn codec(&self) -> QueryCodec {
        QueryCodec::stored(&self.config)
    }

    /// Run `f` inside a transaction, rolling back if it fails.
    fn in_transaction<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.connection()?;
        conn.execute("BEGIN TRANSACTION", [])?;

        match f(&conn) {
            Ok(value) => {
                conn.execute("COMMIT", [])?;
                Ok(value)
            }
            Err(e) => {
                let _ = conn.execute("ROLLBACK", []);
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::init::initialize;
    use tempfile::TempDir;

    #[test]
    fn test_store_open_uninitialized_fails() {
        let tmp = TempDir::new().unwrap();
        let config = Config::with_root(tmp.path());

        let result = Store::open(config);
        assert!(matches!(result, Err(Error::NotInitialized(_))));
    }

    #[test]
    fn test_transaction_rolls_back_on_error() {
        let tmp = TempDir::new().unwrap();
        let config = Config::with_root(tmp.path());
        initialize(&config).unwrap();
        let store = Store::open(config).unwrap();

        let result: Result<()> = store.in_transaction(|conn| {
            conn.execute(
                "INSERT INTO advanced_filter_users VALUES ('f', 'alice')",
                [],
            )?;
            Err(Error::Storage("boom".to_string()))
        });
        assert!(matches!(result, Err(Error::Storage(_))));

        let conn = store.connection().unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM advanced_filter_users", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(count, 0);
    }
}
