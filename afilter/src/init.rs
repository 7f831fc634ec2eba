//! Initialization - creates the directory structure and filter database.
//!
//! # Tables
//!
//! - `advanced_filters` - one row per stored filter
//! - `advanced_filter_users` - users a filter is shared with
//! - `advanced_filter_groups` - groups a filter is shared with

use std::fs;

use duckdb::Connection;

use crate::{Config, Error, Result};

/// Initialize a new filter store under `config.root`.
pub fn initialize(config: &Config) -> Result<()> {
    if config.db_path().exists() {
        return Err(Error::AlreadyInitialized(config.root.clone()));
    }

    create_directories(config)?;
    init_database(config)?;
    config.save()?;

    tracing::info!(root = %config.root.display(), "Initialized filter store");
    Ok(())
}

/// Check whether a filter store exists at `config.root`.
pub fn is_initialized(config: &Config) -> bool {
    config.db_path().exists()
}

fn create_directories(config: &Config) -> Result<()> {
    if let Some(db_dir) = config.db_path().parent() {
        fs::create_dir_all(db_dir)?;
    }
    Ok(())
}

fn init_database(config: &Config) -> Result<()> {
    let conn = Connection::open(config.db_path())?;

    // Share tables carry no key constraints: a save rewrites them inside one
    // transaction and duplicates are removed before insert.
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS advanced_filters (
            id VARCHAR PRIMARY KEY,
            title VARCHAR NOT NULL,
            owner VARCHAR NOT NULL,
            model VARCHAR,
            encoded_query VARCHAR NOT NULL,
            created_at TIMESTAMP NOT NULL
        );

        CREATE TABLE IF NOT EXISTS advanced_filter_users (
            filter_id VARCHAR NOT NULL,
            username VARCHAR NOT NULL
        );

        CREATE TABLE IF NOT EXISTS advanced_filter_groups (
            filter_id VARCHAR NOT NULL,
            group_name VARCHAR NOT NULL
        );
        "#,
    )?;

    Ok(())
}
