#![forbid(unsafe_code)]

mod migrations;
mod sql;

use crate::StoreError;
use rusqlite::{params, Connection};

pub(crate) fn migrate(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(&sql::full_schema_sql())?;

    migrations::apply(conn)?;

    conn.execute(
        "INSERT OR IGNORE INTO meta(key, value) VALUES (?1, ?2)",
        params!["schema_version", "v1"],
    )?;

    Ok(())
}
