#![forbid(unsafe_code)]

use super::util::add_column_if_missing;
use crate::StoreError;
use rusqlite::Connection;

pub(super) fn apply(conn: &Connection) -> Result<(), StoreError> {
    // role and session_meta_json arrived after the first cut of the schema;
    // databases created before them are upgraded in place.
    add_column_if_missing(conn, "agents", "role", "TEXT")?;
    add_column_if_missing(conn, "agents", "session_meta_json", "TEXT")?;
    Ok(())
}
