#![forbid(unsafe_code)]

mod agents;
mod util;

use crate::StoreError;
use rusqlite::Connection;

pub(super) fn apply(conn: &Connection) -> Result<(), StoreError> {
    agents::apply(conn)?;
    Ok(())
}
