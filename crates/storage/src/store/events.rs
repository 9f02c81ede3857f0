#![forbid(unsafe_code)]

use super::SqliteStore;
use crate::{EventRow, EventSlice, StoreError, EVENT_PULL_LIMIT_MAX};
use ls_core::events::EventType;
use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Row};

fn row_to_event(row: &Row<'_>) -> rusqlite::Result<EventRow> {
    Ok(EventRow {
        id: row.get(0)?,
        created_at_ms: row.get(1)?,
        event_type: row.get(2)?,
        actor_agent_id: row.get(3)?,
        task_id: row.get(4)?,
        target_agent_id: row.get(5)?,
        payload_json: row.get(6)?,
    })
}

impl SqliteStore {
    /// Pulls committed events with `id > since`, ascending, up to `limit`
    /// (clamped to 1000). `next_cursor` is the last returned id, or `since`
    /// when the slice is empty, so pulls can be chained without gaps.
    pub fn events_pull(
        &self,
        since: i64,
        limit: usize,
        types: &[EventType],
    ) -> Result<EventSlice, StoreError> {
        let limit = limit.clamp(1, EVENT_PULL_LIMIT_MAX) as i64;

        let mut sql = String::from(
            "SELECT id, created_at_ms, type, actor_agent_id, task_id, target_agent_id, payload_json \
             FROM events WHERE id > ?",
        );
        let mut args: Vec<SqlValue> = vec![SqlValue::Integer(since)];
        if !types.is_empty() {
            let placeholders = vec!["?"; types.len()].join(", ");
            sql.push_str(&format!(" AND type IN ({placeholders})"));
            args.extend(
                types
                    .iter()
                    .map(|t| SqlValue::Text(t.as_str().to_string())),
            );
        }
        sql.push_str(" ORDER BY id ASC LIMIT ?");
        args.push(SqlValue::Integer(limit));

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(args), |row| row_to_event(row))?;
        let mut events = Vec::new();
        for row in rows {
            events.push(row?);
        }

        let next_cursor = events.last().map(|e| e.id).unwrap_or(since);
        Ok(EventSlice {
            events,
            next_cursor,
        })
    }
}
