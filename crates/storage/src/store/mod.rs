#![forbid(unsafe_code)]

use crate::{EventRow, NewEvent, RuntimeStats, StoreError, RUNTIME_DB_FILE};
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use std::path::{Path, PathBuf};
use std::time::Duration;

mod agents;
mod events;
mod leases;
mod messages;
mod support;

const BUSY_TIMEOUT: Duration = Duration::from_millis(1000);

#[derive(Debug)]
pub struct SqliteStore {
    db_path: PathBuf,
    conn: Connection,
}

impl SqliteStore {
    /// Opens (creating if needed) the runtime database inside `dir` and
    /// brings the schema up to date.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;
        Self::open_file(dir.join(RUNTIME_DB_FILE))
    }

    /// Opens an explicit database file path.
    pub fn open_file(db_path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let db_path = db_path.into();
        let conn = Connection::open(&db_path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        support::schema::migrate(&conn)?;
        Ok(Self { db_path, conn })
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    pub fn schema_version(&self) -> Result<Option<String>, StoreError> {
        Ok(self
            .conn
            .query_row(
                "SELECT value FROM meta WHERE key = 'schema_version'",
                [],
                |row| row.get::<_, String>(0),
            )
            .optional()?)
    }

    /// Appends events with no other runtime mutation. Used for spec-plane
    /// changes (create/update/done/verify/delete) whose authoritative write
    /// is the spec file.
    pub fn append_events(
        &mut self,
        events: Vec<NewEvent>,
        now_ms: i64,
    ) -> Result<Vec<EventRow>, StoreError> {
        let tx = self.conn.transaction()?;
        let mut rows = Vec::with_capacity(events.len());
        for event in &events {
            rows.push(insert_event_tx(&tx, event, now_ms)?);
        }
        tx.commit()?;
        Ok(rows)
    }

    /// One transaction covering a spec-plane status change: optionally expire
    /// the task's active lease, then append the given events.
    pub fn task_transition(
        &mut self,
        task_id: &str,
        release_lease: bool,
        events: Vec<NewEvent>,
        now_ms: i64,
    ) -> Result<Vec<EventRow>, StoreError> {
        let tx = self.conn.transaction()?;
        if release_lease {
            tx.execute(
                "UPDATE leases SET expires_at_ms = ?2 WHERE task_id = ?1 AND expires_at_ms > ?2",
                params![task_id, now_ms],
            )?;
        }
        let mut rows = Vec::with_capacity(events.len());
        for event in &events {
            rows.push(insert_event_tx(&tx, event, now_ms)?);
        }
        tx.commit()?;
        Ok(rows)
    }

    /// One transaction covering a (possibly cascading) soft delete: expire
    /// every affected task's active lease and append one `task.deleted` per
    /// task.
    pub fn tasks_deleted(
        &mut self,
        task_ids: &[String],
        actor_agent_id: Option<&str>,
        cascade: bool,
        now_ms: i64,
    ) -> Result<Vec<EventRow>, StoreError> {
        let tx = self.conn.transaction()?;
        let mut rows = Vec::with_capacity(task_ids.len());
        for task_id in task_ids {
            tx.execute(
                "UPDATE leases SET expires_at_ms = ?2 WHERE task_id = ?1 AND expires_at_ms > ?2",
                params![task_id, now_ms],
            )?;
            let mut event = NewEvent::new(ls_core::events::EventType::TaskDeleted)
                .task(task_id.clone())
                .payload(serde_json::json!({ "cascade": cascade }));
            if let Some(actor) = actor_agent_id {
                event = event.actor(actor.to_string());
            }
            rows.push(insert_event_tx(&tx, &event, now_ms)?);
        }
        tx.commit()?;
        Ok(rows)
    }

    pub fn stats(&self, now_ms: i64) -> Result<RuntimeStats, StoreError> {
        let agents =
            self.conn
                .query_row("SELECT COUNT(*) FROM agents", [], |row| row.get::<_, i64>(0))?;
        let active_leases = self.conn.query_row(
            "SELECT COUNT(*) FROM leases WHERE expires_at_ms > ?1",
            params![now_ms],
            |row| row.get::<_, i64>(0),
        )?;
        let messages =
            self.conn
                .query_row("SELECT COUNT(*) FROM messages", [], |row| row.get::<_, i64>(0))?;
        let last_event_id = self
            .conn
            .query_row("SELECT COALESCE(MAX(id), 0) FROM events", [], |row| {
                row.get::<_, i64>(0)
            })?;
        Ok(RuntimeStats {
            agents,
            active_leases,
            messages,
            last_event_id,
        })
    }
}

pub(crate) fn insert_event_tx(
    tx: &Transaction<'_>,
    event: &NewEvent,
    now_ms: i64,
) -> Result<EventRow, StoreError> {
    let payload_json = event.payload.to_string();
    tx.execute(
        r#"
        INSERT INTO events(created_at_ms, type, actor_agent_id, task_id, target_agent_id, payload_json)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        "#,
        params![
            now_ms,
            event.event_type.as_str(),
            event.actor_agent_id.as_deref(),
            event.task_id.as_deref(),
            event.target_agent_id.as_deref(),
            &payload_json
        ],
    )?;
    Ok(EventRow {
        id: tx.last_insert_rowid(),
        created_at_ms: now_ms,
        event_type: event.event_type.as_str().to_string(),
        actor_agent_id: event.actor_agent_id.clone(),
        task_id: event.task_id.clone(),
        target_agent_id: event.target_agent_id.clone(),
        payload_json,
    })
}

pub(crate) fn agent_exists_tx(tx: &Transaction<'_>, agent_id: &str) -> Result<bool, StoreError> {
    Ok(tx
        .query_row(
            "SELECT 1 FROM agents WHERE agent_id = ?1",
            params![agent_id],
            |_| Ok(()),
        )
        .optional()?
        .is_some())
}

pub(crate) fn decode_string_list(raw: Option<&str>) -> Vec<String> {
    let Some(raw) = raw else {
        return Vec::new();
    };
    serde_json::from_str::<Vec<String>>(raw).unwrap_or_default()
}
