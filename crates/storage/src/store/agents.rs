#![forbid(unsafe_code)]

use super::{agent_exists_tx, decode_string_list, insert_event_tx, SqliteStore};
use crate::{AgentJoinRequest, AgentRow, NewEvent, StoreError};
use ls_core::events::EventType;
use rusqlite::{params, OptionalExtension, Row};
use serde_json::json;
use uuid::Uuid;

fn generate_agent_id() -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("A{}", hex[..8].to_ascii_uppercase())
}

fn row_to_agent(row: &Row<'_>) -> rusqlite::Result<AgentRow> {
    let capabilities_json: Option<String> = row.get(3)?;
    Ok(AgentRow {
        agent_id: row.get(0)?,
        display_name: row.get(1)?,
        role: row.get(2)?,
        capabilities: decode_string_list(capabilities_json.as_deref()),
        registered_at_ms: row.get(4)?,
        last_seen_at_ms: row.get(5)?,
        session_meta_json: row.get(6)?,
    })
}

const AGENT_COLUMNS: &str = "agent_id, display_name, role, capabilities_json, \
                             registered_at_ms, last_seen_at_ms, session_meta_json";

impl SqliteStore {
    /// Registers an agent and appends `agent.joined` in the same transaction.
    /// When `request.agent_id` is absent a fresh token is generated.
    pub fn agent_register(
        &mut self,
        request: AgentJoinRequest,
        now_ms: i64,
    ) -> Result<AgentRow, StoreError> {
        let agent_id = match request.agent_id {
            Some(id) => {
                let id = id.trim().to_string();
                if id.is_empty() {
                    return Err(StoreError::InvalidInput("agent_id must not be empty"));
                }
                id
            }
            None => generate_agent_id(),
        };

        let capabilities_json = serde_json::to_string(&request.capabilities)
            .map_err(|_| StoreError::InvalidInput("capabilities must be strings"))?;

        let tx = self.conn.transaction()?;
        if agent_exists_tx(&tx, &agent_id)? {
            return Err(StoreError::AgentExists);
        }
        tx.execute(
            r#"
            INSERT INTO agents(agent_id, display_name, role, capabilities_json,
                               registered_at_ms, last_seen_at_ms, session_meta_json)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                &agent_id,
                request.display_name.as_deref(),
                request.role.as_deref(),
                &capabilities_json,
                now_ms,
                now_ms,
                request.session_meta_json.as_deref()
            ],
        )?;
        insert_event_tx(
            &tx,
            &NewEvent::new(EventType::AgentJoined)
                .actor(agent_id.clone())
                .payload(json!({
                    "display_name": request.display_name,
                    "role": request.role,
                })),
            now_ms,
        )?;
        tx.commit()?;

        Ok(AgentRow {
            agent_id,
            display_name: request.display_name,
            role: request.role,
            capabilities: request.capabilities,
            registered_at_ms: now_ms,
            last_seen_at_ms: now_ms,
            session_meta_json: request.session_meta_json,
        })
    }

    pub fn agent_get(&self, agent_id: &str) -> Result<Option<AgentRow>, StoreError> {
        Ok(self
            .conn
            .query_row(
                &format!("SELECT {AGENT_COLUMNS} FROM agents WHERE agent_id = ?1"),
                params![agent_id],
                |row| row_to_agent(row),
            )
            .optional()?)
    }

    pub fn agent_exists(&self, agent_id: &str) -> Result<bool, StoreError> {
        Ok(self
            .conn
            .query_row(
                "SELECT 1 FROM agents WHERE agent_id = ?1",
                params![agent_id],
                |_| Ok(()),
            )
            .optional()?
            .is_some())
    }

    pub fn agents_list(&self) -> Result<Vec<AgentRow>, StoreError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {AGENT_COLUMNS} FROM agents ORDER BY last_seen_at_ms DESC, agent_id ASC"
        ))?;
        let rows = stmt.query_map([], |row| row_to_agent(row))?;
        let mut agents = Vec::new();
        for row in rows {
            agents.push(row?);
        }
        Ok(agents)
    }

    /// Finds agents by capability (exact match inside the capabilities JSON
    /// array) and/or role.
    pub fn agents_find(
        &self,
        capability: Option<&str>,
        role: Option<&str>,
    ) -> Result<Vec<AgentRow>, StoreError> {
        let mut agents = Vec::new();
        match (capability, role) {
            (Some(capability), role) => {
                let mut stmt = self.conn.prepare(&format!(
                    "SELECT DISTINCT {AGENT_COLUMNS} FROM agents a, json_each(a.capabilities_json) AS cap \
                     WHERE cap.value = ?1 AND (?2 IS NULL OR a.role = ?2) \
                     ORDER BY a.last_seen_at_ms DESC, a.agent_id ASC"
                ))?;
                let rows = stmt.query_map(params![capability, role], |row| row_to_agent(row))?;
                for row in rows {
                    agents.push(row?);
                }
            }
            (None, Some(role)) => {
                let mut stmt = self.conn.prepare(&format!(
                    "SELECT {AGENT_COLUMNS} FROM agents WHERE role = ?1 \
                     ORDER BY last_seen_at_ms DESC, agent_id ASC"
                ))?;
                let rows = stmt.query_map(params![role], |row| row_to_agent(row))?;
                for row in rows {
                    agents.push(row?);
                }
            }
            (None, None) => {
                return Err(StoreError::InvalidInput(
                    "agent find requires capability or role",
                ));
            }
        }
        Ok(agents)
    }

    /// Refreshes `last_seen_at` and appends `agent.heartbeat`.
    pub fn agent_heartbeat(&mut self, agent_id: &str, now_ms: i64) -> Result<AgentRow, StoreError> {
        let tx = self.conn.transaction()?;
        let updated = tx.execute(
            "UPDATE agents SET last_seen_at_ms = ?2 WHERE agent_id = ?1",
            params![agent_id, now_ms],
        )?;
        if updated == 0 {
            return Err(StoreError::UnknownAgent);
        }
        insert_event_tx(
            &tx,
            &NewEvent::new(EventType::AgentHeartbeat).actor(agent_id.to_string()),
            now_ms,
        )?;
        tx.commit()?;
        self.agent_get(agent_id)?.ok_or(StoreError::UnknownAgent)
    }

    /// Marks a graceful departure. The agent row stays (identifiers remain
    /// valid) and leases are untouched; departure is a heartbeat reset plus
    /// an `agent.left` event.
    pub fn agent_leave(
        &mut self,
        agent_id: &str,
        reason: Option<&str>,
        now_ms: i64,
    ) -> Result<(), StoreError> {
        let tx = self.conn.transaction()?;
        let updated = tx.execute(
            "UPDATE agents SET last_seen_at_ms = ?2 WHERE agent_id = ?1",
            params![agent_id, now_ms],
        )?;
        if updated == 0 {
            return Err(StoreError::UnknownAgent);
        }
        let payload = match reason {
            Some(reason) => json!({ "reason": reason }),
            None => json!({}),
        };
        insert_event_tx(
            &tx,
            &NewEvent::new(EventType::AgentLeft)
                .actor(agent_id.to_string())
                .payload(payload),
            now_ms,
        )?;
        tx.commit()?;
        Ok(())
    }
}
