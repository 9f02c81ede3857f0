#![forbid(unsafe_code)]

use super::{agent_exists_tx, insert_event_tx, SqliteStore};
use crate::{ClaimOutcome, LeaseOpOutcome, LeaseRow, NewEvent, StoreError};
use ls_core::events::EventType;
use rusqlite::{params, OptionalExtension, Row, Transaction};
use serde_json::json;
use uuid::Uuid;

fn generate_lease_id() -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("L{}", hex[..8].to_ascii_uppercase())
}

fn row_to_lease(row: &Row<'_>) -> rusqlite::Result<LeaseRow> {
    Ok(LeaseRow {
        lease_id: row.get(0)?,
        task_id: row.get(1)?,
        agent_id: row.get(2)?,
        created_at_ms: row.get(3)?,
        expires_at_ms: row.get(4)?,
    })
}

const LEASE_COLUMNS: &str = "lease_id, task_id, agent_id, created_at_ms, expires_at_ms";

fn active_lease_tx(
    tx: &Transaction<'_>,
    task_id: &str,
    now_ms: i64,
) -> Result<Option<LeaseRow>, StoreError> {
    Ok(tx
        .query_row(
            &format!(
                "SELECT {LEASE_COLUMNS} FROM leases \
                 WHERE task_id = ?1 AND expires_at_ms > ?2 \
                 ORDER BY expires_at_ms DESC LIMIT 1"
            ),
            params![task_id, now_ms],
            |row| row_to_lease(row),
        )
        .optional()?)
}

impl SqliteStore {
    /// Atomically claims a task: in one transaction, checks the agent is
    /// registered and no active lease exists, inserts the lease, and appends
    /// `task.claimed`. Losing the race returns the holder instead.
    pub fn lease_claim(
        &mut self,
        task_id: &str,
        agent_id: &str,
        ttl_secs: i64,
        now_ms: i64,
    ) -> Result<ClaimOutcome, StoreError> {
        if ttl_secs <= 0 {
            return Err(StoreError::InvalidInput("lease ttl must be positive"));
        }

        let tx = self.conn.transaction()?;
        if !agent_exists_tx(&tx, agent_id)? {
            return Err(StoreError::UnknownAgent);
        }
        if let Some(holder) = active_lease_tx(&tx, task_id, now_ms)? {
            return Ok(ClaimOutcome::Held(holder));
        }

        let lease = LeaseRow {
            lease_id: generate_lease_id(),
            task_id: task_id.to_string(),
            agent_id: agent_id.to_string(),
            created_at_ms: now_ms,
            expires_at_ms: now_ms + ttl_secs * 1000,
        };
        tx.execute(
            &format!("INSERT INTO leases({LEASE_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5)"),
            params![
                &lease.lease_id,
                &lease.task_id,
                &lease.agent_id,
                lease.created_at_ms,
                lease.expires_at_ms
            ],
        )?;
        insert_event_tx(
            &tx,
            &NewEvent::new(EventType::TaskClaimed)
                .actor(agent_id.to_string())
                .task(task_id.to_string())
                .payload(json!({
                    "lease_id": lease.lease_id,
                    "ttl_seconds": ttl_secs,
                })),
            now_ms,
        )?;
        tx.commit()?;
        Ok(ClaimOutcome::Created(lease))
    }

    pub fn lease_active(
        &self,
        task_id: &str,
        now_ms: i64,
    ) -> Result<Option<LeaseRow>, StoreError> {
        Ok(self
            .conn
            .query_row(
                &format!(
                    "SELECT {LEASE_COLUMNS} FROM leases \
                     WHERE task_id = ?1 AND expires_at_ms > ?2 \
                     ORDER BY expires_at_ms DESC LIMIT 1"
                ),
                params![task_id, now_ms],
                |row| row_to_lease(row),
            )
            .optional()?)
    }

    pub fn leases_active(&self, now_ms: i64) -> Result<Vec<LeaseRow>, StoreError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {LEASE_COLUMNS} FROM leases WHERE expires_at_ms > ?1 \
             ORDER BY created_at_ms DESC, lease_id ASC"
        ))?;
        let rows = stmt.query_map(params![now_ms], |row| row_to_lease(row))?;
        let mut leases = Vec::new();
        for row in rows {
            leases.push(row?);
        }
        Ok(leases)
    }

    pub fn leases_by_agent(
        &self,
        agent_id: &str,
        now_ms: i64,
        active_only: bool,
    ) -> Result<Vec<LeaseRow>, StoreError> {
        let mut leases = Vec::new();
        if active_only {
            let mut stmt = self.conn.prepare(&format!(
                "SELECT {LEASE_COLUMNS} FROM leases \
                 WHERE agent_id = ?1 AND expires_at_ms > ?2 \
                 ORDER BY expires_at_ms DESC"
            ))?;
            let rows = stmt.query_map(params![agent_id, now_ms], |row| row_to_lease(row))?;
            for row in rows {
                leases.push(row?);
            }
        } else {
            let mut stmt = self.conn.prepare(&format!(
                "SELECT {LEASE_COLUMNS} FROM leases WHERE agent_id = ?1 \
                 ORDER BY expires_at_ms DESC"
            ))?;
            let rows = stmt.query_map(params![agent_id], |row| row_to_lease(row))?;
            for row in rows {
                leases.push(row?);
            }
        }
        Ok(leases)
    }

    /// Extends the holder's active lease to `now + ttl`. Expired leases
    /// cannot be renewed; a lost or stolen lease reports the current holder.
    pub fn lease_renew(
        &mut self,
        task_id: &str,
        agent_id: &str,
        ttl_secs: i64,
        now_ms: i64,
    ) -> Result<LeaseOpOutcome, StoreError> {
        if ttl_secs <= 0 {
            return Err(StoreError::InvalidInput("lease ttl must be positive"));
        }

        let tx = self.conn.transaction()?;
        let Some(holder) = active_lease_tx(&tx, task_id, now_ms)? else {
            return Ok(LeaseOpOutcome::NotHeld { holder: None });
        };
        if holder.agent_id != agent_id {
            return Ok(LeaseOpOutcome::NotHeld {
                holder: Some(holder),
            });
        }

        let expires_at_ms = now_ms + ttl_secs * 1000;
        tx.execute(
            "UPDATE leases SET expires_at_ms = ?2 WHERE lease_id = ?1",
            params![&holder.lease_id, expires_at_ms],
        )?;
        // The closed event set has no renewal type; an extension is recorded
        // as a claim with renewed=true so pullers still see the lease move.
        insert_event_tx(
            &tx,
            &NewEvent::new(EventType::TaskClaimed)
                .actor(agent_id.to_string())
                .task(task_id.to_string())
                .payload(json!({
                    "lease_id": holder.lease_id,
                    "ttl_seconds": ttl_secs,
                    "renewed": true,
                })),
            now_ms,
        )?;
        tx.commit()?;
        Ok(LeaseOpOutcome::Applied(LeaseRow {
            expires_at_ms,
            ..holder
        }))
    }

    /// Releases the holder's active lease by expiring it now.
    pub fn lease_release(
        &mut self,
        task_id: &str,
        agent_id: &str,
        reason: Option<&str>,
        now_ms: i64,
    ) -> Result<LeaseOpOutcome, StoreError> {
        let tx = self.conn.transaction()?;
        let Some(holder) = active_lease_tx(&tx, task_id, now_ms)? else {
            return Ok(LeaseOpOutcome::NotHeld { holder: None });
        };
        if holder.agent_id != agent_id {
            return Ok(LeaseOpOutcome::NotHeld {
                holder: Some(holder),
            });
        }

        tx.execute(
            "UPDATE leases SET expires_at_ms = ?2 WHERE lease_id = ?1",
            params![&holder.lease_id, now_ms],
        )?;
        let mut payload = json!({ "lease_id": holder.lease_id });
        if let Some(reason) = reason {
            payload["reason"] = json!(reason);
        }
        insert_event_tx(
            &tx,
            &NewEvent::new(EventType::TaskReleased)
                .actor(agent_id.to_string())
                .task(task_id.to_string())
                .payload(payload),
            now_ms,
        )?;
        tx.commit()?;
        Ok(LeaseOpOutcome::Applied(LeaseRow {
            expires_at_ms: now_ms,
            ..holder
        }))
    }

    /// Expires active leases whose agent row is gone (removed out-of-band),
    /// appending one `lease.orphaned` per lease. Runs at coordinator open.
    pub fn leases_cleanup_orphaned(&mut self, now_ms: i64) -> Result<Vec<LeaseRow>, StoreError> {
        let tx = self.conn.transaction()?;
        let mut orphaned = Vec::new();
        {
            let mut stmt = tx.prepare(&format!(
                "SELECT {LEASE_COLUMNS} FROM leases \
                 WHERE expires_at_ms > ?1 \
                   AND agent_id NOT IN (SELECT agent_id FROM agents) \
                 ORDER BY lease_id ASC"
            ))?;
            let rows = stmt.query_map(params![now_ms], |row| row_to_lease(row))?;
            for row in rows {
                orphaned.push(row?);
            }
        }
        for lease in &orphaned {
            tx.execute(
                "UPDATE leases SET expires_at_ms = ?2 WHERE lease_id = ?1",
                params![&lease.lease_id, now_ms],
            )?;
            insert_event_tx(
                &tx,
                &NewEvent::new(EventType::LeaseOrphaned)
                    .task(lease.task_id.clone())
                    .target(lease.agent_id.clone())
                    .payload(json!({ "lease_id": lease.lease_id })),
                now_ms,
            )?;
        }
        tx.commit()?;
        Ok(orphaned)
    }
}
