#![forbid(unsafe_code)]

use super::{agent_exists_tx, insert_event_tx, SqliteStore};
use crate::{
    AckOutcome, InboxFilters, MessageRow, MessageSendRequest, NewEvent, SearchFilters, StoreError,
    MAX_MESSAGE_BODY_BYTES, MESSAGE_LIMIT_MAX,
};
use ls_core::events::EventType;
use ls_core::model::Recipient;
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, OptionalExtension, Row};
use serde_json::json;

const MESSAGE_COLUMNS: &str = "message_id, created_at_ms, from_agent_id, to_type, to_id, \
                               task_id, subject, body, severity, read_at_ms";

fn row_to_message(row: &Row<'_>) -> rusqlite::Result<MessageRow> {
    let to_type_raw: String = row.get(3)?;
    Ok(MessageRow {
        message_id: row.get(0)?,
        created_at_ms: row.get(1)?,
        from_agent_id: row.get(2)?,
        // to_type is constrained at insert time.
        to_type: Recipient::parse(&to_type_raw).unwrap_or(Recipient::Task),
        to_id: row.get(4)?,
        task_id: row.get(5)?,
        subject: row.get(6)?,
        body: row.get(7)?,
        severity: row.get(8)?,
        read_at_ms: row.get(9)?,
    })
}

impl SqliteStore {
    /// Inserts a message and appends `message.sent` in the same transaction.
    /// The sender must be registered; agent recipients must be registered;
    /// task recipients are accepted for any id.
    pub fn message_send(
        &mut self,
        request: MessageSendRequest,
        now_ms: i64,
    ) -> Result<MessageRow, StoreError> {
        if request.to_id.trim().is_empty() {
            return Err(StoreError::InvalidInput("to_id must not be empty"));
        }
        if request.body.is_empty() {
            return Err(StoreError::InvalidInput("body must not be empty"));
        }
        if request.body.len() > MAX_MESSAGE_BODY_BYTES {
            return Err(StoreError::BodyTooLarge {
                len: request.body.len(),
            });
        }

        let tx = self.conn.transaction()?;
        if !agent_exists_tx(&tx, &request.from_agent_id)? {
            return Err(StoreError::UnknownAgent);
        }
        if request.to_type == Recipient::Agent && !agent_exists_tx(&tx, &request.to_id)? {
            return Err(StoreError::UnknownAgent);
        }

        tx.execute(
            r#"
            INSERT INTO messages(created_at_ms, from_agent_id, to_type, to_id,
                                 task_id, subject, body, severity)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            params![
                now_ms,
                &request.from_agent_id,
                request.to_type.as_str(),
                &request.to_id,
                request.task_id.as_deref(),
                request.subject.as_deref(),
                &request.body,
                request.severity.as_deref()
            ],
        )?;
        let message_id = tx.last_insert_rowid();

        let target = match request.to_type {
            Recipient::Agent => Some(request.to_id.clone()),
            Recipient::Task => None,
        };
        let mut event = NewEvent::new(EventType::MessageSent)
            .actor(request.from_agent_id.clone())
            .payload(json!({
                "message_id": message_id,
                "to_type": request.to_type.as_str(),
                "to_id": request.to_id,
            }));
        if let Some(target) = target {
            event = event.target(target);
        }
        if let Some(task_id) = request.task_id.as_deref() {
            event = event.task(task_id.to_string());
        } else if request.to_type == Recipient::Task {
            event = event.task(request.to_id.clone());
        }
        insert_event_tx(&tx, &event, now_ms)?;
        tx.commit()?;

        Ok(MessageRow {
            message_id,
            created_at_ms: now_ms,
            from_agent_id: request.from_agent_id,
            to_type: request.to_type,
            to_id: request.to_id,
            task_id: request.task_id,
            subject: request.subject,
            body: request.body,
            severity: request.severity,
            read_at_ms: None,
        })
    }

    /// Lists an agent's inbox newest-first. With `mark_read` the returned
    /// unread messages get `read_at_ms = now` inside the same transaction,
    /// and one `message.read` event carries the affected ids.
    pub fn messages_inbox(
        &mut self,
        agent_id: &str,
        filters: &InboxFilters,
        mark_read: bool,
        now_ms: i64,
    ) -> Result<Vec<MessageRow>, StoreError> {
        let limit = filters.limit.clamp(1, MESSAGE_LIMIT_MAX) as i64;

        let tx = self.conn.transaction()?;
        let mut messages = Vec::new();
        {
            let mut sql = format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages \
                 WHERE to_type = 'agent' AND to_id = ?"
            );
            let mut args: Vec<SqlValue> = vec![SqlValue::Text(agent_id.to_string())];
            if filters.unread_only {
                sql.push_str(" AND read_at_ms IS NULL");
            }
            if let Some(from) = filters.from_agent_id.as_deref() {
                sql.push_str(" AND from_agent_id = ?");
                args.push(SqlValue::Text(from.to_string()));
            }
            if let Some(since) = filters.since_ms {
                sql.push_str(" AND created_at_ms >= ?");
                args.push(SqlValue::Integer(since));
            }
            if let Some(until) = filters.until_ms {
                sql.push_str(" AND created_at_ms <= ?");
                args.push(SqlValue::Integer(until));
            }
            sql.push_str(" ORDER BY message_id DESC LIMIT ?");
            args.push(SqlValue::Integer(limit));

            let mut stmt = tx.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(args), |row| row_to_message(row))?;
            for row in rows {
                messages.push(row?);
            }
        }

        if mark_read {
            let unread: Vec<i64> = messages
                .iter()
                .filter(|m| m.read_at_ms.is_none())
                .map(|m| m.message_id)
                .collect();
            if !unread.is_empty() {
                let placeholders = vec!["?"; unread.len()].join(", ");
                let sql = format!(
                    "UPDATE messages SET read_at_ms = ? WHERE message_id IN ({placeholders})"
                );
                let mut args: Vec<SqlValue> = vec![SqlValue::Integer(now_ms)];
                args.extend(unread.iter().map(|id| SqlValue::Integer(*id)));
                tx.execute(&sql, params_from_iter(args))?;
                insert_event_tx(
                    &tx,
                    &NewEvent::new(EventType::MessageRead)
                        .actor(agent_id.to_string())
                        .payload(json!({ "message_ids": unread })),
                    now_ms,
                )?;
                for message in &mut messages {
                    if message.read_at_ms.is_none() {
                        message.read_at_ms = Some(now_ms);
                    }
                }
            }
        }

        tx.commit()?;
        Ok(messages)
    }

    /// A task thread, oldest-first.
    pub fn messages_thread(
        &self,
        task_id: &str,
        since_ms: Option<i64>,
        limit: usize,
    ) -> Result<Vec<MessageRow>, StoreError> {
        let limit = limit.clamp(1, MESSAGE_LIMIT_MAX) as i64;
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages \
             WHERE to_type = 'task' AND to_id = ?1 AND created_at_ms >= ?2 \
             ORDER BY message_id ASC LIMIT ?3"
        ))?;
        let rows = stmt.query_map(params![task_id, since_ms.unwrap_or(0), limit], |row| {
            row_to_message(row)
        })?;
        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    /// Keyword/sender/time search across all messages, newest-first. At
    /// least one predicate is required.
    pub fn messages_search(
        &self,
        filters: &SearchFilters,
    ) -> Result<Vec<MessageRow>, StoreError> {
        if filters.keyword.is_none()
            && filters.from_agent_id.is_none()
            && filters.since_ms.is_none()
            && filters.until_ms.is_none()
        {
            return Err(StoreError::InvalidInput(
                "search requires at least one of keyword, from, since, until",
            ));
        }
        let limit = filters.limit.clamp(1, MESSAGE_LIMIT_MAX) as i64;

        let mut sql = format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE 1=1");
        let mut args: Vec<SqlValue> = Vec::new();
        if let Some(keyword) = filters.keyword.as_deref() {
            sql.push_str(" AND body LIKE ? ESCAPE '\\' COLLATE NOCASE");
            let escaped = keyword
                .replace('\\', "\\\\")
                .replace('%', "\\%")
                .replace('_', "\\_");
            args.push(SqlValue::Text(format!("%{escaped}%")));
        }
        if let Some(from) = filters.from_agent_id.as_deref() {
            sql.push_str(" AND from_agent_id = ?");
            args.push(SqlValue::Text(from.to_string()));
        }
        if let Some(since) = filters.since_ms {
            sql.push_str(" AND created_at_ms >= ?");
            args.push(SqlValue::Integer(since));
        }
        if let Some(until) = filters.until_ms {
            sql.push_str(" AND created_at_ms <= ?");
            args.push(SqlValue::Integer(until));
        }
        sql.push_str(" ORDER BY message_id DESC LIMIT ?");
        args.push(SqlValue::Integer(limit));

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(args), |row| row_to_message(row))?;
        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    /// Marks one message read if it is addressed to the acking agent and
    /// still unread; appends `message.read`.
    pub fn message_ack(
        &mut self,
        agent_id: &str,
        message_id: i64,
        now_ms: i64,
    ) -> Result<AckOutcome, StoreError> {
        let tx = self.conn.transaction()?;
        let found = tx
            .query_row(
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE message_id = ?1"),
                params![message_id],
                |row| row_to_message(row),
            )
            .optional()?;
        let Some(mut message) = found else {
            return Ok(AckOutcome::NotFound);
        };
        if message.to_type != Recipient::Agent || message.to_id != agent_id {
            return Ok(AckOutcome::NotAddressee);
        }
        if message.read_at_ms.is_some() {
            return Ok(AckOutcome::AlreadyRead(message));
        }

        tx.execute(
            "UPDATE messages SET read_at_ms = ?2 WHERE message_id = ?1",
            params![message_id, now_ms],
        )?;
        insert_event_tx(
            &tx,
            &NewEvent::new(EventType::MessageRead)
                .actor(agent_id.to_string())
                .payload(json!({ "message_ids": [message_id] })),
            now_ms,
        )?;
        tx.commit()?;
        message.read_at_ms = Some(now_ms);
        Ok(AckOutcome::Acked(message))
    }
}
