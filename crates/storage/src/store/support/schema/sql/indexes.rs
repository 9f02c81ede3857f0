#![forbid(unsafe_code)]

pub(super) const SQL: &str = r#"
        CREATE INDEX IF NOT EXISTS idx_leases_task_expires ON leases(task_id, expires_at_ms);
        CREATE INDEX IF NOT EXISTS idx_leases_agent_expires ON leases(agent_id, expires_at_ms);
        CREATE INDEX IF NOT EXISTS idx_messages_recipient ON messages(to_type, to_id, message_id);
        CREATE INDEX IF NOT EXISTS idx_messages_sender ON messages(from_agent_id, message_id);
        CREATE INDEX IF NOT EXISTS idx_events_type_id ON events(type, id);
"#;
