#![forbid(unsafe_code)]

pub(super) const SQL: &str = r#"
        -- Inter-agent messages. to_type is 'agent' or 'task'; task threads
        -- are not validated against the spec so context can be attached to
        -- ids created later.
        CREATE TABLE IF NOT EXISTS messages (
          message_id INTEGER PRIMARY KEY AUTOINCREMENT,
          created_at_ms INTEGER NOT NULL,
          from_agent_id TEXT NOT NULL,
          to_type TEXT NOT NULL,
          to_id TEXT NOT NULL,
          task_id TEXT,
          subject TEXT,
          body TEXT NOT NULL,
          severity TEXT,
          read_at_ms INTEGER
        );
"#;
