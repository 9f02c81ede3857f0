#![forbid(unsafe_code)]

pub(super) const SQL: &str = r#"
        -- Append-only mutation log. id is the pull cursor; rows are written
        -- inside the mutating transaction so commit order equals id order.
        CREATE TABLE IF NOT EXISTS events (
          id INTEGER PRIMARY KEY AUTOINCREMENT,
          created_at_ms INTEGER NOT NULL,
          type TEXT NOT NULL,
          actor_agent_id TEXT,
          task_id TEXT,
          target_agent_id TEXT,
          payload_json TEXT NOT NULL
        );
"#;
