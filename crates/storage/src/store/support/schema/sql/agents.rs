#![forbid(unsafe_code)]

pub(super) const SQL: &str = r#"
        CREATE TABLE IF NOT EXISTS agents (
          agent_id TEXT PRIMARY KEY,
          display_name TEXT,
          role TEXT,
          capabilities_json TEXT NOT NULL,
          registered_at_ms INTEGER NOT NULL,
          last_seen_at_ms INTEGER NOT NULL,
          session_meta_json TEXT
        );
"#;
