#![forbid(unsafe_code)]

pub(super) const SQL: &str = r#"
        -- Task claim leases.
        --
        -- A task is claimed exactly when a row satisfies expires_at_ms > now.
        -- Expired rows are kept as history; release sets expires_at_ms = now.
        -- There is no sweeper: every reader carries the expiry predicate.
        CREATE TABLE IF NOT EXISTS leases (
          lease_id TEXT PRIMARY KEY,
          task_id TEXT NOT NULL,
          agent_id TEXT NOT NULL,
          created_at_ms INTEGER NOT NULL,
          expires_at_ms INTEGER NOT NULL
        );
"#;
