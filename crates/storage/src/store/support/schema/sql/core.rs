#![forbid(unsafe_code)]

pub(super) const SQL: &str = r#"
        CREATE TABLE IF NOT EXISTS meta (
          key TEXT PRIMARY KEY,
          value TEXT NOT NULL
        );
"#;
