#![forbid(unsafe_code)]

use ls_storage::SqliteStore;
use rusqlite::{params, Connection};
use std::path::PathBuf;

fn temp_dir(test_name: &str) -> PathBuf {
    let base = std::env::temp_dir();
    let pid = std::process::id();
    let nonce = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let dir = base.join(format!("ls_storage_{test_name}_{pid}_{nonce}"));
    std::fs::create_dir_all(&dir).expect("create temp dir");
    dir
}

#[test]
fn uncommitted_transaction_is_not_persisted_after_reopen() {
    let dir = temp_dir("uncommitted_transaction_not_persisted");
    let db_path;
    {
        let store = SqliteStore::open(&dir).expect("open store");
        db_path = store.db_path().to_path_buf();
    }

    {
        let mut conn = Connection::open(&db_path).expect("open raw");
        let tx = conn.transaction().expect("begin tx");
        tx.execute(
            r#"
            INSERT INTO agents(agent_id, display_name, role, capabilities_json,
                               registered_at_ms, last_seen_at_ms, session_meta_json)
            VALUES (?1, NULL, NULL, '[]', 0, 0, NULL)
            "#,
            params!["A1"],
        )
        .expect("insert agent");
        // Drop without commit -> rollback (simulated crash before commit).
    }

    let store = SqliteStore::open(&dir).expect("reopen store");
    assert!(!store.agent_exists("A1").expect("exists"));
}

#[test]
fn reopen_is_idempotent_and_keeps_schema_version() {
    let dir = temp_dir("reopen_is_idempotent");
    {
        let store = SqliteStore::open(&dir).expect("open store");
        assert_eq!(store.schema_version().expect("version").as_deref(), Some("v1"));
    }
    let store = SqliteStore::open(&dir).expect("reopen store");
    assert_eq!(store.schema_version().expect("version").as_deref(), Some("v1"));
}
