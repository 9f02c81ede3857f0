#![forbid(unsafe_code)]

use ls_storage::{AgentJoinRequest, ClaimOutcome, SqliteStore};
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
fn cleanup_expires_leases_of_removed_agents() {
    let dir = temp_dir("cleanup_expires_leases_of_removed_agents");
    let db_path;
    {
        let mut store = SqliteStore::open(&dir).expect("open store");
        db_path = store.db_path().to_path_buf();
        store
            .agent_register(
                AgentJoinRequest {
                    agent_id: Some("A1".to_string()),
                    display_name: None,
                    role: None,
                    capabilities: Vec::new(),
                    session_meta_json: None,
                },
                0,
            )
            .expect("register");
        match store.lease_claim("T1", "A1", 3600, 0).expect("claim") {
            ClaimOutcome::Created(_) => {}
            other => panic!("unexpected {other:?}"),
        }
    }

    // Remove the agent row out-of-band (manual db surgery).
    {
        let conn = Connection::open(&db_path).expect("open raw");
        conn.execute("DELETE FROM agents WHERE agent_id = ?1", params!["A1"])
            .expect("delete agent");
    }

    // A fresh service run performs orphan cleanup.
    let mut store = SqliteStore::open(&dir).expect("reopen store");
    let now_ms = 1_000;
    let orphaned = store.leases_cleanup_orphaned(now_ms).expect("cleanup");
    assert_eq!(orphaned.len(), 1);
    assert_eq!(orphaned[0].task_id, "T1");

    assert!(store.lease_active("T1", now_ms).expect("active").is_none());

    let slice = store.events_pull(0, 1000, &[]).expect("events");
    assert!(slice
        .events
        .iter()
        .any(|e| e.event_type == "lease.orphaned"));

    // A second cleanup is a no-op.
    let again = store.leases_cleanup_orphaned(now_ms + 1).expect("cleanup");
    assert!(again.is_empty());
}

#[test]
fn cleanup_leaves_living_agents_alone() {
    let dir = temp_dir("cleanup_leaves_living_agents_alone");
    let mut store = SqliteStore::open(&dir).expect("open store");
    store
        .agent_register(
            AgentJoinRequest {
                agent_id: Some("A1".to_string()),
                display_name: None,
                role: None,
                capabilities: Vec::new(),
                session_meta_json: None,
            },
            0,
        )
        .expect("register");
    store.lease_claim("T1", "A1", 3600, 0).expect("claim");

    let orphaned = store.leases_cleanup_orphaned(1_000).expect("cleanup");
    assert!(orphaned.is_empty());
    assert!(store.lease_active("T1", 1_000).expect("active").is_some());
}
