#![forbid(unsafe_code)]

use ls_core::events::EventType;
use ls_storage::{AgentJoinRequest, SqliteStore};
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

fn store_with_heartbeats(test_name: &str, count: usize) -> SqliteStore {
    let dir = temp_dir(test_name);
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
    // agent.joined is event 1; heartbeats fill the rest.
    for i in 1..count {
        store.agent_heartbeat("A1", i as i64).expect("heartbeat");
    }
    store
}

#[test]
fn pull_pages_without_gaps_or_overlap() {
    let store = store_with_heartbeats("pull_pages_without_gaps", 100);

    let first = store.events_pull(0, 40, &[]).expect("pull 1");
    assert_eq!(first.events.len(), 40);
    assert_eq!(first.events.first().map(|e| e.id), Some(1));
    assert_eq!(first.events.last().map(|e| e.id), Some(40));
    assert_eq!(first.next_cursor, 40);

    let second = store.events_pull(first.next_cursor, 1000, &[]).expect("pull 2");
    assert_eq!(second.events.len(), 60);
    assert_eq!(second.events.first().map(|e| e.id), Some(41));
    assert_eq!(second.events.last().map(|e| e.id), Some(100));
    assert_eq!(second.next_cursor, 100);

    let drained = store.events_pull(second.next_cursor, 1000, &[]).expect("pull 3");
    assert!(drained.events.is_empty());
    assert_eq!(drained.next_cursor, 100);
}

#[test]
fn chained_pulls_equal_one_pull() {
    let store = store_with_heartbeats("chained_pulls_equal_one_pull", 50);

    let whole = store.events_pull(0, 1000, &[]).expect("whole");
    let mut chained = Vec::new();
    let mut cursor = 0;
    loop {
        let slice = store.events_pull(cursor, 7, &[]).expect("chunk");
        if slice.events.is_empty() {
            break;
        }
        cursor = slice.next_cursor;
        chained.extend(slice.events);
    }

    let whole_ids: Vec<i64> = whole.events.iter().map(|e| e.id).collect();
    let chained_ids: Vec<i64> = chained.iter().map(|e| e.id).collect();
    assert_eq!(whole_ids, chained_ids);
}

#[test]
fn ids_and_timestamps_are_monotonic() {
    let store = store_with_heartbeats("ids_and_timestamps_monotonic", 30);
    let slice = store.events_pull(0, 1000, &[]).expect("pull");
    let mut last_id = 0;
    let mut last_ts = i64::MIN;
    for event in &slice.events {
        assert!(event.id > last_id, "id regressed at {}", event.id);
        assert!(event.created_at_ms >= last_ts, "ts regressed at {}", event.id);
        last_id = event.id;
        last_ts = event.created_at_ms;
    }
}

#[test]
fn type_filter_restricts_the_stream() {
    let store = store_with_heartbeats("type_filter_restricts", 10);
    let joined = store
        .events_pull(0, 1000, &[EventType::AgentJoined])
        .expect("pull joined");
    assert_eq!(joined.events.len(), 1);
    assert_eq!(joined.events[0].event_type, "agent.joined");

    let beats = store
        .events_pull(0, 1000, &[EventType::AgentHeartbeat])
        .expect("pull heartbeats");
    assert_eq!(beats.events.len(), 9);
    assert!(beats.events.iter().all(|e| e.event_type == "agent.heartbeat"));
}
