#![forbid(unsafe_code)]

use ls_core::model::Recipient;
use ls_storage::{
    AckOutcome, AgentJoinRequest, InboxFilters, MessageSendRequest, SearchFilters, SqliteStore,
    StoreError,
};
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

fn open_with_agents(test_name: &str) -> SqliteStore {
    let dir = temp_dir(test_name);
    let mut store = SqliteStore::open(&dir).expect("open store");
    for agent in ["A1", "A2"] {
        store
            .agent_register(
                AgentJoinRequest {
                    agent_id: Some(agent.to_string()),
                    display_name: None,
                    role: None,
                    capabilities: Vec::new(),
                    session_meta_json: None,
                },
                0,
            )
            .expect("register");
    }
    store
}

fn send(
    store: &mut SqliteStore,
    from: &str,
    to_type: Recipient,
    to_id: &str,
    body: &str,
    now_ms: i64,
) -> i64 {
    store
        .message_send(
            MessageSendRequest {
                from_agent_id: from.to_string(),
                to_type,
                to_id: to_id.to_string(),
                body: body.to_string(),
                subject: None,
                severity: None,
                task_id: None,
            },
            now_ms,
        )
        .expect("send")
        .message_id
}

#[test]
fn send_validates_sender_recipient_and_size() {
    let mut store = open_with_agents("send_validates");

    let err = store.message_send(
        MessageSendRequest {
            from_agent_id: "GHOST".to_string(),
            to_type: Recipient::Agent,
            to_id: "A1".to_string(),
            body: "hello".to_string(),
            subject: None,
            severity: None,
            task_id: None,
        },
        0,
    );
    assert!(matches!(err, Err(StoreError::UnknownAgent)));

    let err = store.message_send(
        MessageSendRequest {
            from_agent_id: "A1".to_string(),
            to_type: Recipient::Agent,
            to_id: "NOBODY".to_string(),
            body: "hello".to_string(),
            subject: None,
            severity: None,
            task_id: None,
        },
        0,
    );
    assert!(matches!(err, Err(StoreError::UnknownAgent)));

    let err = store.message_send(
        MessageSendRequest {
            from_agent_id: "A1".to_string(),
            to_type: Recipient::Agent,
            to_id: "A2".to_string(),
            body: "x".repeat(16 * 1024 + 1),
            subject: None,
            severity: None,
            task_id: None,
        },
        0,
    );
    assert!(matches!(err, Err(StoreError::BodyTooLarge { .. })));

    // Task threads accept ids that are not (yet) tasks in any spec.
    let id = send(&mut store, "A1", Recipient::Task, "T-future", "note", 1);
    assert!(id > 0);
}

#[test]
fn inbox_filters_and_mark_read() {
    let mut store = open_with_agents("inbox_filters_and_mark_read");

    send(&mut store, "A2", Recipient::Agent, "A1", "first", 1_000);
    send(&mut store, "A2", Recipient::Agent, "A1", "second", 2_000);
    send(&mut store, "A1", Recipient::Agent, "A2", "reply", 3_000);

    let inbox = store
        .messages_inbox(
            "A1",
            &InboxFilters {
                unread_only: true,
                from_agent_id: None,
                since_ms: None,
                until_ms: None,
                limit: 50,
            },
            true,
            5_000,
        )
        .expect("inbox");
    assert_eq!(inbox.len(), 2);
    // Newest first.
    assert_eq!(inbox[0].body, "second");
    assert_eq!(inbox[1].body, "first");
    assert!(inbox.iter().all(|m| m.read_at_ms == Some(5_000)));

    // All read now, so unread_only drains to nothing.
    let unread = store
        .messages_inbox(
            "A1",
            &InboxFilters {
                unread_only: true,
                limit: 50,
                ..Default::default()
            },
            false,
            6_000,
        )
        .expect("inbox");
    assert!(unread.is_empty());

    // One message.read event for the batch, carrying both ids.
    let slice = store.events_pull(0, 1000, &[]).expect("events");
    let reads: Vec<_> = slice
        .events
        .iter()
        .filter(|e| e.event_type == "message.read")
        .collect();
    assert_eq!(reads.len(), 1);
    let payload: serde_json::Value =
        serde_json::from_str(&reads[0].payload_json).expect("payload json");
    assert_eq!(payload["message_ids"].as_array().map(|a| a.len()), Some(2));

    // Time-range filter.
    let ranged = store
        .messages_inbox(
            "A1",
            &InboxFilters {
                since_ms: Some(1_500),
                until_ms: Some(2_500),
                limit: 50,
                ..Default::default()
            },
            false,
            7_000,
        )
        .expect("inbox");
    assert_eq!(ranged.len(), 1);
    assert_eq!(ranged[0].body, "second");
}

#[test]
fn thread_is_ordered_oldest_first() {
    let mut store = open_with_agents("thread_is_ordered_oldest_first");
    send(&mut store, "A1", Recipient::Task, "T1", "one", 1_000);
    send(&mut store, "A2", Recipient::Task, "T1", "two", 2_000);
    send(&mut store, "A1", Recipient::Task, "T2", "other thread", 3_000);

    let thread = store.messages_thread("T1", None, 50).expect("thread");
    assert_eq!(thread.len(), 2);
    assert!(thread[0].message_id < thread[1].message_id);
    assert_eq!(thread[0].body, "one");
    assert_eq!(thread[1].body, "two");
}

#[test]
fn search_needs_a_predicate_and_matches_case_insensitively() {
    let mut store = open_with_agents("search_needs_a_predicate");
    send(&mut store, "A1", Recipient::Agent, "A2", "Deploy FAILED on main", 1_000);
    send(&mut store, "A2", Recipient::Agent, "A1", "all green", 2_000);

    let err = store.messages_search(&SearchFilters {
        keyword: None,
        from_agent_id: None,
        since_ms: None,
        until_ms: None,
        limit: 50,
    });
    assert!(matches!(err, Err(StoreError::InvalidInput(_))));

    let hits = store
        .messages_search(&SearchFilters {
            keyword: Some("failed".to_string()),
            from_agent_id: None,
            since_ms: None,
            until_ms: None,
            limit: 50,
        })
        .expect("search");
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].from_agent_id, "A1");

    let by_sender = store
        .messages_search(&SearchFilters {
            keyword: None,
            from_agent_id: Some("A2".to_string()),
            since_ms: None,
            until_ms: None,
            limit: 50,
        })
        .expect("search");
    assert_eq!(by_sender.len(), 1);
    assert_eq!(by_sender[0].body, "all green");
}

#[test]
fn ack_checks_addressee_and_read_state() {
    let mut store = open_with_agents("ack_checks_addressee");
    let id = send(&mut store, "A1", Recipient::Agent, "A2", "ping", 1_000);

    assert!(matches!(
        store.message_ack("A1", id, 2_000).expect("ack"),
        AckOutcome::NotAddressee
    ));
    assert!(matches!(
        store.message_ack("A2", 9999, 2_000).expect("ack"),
        AckOutcome::NotFound
    ));
    match store.message_ack("A2", id, 2_000).expect("ack") {
        AckOutcome::Acked(message) => assert_eq!(message.read_at_ms, Some(2_000)),
        other => panic!("unexpected {other:?}"),
    }
    assert!(matches!(
        store.message_ack("A2", id, 3_000).expect("ack"),
        AckOutcome::AlreadyRead(_)
    ));
}
