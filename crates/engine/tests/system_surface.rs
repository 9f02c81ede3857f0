#![forbid(unsafe_code)]

mod support;

use ls_engine::coordinator::{init_repo, JoinRequest, MessageListRequest, MessageSendRequest};
use ls_engine::paths::RepoPaths;
use ls_engine::schema;
use support::{claim_ok, setup, temp_dir};

#[test]
fn init_refuses_a_second_run_without_force() {
    let root = temp_dir("init_refuses_second_run");
    let first = init_repo(&root, "demo", false);
    assert!(first.ok);
    assert!(root.join(".lodestar/spec.yaml").is_file());
    assert!(root.join(".lodestar/runtime.sqlite").is_file());

    let second = init_repo(&root, "demo", false);
    assert!(!second.ok);
    assert_eq!(second.error_code(), Some("InvalidInput"));

    let forced = init_repo(&root, "demo", true);
    assert!(forced.ok);
}

#[test]
fn discovery_fails_cleanly_outside_a_repository() {
    let stray = temp_dir("discovery_outside_repo");
    let err = RepoPaths::discover_from(&stray).expect_err("no repo");
    assert_eq!(err.code(), "NotInitialized");
}

#[test]
fn repo_status_counts_both_planes() {
    let repo = setup("repo_status_counts");
    let mut session = repo.open();
    repo.join_agent(&mut session, "A1");
    repo.create_task(&mut session, "T1", &[]);
    repo.create_task(&mut session, "T2", &["T1"]);
    claim_ok(&mut session, "T1", "A1");

    let status = session.repo_status();
    assert!(status.ok, "status failed: {:?}", status.error);
    assert_eq!(status.data["project"]["name"], serde_json::json!("testproj"));
    assert_eq!(status.data["tasks"]["total"], serde_json::json!(2));
    assert_eq!(
        status.data["tasks"]["by_status"]["ready"],
        serde_json::json!(2)
    );
    // T1 is leased and T2 is blocked on it, so nothing is claimable.
    assert_eq!(status.data["tasks"]["claimable"], serde_json::json!(0));
    assert_eq!(status.data["runtime"]["agents"], serde_json::json!(1));
    assert_eq!(status.data["runtime"]["active_leases"], serde_json::json!(1));
}

#[test]
fn agent_find_filters_by_capability_and_role() {
    let repo = setup("agent_find_filters");
    let mut session = repo.open();

    let mut join = |id: &str, role: Option<&str>, caps: &[&str]| {
        let envelope = session.agent_join(JoinRequest {
            agent_id: Some(id.to_string()),
            display_name: None,
            role: role.map(|r| r.to_string()),
            capabilities: caps.iter().map(|c| c.to_string()).collect(),
            session_meta: None,
        });
        assert!(envelope.ok, "join {id} failed: {:?}", envelope.error);
    };
    join("CODER", Some("builder"), &["code", "test"]);
    join("REVIEWER", Some("reviewer"), &["review"]);
    join("HYBRID", Some("builder"), &["code", "review"]);

    let by_cap = session.agent_find(Some("review".to_string()), None);
    assert!(by_cap.ok, "find failed: {:?}", by_cap.error);
    let mut ids: Vec<&str> = by_cap.data["agents"]
        .as_array()
        .expect("agents")
        .iter()
        .map(|a| a["agent_id"].as_str().expect("id"))
        .collect();
    ids.sort_unstable();
    assert_eq!(ids, vec!["HYBRID", "REVIEWER"]);

    // Capability match is exact, not substring.
    let exact = session.agent_find(Some("cod".to_string()), None);
    assert_eq!(exact.data["count"], serde_json::json!(0));

    let by_role = session.agent_find(None, Some("builder".to_string()));
    assert_eq!(by_role.data["count"], serde_json::json!(2));

    let both = session.agent_find(Some("code".to_string()), Some("builder".to_string()));
    let mut ids: Vec<&str> = both.data["agents"]
        .as_array()
        .expect("agents")
        .iter()
        .map(|a| a["agent_id"].as_str().expect("id"))
        .collect();
    ids.sort_unstable();
    assert_eq!(ids, vec!["CODER", "HYBRID"]);

    let neither = session.agent_find(None, None);
    assert_eq!(neither.error_code(), Some("InvalidInput"));
}

#[test]
fn messaging_round_trip_through_the_coordinator() {
    let repo = setup("messaging_round_trip");
    let mut session = repo.open();
    repo.join_agent(&mut session, "A1");
    repo.join_agent(&mut session, "A2");

    let sent = session.message_send(MessageSendRequest {
        from_agent_id: "A1".to_string(),
        to_type: "agent".to_string(),
        to_id: "A2".to_string(),
        body: "review branch please".to_string(),
        subject: Some("review".to_string()),
        severity: None,
        task_id: Some("T1".to_string()),
    });
    assert!(sent.ok, "send failed: {:?}", sent.error);
    let message_id = sent.data["message"]["message_id"].as_i64().expect("id");

    let bad_recipient = session.message_send(MessageSendRequest {
        from_agent_id: "A1".to_string(),
        to_type: "agent".to_string(),
        to_id: "NOBODY".to_string(),
        body: "hello?".to_string(),
        subject: None,
        severity: None,
        task_id: None,
    });
    assert_eq!(bad_recipient.error_code(), Some("MessageRecipientInvalid"));

    let oversized = session.message_send(MessageSendRequest {
        from_agent_id: "A1".to_string(),
        to_type: "agent".to_string(),
        to_id: "A2".to_string(),
        body: "x".repeat(17 * 1024),
        subject: None,
        severity: None,
        task_id: None,
    });
    assert_eq!(oversized.error_code(), Some("MessageTooLarge"));

    let inbox = session.message_list(MessageListRequest {
        agent_id: "A2".to_string(),
        unread_only: true,
        mark_read: true,
        ..Default::default()
    });
    assert!(inbox.ok);
    assert_eq!(inbox.data["count"], serde_json::json!(1));

    let ack_again = session.message_ack("A2", message_id);
    assert!(ack_again.ok);
    assert!(!ack_again.warnings.is_empty(), "already read should warn");
}

#[test]
fn event_pull_pages_through_the_coordinator() {
    let repo = setup("event_pull_pages");
    let mut session = repo.open();
    repo.join_agent(&mut session, "A1");
    for _ in 0..9 {
        assert!(session.agent_heartbeat("A1").ok);
    }

    // 1 joined + 9 heartbeats.
    let first = session.events_pull(0, Some(4), vec![]);
    assert_eq!(first.data["count"], serde_json::json!(4));
    assert_eq!(first.data["next_cursor"], serde_json::json!(4));

    let rest = session.events_pull(4, None, vec![]);
    assert_eq!(rest.data["count"], serde_json::json!(6));
    assert_eq!(rest.data["next_cursor"], serde_json::json!(10));

    let empty = session.events_pull(10, None, vec![]);
    assert_eq!(empty.data["count"], serde_json::json!(0));
    assert_eq!(empty.data["next_cursor"], serde_json::json!(10));

    let bad_type = session.events_pull(0, None, vec!["task.claim".to_string()]);
    assert_eq!(bad_type.error_code(), Some("InvalidInput"));
}

#[test]
fn export_snapshot_covers_both_planes() {
    let repo = setup("export_snapshot");
    let mut session = repo.open();
    repo.join_agent(&mut session, "A1");
    repo.create_task(&mut session, "T1", &[]);
    claim_ok(&mut session, "T1", "A1");

    let snapshot = session.export_snapshot();
    assert!(snapshot.ok);
    assert_eq!(snapshot.data["tasks"][0]["id"], serde_json::json!("T1"));
    assert_eq!(
        snapshot.data["agents"][0]["agent_id"],
        serde_json::json!("A1")
    );
    assert_eq!(
        snapshot.data["active_leases"][0]["task_id"],
        serde_json::json!("T1")
    );
}

#[test]
fn health_check_reports_spec_and_runtime() {
    let repo = setup("health_check_ok");
    let mut session = repo.open();
    let health = session.health_check();
    assert!(health.ok, "health failed: {:?}", health.error);
    let checks = health.data["checks"].as_array().expect("checks");
    assert_eq!(checks.len(), 2);
    assert!(checks.iter().all(|c| c["ok"] == serde_json::json!(true)));

    // Corrupt the spec: health degrades but still reports per-check detail.
    std::fs::write(repo.root.join(".lodestar/spec.yaml"), "tasks: [broken")
        .expect("corrupt spec");
    let degraded = session.health_check();
    assert!(!degraded.ok);
    assert_eq!(degraded.error_code(), Some("SpecMalformed"));
    let checks = degraded.data["checks"].as_array().expect("checks");
    assert_eq!(checks[0]["ok"], serde_json::json!(false));
    assert_eq!(checks[1]["ok"], serde_json::json!(true));
}

#[test]
fn every_operation_publishes_a_schema() {
    for op in schema::OPERATIONS {
        assert!(schema::output_schema(op).is_some(), "no schema for {op}");
    }
}
