#![forbid(unsafe_code)]

mod support;

use ls_engine::clock::{ms_to_rfc3339, Clock};
use ls_engine::coordinator::TaskUpdateRequest;
use support::{claim_ok, setup};

#[test]
fn update_edits_fields_and_bumps_updated_at_but_never_status() {
    let repo = setup("update_edits_fields");
    let mut session = repo.open();
    repo.join_agent(&mut session, "A1");
    repo.create_task(&mut session, "T1", &[]);

    let created_at = ms_to_rfc3339(repo.clock.now_ms());
    repo.clock.advance_secs(120);

    let updated = session.task_update(TaskUpdateRequest {
        task_id: "T1".to_string(),
        title: Some("Sharper title".to_string()),
        priority: Some(7),
        labels: Some(vec!["core".to_string()]),
        ..Default::default()
    });
    assert!(updated.ok, "update failed: {:?}", updated.error);
    let task = &updated.data["task"];
    assert_eq!(task["title"], serde_json::json!("Sharper title"));
    assert_eq!(task["priority"], serde_json::json!(7));
    assert_eq!(task["labels"], serde_json::json!(["core"]));
    // The request shape has no status field: lifecycle commands are the
    // only status writers, so update leaves it where it was.
    assert_eq!(task["status"], serde_json::json!("ready"));
    assert_eq!(task["created_at"], serde_json::json!(created_at));
    assert_eq!(
        task["updated_at"],
        serde_json::json!(ms_to_rfc3339(repo.clock.now_ms()))
    );

    // The change is persisted, not just echoed.
    let fetched = session.task_get("T1");
    assert_eq!(fetched.data["task"]["title"], serde_json::json!("Sharper title"));
    assert_eq!(fetched.data["task"]["status"], serde_json::json!("ready"));
}

#[test]
fn update_revalidates_the_dependency_graph() {
    let repo = setup("update_revalidates_graph");
    let mut session = repo.open();
    repo.join_agent(&mut session, "A1");
    repo.create_task(&mut session, "T1", &[]);
    repo.create_task(&mut session, "T2", &["T1"]);

    // Re-pointing T1 at T2 would close a cycle; the whole mutation is
    // rejected and the spec keeps its previous shape.
    let cycle = session.task_update(TaskUpdateRequest {
        task_id: "T1".to_string(),
        depends_on: Some(vec!["T2".to_string()]),
        ..Default::default()
    });
    assert_eq!(cycle.error_code(), Some("SpecInvariantViolation"));

    let unknown_dep = session.task_update(TaskUpdateRequest {
        task_id: "T2".to_string(),
        depends_on: Some(vec!["nowhere".to_string()]),
        ..Default::default()
    });
    assert_eq!(unknown_dep.error_code(), Some("SpecInvariantViolation"));

    let intact = session.task_get("T2");
    assert_eq!(
        intact.data["task"]["depends_on"],
        serde_json::json!(["T1"])
    );
}

#[test]
fn update_requires_fields_and_a_live_task() {
    let repo = setup("update_requires_fields");
    let mut session = repo.open();
    repo.join_agent(&mut session, "A1");
    repo.create_task(&mut session, "T1", &[]);

    let empty = session.task_update(TaskUpdateRequest {
        task_id: "T1".to_string(),
        ..Default::default()
    });
    assert_eq!(empty.error_code(), Some("InvalidInput"));

    let missing = session.task_update(TaskUpdateRequest {
        task_id: "ghost".to_string(),
        title: Some("anything".to_string()),
        ..Default::default()
    });
    assert_eq!(missing.error_code(), Some("TaskNotFound"));

    assert!(session.task_delete("T1", Some("A1".to_string()), false).ok);
    let tombstoned = session.task_update(TaskUpdateRequest {
        task_id: "T1".to_string(),
        title: Some("too late".to_string()),
        ..Default::default()
    });
    assert_eq!(tombstoned.error_code(), Some("TaskStateConflict"));
}

#[test]
fn graph_export_respects_dependencies() {
    let repo = setup("graph_export");
    let mut session = repo.open();
    repo.join_agent(&mut session, "A1");
    repo.create_task(&mut session, "T1", &[]);
    repo.create_task(&mut session, "T2", &["T1"]);
    repo.create_task(&mut session, "T3", &["T1", "T2"]);
    claim_ok(&mut session, "T1", "A1");

    let graph = session.task_graph();
    assert!(graph.ok, "graph failed: {:?}", graph.error);

    let nodes = graph.data["nodes"].as_array().expect("nodes");
    assert_eq!(nodes.len(), 3);
    let t1 = nodes
        .iter()
        .find(|n| n["id"] == serde_json::json!("T1"))
        .expect("T1 node");
    assert_eq!(t1["claimed_by"], serde_json::json!("A1"));
    assert_eq!(t1["status"], serde_json::json!("ready"));

    assert_eq!(
        graph.data["edges"],
        serde_json::json!([
            { "from": "T1", "to": "T2" },
            { "from": "T1", "to": "T3" },
            { "from": "T2", "to": "T3" }
        ])
    );

    let order: Vec<&str> = graph.data["order"]
        .as_array()
        .expect("order")
        .iter()
        .map(|id| id.as_str().expect("id"))
        .collect();
    let position = |id: &str| order.iter().position(|o| *o == id).expect(id);
    assert!(position("T1") < position("T2"));
    assert!(position("T2") < position("T3"));
}

#[test]
fn graph_excludes_tombstones() {
    let repo = setup("graph_excludes_tombstones");
    let mut session = repo.open();
    repo.join_agent(&mut session, "A1");
    repo.create_task(&mut session, "keep", &[]);
    repo.create_task(&mut session, "drop", &[]);
    assert!(session.task_delete("drop", Some("A1".to_string()), false).ok);

    let graph = session.task_graph();
    let ids: Vec<&str> = graph.data["nodes"]
        .as_array()
        .expect("nodes")
        .iter()
        .map(|n| n["id"].as_str().expect("id"))
        .collect();
    assert_eq!(ids, vec!["keep"]);
    assert_eq!(graph.data["order"], serde_json::json!(["keep"]));
}
