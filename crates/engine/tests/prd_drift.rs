#![forbid(unsafe_code)]

mod support;

use ls_engine::coordinator::{PrdRefInput, TaskCreateRequest};
use support::setup;

const PRD_V1: &str = "# Product\n\n## Goals\n\n- coordinate agents\n- stay daemon-free\n\n## Constraints\n\n- single working tree\n";
const PRD_V2: &str = "# Product\n\n## Goals\n\n- coordinate agents\n- stay daemon-free\n- new goal added later\n\n## Limits\n\n- single working tree\n";

fn create_bound_task(repo: &support::TestRepo) {
    std::fs::write(repo.root.join("prd.md"), PRD_V1).expect("write prd");
    let mut session = repo.open();
    repo.join_agent(&mut session, "A1");
    let envelope = session.task_create(TaskCreateRequest {
        task_id: "T1".to_string(),
        title: "Implement goals".to_string(),
        prd_source: Some("prd.md".to_string()),
        prd_refs: vec![
            PrdRefInput {
                anchor: "#goals".to_string(),
                lines: None,
            },
            PrdRefInput {
                anchor: "#constraints".to_string(),
                lines: None,
            },
        ],
        ..Default::default()
    });
    assert!(envelope.ok, "create failed: {:?}", envelope.error);
}

#[test]
fn context_with_unchanged_source_reports_no_drift() {
    let repo = setup("context_no_drift");
    create_bound_task(&repo);

    let mut session = repo.open();
    let context = session.task_context("T1", None);
    assert!(context.ok, "context failed: {:?}", context.error);
    let prd = &context.data["prd"];
    assert_eq!(prd["drift"]["changed"], serde_json::json!(false));
    assert!(prd["excerpt"]
        .as_str()
        .expect("excerpt")
        .contains("coordinate agents"));
    assert!(prd["body"].as_str().expect("body").contains("single working tree"));
    assert_eq!(prd["truncated"], serde_json::json!(false));
}

#[test]
fn edited_source_reports_drift_with_affected_refs() {
    let repo = setup("context_drift");
    create_bound_task(&repo);

    // The source changes after the excerpt was frozen.
    std::fs::write(repo.root.join("prd.md"), PRD_V2).expect("rewrite prd");

    let mut session = repo.open();
    let context = session.task_context("T1", None);
    assert!(context.ok);
    let prd = &context.data["prd"];
    assert_eq!(prd["drift"]["changed"], serde_json::json!(true));
    assert_eq!(
        prd["drift"]["missing_anchors"],
        serde_json::json!(["#constraints"])
    );

    // Frozen excerpt is the v1 text; live sections come from v2.
    let excerpt = prd["excerpt"].as_str().expect("excerpt");
    assert!(!excerpt.contains("new goal added later"));
    let body = prd["body"].as_str().expect("body");
    assert!(body.contains("new goal added later"));
    assert!(!context.warnings.is_empty(), "missing anchor should warn");
}

#[test]
fn context_budget_truncates_and_flags() {
    let repo = setup("context_budget");
    create_bound_task(&repo);

    let mut session = repo.open();
    let context = session.task_context("T1", Some(12));
    assert!(context.ok);
    let prd = &context.data["prd"];
    assert_eq!(prd["truncated"], serde_json::json!(true));
    assert_eq!(prd["body"].as_str().expect("body").chars().count(), 12);
}

#[test]
fn missing_source_file_still_serves_the_frozen_excerpt() {
    let repo = setup("context_missing_source");
    create_bound_task(&repo);
    std::fs::remove_file(repo.root.join("prd.md")).expect("remove prd");

    let mut session = repo.open();
    let context = session.task_context("T1", None);
    assert!(context.ok);
    let prd = &context.data["prd"];
    assert_eq!(prd["drift"]["changed"], serde_json::json!(true));
    assert!(prd["excerpt"]
        .as_str()
        .expect("excerpt")
        .contains("coordinate agents"));
    assert!(!context.warnings.is_empty());
}

#[test]
fn task_without_binding_warns_instead_of_failing() {
    let repo = setup("context_unbound");
    let mut session = repo.open();
    repo.join_agent(&mut session, "A1");
    repo.create_task(&mut session, "plain", &[]);

    let context = session.task_context("plain", None);
    assert!(context.ok);
    assert!(context.data["prd"].is_null());
    assert!(!context.warnings.is_empty());
}
