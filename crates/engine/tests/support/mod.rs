#![forbid(unsafe_code)]
#![allow(dead_code)]

use ls_engine::clock::{Clock, FixedClock};
use ls_engine::coordinator::{init_repo, Coordinator, JoinRequest};
use ls_engine::paths::RepoPaths;
use std::path::PathBuf;
use std::sync::Arc;

/// A test clock handle that can be cloned into several coordinator
/// instances while the test keeps control of time.
#[derive(Clone)]
pub struct SharedClock(pub Arc<FixedClock>);

impl Clock for SharedClock {
    fn now_ms(&self) -> i64 {
        self.0.now_ms()
    }
}

pub struct TestRepo {
    pub root: PathBuf,
    pub clock: Arc<FixedClock>,
}

pub fn temp_dir(test_name: &str) -> PathBuf {
    let base = std::env::temp_dir();
    let pid = std::process::id();
    let nonce = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let dir = base.join(format!("ls_engine_{test_name}_{pid}_{nonce}"));
    std::fs::create_dir_all(&dir).expect("create temp dir");
    dir
}

/// Initializes a repository and returns a handle with a frozen clock
/// starting at t = 1_000_000 ms.
pub fn setup(test_name: &str) -> TestRepo {
    let root = temp_dir(test_name);
    let envelope = init_repo(&root, "testproj", false);
    assert!(envelope.ok, "init failed: {:?}", envelope.error);
    TestRepo {
        root,
        clock: Arc::new(FixedClock::at(1_000_000)),
    }
}

impl TestRepo {
    /// Opens a coordinator sharing this repo's clock — a fresh "session"
    /// over the same on-disk state.
    pub fn open(&self) -> Coordinator {
        Coordinator::open(
            RepoPaths::at_root(self.root.clone()),
            Box::new(SharedClock(self.clock.clone())),
        )
        .expect("open coordinator")
    }

    pub fn join_agent(&self, coordinator: &mut Coordinator, agent_id: &str) {
        let envelope = coordinator.agent_join(JoinRequest {
            agent_id: Some(agent_id.to_string()),
            display_name: Some(format!("Agent {agent_id}")),
            role: None,
            capabilities: vec!["code".to_string()],
            session_meta: None,
        });
        assert!(envelope.ok, "join {agent_id} failed: {:?}", envelope.error);
    }

    pub fn create_task(&self, coordinator: &mut Coordinator, task_id: &str, deps: &[&str]) {
        let envelope = coordinator.task_create(ls_engine::coordinator::TaskCreateRequest {
            task_id: task_id.to_string(),
            title: format!("Task {task_id}"),
            description: String::new(),
            acceptance_criteria: String::new(),
            priority: None,
            labels: Vec::new(),
            depends_on: deps.iter().map(|d| d.to_string()).collect(),
            locks: Vec::new(),
            prd_source: None,
            prd_refs: Vec::new(),
        });
        assert!(
            envelope.ok,
            "create {task_id} failed: {:?}",
            envelope.error
        );
    }
}

/// Claims a task and asserts success, returning the lease id.
pub fn claim_ok(coordinator: &mut Coordinator, task_id: &str, agent_id: &str) -> String {
    let envelope = coordinator.task_claim(ls_engine::coordinator::ClaimRequest {
        task_id: task_id.to_string(),
        agent_id: agent_id.to_string(),
        ttl_secs: Some(900),
        force: false,
    });
    assert!(envelope.ok, "claim failed: {:?}", envelope.error);
    envelope.data["lease"]["lease_id"]
        .as_str()
        .expect("lease id")
        .to_string()
}
