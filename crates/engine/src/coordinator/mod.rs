#![forbid(unsafe_code)]

//! The coordinator: the only surface through which callers mutate state.
//!
//! Every operation validates its inputs, takes the spec file lock before any
//! runtime transaction (the canonical order — never the reverse), writes the
//! spec first on cross-plane changes, appends events inside the runtime
//! transaction, and answers with an [`Envelope`].

mod agents;
mod messages;
mod system;
mod tasks;

pub use agents::JoinRequest;
pub use messages::{MessageListRequest, MessageSearchRequest, MessageSendRequest};
pub use system::init_repo;
pub use tasks::{ClaimRequest, PrdRefInput, TaskCreateRequest, TaskUpdateRequest};

use crate::clock::{ms_to_rfc3339, Clock};
use crate::envelope::Envelope;
use crate::error::EngineError;
use crate::paths::RepoPaths;
use crate::spec::model::Task;
use crate::spec::SpecStore;
use ls_storage::{AgentRow, EventRow, LeaseRow, MessageRow, SqliteStore};
use serde_json::{json, Value};

/// Lease TTL bounds. Requests outside the window are clamped, not rejected.
pub const TTL_MIN_SECS: i64 = 60;
pub const TTL_MAX_SECS: i64 = 2 * 60 * 60;
pub const TTL_DEFAULT_SECS: i64 = 15 * 60;

pub struct Coordinator {
    paths: RepoPaths,
    clock: Box<dyn Clock>,
    spec: SpecStore,
    store: SqliteStore,
    default_ttl_secs: i64,
}

impl Coordinator {
    /// Opens both planes and performs orphan-lease cleanup: any still-active
    /// lease whose agent row was removed out-of-band is expired, with a
    /// `lease.orphaned` event per lease.
    pub fn open(paths: RepoPaths, clock: Box<dyn Clock>) -> Result<Self, EngineError> {
        let spec = SpecStore::new(&paths);
        let mut store = SqliteStore::open(paths.lodestar_dir())?;
        let now_ms = clock.now_ms();
        store.leases_cleanup_orphaned(now_ms)?;
        Ok(Self {
            paths,
            clock,
            spec,
            store,
            default_ttl_secs: TTL_DEFAULT_SECS,
        })
    }

    /// Overrides the default claim TTL (e.g. from the environment). The
    /// value is clamped to the same window as per-request TTLs.
    pub fn with_default_ttl(mut self, ttl_secs: i64) -> Self {
        self.default_ttl_secs = ttl_secs.clamp(TTL_MIN_SECS, TTL_MAX_SECS);
        self
    }

    pub fn paths(&self) -> &RepoPaths {
        &self.paths
    }

    pub(crate) fn now_ms(&self) -> i64 {
        self.clock.now_ms()
    }

    pub(crate) fn clamp_ttl(&self, requested: Option<i64>) -> i64 {
        requested
            .unwrap_or(self.default_ttl_secs)
            .clamp(TTL_MIN_SECS, TTL_MAX_SECS)
    }

    pub(crate) fn require_agent(&self, agent_id: &str) -> Result<(), EngineError> {
        if agent_id.trim().is_empty() {
            return Err(EngineError::InvalidInput {
                field: "agent_id",
                reason: "must not be empty".to_string(),
            });
        }
        if !self.store.agent_exists(agent_id)? {
            return Err(EngineError::AgentNotRegistered {
                agent_id: agent_id.to_string(),
            });
        }
        Ok(())
    }
}

pub(crate) fn envelope_result(result: Result<Envelope, EngineError>) -> Envelope {
    match result {
        Ok(envelope) => envelope,
        Err(err) => Envelope::from_error(&err),
    }
}

pub(crate) fn task_json(task: &Task, lease: Option<&LeaseRow>, now_ms: i64) -> Value {
    let mut value = json!({
        "id": task.id.as_str(),
        "title": task.title,
        "description": task.description,
        "acceptance_criteria": task.acceptance_criteria,
        "status": task.status.as_str(),
        "priority": task.priority,
        "labels": task.labels,
        "depends_on": task.depends_on,
        "locks": task.locks,
        "created_at": ms_to_rfc3339(task.created_at_ms),
        "updated_at": ms_to_rfc3339(task.updated_at_ms),
        "claimed_by": Value::Null,
        "lease_expires_at": Value::Null,
    });
    if let Some(lease) = lease {
        if lease.is_active(now_ms) {
            value["claimed_by"] = json!(lease.agent_id);
            value["lease_expires_at"] = json!(ms_to_rfc3339(lease.expires_at_ms));
        }
    }
    if let Some(prd) = &task.prd {
        value["prd"] = json!({
            "source": prd.source,
            "refs": prd.refs.iter().map(|r| {
                json!({
                    "anchor": r.anchor,
                    "lines": r.lines.map(|(a, b)| vec![a, b]),
                })
            }).collect::<Vec<_>>(),
            "hash": prd.hash,
        });
    }
    value
}

pub(crate) fn agent_json(agent: &AgentRow) -> Value {
    let session_meta = agent
        .session_meta_json
        .as_deref()
        .and_then(|raw| serde_json::from_str::<Value>(raw).ok())
        .unwrap_or(Value::Null);
    json!({
        "agent_id": agent.agent_id,
        "display_name": agent.display_name,
        "role": agent.role,
        "capabilities": agent.capabilities,
        "registered_at": ms_to_rfc3339(agent.registered_at_ms),
        "last_seen_at": ms_to_rfc3339(agent.last_seen_at_ms),
        "session_meta": session_meta,
    })
}

pub(crate) fn lease_json(lease: &LeaseRow) -> Value {
    json!({
        "lease_id": lease.lease_id,
        "task_id": lease.task_id,
        "agent_id": lease.agent_id,
        "created_at": ms_to_rfc3339(lease.created_at_ms),
        "expires_at": ms_to_rfc3339(lease.expires_at_ms),
    })
}

pub(crate) fn message_json(message: &MessageRow) -> Value {
    json!({
        "message_id": message.message_id,
        "created_at": ms_to_rfc3339(message.created_at_ms),
        "from_agent_id": message.from_agent_id,
        "to_type": message.to_type.as_str(),
        "to_id": message.to_id,
        "task_id": message.task_id,
        "subject": message.subject,
        "body": message.body,
        "severity": message.severity,
        "read_at": message.read_at_ms.map(ms_to_rfc3339),
    })
}

pub(crate) fn event_json(event: &EventRow) -> Value {
    let payload = serde_json::from_str::<Value>(&event.payload_json)
        .unwrap_or(Value::Null);
    json!({
        "id": event.id,
        "created_at": ms_to_rfc3339(event.created_at_ms),
        "type": event.event_type,
        "actor_agent_id": event.actor_agent_id,
        "task_id": event.task_id,
        "target_agent_id": event.target_agent_id,
        "payload": payload,
    })
}
