#![forbid(unsafe_code)]

use super::{agent_json, envelope_result, event_json, lease_json, task_json, Coordinator};
use crate::clock::ms_to_rfc3339;
use crate::envelope::Envelope;
use crate::error::EngineError;
use crate::paths::RepoPaths;
use crate::spec::model::{Project, SpecDoc};
use crate::spec::SpecStore;
use ls_core::events::EventType;
use ls_core::model::TaskStatus;
use ls_storage::SqliteStore;
use serde_json::{json, Value};

/// Scaffolds `.lodestar/` in `root`: the spec, the runtime database, and the
/// lock sentinel. Refuses to overwrite an existing spec unless `force`.
pub fn init_repo(root: &std::path::Path, project_name: &str, force: bool) -> Envelope {
    envelope_result(try_init_repo(root, project_name, force))
}

fn try_init_repo(
    root: &std::path::Path,
    project_name: &str,
    force: bool,
) -> Result<Envelope, EngineError> {
    if project_name.trim().is_empty() {
        return Err(EngineError::InvalidInput {
            field: "project_name",
            reason: "must not be empty".to_string(),
        });
    }

    let paths = RepoPaths::at_root(root);
    std::fs::create_dir_all(paths.lodestar_dir()).map_err(|err| EngineError::RuntimeCorrupt {
        message: format!("cannot create {}: {err}", paths.lodestar_dir().display()),
    })?;

    let store = SpecStore::new(&paths);
    store.write_initial(&SpecDoc::new(Project::new(project_name.trim())), force)?;

    // Touching the runtime store creates the db file and its schema.
    let _ = SqliteStore::open(paths.lodestar_dir())?;

    Ok(Envelope::ok(json!({
        "root": paths.root().display().to_string(),
        "spec": paths.spec_path().display().to_string(),
        "runtime": paths.runtime_db_path().display().to_string(),
        "project": { "name": project_name.trim(), "default_branch": "main" },
    }))
    .next("register yourself", "lodestar agent join --name <display-name>")
    .next(
        "create the first task",
        "lodestar task create <task-id> --title <title>",
    ))
}

impl Coordinator {
    pub fn repo_status(&mut self) -> Envelope {
        envelope_result(self.try_repo_status())
    }

    fn try_repo_status(&mut self) -> Result<Envelope, EngineError> {
        let doc = self.spec.load()?;
        let now_ms = self.now_ms();
        let stats = self.store.stats(now_ms)?;
        let leases = self.store.leases_active(now_ms)?;

        let mut by_status = json!({
            "ready": 0, "done": 0, "verified": 0, "deleted": 0,
        });
        let mut claimable = 0usize;
        for task in &doc.tasks {
            let key = task.status.as_str();
            by_status[key] = json!(by_status[key].as_u64().unwrap_or(0) + 1);
            if crate::dag::is_claimable(task, &doc)
                && !leases.iter().any(|l| l.task_id == task.id.as_str())
            {
                claimable += 1;
            }
        }

        let mut envelope = Envelope::ok(json!({
            "project": {
                "name": doc.project.name,
                "default_branch": doc.project.default_branch,
            },
            "tasks": {
                "total": doc.tasks.len(),
                "by_status": by_status,
                "claimable": claimable,
            },
            "runtime": {
                "agents": stats.agents,
                "active_leases": stats.active_leases,
                "messages": stats.messages,
                "last_event_id": stats.last_event_id,
            },
        }));
        if claimable > 0 {
            envelope = envelope.next("see claimable work", "lodestar task next");
        }
        Ok(envelope)
    }

    pub fn events_pull(
        &mut self,
        since: i64,
        limit: Option<usize>,
        types: Vec<String>,
    ) -> Envelope {
        envelope_result(self.try_events_pull(since, limit, types))
    }

    fn try_events_pull(
        &mut self,
        since: i64,
        limit: Option<usize>,
        types: Vec<String>,
    ) -> Result<Envelope, EngineError> {
        if since < 0 {
            return Err(EngineError::InvalidInput {
                field: "since",
                reason: "cursor must be >= 0".to_string(),
            });
        }
        let mut parsed = Vec::with_capacity(types.len());
        for raw in &types {
            let event_type =
                EventType::parse(raw).ok_or_else(|| EngineError::InvalidInput {
                    field: "types",
                    reason: format!("unknown event type {raw:?}"),
                })?;
            parsed.push(event_type);
        }

        let slice = self
            .store
            .events_pull(since, limit.unwrap_or(ls_storage::EVENT_PULL_LIMIT_MAX), &parsed)?;
        Ok(Envelope::ok(json!({
            "events": slice.events.iter().map(event_json).collect::<Vec<_>>(),
            "count": slice.events.len(),
            "next_cursor": slice.next_cursor,
        })))
    }

    /// The whole system in one JSON document, for backups and debugging.
    pub fn export_snapshot(&mut self) -> Envelope {
        envelope_result(self.try_export_snapshot())
    }

    fn try_export_snapshot(&mut self) -> Result<Envelope, EngineError> {
        let doc = self.spec.load()?;
        let now_ms = self.now_ms();
        let agents = self.store.agents_list()?;
        let leases = self.store.leases_active(now_ms)?;
        let stats = self.store.stats(now_ms)?;

        let tasks: Vec<Value> = doc
            .tasks
            .iter()
            .map(|task| {
                let lease = leases.iter().find(|l| l.task_id == task.id.as_str());
                task_json(task, lease, now_ms)
            })
            .collect();

        Ok(Envelope::ok(json!({
            "exported_at": ms_to_rfc3339(now_ms),
            "project": {
                "name": doc.project.name,
                "default_branch": doc.project.default_branch,
            },
            "tasks": tasks,
            "agents": agents.iter().map(agent_json).collect::<Vec<_>>(),
            "active_leases": leases.iter().map(lease_json).collect::<Vec<_>>(),
            "stats": {
                "agents": stats.agents,
                "active_leases": stats.active_leases,
                "messages": stats.messages,
                "last_event_id": stats.last_event_id,
            },
        })))
    }

    pub fn health_check(&mut self) -> Envelope {
        let now_ms = self.now_ms();
        let mut checks = Vec::new();
        let mut first_failure: Option<EngineError> = None;

        match self.spec.load() {
            Ok(doc) => {
                let live = doc
                    .tasks
                    .iter()
                    .filter(|t| t.status != TaskStatus::Deleted)
                    .count();
                checks.push(
                    json!({ "name": "spec", "ok": true, "detail": format!("{live} live tasks") }),
                );
            }
            Err(err) => {
                checks.push(
                    json!({ "name": "spec", "ok": false, "detail": err.to_string(), "code": err.code() }),
                );
                first_failure = Some(err);
            }
        }

        match self.store.schema_version() {
            Ok(Some(version)) => checks.push(
                json!({ "name": "runtime", "ok": true, "detail": format!("schema {version}") }),
            ),
            Ok(None) => {
                checks.push(
                    json!({ "name": "runtime", "ok": false, "detail": "schema version missing" }),
                );
                first_failure.get_or_insert(EngineError::RuntimeCorrupt {
                    message: "runtime schema version missing".to_string(),
                });
            }
            Err(err) => {
                checks.push(json!({ "name": "runtime", "ok": false, "detail": err.to_string() }));
                first_failure.get_or_insert(err.into());
            }
        }

        let data = json!({
            "checks": checks,
            "checked_at": ms_to_rfc3339(now_ms),
        });
        match first_failure {
            None => Envelope::ok(data),
            Some(err) => {
                let mut envelope = Envelope::from_error(&err);
                envelope.data = data;
                envelope
            }
        }
    }
}
