#![forbid(unsafe_code)]

use super::{envelope_result, lease_json, task_json, Coordinator};
use crate::clock::ms_to_rfc3339;
use crate::dag;
use crate::envelope::Envelope;
use crate::error::{EngineError, InvariantKind};
use crate::prd;
use crate::scheduler;
use crate::spec::model::{PrdBinding, PrdRef, SpecDoc, Task, TITLE_MAX_CHARS};
use ls_core::events::EventType;
use ls_core::ids::TaskId;
use ls_core::model::TaskStatus;
use ls_storage::{ClaimOutcome, LeaseOpOutcome, LeaseRow, NewEvent};
use serde_json::{json, Value};

pub const DEFAULT_NEXT_LIMIT: usize = 5;
pub const DEFAULT_CONTEXT_BUDGET_CHARS: usize = 16_000;
const LIST_LIMIT_DEFAULT: usize = 50;
const LIST_LIMIT_MAX: usize = 200;

#[derive(Clone, Debug)]
pub struct PrdRefInput {
    pub anchor: String,
    pub lines: Option<(u64, u64)>,
}

#[derive(Clone, Debug, Default)]
pub struct TaskCreateRequest {
    pub task_id: String,
    pub title: String,
    pub description: String,
    pub acceptance_criteria: String,
    pub priority: Option<i64>,
    pub labels: Vec<String>,
    pub depends_on: Vec<String>,
    pub locks: Vec<String>,
    pub prd_source: Option<String>,
    pub prd_refs: Vec<PrdRefInput>,
}

#[derive(Clone, Debug, Default)]
pub struct TaskUpdateRequest {
    pub task_id: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub acceptance_criteria: Option<String>,
    pub priority: Option<i64>,
    pub labels: Option<Vec<String>>,
    pub depends_on: Option<Vec<String>>,
    pub locks: Option<Vec<String>>,
}

#[derive(Clone, Debug)]
pub struct ClaimRequest {
    pub task_id: String,
    pub agent_id: String,
    pub ttl_secs: Option<i64>,
    pub force: bool,
}

fn validate_title(title: &str) -> Result<(), EngineError> {
    if title.trim().is_empty() {
        return Err(EngineError::InvalidInput {
            field: "title",
            reason: "must not be empty".to_string(),
        });
    }
    if title.chars().count() > TITLE_MAX_CHARS {
        return Err(EngineError::InvalidInput {
            field: "title",
            reason: format!("must be at most {TITLE_MAX_CHARS} characters"),
        });
    }
    Ok(())
}

fn parse_task_id(raw: &str) -> Result<TaskId, EngineError> {
    TaskId::try_new(raw).map_err(|err| EngineError::InvalidInput {
        field: "task_id",
        reason: err.to_string(),
    })
}

/// Literal prefix of a glob, up to the first metacharacter. Two lock globs
/// are treated as overlapping when either literal prefix contains the other
/// — deliberately coarse, since the result is only a warning.
fn glob_literal_prefix(pattern: &str) -> &str {
    let end = pattern
        .find(|c| matches!(c, '*' | '?' | '['))
        .unwrap_or(pattern.len());
    &pattern[..end]
}

fn locks_overlap(a: &str, b: &str) -> bool {
    let pa = glob_literal_prefix(a);
    let pb = glob_literal_prefix(b);
    pa.starts_with(pb) || pb.starts_with(pa)
}

impl Coordinator {
    pub fn task_list(
        &mut self,
        status: Option<String>,
        label: Option<String>,
        limit: Option<usize>,
        cursor: Option<String>,
    ) -> Envelope {
        envelope_result(self.try_task_list(status, label, limit, cursor))
    }

    fn try_task_list(
        &mut self,
        status: Option<String>,
        label: Option<String>,
        limit: Option<usize>,
        cursor: Option<String>,
    ) -> Result<Envelope, EngineError> {
        let limit = limit.unwrap_or(LIST_LIMIT_DEFAULT).clamp(1, LIST_LIMIT_MAX);

        // "all" means every live task; "deleted" shows tombstones; absent
        // means live tasks too.
        let mut include_deleted = false;
        let mut status_filter: Option<TaskStatus> = None;
        if let Some(raw) = status.as_deref() {
            match raw {
                "all" => {}
                other => match TaskStatus::parse(other) {
                    Some(TaskStatus::Deleted) => {
                        include_deleted = true;
                        status_filter = Some(TaskStatus::Deleted);
                    }
                    Some(parsed) => status_filter = Some(parsed),
                    None => {
                        return Err(EngineError::InvalidInput {
                            field: "status",
                            reason: format!(
                                "unknown status {other:?}; use ready|done|verified|deleted|all"
                            ),
                        })
                    }
                },
            }
        }

        let doc = self.spec.load()?;
        let now_ms = self.now_ms();
        let leases = self.store.leases_active(now_ms)?;

        let mut tasks: Vec<&Task> = doc
            .tasks
            .iter()
            .filter(|t| match status_filter {
                Some(wanted) => t.status == wanted,
                None => include_deleted || t.status != TaskStatus::Deleted,
            })
            .filter(|t| match label.as_deref() {
                Some(label) => t.labels.iter().any(|l| l == label),
                None => true,
            })
            .filter(|t| match cursor.as_deref() {
                Some(cursor) => t.id.as_str() > cursor,
                None => true,
            })
            .collect();
        tasks.sort_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then(a.id.as_str().cmp(b.id.as_str()))
        });

        let has_more = tasks.len() > limit;
        tasks.truncate(limit);
        let next_cursor = if has_more {
            tasks.last().map(|t| t.id.as_str().to_string())
        } else {
            None
        };

        let entries: Vec<Value> = tasks
            .iter()
            .map(|task| {
                let lease = leases.iter().find(|l| l.task_id == task.id.as_str());
                task_json(task, lease, now_ms)
            })
            .collect();

        Ok(Envelope::ok(json!({
            "tasks": entries,
            "count": entries.len(),
            "total": doc.tasks.len(),
            "next_cursor": next_cursor,
        })))
    }

    pub fn task_get(&mut self, task_id: &str) -> Envelope {
        envelope_result(self.try_task_get(task_id))
    }

    fn try_task_get(&mut self, task_id: &str) -> Result<Envelope, EngineError> {
        let task_id = parse_task_id(task_id)?;
        let doc = self.spec.load()?;
        let task = doc
            .get_task(task_id.as_str())
            .ok_or_else(|| EngineError::TaskNotFound {
                task_id: task_id.as_str().to_string(),
            })?;

        let now_ms = self.now_ms();
        let lease = self.store.lease_active(task_id.as_str(), now_ms)?;
        let dependents: Vec<&str> = dag::dependents_of(&doc, task_id.as_str())
            .iter()
            .map(|t| t.id.as_str())
            .collect();
        let claimable = dag::is_claimable(task, &doc) && lease.is_none();
        let unmet = dag::unmet_deps(task, &doc);

        let mut envelope = Envelope::ok(json!({
            "task": task_json(task, lease.as_ref(), now_ms),
            "dependents": dependents,
            "claimable": claimable,
            "unmet_dependencies": unmet,
        }));
        if claimable {
            envelope = envelope.next(
                "claim this task",
                format!("lodestar task claim {} --agent <agent-id>", task_id),
            );
        }
        Ok(envelope)
    }

    pub fn task_next(&mut self, limit: Option<usize>, agent_id: Option<String>) -> Envelope {
        envelope_result(self.try_task_next(limit, agent_id))
    }

    fn try_task_next(
        &mut self,
        limit: Option<usize>,
        agent_id: Option<String>,
    ) -> Result<Envelope, EngineError> {
        let doc = self.spec.load()?;
        let now_ms = self.now_ms();
        let leases = self.store.leases_active(now_ms)?;
        let picks = scheduler::next(
            &doc,
            &leases,
            limit.unwrap_or(DEFAULT_NEXT_LIMIT),
            agent_id.as_deref(),
        );

        let entries: Vec<Value> = picks
            .iter()
            .map(|c| {
                json!({
                    "task_id": c.task_id,
                    "title": c.title,
                    "priority": c.priority,
                    "labels": c.labels,
                    "rationale": c.rationale,
                })
            })
            .collect();

        let mut envelope = Envelope::ok(json!({
            "tasks": entries,
            "count": picks.len(),
        }));
        if let Some(first) = picks.first() {
            let agent = agent_id.as_deref().unwrap_or("<agent-id>");
            envelope = envelope.next(
                "claim the top pick",
                format!("lodestar task claim {} --agent {agent}", first.task_id),
            );
        }
        Ok(envelope)
    }

    pub fn task_create(&mut self, request: TaskCreateRequest) -> Envelope {
        envelope_result(self.try_task_create(request))
    }

    fn try_task_create(&mut self, request: TaskCreateRequest) -> Result<Envelope, EngineError> {
        let task_id = parse_task_id(&request.task_id)?;
        validate_title(&request.title)?;

        let mut warnings = Vec::new();
        let prd = match &request.prd_source {
            Some(source) => Some(self.freeze_prd(source, &request.prd_refs, &mut warnings)?),
            None => {
                if !request.prd_refs.is_empty() {
                    return Err(EngineError::InvalidInput {
                        field: "prd_refs",
                        reason: "prd_refs require prd_source".to_string(),
                    });
                }
                None
            }
        };

        let now_ms = self.now_ms();
        let task = Task {
            id: task_id.clone(),
            title: request.title,
            description: request.description,
            acceptance_criteria: request.acceptance_criteria,
            status: TaskStatus::Ready,
            priority: request.priority.unwrap_or(100),
            labels: request.labels,
            depends_on: request.depends_on,
            locks: request.locks,
            created_at_ms: now_ms,
            updated_at_ms: now_ms,
            prd,
            extra: serde_yaml::Mapping::new(),
        };

        let created = self.spec.mutate(|doc| {
            if doc.contains(task_id.as_str()) {
                return Err(EngineError::SpecInvariant {
                    kind: InvariantKind::DuplicateId,
                    detail: format!("task {task_id} already exists"),
                });
            }
            doc.tasks.push(task.clone());
            Ok(task.clone())
        })?;

        Ok(
            Envelope::ok(json!({ "task": task_json(&created, None, now_ms) }))
                .warn_all(warnings)
                .next(
                    "inspect the task",
                    format!("lodestar task get {task_id}"),
                ),
        )
    }

    fn freeze_prd(
        &self,
        source: &str,
        refs: &[PrdRefInput],
        warnings: &mut Vec<String>,
    ) -> Result<PrdBinding, EngineError> {
        let path = self.paths.root().join(source);
        let text = std::fs::read_to_string(&path).map_err(|err| EngineError::InvalidInput {
            field: "prd_source",
            reason: format!("cannot read {}: {err}", path.display()),
        })?;

        let refs: Vec<PrdRef> = refs
            .iter()
            .map(|r| PrdRef {
                anchor: r.anchor.clone(),
                lines: r.lines,
            })
            .collect();

        let sections = prd::extract_sections(&text, &refs);
        let mut excerpt = String::new();
        for section in &sections {
            match &section.text {
                Some(text) => {
                    if !excerpt.is_empty() {
                        excerpt.push_str("\n\n");
                    }
                    excerpt.push_str(text);
                }
                None => warnings.push(format!(
                    "prd ref {} did not resolve in {source}",
                    section.anchor
                )),
            }
        }

        Ok(PrdBinding {
            source: source.to_string(),
            refs,
            excerpt,
            hash: prd::hash_source(text.as_bytes()),
        })
    }

    pub fn task_update(&mut self, request: TaskUpdateRequest) -> Envelope {
        envelope_result(self.try_task_update(request))
    }

    fn try_task_update(&mut self, request: TaskUpdateRequest) -> Result<Envelope, EngineError> {
        let task_id = parse_task_id(&request.task_id)?;
        if let Some(title) = &request.title {
            validate_title(title)?;
        }
        if request.title.is_none()
            && request.description.is_none()
            && request.acceptance_criteria.is_none()
            && request.priority.is_none()
            && request.labels.is_none()
            && request.depends_on.is_none()
            && request.locks.is_none()
        {
            return Err(EngineError::InvalidInput {
                field: "fields",
                reason: "no fields to update".to_string(),
            });
        }

        let now_ms = self.now_ms();
        let updated = self.spec.mutate(|doc| {
            let task =
                doc.get_task_mut(task_id.as_str())
                    .ok_or_else(|| EngineError::TaskNotFound {
                        task_id: task_id.as_str().to_string(),
                    })?;
            if task.status == TaskStatus::Deleted {
                return Err(EngineError::TaskStateConflict {
                    task_id: task_id.as_str().to_string(),
                    status: task.status,
                    expected: "a live task",
                });
            }
            if let Some(title) = request.title.clone() {
                task.title = title;
            }
            if let Some(description) = request.description.clone() {
                task.description = description;
            }
            if let Some(criteria) = request.acceptance_criteria.clone() {
                task.acceptance_criteria = criteria;
            }
            if let Some(priority) = request.priority {
                task.priority = priority;
            }
            if let Some(labels) = request.labels.clone() {
                task.labels = labels;
            }
            if let Some(depends_on) = request.depends_on.clone() {
                task.depends_on = depends_on;
            }
            if let Some(locks) = request.locks.clone() {
                task.locks = locks;
            }
            task.updated_at_ms = now_ms;
            Ok(task.clone())
        })?;

        Ok(Envelope::ok(json!({ "task": task_json(&updated, None, now_ms) })))
    }

    pub fn task_delete(
        &mut self,
        task_id: &str,
        agent_id: Option<String>,
        cascade: bool,
    ) -> Envelope {
        envelope_result(self.try_task_delete(task_id, agent_id, cascade))
    }

    fn try_task_delete(
        &mut self,
        task_id: &str,
        agent_id: Option<String>,
        cascade: bool,
    ) -> Result<Envelope, EngineError> {
        let task_id = parse_task_id(task_id)?;
        if let Some(agent_id) = agent_id.as_deref() {
            self.require_agent(agent_id)?;
        }

        let now_ms = self.now_ms();
        let deleted_ids = self.spec.mutate(|doc| {
            let task = doc
                .get_task(task_id.as_str())
                .ok_or_else(|| EngineError::TaskNotFound {
                    task_id: task_id.as_str().to_string(),
                })?;
            if task.status == TaskStatus::Deleted {
                return Ok(Vec::new());
            }

            let dependents = dag::dependent_closure(doc, task_id.as_str());
            if !dependents.is_empty() && !cascade {
                return Err(EngineError::SpecInvariant {
                    kind: InvariantKind::MissingDep,
                    detail: format!(
                        "task {task_id} has dependents [{}]; delete them first or pass cascade",
                        dependents.join(", ")
                    ),
                });
            }

            let mut ids = vec![task_id.as_str().to_string()];
            ids.extend(dependents);
            for id in &ids {
                if let Some(task) = doc.get_task_mut(id) {
                    task.status = TaskStatus::Deleted;
                    task.updated_at_ms = now_ms;
                }
            }
            Ok(ids)
        })?;

        if deleted_ids.is_empty() {
            return Ok(Envelope::ok(json!({
                "deleted_task_ids": deleted_ids,
            }))
            .warn(format!("task {task_id} was already deleted")));
        }

        // Spec is the idempotent fact and is already rewritten; now expire
        // leases and append events in one runtime transaction.
        self.store
            .tasks_deleted(&deleted_ids, agent_id.as_deref(), cascade, now_ms)?;

        Ok(Envelope::ok(json!({
            "deleted_task_ids": deleted_ids,
        })))
    }

    pub fn task_claim(&mut self, request: ClaimRequest) -> Envelope {
        envelope_result(self.try_task_claim(request))
    }

    fn try_task_claim(&mut self, request: ClaimRequest) -> Result<Envelope, EngineError> {
        let task_id = parse_task_id(&request.task_id)?;
        self.require_agent(&request.agent_id)?;
        let ttl_secs = self.clamp_ttl(request.ttl_secs);

        let doc = self.spec.load()?;
        let task = doc
            .get_task(task_id.as_str())
            .ok_or_else(|| EngineError::TaskNotFound {
                task_id: task_id.as_str().to_string(),
            })?;
        if !dag::is_claimable(task, &doc) {
            return Err(EngineError::TaskNotClaimable {
                task_id: task_id.as_str().to_string(),
                status: task.status,
                unmet_deps: dag::unmet_deps(task, &doc),
            });
        }

        let now_ms = self.now_ms();
        let warnings = self.lock_conflict_warnings(&doc, task, now_ms)?;

        match self
            .store
            .lease_claim(task_id.as_str(), &request.agent_id, ttl_secs, now_ms)?
        {
            ClaimOutcome::Created(lease) => {
                let agent_id = &request.agent_id;
                Ok(Envelope::ok(json!({
                    "lease": lease_json(&lease),
                    "ttl_seconds": ttl_secs,
                }))
                .warn_all(warnings)
                .next(
                    "extend the lease while working",
                    format!("lodestar task renew {task_id} --agent {agent_id}"),
                )
                .next(
                    "finish in one step when done and verified",
                    format!("lodestar task complete {task_id} --agent {agent_id}"),
                ))
            }
            // `force` is only meaningful against an expired lease, and an
            // expired lease never reaches this arm; an active holder wins
            // regardless of the flag.
            ClaimOutcome::Held(holder) => Err(EngineError::TaskAlreadyClaimed {
                task_id: task_id.as_str().to_string(),
                holder_agent_id: holder.agent_id.clone(),
                lease_id: holder.lease_id.clone(),
                expires_at_ms: holder.expires_at_ms,
            }),
        }
    }

    /// Advisory overlap check between this task's lock globs and the lock
    /// globs of every actively-leased task.
    fn lock_conflict_warnings(
        &self,
        doc: &SpecDoc,
        task: &Task,
        now_ms: i64,
    ) -> Result<Vec<String>, EngineError> {
        if task.locks.is_empty() {
            return Ok(Vec::new());
        }
        let mut warnings = Vec::new();
        for lease in self.store.leases_active(now_ms)? {
            if lease.task_id == task.id.as_str() {
                continue;
            }
            let Some(held) = doc.get_task(&lease.task_id) else {
                continue;
            };
            for ours in &task.locks {
                for theirs in &held.locks {
                    if locks_overlap(ours, theirs) {
                        warnings.push(format!(
                            "lock {ours} overlaps {theirs} held by task {} (agent {})",
                            lease.task_id, lease.agent_id
                        ));
                    }
                }
            }
        }
        Ok(warnings)
    }

    pub fn task_renew(
        &mut self,
        task_id: &str,
        agent_id: &str,
        ttl_secs: Option<i64>,
    ) -> Envelope {
        envelope_result(self.try_task_renew(task_id, agent_id, ttl_secs))
    }

    fn try_task_renew(
        &mut self,
        task_id: &str,
        agent_id: &str,
        ttl_secs: Option<i64>,
    ) -> Result<Envelope, EngineError> {
        let task_id = parse_task_id(task_id)?;
        self.require_agent(agent_id)?;
        let ttl_secs = self.clamp_ttl(ttl_secs);
        let now_ms = self.now_ms();

        match self
            .store
            .lease_renew(task_id.as_str(), agent_id, ttl_secs, now_ms)?
        {
            LeaseOpOutcome::Applied(lease) => Ok(Envelope::ok(json!({
                "lease": lease_json(&lease),
                "ttl_seconds": ttl_secs,
            }))),
            LeaseOpOutcome::NotHeld { holder } => Err(EngineError::TaskLeaseNotHeld {
                task_id: task_id.as_str().to_string(),
                holder_agent_id: holder.map(|l| l.agent_id),
            }),
        }
    }

    pub fn task_release(
        &mut self,
        task_id: &str,
        agent_id: &str,
        reason: Option<String>,
    ) -> Envelope {
        envelope_result(self.try_task_release(task_id, agent_id, reason))
    }

    fn try_task_release(
        &mut self,
        task_id: &str,
        agent_id: &str,
        reason: Option<String>,
    ) -> Result<Envelope, EngineError> {
        let task_id = parse_task_id(task_id)?;
        self.require_agent(agent_id)?;
        let now_ms = self.now_ms();

        match self
            .store
            .lease_release(task_id.as_str(), agent_id, reason.as_deref(), now_ms)?
        {
            LeaseOpOutcome::Applied(lease) => Ok(Envelope::ok(json!({
                "released_lease": lease_json(&lease),
                "reason": reason,
            }))),
            LeaseOpOutcome::NotHeld { holder } => Err(EngineError::TaskLeaseNotHeld {
                task_id: task_id.as_str().to_string(),
                holder_agent_id: holder.map(|l| l.agent_id),
            }),
        }
    }

    fn require_lease_holder(
        &self,
        task_id: &str,
        agent_id: &str,
        now_ms: i64,
    ) -> Result<LeaseRow, EngineError> {
        let lease = self.store.lease_active(task_id, now_ms)?;
        match lease {
            Some(lease) if lease.agent_id == agent_id => Ok(lease),
            Some(lease) => Err(EngineError::TaskLeaseNotHeld {
                task_id: task_id.to_string(),
                holder_agent_id: Some(lease.agent_id),
            }),
            None => Err(EngineError::TaskLeaseNotHeld {
                task_id: task_id.to_string(),
                holder_agent_id: None,
            }),
        }
    }

    pub fn task_done(&mut self, task_id: &str, agent_id: &str, note: Option<String>) -> Envelope {
        envelope_result(self.try_task_done(task_id, agent_id, note))
    }

    fn try_task_done(
        &mut self,
        task_id: &str,
        agent_id: &str,
        note: Option<String>,
    ) -> Result<Envelope, EngineError> {
        let task_id = parse_task_id(task_id)?;
        self.require_agent(agent_id)?;
        let now_ms = self.now_ms();

        // Status first so a finished or missing task answers precisely; the
        // lease requirement only guards the ready -> done transition.
        let doc = self.spec.load()?;
        let task = doc
            .get_task(task_id.as_str())
            .ok_or_else(|| EngineError::TaskNotFound {
                task_id: task_id.as_str().to_string(),
            })?;
        match task.status {
            TaskStatus::Ready | TaskStatus::Done => {}
            status => {
                return Err(EngineError::TaskStateConflict {
                    task_id: task_id.as_str().to_string(),
                    status,
                    expected: "ready",
                })
            }
        }
        if task.status == TaskStatus::Ready {
            self.require_lease_holder(task_id.as_str(), agent_id, now_ms)?;
        }

        enum Outcome {
            Marked,
            AlreadyDone,
        }

        let outcome = self.spec.mutate(|doc| {
            let task =
                doc.get_task_mut(task_id.as_str())
                    .ok_or_else(|| EngineError::TaskNotFound {
                        task_id: task_id.as_str().to_string(),
                    })?;
            match task.status {
                TaskStatus::Ready => {
                    task.status = TaskStatus::Done;
                    task.updated_at_ms = now_ms;
                    Ok(Outcome::Marked)
                }
                TaskStatus::Done => Ok(Outcome::AlreadyDone),
                status => Err(EngineError::TaskStateConflict {
                    task_id: task_id.as_str().to_string(),
                    status,
                    expected: "ready",
                }),
            }
        })?;

        match outcome {
            Outcome::Marked => {
                let mut payload = json!({});
                if let Some(note) = &note {
                    payload["note"] = json!(note);
                }
                self.store.task_transition(
                    task_id.as_str(),
                    true,
                    vec![NewEvent::new(EventType::TaskDone)
                        .actor(agent_id.to_string())
                        .task(task_id.as_str().to_string())
                        .payload(payload)],
                    now_ms,
                )?;
                Ok(Envelope::ok(json!({
                    "task_id": task_id.as_str(),
                    "status": "done",
                }))
                .next(
                    "verify to unblock dependents",
                    format!("lodestar task verify {task_id} --agent {agent_id}"),
                ))
            }
            Outcome::AlreadyDone => Ok(Envelope::ok(json!({
                "task_id": task_id.as_str(),
                "status": "done",
            }))
            .warn(format!("task {task_id} was already done"))),
        }
    }

    pub fn task_verify(&mut self, task_id: &str, agent_id: &str, note: Option<String>) -> Envelope {
        envelope_result(self.try_task_verify(task_id, agent_id, note))
    }

    fn try_task_verify(
        &mut self,
        task_id: &str,
        agent_id: &str,
        note: Option<String>,
    ) -> Result<Envelope, EngineError> {
        let task_id = parse_task_id(task_id)?;
        self.require_agent(agent_id)?;
        let now_ms = self.now_ms();

        enum Outcome {
            Verified { newly_ready: Vec<String> },
            AlreadyVerified,
        }

        let outcome = self.spec.mutate(|doc| {
            let task =
                doc.get_task_mut(task_id.as_str())
                    .ok_or_else(|| EngineError::TaskNotFound {
                        task_id: task_id.as_str().to_string(),
                    })?;
            match task.status {
                TaskStatus::Done => {
                    task.status = TaskStatus::Verified;
                    task.updated_at_ms = now_ms;
                    let newly_ready = newly_ready_ids(doc, task_id.as_str());
                    Ok(Outcome::Verified { newly_ready })
                }
                TaskStatus::Verified => Ok(Outcome::AlreadyVerified),
                status => Err(EngineError::TaskStateConflict {
                    task_id: task_id.as_str().to_string(),
                    status,
                    expected: "done",
                }),
            }
        })?;

        match outcome {
            Outcome::Verified { newly_ready } => {
                let mut payload = json!({ "newly_ready_task_ids": newly_ready });
                if let Some(note) = &note {
                    payload["note"] = json!(note);
                }
                self.store.task_transition(
                    task_id.as_str(),
                    true,
                    vec![NewEvent::new(EventType::TaskVerified)
                        .actor(agent_id.to_string())
                        .task(task_id.as_str().to_string())
                        .payload(payload)],
                    now_ms,
                )?;
                let mut envelope = Envelope::ok(json!({
                    "task_id": task_id.as_str(),
                    "status": "verified",
                    "newly_ready_task_ids": newly_ready,
                }));
                if let Some(first) = newly_ready.first() {
                    envelope = envelope.next(
                        "a dependent just became claimable",
                        format!("lodestar task get {first}"),
                    );
                }
                Ok(envelope)
            }
            Outcome::AlreadyVerified => Ok(Envelope::ok(json!({
                "task_id": task_id.as_str(),
                "status": "verified",
                "newly_ready_task_ids": [],
            }))
            .warn(format!("task {task_id} was already verified"))),
        }
    }

    pub fn task_complete(
        &mut self,
        task_id: &str,
        agent_id: &str,
        note: Option<String>,
    ) -> Envelope {
        envelope_result(self.try_task_complete(task_id, agent_id, note))
    }

    /// `done` + `verify` as one spec write, so a crash between the two steps
    /// can never strand the task in `done`.
    fn try_task_complete(
        &mut self,
        task_id: &str,
        agent_id: &str,
        note: Option<String>,
    ) -> Result<Envelope, EngineError> {
        let task_id = parse_task_id(task_id)?;
        self.require_agent(agent_id)?;
        let now_ms = self.now_ms();

        let doc = self.spec.load()?;
        let task = doc
            .get_task(task_id.as_str())
            .ok_or_else(|| EngineError::TaskNotFound {
                task_id: task_id.as_str().to_string(),
            })?;
        if task.status != TaskStatus::Ready {
            return Err(EngineError::TaskStateConflict {
                task_id: task_id.as_str().to_string(),
                status: task.status,
                expected: "ready",
            });
        }
        self.require_lease_holder(task_id.as_str(), agent_id, now_ms)?;

        let newly_ready = self.spec.mutate(|doc| {
            let task =
                doc.get_task_mut(task_id.as_str())
                    .ok_or_else(|| EngineError::TaskNotFound {
                        task_id: task_id.as_str().to_string(),
                    })?;
            match task.status {
                TaskStatus::Ready => {
                    task.status = TaskStatus::Verified;
                    task.updated_at_ms = now_ms;
                    Ok(newly_ready_ids(doc, task_id.as_str()))
                }
                status => Err(EngineError::TaskStateConflict {
                    task_id: task_id.as_str().to_string(),
                    status,
                    expected: "ready",
                }),
            }
        })?;

        // Both events land in one transaction: pullers still observe done
        // before verified.
        let mut done_payload = json!({ "via": "complete" });
        if let Some(note) = &note {
            done_payload["note"] = json!(note);
        }
        self.store.task_transition(
            task_id.as_str(),
            true,
            vec![
                NewEvent::new(EventType::TaskDone)
                    .actor(agent_id.to_string())
                    .task(task_id.as_str().to_string())
                    .payload(done_payload),
                NewEvent::new(EventType::TaskVerified)
                    .actor(agent_id.to_string())
                    .task(task_id.as_str().to_string())
                    .payload(json!({
                        "via": "complete",
                        "newly_ready_task_ids": newly_ready,
                    })),
            ],
            now_ms,
        )?;

        Ok(Envelope::ok(json!({
            "task_id": task_id.as_str(),
            "status": "verified",
            "newly_ready_task_ids": newly_ready,
        })))
    }

    pub fn task_context(&mut self, task_id: &str, budget_chars: Option<usize>) -> Envelope {
        envelope_result(self.try_task_context(task_id, budget_chars))
    }

    fn try_task_context(
        &mut self,
        task_id: &str,
        budget_chars: Option<usize>,
    ) -> Result<Envelope, EngineError> {
        let task_id = parse_task_id(task_id)?;
        let doc = self.spec.load()?;
        let task = doc
            .get_task(task_id.as_str())
            .ok_or_else(|| EngineError::TaskNotFound {
                task_id: task_id.as_str().to_string(),
            })?;
        let now_ms = self.now_ms();
        let lease = self.store.lease_active(task_id.as_str(), now_ms)?;
        let budget = budget_chars.unwrap_or(DEFAULT_CONTEXT_BUDGET_CHARS);

        let Some(binding) = &task.prd else {
            return Ok(Envelope::ok(json!({
                "task": task_json(task, lease.as_ref(), now_ms),
                "prd": Value::Null,
            }))
            .warn(format!("task {task_id} has no prd binding")));
        };

        let source_path = self.paths.root().join(&binding.source);
        let (prd_value, warnings) = match std::fs::read_to_string(&source_path) {
            Ok(source) => {
                let delivery = prd::deliver(binding, &source, budget);
                let sections: Vec<Value> = delivery
                    .sections
                    .iter()
                    .map(|s| {
                        json!({
                            "anchor": s.anchor,
                            "lines": s.lines.map(|(a, b)| vec![a, b]),
                            "resolved": s.text.is_some(),
                            "text": s.text,
                        })
                    })
                    .collect();
                let value = json!({
                    "source": binding.source,
                    "excerpt": delivery.excerpt,
                    "sections": sections,
                    "body": delivery.body,
                    "truncated": delivery.truncated,
                    "drift": {
                        "changed": delivery.drift.changed,
                        "current_hash": delivery.drift.current_hash,
                        "frozen_hash": binding.hash,
                        "missing_anchors": delivery.drift.missing_anchors,
                        "out_of_range": delivery.drift.out_of_range,
                    },
                });
                (value, delivery.warnings)
            }
            Err(err) => {
                // The frozen excerpt still serves; the live document is gone.
                let value = json!({
                    "source": binding.source,
                    "excerpt": binding.excerpt,
                    "sections": [],
                    "body": "",
                    "truncated": false,
                    "drift": {
                        "changed": true,
                        "current_hash": Value::Null,
                        "frozen_hash": binding.hash,
                        "missing_anchors": [],
                        "out_of_range": [],
                    },
                });
                (
                    value,
                    vec![format!(
                        "cannot read prd source {}: {err}",
                        source_path.display()
                    )],
                )
            }
        };

        Ok(Envelope::ok(json!({
            "task": task_json(task, lease.as_ref(), now_ms),
            "prd": prd_value,
        }))
        .warn_all(warnings))
    }

    pub fn task_graph(&mut self) -> Envelope {
        envelope_result(self.try_task_graph())
    }

    fn try_task_graph(&mut self) -> Result<Envelope, EngineError> {
        let doc = self.spec.load()?;
        let now_ms = self.now_ms();
        let leases = self.store.leases_active(now_ms)?;

        let nodes: Vec<Value> = doc
            .tasks
            .iter()
            .filter(|t| t.status != TaskStatus::Deleted)
            .map(|t| {
                let lease = leases.iter().find(|l| l.task_id == t.id.as_str());
                json!({
                    "id": t.id.as_str(),
                    "title": t.title,
                    "status": t.status.as_str(),
                    "priority": t.priority,
                    "claimed_by": lease.map(|l| l.agent_id.as_str()),
                })
            })
            .collect();
        let mut edges = Vec::new();
        for task in &doc.tasks {
            if task.status == TaskStatus::Deleted {
                continue;
            }
            for dep in &task.depends_on {
                edges.push(json!({ "from": dep, "to": task.id.as_str() }));
            }
        }

        Ok(Envelope::ok(json!({
            "nodes": nodes,
            "edges": edges,
            "order": dag::topo_order(&doc),
            "generated_at": ms_to_rfc3339(now_ms),
        })))
    }
}

/// Dependents of `task_id` that became claimable with the status change
/// already applied to `doc`. Advisory: derived on read, never stored.
fn newly_ready_ids(doc: &SpecDoc, task_id: &str) -> Vec<String> {
    dag::dependents_of(doc, task_id)
        .into_iter()
        .filter(|t| dag::is_claimable(t, doc))
        .map(|t| t.id.as_str().to_string())
        .collect()
}
