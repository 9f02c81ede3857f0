#![forbid(unsafe_code)]

//! Subcommand dispatch: resolve the repository, open the coordinator, call
//! the one operation, render the envelope, and map it to an exit code.
//!
//! Exit codes: 0 ok, 2 validation failure, 3 runtime failure, 1 unknown.

use crate::cli::{AgentCommand, Cli, Command, EventsCommand, MsgCommand, TaskCommand};
use crate::output;
use ls_core::duration::parse_duration_secs;
use ls_engine::clock::{rfc3339_to_ms, SystemClock};
use ls_engine::coordinator::{
    self, ClaimRequest, Coordinator, JoinRequest, MessageListRequest, MessageSearchRequest,
    MessageSendRequest, PrdRefInput, TaskCreateRequest, TaskUpdateRequest,
};
use ls_engine::envelope::Envelope;
use ls_engine::error::EngineError;
use ls_engine::paths::RepoPaths;
use ls_engine::schema;
use std::path::PathBuf;

/// Environment override for the default claim TTL (a duration like `15m`).
pub const LEASE_TTL_ENV: &str = "LODESTAR_LEASE_TTL";

pub fn run(args: Cli) -> i32 {
    let op = op_name(&args.command);

    if args.shared.explain {
        println!("{}", explain(op));
        return 0;
    }
    if args.shared.schema {
        match schema::output_schema(op) {
            Some(schema) => {
                println!("{schema:#}");
                return 0;
            }
            None => {
                eprintln!("no schema for operation {op}");
                return 1;
            }
        }
    }

    let envelope = dispatch(args.shared.root.clone(), args.command);
    output::render(&envelope, args.shared.json);
    exit_code(&envelope)
}

fn dispatch(root: Option<String>, command: Command) -> Envelope {
    // init works on a bare directory; everything else needs an anchor.
    let command = match command {
        Command::Init { name, force } => {
            let root = match root.map(PathBuf::from) {
                Some(root) => root,
                None => match std::env::current_dir() {
                    Ok(cwd) => cwd,
                    Err(err) => {
                        return Envelope::from_error(&EngineError::RuntimeCorrupt {
                            message: format!("cannot read current directory: {err}"),
                        })
                    }
                },
            };
            return coordinator::init_repo(&root, &name, force);
        }
        other => other,
    };

    let paths = match resolve_paths(root) {
        Ok(paths) => paths,
        Err(err) => return Envelope::from_error(&err),
    };
    let mut coordinator = match open_coordinator(paths) {
        Ok(coordinator) => coordinator,
        Err(err) => return Envelope::from_error(&err),
    };

    match command {
        Command::Init { .. } => unreachable!("handled above"),
        Command::Status => coordinator.repo_status(),
        Command::Health => coordinator.health_check(),
        Command::Export => coordinator.export_snapshot(),
        Command::Agent { command } => run_agent(&mut coordinator, command),
        Command::Task { command } => run_task(&mut coordinator, command),
        Command::Msg { command } => run_msg(&mut coordinator, command),
        Command::Events { command } => run_events(&mut coordinator, command),
    }
}

fn resolve_paths(root: Option<String>) -> Result<RepoPaths, EngineError> {
    match root {
        Some(root) => {
            let paths = RepoPaths::at_root(PathBuf::from(root));
            if !paths.lodestar_dir().is_dir() {
                return Err(EngineError::NotInitialized);
            }
            Ok(paths)
        }
        None => RepoPaths::discover(),
    }
}

fn open_coordinator(paths: RepoPaths) -> Result<Coordinator, EngineError> {
    let mut coordinator = Coordinator::open(paths, Box::new(SystemClock))?;
    if let Ok(raw) = std::env::var(LEASE_TTL_ENV) {
        let ttl = parse_duration_secs(&raw).map_err(|err| EngineError::InvalidInput {
            field: "LODESTAR_LEASE_TTL",
            reason: err.to_string(),
        })?;
        coordinator = coordinator.with_default_ttl(ttl);
    }
    Ok(coordinator)
}

fn run_agent(coordinator: &mut Coordinator, command: AgentCommand) -> Envelope {
    match command {
        AgentCommand::Join {
            id,
            name,
            role,
            capabilities,
        } => coordinator.agent_join(JoinRequest {
            agent_id: id,
            display_name: name,
            role,
            capabilities,
            session_meta: None,
        }),
        AgentCommand::List => coordinator.agent_list(),
        AgentCommand::Find { capability, role } => coordinator.agent_find(capability, role),
        AgentCommand::Heartbeat { agent_id } => coordinator.agent_heartbeat(&agent_id),
        AgentCommand::Leave { agent_id, reason } => coordinator.agent_leave(&agent_id, reason),
    }
}

fn run_task(coordinator: &mut Coordinator, command: TaskCommand) -> Envelope {
    match command {
        TaskCommand::List {
            status,
            label,
            limit,
            cursor,
        } => coordinator.task_list(status, label, limit, cursor),
        TaskCommand::Get { task_id } => coordinator.task_get(&task_id),
        TaskCommand::Next { limit, agent } => coordinator.task_next(limit, agent),
        TaskCommand::Create {
            task_id,
            title,
            description,
            acceptance_criteria,
            priority,
            labels,
            depends_on,
            locks,
            prd_source,
            prd_refs,
        } => {
            let prd_refs = match prd_refs
                .iter()
                .map(|r| parse_prd_ref(r))
                .collect::<Result<Vec<_>, EngineError>>()
            {
                Ok(refs) => refs,
                Err(err) => return Envelope::from_error(&err),
            };
            coordinator.task_create(TaskCreateRequest {
                task_id,
                title,
                description,
                acceptance_criteria,
                priority,
                labels,
                depends_on,
                locks,
                prd_source,
                prd_refs,
            })
        }
        TaskCommand::Update {
            task_id,
            title,
            description,
            acceptance_criteria,
            priority,
            labels,
            depends_on,
            locks,
        } => coordinator.task_update(TaskUpdateRequest {
            task_id,
            title,
            description,
            acceptance_criteria,
            priority,
            labels: if labels.is_empty() { None } else { Some(labels) },
            depends_on: if depends_on.is_empty() {
                None
            } else {
                Some(depends_on)
            },
            locks: if locks.is_empty() { None } else { Some(locks) },
        }),
        TaskCommand::Delete {
            task_id,
            agent,
            cascade,
        } => coordinator.task_delete(&task_id, agent, cascade),
        TaskCommand::Claim {
            task_id,
            agent,
            ttl,
            force,
        } => {
            let ttl_secs = match parse_ttl(ttl) {
                Ok(ttl_secs) => ttl_secs,
                Err(err) => return Envelope::from_error(&err),
            };
            coordinator.task_claim(ClaimRequest {
                task_id,
                agent_id: agent,
                ttl_secs,
                force,
            })
        }
        TaskCommand::Renew { task_id, agent, ttl } => {
            let ttl_secs = match parse_ttl(ttl) {
                Ok(ttl_secs) => ttl_secs,
                Err(err) => return Envelope::from_error(&err),
            };
            coordinator.task_renew(&task_id, &agent, ttl_secs)
        }
        TaskCommand::Release {
            task_id,
            agent,
            reason,
        } => coordinator.task_release(&task_id, &agent, reason),
        TaskCommand::Done {
            task_id,
            agent,
            note,
        } => coordinator.task_done(&task_id, &agent, note),
        TaskCommand::Verify {
            task_id,
            agent,
            note,
        } => coordinator.task_verify(&task_id, &agent, note),
        TaskCommand::Complete {
            task_id,
            agent,
            note,
        } => coordinator.task_complete(&task_id, &agent, note),
        TaskCommand::Context { task_id, budget } => coordinator.task_context(&task_id, budget),
        TaskCommand::Graph => coordinator.task_graph(),
    }
}

fn run_msg(coordinator: &mut Coordinator, command: MsgCommand) -> Envelope {
    match command {
        MsgCommand::Send {
            from,
            to_type,
            to,
            body,
            subject,
            severity,
            task,
        } => coordinator.message_send(MessageSendRequest {
            from_agent_id: from,
            to_type,
            to_id: to,
            body,
            subject,
            severity,
            task_id: task,
        }),
        MsgCommand::List {
            agent,
            unread,
            from,
            since,
            until,
            limit,
            mark_read,
        } => {
            let (since_ms, until_ms) = match (parse_time(since), parse_time(until)) {
                (Ok(since_ms), Ok(until_ms)) => (since_ms, until_ms),
                (Err(err), _) | (_, Err(err)) => return Envelope::from_error(&err),
            };
            coordinator.message_list(MessageListRequest {
                agent_id: agent,
                unread_only: unread,
                from_agent_id: from,
                since_ms,
                until_ms,
                limit,
                mark_read,
            })
        }
        MsgCommand::Thread {
            task_id,
            since,
            limit,
        } => {
            let since_ms = match parse_time(since) {
                Ok(since_ms) => since_ms,
                Err(err) => return Envelope::from_error(&err),
            };
            coordinator.message_thread(&task_id, since_ms, limit)
        }
        MsgCommand::Search {
            keyword,
            from,
            since,
            until,
            limit,
        } => {
            let (since_ms, until_ms) = match (parse_time(since), parse_time(until)) {
                (Ok(since_ms), Ok(until_ms)) => (since_ms, until_ms),
                (Err(err), _) | (_, Err(err)) => return Envelope::from_error(&err),
            };
            coordinator.message_search(MessageSearchRequest {
                keyword,
                from_agent_id: from,
                since_ms,
                until_ms,
                limit,
            })
        }
        MsgCommand::Ack { message_id, agent } => coordinator.message_ack(&agent, message_id),
    }
}

fn run_events(coordinator: &mut Coordinator, command: EventsCommand) -> Envelope {
    match command {
        EventsCommand::Pull {
            since,
            limit,
            types,
        } => coordinator.events_pull(since, limit, types),
    }
}

fn parse_ttl(ttl: Option<String>) -> Result<Option<i64>, EngineError> {
    match ttl {
        None => Ok(None),
        Some(raw) => parse_duration_secs(&raw)
            .map(Some)
            .map_err(|err| EngineError::InvalidInput {
                field: "ttl",
                reason: err.to_string(),
            }),
    }
}

fn parse_time(value: Option<String>) -> Result<Option<i64>, EngineError> {
    match value {
        None => Ok(None),
        Some(raw) => rfc3339_to_ms(&raw)
            .map(Some)
            .ok_or(EngineError::InvalidInput {
                field: "time",
                reason: format!("{raw:?} is not an RFC 3339 timestamp"),
            }),
    }
}

/// `#anchor`, `#anchor@10-20`, or `@10-20`.
fn parse_prd_ref(raw: &str) -> Result<PrdRefInput, EngineError> {
    let bad = |reason: String| EngineError::InvalidInput {
        field: "prd-ref",
        reason,
    };
    let (anchor, range) = match raw.split_once('@') {
        Some((anchor, range)) => (anchor.to_string(), Some(range)),
        None => (raw.to_string(), None),
    };
    let lines = match range {
        None => None,
        Some(range) => {
            let (start, end) = range
                .split_once('-')
                .ok_or_else(|| bad(format!("{raw:?}: range must look like @10-20")))?;
            let start: u64 = start
                .parse()
                .map_err(|_| bad(format!("{raw:?}: bad start line")))?;
            let end: u64 = end
                .parse()
                .map_err(|_| bad(format!("{raw:?}: bad end line")))?;
            if start == 0 || end < start {
                return Err(bad(format!("{raw:?}: need 1 <= start <= end")));
            }
            Some((start, end))
        }
    };
    if anchor.is_empty() && lines.is_none() {
        return Err(bad(format!("{raw:?}: need an anchor or a line range")));
    }
    Ok(PrdRefInput { anchor, lines })
}

fn exit_code(envelope: &Envelope) -> i32 {
    let Some(code) = envelope.error_code() else {
        return 0;
    };
    match code {
        "InvalidInput" | "SpecInvariantViolation" | "TaskNotFound" | "TaskNotClaimable"
        | "TaskAlreadyClaimed" | "TaskLeaseNotHeld" | "TaskStateConflict"
        | "AgentNotRegistered" | "AgentAlreadyExists" | "MessageTooLarge"
        | "MessageRecipientInvalid" | "NotInitialized" => 2,
        "RuntimeBusy" | "RuntimeCorrupt" | "LockTimeout" | "SpecMalformed" => 3,
        _ => 1,
    }
}

fn op_name(command: &Command) -> &'static str {
    match command {
        Command::Init { .. } => "init",
        Command::Status => "repo.status",
        Command::Health => "health.check",
        Command::Export => "export.snapshot",
        Command::Agent { command } => match command {
            AgentCommand::Join { .. } => "agent.join",
            AgentCommand::List => "agent.list",
            AgentCommand::Find { .. } => "agent.find",
            AgentCommand::Heartbeat { .. } => "agent.heartbeat",
            AgentCommand::Leave { .. } => "agent.leave",
        },
        Command::Task { command } => match command {
            TaskCommand::List { .. } => "task.list",
            TaskCommand::Get { .. } => "task.get",
            TaskCommand::Next { .. } => "task.next",
            TaskCommand::Create { .. } => "task.create",
            TaskCommand::Update { .. } => "task.update",
            TaskCommand::Delete { .. } => "task.delete",
            TaskCommand::Claim { .. } => "task.claim",
            TaskCommand::Renew { .. } => "task.renew",
            TaskCommand::Release { .. } => "task.release",
            TaskCommand::Done { .. } => "task.done",
            TaskCommand::Verify { .. } => "task.verify",
            TaskCommand::Complete { .. } => "task.complete",
            TaskCommand::Context { .. } => "task.context",
            TaskCommand::Graph => "task.graph",
        },
        Command::Msg { command } => match command {
            MsgCommand::Send { .. } => "message.send",
            MsgCommand::List { .. } => "message.list",
            MsgCommand::Thread { .. } => "message.thread",
            MsgCommand::Search { .. } => "message.search",
            MsgCommand::Ack { .. } => "message.ack",
        },
        Command::Events { command } => match command {
            EventsCommand::Pull { .. } => "events.pull",
        },
    }
}

fn explain(op: &str) -> &'static str {
    match op {
        "init" => "Create .lodestar/ (spec.yaml, runtime.sqlite, .lock) in the target directory.",
        "repo.status" => "Summarize the project: task counts by status, claimable count, runtime totals.",
        "health.check" => "Verify the spec parses and the runtime store opens; report per-component detail.",
        "export.snapshot" => "Dump the spec plus agents, active leases, and stats as one JSON document.",
        "agent.join" => "Register an agent identity. Returns the server-generated agent_id when none is supplied.",
        "agent.list" => "List registered agents with their active leases, most recently seen first.",
        "agent.find" => "Find agents by capability tag and/or role.",
        "agent.heartbeat" => "Refresh an agent's last_seen_at. Does not extend leases.",
        "agent.leave" => "Record a graceful departure. Held leases keep running down; they are not released.",
        "task.list" => "List tasks with status/label filters and id-cursor pagination.",
        "task.get" => "Full task detail: spec fields, lease holder, dependents, claimability.",
        "task.next" => "Claimable tasks with no active lease, ordered by (priority, age, id), with rationale.",
        "task.create" => "Add a task to the committed spec; optionally freeze PRD context from a source document.",
        "task.update" => "Edit spec fields. Status never changes here; use claim/done/verify/complete/delete.",
        "task.delete" => "Soft-delete a task. Rejected while live dependents exist unless --cascade.",
        "task.claim" => "Atomically acquire a time-limited exclusive lease on a claimable task.",
        "task.renew" => "Extend a lease you hold to now + ttl. Expired leases cannot be renewed.",
        "task.release" => "Give up a lease you hold so other agents can claim the task.",
        "task.done" => "Mark a claimed task done (pending verification). Releases the lease.",
        "task.verify" => "Promote a done task to verified and report newly claimable dependents.",
        "task.complete" => "ready -> verified in one spec write (lease required); cannot strand the task in done.",
        "task.context" => "Frozen PRD excerpt, live sections, and drift for a task's binding.",
        "task.graph" => "Dependency graph nodes/edges plus a deterministic topological order.",
        "message.send" => "Send to an agent (validated) or a task thread (any id). Body capped at 16 KiB.",
        "message.list" => "An agent's inbox, newest first, with filters; optionally mark returned messages read.",
        "message.thread" => "A task thread, oldest first.",
        "message.search" => "Case-insensitive body search with sender/time filters; needs at least one predicate.",
        "message.ack" => "Mark one message read; only its addressee may ack.",
        "events.pull" => "Events with id > since, ascending, with next_cursor for exactly-once consumption.",
        _ => "No description available.",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn prd_ref_forms() {
        let anchor_only = parse_prd_ref("#goals").expect("anchor");
        assert_eq!(anchor_only.anchor, "#goals");
        assert_eq!(anchor_only.lines, None);

        let both = parse_prd_ref("#goals@10-20").expect("both");
        assert_eq!(both.anchor, "#goals");
        assert_eq!(both.lines, Some((10, 20)));

        let range_only = parse_prd_ref("@5-9").expect("range");
        assert_eq!(range_only.anchor, "");
        assert_eq!(range_only.lines, Some((5, 9)));

        assert!(parse_prd_ref("@20-10").is_err());
        assert!(parse_prd_ref("@x-y").is_err());
        assert!(parse_prd_ref("").is_err());
    }

    #[test]
    fn exit_codes_follow_the_error_class() {
        assert_eq!(exit_code(&Envelope::ok(json!({}))), 0);
        let validation = Envelope::from_error(&EngineError::TaskNotFound {
            task_id: "T1".to_string(),
        });
        assert_eq!(exit_code(&validation), 2);
        let runtime = Envelope::from_error(&EngineError::RuntimeBusy);
        assert_eq!(exit_code(&runtime), 3);
        let lock = Envelope::from_error(&EngineError::LockTimeout);
        assert_eq!(exit_code(&lock), 3);
    }

    #[test]
    fn every_command_maps_to_a_documented_operation() {
        // Spot-check that op names line up with the published schema set.
        for op in ls_engine::schema::OPERATIONS {
            assert_ne!(explain(op), "No description available.", "{op}");
        }
    }
}
