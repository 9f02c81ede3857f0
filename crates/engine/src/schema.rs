#![forbid(unsafe_code)]

//! Machine-readable JSON Schemas for every coordinator operation's output.
//!
//! Each schema describes the full envelope with the operation's `data` shape
//! inlined. Payload shapes are stable within a major version; clients
//! generate bindings from `lodestar <cmd> --schema`.

use serde_json::{json, Value};

/// Stable operation names, in the order they are documented.
pub const OPERATIONS: &[&str] = &[
    "repo.status",
    "agent.join",
    "agent.list",
    "agent.find",
    "agent.heartbeat",
    "agent.leave",
    "task.list",
    "task.get",
    "task.next",
    "task.create",
    "task.update",
    "task.delete",
    "task.claim",
    "task.renew",
    "task.release",
    "task.done",
    "task.verify",
    "task.complete",
    "task.context",
    "task.graph",
    "message.send",
    "message.list",
    "message.thread",
    "message.search",
    "message.ack",
    "events.pull",
    "export.snapshot",
    "health.check",
    "init",
];

fn envelope_schema(data: Value) -> Value {
    json!({
        "$schema": "https://json-schema.org/draft/2020-12/schema",
        "type": "object",
        "properties": {
            "ok": { "type": "boolean" },
            "data": data,
            "next": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "intent": { "type": "string" },
                        "cmd": { "type": "string" }
                    },
                    "required": ["intent", "cmd"]
                }
            },
            "warnings": { "type": "array", "items": { "type": "string" } },
            "error": {
                "type": "object",
                "properties": {
                    "code": { "type": "string" },
                    "message": { "type": "string" },
                    "details": { "type": "object" }
                },
                "required": ["code", "message"]
            }
        },
        "required": ["ok", "data", "next", "warnings"]
    })
}

fn nullable_string() -> Value {
    json!({ "type": ["string", "null"] })
}

fn task_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "id": { "type": "string" },
            "title": { "type": "string" },
            "description": { "type": "string" },
            "acceptance_criteria": { "type": "string" },
            "status": { "type": "string", "enum": ["ready", "done", "verified", "deleted"] },
            "priority": { "type": "integer" },
            "labels": { "type": "array", "items": { "type": "string" } },
            "depends_on": { "type": "array", "items": { "type": "string" } },
            "locks": { "type": "array", "items": { "type": "string" } },
            "created_at": { "type": "string", "format": "date-time" },
            "updated_at": { "type": "string", "format": "date-time" },
            "claimed_by": nullable_string(),
            "lease_expires_at": nullable_string(),
            "prd": {
                "type": "object",
                "properties": {
                    "source": { "type": "string" },
                    "refs": { "type": "array" },
                    "hash": { "type": "string" }
                }
            }
        },
        "required": ["id", "title", "status", "priority", "depends_on"]
    })
}

fn agent_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "agent_id": { "type": "string" },
            "display_name": nullable_string(),
            "role": nullable_string(),
            "capabilities": { "type": "array", "items": { "type": "string" } },
            "registered_at": { "type": "string", "format": "date-time" },
            "last_seen_at": { "type": "string", "format": "date-time" },
            "session_meta": { "type": ["object", "null"] }
        },
        "required": ["agent_id", "capabilities", "registered_at", "last_seen_at"]
    })
}

fn lease_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "lease_id": { "type": "string" },
            "task_id": { "type": "string" },
            "agent_id": { "type": "string" },
            "created_at": { "type": "string", "format": "date-time" },
            "expires_at": { "type": "string", "format": "date-time" }
        },
        "required": ["lease_id", "task_id", "agent_id", "expires_at"]
    })
}

fn message_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "message_id": { "type": "integer" },
            "created_at": { "type": "string", "format": "date-time" },
            "from_agent_id": { "type": "string" },
            "to_type": { "type": "string", "enum": ["agent", "task"] },
            "to_id": { "type": "string" },
            "task_id": nullable_string(),
            "subject": nullable_string(),
            "body": { "type": "string" },
            "severity": nullable_string(),
            "read_at": nullable_string()
        },
        "required": ["message_id", "created_at", "from_agent_id", "to_type", "to_id", "body"]
    })
}

fn event_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "id": { "type": "integer" },
            "created_at": { "type": "string", "format": "date-time" },
            "type": { "type": "string" },
            "actor_agent_id": nullable_string(),
            "task_id": nullable_string(),
            "target_agent_id": nullable_string(),
            "payload": { "type": "object" }
        },
        "required": ["id", "created_at", "type", "payload"]
    })
}

fn array_of(items: Value) -> Value {
    json!({ "type": "array", "items": items })
}

/// The output schema for a stable operation name, or None for an unknown
/// operation.
pub fn output_schema(operation: &str) -> Option<Value> {
    let data = match operation {
        "repo.status" => json!({
            "type": "object",
            "properties": {
                "project": {
                    "type": "object",
                    "properties": {
                        "name": { "type": "string" },
                        "default_branch": { "type": "string" }
                    }
                },
                "tasks": {
                    "type": "object",
                    "properties": {
                        "total": { "type": "integer" },
                        "by_status": { "type": "object" },
                        "claimable": { "type": "integer" }
                    }
                },
                "runtime": {
                    "type": "object",
                    "properties": {
                        "agents": { "type": "integer" },
                        "active_leases": { "type": "integer" },
                        "messages": { "type": "integer" },
                        "last_event_id": { "type": "integer" }
                    }
                }
            }
        }),
        "agent.join" | "agent.heartbeat" => json!({
            "type": "object",
            "properties": { "agent": agent_schema() },
            "required": ["agent"]
        }),
        "agent.list" | "agent.find" => json!({
            "type": "object",
            "properties": {
                "agents": array_of(agent_schema()),
                "count": { "type": "integer" }
            }
        }),
        "agent.leave" => json!({
            "type": "object",
            "properties": {
                "agent_id": { "type": "string" },
                "left": { "type": "boolean" }
            }
        }),
        "task.list" => json!({
            "type": "object",
            "properties": {
                "tasks": array_of(task_schema()),
                "count": { "type": "integer" },
                "total": { "type": "integer" },
                "next_cursor": nullable_string()
            }
        }),
        "task.get" => json!({
            "type": "object",
            "properties": {
                "task": task_schema(),
                "dependents": { "type": "array", "items": { "type": "string" } },
                "claimable": { "type": "boolean" },
                "unmet_dependencies": { "type": "array", "items": { "type": "string" } }
            }
        }),
        "task.next" => json!({
            "type": "object",
            "properties": {
                "tasks": array_of(json!({
                    "type": "object",
                    "properties": {
                        "task_id": { "type": "string" },
                        "title": { "type": "string" },
                        "priority": { "type": "integer" },
                        "labels": { "type": "array", "items": { "type": "string" } },
                        "rationale": { "type": "string" }
                    },
                    "required": ["task_id", "rationale"]
                })),
                "count": { "type": "integer" }
            }
        }),
        "task.create" | "task.update" => json!({
            "type": "object",
            "properties": { "task": task_schema() },
            "required": ["task"]
        }),
        "task.delete" => json!({
            "type": "object",
            "properties": {
                "deleted_task_ids": { "type": "array", "items": { "type": "string" } }
            }
        }),
        "task.claim" | "task.renew" => json!({
            "type": "object",
            "properties": {
                "lease": lease_schema(),
                "ttl_seconds": { "type": "integer" }
            },
            "required": ["lease"]
        }),
        "task.release" => json!({
            "type": "object",
            "properties": {
                "released_lease": lease_schema(),
                "reason": nullable_string()
            }
        }),
        "task.done" => json!({
            "type": "object",
            "properties": {
                "task_id": { "type": "string" },
                "status": { "type": "string", "enum": ["done"] }
            }
        }),
        "task.verify" | "task.complete" => json!({
            "type": "object",
            "properties": {
                "task_id": { "type": "string" },
                "status": { "type": "string", "enum": ["verified"] },
                "newly_ready_task_ids": { "type": "array", "items": { "type": "string" } }
            }
        }),
        "task.context" => json!({
            "type": "object",
            "properties": {
                "task": task_schema(),
                "prd": {
                    "type": ["object", "null"],
                    "properties": {
                        "source": { "type": "string" },
                        "excerpt": { "type": "string" },
                        "sections": { "type": "array" },
                        "body": { "type": "string" },
                        "truncated": { "type": "boolean" },
                        "drift": {
                            "type": "object",
                            "properties": {
                                "changed": { "type": "boolean" },
                                "current_hash": nullable_string(),
                                "frozen_hash": { "type": "string" },
                                "missing_anchors": { "type": "array" },
                                "out_of_range": { "type": "array" }
                            }
                        }
                    }
                }
            }
        }),
        "task.graph" => json!({
            "type": "object",
            "properties": {
                "nodes": { "type": "array" },
                "edges": array_of(json!({
                    "type": "object",
                    "properties": {
                        "from": { "type": "string" },
                        "to": { "type": "string" }
                    }
                })),
                "order": { "type": "array", "items": { "type": "string" } },
                "generated_at": { "type": "string", "format": "date-time" }
            }
        }),
        "message.send" | "message.ack" => json!({
            "type": "object",
            "properties": { "message": message_schema() },
            "required": ["message"]
        }),
        "message.list" => json!({
            "type": "object",
            "properties": {
                "messages": array_of(message_schema()),
                "count": { "type": "integer" },
                "unread": { "type": "integer" }
            }
        }),
        "message.thread" => json!({
            "type": "object",
            "properties": {
                "task_id": { "type": "string" },
                "messages": array_of(message_schema()),
                "count": { "type": "integer" }
            }
        }),
        "message.search" => json!({
            "type": "object",
            "properties": {
                "messages": array_of(message_schema()),
                "count": { "type": "integer" }
            }
        }),
        "events.pull" => json!({
            "type": "object",
            "properties": {
                "events": array_of(event_schema()),
                "count": { "type": "integer" },
                "next_cursor": { "type": "integer" }
            },
            "required": ["events", "next_cursor"]
        }),
        "export.snapshot" => json!({
            "type": "object",
            "properties": {
                "exported_at": { "type": "string", "format": "date-time" },
                "project": { "type": "object" },
                "tasks": array_of(task_schema()),
                "agents": array_of(agent_schema()),
                "active_leases": array_of(lease_schema()),
                "stats": { "type": "object" }
            }
        }),
        "health.check" => json!({
            "type": "object",
            "properties": {
                "checks": array_of(json!({
                    "type": "object",
                    "properties": {
                        "name": { "type": "string" },
                        "ok": { "type": "boolean" },
                        "detail": { "type": "string" }
                    },
                    "required": ["name", "ok"]
                })),
                "checked_at": { "type": "string", "format": "date-time" }
            }
        }),
        "init" => json!({
            "type": "object",
            "properties": {
                "root": { "type": "string" },
                "spec": { "type": "string" },
                "runtime": { "type": "string" },
                "project": { "type": "object" }
            }
        }),
        _ => return None,
    };
    Some(envelope_schema(data))
}
