#![forbid(unsafe_code)]

use ls_core::model::TaskStatus;
use ls_storage::StoreError;
use serde_json::{json, Value};

/// Which spec invariant a rejected mutation would have broken.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InvariantKind {
    Cycle,
    MissingDep,
    DuplicateId,
    BadStatus,
}

impl InvariantKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cycle => "cycle",
            Self::MissingDep => "missing_dep",
            Self::DuplicateId => "duplicate_id",
            Self::BadStatus => "bad_status",
        }
    }
}

/// Closed set of error kinds surfaced in envelopes. The `code()` strings are
/// the wire contract; variants carry enough context to fill `details`.
#[derive(Debug)]
pub enum EngineError {
    NotInitialized,
    SpecMalformed {
        message: String,
    },
    SpecInvariant {
        kind: InvariantKind,
        detail: String,
    },
    LockTimeout,
    RuntimeBusy,
    RuntimeCorrupt {
        message: String,
    },
    TaskNotFound {
        task_id: String,
    },
    TaskNotClaimable {
        task_id: String,
        status: TaskStatus,
        unmet_deps: Vec<String>,
    },
    TaskAlreadyClaimed {
        task_id: String,
        holder_agent_id: String,
        lease_id: String,
        expires_at_ms: i64,
    },
    TaskLeaseNotHeld {
        task_id: String,
        holder_agent_id: Option<String>,
    },
    TaskStateConflict {
        task_id: String,
        status: TaskStatus,
        expected: &'static str,
    },
    AgentNotRegistered {
        agent_id: String,
    },
    AgentAlreadyExists {
        agent_id: String,
    },
    MessageTooLarge {
        len: usize,
    },
    MessageRecipientInvalid {
        to_id: String,
    },
    InvalidInput {
        field: &'static str,
        reason: String,
    },
}

impl EngineError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotInitialized => "NotInitialized",
            Self::SpecMalformed { .. } => "SpecMalformed",
            Self::SpecInvariant { .. } => "SpecInvariantViolation",
            Self::LockTimeout => "LockTimeout",
            Self::RuntimeBusy => "RuntimeBusy",
            Self::RuntimeCorrupt { .. } => "RuntimeCorrupt",
            Self::TaskNotFound { .. } => "TaskNotFound",
            Self::TaskNotClaimable { .. } => "TaskNotClaimable",
            Self::TaskAlreadyClaimed { .. } => "TaskAlreadyClaimed",
            Self::TaskLeaseNotHeld { .. } => "TaskLeaseNotHeld",
            Self::TaskStateConflict { .. } => "TaskStateConflict",
            Self::AgentNotRegistered { .. } => "AgentNotRegistered",
            Self::AgentAlreadyExists { .. } => "AgentAlreadyExists",
            Self::MessageTooLarge { .. } => "MessageTooLarge",
            Self::MessageRecipientInvalid { .. } => "MessageRecipientInvalid",
            Self::InvalidInput { .. } => "InvalidInput",
        }
    }

    /// Structured context for the envelope's `error.details`.
    pub fn details(&self) -> Option<Value> {
        match self {
            Self::SpecInvariant { kind, detail } => Some(json!({
                "kind": kind.as_str(),
                "detail": detail,
            })),
            Self::TaskNotFound { task_id } => Some(json!({ "task_id": task_id })),
            Self::TaskNotClaimable {
                task_id,
                status,
                unmet_deps,
            } => Some(json!({
                "task_id": task_id,
                "status": status.as_str(),
                "unmet_dependencies": unmet_deps,
            })),
            Self::TaskAlreadyClaimed {
                task_id,
                holder_agent_id,
                lease_id,
                expires_at_ms,
            } => Some(json!({
                "task_id": task_id,
                "claimed_by": holder_agent_id,
                "lease_id": lease_id,
                "expires_at": crate::clock::ms_to_rfc3339(*expires_at_ms),
            })),
            Self::TaskLeaseNotHeld {
                task_id,
                holder_agent_id,
            } => Some(json!({
                "task_id": task_id,
                "claimed_by": holder_agent_id,
            })),
            Self::TaskStateConflict {
                task_id,
                status,
                expected,
            } => Some(json!({
                "task_id": task_id,
                "status": status.as_str(),
                "expected": expected,
            })),
            Self::AgentNotRegistered { agent_id } => Some(json!({ "agent_id": agent_id })),
            Self::AgentAlreadyExists { agent_id } => Some(json!({ "agent_id": agent_id })),
            Self::MessageTooLarge { len } => Some(json!({
                "length": len,
                "max": ls_storage::MAX_MESSAGE_BODY_BYTES,
            })),
            Self::MessageRecipientInvalid { to_id } => Some(json!({ "to_id": to_id })),
            Self::InvalidInput { field, reason } => Some(json!({
                "field": field,
                "reason": reason,
            })),
            _ => None,
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotInitialized => {
                write!(f, "not a lodestar repository (run `lodestar init` first)")
            }
            Self::SpecMalformed { message } => write!(f, "spec is malformed: {message}"),
            Self::SpecInvariant { kind, detail } => {
                write!(f, "spec invariant violation ({}): {detail}", kind.as_str())
            }
            Self::LockTimeout => write!(f, "timed out waiting for the spec lock"),
            Self::RuntimeBusy => write!(f, "runtime store is busy; retry"),
            Self::RuntimeCorrupt { message } => write!(f, "runtime store failure: {message}"),
            Self::TaskNotFound { task_id } => write!(f, "task {task_id} not found"),
            Self::TaskNotClaimable {
                task_id, status, ..
            } => write!(f, "task {task_id} is not claimable (status: {status})"),
            Self::TaskAlreadyClaimed {
                task_id,
                holder_agent_id,
                ..
            } => write!(f, "task {task_id} already claimed by {holder_agent_id}"),
            Self::TaskLeaseNotHeld { task_id, holder_agent_id } => match holder_agent_id {
                Some(holder) => {
                    write!(f, "task {task_id} lease is held by {holder}")
                }
                None => write!(f, "no active lease on task {task_id}"),
            },
            Self::TaskStateConflict {
                task_id,
                status,
                expected,
            } => write!(
                f,
                "task {task_id} is {status}, expected {expected}"
            ),
            Self::AgentNotRegistered { agent_id } => {
                write!(f, "agent {agent_id} is not registered")
            }
            Self::AgentAlreadyExists { agent_id } => {
                write!(f, "agent {agent_id} is already registered")
            }
            Self::MessageTooLarge { len } => write!(
                f,
                "message body is {len} bytes (max {})",
                ls_storage::MAX_MESSAGE_BODY_BYTES
            ),
            Self::MessageRecipientInvalid { to_id } => {
                write!(f, "message recipient {to_id} is not a registered agent")
            }
            Self::InvalidInput { field, reason } => write!(f, "invalid {field}: {reason}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<StoreError> for EngineError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::Busy => Self::RuntimeBusy,
            StoreError::Io(err) => Self::RuntimeCorrupt {
                message: err.to_string(),
            },
            StoreError::Sql(err) => Self::RuntimeCorrupt {
                message: err.to_string(),
            },
            StoreError::InvalidInput(message) => Self::InvalidInput {
                field: "input",
                reason: message.to_string(),
            },
            // Call sites validate identities up front; these only surface on
            // races and carry no id of their own.
            StoreError::UnknownAgent => Self::AgentNotRegistered {
                agent_id: String::new(),
            },
            StoreError::AgentExists => Self::AgentAlreadyExists {
                agent_id: String::new(),
            },
            StoreError::UnknownMessage => Self::InvalidInput {
                field: "message_id",
                reason: "message not found".to_string(),
            },
            StoreError::BodyTooLarge { len } => Self::MessageTooLarge { len },
        }
    }
}
