#![forbid(unsafe_code)]

//! Runtime plane: agents, leases, messages, and the event log, backed by a
//! single SQLite file in WAL mode. Every mutation runs in an explicit
//! transaction that also appends the corresponding event, so pullers observe
//! committed mutations exactly once in commit order.
//!
//! Time never comes from inside this crate: callers pass `now_ms` so tests
//! can freeze the clock. All "active lease" predicates are
//! `expires_at_ms > now_ms`; expired leases are kept, never deleted.

use ls_core::events::EventType;
use ls_core::model::Recipient;

mod store;

pub use store::SqliteStore;

pub const RUNTIME_DB_FILE: &str = "runtime.sqlite";

/// Upper bound on a message body, in bytes.
pub const MAX_MESSAGE_BODY_BYTES: usize = 16 * 1024;

/// Message listing limit ceiling (default 50, clamped here).
pub const MESSAGE_LIMIT_MAX: usize = 200;

/// Event pull limit ceiling.
pub const EVENT_PULL_LIMIT_MAX: usize = 1000;

#[derive(Debug)]
pub enum StoreError {
    Io(std::io::Error),
    Sql(rusqlite::Error),
    /// SQLite reported busy/locked past the busy timeout. Retriable.
    Busy,
    InvalidInput(&'static str),
    UnknownAgent,
    AgentExists,
    UnknownMessage,
    BodyTooLarge { len: usize },
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(err) => write!(f, "io: {err}"),
            Self::Sql(err) => write!(f, "sqlite: {err}"),
            Self::Busy => write!(f, "runtime store busy"),
            Self::InvalidInput(message) => write!(f, "invalid input: {message}"),
            Self::UnknownAgent => write!(f, "unknown agent"),
            Self::AgentExists => write!(f, "agent already registered"),
            Self::UnknownMessage => write!(f, "unknown message"),
            Self::BodyTooLarge { len } => {
                write!(f, "message body too large ({len} bytes, max {MAX_MESSAGE_BODY_BYTES})")
            }
        }
    }
}

impl std::error::Error for StoreError {}

impl From<std::io::Error> for StoreError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        if let rusqlite::Error::SqliteFailure(err, _) = &value {
            if matches!(
                err.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ) {
                return Self::Busy;
            }
        }
        Self::Sql(value)
    }
}

#[derive(Clone, Debug)]
pub struct AgentRow {
    pub agent_id: String,
    pub display_name: Option<String>,
    pub role: Option<String>,
    pub capabilities: Vec<String>,
    pub registered_at_ms: i64,
    pub last_seen_at_ms: i64,
    pub session_meta_json: Option<String>,
}

#[derive(Clone, Debug)]
pub struct LeaseRow {
    pub lease_id: String,
    pub task_id: String,
    pub agent_id: String,
    pub created_at_ms: i64,
    pub expires_at_ms: i64,
}

impl LeaseRow {
    pub fn is_active(&self, now_ms: i64) -> bool {
        self.expires_at_ms > now_ms
    }
}

#[derive(Clone, Debug)]
pub struct MessageRow {
    pub message_id: i64,
    pub created_at_ms: i64,
    pub from_agent_id: String,
    pub to_type: Recipient,
    pub to_id: String,
    pub task_id: Option<String>,
    pub subject: Option<String>,
    pub body: String,
    pub severity: Option<String>,
    pub read_at_ms: Option<i64>,
}

#[derive(Clone, Debug)]
pub struct EventRow {
    pub id: i64,
    pub created_at_ms: i64,
    pub event_type: String,
    pub actor_agent_id: Option<String>,
    pub task_id: Option<String>,
    pub target_agent_id: Option<String>,
    pub payload_json: String,
}

/// An event to append inside a mutation's transaction.
#[derive(Clone, Debug)]
pub struct NewEvent {
    pub event_type: EventType,
    pub actor_agent_id: Option<String>,
    pub task_id: Option<String>,
    pub target_agent_id: Option<String>,
    pub payload: serde_json::Value,
}

impl NewEvent {
    pub fn new(event_type: EventType) -> Self {
        Self {
            event_type,
            actor_agent_id: None,
            task_id: None,
            target_agent_id: None,
            payload: serde_json::Value::Object(serde_json::Map::new()),
        }
    }

    pub fn actor(mut self, agent_id: impl Into<String>) -> Self {
        self.actor_agent_id = Some(agent_id.into());
        self
    }

    pub fn task(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }

    pub fn target(mut self, agent_id: impl Into<String>) -> Self {
        self.target_agent_id = Some(agent_id.into());
        self
    }

    pub fn payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }
}

#[derive(Clone, Debug)]
pub struct AgentJoinRequest {
    pub agent_id: Option<String>,
    pub display_name: Option<String>,
    pub role: Option<String>,
    pub capabilities: Vec<String>,
    pub session_meta_json: Option<String>,
}

#[derive(Clone, Debug)]
pub enum ClaimOutcome {
    Created(LeaseRow),
    /// Another active lease exists; the holder is returned for diagnostics.
    Held(LeaseRow),
}

#[derive(Clone, Debug)]
pub enum LeaseOpOutcome {
    Applied(LeaseRow),
    /// No active lease, or held by a different agent.
    NotHeld { holder: Option<LeaseRow> },
}

#[derive(Clone, Debug)]
pub struct MessageSendRequest {
    pub from_agent_id: String,
    pub to_type: Recipient,
    pub to_id: String,
    pub body: String,
    pub subject: Option<String>,
    pub severity: Option<String>,
    pub task_id: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct InboxFilters {
    pub unread_only: bool,
    pub from_agent_id: Option<String>,
    pub since_ms: Option<i64>,
    pub until_ms: Option<i64>,
    pub limit: usize,
}

#[derive(Clone, Debug)]
pub struct SearchFilters {
    pub keyword: Option<String>,
    pub from_agent_id: Option<String>,
    pub since_ms: Option<i64>,
    pub until_ms: Option<i64>,
    pub limit: usize,
}

#[derive(Clone, Debug)]
pub enum AckOutcome {
    Acked(MessageRow),
    AlreadyRead(MessageRow),
    /// Message exists but is not addressed to the acking agent.
    NotAddressee,
    NotFound,
}

#[derive(Clone, Debug)]
pub struct EventSlice {
    pub events: Vec<EventRow>,
    pub next_cursor: i64,
}

#[derive(Clone, Debug)]
pub struct RuntimeStats {
    pub agents: i64,
    pub active_leases: i64,
    pub messages: i64,
    pub last_event_id: i64,
}
