#![forbid(unsafe_code)]

//! CLI argument definitions. Every subcommand honors the shared flags:
//! `--json` prints the envelope as one JSON object, `--schema` prints the
//! operation's output schema and exits, `--explain` prints a static
//! description and exits.

use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "lodestar",
    version,
    about = "Race-free task coordination for multiple agents in one working tree"
)]
pub struct Cli {
    #[command(flatten)]
    pub shared: SharedFlags,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Args)]
pub struct SharedFlags {
    /// Print the result envelope as a single JSON object on stdout.
    #[arg(long, global = true)]
    pub json: bool,

    /// Print the JSON Schema of this operation's output and exit.
    #[arg(long, global = true)]
    pub schema: bool,

    /// Print a static description of this operation and exit.
    #[arg(long, global = true)]
    pub explain: bool,

    /// Repository root override (otherwise walks upward from the cwd).
    #[arg(long, global = true, value_name = "DIR")]
    pub root: Option<String>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Create .lodestar/ in the current directory.
    Init {
        /// Project name recorded in the spec.
        #[arg(long, default_value = "unnamed")]
        name: String,
        /// Overwrite an existing spec.
        #[arg(long)]
        force: bool,
    },
    /// Project, task, and runtime summary.
    Status,
    /// Check both planes and report per-component health.
    Health,
    /// Dump spec and runtime state as one JSON document.
    Export,
    /// Agent registry operations.
    Agent {
        #[command(subcommand)]
        command: AgentCommand,
    },
    /// Task operations.
    Task {
        #[command(subcommand)]
        command: TaskCommand,
    },
    /// Inter-agent messaging.
    Msg {
        #[command(subcommand)]
        command: MsgCommand,
    },
    /// Event log operations.
    Events {
        #[command(subcommand)]
        command: EventsCommand,
    },
}

#[derive(Debug, Subcommand)]
pub enum AgentCommand {
    /// Register this session as an agent.
    Join {
        /// Stable id to register under (generated when omitted).
        #[arg(long)]
        id: Option<String>,
        /// Human-readable display name.
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        role: Option<String>,
        /// Capability tag; repeatable.
        #[arg(long = "cap")]
        capabilities: Vec<String>,
    },
    /// List registered agents with their active leases.
    List,
    /// Find agents by capability and/or role.
    Find {
        #[arg(long = "cap")]
        capability: Option<String>,
        #[arg(long)]
        role: Option<String>,
    },
    /// Refresh an agent's last-seen timestamp.
    Heartbeat { agent_id: String },
    /// Record a graceful departure (leases keep running down).
    Leave {
        agent_id: String,
        #[arg(long)]
        reason: Option<String>,
    },
}

#[derive(Debug, Subcommand)]
pub enum TaskCommand {
    /// List tasks, optionally filtered.
    List {
        /// ready|done|verified|deleted|all
        #[arg(long)]
        status: Option<String>,
        #[arg(long)]
        label: Option<String>,
        #[arg(long)]
        limit: Option<usize>,
        /// Task id to continue after (pagination).
        #[arg(long)]
        cursor: Option<String>,
    },
    /// Full detail for one task.
    Get { task_id: String },
    /// Claimable tasks, best first.
    Next {
        #[arg(long)]
        limit: Option<usize>,
        #[arg(long)]
        agent: Option<String>,
    },
    /// Create a task in the committed spec.
    Create {
        task_id: String,
        #[arg(long)]
        title: String,
        #[arg(long, default_value = "")]
        description: String,
        #[arg(long = "criteria", default_value = "")]
        acceptance_criteria: String,
        /// Lower = more urgent (default 100).
        #[arg(long)]
        priority: Option<i64>,
        /// Repeatable.
        #[arg(long = "label")]
        labels: Vec<String>,
        /// Task id this task depends on; repeatable.
        #[arg(long = "depends")]
        depends_on: Vec<String>,
        /// Path glob this task intends to touch; repeatable, advisory.
        #[arg(long = "lock")]
        locks: Vec<String>,
        /// Path to a requirements document to freeze context from.
        #[arg(long)]
        prd_source: Option<String>,
        /// Section reference: '#anchor', '#anchor@10-20', or '@10-20'; repeatable.
        #[arg(long = "prd-ref")]
        prd_refs: Vec<String>,
    },
    /// Update spec fields (never status; use the lifecycle commands).
    Update {
        task_id: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long = "criteria")]
        acceptance_criteria: Option<String>,
        #[arg(long)]
        priority: Option<i64>,
        #[arg(long = "label")]
        labels: Vec<String>,
        #[arg(long = "depends")]
        depends_on: Vec<String>,
        #[arg(long = "lock")]
        locks: Vec<String>,
    },
    /// Soft-delete a task (tombstone).
    Delete {
        task_id: String,
        #[arg(long)]
        agent: Option<String>,
        /// Also tombstone every dependent.
        #[arg(long)]
        cascade: bool,
    },
    /// Claim a task with a time-limited lease.
    Claim {
        task_id: String,
        #[arg(long)]
        agent: String,
        /// Lease duration like 15m, 1h (clamped to 60s..2h).
        #[arg(long)]
        ttl: Option<String>,
        /// No-op against an active lease; claims normally once it expires.
        #[arg(long)]
        force: bool,
    },
    /// Extend a held lease.
    Renew {
        task_id: String,
        #[arg(long)]
        agent: String,
        #[arg(long)]
        ttl: Option<String>,
    },
    /// Release a held lease early.
    Release {
        task_id: String,
        #[arg(long)]
        agent: String,
        #[arg(long)]
        reason: Option<String>,
    },
    /// Mark a claimed task done (pending verification).
    Done {
        task_id: String,
        #[arg(long)]
        agent: String,
        #[arg(long)]
        note: Option<String>,
    },
    /// Verify a done task, unblocking dependents.
    Verify {
        task_id: String,
        #[arg(long)]
        agent: String,
        #[arg(long)]
        note: Option<String>,
    },
    /// done + verify in one atomic spec write.
    Complete {
        task_id: String,
        #[arg(long)]
        agent: String,
        #[arg(long)]
        note: Option<String>,
    },
    /// Frozen excerpt, live sections, and drift for a task's PRD binding.
    Context {
        task_id: String,
        /// Character budget for the concatenated body.
        #[arg(long)]
        budget: Option<usize>,
    },
    /// Dependency graph with a topological order.
    Graph,
}

#[derive(Debug, Subcommand)]
pub enum MsgCommand {
    /// Send a message to an agent or a task thread.
    Send {
        #[arg(long)]
        from: String,
        /// agent|task
        #[arg(long = "to-type", default_value = "agent")]
        to_type: String,
        #[arg(long)]
        to: String,
        #[arg(long)]
        body: String,
        #[arg(long)]
        subject: Option<String>,
        #[arg(long)]
        severity: Option<String>,
        /// Related task id (for agent-addressed messages).
        #[arg(long)]
        task: Option<String>,
    },
    /// List an agent's inbox, newest first.
    List {
        #[arg(long)]
        agent: String,
        #[arg(long)]
        unread: bool,
        #[arg(long)]
        from: Option<String>,
        /// RFC 3339 lower bound.
        #[arg(long)]
        since: Option<String>,
        /// RFC 3339 upper bound.
        #[arg(long)]
        until: Option<String>,
        #[arg(long)]
        limit: Option<usize>,
        /// Mark returned messages as read in the same transaction.
        #[arg(long = "mark-read")]
        mark_read: bool,
    },
    /// A task thread, oldest first.
    Thread {
        task_id: String,
        #[arg(long)]
        since: Option<String>,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Search message bodies and senders.
    Search {
        #[arg(long)]
        keyword: Option<String>,
        #[arg(long)]
        from: Option<String>,
        #[arg(long)]
        since: Option<String>,
        #[arg(long)]
        until: Option<String>,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Mark one message read.
    Ack {
        message_id: i64,
        #[arg(long)]
        agent: String,
    },
}

#[derive(Debug, Subcommand)]
pub enum EventsCommand {
    /// Pull committed events after a cursor, ascending.
    Pull {
        #[arg(long, default_value_t = 0)]
        since: i64,
        #[arg(long)]
        limit: Option<usize>,
        /// Filter to an event type; repeatable.
        #[arg(long = "type")]
        types: Vec<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn parses_claim_with_ttl() {
        let cli = Cli::parse_from([
            "lodestar", "task", "claim", "T1", "--agent", "A1", "--ttl", "15m",
        ]);
        match cli.command {
            Command::Task {
                command: TaskCommand::Claim { task_id, agent, ttl, force },
            } => {
                assert_eq!(task_id, "T1");
                assert_eq!(agent, "A1");
                assert_eq!(ttl.as_deref(), Some("15m"));
                assert!(!force);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn global_flags_apply_to_subcommands() {
        let cli = Cli::parse_from(["lodestar", "status", "--json"]);
        assert!(cli.shared.json);

        let cli = Cli::parse_from(["lodestar", "task", "next", "--schema"]);
        assert!(cli.shared.schema);
    }

    #[test]
    fn parses_repeatable_flags() {
        let cli = Cli::parse_from([
            "lodestar", "task", "create", "T1", "--title", "Build it", "--depends", "T0",
            "--depends", "T0b", "--label", "core", "--prd-source", "docs/prd.md", "--prd-ref",
            "#goals", "--prd-ref", "@10-20",
        ]);
        match cli.command {
            Command::Task {
                command:
                    TaskCommand::Create {
                        depends_on,
                        labels,
                        prd_refs,
                        ..
                    },
            } => {
                assert_eq!(depends_on, vec!["T0", "T0b"]);
                assert_eq!(labels, vec!["core"]);
                assert_eq!(prd_refs, vec!["#goals", "@10-20"]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
