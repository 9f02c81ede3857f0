#![forbid(unsafe_code)]

//! Dependency-aware task selection.
//!
//! A task is offered when it is claimable (ready, all deps verified) and no
//! active lease covers it. Ties break deterministically on
//! `(priority asc, created_at asc, id asc)` so two agents polling at the
//! same instant see the same ordering and contention resolves at claim time.

use crate::dag;
use crate::spec::model::SpecDoc;
use ls_storage::LeaseRow;
use std::collections::HashSet;

#[derive(Clone, Debug)]
pub struct Candidate {
    pub task_id: String,
    pub title: String,
    pub priority: i64,
    pub labels: Vec<String>,
    pub rationale: String,
}

pub fn next(
    doc: &SpecDoc,
    active_leases: &[LeaseRow],
    limit: usize,
    agent_id: Option<&str>,
) -> Vec<Candidate> {
    let leased: HashSet<&str> = active_leases.iter().map(|l| l.task_id.as_str()).collect();
    let own: HashSet<&str> = match agent_id {
        Some(agent_id) => active_leases
            .iter()
            .filter(|l| l.agent_id == agent_id)
            .map(|l| l.task_id.as_str())
            .collect(),
        None => HashSet::new(),
    };

    let mut candidates: Vec<&crate::spec::model::Task> = doc
        .tasks
        .iter()
        .filter(|t| dag::is_claimable(t, doc))
        .filter(|t| !leased.contains(t.id.as_str()))
        .filter(|t| !own.contains(t.id.as_str()))
        .collect();

    candidates.sort_by(|a, b| {
        a.priority
            .cmp(&b.priority)
            .then(a.created_at_ms.cmp(&b.created_at_ms))
            .then(a.id.as_str().cmp(b.id.as_str()))
    });

    candidates
        .into_iter()
        .take(limit)
        .map(|task| {
            let rationale = if task.depends_on.is_empty() {
                format!("ready, no dependencies, priority {}", task.priority)
            } else {
                format!(
                    "ready, all {} dependencies verified, priority {}",
                    task.depends_on.len(),
                    task.priority
                )
            };
            Candidate {
                task_id: task.id.as_str().to_string(),
                title: task.title.clone(),
                priority: task.priority,
                labels: task.labels.clone(),
                rationale,
            }
        })
        .collect()
}
