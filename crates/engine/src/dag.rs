#![forbid(unsafe_code)]

//! Pure analysis over an in-memory spec: invariant validation, cycle and
//! missing-dep detection, readiness, reverse dependencies, and a
//! deterministic topological order for graph export.
//!
//! Deleted tasks are tombstones: they neither participate in the graph nor
//! may be depended on by live tasks. All traversals visit tasks in
//! spec-insertion order so results are stable across runs.

use crate::error::{EngineError, InvariantKind};
use crate::spec::model::{SpecDoc, Task};
use ls_core::model::TaskStatus;
use std::collections::{HashMap, HashSet};

/// Checks every invariant the spec store enforces on write: unique ids,
/// resolvable non-deleted deps, and an acyclic graph.
pub fn validate(doc: &SpecDoc) -> Result<(), EngineError> {
    let mut seen = HashSet::new();
    for task in &doc.tasks {
        if !seen.insert(task.id.as_str()) {
            return Err(EngineError::SpecInvariant {
                kind: InvariantKind::DuplicateId,
                detail: format!("task id {} appears more than once", task.id),
            });
        }
    }

    if let Some((task_id, dep)) = missing_deps(doc).into_iter().next() {
        let detail = match doc.get_task(&dep) {
            Some(_) => format!("task {task_id} depends on deleted task {dep}"),
            None => format!("task {task_id} depends on unknown task {dep}"),
        };
        return Err(EngineError::SpecInvariant {
            kind: InvariantKind::MissingDep,
            detail,
        });
    }

    if let Some(cycle) = detect_cycle(doc) {
        return Err(EngineError::SpecInvariant {
            kind: InvariantKind::Cycle,
            detail: format!("dependency cycle: {}", cycle.join(" -> ")),
        });
    }

    Ok(())
}

/// Dep references from live tasks that are unresolvable or point at deleted
/// tasks, as `(task_id, dep_id)` pairs in spec order.
pub fn missing_deps(doc: &SpecDoc) -> Vec<(String, String)> {
    let mut out = Vec::new();
    for task in live_tasks(doc) {
        for dep in &task.depends_on {
            let ok = doc
                .get_task(dep)
                .map(|d| d.status != TaskStatus::Deleted)
                .unwrap_or(false);
            if !ok {
                out.push((task.id.as_str().to_string(), dep.clone()));
            }
        }
    }
    out
}

/// Finds a dependency cycle among live tasks, depth-first in spec-insertion
/// order. Returns the cycle as an ordered path `[a, b, .., a]`.
pub fn detect_cycle(doc: &SpecDoc) -> Option<Vec<String>> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Visiting,
        Done,
    }

    fn visit<'a>(
        doc: &'a SpecDoc,
        task: &'a Task,
        marks: &mut HashMap<&'a str, Mark>,
        stack: &mut Vec<&'a str>,
    ) -> Option<Vec<String>> {
        match marks.get(task.id.as_str()) {
            Some(Mark::Done) => return None,
            Some(Mark::Visiting) => {
                let start = stack
                    .iter()
                    .position(|id| *id == task.id.as_str())
                    .unwrap_or(0);
                let mut cycle: Vec<String> =
                    stack[start..].iter().map(|id| id.to_string()).collect();
                cycle.push(task.id.as_str().to_string());
                return Some(cycle);
            }
            None => {}
        }

        marks.insert(task.id.as_str(), Mark::Visiting);
        stack.push(task.id.as_str());
        for dep in &task.depends_on {
            if let Some(dep_task) = doc.get_task(dep) {
                if dep_task.status == TaskStatus::Deleted {
                    continue;
                }
                if let Some(cycle) = visit(doc, dep_task, marks, stack) {
                    return Some(cycle);
                }
            }
        }
        stack.pop();
        marks.insert(task.id.as_str(), Mark::Done);
        None
    }

    let mut marks = HashMap::new();
    let mut stack = Vec::new();
    for task in live_tasks(doc) {
        if let Some(cycle) = visit(doc, task, &mut marks, &mut stack) {
            return Some(cycle);
        }
    }
    None
}

/// A task is claimable when it is `ready` and every dependency is
/// `verified`. Whether an active lease exists is the scheduler's business.
pub fn is_claimable(task: &Task, doc: &SpecDoc) -> bool {
    task.status == TaskStatus::Ready && unmet_deps(task, doc).is_empty()
}

/// Dependencies of `task` that are not yet verified, in declaration order.
pub fn unmet_deps(task: &Task, doc: &SpecDoc) -> Vec<String> {
    task.depends_on
        .iter()
        .filter(|dep| {
            doc.get_task(dep)
                .map(|d| d.status != TaskStatus::Verified)
                .unwrap_or(true)
        })
        .cloned()
        .collect()
}

/// Live tasks that directly depend on `task_id`, in spec order.
pub fn dependents_of<'a>(doc: &'a SpecDoc, task_id: &str) -> Vec<&'a Task> {
    live_tasks(doc)
        .filter(|t| t.depends_on.iter().any(|d| d == task_id))
        .collect()
}

/// The dependent closure of `task_id` (excluding itself), in spec order.
/// Used by cascade deletion.
pub fn dependent_closure(doc: &SpecDoc, task_id: &str) -> Vec<String> {
    let mut affected: HashSet<&str> = HashSet::new();
    affected.insert(task_id);
    // Tasks appear after nothing in particular, so iterate to fixpoint.
    loop {
        let before = affected.len();
        for task in live_tasks(doc) {
            if affected.contains(task.id.as_str()) {
                continue;
            }
            if task.depends_on.iter().any(|d| affected.contains(d.as_str())) {
                affected.insert(task.id.as_str());
            }
        }
        if affected.len() == before {
            break;
        }
    }
    live_tasks(doc)
        .filter(|t| t.id.as_str() != task_id && affected.contains(t.id.as_str()))
        .map(|t| t.id.as_str().to_string())
        .collect()
}

/// Kahn's algorithm with spec-insertion order as the tie-break, so the
/// exported order is reproducible. Assumes a validated (acyclic) document.
pub fn topo_order(doc: &SpecDoc) -> Vec<String> {
    let live: Vec<&Task> = live_tasks(doc).collect();
    let live_ids: HashSet<&str> = live.iter().map(|t| t.id.as_str()).collect();

    let mut in_degree: HashMap<&str, usize> = HashMap::new();
    for task in &live {
        let degree = task
            .depends_on
            .iter()
            .filter(|d| live_ids.contains(d.as_str()))
            .count();
        in_degree.insert(task.id.as_str(), degree);
    }

    let mut order = Vec::with_capacity(live.len());
    let mut emitted: HashSet<&str> = HashSet::new();
    while order.len() < live.len() {
        let mut progressed = false;
        for task in &live {
            let id = task.id.as_str();
            if emitted.contains(id) || in_degree.get(id).copied().unwrap_or(0) > 0 {
                continue;
            }
            emitted.insert(id);
            order.push(id.to_string());
            progressed = true;
            for dependent in &live {
                if dependent.depends_on.iter().any(|d| d == id) {
                    if let Some(degree) = in_degree.get_mut(dependent.id.as_str()) {
                        *degree = degree.saturating_sub(1);
                    }
                }
            }
        }
        if !progressed {
            break; // cycle; validation reports it elsewhere
        }
    }
    order
}

fn live_tasks(doc: &SpecDoc) -> impl Iterator<Item = &Task> {
    doc.tasks.iter().filter(|t| t.status != TaskStatus::Deleted)
}
