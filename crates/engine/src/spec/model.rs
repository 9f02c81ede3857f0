#![forbid(unsafe_code)]

//! Typed spec-plane model and its YAML codec.
//!
//! The codec is hand-driven over `serde_yaml::Value` instead of derived:
//! task order and field order must be stable across rewrites (the file is
//! committed and diffed), and unknown fields at the document, project, and
//! task level must survive a load/save cycle untouched.

use crate::clock::{ms_to_rfc3339, rfc3339_to_ms};
use crate::error::{EngineError, InvariantKind};
use ls_core::ids::TaskId;
use ls_core::model::TaskStatus;
use serde_yaml::{Mapping, Value};

pub const TITLE_MAX_CHARS: usize = 200;

#[derive(Clone, Debug)]
pub struct Project {
    pub name: String,
    pub default_branch: String,
    pub extra: Mapping,
}

impl Project {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            default_branch: "main".to_string(),
            extra: Mapping::new(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PrdRef {
    pub anchor: String,
    /// 1-based inclusive line range; overrides the anchor when present.
    pub lines: Option<(u64, u64)>,
}

#[derive(Clone, Debug)]
pub struct PrdBinding {
    pub source: String,
    pub refs: Vec<PrdRef>,
    pub excerpt: String,
    pub hash: String,
}

#[derive(Clone, Debug)]
pub struct Task {
    pub id: TaskId,
    pub title: String,
    pub description: String,
    pub acceptance_criteria: String,
    pub status: TaskStatus,
    pub priority: i64,
    pub labels: Vec<String>,
    pub depends_on: Vec<String>,
    pub locks: Vec<String>,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
    pub prd: Option<PrdBinding>,
    pub extra: Mapping,
}

#[derive(Clone, Debug)]
pub struct SpecDoc {
    pub project: Project,
    pub tasks: Vec<Task>,
    pub extra: Mapping,
}

impl SpecDoc {
    pub fn new(project: Project) -> Self {
        Self {
            project,
            tasks: Vec::new(),
            extra: Mapping::new(),
        }
    }

    pub fn get_task(&self, task_id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id.as_str() == task_id)
    }

    pub fn get_task_mut(&mut self, task_id: &str) -> Option<&mut Task> {
        self.tasks.iter_mut().find(|t| t.id.as_str() == task_id)
    }

    pub fn contains(&self, task_id: &str) -> bool {
        self.get_task(task_id).is_some()
    }

    /// Ids of verified tasks, for readiness checks.
    pub fn verified_ids(&self) -> Vec<&str> {
        self.tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Verified)
            .map(|t| t.id.as_str())
            .collect()
    }
}

fn malformed(message: impl Into<String>) -> EngineError {
    EngineError::SpecMalformed {
        message: message.into(),
    }
}

fn expect_str(value: &Value, context: &str) -> Result<String, EngineError> {
    value
        .as_str()
        .map(|s| s.to_string())
        .ok_or_else(|| malformed(format!("{context} must be a string")))
}

fn string_list(value: &Value, context: &str) -> Result<Vec<String>, EngineError> {
    let Some(seq) = value.as_sequence() else {
        return Err(malformed(format!("{context} must be a list of strings")));
    };
    let mut out = Vec::with_capacity(seq.len());
    for item in seq {
        out.push(expect_str(item, context)?);
    }
    Ok(out)
}

fn timestamp_ms(value: &Value, context: &str) -> Result<i64, EngineError> {
    let raw = expect_str(value, context)?;
    rfc3339_to_ms(&raw)
        .ok_or_else(|| malformed(format!("{context} is not an RFC 3339 timestamp: {raw}")))
}

pub fn decode(text: &str) -> Result<SpecDoc, EngineError> {
    let root: Value =
        serde_yaml::from_str(text).map_err(|err| malformed(format!("invalid yaml: {err}")))?;
    let root = match root {
        Value::Null => Mapping::new(),
        Value::Mapping(mapping) => mapping,
        _ => return Err(malformed("document root must be a mapping")),
    };

    let mut project = Project::new("unnamed");
    let mut tasks = Vec::new();
    let mut extra = Mapping::new();

    for (key, value) in root {
        let Some(key_str) = key.as_str() else {
            extra.insert(key, value);
            continue;
        };
        match key_str {
            "project" => project = decode_project(&value)?,
            "tasks" => tasks = decode_tasks(&value)?,
            _ => {
                extra.insert(key, value);
            }
        }
    }

    Ok(SpecDoc {
        project,
        tasks,
        extra,
    })
}

fn decode_project(value: &Value) -> Result<Project, EngineError> {
    let Some(mapping) = value.as_mapping() else {
        return Err(malformed("project must be a mapping"));
    };
    let mut project = Project::new("unnamed");
    for (key, value) in mapping {
        let Some(key_str) = key.as_str() else {
            project.extra.insert(key.clone(), value.clone());
            continue;
        };
        match key_str {
            "name" => project.name = expect_str(value, "project.name")?,
            "default_branch" => {
                project.default_branch = expect_str(value, "project.default_branch")?
            }
            _ => {
                project.extra.insert(key.clone(), value.clone());
            }
        }
    }
    Ok(project)
}

fn decode_tasks(value: &Value) -> Result<Vec<Task>, EngineError> {
    let Some(mapping) = value.as_mapping() else {
        return Err(malformed("tasks must be a mapping of task id to task"));
    };
    let mut tasks = Vec::with_capacity(mapping.len());
    for (key, value) in mapping {
        let key_str = expect_str(key, "task id key")?;
        let id = TaskId::try_new(key_str.clone())
            .map_err(|err| malformed(format!("task id {key_str:?}: {err}")))?;
        tasks.push(decode_task(id, value)?);
    }
    Ok(tasks)
}

fn decode_task(id: TaskId, value: &Value) -> Result<Task, EngineError> {
    let Some(mapping) = value.as_mapping() else {
        return Err(malformed(format!("task {id} must be a mapping")));
    };

    let mut task = Task {
        id,
        title: String::new(),
        description: String::new(),
        acceptance_criteria: String::new(),
        status: TaskStatus::Ready,
        priority: 100,
        labels: Vec::new(),
        depends_on: Vec::new(),
        locks: Vec::new(),
        created_at_ms: 0,
        updated_at_ms: 0,
        prd: None,
        extra: Mapping::new(),
    };

    for (key, value) in mapping {
        let Some(key_str) = key.as_str() else {
            task.extra.insert(key.clone(), value.clone());
            continue;
        };
        let context = format!("task {}", task.id);
        match key_str {
            "id" => {
                let inner = expect_str(value, &format!("{context}.id"))?;
                if inner != task.id.as_str() {
                    return Err(malformed(format!(
                        "{context}: id field {inner:?} does not match its key"
                    )));
                }
            }
            "title" => task.title = expect_str(value, &format!("{context}.title"))?,
            "description" => {
                task.description = expect_str(value, &format!("{context}.description"))?
            }
            "acceptance_criteria" => {
                task.acceptance_criteria =
                    expect_str(value, &format!("{context}.acceptance_criteria"))?
            }
            "status" => {
                let raw = expect_str(value, &format!("{context}.status"))?;
                task.status = TaskStatus::parse(&raw).ok_or(EngineError::SpecInvariant {
                    kind: InvariantKind::BadStatus,
                    detail: format!("task {} has unknown status {raw:?}", task.id),
                })?;
            }
            "priority" => {
                task.priority = value
                    .as_i64()
                    .ok_or_else(|| malformed(format!("{context}.priority must be an integer")))?;
            }
            "labels" => task.labels = string_list(value, &format!("{context}.labels"))?,
            "depends_on" => {
                task.depends_on = string_list(value, &format!("{context}.depends_on"))?
            }
            "locks" => task.locks = string_list(value, &format!("{context}.locks"))?,
            "created_at" => {
                task.created_at_ms = timestamp_ms(value, &format!("{context}.created_at"))?
            }
            "updated_at" => {
                task.updated_at_ms = timestamp_ms(value, &format!("{context}.updated_at"))?
            }
            "prd" => task.prd = Some(decode_prd(value, &context)?),
            _ => {
                task.extra.insert(key.clone(), value.clone());
            }
        }
    }

    if task.title.is_empty() {
        return Err(malformed(format!("task {} has no title", task.id)));
    }
    Ok(task)
}

fn decode_prd(value: &Value, context: &str) -> Result<PrdBinding, EngineError> {
    let Some(mapping) = value.as_mapping() else {
        return Err(malformed(format!("{context}.prd must be a mapping")));
    };
    let mut binding = PrdBinding {
        source: String::new(),
        refs: Vec::new(),
        excerpt: String::new(),
        hash: String::new(),
    };
    for (key, value) in mapping {
        match key.as_str() {
            Some("source") => binding.source = expect_str(value, "prd.source")?,
            Some("excerpt") => binding.excerpt = expect_str(value, "prd.excerpt")?,
            Some("hash") => binding.hash = expect_str(value, "prd.hash")?,
            Some("refs") => {
                let Some(seq) = value.as_sequence() else {
                    return Err(malformed("prd.refs must be a list"));
                };
                for item in seq {
                    binding.refs.push(decode_prd_ref(item)?);
                }
            }
            _ => {}
        }
    }
    if binding.source.is_empty() {
        return Err(malformed(format!("{context}.prd.source is required")));
    }
    Ok(binding)
}

fn decode_prd_ref(value: &Value) -> Result<PrdRef, EngineError> {
    let Some(mapping) = value.as_mapping() else {
        return Err(malformed("prd ref must be a mapping"));
    };
    let mut anchor = String::new();
    let mut lines = None;
    for (key, value) in mapping {
        match key.as_str() {
            Some("anchor") => anchor = expect_str(value, "prd ref anchor")?,
            Some("lines") => {
                let Some(seq) = value.as_sequence() else {
                    return Err(malformed("prd ref lines must be [start, end]"));
                };
                if seq.len() != 2 {
                    return Err(malformed("prd ref lines must be [start, end]"));
                }
                let start = seq[0]
                    .as_u64()
                    .ok_or_else(|| malformed("prd ref line start must be a positive integer"))?;
                let end = seq[1]
                    .as_u64()
                    .ok_or_else(|| malformed("prd ref line end must be a positive integer"))?;
                if start == 0 || end < start {
                    return Err(malformed("prd ref lines must satisfy 1 <= start <= end"));
                }
                lines = Some((start, end));
            }
            _ => {}
        }
    }
    if anchor.is_empty() && lines.is_none() {
        return Err(malformed("prd ref needs an anchor or a line range"));
    }
    Ok(PrdRef { anchor, lines })
}

pub fn encode(doc: &SpecDoc) -> Result<String, EngineError> {
    let mut root = Mapping::new();

    let mut project = Mapping::new();
    project.insert(
        Value::String("name".to_string()),
        Value::String(doc.project.name.clone()),
    );
    project.insert(
        Value::String("default_branch".to_string()),
        Value::String(doc.project.default_branch.clone()),
    );
    for (key, value) in &doc.project.extra {
        project.insert(key.clone(), value.clone());
    }
    root.insert(
        Value::String("project".to_string()),
        Value::Mapping(project),
    );

    let mut tasks = Mapping::new();
    for task in &doc.tasks {
        tasks.insert(
            Value::String(task.id.as_str().to_string()),
            Value::Mapping(encode_task(task)),
        );
    }
    root.insert(Value::String("tasks".to_string()), Value::Mapping(tasks));

    for (key, value) in &doc.extra {
        root.insert(key.clone(), value.clone());
    }

    serde_yaml::to_string(&Value::Mapping(root)).map_err(|err| EngineError::RuntimeCorrupt {
        message: format!("spec serialization failed: {err}"),
    })
}

fn encode_task(task: &Task) -> Mapping {
    fn put(mapping: &mut Mapping, key: &str, value: Value) {
        mapping.insert(Value::String(key.to_string()), value);
    }
    fn str_list(items: &[String]) -> Value {
        Value::Sequence(items.iter().map(|s| Value::String(s.clone())).collect())
    }

    let mut out = Mapping::new();
    put(&mut out, "id", Value::String(task.id.as_str().to_string()));
    put(&mut out, "title", Value::String(task.title.clone()));
    put(&mut out, "description", Value::String(task.description.clone()));
    put(
        &mut out,
        "acceptance_criteria",
        Value::String(task.acceptance_criteria.clone()),
    );
    put(
        &mut out,
        "status",
        Value::String(task.status.as_str().to_string()),
    );
    put(&mut out, "priority", Value::Number(task.priority.into()));
    put(&mut out, "labels", str_list(&task.labels));
    put(&mut out, "depends_on", str_list(&task.depends_on));
    put(&mut out, "locks", str_list(&task.locks));
    put(
        &mut out,
        "created_at",
        Value::String(ms_to_rfc3339(task.created_at_ms)),
    );
    put(
        &mut out,
        "updated_at",
        Value::String(ms_to_rfc3339(task.updated_at_ms)),
    );
    if let Some(prd) = &task.prd {
        let mut prd_map = Mapping::new();
        put(&mut prd_map, "source", Value::String(prd.source.clone()));
        let refs = prd
            .refs
            .iter()
            .map(|r| {
                let mut ref_map = Mapping::new();
                put(&mut ref_map, "anchor", Value::String(r.anchor.clone()));
                if let Some((start, end)) = r.lines {
                    put(
                        &mut ref_map,
                        "lines",
                        Value::Sequence(vec![
                            Value::Number(start.into()),
                            Value::Number(end.into()),
                        ]),
                    );
                }
                Value::Mapping(ref_map)
            })
            .collect();
        put(&mut prd_map, "refs", Value::Sequence(refs));
        put(&mut prd_map, "excerpt", Value::String(prd.excerpt.clone()));
        put(&mut prd_map, "hash", Value::String(prd.hash.clone()));
        put(&mut out, "prd", Value::Mapping(prd_map));
    }
    for (key, value) in &task.extra {
        out.insert(key.clone(), value.clone());
    }
    out
}
