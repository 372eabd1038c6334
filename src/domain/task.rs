//! Task domain model
//!
//! Tasks are units of work that move through a pipeline of stages
//! (`Pending → Inbox → Staging → Active → Archived`) and form a directed
//! dependency graph through their inflows (predecessors) and outflows
//! (successors).

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::id::{TaskId, UserId};

/// Pipeline position of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    #[default]
    Pending,
    Inbox,
    Staging,
    Active,
    Archived,
}

impl Stage {
    pub const ALL: [Stage; 5] = [
        Stage::Pending,
        Stage::Inbox,
        Stage::Staging,
        Stage::Active,
        Stage::Archived,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Pending => "pending",
            Stage::Inbox => "inbox",
            Stage::Staging => "staging",
            Stage::Active => "active",
            Stage::Archived => "archived",
        }
    }

    /// Returns true if no lifecycle operation can move the task out of this stage
    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::Archived)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Stage::ALL
            .into_iter()
            .find(|stage| stage.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown stage '{}'", s))
    }
}

/// Work state of a task, correlated with but distinct from its stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Todo,
    InProgress,
    Paused,
    Blocked,
    Completed,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Todo => "todo",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Paused => "paused",
            TaskStatus::Blocked => "blocked",
            TaskStatus::Completed => "completed",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    /// Returns true if this status represents completion
    pub fn is_complete(&self) -> bool {
        matches!(self, TaskStatus::Completed)
    }

    /// Returns true if no further work is expected on the task
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Cancelled)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named, weighted unit of effort
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Point {
    pub title: String,
    pub value: u32,
}

impl Point {
    pub fn new(title: impl Into<String>, value: u32) -> Self {
        Self {
            title: title.into(),
            value,
        }
    }
}

/// A span of active work on a task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkInterval {
    pub start: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub points_completed: Vec<Point>,
}

impl WorkInterval {
    pub fn is_open(&self) -> bool {
        self.stop.is_none()
    }

    pub fn completed_value(&self) -> u64 {
        self.points_completed.iter().map(|p| u64::from(p.value)).sum()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub work_intervals: Vec<WorkInterval>,
}

impl Schedule {
    /// Returns the most recent interval if it is still open
    pub fn open_interval_mut(&mut self) -> Option<&mut WorkInterval> {
        self.work_intervals.last_mut().filter(|i| i.is_open())
    }

    pub fn has_open_interval(&self) -> bool {
        self.work_intervals.last().is_some_and(|i| i.is_open())
    }
}

/// One entry of the append-only audit trail
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub time: DateTime<Utc>,
    pub note: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoLocation {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub address: String,
}

/// Typed tag value
///
/// Serialized adjacently tagged (`{"type": "text", "value": ""}`) so the
/// variant survives even when the payload is empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum TagValue {
    Text(String),
    Location(GeoLocation),
    Time(DateTime<Utc>),
}

impl TagValue {
    pub fn kind(&self) -> &'static str {
        match self {
            TagValue::Text(_) => "text",
            TagValue::Location(_) => "location",
            TagValue::Time(_) => "time",
        }
    }
}

impl fmt::Display for TagValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TagValue::Text(s) => f.write_str(s),
            TagValue::Location(loc) if loc.address.is_empty() => {
                write!(f, "{},{}", loc.latitude, loc.longitude)
            }
            TagValue::Location(loc) => {
                write!(f, "{} ({},{})", loc.address, loc.latitude, loc.longitude)
            }
            TagValue::Time(t) => write!(f, "{}", t.to_rfc3339()),
        }
    }
}

pub type Tags = BTreeMap<String, TagValue>;

/// Ordered, duplicate-free set of neighbouring task IDs
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Flows(Vec<TaskId>);

impl Flows {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Adds an ID, returning false if it was already present
    pub fn add(&mut self, id: TaskId) -> bool {
        if self.0.contains(&id) {
            false
        } else {
            self.0.push(id);
            true
        }
    }

    pub fn remove(&mut self, id: &TaskId) -> bool {
        let len_before = self.0.len();
        self.0.retain(|existing| existing != id);
        self.0.len() != len_before
    }

    /// Rewrites `old` to `new` in place, dropping the entry if `new` is
    /// already present or equals `owner` (a task never references itself)
    pub fn replace(&mut self, old: &TaskId, new: &TaskId, owner: &TaskId) -> bool {
        let Some(pos) = self.0.iter().position(|id| id == old) else {
            return false;
        };
        if new == owner || self.0.contains(new) {
            self.0.remove(pos);
        } else {
            self.0[pos] = new.clone();
        }
        true
    }

    pub fn contains(&self, id: &TaskId) -> bool {
        self.0.contains(id)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TaskId> {
        self.0.iter()
    }

    pub fn as_slice(&self) -> &[TaskId] {
        &self.0
    }
}

impl<'a> IntoIterator for &'a Flows {
    type Item = &'a TaskId;
    type IntoIter = std::slice::Iter<'a, TaskId>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl FromIterator<TaskId> for Flows {
    fn from_iter<T: IntoIterator<Item = TaskId>>(iter: T) -> Self {
        let mut flows = Flows::new();
        for id in iter {
            flows.add(id);
        }
        flows
    }
}

/// A lifecycle precondition that the task does not meet
#[derive(Debug, Clone, Error, PartialEq)]
#[error("task {task} is in stage {stage}: {reason}")]
pub struct TransitionError {
    pub task: TaskId,
    pub stage: Stage,
    pub reason: &'static str,
}

/// The central entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,

    pub user_id: UserId,

    pub name: String,

    #[serde(default)]
    pub description: String,

    pub stage: Stage,

    pub status: TaskStatus,

    /// Hierarchical path; empty until staged
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub location: Vec<String>,

    /// Declared units of effort required to finish
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub points: Vec<Point>,

    #[serde(default)]
    pub schedule: Schedule,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub status_history: Vec<StatusUpdate>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: Tags,

    /// Predecessors
    #[serde(default, skip_serializing_if = "Flows::is_empty")]
    pub inflows: Flows,

    /// Successors
    #[serde(default, skip_serializing_if = "Flows::is_empty")]
    pub outflows: Flows,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calendar_event_id: Option<String>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,

    /// Write counter maintained by the repository for optimistic concurrency
    #[serde(default)]
    pub version: u64,
}

impl Task {
    /// Creates a new pending task with a freshly generated ID
    pub fn new(name: impl Into<String>, description: impl Into<String>, user_id: UserId) -> Self {
        let now = Utc::now();
        let name = name.into();
        Self {
            id: TaskId::generate(&name, now),
            user_id,
            name,
            description: description.into(),
            stage: Stage::Pending,
            status: TaskStatus::Todo,
            location: Vec::new(),
            points: Vec::new(),
            schedule: Schedule::default(),
            status_history: Vec::new(),
            tags: Tags::new(),
            inflows: Flows::new(),
            outflows: Flows::new(),
            calendar_event_id: None,
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }

    /// Sum of declared point values
    pub fn total_points(&self) -> u64 {
        self.points.iter().map(|p| u64::from(p.value)).sum()
    }

    /// Sum of completed point values across all work intervals
    pub fn completed_points(&self) -> u64 {
        self.schedule
            .work_intervals
            .iter()
            .map(WorkInterval::completed_value)
            .sum()
    }

    /// What is left of each declared point.
    ///
    /// Completed points are matched to declared ones by title, in
    /// declaration order; fully covered points are omitted.
    pub fn outstanding_points(&self) -> Vec<Point> {
        let mut done: BTreeMap<&str, u64> = BTreeMap::new();
        for point in self
            .schedule
            .work_intervals
            .iter()
            .flat_map(|interval| &interval.points_completed)
        {
            *done.entry(point.title.as_str()).or_default() += u64::from(point.value);
        }

        self.points
            .iter()
            .filter_map(|declared| {
                let credited = done.entry(declared.title.as_str()).or_default();
                let used = (*credited).min(u64::from(declared.value));
                *credited -= used;
                let left = declared.value - u32::try_from(used).unwrap_or(declared.value);
                (left > 0).then(|| Point::new(declared.title.clone(), left))
            })
            .collect()
    }

    /// Points accounting: completed ≥ declared.
    ///
    /// A task with no declared points counts as complete only when
    /// `zero_points_complete` is set.
    pub fn is_complete(&self, zero_points_complete: bool) -> bool {
        let total = self.total_points();
        if total == 0 {
            return zero_points_complete;
        }
        self.completed_points() >= total
    }

    /// Two tasks are in the same chain when their location paths are identical
    pub fn same_chain(&self, other: &Task) -> bool {
        self.location == other.location
    }

    pub fn location_path(&self) -> String {
        self.location.join("/")
    }

    fn violation(&self, reason: &'static str) -> TransitionError {
        TransitionError {
            task: self.id.clone(),
            stage: self.stage,
            reason,
        }
    }

    pub fn can_move_to_staging(&self) -> Result<(), TransitionError> {
        match self.stage {
            Stage::Pending | Stage::Inbox => Ok(()),
            _ => Err(self.violation("only pending or inbox tasks can be staged")),
        }
    }

    /// Stage/status preconditions for starting; dependency checks happen elsewhere
    pub fn can_start(&self) -> Result<(), TransitionError> {
        if !matches!(self.stage, Stage::Pending | Stage::Staging) {
            return Err(self.violation("only pending or staging tasks can be started"));
        }
        match self.status {
            TaskStatus::InProgress => Err(self.violation("task is already in progress")),
            TaskStatus::Completed => Err(self.violation("task is already completed")),
            TaskStatus::Cancelled => Err(self.violation("task is cancelled")),
            _ => Ok(()),
        }
    }

    pub fn can_stop(&self) -> Result<(), TransitionError> {
        if self.stage != Stage::Active {
            return Err(self.violation("only active tasks can be stopped"));
        }
        if !self.schedule.has_open_interval() {
            return Err(self.violation("task has no open work interval"));
        }
        Ok(())
    }

    /// Completion closes the running interval, so only active tasks qualify
    pub fn can_complete(&self) -> Result<(), TransitionError> {
        if self.stage != Stage::Active {
            return Err(self.violation("only active tasks can be completed"));
        }
        if !self.schedule.has_open_interval() {
            return Err(self.violation("task has no open work interval"));
        }
        Ok(())
    }

    /// Appends an audit entry and bumps `updated_at`
    pub fn add_status_update(&mut self, note: impl Into<String>) {
        let now = Utc::now();
        self.status_history.push(StatusUpdate {
            time: now,
            note: note.into(),
        });
        self.updated_at = now;
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Opens a new work interval starting at `now`
    pub fn open_interval(&mut self, now: DateTime<Utc>) {
        self.schedule.work_intervals.push(WorkInterval {
            start: now,
            stop: None,
            points_completed: Vec::new(),
        });
        self.updated_at = now;
    }

    /// Closes the open interval, recording the completed points.
    ///
    /// Returns false if there was no open interval.
    pub fn close_interval(&mut self, now: DateTime<Utc>, points: Vec<Point>) -> bool {
        match self.schedule.open_interval_mut() {
            Some(interval) => {
                interval.stop = Some(now);
                interval.points_completed.extend(points);
                self.updated_at = now;
                true
            }
            None => false,
        }
    }

    /// Merges tags into this task. Existing keys are kept unless `overwrite` is set.
    pub fn merge_tags(&mut self, tags: Tags, overwrite: bool) {
        for (key, value) in tags {
            if overwrite || !self.tags.contains_key(&key) {
                self.tags.insert(key, value);
            }
        }
        self.touch();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_task(name: &str) -> Task {
        Task::new(name, "", "u1".parse().unwrap())
    }

    #[test]
    fn new_task_is_pending_todo() {
        let task = make_task("A");
        assert_eq!(task.stage, Stage::Pending);
        assert_eq!(task.status, TaskStatus::Todo);
        assert!(task.location.is_empty());
        assert_eq!(task.version, 0);
    }

    #[test]
    fn points_accounting() {
        let mut task = make_task("A");
        assert!(task.is_complete(true));
        assert!(!task.is_complete(false));

        task.points = vec![Point::new("design", 3), Point::new("build", 5)];
        assert_eq!(task.total_points(), 8);

        task.open_interval(Utc::now());
        task.close_interval(Utc::now(), vec![Point::new("design", 3)]);
        assert_eq!(task.completed_points(), 3);
        assert!(!task.is_complete(true));

        task.open_interval(Utc::now());
        task.close_interval(Utc::now(), vec![Point::new("build", 5)]);
        assert!(task.is_complete(false));
    }

    #[test]
    fn close_without_open_interval() {
        let mut task = make_task("A");
        assert!(!task.close_interval(Utc::now(), vec![]));

        task.open_interval(Utc::now());
        assert!(task.schedule.has_open_interval());
        assert!(task.close_interval(Utc::now(), vec![]));
        assert!(!task.schedule.has_open_interval());
    }

    #[test]
    fn stage_preconditions() {
        let mut task = make_task("A");
        assert!(task.can_move_to_staging().is_ok());
        assert!(task.can_start().is_ok());
        assert!(task.can_stop().is_err());

        task.stage = Stage::Active;
        assert!(task.can_move_to_staging().is_err());
        let err = task.can_start().unwrap_err();
        assert_eq!(err.stage, Stage::Active);

        task.stage = Stage::Staging;
        task.status = TaskStatus::Completed;
        assert!(task.can_start().is_err());

        task.stage = Stage::Archived;
        assert!(task.can_complete().is_err());
    }

    #[test]
    fn only_running_tasks_can_complete() {
        let mut task = make_task("A");
        task.stage = Stage::Staging;
        let err = task.can_complete().unwrap_err();
        assert_eq!(err.stage, Stage::Staging);

        task.stage = Stage::Active;
        assert!(task.can_complete().is_err());

        task.open_interval(Utc::now());
        assert!(task.can_complete().is_ok());
    }

    #[test]
    fn outstanding_points_follow_declared_titles() {
        let mut task = make_task("A");
        task.points = vec![Point::new("design", 3), Point::new("code", 5), Point::new("review", 1)];
        task.open_interval(Utc::now());
        task.close_interval(Utc::now(), vec![Point::new("design", 3), Point::new("code", 2)]);

        assert_eq!(
            task.outstanding_points(),
            vec![Point::new("code", 3), Point::new("review", 1)]
        );

        // undeclared titles never offset declared ones
        let mut other = make_task("B");
        other.points = vec![Point::new("code", 2)];
        other.open_interval(Utc::now());
        other.close_interval(Utc::now(), vec![Point::new("misc", 9)]);
        assert_eq!(other.outstanding_points(), vec![Point::new("code", 2)]);
    }

    #[test]
    fn flows_replace_dedupes_and_drops_self() {
        let a: TaskId = "a".parse().unwrap();
        let b: TaskId = "b".parse().unwrap();
        let c: TaskId = "c".parse().unwrap();

        let mut flows: Flows = [a.clone(), b.clone()].into_iter().collect();
        assert!(flows.replace(&a, &c, &"owner".parse().unwrap()));
        assert_eq!(flows.as_slice(), &[c.clone(), b.clone()]);

        // replacing with an existing neighbour collapses the duplicate
        assert!(flows.replace(&c, &b, &"owner".parse().unwrap()));
        assert_eq!(flows.as_slice(), &[b.clone()]);

        // replacing with the owner removes the edge entirely
        assert!(flows.replace(&b, &c, &c));
        assert!(flows.is_empty());
    }

    #[test]
    fn flows_add_is_idempotent() {
        let mut flows = Flows::new();
        assert!(flows.add("x".parse().unwrap()));
        assert!(!flows.add("x".parse().unwrap()));
        assert_eq!(flows.len(), 1);
    }

    #[test]
    fn tag_variant_survives_empty_payload() {
        let value = TagValue::Text(String::new());
        let json = serde_json::to_string(&value).unwrap();
        assert_eq!(json, r#"{"type":"text","value":""}"#);
        let parsed: TagValue = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, value);
    }

    #[test]
    fn merge_tags_respects_overwrite() {
        let mut task = make_task("A");
        task.tags.insert("k".into(), TagValue::Text("mine".into()));

        let mut incoming = Tags::new();
        incoming.insert("k".into(), TagValue::Text("theirs".into()));
        incoming.insert("new".into(), TagValue::Text("v".into()));

        task.merge_tags(incoming.clone(), false);
        assert_eq!(task.tags["k"], TagValue::Text("mine".into()));
        assert_eq!(task.tags["new"], TagValue::Text("v".into()));

        task.merge_tags(incoming, true);
        assert_eq!(task.tags["k"], TagValue::Text("theirs".into()));
    }

    #[test]
    fn serde_roundtrip() {
        let mut task = make_task("A");
        task.location = vec!["x".into(), "y".into()];
        task.inflows.add("t-1".parse().unwrap());
        task.add_status_update("created");

        let json = serde_json::to_string(&task).unwrap();
        let parsed: Task = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, task);
    }

    #[test]
    fn same_chain_compares_full_path() {
        let mut a = make_task("A");
        let mut b = make_task("B");
        a.location = vec!["x".into()];
        b.location = vec!["x".into()];
        assert!(a.same_chain(&b));
        b.location.push("y".into());
        assert!(!a.same_chain(&b));
    }

    #[test]
    fn stage_parse() {
        assert_eq!("Inbox".parse::<Stage>().unwrap(), Stage::Inbox);
        assert!("nowhere".parse::<Stage>().is_err());
    }
}
