//! Request and response messages
//!
//! IDs arrive as strings and may be abbreviated; the service resolves them
//! before dispatching.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{Point, Stage, Tags, Task};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AddTaskRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Empty means the configured default user
    #[serde(default)]
    pub user_id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MoveToStagingRequest {
    pub source_id: String,
    #[serde(default)]
    pub destination_id: Option<String>,
    #[serde(default)]
    pub new_location: Vec<String>,
    #[serde(default)]
    pub points: Vec<Point>,
    #[serde(default)]
    pub tags: Tags,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskIdRequest {
    pub id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StopTaskRequest {
    pub id: String,
    #[serde(default)]
    pub points_completed: Vec<Point>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MergeTasksRequest {
    pub from_id: String,
    pub to_id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SplitTaskRequest {
    pub id: String,
    pub new_names: Vec<String>,
    #[serde(default)]
    pub new_descriptions: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AdvertiseTaskRequest {
    pub id: String,
    pub target_ids: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StitchTasksRequest {
    pub source_ids: Vec<String>,
    pub target_id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListTasksRequest {
    #[serde(default)]
    pub stage: Option<Stage>,
    #[serde(default)]
    pub user_id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GetTaskDagRequest {
    #[serde(default)]
    pub user_id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateTaskTagsRequest {
    pub id: String,
    pub tags: Tags,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SetDueDateRequest {
    pub id: String,
    #[serde(default)]
    pub due: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResolveTaskIdRequest {
    pub partial_id: String,
    #[serde(default)]
    pub user_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskResponse {
    pub task: Task,
}

#[derive(Debug, Clone, Serialize)]
pub struct TasksResponse {
    pub tasks: Vec<Task>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StopTaskResponse {
    pub task: Task,
    pub completed: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct DagNode {
    pub task: Task,
    /// Shortest prefix that identifies the task unambiguously
    pub short_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct GetTaskDagResponse {
    pub nodes: Vec<DagNode>,
    pub rendered: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResolveTaskIdResponse {
    pub id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct IntegrityReport {
    pub healthy: bool,
    pub violations: Vec<String>,
}
