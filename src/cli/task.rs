//! Task CLI commands

use std::sync::Arc;

use anyhow::{bail, Result};
use chrono::{DateTime, NaiveDate, Utc};
use clap::Subcommand;
use tracing::{debug, warn};

use super::output::Output;
use crate::domain::{Point, Stage, TagValue, Tags, Task};
use crate::engine::background::{JobOutcome, TracingNotifier};
use crate::engine::TaskEngine;
use crate::service::*;
use crate::storage::{RequestContext, Workspace};

#[derive(Subcommand)]
pub enum TaskCommands {
    /// Add a task to the inbox
    Add {
        /// Task name
        name: String,

        /// Longer description
        #[arg(long, short, default_value = "")]
        description: String,

        /// Owner (defaults to engine.default_user)
        #[arg(long, default_value = "")]
        user: String,
    },

    /// Move a task to staging, after another task or at a location
    ///
    /// Examples:
    ///   tasker stage t-1a2b --location work/backend
    ///   tasker stage t-1a2b --after t-9f8e --point design=3
    Stage {
        /// Task ID (prefixes accepted)
        id: String,

        /// Task this one should follow
        #[arg(long, conflicts_with = "location")]
        after: Option<String>,

        /// Slash-separated location path
        #[arg(long)]
        location: Option<String>,

        /// Effort point, repeatable
        #[arg(long = "point", value_name = "TITLE=VALUE", value_parser = parse_point)]
        points: Vec<Point>,

        /// Text tag, repeatable
        #[arg(long = "tag", value_name = "KEY=VALUE", value_parser = parse_tag)]
        tags: Vec<(String, TagValue)>,
    },

    /// Start work on a task
    Start {
        id: String,
    },

    /// Stop work on a task, recording completed points
    Stop {
        id: String,

        #[arg(long = "point", value_name = "TITLE=VALUE", value_parser = parse_point)]
        points: Vec<Point>,
    },

    /// Mark a task as complete
    Complete {
        id: String,
    },

    /// Merge one task into another
    Merge {
        /// Task to fold in (deleted afterwards)
        from: String,

        /// Task that remains
        to: String,
    },

    /// Replace a task with a chain of new tasks
    Split {
        id: String,

        /// Name of a new task, repeatable
        #[arg(long = "name", required = true)]
        names: Vec<String>,

        /// Description for the new task at the same position
        #[arg(long = "description")]
        descriptions: Vec<String>,
    },

    /// Make other tasks depend on this one
    Advertise {
        id: String,

        #[arg(required = true)]
        targets: Vec<String>,
    },

    /// Make a task depend on several others
    Stitch {
        /// Task that will wait on the sources
        target: String,

        #[arg(required = true)]
        sources: Vec<String>,
    },

    /// Set tags on a task
    Tag {
        id: String,

        #[arg(value_name = "KEY=VALUE", value_parser = parse_tag, required = true)]
        tags: Vec<(String, TagValue)>,
    },

    /// Set or clear a task's due date
    Due {
        id: String,

        /// RFC 3339 timestamp or YYYY-MM-DD
        #[arg(value_parser = parse_due, required_unless_present = "clear")]
        date: Option<DateTime<Utc>>,

        #[arg(long, conflicts_with = "date")]
        clear: bool,
    },

    /// List tasks
    List {
        #[arg(long)]
        stage: Option<Stage>,

        #[arg(long)]
        user: Option<String>,
    },

    /// Show task details
    Show {
        id: String,
    },

    /// Show tasks in dependency order
    Dag {
        #[arg(long)]
        user: Option<String>,
    },

    /// Scan the store for broken links and cycles
    Check,
}

/// An open workspace with an engine wired over its stores
pub struct Session {
    workspace: Workspace,
    service: TaskService,
}

impl Session {
    pub fn open() -> Result<Self> {
        let workspace = Workspace::open_current()?;
        let config = &workspace.config().workspace;

        let mut engine = TaskEngine::new(Arc::new(workspace.task_repository()), config.engine.clone())
            .with_notifier(Arc::new(TracingNotifier))
            .with_background(&config.background);
        if let Some(users) = workspace.user_repository() {
            engine = engine.with_users(Arc::new(users));
        }
        debug!(root = %workspace.root().display(), "workspace opened");

        Ok(Self {
            service: TaskService::new(Arc::new(engine)),
            workspace,
        })
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    pub fn service(&self) -> &TaskService {
        &self.service
    }

    /// Waits for background jobs so nothing is cut off at exit
    pub fn finish(self) {
        for outcome in self.service.engine().background().drain() {
            match outcome {
                JobOutcome::Completed => {}
                other => warn!(outcome = ?other, "background job did not complete"),
            }
        }
    }
}

pub fn run(cmd: TaskCommands, session: &Session, output: &Output) -> Result<()> {
    let svc = session.service();
    let ctx = RequestContext::new();

    match cmd {
        TaskCommands::Add { name, description, user } => {
            let resp = svc.add_task(&ctx, AddTaskRequest { name, description, user_id: user })?;
            output.task("Added", &resp.task);
        }
        TaskCommands::Stage { id, after, location, points, tags } => {
            let resp = svc.move_to_staging(
                &ctx,
                MoveToStagingRequest {
                    source_id: id,
                    destination_id: after,
                    new_location: location.as_deref().map(split_location).unwrap_or_default(),
                    points,
                    tags: tags.into_iter().collect(),
                },
            )?;
            output.task("Staged", &resp.task);
        }
        TaskCommands::Start { id } => {
            let resp = svc.start_task(&ctx, TaskIdRequest { id })?;
            output.task("Started", &resp.task);
        }
        TaskCommands::Stop { id, points } => {
            let resp = svc.stop_task(&ctx, StopTaskRequest { id, points_completed: points })?;
            if output.is_json() {
                output.data(&resp);
            } else if resp.completed {
                output.task("Stopped and completed", &resp.task);
            } else {
                output.task("Stopped", &resp.task);
                println!(
                    "Progress: {}/{} points",
                    resp.task.completed_points(),
                    resp.task.total_points()
                );
            }
        }
        TaskCommands::Complete { id } => {
            let resp = svc.complete_task(&ctx, TaskIdRequest { id })?;
            output.task("Completed", &resp.task);
        }
        TaskCommands::Merge { from, to } => {
            let resp = svc.merge_tasks(&ctx, MergeTasksRequest { from_id: from, to_id: to })?;
            output.task("Merged into", &resp.task);
        }
        TaskCommands::Split { id, names, mut descriptions } => {
            if descriptions.len() < names.len() {
                descriptions.resize(names.len(), String::new());
            }
            let resp = svc.split_task(
                &ctx,
                SplitTaskRequest {
                    id,
                    new_names: names,
                    new_descriptions: descriptions,
                },
            )?;
            print_tasks(output, "Created", &resp.tasks);
        }
        TaskCommands::Advertise { id, targets } => {
            let resp = svc.advertise_task(&ctx, AdvertiseTaskRequest { id, target_ids: targets })?;
            output.task("Advertised", &resp.task);
        }
        TaskCommands::Stitch { target, sources } => {
            let resp = svc.stitch_tasks(
                &ctx,
                StitchTasksRequest {
                    source_ids: sources,
                    target_id: target,
                },
            )?;
            print_tasks(output, "Linked", &resp.tasks);
        }
        TaskCommands::Tag { id, tags } => {
            let resp = svc.update_task_tags(
                &ctx,
                UpdateTaskTagsRequest {
                    id,
                    tags: tags.into_iter().collect::<Tags>(),
                },
            )?;
            output.task("Tagged", &resp.task);
        }
        TaskCommands::Due { id, date, clear } => {
            let due = if clear { None } else { date };
            let resp = svc.set_due_date(&ctx, SetDueDateRequest { id, due })?;
            output.task("Updated", &resp.task);
        }
        TaskCommands::List { stage, user } => {
            let resp = svc.list_tasks(&ctx, ListTasksRequest { stage, user_id: user })?;
            list_tasks(output, &resp.tasks);
        }
        TaskCommands::Show { id } => {
            let resp = svc.get_task(&ctx, TaskIdRequest { id })?;
            show_task(output, &resp.task);
        }
        TaskCommands::Dag { user } => {
            let resp = svc.get_task_dag(&ctx, GetTaskDagRequest { user_id: user })?;
            if output.is_json() {
                output.data(&resp.nodes);
            } else if resp.nodes.is_empty() {
                println!("No tasks");
            } else {
                print!("{}", resp.rendered);
            }
        }
        TaskCommands::Check => {
            let report = svc.check_integrity(&ctx)?;
            if output.is_json() {
                output.data(&report);
            } else if report.healthy {
                println!("Task graph is consistent");
            } else {
                for violation in &report.violations {
                    println!("  {}", violation);
                }
            }
            if !report.healthy {
                bail!("integrity check found {} violation(s)", report.violations.len());
            }
        }
    }

    Ok(())
}

fn print_tasks(output: &Output, verb: &str, tasks: &[Task]) {
    if output.is_json() {
        output.data(&tasks);
    } else {
        for task in tasks {
            output.task(verb, task);
        }
    }
}

fn list_tasks(output: &Output, tasks: &[Task]) {
    if output.is_json() {
        output.data(&tasks);
        return;
    }
    if tasks.is_empty() {
        println!("No tasks");
        return;
    }

    println!("{:<12} {:<9} {:<12} {:<8} NAME", "ID", "STAGE", "STATUS", "POINTS");
    println!("{}", "-".repeat(60));
    for task in tasks {
        let points = format!("{}/{}", task.completed_points(), task.total_points());
        println!(
            "{:<12} {:<9} {:<12} {:<8} {}",
            task.id.as_str(),
            task.stage.as_str(),
            task.status.as_str(),
            points,
            task.name
        );
    }
}

fn show_task(output: &Output, task: &Task) {
    if output.is_json() {
        output.data(task);
        return;
    }

    println!("Task: {}", task.id);
    println!("Name: {}", task.name);
    println!("Owner: {}", task.user_id);
    println!("Stage: {}", task.stage);
    println!("Status: {}", task.status);
    if !task.location.is_empty() {
        println!("Location: {}", task.location_path());
    }
    println!("Points: {}/{}", task.completed_points(), task.total_points());
    if let Some(due) = task.schedule.due {
        println!("Due: {}", due.format("%Y-%m-%d %H:%M"));
    }
    println!("Created: {}", task.created_at.format("%Y-%m-%d %H:%M"));
    println!("Updated: {}", task.updated_at.format("%Y-%m-%d %H:%M"));

    if !task.description.is_empty() {
        println!("\nDescription:");
        println!("{}", task.description);
    }

    if !task.inflows.is_empty() {
        println!("\nDepends on:");
        for id in &task.inflows {
            println!("  {}", id);
        }
    }
    if !task.outflows.is_empty() {
        println!("\nEnables:");
        for id in &task.outflows {
            println!("  {}", id);
        }
    }

    if !task.tags.is_empty() {
        println!("\nTags:");
        for (key, value) in &task.tags {
            println!("  {}: {}", key, value);
        }
    }

    if !task.status_history.is_empty() {
        println!("\nHistory:");
        for update in &task.status_history {
            println!("  {}  {}", update.time.format("%Y-%m-%d %H:%M"), update.note);
        }
    }
}

fn split_location(raw: &str) -> Vec<String> {
    raw.split('/')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

fn parse_point(raw: &str) -> Result<Point, String> {
    let (title, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected TITLE=VALUE, got '{}'", raw))?;
    let value: u32 = value
        .trim()
        .parse()
        .map_err(|_| format!("point value must be a non-negative integer, got '{}'", value))?;
    Ok(Point::new(title.trim(), value))
}

fn parse_tag(raw: &str) -> Result<(String, TagValue), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{}'", raw))?;
    let key = key.trim();
    if key.is_empty() {
        return Err("tag key must not be empty".to_string());
    }
    Ok((key.to_string(), TagValue::Text(value.to_string())))
}

fn parse_due(raw: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
        .ok_or_else(|| format!("expected RFC 3339 or YYYY-MM-DD, got '{}'", raw))
}
