//! Topological presentation of a task set
//!
//! Ordering uses Kahn's algorithm. Only inflows that point at tasks inside
//! the presented set count towards in-degree, so a user's sub-graph can be
//! ordered even when it depends on tasks owned by someone else. Ready tasks
//! are drawn in `TaskId` order, which makes the output deterministic.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt::Write;

use thiserror::Error;

use super::id::TaskId;
use super::task::{Stage, Task};

#[derive(Debug, Error, PartialEq)]
pub enum DagError {
    #[error("topological sort covered {ordered} of {total} tasks; unresolved: {unresolved:?}")]
    Incomplete {
        ordered: usize,
        total: usize,
        unresolved: Vec<TaskId>,
    },
}

/// Orders tasks so that every task comes after all of its inflows.
///
/// Fails rather than truncating when the set contains a cycle.
pub fn topological_sort(tasks: Vec<Task>) -> Result<Vec<Task>, DagError> {
    let mut by_id: BTreeMap<TaskId, Task> =
        tasks.into_iter().map(|t| (t.id.clone(), t)).collect();
    let total = by_id.len();

    let mut in_degree: HashMap<TaskId, usize> = HashMap::with_capacity(total);
    let mut successors: HashMap<TaskId, Vec<TaskId>> = HashMap::with_capacity(total);

    for (id, task) in &by_id {
        let mut degree = 0;
        for pred in task.inflows.iter().filter(|p| by_id.contains_key(*p)) {
            degree += 1;
            successors.entry(pred.clone()).or_default().push(id.clone());
        }
        in_degree.insert(id.clone(), degree);
    }

    let mut ready: BTreeSet<TaskId> = in_degree
        .iter()
        .filter(|(_, degree)| **degree == 0)
        .map(|(id, _)| id.clone())
        .collect();

    let mut order: Vec<TaskId> = Vec::with_capacity(total);
    while let Some(id) = ready.pop_first() {
        if let Some(next) = successors.get(&id) {
            for succ in next {
                if let Some(degree) = in_degree.get_mut(succ) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.insert(succ.clone());
                    }
                }
            }
        }
        order.push(id);
    }

    if order.len() < total {
        let placed: BTreeSet<&TaskId> = order.iter().collect();
        let unresolved = by_id
            .keys()
            .filter(|id| !placed.contains(id))
            .cloned()
            .collect();
        return Err(DagError::Incomplete {
            ordered: order.len(),
            total,
            unresolved,
        });
    }

    Ok(order
        .into_iter()
        .filter_map(|id| by_id.remove(&id))
        .collect())
}

/// Assigns each task its depth: the longest inflow path from a root.
///
/// `ordered` must already be topologically sorted.
pub fn levels(ordered: &[Task]) -> HashMap<TaskId, usize> {
    let mut level: HashMap<TaskId, usize> = HashMap::with_capacity(ordered.len());
    for task in ordered {
        let depth = task
            .inflows
            .iter()
            .filter_map(|p| level.get(p))
            .map(|d| d + 1)
            .max()
            .unwrap_or(0);
        level.insert(task.id.clone(), depth);
    }
    level
}

fn stage_icon(stage: Stage) -> &'static str {
    match stage {
        Stage::Pending => "○",
        Stage::Inbox => "□",
        Stage::Staging => "◇",
        Stage::Active => "●",
        Stage::Archived => "✓",
    }
}

/// Renders an ordered task set grouped by level.
///
/// `label` formats the ID shown for each task (e.g. its shortest unique prefix).
pub fn render_text(ordered: &[Task], label: impl Fn(&TaskId) -> String) -> String {
    if ordered.is_empty() {
        return "No tasks to display\n".to_string();
    }

    let depth = levels(ordered);
    let names: HashMap<&TaskId, &str> = ordered.iter().map(|t| (&t.id, t.name.as_str())).collect();
    let name_of = |id: &TaskId| names.get(id).map(|n| n.to_string()).unwrap_or_else(|| id.to_string());

    let mut grouped: BTreeMap<usize, Vec<&Task>> = BTreeMap::new();
    for task in ordered {
        grouped
            .entry(depth.get(&task.id).copied().unwrap_or(0))
            .or_default()
            .push(task);
    }

    let mut out = String::new();
    let _ = writeln!(out, "Task Dependency Graph:");
    let _ = writeln!(out, "{}", "=".repeat(50));
    for (level, tasks) in &grouped {
        let _ = writeln!(out, "\nLevel {}:", level);
        for task in tasks {
            let _ = writeln!(
                out,
                "  {} [{}] {} ({})",
                stage_icon(task.stage),
                label(&task.id),
                task.name,
                task.stage
            );
            if !task.inflows.is_empty() {
                let deps: Vec<String> = task.inflows.iter().map(&name_of).collect();
                let _ = writeln!(out, "    ↑ depends on: {}", deps.join(", "));
            }
            if !task.outflows.is_empty() {
                let next: Vec<String> = task.outflows.iter().map(&name_of).collect();
                let _ = writeln!(out, "    ↓ enables: {}", next.join(", "));
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::graph::{link, TaskMap};

    fn chain(names: &[&str], edges: &[(usize, usize)]) -> (Vec<Task>, Vec<TaskId>) {
        let mut map = TaskMap::new();
        let mut ids = Vec::new();
        for name in names {
            let task = Task::new(*name, "", "u1".parse().unwrap());
            ids.push(task.id.clone());
            map.insert(task.id.clone(), task);
        }
        for (from, to) in edges {
            link(&mut map, &ids[*from], &ids[*to]).unwrap();
        }
        (map.into_values().collect(), ids)
    }

    fn position(order: &[Task], id: &TaskId) -> usize {
        order.iter().position(|t| &t.id == id).unwrap()
    }

    #[test]
    fn empty_set() {
        assert!(topological_sort(vec![]).unwrap().is_empty());
    }

    #[test]
    fn inflows_come_first() {
        let (tasks, ids) = chain(&["A", "B", "C", "D"], &[(0, 1), (1, 2), (0, 3), (3, 2)]);
        let order = topological_sort(tasks).unwrap();
        assert_eq!(order.len(), 4);
        for task in &order {
            for pred in &task.inflows {
                assert!(position(&order, pred) < position(&order, &task.id));
            }
        }
        assert_eq!(order[0].id, ids[0]);
        assert_eq!(order[3].id, ids[2]);
    }

    #[test]
    fn ties_broken_by_id() {
        let (tasks, mut ids) = chain(&["A", "B", "C"], &[]);
        let order = topological_sort(tasks).unwrap();
        ids.sort();
        let got: Vec<TaskId> = order.into_iter().map(|t| t.id).collect();
        assert_eq!(got, ids);
    }

    #[test]
    fn outside_inflows_ignored() {
        let (tasks, ids) = chain(&["A", "B"], &[(0, 1)]);
        let only_b: Vec<Task> = tasks.into_iter().filter(|t| t.id == ids[1]).collect();
        let order = topological_sort(only_b).unwrap();
        assert_eq!(order.len(), 1);
    }

    #[test]
    fn cycle_reported_not_truncated() {
        let (mut tasks, ids) = chain(&["A", "B", "C"], &[(0, 1)]);
        // force B -> A behind the graph module's back
        for task in tasks.iter_mut() {
            if task.id == ids[1] {
                task.outflows.add(ids[0].clone());
            }
            if task.id == ids[0] {
                task.inflows.add(ids[1].clone());
            }
        }
        match topological_sort(tasks) {
            Err(DagError::Incomplete { ordered, total, unresolved }) => {
                assert_eq!(ordered, 1);
                assert_eq!(total, 3);
                assert_eq!(unresolved.len(), 2);
            }
            other => panic!("expected incomplete sort, got {:?}", other),
        }
    }

    #[test]
    fn levels_use_longest_path() {
        let (tasks, ids) = chain(&["A", "B", "C"], &[(0, 1), (1, 2), (0, 2)]);
        let order = topological_sort(tasks).unwrap();
        let depth = levels(&order);
        assert_eq!(depth[&ids[0]], 0);
        assert_eq!(depth[&ids[1]], 1);
        assert_eq!(depth[&ids[2]], 2);
    }

    #[test]
    fn render_groups_by_level() {
        let (tasks, _) = chain(&["Design", "Build"], &[(0, 1)]);
        let order = topological_sort(tasks).unwrap();
        let text = render_text(&order, |id| id.to_string());
        assert!(text.contains("Level 0:"));
        assert!(text.contains("Level 1:"));
        assert!(text.contains("↑ depends on: Design"));
        assert!(text.contains("↓ enables: Build"));
    }
}
