//! Dependency graph over tasks
//!
//! Edges are stored on the tasks themselves: `a.outflows ∋ b` together with
//! `b.inflows ∋ a` means "b depends on a". The functions here operate on an
//! in-memory task map and keep both halves of every edge in step.
//!
//! Cycle prevention walks inflow edges with an explicit visited set, so the
//! traversal is bounded by the number of tasks rather than recursion depth.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use petgraph::algo::is_cyclic_directed;
use petgraph::graph::{DiGraph, NodeIndex};
use thiserror::Error;

use super::id::TaskId;
use super::task::Task;

/// Working set of tasks keyed by ID
pub type TaskMap = BTreeMap<TaskId, Task>;

#[derive(Debug, Error, PartialEq)]
pub enum GraphError {
    #[error("Adding {0} -> {1} would create a cycle")]
    CycleDetected(TaskId, TaskId),

    #[error("Task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("Self-dependency not allowed: {0}")]
    SelfDependency(TaskId),
}

/// Returns true if `ancestor` is reachable from `id` by walking inflow edges.
///
/// Inflow IDs that are not in `tasks` are skipped.
pub fn is_ancestor(tasks: &TaskMap, ancestor: &TaskId, id: &TaskId) -> bool {
    let mut visited: HashSet<&TaskId> = HashSet::new();
    let mut queue: VecDeque<&TaskId> = VecDeque::new();

    if let Some(task) = tasks.get(id) {
        queue.extend(task.inflows.iter());
    }

    while let Some(current) = queue.pop_front() {
        if current == ancestor {
            return true;
        }
        if !visited.insert(current) {
            continue;
        }
        if let Some(task) = tasks.get(current) {
            queue.extend(task.inflows.iter().filter(|p| !visited.contains(p)));
        }
    }
    false
}

/// Checks whether the edge `from -> to` may be added without a cycle
pub fn check_edge(tasks: &TaskMap, from: &TaskId, to: &TaskId) -> Result<(), GraphError> {
    if from == to {
        return Err(GraphError::SelfDependency(from.clone()));
    }
    if !tasks.contains_key(from) {
        return Err(GraphError::TaskNotFound(from.clone()));
    }
    if !tasks.contains_key(to) {
        return Err(GraphError::TaskNotFound(to.clone()));
    }
    // `to` already upstream of `from` means from -> to closes a loop
    if is_ancestor(tasks, to, from) {
        return Err(GraphError::CycleDetected(from.clone(), to.clone()));
    }
    Ok(())
}

/// Adds the reciprocal edge `from -> to` after checking for cycles.
///
/// Returns `Ok(false)` if the edge already existed.
pub fn link(tasks: &mut TaskMap, from: &TaskId, to: &TaskId) -> Result<bool, GraphError> {
    let exists = tasks
        .get(from)
        .is_some_and(|t| t.outflows.contains(to))
        && tasks.get(to).is_some_and(|t| t.inflows.contains(from));
    if exists {
        return Ok(false);
    }

    check_edge(tasks, from, to)?;

    if let Some(source) = tasks.get_mut(from) {
        source.outflows.add(to.clone());
        source.touch();
    }
    if let Some(target) = tasks.get_mut(to) {
        target.inflows.add(from.clone());
        target.touch();
    }
    Ok(true)
}

/// Rewrites every reference to `old` into a reference to `new`.
///
/// Duplicates collapse and a task never ends up referencing itself.
/// Returns the IDs of tasks whose flows changed.
pub fn replace_references(tasks: &mut TaskMap, old: &TaskId, new: &TaskId) -> Vec<TaskId> {
    let mut touched = Vec::new();
    for (id, task) in tasks.iter_mut() {
        if id == old {
            continue;
        }
        let changed_in = task.inflows.replace(old, new, id);
        let changed_out = task.outflows.replace(old, new, id);
        if changed_in || changed_out {
            task.touch();
            touched.push(id.clone());
        }
    }
    touched
}

/// Returns true if `id` can reach itself by following outflow edges
pub fn has_cycle_through(tasks: &TaskMap, id: &TaskId) -> bool {
    let mut visited: HashSet<&TaskId> = HashSet::new();
    let mut queue: VecDeque<&TaskId> = VecDeque::new();

    if let Some(task) = tasks.get(id) {
        queue.extend(task.outflows.iter());
    }

    while let Some(current) = queue.pop_front() {
        if current == id {
            return true;
        }
        if !visited.insert(current) {
            continue;
        }
        if let Some(task) = tasks.get(current) {
            queue.extend(task.outflows.iter());
        }
    }
    false
}

/// A broken graph invariant found by [`check_integrity`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntegrityViolation {
    /// `from` lists `to` as an outflow but `to` does not list `from` as an inflow
    MissingInflow { from: TaskId, to: TaskId },
    /// `to` lists `from` as an inflow but `from` does not list `to` as an outflow
    MissingOutflow { from: TaskId, to: TaskId },
    /// A task references an ID that does not exist
    Dangling { task: TaskId, missing: TaskId },
    SelfReference(TaskId),
    Cyclic,
}

impl std::fmt::Display for IntegrityViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingInflow { from, to } => {
                write!(f, "{} -> {}: {} is missing the inflow", from, to, to)
            }
            Self::MissingOutflow { from, to } => {
                write!(f, "{} -> {}: {} is missing the outflow", from, to, from)
            }
            Self::Dangling { task, missing } => {
                write!(f, "{} references unknown task {}", task, missing)
            }
            Self::SelfReference(id) => write!(f, "{} references itself", id),
            Self::Cyclic => write!(f, "dependency graph contains a cycle"),
        }
    }
}

/// Scans a complete task set for reciprocity, dangling references and cycles
pub fn check_integrity(tasks: &TaskMap) -> Vec<IntegrityViolation> {
    let mut violations = Vec::new();

    for (id, task) in tasks {
        for out in &task.outflows {
            if out == id {
                violations.push(IntegrityViolation::SelfReference(id.clone()));
                continue;
            }
            match tasks.get(out) {
                None => violations.push(IntegrityViolation::Dangling {
                    task: id.clone(),
                    missing: out.clone(),
                }),
                Some(target) if !target.inflows.contains(id) => {
                    violations.push(IntegrityViolation::MissingInflow {
                        from: id.clone(),
                        to: out.clone(),
                    })
                }
                Some(_) => {}
            }
        }
        for inf in &task.inflows {
            if inf == id {
                violations.push(IntegrityViolation::SelfReference(id.clone()));
                continue;
            }
            match tasks.get(inf) {
                None => violations.push(IntegrityViolation::Dangling {
                    task: id.clone(),
                    missing: inf.clone(),
                }),
                Some(source) if !source.outflows.contains(id) => {
                    violations.push(IntegrityViolation::MissingOutflow {
                        from: inf.clone(),
                        to: id.clone(),
                    })
                }
                Some(_) => {}
            }
        }
    }

    if DependencyGraph::from_tasks(tasks.values()).is_cyclic() {
        violations.push(IntegrityViolation::Cyclic);
    }

    violations
}

/// petgraph view of a task set, edges pointing from predecessor to successor
#[derive(Debug, Default)]
pub struct DependencyGraph {
    graph: DiGraph<TaskId, ()>,
    node_map: HashMap<TaskId, NodeIndex>,
}

impl DependencyGraph {
    /// Builds a graph from tasks; edges to tasks outside the set are ignored
    pub fn from_tasks<'a>(tasks: impl IntoIterator<Item = &'a Task>) -> Self {
        let mut graph = Self::default();
        let tasks: Vec<&Task> = tasks.into_iter().collect();

        for task in &tasks {
            let idx = graph.graph.add_node(task.id.clone());
            graph.node_map.insert(task.id.clone(), idx);
        }

        for task in &tasks {
            let from = graph.node_map[&task.id];
            for out in &task.outflows {
                if let Some(&to) = graph.node_map.get(out) {
                    graph.graph.update_edge(from, to, ());
                }
            }
        }

        graph
    }

    pub fn is_cyclic(&self) -> bool {
        is_cyclic_directed(&self.graph)
    }

    pub fn len(&self) -> usize {
        self.node_map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.node_map.is_empty()
    }

    /// Direct successors of a task within the graph
    pub fn successors(&self, id: &TaskId) -> Vec<TaskId> {
        let Some(&idx) = self.node_map.get(id) else {
            return vec![];
        };
        self.graph
            .neighbors_directed(idx, petgraph::Direction::Outgoing)
            .filter_map(|n| self.graph.node_weight(n).cloned())
            .collect()
    }

    /// Direct predecessors of a task within the graph
    pub fn predecessors(&self, id: &TaskId) -> Vec<TaskId> {
        let Some(&idx) = self.node_map.get(id) else {
            return vec![];
        };
        self.graph
            .neighbors_directed(idx, petgraph::Direction::Incoming)
            .filter_map(|n| self.graph.node_weight(n).cloned())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_tasks(names: &[&str]) -> (TaskMap, Vec<TaskId>) {
        let mut map = TaskMap::new();
        let mut ids = Vec::new();
        for name in names {
            let task = Task::new(*name, "", "u1".parse().unwrap());
            ids.push(task.id.clone());
            map.insert(task.id.clone(), task);
        }
        (map, ids)
    }

    #[test]
    fn link_adds_both_halves() {
        let (mut tasks, ids) = make_tasks(&["A", "B"]);
        assert!(link(&mut tasks, &ids[0], &ids[1]).unwrap());
        assert!(tasks[&ids[0]].outflows.contains(&ids[1]));
        assert!(tasks[&ids[1]].inflows.contains(&ids[0]));
        assert!(check_integrity(&tasks).is_empty());
    }

    #[test]
    fn link_existing_edge_is_noop() {
        let (mut tasks, ids) = make_tasks(&["A", "B"]);
        link(&mut tasks, &ids[0], &ids[1]).unwrap();
        assert!(!link(&mut tasks, &ids[0], &ids[1]).unwrap());
        assert_eq!(tasks[&ids[0]].outflows.len(), 1);
    }

    #[test]
    fn direct_cycle_rejected() {
        let (mut tasks, ids) = make_tasks(&["A", "B"]);
        link(&mut tasks, &ids[0], &ids[1]).unwrap();
        let before = tasks.clone();

        let err = link(&mut tasks, &ids[1], &ids[0]).unwrap_err();
        assert_eq!(err, GraphError::CycleDetected(ids[1].clone(), ids[0].clone()));
        assert_eq!(tasks, before);
    }

    #[test]
    fn transitive_cycle_rejected() {
        let (mut tasks, ids) = make_tasks(&["A", "B", "C"]);
        link(&mut tasks, &ids[0], &ids[1]).unwrap();
        link(&mut tasks, &ids[1], &ids[2]).unwrap();

        assert!(is_ancestor(&tasks, &ids[0], &ids[2]));
        assert!(!is_ancestor(&tasks, &ids[2], &ids[0]));
        assert!(matches!(
            link(&mut tasks, &ids[2], &ids[0]),
            Err(GraphError::CycleDetected(_, _))
        ));
    }

    #[test]
    fn diamond_is_not_a_cycle() {
        let (mut tasks, ids) = make_tasks(&["A", "B", "C", "D"]);
        link(&mut tasks, &ids[0], &ids[1]).unwrap();
        link(&mut tasks, &ids[0], &ids[2]).unwrap();
        link(&mut tasks, &ids[1], &ids[3]).unwrap();
        link(&mut tasks, &ids[2], &ids[3]).unwrap();
        assert!(check_integrity(&tasks).is_empty());
        assert!(!has_cycle_through(&tasks, &ids[0]));
    }

    #[test]
    fn self_edge_rejected() {
        let (mut tasks, ids) = make_tasks(&["A"]);
        assert_eq!(
            link(&mut tasks, &ids[0], &ids[0]),
            Err(GraphError::SelfDependency(ids[0].clone()))
        );
    }

    #[test]
    fn replace_references_rewires_and_dedupes() {
        let (mut tasks, ids) = make_tasks(&["A", "B", "C"]);
        // A -> C and B -> C; replacing A with B leaves a single B -> C
        link(&mut tasks, &ids[0], &ids[2]).unwrap();
        link(&mut tasks, &ids[1], &ids[2]).unwrap();

        let touched = replace_references(&mut tasks, &ids[0], &ids[1]);
        assert_eq!(touched, vec![ids[2].clone()]);
        assert_eq!(tasks[&ids[2]].inflows.as_slice(), &[ids[1].clone()]);
    }

    #[test]
    fn integrity_scan_finds_problems() {
        let (mut tasks, ids) = make_tasks(&["A", "B"]);
        let ghost: TaskId = "t-ghost".parse().unwrap();

        tasks.get_mut(&ids[0]).unwrap().outflows.add(ids[1].clone());
        tasks.get_mut(&ids[1]).unwrap().inflows.add(ghost.clone());

        let violations = check_integrity(&tasks);
        assert!(violations.contains(&IntegrityViolation::MissingInflow {
            from: ids[0].clone(),
            to: ids[1].clone(),
        }));
        assert!(violations.contains(&IntegrityViolation::Dangling {
            task: ids[1].clone(),
            missing: ghost,
        }));
    }

    #[test]
    fn integrity_scan_detects_cycle() {
        let (mut tasks, ids) = make_tasks(&["A", "B"]);
        for (from, to) in [(0, 1), (1, 0)] {
            tasks.get_mut(&ids[from]).unwrap().outflows.add(ids[to].clone());
            tasks.get_mut(&ids[to]).unwrap().inflows.add(ids[from].clone());
        }
        assert!(check_integrity(&tasks).contains(&IntegrityViolation::Cyclic));
        assert!(has_cycle_through(&tasks, &ids[0]));
    }

    #[test]
    fn petgraph_view_neighbours() {
        let (mut tasks, ids) = make_tasks(&["A", "B"]);
        link(&mut tasks, &ids[0], &ids[1]).unwrap();
        let graph = DependencyGraph::from_tasks(tasks.values());
        assert_eq!(graph.len(), 2);
        assert_eq!(graph.successors(&ids[0]), vec![ids[1].clone()]);
        assert_eq!(graph.predecessors(&ids[1]), vec![ids[0].clone()]);
        assert!(!graph.is_cyclic());
    }
}
