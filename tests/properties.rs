//! Property tests: random operation sequences keep the graph consistent

use std::collections::HashMap;
use std::sync::Arc;

use proptest::prelude::*;
use tasker::domain::{Stage, TaskId, UserId};
use tasker::engine::{Destination, TaskEngine};
use tasker::storage::config::EngineConfig;
use tasker::storage::{MemoryTaskRepository, RequestContext};

const MAX_INBOX: usize = 4;

#[derive(Debug, Clone)]
enum Op {
    Add,
    StageAt(usize, usize),
    StageAfter(usize, usize),
    Advertise(usize, Vec<usize>),
    Stitch(Vec<usize>, usize),
    Merge(usize, usize),
    Split(usize, usize),
    Start(usize),
    Stop(usize),
    Complete(usize),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    let idx = 0..16usize;
    prop_oneof![
        3 => Just(Op::Add),
        2 => (idx.clone(), 0..2usize).prop_map(|(i, loc)| Op::StageAt(i, loc)),
        2 => (idx.clone(), idx.clone()).prop_map(|(i, j)| Op::StageAfter(i, j)),
        3 => (idx.clone(), proptest::collection::vec(idx.clone(), 1..3))
            .prop_map(|(i, js)| Op::Advertise(i, js)),
        3 => (proptest::collection::vec(idx.clone(), 1..3), idx.clone())
            .prop_map(|(is, j)| Op::Stitch(is, j)),
        2 => (idx.clone(), idx.clone()).prop_map(|(i, j)| Op::Merge(i, j)),
        2 => (idx.clone(), 1..3usize).prop_map(|(i, n)| Op::Split(i, n)),
        1 => idx.clone().prop_map(Op::Start),
        1 => idx.clone().prop_map(Op::Stop),
        1 => idx.prop_map(Op::Complete),
    ]
}

fn engine() -> TaskEngine {
    let policy = EngineConfig {
        max_inbox_size: MAX_INBOX,
        ..EngineConfig::default()
    };
    TaskEngine::new(Arc::new(MemoryTaskRepository::new()), policy)
}

fn user() -> UserId {
    "u1".parse().unwrap()
}

/// Picks existing tasks by index; `None` when the store is empty
fn pick(ids: &[TaskId], i: usize) -> Option<TaskId> {
    (!ids.is_empty()).then(|| ids[i % ids.len()].clone())
}

fn apply(engine: &TaskEngine, op: &Op, counter: &mut usize) {
    let ctx = RequestContext::new();
    let ids: Vec<TaskId> = engine
        .list_tasks(&ctx, None, None)
        .unwrap()
        .into_iter()
        .map(|t| t.id)
        .collect();
    let many = |is: &[usize]| -> Vec<TaskId> { is.iter().filter_map(|i| pick(&ids, *i)).collect() };

    // every operation may legitimately fail; only the resulting state is checked
    match op {
        Op::Add => {
            *counter += 1;
            let _ = engine.add_task(&ctx, &format!("task {}", counter), "", user());
        }
        Op::StageAt(i, loc) => {
            if let Some(id) = pick(&ids, *i) {
                let location = Destination::Location(vec![format!("loc{}", loc)]);
                let _ = engine.move_to_staging(&ctx, &id, location, None, Default::default());
            }
        }
        Op::StageAfter(i, j) => {
            if let (Some(id), Some(dest)) = (pick(&ids, *i), pick(&ids, *j)) {
                let _ = engine.move_to_staging(&ctx, &id, Destination::Task(dest), None, Default::default());
            }
        }
        Op::Advertise(i, js) => {
            if let Some(id) = pick(&ids, *i) {
                let _ = engine.advertise_task(&ctx, &id, &many(js));
            }
        }
        Op::Stitch(is, j) => {
            if let Some(target) = pick(&ids, *j) {
                let _ = engine.stitch_tasks(&ctx, &many(is), &target);
            }
        }
        Op::Merge(i, j) => {
            if let (Some(from), Some(to)) = (pick(&ids, *i), pick(&ids, *j)) {
                let _ = engine.merge_tasks(&ctx, &from, &to);
            }
        }
        Op::Split(i, n) => {
            if let Some(id) = pick(&ids, *i) {
                let names: Vec<String> = (0..*n).map(|k| format!("part {}", k)).collect();
                let descriptions = vec![String::new(); *n];
                let _ = engine.split_task(&ctx, &id, &names, &descriptions);
            }
        }
        Op::Start(i) => {
            if let Some(id) = pick(&ids, *i) {
                let _ = engine.start_task(&ctx, &id);
            }
        }
        Op::Stop(i) => {
            if let Some(id) = pick(&ids, *i) {
                let _ = engine.stop_task(&ctx, &id, vec![]);
            }
        }
        Op::Complete(i) => {
            if let Some(id) = pick(&ids, *i) {
                let _ = engine.complete_task(&ctx, &id);
            }
        }
    }
}

fn assert_consistent(engine: &TaskEngine) -> Result<(), TestCaseError> {
    let ctx = RequestContext::new();

    let violations = engine.check_integrity(&ctx).unwrap();
    prop_assert!(violations.is_empty(), "violations: {:?}", violations);

    let in_inbox = engine.list_tasks(&ctx, Some(Stage::Inbox), None).unwrap().len();
    prop_assert!(in_inbox <= MAX_INBOX, "inbox holds {}", in_inbox);

    let view = engine.get_task_dag(&ctx, None).unwrap();
    let position: HashMap<&TaskId, usize> = view
        .tasks
        .iter()
        .enumerate()
        .map(|(i, t)| (&t.id, i))
        .collect();
    for task in &view.tasks {
        for inflow in &task.inflows {
            prop_assert!(
                position[inflow] < position[&task.id],
                "{} listed before its dependency {}",
                task.id,
                inflow
            );
        }
    }
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn random_operations_keep_graph_consistent(ops in proptest::collection::vec(op_strategy(), 1..40)) {
        let engine = engine();
        let mut counter = 0;
        for op in &ops {
            apply(&engine, op, &mut counter);
            assert_consistent(&engine)?;
        }
    }

    #[test]
    fn inbox_never_exceeds_capacity(adds in 1..12usize) {
        let engine = engine();
        let ctx = RequestContext::new();
        let mut accepted = 0;
        for n in 0..adds {
            if engine.add_task(&ctx, &format!("t{}", n), "", user()).is_ok() {
                accepted += 1;
            }
        }
        prop_assert_eq!(accepted, adds.min(MAX_INBOX));
    }
}
