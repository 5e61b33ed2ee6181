// ABOUTME: Publish-time graph validation and execution order resolution
// ABOUTME: Groups main-sequence tasks with their branches and rejects malformed graphs

use petgraph::graph::NodeIndex;
use petgraph::Graph;
use std::collections::HashMap;

use super::error::{GraphValidationError, GraphViolation, Result};
use super::template::{ConditionField, WorkflowTask, WorkflowTemplate};

/// One main-sequence task together with the branch tasks attached to it.
/// Groups run in display order; branches are considered when the main
/// task completes.
#[derive(Debug, Clone)]
pub struct TaskGroup {
    pub main: WorkflowTask,
    pub branches: Vec<WorkflowTask>,
}

/// Validate a template and resolve its execution order. Collects every
/// violation before failing so the author sees all problems at once.
pub fn resolve_execution_order(template: &WorkflowTemplate) -> Result<Vec<TaskGroup>> {
    let mut violations = Vec::new();

    if template.tasks.is_empty() {
        violations.push(GraphViolation::EmptyTemplate);
        return Err(GraphValidationError { violations });
    }

    check_duplicate_ids(&template.tasks, &mut violations);
    check_parent_links(&template.tasks, &mut violations);
    check_conditions(&template.tasks, &mut violations);
    check_cycles(&template.tasks, &mut violations);

    let mut mains: Vec<&WorkflowTask> = template
        .tasks
        .iter()
        .filter(|t| !t.is_branch())
        .collect();
    check_display_orders(&mains, &mut violations);

    if !violations.is_empty() {
        return Err(GraphValidationError { violations });
    }

    mains.sort_by_key(|t| t.display_order.unwrap_or(u32::MAX));

    let groups = mains
        .into_iter()
        .map(|main| TaskGroup {
            main: main.clone(),
            branches: template
                .branches_of(&main.id)
                .into_iter()
                .cloned()
                .collect(),
        })
        .collect();

    Ok(groups)
}

fn check_duplicate_ids(tasks: &[WorkflowTask], violations: &mut Vec<GraphViolation>) {
    let mut seen: HashMap<&str, usize> = HashMap::new();
    for task in tasks {
        *seen.entry(task.id.as_str()).or_insert(0) += 1;
    }
    for (id, count) in seen {
        if count > 1 {
            violations.push(GraphViolation::DuplicateTaskId {
                task: id.to_string(),
            });
        }
    }
}

fn check_parent_links(tasks: &[WorkflowTask], violations: &mut Vec<GraphViolation>) {
    let by_id: HashMap<&str, &WorkflowTask> =
        tasks.iter().map(|t| (t.id.as_str(), t)).collect();

    for task in tasks {
        if let Some(parent_id) = &task.parent_task_id {
            match by_id.get(parent_id.as_str()) {
                None => violations.push(GraphViolation::UnknownParent {
                    task: task.id.clone(),
                    parent: parent_id.clone(),
                }),
                Some(parent) if parent.is_branch() => {
                    violations.push(GraphViolation::BranchOfBranch {
                        task: task.id.clone(),
                        parent: parent_id.clone(),
                    });
                }
                Some(_) => {}
            }
        }
    }
}

fn check_conditions(tasks: &[WorkflowTask], violations: &mut Vec<GraphViolation>) {
    for task in tasks {
        match (&task.parent_task_id, &task.branch_condition) {
            (Some(_), None) => violations.push(GraphViolation::MissingBranchCondition {
                task: task.id.clone(),
            }),
            (None, Some(_)) => violations.push(GraphViolation::ConditionWithoutParent {
                task: task.id.clone(),
            }),
            (Some(_), Some(cond)) => {
                if cond.field == ConditionField::Custom && cond.resolved_key().is_none() {
                    violations.push(GraphViolation::MissingCustomKey {
                        task: task.id.clone(),
                    });
                }
            }
            (None, None) => {}
        }
    }
}

/// Parent links must form a forest. Duplicate ids make the arena ambiguous,
/// so cycle detection keys on the first occurrence of each id.
fn check_cycles(tasks: &[WorkflowTask], violations: &mut Vec<GraphViolation>) {
    let mut graph = Graph::new();
    let mut node_map: HashMap<&str, NodeIndex> = HashMap::new();

    for task in tasks {
        node_map
            .entry(task.id.as_str())
            .or_insert_with(|| graph.add_node(task.id.clone()));
    }

    for task in tasks {
        if let Some(parent_id) = &task.parent_task_id {
            if let (Some(&task_node), Some(&parent_node)) = (
                node_map.get(task.id.as_str()),
                node_map.get(parent_id.as_str()),
            ) {
                graph.add_edge(parent_node, task_node, ());
            }
        }
    }

    if let Err(cycle) = petgraph::algo::toposort(&graph, None) {
        violations.push(GraphViolation::ParentCycle {
            chain: vec![graph[cycle.node_id()].clone()],
        });
    }
}

/// Display orders on main-sequence tasks must be present, unique, and
/// consecutive from the smallest order. Authors may number from 0 or 1.
fn check_display_orders(mains: &[&WorkflowTask], violations: &mut Vec<GraphViolation>) {
    let mut by_order: HashMap<u32, Vec<String>> = HashMap::new();

    for task in mains {
        match task.display_order {
            Some(order) => by_order.entry(order).or_default().push(task.id.clone()),
            None => violations.push(GraphViolation::MissingDisplayOrder {
                task: task.id.clone(),
            }),
        }
    }

    for (order, tasks) in &by_order {
        if tasks.len() > 1 {
            violations.push(GraphViolation::DuplicateDisplayOrder {
                order: *order,
                tasks: tasks.clone(),
            });
        }
    }

    let mut orders: Vec<u32> = by_order.keys().copied().collect();
    orders.sort_unstable();
    if let Some(&first) = orders.first() {
        for (offset, found) in orders.iter().enumerate() {
            let expected = first + offset as u32;
            if *found != expected {
                violations.push(GraphViolation::NonDenseDisplayOrder {
                    expected,
                    found: *found,
                });
                break;
            }
        }
    }
}
