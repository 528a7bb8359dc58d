//! Plan expansion (§4.6): turns a completed `plan` task's `{goal, steps[]}`
//! output into the execute-phase task DAG, parallel or sequential.

use aow_core::{Task, TaskType};
use chrono::Utc;
use serde_json::{json, Value};
use uuid::Uuid;

pub fn plan_steps(plan_output: &Value) -> Vec<Value> {
    plan_output.get("steps").and_then(|s| s.as_array()).cloned().unwrap_or_default()
}

fn execute_input(goal: &Value, steps: &[Value], step: &Value, action_ref: Uuid) -> Value {
    json!({
        "step": step,
        "plan": { "goal": goal, "steps": steps },
        "actionRef": action_ref.to_string(),
        "target": step.get("action").cloned().unwrap_or(Value::Null),
    })
}

fn archive_input(goal: &Value, steps: &[Value]) -> Value {
    json!({
        "content": { "goal": goal, "plan": { "goal": goal, "steps": steps }, "completedAt": Utc::now() },
        "contentType": "trace",
    })
}

/// Every step's `execute` task depends only on the plan task; a final
/// `archive` task depends on all executes.
pub fn expand_parallel(workflow_id: Uuid, plan_task_id: Uuid, goal: &Value, steps: &[Value]) -> Vec<Task> {
    let mut tasks = Vec::new();
    let mut execute_ids = Vec::new();

    for step in steps {
        let input = execute_input(goal, steps, step, plan_task_id);
        let task = Task::new(workflow_id, TaskType::Execute, input).with_dependencies(vec![plan_task_id]);
        execute_ids.push(task.id);
        tasks.push(task);
    }

    let archive = Task::new(workflow_id, TaskType::Archive, archive_input(goal, steps)).with_dependencies(execute_ids);
    tasks.push(archive);
    tasks
}

/// `approve → execute → observe` linearly per step; a final `archive`
/// depends on the last observe.
pub fn expand_sequential(workflow_id: Uuid, plan_task_id: Uuid, goal: &Value, steps: &[Value]) -> Vec<Task> {
    let mut tasks = Vec::new();
    let mut previous = plan_task_id;

    for step in steps {
        let approve = Task::new(workflow_id, TaskType::Approve, json!({ "step": step })).with_dependencies(vec![previous]);
        let approve_id = approve.id;

        let execute = Task::new(workflow_id, TaskType::Execute, execute_input(goal, steps, step, approve_id))
            .with_dependencies(vec![approve_id]);
        let execute_id = execute.id;

        let observe = Task::new(workflow_id, TaskType::Observe, json!({ "step": step })).with_dependencies(vec![execute_id]);
        previous = observe.id;

        tasks.push(approve);
        tasks.push(execute);
        tasks.push(observe);
    }

    let archive = Task::new(workflow_id, TaskType::Archive, archive_input(goal, steps)).with_dependencies(vec![previous]);
    tasks.push(archive);
    tasks
}
