//! Task-board dispatch: the conventional reducer/handler/process set
//! for task-tracking workflows.
//!
//! State is a [`TaskBoard`] of tasks and milestones. Reducers fold
//! `task:*` signals into task status and attempt history; a handler
//! re-evaluates milestones on completion and emits `milestone:passed`;
//! a process manager announces `board:complete` when everything has
//! passed. Workflows that want signal-driven termination pair this
//! with `end_when`.

use serde::{Deserialize, Serialize};
use serde_json::json;

use orchid_domain::{
    AttemptOutcome, Event, KnownPayload, Milestone, Signal, Task, TaskStatus,
};

use crate::dispatch::Dispatcher;

/// The task-tracking state carried by convention.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskBoard {
    pub tasks: Vec<Task>,
    pub milestones: Vec<Milestone>,
}

impl TaskBoard {
    pub fn with_tasks(mut self, tasks: Vec<Task>) -> Self {
        self.tasks = tasks;
        self
    }

    pub fn with_milestones(mut self, milestones: Vec<Milestone>) -> Self {
        self.milestones = milestones;
        self
    }

    pub fn task(&self, id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    fn task_mut(&mut self, id: &str) -> &mut Task {
        if let Some(index) = self.tasks.iter().position(|t| t.id == id) {
            &mut self.tasks[index]
        } else {
            self.tasks.push(Task::new(id, id));
            let last = self.tasks.len() - 1;
            &mut self.tasks[last]
        }
    }

    pub fn all_tasks_complete(&self) -> bool {
        !self.tasks.is_empty()
            && self.tasks.iter().all(|t| t.status == TaskStatus::Complete)
    }

    pub fn all_milestones_passed(&self) -> bool {
        self.milestones.iter().all(|m| m.passed)
    }
}

/// Build the task-board dispatcher. `end_when` fires once every task
/// is complete and every milestone has passed.
pub fn task_board_dispatcher() -> Dispatcher<TaskBoard> {
    Dispatcher::new()
        .reducer("task:start", |board: &mut TaskBoard, signal: &Signal| {
            if let Ok(KnownPayload::TaskStart(start)) =
                KnownPayload::parse(&signal.name, &signal.payload)
            {
                let task = board.task_mut(&start.id);
                if task.status == TaskStatus::Pending {
                    task.status = TaskStatus::InProgress;
                }
            }
        })
        .reducer("task:complete", |board: &mut TaskBoard, signal: &Signal| {
            if let Ok(KnownPayload::TaskComplete(complete)) =
                KnownPayload::parse(&signal.name, &signal.payload)
            {
                board
                    .task_mut(&complete.id)
                    .record_attempt(AttemptOutcome::Success, complete.result.to_string());
            }
        })
        .reducer("task:failed", |board: &mut TaskBoard, signal: &Signal| {
            if let Ok(KnownPayload::TaskFailed(failed)) =
                KnownPayload::parse(&signal.name, &signal.payload)
            {
                board
                    .task_mut(&failed.id)
                    .record_attempt(AttemptOutcome::Failure, failed.error);
            }
        })
        .handler("task:complete", |board: &mut TaskBoard, _signal| {
            let tasks = board.tasks.clone();
            let mut followups = Vec::new();
            for milestone in &mut board.milestones {
                if !milestone.passed && milestone.evaluate(&tasks) {
                    followups.push(Event::new(
                        "milestone:passed",
                        json!({ "id": milestone.id }),
                    ));
                }
            }
            followups
        })
        .process("milestone:passed", |board: &TaskBoard, _signal| {
            if board.all_tasks_complete() && board.all_milestones_passed() {
                vec![Event::new(
                    "board:complete",
                    json!({ "tasks": board.tasks.len() }),
                )]
            } else {
                vec![]
            }
        })
        .end_when(|board| board.all_tasks_complete() && board.all_milestones_passed())
}
