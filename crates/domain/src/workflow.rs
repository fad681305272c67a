//! Workflow-layer shapes carried in session state by convention.
//!
//! The kernel treats session state as opaque; these types are the
//! conventional vocabulary reducers use for task-tracking workflows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Complete,
    Blocked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Success,
    Failure,
    Partial,
    Blocked,
}

/// Record of one attempt at a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptRecord {
    pub attempt: u32,
    pub timestamp: DateTime<Utc>,
    pub outcome: AttemptOutcome,
    pub summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub files_changed: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub review_feedback: Option<String>,
}

/// A unit of work tracked in session state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub status: TaskStatus,
    #[serde(default)]
    pub attempt: u32,
    #[serde(default)]
    pub attempt_history: Vec<AttemptRecord>,
}

impl Task {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            description: String::new(),
            status: TaskStatus::Pending,
            attempt: 0,
            attempt_history: Vec::new(),
        }
    }

    /// Record an attempt and advance status from the outcome.
    pub fn record_attempt(&mut self, outcome: AttemptOutcome, summary: impl Into<String>) {
        self.attempt += 1;
        self.attempt_history.push(AttemptRecord {
            attempt: self.attempt,
            timestamp: Utc::now(),
            outcome,
            summary: summary.into(),
            files_changed: None,
            checkpoint_hash: None,
            review_feedback: None,
        });
        self.status = match outcome {
            AttemptOutcome::Success => TaskStatus::Complete,
            AttemptOutcome::Blocked => TaskStatus::Blocked,
            AttemptOutcome::Failure | AttemptOutcome::Partial => TaskStatus::InProgress,
        };
    }
}

/// A milestone over a set of tasks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Milestone {
    pub id: String,
    pub task_ids: Vec<String>,
    #[serde(default)]
    pub passed: bool,
}

impl Milestone {
    /// A milestone passes when every referenced task is complete.
    pub fn evaluate(&mut self, tasks: &[Task]) -> bool {
        self.passed = self.task_ids.iter().all(|id| {
            tasks
                .iter()
                .any(|t| &t.id == id && t.status == TaskStatus::Complete)
        });
        self.passed
    }
}
