//! Task state tracking for one pool.

use std::collections::BTreeMap;

use crate::types::{ExecutionOutcome, FailedTask, JobOutcome, TaskId, TaskState};

#[derive(Debug)]
struct TaskRecord {
    label: String,
    state: TaskState,
    attempts: u32,
    outcome: Option<ExecutionOutcome>,
    last_error: Option<String>,
}

/// State of every task a pool has accepted
///
/// Terminal states are sticky: once a task is `Done`, `Failed` or `Cancelled`
/// later transitions are ignored, so a task is never counted twice.
#[derive(Debug, Default)]
pub(crate) struct TaskLedger {
    records: BTreeMap<TaskId, TaskRecord>,
}

impl TaskLedger {
    pub(crate) fn insert(&mut self, id: TaskId, label: String) {
        self.records.insert(
            id,
            TaskRecord {
                label,
                state: TaskState::Pending,
                attempts: 0,
                outcome: None,
                last_error: None,
            },
        );
    }

    /// Move a live task to a non-terminal state
    pub(crate) fn transition(&mut self, id: TaskId, state: TaskState, attempts: u32) {
        if let Some(record) = self.live(id) {
            record.state = state;
            record.attempts = attempts;
        }
    }

    pub(crate) fn record_error(&mut self, id: TaskId, error: String) {
        if let Some(record) = self.live(id) {
            record.last_error = Some(error);
        }
    }

    /// Returns false if the task had already reached a terminal state
    pub(crate) fn complete(&mut self, id: TaskId, outcome: ExecutionOutcome) -> bool {
        match self.live(id) {
            Some(record) => {
                record.state = TaskState::Done;
                record.outcome = Some(outcome);
                true
            }
            None => false,
        }
    }

    /// Returns false if the task had already reached a terminal state
    pub(crate) fn fail(&mut self, id: TaskId, error: String) -> bool {
        match self.live(id) {
            Some(record) => {
                record.state = TaskState::Failed;
                record.last_error = Some(error);
                true
            }
            None => false,
        }
    }

    /// Returns false if the task had already reached a terminal state
    pub(crate) fn cancel(&mut self, id: TaskId) -> bool {
        match self.live(id) {
            Some(record) => {
                record.state = TaskState::Cancelled;
                true
            }
            None => false,
        }
    }

    /// Mark every task that is not terminal yet as cancelled; returns how many were
    pub(crate) fn cancel_remaining(&mut self) -> usize {
        let mut count = 0;
        for record in self.records.values_mut() {
            if !record.state.is_terminal() {
                record.state = TaskState::Cancelled;
                count += 1;
            }
        }
        count
    }

    pub(crate) fn state(&self, id: TaskId) -> Option<TaskState> {
        self.records.get(&id).map(|r| r.state)
    }

    pub(crate) fn failures(&self) -> Vec<FailedTask> {
        self.records
            .iter()
            .filter(|(_, r)| r.state == TaskState::Failed)
            .map(|(id, r)| FailedTask {
                id: *id,
                label: r.label.clone(),
                attempts: r.attempts,
                error: r.last_error.clone().unwrap_or_default(),
            })
            .collect()
    }

    pub(crate) fn outcome(&self) -> JobOutcome {
        let mut outcome = JobOutcome {
            total: self.records.len(),
            failed: self.failures(),
            ..JobOutcome::default()
        };
        for (id, record) in &self.records {
            match (record.state, record.outcome) {
                (TaskState::Done, Some(ExecutionOutcome::Skipped)) => outcome.skipped += 1,
                (TaskState::Done, _) => outcome.transferred += 1,
                (TaskState::Cancelled, _) => outcome.cancelled.push(*id),
                _ => {}
            }
        }
        outcome
    }

    fn live(&mut self, id: TaskId) -> Option<&mut TaskRecord> {
        self.records
            .get_mut(&id)
            .filter(|record| !record.state.is_terminal())
    }
}
