//! Bounded, time-windowed record of running and recently finished tasks.
//!
//! Keyed by `command_id`. Running tasks are never evicted; finished tasks
//! are purged once older than the retention window, then oldest-first
//! whenever the registry exceeds its cap.

use std::collections::HashMap;
use std::time::Duration;

use basset_core::{CommandKind, now_millis};
use serde::Serialize;
use thiserror::Error;
use tokio::time::Instant;

/// Default cap on retained tasks.
pub const DEFAULT_MAX_TASKS: usize = 50;

/// Default retention window for finished tasks.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(5 * 60);

/// Lifecycle status of a [`Task`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum TaskStatus {
    /// Handler is executing.
    Running,
    /// Handler returned a result.
    Completed,
    /// Handler failed, or the connection was lost.
    Failed,
    /// Handler missed the command deadline.
    TimedOut,
}

impl TaskStatus {
    /// Whether the task has finished.
    pub fn is_finished(self) -> bool {
        !matches!(self, Self::Running)
    }
}

/// Identifies one dispatch of a command. Settlements carrying a stale
/// token (from an earlier dispatch of the same `command_id`) are ignored.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DispatchToken(u64);

/// Engine-side bookkeeping for one command.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    /// Correlation identifier.
    pub command_id: String,
    /// Command type.
    #[serde(rename = "type")]
    pub kind: CommandKind,
    /// Current status.
    pub status: TaskStatus,
    /// Wall-clock start, ms since the epoch.
    pub started_at: i64,
    /// Wall-clock end, ms since the epoch.
    pub ended_at: Option<i64>,
    /// Failure text for failed and timed-out tasks.
    pub error: Option<String>,
    #[serde(skip)]
    start_time: Instant,
    #[serde(skip)]
    end_time: Option<Instant>,
    #[serde(skip)]
    token: DispatchToken,
}

impl Task {
    /// Time spent running, up to now for running tasks.
    pub fn elapsed(&self) -> Duration {
        self.end_time.unwrap_or_else(Instant::now) - self.start_time
    }
}

/// Rejected registry operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TaskError {
    /// A task with this id is already running.
    #[error("Duplicate command_id: {0} is already in flight")]
    Duplicate(String),
    /// No task with this id.
    #[error("unknown task: {0}")]
    NotFound(String),
    /// The task has already finished.
    #[error("task {0} already finished")]
    NotRunning(String),
    /// The settlement belongs to an earlier dispatch.
    #[error("stale settlement for task {0}")]
    StaleToken(String),
}

/// Counts by status.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskCounts {
    /// Running tasks.
    pub running: usize,
    /// Completed tasks retained.
    pub completed: usize,
    /// Failed tasks retained.
    pub failed: usize,
    /// Timed-out tasks retained.
    pub timed_out: usize,
}

/// The task map plus its retention policy.
pub struct TaskRegistry {
    tasks: HashMap<String, (u64, Task)>,
    max_tasks: usize,
    retention: Duration,
    next_seq: u64,
}

impl TaskRegistry {
    /// Registry retaining at most `max_tasks` entries for `retention`.
    pub fn new(max_tasks: usize, retention: Duration) -> Self {
        Self {
            tasks: HashMap::new(),
            max_tasks,
            retention,
            next_seq: 0,
        }
    }

    /// Register a running task. A finished task with the same id is
    /// replaced; a running one is a duplicate. Sweeps after inserting.
    pub fn add(
        &mut self,
        command_id: impl Into<String>,
        kind: CommandKind,
    ) -> Result<DispatchToken, TaskError> {
        let command_id = command_id.into();
        if self
            .tasks
            .get(&command_id)
            .is_some_and(|(_, t)| t.status == TaskStatus::Running)
        {
            return Err(TaskError::Duplicate(command_id));
        }

        self.next_seq += 1;
        let seq = self.next_seq;
        let token = DispatchToken(seq);
        let task = Task {
            command_id: command_id.clone(),
            kind,
            status: TaskStatus::Running,
            started_at: now_millis(),
            ended_at: None,
            error: None,
            start_time: Instant::now(),
            end_time: None,
            token,
        };
        let _ = self.tasks.insert(command_id, (seq, task));
        let _ = self.sweep();
        Ok(token)
    }

    /// Mark a running task completed.
    pub fn complete(&mut self, command_id: &str, token: DispatchToken) -> Result<&Task, TaskError> {
        self.finish(command_id, token, TaskStatus::Completed, None)
    }

    /// Mark a running task failed with `error`.
    pub fn fail(
        &mut self,
        command_id: &str,
        token: DispatchToken,
        error: impl Into<String>,
    ) -> Result<&Task, TaskError> {
        self.finish(command_id, token, TaskStatus::Failed, Some(error.into()))
    }

    /// Mark a running task timed out with `error`.
    pub fn timeout(
        &mut self,
        command_id: &str,
        token: DispatchToken,
        error: impl Into<String>,
    ) -> Result<&Task, TaskError> {
        self.finish(command_id, token, TaskStatus::TimedOut, Some(error.into()))
    }

    fn finish(
        &mut self,
        command_id: &str,
        token: DispatchToken,
        status: TaskStatus,
        error: Option<String>,
    ) -> Result<&Task, TaskError> {
        let (_, task) = self
            .tasks
            .get_mut(command_id)
            .ok_or_else(|| TaskError::NotFound(command_id.to_owned()))?;
        if task.token != token {
            return Err(TaskError::StaleToken(command_id.to_owned()));
        }
        if task.status != TaskStatus::Running {
            return Err(TaskError::NotRunning(command_id.to_owned()));
        }
        task.status = status;
        task.error = error;
        task.end_time = Some(Instant::now());
        task.ended_at = Some(now_millis());
        Ok(task)
    }

    /// Fail every running task with `error`. Returns the failed ids.
    pub fn fail_running(&mut self, error: &str) -> Vec<String> {
        let now = Instant::now();
        let ended_at = now_millis();
        let mut failed = Vec::new();
        for (_, task) in self.tasks.values_mut() {
            if task.status == TaskStatus::Running {
                task.status = TaskStatus::Failed;
                task.error = Some(error.to_owned());
                task.end_time = Some(now);
                task.ended_at = Some(ended_at);
                failed.push(task.command_id.clone());
            }
        }
        failed.sort();
        failed
    }

    /// Purge expired finished tasks, then evict the oldest finished tasks
    /// until the cap holds. Returns how many entries were removed.
    pub fn sweep(&mut self) -> usize {
        let before = self.tasks.len();
        let now = Instant::now();
        let retention = self.retention;
        self.tasks.retain(|_, (_, task)| match task.end_time {
            Some(end) => now.saturating_duration_since(end) < retention,
            None => true,
        });

        if self.tasks.len() > self.max_tasks {
            let mut finished: Vec<(u64, String)> = self
                .tasks
                .iter()
                .filter(|(_, (_, t))| t.status.is_finished())
                .map(|(id, (seq, _))| (*seq, id.clone()))
                .collect();
            finished.sort_unstable();
            let excess = self.tasks.len() - self.max_tasks;
            for (_, id) in finished.into_iter().take(excess) {
                let _ = self.tasks.remove(&id);
            }
        }
        before - self.tasks.len()
    }

    /// Look up a task.
    pub fn get(&self, command_id: &str) -> Option<&Task> {
        self.tasks.get(command_id).map(|(_, t)| t)
    }

    /// Whether `command_id` is currently running.
    pub fn is_running(&self, command_id: &str) -> bool {
        self.get(command_id)
            .is_some_and(|t| t.status == TaskStatus::Running)
    }

    /// Retained tasks, oldest first.
    pub fn tasks(&self) -> Vec<&Task> {
        let mut entries: Vec<&(u64, Task)> = self.tasks.values().collect();
        entries.sort_unstable_by_key(|(seq, _)| *seq);
        entries.into_iter().map(|(_, t)| t).collect()
    }

    /// Counts by status.
    pub fn counts(&self) -> TaskCounts {
        let mut counts = TaskCounts::default();
        for (_, task) in self.tasks.values() {
            match task.status {
                TaskStatus::Running => counts.running += 1,
                TaskStatus::Completed => counts.completed += 1,
                TaskStatus::Failed => counts.failed += 1,
                TaskStatus::TimedOut => counts.timed_out += 1,
            }
        }
        counts
    }

    /// Retained entries.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Whether nothing is retained.
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_TASKS, DEFAULT_RETENTION)
    }
}
