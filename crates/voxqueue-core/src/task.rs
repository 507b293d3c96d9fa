//! Task/item/state types shared by the store, workers, and any adapter.

use serde::{Deserialize, Serialize};

/// The closed set of task lifecycle states. Numeric values are wire-visible
/// and must not be renumbered once a deployment has persisted rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum TaskState {
    /// Exhausted retries; only a manual `Resume` re-enables it.
    Discarded = -101,
    /// User-cancelled from `Pending`.
    Cancelled = -100,
    /// Runnable once `schedule_at <= now`.
    Pending = 0,
    /// Leased by a worker.
    Processing = 1,
    /// Terminal success.
    Completed = 100,
    /// Failed, awaiting the retry reaper.
    Retryable = 101,
}

impl TaskState {
    pub const ALL: [TaskState; 6] = [
        TaskState::Discarded,
        TaskState::Cancelled,
        TaskState::Pending,
        TaskState::Processing,
        TaskState::Completed,
        TaskState::Retryable,
    ];

    pub fn as_i32(self) -> i32 {
        self as i32
    }

    pub fn from_i32(value: i32) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.as_i32() == value)
    }

    pub fn name(self) -> &'static str {
        match self {
            TaskState::Discarded => "DISCARDED",
            TaskState::Cancelled => "CANCELLED",
            TaskState::Pending => "PENDING",
            TaskState::Processing => "PROCESSING",
            TaskState::Completed => "COMPLETED",
            TaskState::Retryable => "RETRYABLE",
        }
    }

    /// Human-readable description, as surfaced by a `/task-states` style
    /// listing.
    pub fn description(self) -> &'static str {
        match self {
            TaskState::Discarded => "Exhausted retries; requires manual Resume",
            TaskState::Cancelled => "Cancelled by user request from Pending",
            TaskState::Pending => "Runnable once schedule_at has elapsed",
            TaskState::Processing => "Leased by a worker",
            TaskState::Completed => "Successfully processed",
            TaskState::Retryable => "Failed, awaiting the retry reaper",
        }
    }

    /// Parses either the case-insensitive name or the numeric value, as the
    /// `state` query/path parameter of a list-by-state adapter route would.
    pub fn parse(raw: &str) -> Option<Self> {
        if let Ok(value) = raw.parse::<i32>() {
            return Self::from_i32(value);
        }
        let upper = raw.to_ascii_uppercase();
        Self::ALL.into_iter().find(|s| s.name() == upper)
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Cancelled | TaskState::Discarded
        )
    }
}

/// One (request, return-channel) pair inside a task. `request` is opaque to
/// the core; it is handed to the `Synthesizer` unexamined and serialized as
/// JSON for storage. `response_url` is the return channel the worker writes
/// the synthesized result into before the task is marked complete.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskItem {
    pub request: serde_json::Value,
    #[serde(default)]
    pub response_url: String,
}

impl TaskItem {
    pub fn new(request: serde_json::Value) -> Self {
        Self {
            request,
            response_url: String::new(),
        }
    }
}

/// A unit of work containing one or more items to synthesize; carries its
/// own lifecycle state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Opaque, lexicographically sortable identifier. Empty before
    /// `Enqueue` mints one.
    pub id: String,
    pub state: TaskState,
    /// Epoch-millis; earliest time this task may be dequeued/retried.
    pub schedule_at: i64,
    pub attempt_count: u32,
    pub attempted_at: Option<i64>,
    pub attempted_error: Vec<String>,
    pub finalized_at: Option<i64>,
    pub items: Vec<TaskItem>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Task {
    /// A task ready for `Enqueue`: no id yet, `PENDING`, `schedule_at = 0`
    /// meaning "now" once the queue stamps it.
    pub fn new(items: Vec<TaskItem>) -> Self {
        Self {
            id: String::new(),
            state: TaskState::Pending,
            schedule_at: 0,
            attempt_count: 0,
            attempted_at: None,
            attempted_error: Vec::new(),
            finalized_at: None,
            items,
            created_at: 0,
            updated_at: 0,
        }
    }

    pub fn item_count(&self) -> usize {
        self.items.len()
    }
}

/// Current time as epoch milliseconds, the unit every timestamp field in
/// this workspace uses.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_round_trips_through_i32() {
        for state in TaskState::ALL {
            assert_eq!(TaskState::from_i32(state.as_i32()), Some(state));
        }
    }

    #[test]
    fn parse_accepts_name_or_number_case_insensitively() {
        assert_eq!(TaskState::parse("pending"), Some(TaskState::Pending));
        assert_eq!(TaskState::parse("RETRYABLE"), Some(TaskState::Retryable));
        assert_eq!(TaskState::parse("-101"), Some(TaskState::Discarded));
        assert_eq!(TaskState::parse("nope"), None);
    }

    #[test]
    fn terminal_states_match_spec() {
        assert!(TaskState::Completed.is_terminal());
        assert!(TaskState::Cancelled.is_terminal());
        assert!(TaskState::Discarded.is_terminal());
        assert!(!TaskState::Pending.is_terminal());
        assert!(!TaskState::Processing.is_terminal());
        assert!(!TaskState::Retryable.is_terminal());
    }
}
