//! Loop state types and the terminal result.
//!
//! [`LoopState`] is the sole unit of checkpointed state: everything the
//! controller needs to resume a run after a crash or pause is in here and
//! nowhere else. It is owned exclusively by the controller and mutated
//! only inside a turn.

use serde::{Deserialize, Serialize};

use super::command::{Command, TurnResult};
use super::tracker::FileFailureTracker;

/// Hard cut applied to the `current_phase` projection.
const PHASE_LEN: usize = 50;

/// Outcome of the most recent turn, kept for the next context build.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecordedTurn {
    /// The command that was dispatched.
    pub command: Command,
    /// Whether it succeeded.
    pub success: bool,
    /// Diagnostic or informational detail carried by the result.
    pub details: Option<String>,
    /// Files implicated by the turn.
    pub affected_files: Vec<String>,
}

/// State of the build loop.
///
/// # Example
///
/// ```
/// use packsmith::r#loop::state::LoopState;
///
/// let state = LoopState::new();
/// assert_eq!(state.loop_count, 0);
/// assert!(state.files_modified.is_empty());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct LoopState {
    /// Turns executed so far.
    pub loop_count: u32,
    /// Files modified across the run. Append-only, insertion order
    /// meaningful, no duplicates.
    pub files_modified: Vec<String>,
    /// Human-readable log of every turn's outcome. Append-only.
    pub action_history: Vec<String>,
    /// Per-file failure records.
    pub failure_tracker: FileFailureTracker,
    /// Set once by a pause signal, never cleared within one execution.
    pub pause_requested: bool,
    /// Hint from a human operator, consumed by the next context build.
    pub pending_human_hint: Option<String>,
    /// Escalation message from the failure tracker, consumed by the next
    /// context build.
    pub pending_meta_correction: Option<String>,
    /// The previous turn's outcome, read by the context builder.
    pub last_turn: Option<RecordedTurn>,
}

impl LoopState {
    /// Create a fresh loop state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a modified file. Idempotent: a retried-but-already-recorded
    /// success does not double-append.
    pub fn record_file_modified(&mut self, path: &str) {
        if !self.files_modified.iter().any(|f| f == path) {
            self.files_modified.push(path.to_string());
        }
    }

    /// Append a turn outcome to the action history.
    pub fn push_history(&mut self, entry: impl Into<String>) {
        self.action_history.push(entry.into());
    }

    /// Store the previous turn's outcome for the next context build.
    pub fn record_turn(&mut self, command: Command, result: &TurnResult) {
        self.last_turn = Some(RecordedTurn {
            command,
            success: result.success,
            details: result.details.clone(),
            affected_files: result.affected_files.clone(),
        });
    }

    /// Set the pending human hint. A second hint overwrites an unconsumed
    /// one: last write wins.
    pub fn set_human_hint(&mut self, hint: impl Into<String>) {
        self.pending_human_hint = Some(hint.into());
    }

    /// Request a graceful pause at the next turn boundary.
    pub fn request_pause(&mut self) {
        self.pause_requested = true;
    }

    /// The last action-history entry, hard-truncated to 50 characters
    /// (no ellipsis).
    #[must_use]
    pub fn current_phase(&self) -> String {
        self.action_history
            .last()
            .map(|entry| entry.chars().take(PHASE_LEN).collect())
            .unwrap_or_default()
    }
}

/// Terminal result of a loop run. Immutable once produced.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoopResult {
    /// True only when a publish succeeded.
    pub success: bool,
    /// Files modified across the run, in insertion order.
    pub files_modified: Vec<String>,
    /// Full human-readable turn log.
    pub action_history: Vec<String>,
    /// Turns executed.
    pub total_iterations: u32,
    /// Cause of a non-success exit.
    pub error: Option<String>,
}

impl LoopResult {
    /// Build a successful result from final state.
    #[must_use]
    pub fn succeeded(state: &LoopState, total_iterations: u32) -> Self {
        Self {
            success: true,
            files_modified: state.files_modified.clone(),
            action_history: state.action_history.clone(),
            total_iterations,
            error: None,
        }
    }

    /// Build a failed result from final state and a cause.
    #[must_use]
    pub fn failed(state: &LoopState, total_iterations: u32, error: impl Into<String>) -> Self {
        Self {
            success: false,
            files_modified: state.files_modified.clone(),
            action_history: state.action_history.clone(),
            total_iterations,
            error: Some(error.into()),
        }
    }
}
