//! Signal and query surface for a running loop.
//!
//! Operators and UIs interact with the controller only through a
//! [`LoopHandle`]: mutating signals travel over a message inbox the
//! controller drains once per turn, and state queries read a snapshot the
//! controller publishes at every turn boundary. Neither path touches live
//! loop state, so a query can never observe a half-finished turn.

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tracing::debug;

use super::state::LoopState;
use super::tracker::FileFailureTracker;

/// A mutating signal delivered to the controller's inbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlSignal {
    /// A human operator supplied a hint for the decision provider.
    HumanIntervention(String),
    /// Stop cleanly at the next turn boundary.
    GracefulPause,
}

/// Read-only view of loop state, published at turn boundaries.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StateSnapshot {
    /// Turns executed so far.
    pub loop_count: u32,
    /// Last action-history entry, hard-truncated to 50 characters.
    pub current_phase: String,
    /// Files modified so far, in insertion order.
    pub files_modified: Vec<String>,
    /// Length of the full action history.
    pub action_history_length: usize,
    /// Current per-file failure records.
    pub failure_tracker: FileFailureTracker,
    /// Whether a pause has been requested.
    pub pause_requested: bool,
}

impl StateSnapshot {
    /// Project a snapshot from loop state.
    #[must_use]
    pub fn of(state: &LoopState) -> Self {
        Self {
            loop_count: state.loop_count,
            current_phase: state.current_phase(),
            files_modified: state.files_modified.clone(),
            action_history_length: state.action_history.len(),
            failure_tracker: state.failure_tracker.clone(),
            pause_requested: state.pause_requested,
        }
    }
}

/// Cloneable handle for signalling and querying a running loop.
///
/// # Example
///
/// ```rust,ignore
/// let (controller, handle) = LoopController::new(config, collaborators);
/// handle.human_intervention("pin the lodash version");
/// handle.graceful_pause();
/// let snapshot = handle.state();
/// ```
#[derive(Debug, Clone)]
pub struct LoopHandle {
    signals: mpsc::UnboundedSender<ControlSignal>,
    snapshots: watch::Receiver<StateSnapshot>,
}

impl LoopHandle {
    pub(crate) fn new(
        signals: mpsc::UnboundedSender<ControlSignal>,
        snapshots: watch::Receiver<StateSnapshot>,
    ) -> Self {
        Self { signals, snapshots }
    }

    /// Deliver a hint to the decision provider. Consumed by the next
    /// context build; a second hint before consumption overwrites the
    /// first (last write wins).
    pub fn human_intervention(&self, hint: impl Into<String>) {
        let hint = hint.into();
        if self
            .signals
            .send(ControlSignal::HumanIntervention(hint))
            .is_err()
        {
            debug!("hint dropped: loop already finished");
        }
    }

    /// Request a graceful pause. Takes effect at the next turn boundary;
    /// the in-flight command is never interrupted.
    pub fn graceful_pause(&self) {
        if self.signals.send(ControlSignal::GracefulPause).is_err() {
            debug!("pause dropped: loop already finished");
        }
    }

    /// The latest published state snapshot.
    #[must_use]
    pub fn state(&self) -> StateSnapshot {
        self.snapshots.borrow().clone()
    }
}

/// Create the inbox/snapshot channel pair for a controller and its handle.
pub(crate) fn channel(
    initial: StateSnapshot,
) -> (
    mpsc::UnboundedReceiver<ControlSignal>,
    watch::Sender<StateSnapshot>,
    LoopHandle,
) {
    let (signal_tx, signal_rx) = mpsc::unbounded_channel();
    let (snapshot_tx, snapshot_rx) = watch::channel(initial);
    let handle = LoopHandle::new(signal_tx, snapshot_rx);
    (signal_rx, snapshot_tx, handle)
}
