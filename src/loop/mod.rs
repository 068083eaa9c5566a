//! The turn-based build loop.
//!
//! Submodules, leaf-first: [`command`] defines the closed vocabulary,
//! [`tracker`] the per-file failure policy, [`state`] the checkpointed
//! loop state, [`dispatch`] the collaborator fan-out, [`handle`] the
//! signal/query surface, [`controller`] the state machine itself, and
//! [`operations`] the process-backed default collaborators.

pub mod command;
pub mod controller;
pub mod dispatch;
pub mod handle;
pub mod operations;
pub mod state;
pub mod tracker;

pub use command::{Command, TurnResult};
pub use controller::{Collaborators, LoopController};
pub use dispatch::CommandDispatcher;
pub use handle::{ControlSignal, LoopHandle, StateSnapshot};
pub use state::{LoopResult, LoopState, RecordedTurn};
pub use tracker::{FailureVerdict, FileFailureEntry, FileFailureTracker};
