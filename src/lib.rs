//! Packsmith - Turn-Based Build-Loop Controller
//!
//! A durable, resumable state machine that drives an LLM-assisted
//! code-generation agent through a bounded, self-correcting build loop
//! until the target package compiles, lints, tests, and publishes, or
//! the loop safely gives up and hands control to a human.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`config`] - Budget constants and loop configuration
//! - [`context`] - Rendering loop state for the decision provider
//! - [`error`] - Custom error types and handling
//! - [`fingerprint`] - Error-message fingerprinting
//! - [`r#loop`] - The controller, dispatcher, failure tracker, and
//!   signal/query surface
//! - [`session`] - Checkpointed session state and file persistence
//! - [`testing`] - Collaborator traits and mocks
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use packsmith::config::LoopConfig;
//! use packsmith::r#loop::{Collaborators, LoopController};
//!
//! let collaborators = Collaborators::new(
//!     provider, applier, quality, tests, publisher, dependencies,
//! );
//! let (controller, handle) = LoopController::new(LoopConfig::default(), collaborators)?;
//!
//! // From another task: nudge or stop the loop.
//! handle.human_intervention("pin the lodash version");
//!
//! let result = controller.run().await?;
//! println!("published: {}", result.success);
//! ```

pub mod config;
pub mod context;
pub mod error;
pub mod fingerprint;
pub mod r#loop;
pub mod session;
pub mod testing;

// Re-export commonly used types
pub use error::{PacksmithError, Result};

pub use config::{
    LoopConfig, MAX_FILE_MODIFICATIONS_BEFORE_META, MAX_LINT_FIX_ATTEMPTS, MAX_LOOP_ITERATIONS,
    MAX_META_CORRECTION_ATTEMPTS, MIN_TEST_COVERAGE,
};

pub use r#loop::{
    Collaborators, Command, ControlSignal, FileFailureTracker, LoopController, LoopHandle,
    LoopResult, LoopState, StateSnapshot, TurnResult,
};

pub use context::ContextBuilder;
pub use session::{SessionMetadata, SessionState};

// Re-export collaborator seams for convenience
pub use testing::{
    ChangeApplier, ChangeOutcome, CheckOutcome, Decision, DecisionProvider, DependencyResolver,
    EscalationSink, Publisher, QualityRunner, StateStore, TestOutcome, TestRunner,
};
