//! Trait definitions for the loop's external collaborators.
//!
//! The controller never talks to a model provider, a build tool, or a
//! storage backend directly: every seam is a trait here, so loop logic is
//! unit-testable with the mocks in [`super::mocks`] and runnable with the
//! process-backed implementations in `loop::operations`.

use anyhow::Result;
use async_trait::async_trait;

use crate::r#loop::command::Command;
use crate::session::SessionState;

/// A command chosen by the decision provider, with an optional free-form
/// task payload for commands that need one (code changes, dependency
/// gathering).
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    /// The command to dispatch this turn.
    pub command: Command,
    /// Provider-defined task payload, passed through untouched.
    pub task: Option<serde_json::Value>,
}

impl Decision {
    /// A decision with no task payload.
    #[must_use]
    pub fn new(command: Command) -> Self {
        Self {
            command,
            task: None,
        }
    }

    /// Attach a task payload.
    #[must_use]
    pub fn with_task(mut self, task: serde_json::Value) -> Self {
        self.task = Some(task);
        self
    }
}

/// Result of applying a set of code changes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeOutcome {
    /// Whether the changes applied cleanly.
    pub success: bool,
    /// Diagnostic detail on failure.
    pub details: Option<String>,
    /// Files the change touched.
    pub files_modified: Vec<String>,
    /// Commit recorded for the change, when the applier commits.
    pub commit_hash: Option<String>,
}

impl ChangeOutcome {
    /// A clean application touching the given files.
    #[must_use]
    pub fn applied(files: Vec<String>) -> Self {
        Self {
            success: true,
            files_modified: files,
            ..Self::default()
        }
    }

    /// A failed application with diagnostic detail.
    #[must_use]
    pub fn failed(details: impl Into<String>, files: Vec<String>) -> Self {
        Self {
            success: false,
            details: Some(details.into()),
            files_modified: files,
            commit_hash: None,
        }
    }
}

/// Result of a build, lint, publish, or validation step.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CheckOutcome {
    /// Whether the step passed.
    pub success: bool,
    /// Raw diagnostic output on failure, or informational detail.
    pub details: Option<String>,
    /// Files the diagnostics point at.
    pub error_file_paths: Vec<String>,
}

impl CheckOutcome {
    /// A passing outcome.
    #[must_use]
    pub fn pass() -> Self {
        Self {
            success: true,
            ..Self::default()
        }
    }

    /// A failing outcome with diagnostic detail.
    #[must_use]
    pub fn fail(details: impl Into<String>) -> Self {
        Self {
            success: false,
            details: Some(details.into()),
            error_file_paths: Vec::new(),
        }
    }

    /// Attach the files the diagnostics implicate.
    #[must_use]
    pub fn with_files(mut self, files: Vec<String>) -> Self {
        self.error_file_paths = files;
        self
    }
}

/// Result of a unit-test run, including coverage when the runner
/// reports it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TestOutcome {
    /// Whether the tests passed.
    pub success: bool,
    /// Raw diagnostic output on failure.
    pub details: Option<String>,
    /// Files the failing tests point at.
    pub error_file_paths: Vec<String>,
    /// Line coverage in percent, when measured.
    pub coverage: Option<f64>,
}

impl TestOutcome {
    /// A passing run with the given coverage.
    #[must_use]
    pub fn passed(coverage: f64) -> Self {
        Self {
            success: true,
            coverage: Some(coverage),
            ..Self::default()
        }
    }

    /// A failing run with diagnostic detail.
    #[must_use]
    pub fn failed(details: impl Into<String>) -> Self {
        Self {
            success: false,
            details: Some(details.into()),
            error_file_paths: Vec::new(),
            coverage: None,
        }
    }

    /// Attach the files the failures implicate.
    #[must_use]
    pub fn with_files(mut self, files: Vec<String>) -> Self {
        self.error_file_paths = files;
        self
    }
}

/// The LLM/agent brain: given the rendered context and the full action
/// history, choose the next command.
#[async_trait]
pub trait DecisionProvider: Send + Sync {
    /// Choose the next command.
    ///
    /// # Errors
    ///
    /// Returns an error when the provider is unreachable or answers
    /// outside the command vocabulary; the turn did not complete.
    async fn choose_command(&self, context: &str, action_history: &[String]) -> Result<Decision>;
}

/// Applies agent-produced code changes to the working tree.
#[async_trait]
pub trait ChangeApplier: Send + Sync {
    /// Apply the changes described by the task payload.
    ///
    /// # Errors
    ///
    /// Returns an error only for infrastructure failures; a rejected or
    /// broken change is a `success=false` outcome, not an error.
    async fn apply(&self, task: Option<&serde_json::Value>) -> Result<ChangeOutcome>;
}

/// Build, lint, and manifest validation steps.
///
/// Mirrors the shape of the tools it fronts: each method runs one check
/// to completion and reports a normalized outcome.
pub trait QualityRunner: Send + Sync {
    /// Validate the package manifest.
    ///
    /// # Errors
    ///
    /// Returns an error if the validator itself cannot run.
    fn validate_package_json(&self) -> Result<CheckOutcome>;

    /// Check license headers across the package.
    ///
    /// # Errors
    ///
    /// Returns an error if the checker itself cannot run.
    fn check_license_headers(&self) -> Result<CheckOutcome>;

    /// Run the package build.
    ///
    /// # Errors
    ///
    /// Returns an error if the build tool cannot be spawned.
    fn run_build(&self) -> Result<CheckOutcome>;

    /// Run the lint check.
    ///
    /// # Errors
    ///
    /// Returns an error if the linter cannot be spawned.
    fn run_lint(&self) -> Result<CheckOutcome>;
}

/// Unit-test execution with coverage measurement.
pub trait TestRunner: Send + Sync {
    /// Run the unit tests.
    ///
    /// # Errors
    ///
    /// Returns an error if the test runner cannot be spawned.
    fn run_unit_tests(&self) -> Result<TestOutcome>;
}

/// Publishes the package to its registry.
pub trait Publisher: Send + Sync {
    /// Publish the package.
    ///
    /// # Errors
    ///
    /// Returns an error if the publish tool cannot be spawned.
    fn publish(&self) -> Result<CheckOutcome>;
}

/// Dependency coordination: waiting on upstream packages and gathering
/// context about them.
#[async_trait]
pub trait DependencyResolver: Send + Sync {
    /// Block until the awaited dependency is available.
    async fn await_dependency(&self, task: Option<&serde_json::Value>) -> Result<CheckOutcome>;

    /// Collect context about an unresolved dependency.
    async fn gather_context(&self, task: Option<&serde_json::Value>) -> Result<CheckOutcome>;
}

/// Durable state storage. The controller calls this at turn boundaries
/// and owns no storage policy of its own.
pub trait StateStore: Send + Sync {
    /// Persist the session state.
    ///
    /// # Errors
    ///
    /// Returns an error when the state cannot be written.
    fn save(&self, state: &SessionState) -> Result<()>;

    /// Load the previously persisted session state, if any.
    ///
    /// # Errors
    ///
    /// Returns an error when the store is unreadable; a missing or
    /// corrupted session is `Ok(None)`.
    fn load(&self) -> Result<Option<SessionState>>;

    /// Remove the persisted session state.
    ///
    /// # Errors
    ///
    /// Returns an error when deletion fails.
    fn delete(&self) -> Result<()>;
}

/// Fire-and-forget notification channel for human escalation. Failures
/// are logged by callers and never abort the loop.
#[async_trait]
pub trait EscalationSink: Send + Sync {
    /// Deliver a notification.
    async fn notify(&self, subject: &str, body: &str) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_outcome_pass() {
        let outcome = CheckOutcome::pass();
        assert!(outcome.success);
        assert!(outcome.details.is_none());
        assert!(outcome.error_file_paths.is_empty());
    }

    #[test]
    fn test_check_outcome_fail_with_files() {
        let outcome =
            CheckOutcome::fail("2 problems").with_files(vec!["src/index.ts".to_string()]);
        assert!(!outcome.success);
        assert_eq!(outcome.details.as_deref(), Some("2 problems"));
        assert_eq!(outcome.error_file_paths, vec!["src/index.ts"]);
    }

    #[test]
    fn test_test_outcome_passed_carries_coverage() {
        let outcome = TestOutcome::passed(93.5);
        assert!(outcome.success);
        assert_eq!(outcome.coverage, Some(93.5));
    }

    #[test]
    fn test_change_outcome_applied() {
        let outcome = ChangeOutcome::applied(vec!["a.ts".to_string()]);
        assert!(outcome.success);
        assert_eq!(outcome.files_modified, vec!["a.ts"]);
    }

    #[test]
    fn test_decision_with_task() {
        let decision = Decision::new(Command::ApplyCodeChanges)
            .with_task(serde_json::json!({"file": "a.ts"}));
        assert_eq!(decision.command, Command::ApplyCodeChanges);
        assert!(decision.task.is_some());
    }
}
