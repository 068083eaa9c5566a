//! Command dispatch: one collaborator invocation per command.
//!
//! The dispatcher is the seam between the loop's closed command
//! vocabulary and the heterogeneous collaborators that execute it. Every
//! outcome shape (change, check, test) is normalized into a [`TurnResult`]
//! before the controller sees it.

use std::sync::Arc;

use tracing::debug;

use super::command::{Command, TurnResult};
use crate::config::LoopConfig;
use crate::error::{PacksmithError, Result};
use crate::testing::traits::{
    ChangeApplier, ChangeOutcome, CheckOutcome, Decision, DependencyResolver, Publisher,
    QualityRunner, TestOutcome, TestRunner,
};

/// Maps each command to exactly one collaborator call.
pub struct CommandDispatcher {
    applier: Arc<dyn ChangeApplier>,
    quality: Arc<dyn QualityRunner>,
    tests: Arc<dyn TestRunner>,
    publisher: Arc<dyn Publisher>,
    dependencies: Arc<dyn DependencyResolver>,
    min_test_coverage: f64,
}

impl CommandDispatcher {
    /// Create a dispatcher over the given collaborators.
    #[must_use]
    pub fn new(
        applier: Arc<dyn ChangeApplier>,
        quality: Arc<dyn QualityRunner>,
        tests: Arc<dyn TestRunner>,
        publisher: Arc<dyn Publisher>,
        dependencies: Arc<dyn DependencyResolver>,
        config: &LoopConfig,
    ) -> Self {
        Self {
            applier,
            quality,
            tests,
            publisher,
            dependencies,
            min_test_coverage: config.min_test_coverage,
        }
    }

    /// Execute the decided command and normalize its outcome.
    ///
    /// # Errors
    ///
    /// Returns [`PacksmithError::Executor`] only when a collaborator
    /// fails at the infrastructure level; a failing build or test is a
    /// `success=false` [`TurnResult`], not an error.
    pub async fn dispatch(&self, decision: &Decision) -> Result<TurnResult> {
        let task = decision.task.as_ref();
        debug!(command = %decision.command, "dispatching");

        let result = match decision.command {
            Command::ApplyCodeChanges => {
                let outcome = self
                    .applier
                    .apply(task)
                    .await
                    .map_err(|e| executor_error("apply-code-changes", e))?;
                change_to_turn(outcome)
            }
            Command::AwaitDependency => {
                let outcome = self
                    .dependencies
                    .await_dependency(task)
                    .await
                    .map_err(|e| executor_error("await-dependency", e))?;
                check_to_turn(outcome)
            }
            Command::GatherContextForDependency => {
                let outcome = self
                    .dependencies
                    .gather_context(task)
                    .await
                    .map_err(|e| executor_error("gather-dependency-context", e))?;
                check_to_turn(outcome)
            }
            Command::ValidatePackageJson => {
                let outcome = self
                    .quality
                    .validate_package_json()
                    .map_err(|e| executor_error("validate-package-json", e))?;
                check_to_turn(outcome)
            }
            Command::CheckLicenseHeaders => {
                let outcome = self
                    .quality
                    .check_license_headers()
                    .map_err(|e| executor_error("check-license-headers", e))?;
                check_to_turn(outcome)
            }
            Command::RunBuild => {
                let outcome = self
                    .quality
                    .run_build()
                    .map_err(|e| executor_error("build", e))?;
                check_to_turn(outcome)
            }
            Command::RunLintCheck => {
                let outcome = self
                    .quality
                    .run_lint()
                    .map_err(|e| executor_error("lint", e))?;
                check_to_turn(outcome)
            }
            Command::RunUnitTests => {
                let outcome = self
                    .tests
                    .run_unit_tests()
                    .map_err(|e| executor_error("unit-tests", e))?;
                self.test_to_turn(outcome)
            }
            Command::PublishPackage => {
                let outcome = self
                    .publisher
                    .publish()
                    .map_err(|e| executor_error("publish", e))?;
                check_to_turn(outcome)
            }
        };

        Ok(result)
    }

    /// Normalize a test outcome, applying the coverage soft-failure rule:
    /// a passing run below the coverage floor stays successful but carries
    /// an explicit detail so the next context surfaces it. It must never
    /// reach the failure tracker.
    fn test_to_turn(&self, outcome: TestOutcome) -> TurnResult {
        if !outcome.success {
            return TurnResult {
                success: false,
                details: outcome.details,
                affected_files: outcome.error_file_paths,
            };
        }

        match outcome.coverage {
            Some(coverage) if coverage < self.min_test_coverage => TurnResult::ok_with_details(
                format!(
                    "coverage too low ({coverage}%): unit tests passed but coverage is below \
                     the {min}% requirement",
                    min = self.min_test_coverage
                ),
            ),
            _ => TurnResult {
                success: true,
                details: outcome.details,
                affected_files: Vec::new(),
            },
        }
    }
}

fn executor_error(executor: &str, error: anyhow::Error) -> PacksmithError {
    PacksmithError::executor(executor, error.to_string())
}

fn change_to_turn(outcome: ChangeOutcome) -> TurnResult {
    TurnResult {
        success: outcome.success,
        details: outcome.details,
        affected_files: outcome.files_modified,
    }
}

fn check_to_turn(outcome: CheckOutcome) -> TurnResult {
    TurnResult {
        success: outcome.success,
        details: outcome.details,
        affected_files: outcome.error_file_paths,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::mocks::{
        MockChangeApplier, MockDependencyResolver, MockPublisher, MockQualityRunner,
        MockTestRunner,
    };
    use crate::testing::traits::TestOutcome;

    fn dispatcher_with(
        applier: MockChangeApplier,
        quality: MockQualityRunner,
        tests: MockTestRunner,
        publisher: MockPublisher,
    ) -> CommandDispatcher {
        CommandDispatcher::new(
            Arc::new(applier),
            Arc::new(quality),
            Arc::new(tests),
            Arc::new(publisher),
            Arc::new(MockDependencyResolver::new()),
            &LoopConfig::default(),
        )
    }

    fn default_dispatcher() -> CommandDispatcher {
        dispatcher_with(
            MockChangeApplier::new(),
            MockQualityRunner::new(),
            MockTestRunner::new(),
            MockPublisher::new(),
        )
    }

    #[tokio::test]
    async fn test_apply_code_changes_maps_files() {
        let applier = MockChangeApplier::new()
            .with_fallback(ChangeOutcome::applied(vec!["a.ts".into(), "b.json".into()]));
        let dispatcher = dispatcher_with(
            applier,
            MockQualityRunner::new(),
            MockTestRunner::new(),
            MockPublisher::new(),
        );

        let result = dispatcher
            .dispatch(&Decision::new(Command::ApplyCodeChanges))
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.affected_files, vec!["a.ts", "b.json"]);
    }

    #[tokio::test]
    async fn test_failed_build_maps_diagnostics() {
        let quality = MockQualityRunner::new().with_build_fallback(
            CheckOutcome::fail("tsc exited 2").with_files(vec!["src/index.ts".into()]),
        );
        let dispatcher = dispatcher_with(
            MockChangeApplier::new(),
            quality,
            MockTestRunner::new(),
            MockPublisher::new(),
        );

        let result = dispatcher
            .dispatch(&Decision::new(Command::RunBuild))
            .await
            .unwrap();
        assert!(!result.success);
        assert_eq!(result.details.as_deref(), Some("tsc exited 2"));
        assert_eq!(result.affected_files, vec!["src/index.ts"]);
    }

    #[tokio::test]
    async fn test_low_coverage_is_soft_failure() {
        let tests = MockTestRunner::new().with_coverage(75.0);
        let dispatcher = dispatcher_with(
            MockChangeApplier::new(),
            MockQualityRunner::new(),
            tests,
            MockPublisher::new(),
        );

        let result = dispatcher
            .dispatch(&Decision::new(Command::RunUnitTests))
            .await
            .unwrap();

        // Success with a detail, no implicated files: the tracker never
        // sees this turn as a failure.
        assert!(result.success);
        assert!(result.affected_files.is_empty());
        let details = result.details.unwrap();
        assert!(details.contains("coverage too low (75%)"));
        assert!(details.contains("90% requirement"));
    }

    #[tokio::test]
    async fn test_coverage_at_floor_passes_clean() {
        let tests = MockTestRunner::new().with_coverage(90.0);
        let dispatcher = dispatcher_with(
            MockChangeApplier::new(),
            MockQualityRunner::new(),
            tests,
            MockPublisher::new(),
        );

        let result = dispatcher
            .dispatch(&Decision::new(Command::RunUnitTests))
            .await
            .unwrap();
        assert!(result.success);
        assert!(result.details.is_none());
    }

    #[tokio::test]
    async fn test_failing_tests_keep_diagnostics() {
        let tests = MockTestRunner::new().with_outcome(
            TestOutcome::failed("2 tests failed").with_files(vec!["src/math.test.ts".into()]),
        );
        let dispatcher = dispatcher_with(
            MockChangeApplier::new(),
            MockQualityRunner::new(),
            tests,
            MockPublisher::new(),
        );

        let result = dispatcher
            .dispatch(&Decision::new(Command::RunUnitTests))
            .await
            .unwrap();
        assert!(!result.success);
        assert_eq!(result.affected_files, vec!["src/math.test.ts"]);
    }

    #[tokio::test]
    async fn test_every_command_dispatches() {
        let dispatcher = default_dispatcher();
        for command in Command::all() {
            let result = dispatcher.dispatch(&Decision::new(command)).await.unwrap();
            assert!(result.success, "{command} should pass with default mocks");
        }
    }
}
