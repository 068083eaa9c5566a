//! End-to-end loop tests over mock collaborators.
//!
//! These drive the full controller (context building, decisions,
//! dispatch, failure tracking, signals) and assert on the terminal
//! [`LoopResult`] plus the contexts the decision provider actually saw.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use packsmith::config::LoopConfig;
use packsmith::r#loop::{Collaborators, Command, LoopController, LoopHandle};
use packsmith::session::SessionState;
use packsmith::testing::mocks::{
    MockChangeApplier, MockDecisionProvider, MockDependencyResolver, MockEscalationSink,
    MockPublisher, MockQualityRunner, MockStateStore, MockTestRunner,
};
use packsmith::testing::traits::{
    ChangeOutcome, CheckOutcome, Decision, QualityRunner, TestOutcome,
};

const STUCK_ERROR: &str = "error TS2304: Cannot find name 'foo'.";

fn decisions(commands: impl IntoIterator<Item = Command>) -> Vec<Decision> {
    commands.into_iter().map(Decision::new).collect()
}

fn collaborators_with(
    provider: MockDecisionProvider,
    applier: MockChangeApplier,
    quality: MockQualityRunner,
    tests: MockTestRunner,
    publisher: MockPublisher,
) -> Collaborators {
    Collaborators::new(
        Arc::new(provider),
        Arc::new(applier),
        Arc::new(quality),
        Arc::new(tests),
        Arc::new(publisher),
        Arc::new(MockDependencyResolver::new()),
    )
}

// =============================================================================
// Happy path
// =============================================================================

#[tokio::test]
async fn full_run_to_publish() {
    let provider = MockDecisionProvider::new()
        .with_decisions(decisions([
            Command::ApplyCodeChanges,
            Command::RunBuild,
            Command::RunLintCheck,
            Command::RunUnitTests,
            Command::ValidatePackageJson,
            Command::CheckLicenseHeaders,
            Command::PublishPackage,
        ]));
    let applier = MockChangeApplier::new().with_outcomes([ChangeOutcome::applied(vec![
        "src/index.ts".into(),
        "package.json".into(),
    ])]);

    let collab = collaborators_with(
        provider,
        applier,
        MockQualityRunner::new(),
        MockTestRunner::new(),
        MockPublisher::new(),
    );
    let (controller, _handle) = LoopController::new(LoopConfig::default(), collab).unwrap();
    let result = controller.run().await.unwrap();

    assert!(result.success);
    assert!(result.error.is_none());
    assert_eq!(result.total_iterations, 7);
    assert_eq!(result.files_modified, vec!["src/index.ts", "package.json"]);
    assert_eq!(result.action_history.len(), 7);
    assert!(result.action_history[6].contains("PUBLISH_PACKAGE succeeded"));
}

#[tokio::test]
async fn retried_success_does_not_duplicate_files() {
    // The applier reports the same file twice across turns, as an
    // at-least-once retry would.
    let provider = MockDecisionProvider::new().with_decisions(decisions([
        Command::ApplyCodeChanges,
        Command::ApplyCodeChanges,
    ]));
    let applier = MockChangeApplier::new()
        .with_fallback(ChangeOutcome::applied(vec!["src/index.ts".into()]));

    let collab = collaborators_with(
        provider,
        applier,
        MockQualityRunner::new(),
        MockTestRunner::new(),
        MockPublisher::new(),
    );
    let (controller, _handle) = LoopController::new(LoopConfig::default(), collab).unwrap();
    let result = controller.run().await.unwrap();

    assert!(result.success);
    assert_eq!(result.files_modified, vec!["src/index.ts"]);
}

// =============================================================================
// Iteration budget
// =============================================================================

#[tokio::test]
async fn forty_iterations_without_publish_exhausts_budget() {
    let provider = MockDecisionProvider::new().with_fallback(Decision::new(Command::RunBuild));

    let collab = collaborators_with(
        provider,
        MockChangeApplier::new(),
        MockQualityRunner::new(),
        MockTestRunner::new(),
        MockPublisher::new(),
    );
    let (controller, _handle) = LoopController::new(LoopConfig::default(), collab).unwrap();
    let result = controller.run().await.unwrap();

    assert!(!result.success);
    assert_eq!(result.total_iterations, 40);
    let error = result.error.unwrap();
    assert!(error.contains("Maximum iterations (40)"));
    assert_eq!(result.action_history.len(), 40);
}

// =============================================================================
// Failure tracking, meta-correction, termination
// =============================================================================

#[tokio::test]
async fn third_identical_failure_injects_meta_correction_once() {
    let provider = MockDecisionProvider::new()
        .with_fallback(Decision::new(Command::ApplyCodeChanges));
    let applier = MockChangeApplier::new().with_outcomes([
        ChangeOutcome::failed(STUCK_ERROR, vec!["src/index.ts".into()]),
        ChangeOutcome::failed(STUCK_ERROR, vec!["src/index.ts".into()]),
        ChangeOutcome::failed(STUCK_ERROR, vec!["src/index.ts".into()]),
        ChangeOutcome::failed(STUCK_ERROR, vec!["src/index.ts".into()]),
        ChangeOutcome::applied(vec!["src/index.ts".into()]),
    ]);

    let provider = Arc::new(provider);
    let collab = Collaborators::new(
        provider.clone(),
        Arc::new(applier),
        Arc::new(MockQualityRunner::new()),
        Arc::new(MockTestRunner::new()),
        Arc::new(MockPublisher::new()),
        Arc::new(MockDependencyResolver::new()),
    );

    // Turn five recovers; the budget then runs out on turn six.
    let config = LoopConfig::default().with_max_iterations(6);
    let (controller, _handle) = LoopController::new(config, collab).unwrap();
    let result = controller.run().await.unwrap();
    assert!(!result.success);
    assert_eq!(result.total_iterations, 6);

    let contexts = provider.contexts();
    // Context for turn 4 (index 3) follows the third identical failure.
    assert!(contexts[3].contains("Correction Required"));
    assert!(contexts[3].contains("src/index.ts"));
    assert!(contexts[3].contains("3 times"));
    assert!(contexts[3].contains("Expected Format"));
    assert!(contexts[3].contains("Issue Observed"));
    assert!(contexts[3].contains(STUCK_ERROR));
    assert!(contexts[3].contains("2 attempt(s) remain"));

    // Issued exactly once: the fourth failure does not re-send.
    assert!(!contexts[4].contains("Correction Required"));
}

#[tokio::test]
async fn sixth_identical_failure_terminates_naming_the_file() {
    let provider = MockDecisionProvider::new()
        .with_fallback(Decision::new(Command::ApplyCodeChanges));
    let applier = MockChangeApplier::new().with_fallback(ChangeOutcome::failed(
        STUCK_ERROR,
        vec!["src/index.ts".into()],
    ));

    let collab = collaborators_with(
        provider,
        applier,
        MockQualityRunner::new(),
        MockTestRunner::new(),
        MockPublisher::new(),
    );
    let (controller, _handle) = LoopController::new(LoopConfig::default(), collab).unwrap();
    let result = controller.run().await.unwrap();

    assert!(!result.success);
    // Three failures to escalate, two more inside the meta budget, the
    // sixth terminates.
    assert_eq!(result.total_iterations, 6);
    assert!(result.error.unwrap().contains("src/index.ts"));
}

#[tokio::test]
async fn success_wipes_failure_history() {
    let provider = MockDecisionProvider::new()
        .with_decisions(decisions([
            Command::RunBuild,
            Command::RunBuild,
            Command::ApplyCodeChanges,
            Command::PublishPackage,
        ]));
    let quality = MockQualityRunner::new().with_build_outcomes([
        CheckOutcome::fail(STUCK_ERROR).with_files(vec!["src/index.ts".into()]),
        CheckOutcome::fail(STUCK_ERROR).with_files(vec!["src/index.ts".into()]),
    ]);
    let applier = MockChangeApplier::new()
        .with_outcomes([ChangeOutcome::applied(vec!["src/index.ts".into()])]);

    let collab = collaborators_with(
        provider,
        applier,
        quality,
        MockTestRunner::new(),
        MockPublisher::new(),
    );
    let (controller, handle) = LoopController::new(LoopConfig::default(), collab).unwrap();
    let result = controller.run().await.unwrap();

    assert!(result.success);
    let snapshot = handle.state();
    assert!(snapshot.failure_tracker.is_empty());
    assert_eq!(snapshot.files_modified, vec!["src/index.ts"]);
}

#[tokio::test]
async fn alternating_errors_never_escalate() {
    // Error fingerprint changes every turn, so the same-error streak
    // never reaches three and the loop runs to exhaustion instead.
    let provider = MockDecisionProvider::new()
        .with_fallback(Decision::new(Command::ApplyCodeChanges));
    let errors: Vec<ChangeOutcome> = (0..10)
        .map(|i| {
            ChangeOutcome::failed(
                format!("distinct error number {i} with its own message"),
                vec!["src/index.ts".into()],
            )
        })
        .collect();
    let applier = MockChangeApplier::new()
        .with_outcomes(errors)
        .with_fallback(ChangeOutcome::applied(vec!["src/index.ts".into()]));

    let provider = Arc::new(provider);
    let collab = Collaborators::new(
        provider.clone(),
        Arc::new(applier),
        Arc::new(MockQualityRunner::new()),
        Arc::new(MockTestRunner::new()),
        Arc::new(MockPublisher::new()),
        Arc::new(MockDependencyResolver::new()),
    );

    let config = LoopConfig::default().with_max_iterations(12);
    let (controller, _handle) = LoopController::new(config, collab).unwrap();
    let result = controller.run().await.unwrap();

    assert!(!result.success);
    assert_eq!(result.total_iterations, 12);
    for context in provider.contexts() {
        assert!(!context.contains("Correction Required"));
    }
}

// =============================================================================
// Coverage soft failure
// =============================================================================

#[tokio::test]
async fn low_coverage_surfaces_without_tripping_the_tracker() {
    let provider = MockDecisionProvider::new().with_decisions(decisions([
        Command::RunUnitTests,
        Command::PublishPackage,
    ]));
    let tests = MockTestRunner::new().with_coverage(75.0);

    let provider = Arc::new(provider);
    let collab = Collaborators::new(
        provider.clone(),
        Arc::new(MockChangeApplier::new()),
        Arc::new(MockQualityRunner::new()),
        Arc::new(tests),
        Arc::new(MockPublisher::new()),
        Arc::new(MockDependencyResolver::new()),
    );

    let (controller, handle) = LoopController::new(LoopConfig::default(), collab).unwrap();
    let result = controller.run().await.unwrap();

    assert!(result.success);
    // The turn itself succeeded...
    assert!(result.action_history[0].contains("RUN_UNIT_TESTS succeeded"));
    // ...but the next context carries the coverage warning.
    let contexts = provider.contexts();
    assert!(contexts[1].contains("coverage too low (75%)"));
    assert!(contexts[1].contains("90% requirement"));
    // And no failure entry was ever created.
    assert!(handle.state().failure_tracker.is_empty());
}

#[tokio::test]
async fn failing_tests_do_trip_the_tracker() {
    let provider = MockDecisionProvider::new().with_decisions(decisions([
        Command::RunUnitTests,
        Command::PublishPackage,
    ]));
    let tests = MockTestRunner::new().with_outcome(
        TestOutcome::failed("2 tests failed").with_files(vec!["src/math.test.ts".into()]),
    );

    let collab = collaborators_with(
        provider,
        MockChangeApplier::new(),
        MockQualityRunner::new(),
        tests,
        MockPublisher::new(),
    );
    let (controller, handle) = LoopController::new(LoopConfig::default(), collab).unwrap();
    let result = controller.run().await.unwrap();

    assert!(result.success);
    let snapshot = handle.state();
    assert_eq!(snapshot.failure_tracker.len(), 1);
}

// =============================================================================
// Signals: hints and pause
// =============================================================================

#[tokio::test]
async fn hint_appears_in_exactly_one_context() {
    let provider = MockDecisionProvider::new().with_decisions(decisions([
        Command::RunBuild,
        Command::RunLintCheck,
        Command::PublishPackage,
    ]));

    let provider = Arc::new(provider);
    let collab = Collaborators::new(
        provider.clone(),
        Arc::new(MockChangeApplier::new()),
        Arc::new(MockQualityRunner::new()),
        Arc::new(MockTestRunner::new()),
        Arc::new(MockPublisher::new()),
        Arc::new(MockDependencyResolver::new()),
    );

    let (controller, handle) = LoopController::new(LoopConfig::default(), collab).unwrap();
    handle.human_intervention("pin typescript to 5.4");
    let result = controller.run().await.unwrap();

    assert!(result.success);
    let contexts = provider.contexts();
    assert!(contexts[0].contains("## Human Hint"));
    assert!(contexts[0].contains("pin typescript to 5.4"));
    assert!(!contexts[1].contains("## Human Hint"));
    assert!(!contexts[2].contains("## Human Hint"));
}

#[tokio::test]
async fn second_hint_overwrites_unconsumed_first() {
    let provider = MockDecisionProvider::new()
        .with_decisions(decisions([Command::PublishPackage]));

    let provider = Arc::new(provider);
    let collab = Collaborators::new(
        provider.clone(),
        Arc::new(MockChangeApplier::new()),
        Arc::new(MockQualityRunner::new()),
        Arc::new(MockTestRunner::new()),
        Arc::new(MockPublisher::new()),
        Arc::new(MockDependencyResolver::new()),
    );

    let (controller, handle) = LoopController::new(LoopConfig::default(), collab).unwrap();
    handle.human_intervention("first hint");
    handle.human_intervention("second hint");
    let result = controller.run().await.unwrap();

    assert!(result.success);
    let contexts = provider.contexts();
    assert!(contexts[0].contains("second hint"));
    assert!(!contexts[0].contains("first hint"));
}

/// Quality runner that requests a pause through the handle while a
/// configured build call is still in flight.
struct PausingQualityRunner {
    pause_on_call: u32,
    calls: AtomicU32,
    handle: Mutex<Option<LoopHandle>>,
}

impl PausingQualityRunner {
    fn new(pause_on_call: u32) -> Self {
        Self {
            pause_on_call,
            calls: AtomicU32::new(0),
            handle: Mutex::new(None),
        }
    }

    fn attach(&self, handle: LoopHandle) {
        *self.handle.lock().unwrap() = Some(handle);
    }
}

impl QualityRunner for PausingQualityRunner {
    fn validate_package_json(&self) -> anyhow::Result<CheckOutcome> {
        Ok(CheckOutcome::pass())
    }

    fn check_license_headers(&self) -> anyhow::Result<CheckOutcome> {
        Ok(CheckOutcome::pass())
    }

    fn run_build(&self) -> anyhow::Result<CheckOutcome> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call == self.pause_on_call {
            if let Some(handle) = self.handle.lock().unwrap().as_ref() {
                handle.graceful_pause();
            }
        }
        Ok(CheckOutcome::pass())
    }

    fn run_lint(&self) -> anyhow::Result<CheckOutcome> {
        Ok(CheckOutcome::pass())
    }
}

#[tokio::test]
async fn pause_exits_after_the_in_flight_turn() {
    // Two applies record the files, then builds; the pause arrives
    // during turn five's build, so the loop stops with exactly five
    // iterations recorded.
    let provider = MockDecisionProvider::new()
        .with_decisions(decisions([
            Command::ApplyCodeChanges,
            Command::ApplyCodeChanges,
        ]))
        .with_fallback(Decision::new(Command::RunBuild));
    let applier = MockChangeApplier::new().with_outcomes([
        ChangeOutcome::applied(vec!["a.ts".into()]),
        ChangeOutcome::applied(vec!["b.json".into()]),
    ]);
    let quality = Arc::new(PausingQualityRunner::new(3));

    let collab = Collaborators::new(
        Arc::new(provider),
        Arc::new(applier),
        quality.clone(),
        Arc::new(MockTestRunner::new()),
        Arc::new(MockPublisher::new()),
        Arc::new(MockDependencyResolver::new()),
    );

    let (controller, handle) = LoopController::new(LoopConfig::default(), collab).unwrap();
    quality.attach(handle.clone());
    let result = controller.run().await.unwrap();

    assert!(!result.success);
    assert_eq!(result.total_iterations, 5);
    let error = result.error.unwrap();
    assert!(error.contains("paused by user request"));
    assert!(error.contains("5 iterations"));
    assert!(error.contains("2 files modified"));
    assert!(error.contains("resumable"));

    let snapshot = handle.state();
    assert!(snapshot.pause_requested);
    assert_eq!(snapshot.loop_count, 5);
}

// =============================================================================
// Escalation wait
// =============================================================================

#[tokio::test]
async fn escalation_timeout_aborts_with_a_specific_error() {
    let provider = MockDecisionProvider::new()
        .with_fallback(Decision::new(Command::ApplyCodeChanges));
    let applier = MockChangeApplier::new().with_fallback(ChangeOutcome::failed(
        STUCK_ERROR,
        vec!["src/index.ts".into()],
    ));
    let sink = Arc::new(MockEscalationSink::new());

    let mut config = LoopConfig::default();
    config.escalation_timeout_secs = Some(0);

    let collab = collaborators_with(
        provider,
        applier,
        MockQualityRunner::new(),
        MockTestRunner::new(),
        MockPublisher::new(),
    )
    .with_escalation(sink.clone());

    let (controller, _handle) = LoopController::new(config, collab).unwrap();
    let result = controller.run().await.unwrap();

    assert!(!result.success);
    let error = result.error.unwrap();
    assert!(error.contains("Escalation timed out"));
    assert!(error.contains("src/index.ts"));

    let notifications = sink.notifications();
    assert_eq!(notifications.len(), 1);
    assert!(notifications[0].1.contains("src/index.ts"));
}

#[tokio::test]
async fn human_response_during_escalation_resumes_the_loop() {
    let provider = MockDecisionProvider::new()
        .with_decisions(decisions(std::iter::repeat_n(Command::ApplyCodeChanges, 7)))
        .with_fallback(Decision::new(Command::PublishPackage));
    let applier = MockChangeApplier::new()
        .with_outcomes((0..6).map(|_| {
            ChangeOutcome::failed(STUCK_ERROR, vec!["src/index.ts".into()])
        }))
        .with_fallback(ChangeOutcome::applied(vec!["src/index.ts".into()]));
    let sink = Arc::new(MockEscalationSink::new());

    let mut config = LoopConfig::default();
    config.escalation_timeout_secs = Some(30);

    let provider = Arc::new(provider);
    let collab = Collaborators::new(
        provider.clone(),
        Arc::new(applier),
        Arc::new(MockQualityRunner::new()),
        Arc::new(MockTestRunner::new()),
        Arc::new(MockPublisher::new()),
        Arc::new(MockDependencyResolver::new()),
    )
    .with_escalation(sink.clone());

    let (controller, handle) = LoopController::new(config, collab).unwrap();

    // Answer the escalation as soon as the notification lands.
    let responder_sink = sink.clone();
    let responder = tokio::spawn(async move {
        loop {
            if !responder_sink.notifications().is_empty() {
                handle.human_intervention("rewrite index.ts against the v2 api");
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
    });

    let result = controller.run().await.unwrap();
    responder.await.unwrap();

    // The seventh apply succeeds and the fallback publish ends the run.
    assert!(result.success);
    assert!(result.total_iterations > 6);

    // The hint reached the context right after the escalation.
    let hinted = provider
        .contexts()
        .iter()
        .any(|c| c.contains("rewrite index.ts against the v2 api"));
    assert!(hinted);
}

// =============================================================================
// Persistence and resume
// =============================================================================

#[tokio::test]
async fn resume_continues_from_saved_session() {
    let mut saved = SessionState::new();
    saved.loop_state.loop_count = 5;
    saved.loop_state.record_file_modified("a.ts");
    saved.loop_state.push_history("[turn 5] RUN_BUILD succeeded");
    saved.loop_state.pause_requested = true;

    let store = Arc::new(MockStateStore::new().with_session(saved));
    let provider =
        MockDecisionProvider::new().with_fallback(Decision::new(Command::PublishPackage));

    let collab = collaborators_with(
        provider,
        MockChangeApplier::new(),
        MockQualityRunner::new(),
        MockTestRunner::new(),
        MockPublisher::new(),
    )
    .with_store(store.clone());

    let (controller, _handle) = LoopController::resume(LoopConfig::default(), collab).unwrap();
    let result = controller.run().await.unwrap();

    // The stale pause flag is cleared on resume; the publish lands on
    // turn six and the finished session is cleaned up.
    assert!(result.success);
    assert_eq!(result.total_iterations, 6);
    assert!(result.files_modified.contains(&"a.ts".to_string()));
    assert!(store.saved().is_none());
}

#[tokio::test]
async fn pause_checkpoints_a_resumable_session() {
    let provider = MockDecisionProvider::new()
        .with_fallback(Decision::new(Command::RunBuild));
    let quality = Arc::new(PausingQualityRunner::new(2));
    let store = Arc::new(MockStateStore::new());

    let collab = Collaborators::new(
        Arc::new(provider),
        Arc::new(MockChangeApplier::new()),
        quality.clone(),
        Arc::new(MockTestRunner::new()),
        Arc::new(MockPublisher::new()),
        Arc::new(MockDependencyResolver::new()),
    )
    .with_store(store.clone());

    let (controller, handle) = LoopController::new(LoopConfig::default(), collab).unwrap();
    quality.attach(handle);
    let result = controller.run().await.unwrap();

    assert!(!result.success);
    assert_eq!(result.total_iterations, 2);

    let saved = store.saved().expect("pause should checkpoint");
    assert_eq!(saved.loop_state.loop_count, 2);
    assert!(saved.loop_state.pause_requested);
}
