//! Mock implementations of the collaborator traits.
//!
//! These mocks provide controllable test doubles for external
//! dependencies, enabling deterministic loop tests. Each mock can hold a
//! scripted sequence of outcomes, consumed in order, falling back to a
//! fixed outcome once the script is exhausted.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use anyhow::{bail, Result};
use async_trait::async_trait;

use super::traits::{
    ChangeApplier, ChangeOutcome, CheckOutcome, Decision, DecisionProvider, DependencyResolver,
    EscalationSink, Publisher, QualityRunner, StateStore, TestOutcome, TestRunner,
};
use crate::session::SessionState;

/// Scripted outcome queue with a fallback once drained.
#[derive(Debug)]
struct Script<T> {
    queue: Mutex<VecDeque<T>>,
    fallback: T,
}

impl<T: Clone> Script<T> {
    fn new(fallback: T) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            fallback,
        }
    }

    fn enqueue(&mut self, items: impl IntoIterator<Item = T>) {
        self.queue.get_mut().expect("script lock").extend(items);
    }

    fn set_fallback(&mut self, fallback: T) {
        self.fallback = fallback;
    }

    fn next(&self) -> T {
        self.queue
            .lock()
            .expect("script lock")
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone())
    }
}

/// Mock decision provider replaying a scripted command sequence.
///
/// # Example
///
/// ```rust,ignore
/// let provider = MockDecisionProvider::new()
///     .with_decisions([Decision::new(Command::RunBuild)])
///     .with_fallback(Decision::new(Command::PublishPackage));
/// ```
#[derive(Debug)]
pub struct MockDecisionProvider {
    script: Script<Decision>,
    error: Option<String>,
    call_count: AtomicU32,
    contexts: Mutex<Vec<String>>,
}

impl Default for MockDecisionProvider {
    fn default() -> Self {
        Self {
            script: Script::new(Decision::new(
                crate::r#loop::command::Command::PublishPackage,
            )),
            error: None,
            call_count: AtomicU32::new(0),
            contexts: Mutex::new(Vec::new()),
        }
    }
}

impl MockDecisionProvider {
    /// Create a mock that always answers `PUBLISH_PACKAGE`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue decisions to replay in order.
    #[must_use]
    pub fn with_decisions(mut self, decisions: impl IntoIterator<Item = Decision>) -> Self {
        self.script.enqueue(decisions);
        self
    }

    /// Set the decision repeated once the script is exhausted.
    #[must_use]
    pub fn with_fallback(mut self, decision: Decision) -> Self {
        self.script.set_fallback(decision);
        self
    }

    /// Configure the mock to fail every call.
    #[must_use]
    pub fn with_error(mut self, error: &str) -> Self {
        self.error = Some(error.to_string());
        self
    }

    /// Number of times `choose_command` was called.
    pub fn call_count(&self) -> u32 {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Every context string the provider was handed, in call order.
    pub fn contexts(&self) -> Vec<String> {
        self.contexts.lock().expect("contexts lock").clone()
    }
}

#[async_trait]
impl DecisionProvider for MockDecisionProvider {
    async fn choose_command(&self, context: &str, _action_history: &[String]) -> Result<Decision> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        self.contexts
            .lock()
            .expect("contexts lock")
            .push(context.to_string());

        if let Some(ref error) = self.error {
            bail!("{}", error)
        }
        Ok(self.script.next())
    }
}

/// Mock change applier replaying scripted outcomes.
#[derive(Debug)]
pub struct MockChangeApplier {
    script: Script<ChangeOutcome>,
    call_count: AtomicU32,
}

impl Default for MockChangeApplier {
    fn default() -> Self {
        Self {
            script: Script::new(ChangeOutcome::applied(Vec::new())),
            call_count: AtomicU32::new(0),
        }
    }
}

impl MockChangeApplier {
    /// Create a mock that applies cleanly and touches no files.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue outcomes to replay in order.
    #[must_use]
    pub fn with_outcomes(mut self, outcomes: impl IntoIterator<Item = ChangeOutcome>) -> Self {
        self.script.enqueue(outcomes);
        self
    }

    /// Set the outcome repeated once the script is exhausted.
    #[must_use]
    pub fn with_fallback(mut self, outcome: ChangeOutcome) -> Self {
        self.script.set_fallback(outcome);
        self
    }

    /// Number of times `apply` was called.
    pub fn call_count(&self) -> u32 {
        self.call_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChangeApplier for MockChangeApplier {
    async fn apply(&self, _task: Option<&serde_json::Value>) -> Result<ChangeOutcome> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        Ok(self.script.next())
    }
}

/// Mock quality runner with per-step configurable outcomes.
#[derive(Debug)]
pub struct MockQualityRunner {
    package_json: Script<CheckOutcome>,
    license: Script<CheckOutcome>,
    build: Script<CheckOutcome>,
    lint: Script<CheckOutcome>,
}

impl Default for MockQualityRunner {
    fn default() -> Self {
        Self {
            package_json: Script::new(CheckOutcome::pass()),
            license: Script::new(CheckOutcome::pass()),
            build: Script::new(CheckOutcome::pass()),
            lint: Script::new(CheckOutcome::pass()),
        }
    }
}

impl MockQualityRunner {
    /// Create a mock where every step passes.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the fixed package.json validation outcome.
    #[must_use]
    pub fn with_package_json_outcome(mut self, outcome: CheckOutcome) -> Self {
        self.package_json.set_fallback(outcome);
        self
    }

    /// Set the fixed license check outcome.
    #[must_use]
    pub fn with_license_outcome(mut self, outcome: CheckOutcome) -> Self {
        self.license.set_fallback(outcome);
        self
    }

    /// Enqueue build outcomes to replay in order.
    #[must_use]
    pub fn with_build_outcomes(mut self, outcomes: impl IntoIterator<Item = CheckOutcome>) -> Self {
        self.build.enqueue(outcomes);
        self
    }

    /// Set the build outcome repeated once the script is exhausted.
    #[must_use]
    pub fn with_build_fallback(mut self, outcome: CheckOutcome) -> Self {
        self.build.set_fallback(outcome);
        self
    }

    /// Set the fixed lint outcome.
    #[must_use]
    pub fn with_lint_outcome(mut self, outcome: CheckOutcome) -> Self {
        self.lint.set_fallback(outcome);
        self
    }
}

impl QualityRunner for MockQualityRunner {
    fn validate_package_json(&self) -> Result<CheckOutcome> {
        Ok(self.package_json.next())
    }

    fn check_license_headers(&self) -> Result<CheckOutcome> {
        Ok(self.license.next())
    }

    fn run_build(&self) -> Result<CheckOutcome> {
        Ok(self.build.next())
    }

    fn run_lint(&self) -> Result<CheckOutcome> {
        Ok(self.lint.next())
    }
}

/// Mock test runner.
#[derive(Debug)]
pub struct MockTestRunner {
    script: Script<TestOutcome>,
}

impl Default for MockTestRunner {
    fn default() -> Self {
        Self {
            script: Script::new(TestOutcome::passed(100.0)),
        }
    }
}

impl MockTestRunner {
    /// Create a mock whose tests pass at full coverage.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Pass with the given coverage.
    #[must_use]
    pub fn with_coverage(mut self, coverage: f64) -> Self {
        self.script.set_fallback(TestOutcome::passed(coverage));
        self
    }

    /// Set the fixed outcome.
    #[must_use]
    pub fn with_outcome(mut self, outcome: TestOutcome) -> Self {
        self.script.set_fallback(outcome);
        self
    }

    /// Enqueue outcomes to replay in order.
    #[must_use]
    pub fn with_outcomes(mut self, outcomes: impl IntoIterator<Item = TestOutcome>) -> Self {
        self.script.enqueue(outcomes);
        self
    }
}

impl TestRunner for MockTestRunner {
    fn run_unit_tests(&self) -> Result<TestOutcome> {
        Ok(self.script.next())
    }
}

/// Mock publisher.
#[derive(Debug)]
pub struct MockPublisher {
    script: Script<CheckOutcome>,
    call_count: AtomicU32,
}

impl Default for MockPublisher {
    fn default() -> Self {
        Self {
            script: Script::new(CheckOutcome::pass()),
            call_count: AtomicU32::new(0),
        }
    }
}

impl MockPublisher {
    /// Create a mock whose publish succeeds.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the fixed outcome.
    #[must_use]
    pub fn with_outcome(mut self, outcome: CheckOutcome) -> Self {
        self.script.set_fallback(outcome);
        self
    }

    /// Enqueue outcomes to replay in order.
    #[must_use]
    pub fn with_outcomes(mut self, outcomes: impl IntoIterator<Item = CheckOutcome>) -> Self {
        self.script.enqueue(outcomes);
        self
    }

    /// Number of times `publish` was called.
    pub fn call_count(&self) -> u32 {
        self.call_count.load(Ordering::SeqCst)
    }
}

impl Publisher for MockPublisher {
    fn publish(&self) -> Result<CheckOutcome> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        Ok(self.script.next())
    }
}

/// Mock dependency resolver.
#[derive(Debug)]
pub struct MockDependencyResolver {
    await_outcome: CheckOutcome,
    gather_outcome: CheckOutcome,
}

impl Default for MockDependencyResolver {
    fn default() -> Self {
        Self {
            await_outcome: CheckOutcome::pass(),
            gather_outcome: CheckOutcome::pass(),
        }
    }
}

impl MockDependencyResolver {
    /// Create a mock where both operations pass.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the await outcome.
    #[must_use]
    pub fn with_await_outcome(mut self, outcome: CheckOutcome) -> Self {
        self.await_outcome = outcome;
        self
    }

    /// Set the gather outcome.
    #[must_use]
    pub fn with_gather_outcome(mut self, outcome: CheckOutcome) -> Self {
        self.gather_outcome = outcome;
        self
    }
}

#[async_trait]
impl DependencyResolver for MockDependencyResolver {
    async fn await_dependency(&self, _task: Option<&serde_json::Value>) -> Result<CheckOutcome> {
        Ok(self.await_outcome.clone())
    }

    async fn gather_context(&self, _task: Option<&serde_json::Value>) -> Result<CheckOutcome> {
        Ok(self.gather_outcome.clone())
    }
}

/// In-memory state store.
#[derive(Debug, Default)]
pub struct MockStateStore {
    state: Mutex<Option<SessionState>>,
    save_count: AtomicU32,
    fail_saves: bool,
}

impl MockStateStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-load a session, as if a previous run had saved it.
    #[must_use]
    pub fn with_session(self, state: SessionState) -> Self {
        *self.state.lock().expect("state lock") = Some(state);
        self
    }

    /// Configure every save to fail.
    #[must_use]
    pub fn with_failing_saves(mut self) -> Self {
        self.fail_saves = true;
        self
    }

    /// Number of times `save` was called.
    pub fn save_count(&self) -> u32 {
        self.save_count.load(Ordering::SeqCst)
    }

    /// The most recently saved session.
    pub fn saved(&self) -> Option<SessionState> {
        self.state.lock().expect("state lock").clone()
    }
}

impl StateStore for MockStateStore {
    fn save(&self, state: &SessionState) -> Result<()> {
        self.save_count.fetch_add(1, Ordering::SeqCst);
        if self.fail_saves {
            bail!("save failed")
        }
        *self.state.lock().expect("state lock") = Some(state.clone());
        Ok(())
    }

    fn load(&self) -> Result<Option<SessionState>> {
        Ok(self.state.lock().expect("state lock").clone())
    }

    fn delete(&self) -> Result<()> {
        *self.state.lock().expect("state lock") = None;
        Ok(())
    }
}

/// Mock escalation sink recording every notification.
#[derive(Debug, Default)]
pub struct MockEscalationSink {
    notifications: Mutex<Vec<(String, String)>>,
    fail: bool,
}

impl MockEscalationSink {
    /// Create a sink that records notifications.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Configure every notify to fail, for testing that the loop
    /// survives a broken sink.
    #[must_use]
    pub fn with_failures(mut self) -> Self {
        self.fail = true;
        self
    }

    /// All notifications received, in order.
    pub fn notifications(&self) -> Vec<(String, String)> {
        self.notifications.lock().expect("notifications lock").clone()
    }
}

#[async_trait]
impl EscalationSink for MockEscalationSink {
    async fn notify(&self, subject: &str, body: &str) -> Result<()> {
        if self.fail {
            bail!("sink unreachable")
        }
        self.notifications
            .lock()
            .expect("notifications lock")
            .push((subject.to_string(), body.to_string()));
        Ok(())
    }
}
