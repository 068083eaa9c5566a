//! The turn-based build-loop controller.
//!
//! One turn is: drain the signal inbox, build context, ask the decision
//! provider for a command, dispatch it, record the outcome, evaluate the
//! termination conditions, checkpoint. The loop runs as a single logical
//! thread; the only suspension points are the provider call, the
//! dispatched command, and the optional escalation wait. Signals are
//! observed exclusively at turn boundaries, so loop state can never be
//! corrupted mid-turn.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use super::command::{Command, TurnResult};
use super::dispatch::CommandDispatcher;
use super::handle::{self, ControlSignal, LoopHandle, StateSnapshot};
use super::state::{LoopResult, LoopState};
use crate::config::LoopConfig;
use crate::context::ContextBuilder;
use crate::error::{PacksmithError, Result};
use crate::session::{SessionMetadata, SessionState};
use crate::testing::traits::{
    ChangeApplier, DecisionProvider, DependencyResolver, EscalationSink, Publisher, QualityRunner,
    StateStore, TestRunner,
};

/// The external collaborators a loop run needs.
///
/// Store and escalation sink are optional: without a store the run is
/// not resumable, without a sink escalations are only logged.
pub struct Collaborators {
    /// The LLM/agent brain choosing each turn's command.
    pub provider: Arc<dyn DecisionProvider>,
    /// Applies agent-produced code changes.
    pub applier: Arc<dyn ChangeApplier>,
    /// Build, lint, and manifest checks.
    pub quality: Arc<dyn QualityRunner>,
    /// Unit tests with coverage.
    pub tests: Arc<dyn TestRunner>,
    /// Package publishing.
    pub publisher: Arc<dyn Publisher>,
    /// Dependency waiting and context gathering.
    pub dependencies: Arc<dyn DependencyResolver>,
    /// Durable state storage, checkpointed at turn boundaries.
    pub store: Option<Arc<dyn StateStore>>,
    /// Fire-and-forget escalation notifications.
    pub escalation: Option<Arc<dyn EscalationSink>>,
}

impl Collaborators {
    /// Collaborators with no store and no escalation sink.
    #[must_use]
    pub fn new(
        provider: Arc<dyn DecisionProvider>,
        applier: Arc<dyn ChangeApplier>,
        quality: Arc<dyn QualityRunner>,
        tests: Arc<dyn TestRunner>,
        publisher: Arc<dyn Publisher>,
        dependencies: Arc<dyn DependencyResolver>,
    ) -> Self {
        Self {
            provider,
            applier,
            quality,
            tests,
            publisher,
            dependencies,
            store: None,
            escalation: None,
        }
    }

    /// Attach a state store for checkpointing and resume.
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn StateStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Attach an escalation sink.
    #[must_use]
    pub fn with_escalation(mut self, sink: Arc<dyn EscalationSink>) -> Self {
        self.escalation = Some(sink);
        self
    }
}

/// How the escalation wait on a stuck file resolved.
enum Escalation {
    /// A human responded; the file's record was reset and the loop
    /// continues with the hint pending.
    Resumed,
    /// No response (or an explicit pause): the loop ends with this result.
    Finished(LoopResult),
}

/// The durable, resumable build-loop state machine.
pub struct LoopController {
    config: LoopConfig,
    state: LoopState,
    metadata: SessionMetadata,
    context: ContextBuilder,
    dispatcher: CommandDispatcher,
    provider: Arc<dyn DecisionProvider>,
    store: Option<Arc<dyn StateStore>>,
    escalation: Option<Arc<dyn EscalationSink>>,
    signals: mpsc::UnboundedReceiver<ControlSignal>,
    snapshots: watch::Sender<StateSnapshot>,
}

impl LoopController {
    /// Create a controller with a fresh loop state.
    ///
    /// # Errors
    ///
    /// Returns an error when the configuration is invalid.
    pub fn new(config: LoopConfig, collaborators: Collaborators) -> Result<(Self, LoopHandle)> {
        config.validate()?;
        Ok(Self::build(
            config,
            collaborators,
            LoopState::new(),
            SessionMetadata::new(),
        ))
    }

    /// Create a controller resuming from the collaborator store's saved
    /// session, or fresh when none exists.
    ///
    /// # Errors
    ///
    /// Returns an error when the configuration is invalid or the store
    /// is unreadable.
    pub fn resume(config: LoopConfig, collaborators: Collaborators) -> Result<(Self, LoopHandle)> {
        config.validate()?;

        let loaded = match &collaborators.store {
            Some(store) => store
                .load()
                .map_err(|e| PacksmithError::persistence(e.to_string()))?,
            None => None,
        };

        let (mut state, metadata) = match loaded {
            Some(session) => {
                info!(
                    session_id = %session.metadata.session_id,
                    loop_count = session.loop_state.loop_count,
                    "resuming saved session"
                );
                (session.loop_state, session.metadata)
            }
            None => (LoopState::new(), SessionMetadata::new()),
        };

        // A pause belongs to the execution that observed it; a resumed
        // run starts unpaused.
        state.pause_requested = false;

        Ok(Self::build(config, collaborators, state, metadata))
    }

    fn build(
        config: LoopConfig,
        collaborators: Collaborators,
        state: LoopState,
        metadata: SessionMetadata,
    ) -> (Self, LoopHandle) {
        let dispatcher = CommandDispatcher::new(
            collaborators.applier,
            collaborators.quality,
            collaborators.tests,
            collaborators.publisher,
            collaborators.dependencies,
            &config,
        );

        let (signals, snapshots, handle) = handle::channel(StateSnapshot::of(&state));

        let controller = Self {
            config,
            state,
            metadata,
            context: ContextBuilder::new(),
            dispatcher,
            provider: collaborators.provider,
            store: collaborators.store,
            escalation: collaborators.escalation,
            signals,
            snapshots,
        };

        (controller, handle)
    }

    /// Replace the default context builder.
    #[must_use]
    pub fn with_context_builder(mut self, context: ContextBuilder) -> Self {
        self.context = context;
        self
    }

    /// Drive turns until a publish succeeds, a budget is exhausted, a
    /// pause is requested, or a file is declared stuck.
    ///
    /// # Errors
    ///
    /// Returns an error only for infrastructure failures (provider or
    /// executor unreachable, invalid store); every domain outcome,
    /// including exhaustion and stuck files, is a [`LoopResult`].
    pub async fn run(mut self) -> Result<LoopResult> {
        info!(
            session_id = %self.metadata.session_id,
            max_iterations = self.config.max_iterations,
            "starting build loop"
        );

        loop {
            self.drain_signals();

            if self.state.pause_requested {
                let result = self.pause_result();
                self.checkpoint();
                self.publish_snapshot();
                return Ok(result);
            }

            if self.state.loop_count >= self.config.max_iterations {
                warn!(
                    iterations = self.state.loop_count,
                    "iteration budget exhausted"
                );
                let error = PacksmithError::MaxIterations {
                    max: self.config.max_iterations,
                }
                .to_string();
                return Ok(LoopResult::failed(&self.state, self.state.loop_count, error));
            }

            let context = self.context.build(&mut self.state);
            let decision = self
                .provider
                .choose_command(&context, &self.state.action_history)
                .await
                .map_err(|e| PacksmithError::decision(e.to_string()))?;
            debug!(command = %decision.command, "provider decided");

            let result = self.dispatcher.dispatch(&decision).await?;

            self.state.loop_count += 1;
            let stuck_file = self.record_outcome(decision.command, &result);

            if decision.command == Command::PublishPackage && result.success {
                info!(
                    iterations = self.state.loop_count,
                    files = self.state.files_modified.len(),
                    "package published"
                );
                self.clear_session();
                self.publish_snapshot();
                return Ok(LoopResult::succeeded(&self.state, self.state.loop_count));
            }

            if let Some(path) = stuck_file {
                match self.escalate(&path).await {
                    Escalation::Resumed => {}
                    Escalation::Finished(result) => {
                        self.checkpoint();
                        self.publish_snapshot();
                        return Ok(result);
                    }
                }
            }

            self.checkpoint();
            self.publish_snapshot();
        }
    }

    /// Apply queued signals to loop state. Called only at turn
    /// boundaries.
    fn drain_signals(&mut self) {
        while let Ok(signal) = self.signals.try_recv() {
            match signal {
                ControlSignal::HumanIntervention(hint) => {
                    debug!("human hint received");
                    self.state.set_human_hint(hint);
                }
                ControlSignal::GracefulPause => {
                    info!("graceful pause requested");
                    self.state.request_pause();
                }
            }
        }
    }

    /// Record a turn's outcome: action history, modified files, failure
    /// tracking. Returns the path of a file that exhausted its
    /// meta-correction budget, if any.
    fn record_outcome(&mut self, command: Command, result: &TurnResult) -> Option<String> {
        let mut entry = format!(
            "[turn {}] {} {}",
            self.state.loop_count,
            command,
            if result.success { "succeeded" } else { "failed" }
        );
        if let Some(details) = &result.details {
            entry.push_str(": ");
            entry.push_str(details);
        }
        self.state.push_history(entry);

        let mut stuck_file = None;

        if result.success {
            for file in &result.affected_files {
                self.state.record_file_modified(file);
                self.state.failure_tracker.record_success(file);
            }
        } else {
            let details = result
                .details
                .clone()
                .unwrap_or_else(|| format!("{command} failed"));
            let mut corrections = Vec::new();

            for file in &result.affected_files {
                let verdict = self.state.failure_tracker.record_failure(file, &details);
                if let Some(message) = verdict.meta_correction {
                    warn!(file = %file, "meta-correction issued");
                    corrections.push(message);
                }
                if verdict.terminate && stuck_file.is_none() {
                    stuck_file = Some(file.clone());
                }
            }

            if !corrections.is_empty() {
                self.state.pending_meta_correction = Some(corrections.join("\n\n"));
            }
        }

        self.state.record_turn(command, result);
        stuck_file
    }

    /// Handle a file that exhausted its meta-correction budget: notify
    /// the sink, then either terminate immediately (no timeout
    /// configured) or wait for a human response.
    async fn escalate(&mut self, path: &str) -> Escalation {
        let attempts = self
            .state
            .failure_tracker
            .entry(path)
            .map(|entry| entry.modification_count)
            .unwrap_or_default();
        let stuck_error = PacksmithError::StuckFile {
            path: path.to_string(),
            attempts,
        }
        .to_string();

        if let Some(sink) = &self.escalation {
            let body = format!(
                "{stuck_error}\nThe loop is waiting for operator input before giving up."
            );
            if let Err(e) = sink.notify("packsmith: stuck file", &body).await {
                // The sink is fire-and-forget; a broken webhook must not
                // change how the loop terminates.
                warn!("escalation notification failed: {e}");
            }
        }

        let Some(timeout) = self.config.escalation_timeout() else {
            return Escalation::Finished(LoopResult::failed(
                &self.state,
                self.state.loop_count,
                stuck_error,
            ));
        };

        info!(file = %path, ?timeout, "waiting for human response");
        match tokio::time::timeout(timeout, self.wait_for_hint()).await {
            Ok(Some(hint)) => {
                info!(file = %path, "human responded; resuming with a clean slate");
                self.state.failure_tracker.reset(path);
                self.state.set_human_hint(hint);
                Escalation::Resumed
            }
            Ok(None) => {
                // Pause signal during the wait: a deliberate, resumable
                // exit rather than an abort.
                Escalation::Finished(self.pause_result())
            }
            Err(_) => {
                let error = PacksmithError::EscalationTimeout {
                    path: path.to_string(),
                    waited_secs: timeout.as_secs(),
                }
                .to_string();
                Escalation::Finished(LoopResult::failed(
                    &self.state,
                    self.state.loop_count,
                    error,
                ))
            }
        }
    }

    /// Wait for a hint during escalation. Returns `None` when a pause is
    /// requested or every handle is gone.
    async fn wait_for_hint(&mut self) -> Option<String> {
        while let Some(signal) = self.signals.recv().await {
            match signal {
                ControlSignal::HumanIntervention(hint) => return Some(hint),
                ControlSignal::GracefulPause => {
                    self.state.request_pause();
                    return None;
                }
            }
        }
        None
    }

    fn pause_result(&self) -> LoopResult {
        let error = format!(
            "paused by user request: {} iterations completed, {} files modified; \
             the workflow is resumable",
            self.state.loop_count,
            self.state.files_modified.len()
        );
        LoopResult::failed(&self.state, self.state.loop_count, error)
    }

    /// Persist state through the store collaborator. A failed save is
    /// logged, not fatal: the loop can still finish, it just loses
    /// resumability for this boundary.
    fn checkpoint(&mut self) {
        let Some(store) = &self.store else {
            return;
        };

        self.metadata.touch();
        let session = SessionState {
            metadata: self.metadata.clone(),
            loop_state: self.state.clone(),
        };
        if let Err(e) = store.save(&session) {
            warn!("checkpoint failed: {e}");
        }
    }

    fn clear_session(&self) {
        if let Some(store) = &self.store {
            if let Err(e) = store.delete() {
                warn!("failed to clear completed session: {e}");
            }
        }
    }

    fn publish_snapshot(&self) {
        // Receivers may all be gone; that is not an error.
        let _ = self.snapshots.send(StateSnapshot::of(&self.state));
    }
}
