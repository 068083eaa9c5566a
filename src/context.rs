//! Context builder: renders loop state into the prompt handed to the
//! decision provider.
//!
//! Each turn starts by describing where the build stands: what has been
//! modified, how the previous turn went, and any escalated correction or
//! human hint waiting to be delivered. Consuming the pending hint and the
//! pending meta-correction is the only mutation this component performs;
//! a call with neither pending is a pure read.

use tracing::debug;

use crate::r#loop::state::LoopState;

/// Renders a natural-language description of the current loop state.
#[derive(Debug, Clone, Default)]
pub struct ContextBuilder {
    /// Package name shown in the header, when known.
    package_name: Option<String>,
}

impl ContextBuilder {
    /// Create a context builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Name the package under construction in the rendered header.
    #[must_use]
    pub fn with_package_name(mut self, name: impl Into<String>) -> Self {
        self.package_name = Some(name.into());
        self
    }

    /// Render the context for the next decision.
    ///
    /// Consumes (clears) `pending_human_hint` and
    /// `pending_meta_correction` when present.
    pub fn build(&self, state: &mut LoopState) -> String {
        let mut out = String::new();

        match &self.package_name {
            Some(name) => out.push_str(&format!("# Build Loop Context: {name}\n\n")),
            None => out.push_str("# Build Loop Context\n\n"),
        }

        self.render_codebase_state(state, &mut out);
        self.render_previous_turn(state, &mut out);

        if let Some(meta) = state.pending_meta_correction.take() {
            debug!("injecting meta-correction into context");
            out.push_str("## Correction Required\n\n");
            out.push_str(&meta);
            out.push_str("\n\n");
        }

        if let Some(hint) = state.pending_human_hint.take() {
            debug!("injecting human hint into context");
            out.push_str("## Human Hint\n\n");
            out.push_str(&hint);
            out.push('\n');
        }

        out.trim_end().to_string()
    }

    fn render_codebase_state(&self, state: &LoopState, out: &mut String) {
        out.push_str("## Codebase State\n\n");
        if state.files_modified.is_empty() {
            out.push_str("No files created yet.\n\n");
            return;
        }

        out.push_str(&format!(
            "{} file(s) modified over {} turn(s):\n",
            state.files_modified.len(),
            state.loop_count
        ));
        for file in &state.files_modified {
            out.push_str(&format!("- {file}\n"));
        }
        out.push('\n');
    }

    fn render_previous_turn(&self, state: &LoopState, out: &mut String) {
        let Some(turn) = &state.last_turn else {
            return;
        };

        out.push_str("## Previous Turn\n\n");
        if turn.success {
            out.push_str(&format!("`{}` succeeded.\n", turn.command));
            // Soft failures (e.g. low coverage) ride along as details on a
            // successful turn and must still reach the provider.
            if let Some(details) = &turn.details {
                out.push_str(&format!("Note: {details}\n"));
            }
        } else {
            out.push_str(&format!("`{}` failed.\n", turn.command));
            if !turn.affected_files.is_empty() {
                out.push_str("Implicated files:\n");
                for file in &turn.affected_files {
                    out.push_str(&format!("- {file}\n"));
                }
            }
            if let Some(details) = &turn.details {
                out.push_str(&format!("\nDiagnostics:\n{details}\n"));
            }
        }
        out.push('\n');
    }
}
