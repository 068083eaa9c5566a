//! The closed command vocabulary of the build loop.
//!
//! The decision provider may only answer with one of these commands; the
//! dispatcher matches on them exhaustively, so adding a command is a
//! compile-time-checked enumeration change rather than a string comparison.

use serde::{Deserialize, Serialize};

/// An action the decision provider can request for the next turn.
///
/// Wire names use the SCREAMING_SNAKE vocabulary the provider emits.
///
/// # Example
///
/// ```
/// use packsmith::r#loop::command::Command;
///
/// let cmd: Command = "RUN_BUILD".parse().unwrap();
/// assert_eq!(cmd, Command::RunBuild);
/// assert_eq!(cmd.to_string(), "RUN_BUILD");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Command {
    /// Apply a set of code changes produced by the agent.
    ApplyCodeChanges,
    /// Block until an upstream dependency is available.
    AwaitDependency,
    /// Collect context about an unresolved dependency.
    GatherContextForDependency,
    /// Validate the package manifest.
    ValidatePackageJson,
    /// Check license headers across the package.
    CheckLicenseHeaders,
    /// Run the package build.
    RunBuild,
    /// Run the lint check.
    RunLintCheck,
    /// Run unit tests with coverage.
    RunUnitTests,
    /// Publish the package. Success here ends the loop.
    PublishPackage,
}

impl Command {
    /// All commands in declaration order.
    #[must_use]
    pub fn all() -> [Command; 9] {
        [
            Self::ApplyCodeChanges,
            Self::AwaitDependency,
            Self::GatherContextForDependency,
            Self::ValidatePackageJson,
            Self::CheckLicenseHeaders,
            Self::RunBuild,
            Self::RunLintCheck,
            Self::RunUnitTests,
            Self::PublishPackage,
        ]
    }

    /// Wire name for this command.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ApplyCodeChanges => "APPLY_CODE_CHANGES",
            Self::AwaitDependency => "AWAIT_DEPENDENCY",
            Self::GatherContextForDependency => "GATHER_CONTEXT_FOR_DEPENDENCY",
            Self::ValidatePackageJson => "VALIDATE_PACKAGE_JSON",
            Self::CheckLicenseHeaders => "CHECK_LICENSE_HEADERS",
            Self::RunBuild => "RUN_BUILD",
            Self::RunLintCheck => "RUN_LINT_CHECK",
            Self::RunUnitTests => "RUN_UNIT_TESTS",
            Self::PublishPackage => "PUBLISH_PACKAGE",
        }
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Command {
    type Err = UnknownCommand;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::all()
            .into_iter()
            .find(|cmd| cmd.as_str() == s.trim())
            .ok_or_else(|| UnknownCommand(s.to_string()))
    }
}

/// Error returned when parsing an unrecognized command name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownCommand(pub String);

impl std::fmt::Display for UnknownCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unknown command: {}", self.0)
    }
}

impl std::error::Error for UnknownCommand {}

/// The normalized result every dispatched command produces.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TurnResult {
    /// Whether the command succeeded.
    pub success: bool,
    /// Diagnostic or informational detail. Present on failures, and on
    /// soft failures such as low coverage.
    pub details: Option<String>,
    /// Files implicated by this turn (modified on success, failing on
    /// failure). Order preserved, no duplicates.
    pub affected_files: Vec<String>,
}

impl TurnResult {
    /// A successful result with no details.
    #[must_use]
    pub fn ok() -> Self {
        Self {
            success: true,
            details: None,
            affected_files: Vec::new(),
        }
    }

    /// A successful result carrying detail text.
    #[must_use]
    pub fn ok_with_details(details: impl Into<String>) -> Self {
        Self {
            success: true,
            details: Some(details.into()),
            affected_files: Vec::new(),
        }
    }

    /// A failed result with diagnostic detail.
    #[must_use]
    pub fn failed(details: impl Into<String>) -> Self {
        Self {
            success: false,
            details: Some(details.into()),
            affected_files: Vec::new(),
        }
    }

    /// Attach affected files.
    #[must_use]
    pub fn with_files(mut self, files: Vec<String>) -> Self {
        self.affected_files = files;
        self
    }
}
