//! Process-backed implementations of the collaborator traits.
//!
//! These implementations shell out to the real toolchain: npm for build,
//! test, and publish, an agent CLI for decisions and code changes, and
//! git for discovering what a change touched. They implement the same
//! traits as the mocks, enabling dependency injection.

use std::path::PathBuf;
use std::process::Command as StdCommand;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use regex::Regex;
use tokio::process::Command as AsyncCommand;
use tracing::debug;

use super::command::Command;
use crate::testing::traits::{
    ChangeApplier, ChangeOutcome, CheckOutcome, Decision, DecisionProvider, DependencyResolver,
    Publisher, QualityRunner, TestOutcome, TestRunner,
};

/// Default agent binary for decisions and code changes.
const DEFAULT_AGENT_BIN: &str = "claude";

/// Check that a required tool is on the PATH.
pub fn tool_available(tool: &str) -> bool {
    which::which(tool).is_ok()
}

/// Extract `path(line,col)`-style and `path:line`-style file references
/// from compiler or linter output.
fn parse_error_paths(output: &str) -> Vec<String> {
    let pattern = Regex::new(r"(?m)^([\w./@-]+\.[a-z]{1,4})[(:]").expect("static regex");
    let mut files = Vec::new();
    for capture in pattern.captures_iter(output) {
        let path = capture[1].to_string();
        if !files.contains(&path) {
            files.push(path);
        }
    }
    files
}

/// Pull the statement-coverage percentage out of a jest/istanbul summary.
fn parse_coverage(output: &str) -> Option<f64> {
    let pattern = Regex::new(r"(?i)statements\s*[:|]\s*([0-9]+(?:\.[0-9]+)?)\s*%").expect("static regex");
    pattern
        .captures(output)?
        .get(1)?
        .as_str()
        .parse()
        .ok()
}

/// Find the first recognized command token in agent output.
fn parse_decision(output: &str) -> Option<Command> {
    for line in output.lines() {
        for command in Command::all() {
            if line.contains(command.as_str()) {
                return Some(command);
            }
        }
    }
    None
}

fn outcome_from_output(success: bool, stdout: &str, stderr: &str) -> CheckOutcome {
    if success {
        return CheckOutcome::pass();
    }
    let details = if stderr.trim().is_empty() {
        stdout.trim().to_string()
    } else {
        format!("{}\n{}", stdout.trim(), stderr.trim())
    };
    let files = parse_error_paths(&details);
    CheckOutcome::fail(details).with_files(files)
}

/// npm-backed quality runner: manifest validation, license headers,
/// build, and lint.
#[derive(Debug, Clone)]
pub struct NpmQualityRunner {
    project_dir: PathBuf,
}

impl NpmQualityRunner {
    /// Create a quality runner for the given project directory.
    #[must_use]
    pub fn new(project_dir: PathBuf) -> Self {
        Self { project_dir }
    }

    fn run_tool(&self, program: &str, args: &[&str]) -> Result<CheckOutcome> {
        let output = StdCommand::new(program)
            .args(args)
            .current_dir(&self.project_dir)
            .output()
            .with_context(|| format!("Failed to run {program}"))?;

        Ok(outcome_from_output(
            output.status.success(),
            &String::from_utf8_lossy(&output.stdout),
            &String::from_utf8_lossy(&output.stderr),
        ))
    }
}

impl QualityRunner for NpmQualityRunner {
    fn validate_package_json(&self) -> Result<CheckOutcome> {
        let path = self.project_dir.join("package.json");
        let contents = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(_) => {
                return Ok(CheckOutcome::fail("package.json is missing")
                    .with_files(vec!["package.json".to_string()]))
            }
        };

        let manifest: serde_json::Value = match serde_json::from_str(&contents) {
            Ok(v) => v,
            Err(e) => {
                return Ok(
                    CheckOutcome::fail(format!("package.json is not valid JSON: {e}"))
                        .with_files(vec!["package.json".to_string()]),
                )
            }
        };

        let missing: Vec<&str> = ["name", "version"]
            .iter()
            .filter(|field| manifest.get(**field).and_then(|v| v.as_str()).is_none())
            .copied()
            .collect();

        if missing.is_empty() {
            Ok(CheckOutcome::pass())
        } else {
            Ok(CheckOutcome::fail(format!(
                "package.json is missing required field(s): {}",
                missing.join(", ")
            ))
            .with_files(vec!["package.json".to_string()]))
        }
    }

    fn check_license_headers(&self) -> Result<CheckOutcome> {
        let src = self.project_dir.join("src");
        if !src.exists() {
            return Ok(CheckOutcome::pass());
        }

        let mut missing = Vec::new();
        let mut stack = vec![src];
        while let Some(dir) = stack.pop() {
            for entry in std::fs::read_dir(&dir)? {
                let entry = entry?;
                let path = entry.path();
                if path.is_dir() {
                    stack.push(path);
                    continue;
                }
                let is_source = path
                    .extension()
                    .and_then(|e| e.to_str())
                    .is_some_and(|e| matches!(e, "ts" | "tsx" | "js" | "jsx"));
                if !is_source {
                    continue;
                }
                let header: String = std::fs::read_to_string(&path)?
                    .lines()
                    .take(5)
                    .collect::<Vec<_>>()
                    .join("\n");
                if !header.contains("Copyright") && !header.contains("SPDX-License-Identifier") {
                    let rel = path
                        .strip_prefix(&self.project_dir)
                        .unwrap_or(&path)
                        .display()
                        .to_string();
                    missing.push(rel);
                }
            }
        }

        if missing.is_empty() {
            Ok(CheckOutcome::pass())
        } else {
            Ok(CheckOutcome::fail(format!(
                "{} file(s) missing a license header",
                missing.len()
            ))
            .with_files(missing))
        }
    }

    fn run_build(&self) -> Result<CheckOutcome> {
        debug!("running npm build");
        self.run_tool("npm", &["run", "build"])
    }

    fn run_lint(&self) -> Result<CheckOutcome> {
        debug!("running eslint");
        self.run_tool("npx", &["eslint", "."])
    }
}

/// npm-backed test runner with jest-style coverage parsing.
#[derive(Debug, Clone)]
pub struct NpmTestRunner {
    project_dir: PathBuf,
}

impl NpmTestRunner {
    /// Create a test runner for the given project directory.
    #[must_use]
    pub fn new(project_dir: PathBuf) -> Self {
        Self { project_dir }
    }
}

impl TestRunner for NpmTestRunner {
    fn run_unit_tests(&self) -> Result<TestOutcome> {
        let output = StdCommand::new("npm")
            .args(["test", "--", "--coverage"])
            .current_dir(&self.project_dir)
            .output()
            .context("Failed to run npm test")?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let combined = format!("{stdout}\n{stderr}");
        let coverage = parse_coverage(&combined);

        if output.status.success() {
            Ok(TestOutcome {
                success: true,
                details: None,
                error_file_paths: Vec::new(),
                coverage,
            })
        } else {
            let files = parse_error_paths(&combined);
            Ok(TestOutcome {
                success: false,
                details: Some(combined.trim().to_string()),
                error_file_paths: files,
                coverage,
            })
        }
    }
}

/// npm-backed publisher.
#[derive(Debug, Clone)]
pub struct NpmPublisher {
    project_dir: PathBuf,
}

impl NpmPublisher {
    /// Create a publisher for the given project directory.
    #[must_use]
    pub fn new(project_dir: PathBuf) -> Self {
        Self { project_dir }
    }
}

impl Publisher for NpmPublisher {
    fn publish(&self) -> Result<CheckOutcome> {
        debug!("running npm publish");
        let output = StdCommand::new("npm")
            .args(["publish"])
            .current_dir(&self.project_dir)
            .output()
            .context("Failed to run npm publish")?;

        Ok(outcome_from_output(
            output.status.success(),
            &String::from_utf8_lossy(&output.stdout),
            &String::from_utf8_lossy(&output.stderr),
        ))
    }
}

/// Decision provider that shells out to an agent CLI, feeding it the
/// rendered context on stdin and reading a command token back.
#[derive(Debug, Clone)]
pub struct AgentCliDecisionProvider {
    project_dir: PathBuf,
    agent_bin: String,
}

impl AgentCliDecisionProvider {
    /// Create a provider spawning the default agent binary.
    #[must_use]
    pub fn new(project_dir: PathBuf) -> Self {
        Self {
            project_dir,
            agent_bin: DEFAULT_AGENT_BIN.to_string(),
        }
    }

    /// Override the agent binary.
    #[must_use]
    pub fn with_agent_bin(mut self, bin: impl Into<String>) -> Self {
        self.agent_bin = bin.into();
        self
    }
}

#[async_trait]
impl DecisionProvider for AgentCliDecisionProvider {
    async fn choose_command(&self, context: &str, action_history: &[String]) -> Result<Decision> {
        let prompt = format!(
            "{context}\n\n## Action History\n{}\n\nAnswer with exactly one of: {}",
            action_history.join("\n"),
            Command::all()
                .iter()
                .map(Command::as_str)
                .collect::<Vec<_>>()
                .join(", ")
        );

        let mut child = AsyncCommand::new(&self.agent_bin)
            .args(["-p"])
            .current_dir(&self.project_dir)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .spawn()
            .with_context(|| format!("Failed to spawn {}", self.agent_bin))?;

        if let Some(mut stdin) = child.stdin.take() {
            use tokio::io::AsyncWriteExt;
            stdin.write_all(prompt.as_bytes()).await?;
            stdin.flush().await?;
            drop(stdin);
        }

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            bail!(
                "agent exited with {}: {}",
                output.status.code().unwrap_or(1),
                String::from_utf8_lossy(&output.stderr)
            );
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        match parse_decision(&stdout) {
            Some(command) => Ok(Decision::new(command)),
            None => bail!("agent answered outside the command vocabulary: {stdout}"),
        }
    }
}

/// Change applier that hands the task to the agent CLI and discovers the
/// touched files from git afterwards.
#[derive(Debug, Clone)]
pub struct AgentCliChangeApplier {
    project_dir: PathBuf,
    agent_bin: String,
}

impl AgentCliChangeApplier {
    /// Create an applier spawning the default agent binary.
    #[must_use]
    pub fn new(project_dir: PathBuf) -> Self {
        Self {
            project_dir,
            agent_bin: DEFAULT_AGENT_BIN.to_string(),
        }
    }

    /// Override the agent binary.
    #[must_use]
    pub fn with_agent_bin(mut self, bin: impl Into<String>) -> Self {
        self.agent_bin = bin.into();
        self
    }

    /// List files modified in the working tree.
    fn modified_files(&self) -> Result<Vec<String>> {
        let output = StdCommand::new("git")
            .args(["status", "--porcelain"])
            .current_dir(&self.project_dir)
            .output()
            .context("Failed to get modified files")?;

        if !output.status.success() {
            return Ok(Vec::new());
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(stdout
            .lines()
            .filter_map(|line| {
                // Format: "XY filename" where XY is status
                if line.len() > 3 {
                    Some(line[3..].to_string())
                } else {
                    None
                }
            })
            .collect())
    }
}

#[async_trait]
impl ChangeApplier for AgentCliChangeApplier {
    async fn apply(&self, task: Option<&serde_json::Value>) -> Result<ChangeOutcome> {
        let prompt = match task {
            Some(task) => format!("Apply the following change:\n{task}"),
            None => "Apply the next pending code change.".to_string(),
        };

        let mut child = AsyncCommand::new(&self.agent_bin)
            .args(["-p"])
            .current_dir(&self.project_dir)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .spawn()
            .with_context(|| format!("Failed to spawn {}", self.agent_bin))?;

        if let Some(mut stdin) = child.stdin.take() {
            use tokio::io::AsyncWriteExt;
            stdin.write_all(prompt.as_bytes()).await?;
            stdin.flush().await?;
            drop(stdin);
        }

        let output = child.wait_with_output().await?;
        let files = self.modified_files()?;

        if output.status.success() {
            Ok(ChangeOutcome::applied(files))
        } else {
            Ok(ChangeOutcome::failed(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
                files,
            ))
        }
    }
}

/// Dependency resolver backed by the npm registry.
#[derive(Debug, Clone)]
pub struct NpmDependencyResolver {
    project_dir: PathBuf,
}

impl NpmDependencyResolver {
    /// Create a resolver for the given project directory.
    #[must_use]
    pub fn new(project_dir: PathBuf) -> Self {
        Self { project_dir }
    }

    fn package_from_task(task: Option<&serde_json::Value>) -> Option<String> {
        task?.get("package")?.as_str().map(str::to_string)
    }

    async fn npm_view(&self, package: &str, field: Option<&str>) -> Result<CheckOutcome> {
        let mut args = vec!["view", package];
        if let Some(field) = field {
            args.push(field);
        }

        let output = AsyncCommand::new("npm")
            .args(&args)
            .current_dir(&self.project_dir)
            .output()
            .await
            .context("Failed to run npm view")?;

        if output.status.success() {
            let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
            Ok(CheckOutcome {
                success: true,
                details: Some(stdout),
                error_file_paths: Vec::new(),
            })
        } else {
            Ok(CheckOutcome::fail(format!(
                "{package} is not available: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )))
        }
    }
}

#[async_trait]
impl DependencyResolver for NpmDependencyResolver {
    async fn await_dependency(&self, task: Option<&serde_json::Value>) -> Result<CheckOutcome> {
        let Some(package) = Self::package_from_task(task) else {
            return Ok(CheckOutcome::fail("no package named in the await task"));
        };
        self.npm_view(&package, Some("version")).await
    }

    async fn gather_context(&self, task: Option<&serde_json::Value>) -> Result<CheckOutcome> {
        let Some(package) = Self::package_from_task(task) else {
            return Ok(CheckOutcome::fail("no package named in the gather task"));
        };
        self.npm_view(&package, None).await
    }
}
