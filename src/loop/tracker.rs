//! Per-file failure tracking and escalation policy.
//!
//! The tracker watches every failing turn and answers two questions: has
//! the agent been applying the same broken fix to one file over and over,
//! and if so, is it time to escalate or to stop. Entries live only while a
//! file keeps failing; the first success wipes the file's record entirely.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{MAX_FILE_MODIFICATIONS_BEFORE_META, MAX_META_CORRECTION_ATTEMPTS};
use crate::fingerprint::fingerprint;

/// Failure record for one file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileFailureEntry {
    /// Consecutive attempts sharing the same error fingerprint.
    pub modification_count: u32,
    /// Full error history. Never truncated while the entry lives.
    pub errors: Vec<String>,
    /// True once a meta-correction has been issued for the current streak.
    pub meta_correction_sent: bool,
    /// Attempts made after the meta-correction was issued.
    pub meta_correction_attempts: u32,
    /// Fingerprint of the most recent error.
    pub last_error_hash: String,
}

/// What the tracker decided about a recorded failure.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FailureVerdict {
    /// Escalation message to inject into the next context build, if the
    /// same-error threshold was just crossed.
    pub meta_correction: Option<String>,
    /// True when the file has exhausted its post-escalation budget and
    /// the loop must end.
    pub terminate: bool,
}

fn default_modifications_before_meta() -> u32 {
    MAX_FILE_MODIFICATIONS_BEFORE_META
}

fn default_max_meta_attempts() -> u32 {
    MAX_META_CORRECTION_ATTEMPTS
}

/// Tracks consecutive failures per file and decides when to escalate.
///
/// # Example
///
/// ```
/// use packsmith::r#loop::tracker::FileFailureTracker;
///
/// let mut tracker = FileFailureTracker::new();
/// let verdict = tracker.record_failure("src/index.ts", "type error");
/// assert!(verdict.meta_correction.is_none());
/// assert!(!verdict.terminate);
///
/// tracker.record_success("src/index.ts");
/// assert!(tracker.is_empty());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileFailureTracker {
    entries: BTreeMap<String, FileFailureEntry>,
    #[serde(default = "default_modifications_before_meta")]
    modifications_before_meta: u32,
    #[serde(default = "default_max_meta_attempts")]
    max_meta_attempts: u32,
}

impl Default for FileFailureTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl FileFailureTracker {
    /// Create a tracker with the default thresholds.
    #[must_use]
    pub fn new() -> Self {
        Self::with_thresholds(
            MAX_FILE_MODIFICATIONS_BEFORE_META,
            MAX_META_CORRECTION_ATTEMPTS,
        )
    }

    /// Create a tracker with explicit thresholds.
    #[must_use]
    pub fn with_thresholds(modifications_before_meta: u32, max_meta_attempts: u32) -> Self {
        Self {
            entries: BTreeMap::new(),
            modifications_before_meta,
            max_meta_attempts,
        }
    }

    /// Record a failed attempt on a file.
    ///
    /// Applies the escalation policy: after `modifications_before_meta`
    /// consecutive same-fingerprint failures a meta-correction message is
    /// produced exactly once; once `max_meta_attempts` further attempts
    /// fail, the verdict demands termination.
    pub fn record_failure(&mut self, path: &str, details: &str) -> FailureVerdict {
        let hash = fingerprint(details);

        let is_new = !self.entries.contains_key(path);
        let entry = self
            .entries
            .entry(path.to_string())
            .or_insert_with(|| FileFailureEntry {
                modification_count: 0,
                errors: Vec::new(),
                meta_correction_sent: false,
                meta_correction_attempts: 0,
                last_error_hash: hash.clone(),
            });

        if is_new || entry.last_error_hash != hash {
            entry.modification_count = 1;
            entry.last_error_hash = hash;
        } else {
            entry.modification_count += 1;
        }
        entry.errors.push(details.to_string());

        debug!(
            file = path,
            count = entry.modification_count,
            "recorded failure"
        );

        if entry.modification_count >= self.modifications_before_meta
            && !entry.meta_correction_sent
        {
            entry.meta_correction_sent = true;
            let message = meta_correction_message(
                path,
                entry,
                self.max_meta_attempts - entry.meta_correction_attempts,
            );
            return FailureVerdict {
                meta_correction: Some(message),
                terminate: false,
            };
        }

        if entry.meta_correction_sent {
            entry.meta_correction_attempts += 1;
            if entry.meta_correction_attempts > self.max_meta_attempts {
                debug!(file = path, "meta-correction budget exhausted");
                return FailureVerdict {
                    meta_correction: None,
                    terminate: true,
                };
            }
        }

        FailureVerdict::default()
    }

    /// Record a successful attempt on a file: full reset, the entry is
    /// removed rather than zeroed.
    pub fn record_success(&mut self, path: &str) {
        if self.entries.remove(path).is_some() {
            debug!(file = path, "failure history cleared after success");
        }
    }

    /// Drop a file's record without a success, e.g. after a human took
    /// over the stuck file.
    pub fn reset(&mut self, path: &str) {
        self.entries.remove(path);
    }

    /// Look up the entry for a file.
    #[must_use]
    pub fn entry(&self, path: &str) -> Option<&FileFailureEntry> {
        self.entries.get(path)
    }

    /// Iterate over all tracked entries.
    pub fn entries(&self) -> impl Iterator<Item = (&String, &FileFailureEntry)> {
        self.entries.iter()
    }

    /// Number of files currently failing.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no file is currently failing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Render the escalated corrective instruction for a stuck file.
fn meta_correction_message(path: &str, entry: &FileFailureEntry, remaining: u32) -> String {
    let last_error = entry.errors.last().map(String::as_str).unwrap_or_default();
    format!(
        "File `{path}` has been modified {count} times and keeps failing with the same error.\n\
         \n\
         ## Expected Format\n\
         Produce a complete, self-contained replacement for `{path}` that resolves the error \
         below. Do not re-apply the previous change.\n\
         \n\
         ## Issue Observed\n\
         The last {count} modifications of `{path}` produced an identical diagnostic, so the \
         changes are not addressing the root cause.\n\
         \n\
         ## Most Recent Error\n\
         {last_error}\n\
         \n\
         {remaining} attempt(s) remain before the loop terminates on this file.",
        count = entry.modification_count,
    )
}
