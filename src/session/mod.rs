//! Session state and recovery.
//!
//! A session wraps the controller's [`LoopState`] with the metadata needed
//! to resume after a crash or a graceful pause: schema version, timing,
//! and the writing process. The controller checkpoints a session at every
//! turn boundary through the `StateStore` collaborator; this module owns
//! the shape of what gets stored, not the storage itself.
//!
//! # Forward Compatibility
//!
//! Session state includes a version field to handle schema evolution:
//! compatible versions load directly, incompatible ones are rejected
//! gracefully and the loop starts fresh.

pub mod persistence;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::r#loop::state::LoopState;

/// Current schema version for session state.
/// Increment when making breaking changes to the serialization format.
pub const SESSION_STATE_VERSION: u32 = 1;

/// Minimum supported schema version for backward compatibility.
pub const MIN_SUPPORTED_VERSION: u32 = 1;

/// Session metadata containing version and timing information.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionMetadata {
    /// Schema version for forward compatibility.
    pub version: u32,
    /// When this session was created.
    pub created_at: DateTime<Utc>,
    /// When this session was last saved.
    pub saved_at: DateTime<Utc>,
    /// Process ID that last wrote this session.
    pub pid: u32,
    /// Unique session identifier.
    pub session_id: String,
}

impl SessionMetadata {
    /// Creates new session metadata with current timestamp and PID.
    #[must_use]
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            version: SESSION_STATE_VERSION,
            created_at: now,
            saved_at: now,
            pid: std::process::id(),
            session_id: Uuid::new_v4().to_string(),
        }
    }

    /// Updates the saved_at timestamp and PID.
    pub fn touch(&mut self) {
        self.saved_at = Utc::now();
        self.pid = std::process::id();
    }
}

impl Default for SessionMetadata {
    fn default() -> Self {
        Self::new()
    }
}

/// Unified session state: everything needed to resume the build loop.
///
/// # Example
///
/// ```
/// use packsmith::session::SessionState;
///
/// let session = SessionState::new();
/// assert!(session.is_version_compatible());
/// assert_eq!(session.loop_state.loop_count, 0);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionState {
    /// Version, timing, and writer metadata.
    pub metadata: SessionMetadata,
    /// The controller's checkpointed state.
    pub loop_state: LoopState,
}

impl SessionState {
    /// Creates a fresh session with an empty loop state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            metadata: SessionMetadata::new(),
            loop_state: LoopState::new(),
        }
    }

    /// Wraps an existing loop state in a fresh session.
    #[must_use]
    pub fn with_loop_state(loop_state: LoopState) -> Self {
        Self {
            metadata: SessionMetadata::new(),
            loop_state,
        }
    }

    /// The schema version this session was written with.
    #[must_use]
    pub fn version(&self) -> u32 {
        self.metadata.version
    }

    /// Whether this session can be loaded by the current build.
    #[must_use]
    pub fn is_version_compatible(&self) -> bool {
        self.metadata.version >= MIN_SUPPORTED_VERSION
            && self.metadata.version <= SESSION_STATE_VERSION
    }

    /// Update the save timestamp before persisting.
    pub fn touch(&mut self) {
        self.metadata.touch();
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_new() {
        let metadata = SessionMetadata::new();
        assert_eq!(metadata.version, SESSION_STATE_VERSION);
        assert!(metadata.pid > 0);
        assert!(!metadata.session_id.is_empty());
    }

    #[test]
    fn test_metadata_touch_updates_timestamp() {
        let mut metadata = SessionMetadata::new();
        let first_save = metadata.saved_at;
        metadata.touch();
        assert!(metadata.saved_at >= first_save);
    }

    #[test]
    fn test_session_ids_are_unique() {
        let a = SessionMetadata::new();
        let b = SessionMetadata::new();
        assert_ne!(a.session_id, b.session_id);
    }

    #[test]
    fn test_version_compatibility() {
        let mut session = SessionState::new();
        assert!(session.is_version_compatible());

        session.metadata.version = SESSION_STATE_VERSION + 1;
        assert!(!session.is_version_compatible());

        session.metadata.version = 0;
        assert!(!session.is_version_compatible());
    }

    #[test]
    fn test_session_wraps_loop_state() {
        let mut loop_state = LoopState::new();
        loop_state.loop_count = 7;
        loop_state.record_file_modified("a.ts");

        let session = SessionState::with_loop_state(loop_state);
        assert_eq!(session.loop_state.loop_count, 7);
        assert_eq!(session.loop_state.files_modified, vec!["a.ts"]);
    }

    #[test]
    fn test_session_serialize_round_trip() {
        let mut session = SessionState::new();
        session.loop_state.loop_count = 3;
        session.loop_state.push_history("[turn 3] RUN_BUILD ok");

        let json = serde_json::to_string_pretty(&session).unwrap();
        let restored: SessionState = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, session);
    }
}
