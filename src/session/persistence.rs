//! File-based session storage with atomic writes.

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use fs2::FileExt;
use tracing::warn;

use super::SessionState;
use crate::testing::traits::StateStore;

/// Default session file name.
const SESSION_FILE: &str = "session.json";

/// Temporary file suffix for atomic writes.
const TMP_SUFFIX: &str = ".tmp";

/// Lock file suffix for concurrent access prevention.
const LOCK_SUFFIX: &str = ".lock";

/// JSON-file implementation of the `StateStore` collaborator.
///
/// Writes go to a temporary file first and are renamed into place, so a
/// crash mid-save never leaves a truncated session. An advisory lock
/// prevents two controller processes from writing the same session.
/// Corrupted or version-incompatible files are deleted with a warning and
/// reported as "no session", so a bad file can never wedge the loop.
#[derive(Debug, Clone)]
pub struct JsonStateStore {
    /// Directory where session files are stored.
    dir: PathBuf,
}

impl JsonStateStore {
    /// Creates a store rooted at the given directory.
    #[must_use]
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    /// Returns the path to the session file.
    #[must_use]
    pub fn session_file_path(&self) -> PathBuf {
        self.dir.join(SESSION_FILE)
    }

    /// Returns the path to the temporary session file.
    #[must_use]
    pub fn tmp_file_path(&self) -> PathBuf {
        self.dir.join(format!("{SESSION_FILE}{TMP_SUFFIX}"))
    }

    /// Returns the path to the lock file.
    #[must_use]
    pub fn lock_file_path(&self) -> PathBuf {
        self.dir.join(format!("{SESSION_FILE}{LOCK_SUFFIX}"))
    }

    /// Checks if a session file exists.
    #[must_use]
    pub fn exists(&self) -> bool {
        self.session_file_path().exists()
    }
}

impl StateStore for JsonStateStore {
    fn save(&self, state: &SessionState) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create state dir {}", self.dir.display()))?;

        let lock_file = File::create(self.lock_file_path())?;
        FileExt::lock_exclusive(&lock_file).context("Failed to acquire session lock")?;

        let tmp_path = self.tmp_file_path();
        let json = serde_json::to_string_pretty(state)?;

        let mut tmp_file = File::create(&tmp_path)?;
        tmp_file.write_all(json.as_bytes())?;
        tmp_file.sync_all()?;

        fs::rename(&tmp_path, self.session_file_path())?;

        Ok(())
    }

    fn load(&self) -> Result<Option<SessionState>> {
        let session_path = self.session_file_path();

        if !session_path.exists() {
            return Ok(None);
        }

        let lock_path = self.lock_file_path();
        if lock_path.exists() {
            let lock_file = File::open(&lock_path)?;
            FileExt::lock_shared(&lock_file).context("Failed to acquire session lock")?;
        }

        let mut file = match File::open(&session_path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let mut contents = String::new();
        file.read_to_string(&mut contents)?;

        let state: SessionState = match serde_json::from_str(&contents) {
            Ok(s) => s,
            Err(e) => {
                warn!(
                    "Corrupted session file at {}: {}. Deleting and starting fresh.",
                    session_path.display(),
                    e
                );
                let _ = fs::remove_file(&session_path);
                return Ok(None);
            }
        };

        if !state.is_version_compatible() {
            warn!(
                "Incompatible session version {} (supported: {}). Starting fresh.",
                state.version(),
                super::SESSION_STATE_VERSION
            );
            let _ = fs::remove_file(&session_path);
            return Ok(None);
        }

        Ok(Some(state))
    }

    fn delete(&self) -> Result<()> {
        let session_path = self.session_file_path();
        if session_path.exists() {
            fs::remove_file(&session_path)?;
        }
        Ok(())
    }
}
