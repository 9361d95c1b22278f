//! JSON-file session vault: `{data_dir}/session.json`.
//!
//! Writes go to a temporary file in the same directory which is then renamed
//! over the target, so a crash never leaves a half-written document.

use std::io::Write;
use std::path::{Path, PathBuf};

use parley_core::credential::{PersistedSession, SessionVault};
use parley_types::ClientError;
use tempfile::NamedTempFile;
use tracing::debug;

pub const SESSION_FILE: &str = "session.json";

#[derive(Debug, Clone)]
pub struct FileVault {
    path: PathBuf,
}

impl FileVault {
    /// Vault stored as `session.json` inside `data_dir`.
    pub fn new(data_dir: &Path) -> Self {
        Self {
            path: data_dir.join(SESSION_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn storage_error(&self, action: &str, err: impl std::fmt::Display) -> ClientError {
        ClientError::Storage(format!("failed to {action} {}: {err}", self.path.display()))
    }
}

impl SessionVault for FileVault {
    fn name(&self) -> &str {
        "file"
    }

    fn load(&self) -> Result<Option<PersistedSession>, ClientError> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(self.storage_error("read", err)),
        };
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| self.storage_error("parse", e))
    }

    fn save(&self, session: &PersistedSession) -> Result<(), ClientError> {
        let dir = self
            .path
            .parent()
            .ok_or_else(|| self.storage_error("locate directory of", "no parent"))?;
        std::fs::create_dir_all(dir).map_err(|e| self.storage_error("create directory for", e))?;

        let document = serde_json::to_vec_pretty(session)
            .map_err(|e| self.storage_error("encode", e))?;
        let mut tmp = NamedTempFile::new_in(dir).map_err(|e| self.storage_error("stage", e))?;
        tmp.write_all(&document)
            .and_then(|()| tmp.as_file().sync_all())
            .map_err(|e| self.storage_error("write", e))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(tmp.path(), std::fs::Permissions::from_mode(0o600))
                .map_err(|e| self.storage_error("restrict permissions of", e))?;
        }

        tmp.persist(&self.path)
            .map_err(|e| self.storage_error("replace", e.error))?;
        debug!(path = %self.path.display(), "Session written");
        Ok(())
    }

    fn clear(&self) -> Result<(), ClientError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(self.storage_error("remove", err)),
        }
    }
}
