//! Session persistence backends.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::Session;
use crate::error::{ApiError, Result};

/// File name of the persisted session under the FitControl home directory.
pub const SESSION_FILE_NAME: &str = "auth-storage.json";

/// Storage for the session record between process runs.
#[async_trait]
pub trait SessionPersistence: Send + Sync {
    /// Load the stored session, `None` if nothing was stored.
    async fn load(&self) -> Result<Option<Session>>;

    /// Replace the stored session.
    async fn save(&self, session: &Session) -> Result<()>;

    /// Delete the stored session.
    async fn remove(&self) -> Result<()>;
}

/// Keeps nothing. Sessions live only as long as the process.
#[derive(Debug, Clone, Copy, Default)]
pub struct MemoryPersistence;

#[async_trait]
impl SessionPersistence for MemoryPersistence {
    async fn load(&self) -> Result<Option<Session>> {
        Ok(None)
    }

    async fn save(&self, _session: &Session) -> Result<()> {
        Ok(())
    }

    async fn remove(&self) -> Result<()> {
        Ok(())
    }
}

/// On-disk document layout.
#[derive(Debug, Serialize, Deserialize)]
struct StoredSession {
    state: Session,
    #[serde(default)]
    version: u32,
}

const STORAGE_VERSION: u32 = 0;

/// Stores the session as a JSON document on disk.
#[derive(Debug, Clone)]
pub struct FileSessionPersistence {
    path: PathBuf,
}

impl FileSessionPersistence {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `~/.fitcontrol/auth-storage.json`
    pub fn default_path() -> Result<PathBuf> {
        let home = dirs::home_dir()
            .ok_or_else(|| ApiError::Config("Could not find home directory".to_string()))?;
        Ok(home.join(".fitcontrol").join(SESSION_FILE_NAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl SessionPersistence for FileSessionPersistence {
    async fn load(&self) -> Result<Option<Session>> {
        let content = match tokio::fs::read(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let stored: StoredSession = serde_json::from_slice(&content).map_err(|e| {
            ApiError::Persistence(format!("{}: {}", self.path.display(), e))
        })?;

        let mut session = stored.state;
        session.recompute();
        Ok(Some(session))
    }

    async fn save(&self, session: &Session) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let stored = StoredSession {
            state: session.clone(),
            version: STORAGE_VERSION,
        };
        let content = serde_json::to_vec_pretty(&stored)
            .map_err(|e| ApiError::Persistence(e.to_string()))?;

        tokio::fs::write(&self.path, content).await?;
        Ok(())
    }

    async fn remove(&self) -> Result<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::test_user;

    #[tokio::test]
    async fn test_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let persistence = FileSessionPersistence::new(dir.path().join("nested").join(SESSION_FILE_NAME));

        assert!(persistence.load().await.unwrap().is_none());

        let session = Session::new(test_user(), "a1".to_string(), "r1".to_string());
        persistence.save(&session).await.unwrap();

        let raw: serde_json::Value =
            serde_json::from_slice(&std::fs::read(persistence.path()).unwrap()).unwrap();
        assert_eq!(raw["state"]["token"], "a1");
        assert_eq!(raw["version"], 0);

        let loaded = persistence.load().await.unwrap().unwrap();
        assert_eq!(loaded, session);

        persistence.remove().await.unwrap();
        assert!(persistence.load().await.unwrap().is_none());
        persistence.remove().await.unwrap();
    }

    #[tokio::test]
    async fn test_load_recomputes_flag() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SESSION_FILE_NAME);
        std::fs::write(
            &path,
            r#"{"state": {"user": null, "token": "a1", "refreshToken": "r1", "isAuthenticated": true}, "version": 0}"#,
        )
        .unwrap();

        let loaded = FileSessionPersistence::new(path).load().await.unwrap().unwrap();
        assert!(!loaded.is_authenticated());
        assert_eq!(loaded.refresh_token(), Some("r1"));
    }

    #[tokio::test]
    async fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SESSION_FILE_NAME);
        std::fs::write(&path, "not json").unwrap();

        let err = FileSessionPersistence::new(path).load().await.unwrap_err();
        assert!(matches!(err, ApiError::Persistence(_)));
    }
}
