//! Session repository
//!
//! Sessions are owned by the capture layer. The media engine only reads
//! them, except for replacing a session's chapter list after enrichment.

use crate::error::{Error, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tkr_common::{Chapter, Session, SessionSummary};
use tracing::{debug, info, warn};

pub const SESSIONS_FILE: &str = "sessions.json";

#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn load_session(&self, id: &str) -> Result<Session>;

    async fn load_summaries(&self) -> Result<Vec<SessionSummary>>;

    /// Replace one session's chapters, returning the updated session
    async fn replace_chapters(&self, id: &str, chapters: Vec<Chapter>) -> Result<Session>;
}

/// Repository over `<root>/sessions.json` (a JSON array of sessions)
#[derive(Debug, Clone)]
pub struct JsonSessionRepository {
    path: PathBuf,
}

impl JsonSessionRepository {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Repository for the standard file under a root folder
    pub fn in_root(root: &Path) -> Self {
        Self::new(root.join(SESSIONS_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_all(&self) -> Result<Vec<Session>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No sessions file at {}", self.path.display());
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };
        if content.trim().is_empty() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_str(&content)?)
    }

    /// Write via a temp file and rename so readers never see a partial file
    async fn write_all(&self, sessions: &[Session]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(sessions)?).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    /// Insert or replace a session (used by import tooling and tests)
    pub async fn upsert(&self, session: Session) -> Result<()> {
        let mut sessions = self.read_all().await?;
        match sessions.iter_mut().find(|s| s.id == session.id) {
            Some(existing) => *existing = session,
            None => sessions.push(session),
        }
        self.write_all(&sessions).await
    }
}

#[async_trait]
impl SessionRepository for JsonSessionRepository {
    async fn load_session(&self, id: &str) -> Result<Session> {
        let session = self
            .read_all()
            .await?
            .into_iter()
            .find(|s| s.id == id)
            .ok_or_else(|| Error::NotFound(format!("session {}", id)))?;

        if let Err(e) = session.validate() {
            warn!("Session {} violates record invariants: {}", id, e);
        }
        Ok(session)
    }

    async fn load_summaries(&self) -> Result<Vec<SessionSummary>> {
        let sessions = self.read_all().await?;
        Ok(sessions.iter().map(SessionSummary::from).collect())
    }

    async fn replace_chapters(&self, id: &str, chapters: Vec<Chapter>) -> Result<Session> {
        let mut sessions = self.read_all().await?;
        let session = sessions
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or_else(|| Error::NotFound(format!("session {}", id)))?;

        let count = chapters.len();
        session.replace_chapters(chapters);
        let updated = session.clone();
        self.write_all(&sessions).await?;

        info!("Replaced chapters of session {} ({} chapters)", id, count);
        Ok(updated)
    }
}
