// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Token persistence: load/save the access token to a JSON file with atomic writes.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::token::AccessToken;

/// Durable backing for the access token (survives process restarts).
pub trait TokenPersistence: Send + Sync {
    fn load(&self) -> anyhow::Result<Option<AccessToken>>;
    fn save(&self, token: &AccessToken) -> anyhow::Result<()>;
    fn remove(&self) -> anyhow::Result<()>;
}

/// On-disk shape of the persisted session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedSession {
    pub access_token: String,
    /// When the token was written, as epoch milliseconds.
    #[serde(default)]
    pub saved_at_ms: u64,
}

/// Stores the token at `<state_dir>/session.json`.
#[derive(Debug, Clone)]
pub struct FileTokenPersistence {
    path: PathBuf,
}

impl FileTokenPersistence {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn in_dir(dir: &Path) -> Self {
        Self::new(dir.join("session.json"))
    }
}

impl TokenPersistence for FileTokenPersistence {
    fn load(&self) -> anyhow::Result<Option<AccessToken>> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let session: PersistedSession = serde_json::from_str(&contents)?;
        Ok(AccessToken::parse(session.access_token))
    }

    /// Write tmp + rename so readers never see a half-written file.
    ///
    /// Two clients sharing a state dir (or two settlements in one process)
    /// can save at the same moment. With a fixed `session.json.tmp` name one
    /// writer's rename could move the other's partial file into place, or
    /// fail with `NotFound` after the other already renamed it. The PID
    /// separates processes and the counter separates saves within one.
    fn save(&self, token: &AccessToken) -> anyhow::Result<()> {
        use std::sync::atomic::{AtomicU32, Ordering};
        static COUNTER: AtomicU32 = AtomicU32::new(0);

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let session =
            PersistedSession { access_token: token.expose().to_owned(), saved_at_ms: epoch_ms() };
        let json = serde_json::to_string_pretty(&session)?;
        let seq = COUNTER.fetch_add(1, Ordering::Relaxed);
        let tmp_name = format!(
            "{}.{}.{}.tmp",
            self.path.file_name().unwrap_or_default().to_string_lossy(),
            std::process::id(),
            seq,
        );
        let tmp_path = self.path.with_file_name(tmp_name);
        std::fs::write(&tmp_path, json)?;
        std::fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }

    fn remove(&self) -> anyhow::Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

fn epoch_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
