//! Hand-off point for unsigned certificates awaiting CA signature.
//!
//! A client deposits its encoded, unsigned certificate under a token
//! (`<nickname>.pem`) and then names that token in a `SIGN_CERTIFICATE`
//! request. The CA session takes the entry exactly once.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use crate::error::{CertChatError, CertChatResult};

/// Token under which `nickname` deposits its signing request.
pub fn pending_token(nickname: &str) -> String {
    format!("{nickname}.pem")
}

/// Tokens are plain file names: no separators, no parent references.
pub fn validate_token(token: &str) -> CertChatResult<()> {
    let ok = !token.is_empty()
        && !token.contains("..")
        && token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
    if ok {
        Ok(())
    } else {
        Err(CertChatError::InvalidName(token.to_string()))
    }
}

pub trait PendingStore: Send + Sync {
    /// Store `encoded` under `token`, replacing any earlier deposit.
    fn deposit(&self, token: &str, encoded: &str) -> CertChatResult<()>;

    /// Remove and return the deposit for `token`.
    ///
    /// Fails with [`CertChatError::NotFound`] when nothing is stored, including
    /// when a concurrent `take` won the race for the same token.
    fn take(&self, token: &str) -> CertChatResult<String>;
}

/// One file per token inside a spool directory.
#[derive(Debug, Clone)]
pub struct DirPendingStore {
    dir: PathBuf,
}

impl DirPendingStore {
    /// Open (creating if needed) the spool directory.
    pub fn open(dir: impl Into<PathBuf>) -> CertChatResult<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, token: &str) -> CertChatResult<PathBuf> {
        validate_token(token)?;
        Ok(self.dir.join(token))
    }
}

impl PendingStore for DirPendingStore {
    fn deposit(&self, token: &str, encoded: &str) -> CertChatResult<()> {
        let path = self.path_for(token)?;
        std::fs::write(&path, encoded)?;
        tracing::debug!(path = %path.display(), "pending certificate deposited");
        Ok(())
    }

    fn take(&self, token: &str) -> CertChatResult<String> {
        let path = self.path_for(token)?;
        let encoded = match std::fs::read_to_string(&path) {
            Ok(s) => s,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(CertChatError::NotFound(token.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        // Only one remover succeeds; the loser reports NotFound.
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(encoded),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(CertChatError::NotFound(token.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// In-process store, used when client and CA share a process (tests, `all` mode demos).
#[derive(Debug, Default)]
pub struct MemoryPendingStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryPendingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl PendingStore for MemoryPendingStore {
    fn deposit(&self, token: &str, encoded: &str) -> CertChatResult<()> {
        validate_token(token)?;
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(token.to_string(), encoded.to_string());
        Ok(())
    }

    fn take(&self, token: &str) -> CertChatResult<String> {
        validate_token(token)?;
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(token)
            .ok_or_else(|| CertChatError::NotFound(token.to_string()))
    }
}
