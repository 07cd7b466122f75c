// kyc-realtime-kit/src/auth.rs

//! Bearer credentials and where the portal keeps them between sessions.
//!
//! The socket and REST clients both authenticate with the same bearer token.
//! A [`CredentialStore`] holds it so that a restarted client can
//! [`restore`](crate::portal::Portal::restore) its session without logging in
//! again.
//!
//! ## Example
//!
//! ```rust,no_run
//! use kyc_realtime_kit::auth::{Credential, CredentialStore, FileCredentialStore};
//! use kyc_realtime_kit::role::Role;
//!
//! # fn main() -> Result<(), kyc_realtime_kit::auth::CredentialError> {
//! let store = FileCredentialStore::new("/var/lib/kyc-portal/credential.json");
//! store.set(&Credential::new("eyJhbGciOi...", Role::Client))?;
//!
//! if let Some(credential) = store.get()? {
//!     println!("restoring session for {}", credential.role);
//! }
//! # Ok(())
//! # }
//! ```

use crate::role::Role;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use thiserror::Error;
use tracing::debug;

const BEARER_PREFIX: &str = "Bearer ";

/// Formats `token` as an `Authorization` header value. A token that already
/// carries the scheme is passed through.
pub fn bearer(token: &str) -> String {
    match token_from_header(token) {
        Some(raw) => format!("{BEARER_PREFIX}{raw}"),
        None => format!("{BEARER_PREFIX}{}", token.trim()),
    }
}

/// Extracts the raw token from an `Authorization` header value.
pub fn token_from_header(header_val: &str) -> Option<&str> {
    header_val
        .trim()
        .strip_prefix(BEARER_PREFIX)
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// An issued bearer token together with the role it was issued for.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub token: String,
    pub role: Role,
}

impl Credential {
    pub fn new(token: impl Into<String>, role: Role) -> Self {
        Self {
            token: token.into(),
            role,
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("token", &"<redacted>")
            .field("role", &self.role)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("credential storage failed: {0}")]
    Io(#[from] io::Error),
    #[error("stored credential is malformed: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Where the portal persists its credential.
pub trait CredentialStore: Send + Sync {
    fn get(&self) -> Result<Option<Credential>, CredentialError>;
    fn set(&self, credential: &Credential) -> Result<(), CredentialError>;
    /// Removing a credential that is not there is not an error.
    fn clear(&self) -> Result<(), CredentialError>;
}

/// Keeps the credential for the life of the process only.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    slot: Mutex<Option<Credential>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn get(&self) -> Result<Option<Credential>, CredentialError> {
        Ok(self.slot.lock().unwrap_or_else(PoisonError::into_inner).clone())
    }

    fn set(&self, credential: &Credential) -> Result<(), CredentialError> {
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(credential.clone());
        Ok(())
    }

    fn clear(&self) -> Result<(), CredentialError> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner).take();
        Ok(())
    }
}

/// Persists the credential as a small JSON document.
///
/// Writes go to a sibling temporary file that is then renamed over the
/// target, so a crash never leaves a half-written credential behind.
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    path: PathBuf,
}

impl FileCredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl CredentialStore for FileCredentialStore {
    fn get(&self) -> Result<Option<Credential>, CredentialError> {
        match fs::read(&self.path) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, credential: &Credential) -> Result<(), CredentialError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let tmp = self.temp_path();
        fs::write(&tmp, serde_json::to_vec(credential)?)?;
        fs::rename(&tmp, &self.path)?;
        debug!(path = %self.path.display(), "Credential persisted.");
        Ok(())
    }

    fn clear(&self) -> Result<(), CredentialError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
