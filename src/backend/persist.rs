// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Session persistence used by identity provider clients.
//!
//! Only provider implementations read or write this storage; the rest of the
//! app sees sessions through [`IdentityProvider`](super::IdentityProvider).

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::{AppError, Result};
use crate::models::Session;

/// Everything the provider client keeps across restarts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersistedAuth {
    #[serde(default)]
    pub session: Option<Session>,
    /// PKCE verifier of a login started but not yet completed
    #[serde(default)]
    pub code_verifier: Option<String>,
}

/// Storage backend for [`PersistedAuth`].
pub trait SessionStorage: Send + Sync + 'static {
    fn load(&self) -> impl Future<Output = Result<PersistedAuth>> + Send;
    fn save(&self, state: &PersistedAuth) -> impl Future<Output = Result<()>> + Send;
    fn clear(&self) -> impl Future<Output = Result<()>> + Send;
}

/// In-process storage. Clones share the same slot, so two provider
/// instances built from clones behave like two launches of the app.
#[derive(Clone, Default)]
pub struct MemorySessionStorage {
    slot: Arc<Mutex<PersistedAuth>>,
}

impl MemorySessionStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStorage for MemorySessionStorage {
    async fn load(&self) -> Result<PersistedAuth> {
        Ok(self.slot.lock().await.clone())
    }

    async fn save(&self, state: &PersistedAuth) -> Result<()> {
        *self.slot.lock().await = state.clone();
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        *self.slot.lock().await = PersistedAuth::default();
        Ok(())
    }
}

/// JSON file storage.
#[derive(Clone)]
pub struct FileSessionStorage {
    path: PathBuf,
}

impl FileSessionStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SessionStorage for FileSessionStorage {
    async fn load(&self) -> Result<PersistedAuth> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(PersistedAuth::default())
            }
            Err(e) => {
                return Err(AppError::Internal(anyhow::anyhow!(
                    "Failed to read {}: {}",
                    self.path.display(),
                    e
                )))
            }
        };

        // A corrupt file is treated as "nothing persisted"
        match serde_json::from_slice(&bytes) {
            Ok(state) => Ok(state),
            Err(e) => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Discarding unreadable session file"
                );
                Ok(PersistedAuth::default())
            }
        }
    }

    async fn save(&self, state: &PersistedAuth) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| AppError::Internal(e.into()))?;
        }

        let json = serde_json::to_vec_pretty(state).map_err(|e| AppError::Internal(e.into()))?;

        // Write-then-rename so a crash never leaves a half-written file
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json)
            .await
            .map_err(|e| AppError::Internal(e.into()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| AppError::Internal(e.into()))?;
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AppError::Internal(e.into())),
        }
    }
}
