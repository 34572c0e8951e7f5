use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::PathBuf;
use tokio::sync::RwLock;
use tracing::warn;

use super::CartSession;
use crate::errors::ServiceError;

/// Durable client-side storage for the cart session, keyed per browser
/// profile. The store flushes asynchronously; implementations only need
/// whole-session load/persist/remove.
#[async_trait]
pub trait CartStorage: Send + Sync {
    async fn load(&self) -> Result<Option<CartSession>, ServiceError>;
    async fn persist(&self, session: &CartSession) -> Result<(), ServiceError>;
    async fn remove(&self) -> Result<(), ServiceError>;
}

/// JSON file in the client profile directory.
pub struct JsonFileStorage {
    path: PathBuf,
}

impl JsonFileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl CartStorage for JsonFileStorage {
    async fn load(&self) -> Result<Option<CartSession>, ServiceError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(ServiceError::StorageError(e.to_string())),
        };
        match serde_json::from_slice(&bytes) {
            Ok(session) => Ok(Some(session)),
            Err(e) => {
                // A corrupt cart file is discarded rather than stranding the
                // client; the session restarts empty.
                warn!("discarding unreadable cart state: {}", e);
                Ok(None)
            }
        }
    }

    async fn persist(&self, session: &CartSession) -> Result<(), ServiceError> {
        let bytes = serde_json::to_vec(session)?;
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ServiceError::StorageError(e.to_string()))?;
        }
        tokio::fs::write(&self.path, bytes)
            .await
            .map_err(|e| ServiceError::StorageError(e.to_string()))
    }

    async fn remove(&self) -> Result<(), ServiceError> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ServiceError::StorageError(e.to_string())),
        }
    }
}

/// In-memory storage for tests and ephemeral profiles.
#[derive(Default)]
pub struct InMemoryStorage {
    slot: RwLock<Option<CartSession>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CartStorage for InMemoryStorage {
    async fn load(&self) -> Result<Option<CartSession>, ServiceError> {
        Ok(self.slot.read().await.clone())
    }

    async fn persist(&self, session: &CartSession) -> Result<(), ServiceError> {
        *self.slot.write().await = Some(session.clone());
        Ok(())
    }

    async fn remove(&self) -> Result<(), ServiceError> {
        *self.slot.write().await = None;
        Ok(())
    }
}
