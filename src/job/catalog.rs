//! Catalog service seam.
//!
//! The catalog owns image records and their status field. The generator only
//! writes status transitions and announces completion; everything else about
//! the record (metadata, annotations, persistence) lives behind this trait.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info};

use crate::error::CatalogError;

use super::status::JobStatus;

/// Capacity of the ready-event channel in [`MemoryCatalog`].
const READY_CHANNEL_CAPACITY: usize = 64;

/// Receives status updates and completion notifications.
#[async_trait]
pub trait CatalogService: Send + Sync {
    /// Record the generation status of an image.
    async fn set_status(&self, image_id: &str, status: JobStatus) -> Result<(), CatalogError>;

    /// Announce that every tile of an image has been written.
    async fn notify_ready(&self, image_id: &str) -> Result<(), CatalogError>;
}

// =============================================================================
// In-Memory Catalog
// =============================================================================

/// Catalog held in memory, recording the full status history per image.
///
/// Rejects status changes that break the job lifecycle with
/// [`CatalogError::InvalidTransition`]; the first status of an image must be
/// PENDING. Used by the CLI, where there is no external record store, and by tests.
#[derive(Debug)]
pub struct MemoryCatalog {
    history: RwLock<HashMap<String, Vec<JobStatus>>>,
    ready_tx: broadcast::Sender<String>,
}

impl Default for MemoryCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCatalog {
    pub fn new() -> Self {
        let (ready_tx, _) = broadcast::channel(READY_CHANNEL_CAPACITY);
        Self {
            history: RwLock::new(HashMap::new()),
            ready_tx,
        }
    }

    /// Latest status of an image, if any was recorded.
    pub async fn status(&self, image_id: &str) -> Option<JobStatus> {
        self.history
            .read()
            .await
            .get(image_id)
            .and_then(|h| h.last().copied())
    }

    /// Every status recorded for an image, oldest first.
    pub async fn history(&self, image_id: &str) -> Vec<JobStatus> {
        self.history
            .read()
            .await
            .get(image_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Subscribe to ready notifications; each message is an image id.
    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.ready_tx.subscribe()
    }
}

#[async_trait]
impl CatalogService for MemoryCatalog {
    async fn set_status(&self, image_id: &str, status: JobStatus) -> Result<(), CatalogError> {
        let mut history = self.history.write().await;

        let current = history.get(image_id).and_then(|h| h.last().copied());
        let allowed = match current {
            Some(current) => current.can_transition_to(status),
            None => status == JobStatus::Pending,
        };
        if !allowed {
            return Err(CatalogError::InvalidTransition {
                image_id: image_id.to_string(),
                from: current,
                to: status,
            });
        }

        if status.is_terminal() {
            info!(image_id = image_id, status = %status, "Status update");
        } else {
            debug!(image_id = image_id, status = %status, "Status update");
        }
        history.entry(image_id.to_string()).or_default().push(status);
        Ok(())
    }

    async fn notify_ready(&self, image_id: &str) -> Result<(), CatalogError> {
        // No subscribers is not an error
        let _ = self.ready_tx.send(image_id.to_string());
        Ok(())
    }
}
