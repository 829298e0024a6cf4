//! Upload types
//!
//! This module defines the entry metadata, the per-upload session record,
//! cancellation and the errors of the upload protocol.

use crate::utils::error::ErrorKind;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Notify;

/// Kind of media stored in an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Video,
    Audio,
}

impl MediaType {
    /// Numeric media type understood by the service
    pub fn code(&self) -> u32 {
        match self {
            MediaType::Video => 1,
            MediaType::Audio => 5,
        }
    }
}

/// Metadata shared by every entry created for one recording
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryTemplate {
    pub name: String,
    pub tags: String,
    pub conversion_profile_id: Option<u64>,
}

impl EntryTemplate {
    /// Request for the primary entry
    pub fn primary(&self, media_type: MediaType) -> EntryRequest {
        EntryRequest {
            name: self.name.clone(),
            media_type,
            tags: self.tags.clone(),
            conversion_profile_id: self.conversion_profile_id,
            parent_entry_id: None,
        }
    }

    /// Request for the screen-share child of `parent_entry_id`
    pub fn child(&self, parent_entry_id: &str) -> EntryRequest {
        EntryRequest {
            name: format!("{} (screen)", self.name),
            media_type: MediaType::Video,
            tags: self.tags.clone(),
            conversion_profile_id: self.conversion_profile_id,
            parent_entry_id: Some(parent_entry_id.to_string()),
        }
    }
}

/// Step 1 metadata for a single entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryRequest {
    pub name: String,
    pub media_type: MediaType,
    pub tags: String,
    pub conversion_profile_id: Option<u64>,
    pub parent_entry_id: Option<String>,
}

/// Output of the batched create/token/bind request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedEntry {
    pub entry_id: String,
    pub token_id: String,
}

/// Progress callback: `(loaded, total)` in bytes
pub type ProgressFn = Arc<dyn Fn(u64, u64) + Send + Sync>;

/// Bookkeeping for one upload attempt
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadSession {
    pub primary_entry_id: Option<String>,
    pub secondary_entry_id: Option<String>,
    pub token_id: Option<String>,
    pub bytes_loaded: u64,
    pub bytes_total: u64,
    pub aborted: bool,
    pub done: bool,
}

impl UploadSession {
    pub fn new(bytes_total: u64) -> Self {
        Self {
            bytes_total,
            ..Self::default()
        }
    }

    /// Entries created so far, children first
    pub fn created_entry_ids(&self) -> Vec<String> {
        self.secondary_entry_id
            .iter()
            .chain(self.primary_entry_id.iter())
            .cloned()
            .collect()
    }

    /// Advance the loaded counter; it never moves backwards or past the total
    pub fn advance(&mut self, loaded: u64) -> u64 {
        self.bytes_loaded = self.bytes_loaded.max(loaded.min(self.bytes_total));
        self.bytes_loaded
    }

    pub fn is_terminal(&self) -> bool {
        self.aborted || self.done
    }
}

/// Cooperative cancellation shared between the controller and a running upload
#[derive(Clone, Default)]
pub struct CancelFlag {
    inner: Arc<CancelInner>,
}

#[derive(Default)]
struct CancelInner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves once `cancel` has been called
    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

/// Upload errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UploadError {
    #[error("Failed to create entry: {message}")]
    EntryCreation {
        message: String,
        /// Entry created before the batch failed, if any
        entry_id: Option<String>,
    },

    #[error("Failed to bind upload token: {message}")]
    TokenBind {
        message: String,
        entry_id: Option<String>,
    },

    #[error("Transfer failed: {0}")]
    Transfer(String),

    #[error("Media service error: {0}")]
    Service(String),

    #[error("Upload cancelled")]
    Cancelled {
        deleted_entry_ids: Vec<String>,
        cleanup_errors: Vec<String>,
    },
}

impl UploadError {
    pub fn cancelled() -> Self {
        UploadError::Cancelled {
            deleted_entry_ids: Vec::new(),
            cleanup_errors: Vec::new(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            UploadError::EntryCreation { .. } | UploadError::TokenBind { .. } => {
                ErrorKind::EntryCreation
            }
            UploadError::Transfer(_) | UploadError::Service(_) => ErrorKind::Transfer,
            UploadError::Cancelled { .. } => ErrorKind::Cancelled,
        }
    }

    /// Entry left behind by a partially failed batch
    pub fn partial_entry_id(&self) -> Option<&str> {
        match self {
            UploadError::EntryCreation { entry_id, .. }
            | UploadError::TokenBind { entry_id, .. } => entry_id.as_deref(),
            _ => None,
        }
    }
}
