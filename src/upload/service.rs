//! Remote media service boundary

use super::types::{CreatedEntry, EntryRequest, ProgressFn, UploadError};
use async_trait::async_trait;
use bytes::Bytes;

/// The remote media service, treated as opaque
#[async_trait]
pub trait MediaService: Send + Sync {
    /// Create the entry, create an upload token and bind the token to the
    /// entry, all in one batched request. Any failing step fails the call.
    async fn create_entry(&self, request: &EntryRequest) -> Result<CreatedEntry, UploadError>;

    /// Send `data` to the token, reporting `(loaded, total)` as it goes
    async fn upload(
        &self,
        token_id: &str,
        data: Bytes,
        mime_type: &str,
        progress: ProgressFn,
    ) -> Result<(), UploadError>;

    /// Delete an entry
    async fn delete_entry(&self, entry_id: &str) -> Result<(), UploadError>;
}
