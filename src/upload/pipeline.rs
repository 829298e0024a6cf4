//! Upload pipeline orchestration
//!
//! Each recording goes through the batched create/token/bind request and a
//! byte transfer. A screen-share recording repeats both as a child of the
//! primary entry. Failed or cancelled attempts delete what they created.

use super::service::MediaService;
use super::types::{
    CancelFlag, EntryRequest, EntryTemplate, MediaType, ProgressFn, UploadError, UploadSession,
};
use crate::recorder::state::RecordingResult;
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Primary,
    Secondary,
}

/// Drives uploads against a media service
pub struct UploadPipeline {
    service: Arc<dyn MediaService>,
    session: Arc<Mutex<UploadSession>>,
}

impl UploadPipeline {
    /// Create a new upload pipeline
    pub fn new(service: Arc<dyn MediaService>) -> Self {
        Self {
            service,
            session: Arc::new(Mutex::new(UploadSession::default())),
        }
    }

    /// Snapshot of the current (or last) upload
    pub fn session(&self) -> UploadSession {
        self.session.lock().clone()
    }

    pub fn reset(&self) {
        *self.session.lock() = UploadSession::default();
    }

    /// Upload a finished recording.
    ///
    /// Returns the primary entry id. On failure or cancellation every entry
    /// created during this attempt is deleted, best effort.
    pub async fn run(
        &self,
        result: &RecordingResult,
        template: &EntryTemplate,
        cancel: &CancelFlag,
        progress: ProgressFn,
    ) -> Result<String, UploadError> {
        let total = result.total_bytes();
        *self.session.lock() = UploadSession::new(total);
        tracing::info!("Starting upload of recording {} ({} bytes)", result.id, total);

        match self.run_steps(result, template, cancel, &progress).await {
            Ok(entry_id) => {
                self.session.lock().done = true;
                tracing::info!("Upload complete, entry {}", entry_id);
                Ok(entry_id)
            }
            Err(error) => {
                let cancelled =
                    cancel.is_cancelled() || matches!(error, UploadError::Cancelled { .. });
                if cancelled {
                    self.session.lock().aborted = true;
                }

                let (deleted_entry_ids, cleanup_errors) = self.cleanup().await;
                if cancelled {
                    tracing::info!("Upload cancelled, deleted {:?}", deleted_entry_ids);
                    Err(UploadError::Cancelled {
                        deleted_entry_ids,
                        cleanup_errors,
                    })
                } else {
                    tracing::error!("Upload failed: {}", error);
                    for e in &cleanup_errors {
                        tracing::warn!("Cleanup after failed upload: {}", e);
                    }
                    Err(error)
                }
            }
        }
    }

    async fn run_steps(
        &self,
        result: &RecordingResult,
        template: &EntryTemplate,
        cancel: &CancelFlag,
        progress: &ProgressFn,
    ) -> Result<String, UploadError> {
        let media_type = if result.has_video {
            MediaType::Video
        } else {
            MediaType::Audio
        };

        let primary_id = self
            .upload_entry(
                Slot::Primary,
                template.primary(media_type),
                result.primary.clone(),
                &result.primary_mime_type,
                0,
                cancel,
                progress,
            )
            .await?;

        if let Some(screen) = &result.screen {
            self.upload_entry(
                Slot::Secondary,
                template.child(&primary_id),
                screen.clone(),
                result.screen_mime_type.as_deref().unwrap_or_default(),
                result.primary.len() as u64,
                cancel,
                progress,
            )
            .await?;
        }

        // The last transport tick may fall short of the total.
        let (loaded, total) = {
            let session = self.session.lock();
            (session.bytes_loaded, session.bytes_total)
        };
        if loaded < total || total == 0 {
            let loaded = self.session.lock().advance(total);
            progress(loaded, total);
        }

        Ok(primary_id)
    }

    #[allow(clippy::too_many_arguments)]
    async fn upload_entry(
        &self,
        slot: Slot,
        request: EntryRequest,
        data: Bytes,
        mime_type: &str,
        offset: u64,
        cancel: &CancelFlag,
        progress: &ProgressFn,
    ) -> Result<String, UploadError> {
        if cancel.is_cancelled() {
            return Err(UploadError::cancelled());
        }

        // The batched request is never interrupted; a cancel arriving while it
        // is in flight is honored once it returns.
        tracing::debug!("Creating {:?} entry '{}'", slot, request.name);
        let created = match self.service.create_entry(&request).await {
            Ok(created) => created,
            Err(e) => {
                if let Some(entry_id) = e.partial_entry_id() {
                    self.record_entry(slot, entry_id.to_string(), None);
                }
                return Err(e);
            }
        };
        self.record_entry(slot, created.entry_id.clone(), Some(created.token_id.clone()));
        tracing::info!(
            "Created {:?} entry {} with token {}",
            slot,
            created.entry_id,
            created.token_id
        );

        if cancel.is_cancelled() {
            return Err(UploadError::cancelled());
        }

        let tracker = self.progress_tracker(offset, cancel.clone(), progress.clone());
        let transfer = self
            .service
            .upload(&created.token_id, data, mime_type, tracker);

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::info!("Transfer to token {} aborted", created.token_id);
                Err(UploadError::cancelled())
            }
            outcome = transfer => outcome.map(|_| created.entry_id),
        }
    }

    fn record_entry(&self, slot: Slot, entry_id: String, token_id: Option<String>) {
        let mut session = self.session.lock();
        match slot {
            Slot::Primary => session.primary_entry_id = Some(entry_id),
            Slot::Secondary => session.secondary_entry_id = Some(entry_id),
        }
        if token_id.is_some() {
            session.token_id = token_id;
        }
    }

    /// Maps per-transfer progress onto the whole upload
    fn progress_tracker(
        &self,
        offset: u64,
        cancel: CancelFlag,
        progress: ProgressFn,
    ) -> ProgressFn {
        let session = self.session.clone();
        Arc::new(move |loaded, _| {
            if cancel.is_cancelled() {
                return;
            }
            let (loaded, total) = {
                let mut session = session.lock();
                if session.is_terminal() {
                    return;
                }
                (session.advance(offset + loaded), session.bytes_total)
            };
            progress(loaded, total);
        })
    }

    /// Delete every entry created in this attempt
    async fn cleanup(&self) -> (Vec<String>, Vec<String>) {
        let entry_ids = self.session.lock().created_entry_ids();
        let mut deleted = Vec::new();
        let mut errors = Vec::new();

        for entry_id in entry_ids {
            match self.service.delete_entry(&entry_id).await {
                Ok(()) => {
                    tracing::debug!("Deleted entry {}", entry_id);
                    deleted.push(entry_id);
                }
                Err(e) => {
                    tracing::warn!("Failed to delete entry {}: {}", entry_id, e);
                    errors.push(format!("{}: {}", entry_id, e));
                }
            }
        }
        (deleted, errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeService, ServiceCall};
    use crate::utils::error::ErrorKind;
    use chrono::Utc;
    use std::time::Duration;

    fn recording(primary: usize, screen: Option<usize>) -> RecordingResult {
        RecordingResult {
            id: uuid::Uuid::new_v4(),
            primary: Bytes::from(vec![7u8; primary]),
            primary_mime_type: "video/webm".into(),
            screen: screen.map(|n| Bytes::from(vec![9u8; n])),
            screen_mime_type: screen.map(|_| "video/webm".into()),
            has_video: true,
            duration_ms: 5000,
            started_at: Utc::now(),
        }
    }

    fn template() -> EntryTemplate {
        EntryTemplate {
            name: "Clip".into(),
            tags: "expressrecorder".into(),
            conversion_profile_id: None,
        }
    }

    fn progress_log() -> (ProgressFn, Arc<Mutex<Vec<(u64, u64)>>>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = log.clone();
        (Arc::new(move |loaded, total| sink.lock().push((loaded, total))), log)
    }

    #[tokio::test(start_paused = true)]
    async fn test_primary_and_child_upload() {
        let service = Arc::new(FakeService::new());
        let pipeline = UploadPipeline::new(service.clone());
        let (progress, log) = progress_log();

        let entry_id = pipeline
            .run(&recording(300_000, Some(100_000)), &template(), &CancelFlag::new(), progress)
            .await
            .unwrap();

        assert_eq!(entry_id, "0_entry1");
        let calls = service.calls();
        assert!(matches!(&calls[0], ServiceCall::Create(r) if r.parent_entry_id.is_none()));
        assert!(matches!(
            &calls[1],
            ServiceCall::Upload { token_id, bytes: 300_000 } if token_id == "token1"
        ));
        assert!(matches!(
            &calls[2],
            ServiceCall::Create(r) if r.parent_entry_id.as_deref() == Some("0_entry1")
        ));
        assert!(matches!(&calls[3], ServiceCall::Upload { bytes: 100_000, .. }));
        assert_eq!(calls.len(), 4);

        let session = pipeline.session();
        assert!(session.done && !session.aborted);
        assert_eq!(session.secondary_entry_id.as_deref(), Some("0_entry2"));
        assert_eq!(session.bytes_loaded, 400_000);

        let log = log.lock();
        assert!(log.windows(2).all(|w| w[0].0 <= w[1].0));
        assert_eq!(*log.last().unwrap(), (400_000, 400_000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_failure_deletes_partial_entry() {
        let service = Arc::new(FakeService::new());
        service.fail_create_with_partial_entry("token quota exceeded");
        let pipeline = UploadPipeline::new(service.clone());
        let (progress, _) = progress_log();

        let err = pipeline
            .run(&recording(1000, None), &template(), &CancelFlag::new(), progress)
            .await
            .unwrap_err();

        assert!(matches!(err, UploadError::TokenBind { .. }));
        assert_eq!(err.kind(), ErrorKind::EntryCreation);
        assert_eq!(service.deleted(), vec!["0_partial"]);
        assert!(!service.calls().iter().any(|c| matches!(c, ServiceCall::Upload { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_mid_transfer_deletes_entries() {
        let service = Arc::new(FakeService::new().with_transfer_time(Duration::from_secs(10)));
        let pipeline = Arc::new(UploadPipeline::new(service.clone()));
        let cancel = CancelFlag::new();
        let (progress, log) = progress_log();

        let task = {
            let pipeline = pipeline.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                pipeline
                    .run(&recording(1_000_000, None), &template(), &cancel, progress)
                    .await
            })
        };

        tokio::time::sleep(Duration::from_secs(3)).await;
        let loaded_at_cancel = log.lock().last().map(|p| p.0).unwrap_or(0);
        cancel.cancel();
        let err = task.await.unwrap().unwrap_err();

        assert!(matches!(
            &err,
            UploadError::Cancelled { deleted_entry_ids, cleanup_errors }
                if deleted_entry_ids == &vec!["0_entry1".to_string()] && cleanup_errors.is_empty()
        ));
        assert!(pipeline.session().aborted);
        assert!(loaded_at_cancel < 1_000_000);
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(log.lock().last().map(|p| p.0).unwrap_or(0), loaded_at_cancel);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_screen_transfer_deletes_child_first() {
        let service = Arc::new(FakeService::new().with_transfer_time(Duration::from_secs(10)));
        let pipeline = Arc::new(UploadPipeline::new(service.clone()));
        let cancel = CancelFlag::new();
        let (progress, _) = progress_log();

        let task = {
            let pipeline = pipeline.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                pipeline
                    .run(&recording(500_000, Some(200_000)), &template(), &cancel, progress)
                    .await
            })
        };

        tokio::time::sleep(Duration::from_secs(13)).await;
        cancel.cancel();
        let err = task.await.unwrap().unwrap_err();

        assert!(matches!(
            &err,
            UploadError::Cancelled { deleted_entry_ids, .. }
                if deleted_entry_ids == &vec!["0_entry2".to_string(), "0_entry1".to_string()]
        ));
        assert_eq!(service.deleted(), vec!["0_entry2", "0_entry1"]);
        let session = pipeline.session();
        assert!(session.aborted && !session.done);
        assert!(session.bytes_loaded < 700_000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_create_waits_then_deletes() {
        let service = Arc::new(FakeService::new().with_create_time(Duration::from_secs(2)));
        let pipeline = Arc::new(UploadPipeline::new(service.clone()));
        let cancel = CancelFlag::new();
        let (progress, _) = progress_log();

        let task = {
            let pipeline = pipeline.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                pipeline
                    .run(&recording(1000, Some(1000)), &template(), &cancel, progress)
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(500)).await;
        cancel.cancel();
        let err = task.await.unwrap().unwrap_err();

        assert!(matches!(err, UploadError::Cancelled { .. }));
        assert_eq!(service.deleted(), vec!["0_entry1"]);
        assert!(!service.calls().iter().any(|c| matches!(c, ServiceCall::Upload { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_failure_still_cancelled() {
        let service = Arc::new(FakeService::new().with_transfer_time(Duration::from_secs(10)));
        service.fail_deletes();
        let pipeline = Arc::new(UploadPipeline::new(service.clone()));
        let cancel = CancelFlag::new();
        let (progress, _) = progress_log();

        let task = {
            let pipeline = pipeline.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                pipeline
                    .run(&recording(1000, None), &template(), &cancel, progress)
                    .await
            })
        };
        tokio::time::sleep(Duration::from_secs(1)).await;
        cancel.cancel();

        match task.await.unwrap().unwrap_err() {
            UploadError::Cancelled {
                deleted_entry_ids,
                cleanup_errors,
            } => {
                assert!(deleted_entry_ids.is_empty());
                assert_eq!(cleanup_errors.len(), 1);
            }
            other => panic!("expected cancellation, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_transfer_failure_cleans_up() {
        let service = Arc::new(FakeService::new());
        service.fail_transfer("connection reset");
        let pipeline = UploadPipeline::new(service.clone());
        let (progress, _) = progress_log();

        let err = pipeline
            .run(&recording(1000, None), &template(), &CancelFlag::new(), progress)
            .await
            .unwrap_err();

        assert_eq!(err, UploadError::Transfer("connection reset".into()));
        assert_eq!(service.deleted(), vec!["0_entry1"]);
        assert!(!pipeline.session().aborted);
    }
}
