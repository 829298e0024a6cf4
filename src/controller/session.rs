//! Session controller
//!
//! Public face of the recorder. Wires media acquisition, the capture session
//! and the upload pipeline together, validates configuration and platform
//! support, and reports everything through the event bus.

use super::shortcuts::{KeyPress, ShortcutAction, ShortcutMap};
use crate::capture::acquisition::{AcquiredStream, MediaAcquisition};
use crate::capture::constraints::CaptureConstraints;
use crate::capture::traits::{DeviceInfo, EncoderFactory, MediaDevices};
use crate::config::RecorderConfig;
use crate::events::{EventBus, EventKind, ListenerId, SessionEvent};
use crate::guard::NavigationGuard;
use crate::i18n::Translator;
use crate::recorder::coordinator::CaptureSession;
use crate::recorder::state::{PlaybackSource, RecordingResult, SessionState};
use crate::upload::http::file_extension;
use crate::upload::pipeline::UploadPipeline;
use crate::upload::service::MediaService;
use crate::upload::types::{CancelFlag, ProgressFn, UploadError, UploadSession};
use crate::utils::error::{RecorderError, RecorderResult};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Controller for one embedded recorder
pub struct SessionController {
    config: RecorderConfig,
    translator: Translator,
    acquisition: MediaAcquisition,
    encoders: Arc<dyn EncoderFactory>,
    pipeline: UploadPipeline,
    events: EventBus,
    guard: NavigationGuard,
    shortcuts: ShortcutMap,
    session: CaptureSession,
    constraints: Mutex<CaptureConstraints>,
    upload_cancel: Mutex<Option<CancelFlag>>,
    ready: AtomicBool,
}

impl SessionController {
    pub fn new(
        config: RecorderConfig,
        devices: Arc<dyn MediaDevices>,
        encoders: Arc<dyn EncoderFactory>,
        service: Arc<dyn MediaService>,
    ) -> Self {
        let events = EventBus::new();
        let guard = NavigationGuard::new();
        let session = CaptureSession::new(
            encoders.clone(),
            events.clone(),
            guard.clone(),
            config.max_recording_time(),
        );

        Self {
            translator: Translator::new(config.translations.clone()),
            constraints: Mutex::new(config.constraints()),
            acquisition: MediaAcquisition::new(devices),
            encoders,
            pipeline: UploadPipeline::new(service),
            events,
            guard,
            shortcuts: ShortcutMap::default(),
            session,
            upload_cancel: Mutex::new(None),
            ready: AtomicBool::new(false),
            config,
        }
    }

    /// Replace the default keyboard shortcuts
    pub fn with_shortcuts(mut self, shortcuts: ShortcutMap) -> Self {
        self.shortcuts = shortcuts;
        self
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Validate configuration and platform support, then acquire the preview
    /// stream. Failures put the session in the error state.
    pub async fn initialize(&self) -> RecorderResult<()> {
        self.ensure_alive()?;

        if let Err(e) = self.config.validate() {
            self.session.fail(&e);
            return Err(e);
        }

        if !self.acquisition.is_supported() || !self.encoders.is_supported() {
            let e = RecorderError::BrowserNotSupported(
                "real-time capture and media recording are required".to_string(),
            );
            self.session.fail(&e);
            return Err(e);
        }

        self.ready.store(true, Ordering::SeqCst);
        self.acquire().await?;
        tracing::info!("Recorder initialized");
        Ok(())
    }

    /// Full teardown. Idempotent.
    pub fn destroy(&self) {
        if self.session.state().is_destroyed() {
            return;
        }
        if let Some(cancel) = self.upload_cancel.lock().take() {
            cancel.cancel();
        }
        self.session.destroy();
        self.acquisition.release_all();
        self.guard.disarm();
        self.events.remove_all_listeners();
        tracing::info!("Recorder destroyed");
    }

    /// Leave the error state.
    ///
    /// Upload failures go back to reviewing the same recording. Device and
    /// recorder failures re-acquire the stream and go back to idle.
    pub async fn reset(&self) -> RecorderResult<SessionState> {
        let previous = self.session.error_kind();
        let next = self.session.reset()?;

        if next == SessionState::Idle && previous.map_or(false, |k| !k.is_upload_failure()) {
            self.pipeline.reset();
            self.acquisition.release_all();
            self.acquire().await?;
        }
        tracing::info!("Session reset to {}", next);
        Ok(next)
    }

    // =========================================================================
    // Recording
    // =========================================================================

    /// Start the countdown. From review this records again.
    pub async fn start_recording(&self) -> RecorderResult<()> {
        self.ensure_alive()?;
        if !self.ready.load(Ordering::SeqCst) {
            self.initialize().await?;
        }

        match self.session.state() {
            SessionState::Idle | SessionState::Reviewing => {}
            other => return Err(RecorderError::invalid_state("start recording", other)),
        }

        let primary = match self.acquisition.current() {
            Some(acquired) => acquired,
            None => self.acquire().await?,
        };
        let screen = if self.config.allow_screen_share {
            self.acquisition.display()
        } else {
            None
        };

        self.pipeline.reset();
        self.session.start(primary, screen)
    }

    /// Stop recording, or cancel a running countdown
    pub async fn stop_recording(&self) -> RecorderResult<Option<Arc<RecordingResult>>> {
        self.ensure_alive()?;
        self.session.stop().await
    }

    /// Drop the recording under review
    pub fn discard(&self) -> RecorderResult<()> {
        self.ensure_alive()?;
        self.pipeline.reset();
        self.session.discard()
    }

    /// Write the reviewed recording into `dir`
    pub async fn save_copy(&self, dir: &Path) -> RecorderResult<Vec<PathBuf>> {
        self.ensure_alive()?;
        let result = self
            .session
            .result()
            .ok_or_else(|| RecorderError::invalid_state("save a copy", self.session.state()))?;

        let stem = self.copy_stem(&result);
        let mut written = Vec::new();

        let path = dir.join(format!(
            "{}.{}",
            stem,
            file_extension(&result.primary_mime_type)
        ));
        tokio::fs::write(&path, &result.primary).await?;
        written.push(path);

        if let Some(screen) = result.screen_playback() {
            let path = dir.join(format!(
                "{}-screen.{}",
                stem,
                file_extension(&screen.mime_type)
            ));
            tokio::fs::write(&path, &screen.data).await?;
            written.push(path);
        }

        tracing::info!("Saved copy of recording to {:?}", written);
        Ok(written)
    }

    fn copy_stem(&self, result: &RecordingResult) -> String {
        let sanitized: String = self
            .config
            .entry_name
            .as_deref()
            .unwrap_or_default()
            .trim()
            .chars()
            .map(|c| {
                if c.is_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '-'
                }
            })
            .collect();
        let sanitized = sanitized.trim_matches('-');
        if sanitized.is_empty() {
            format!("recording-{}", result.started_at.format("%Y%m%d-%H%M%S"))
        } else {
            sanitized.to_string()
        }
    }

    pub fn playback_source(&self) -> Option<PlaybackSource> {
        self.session.result().map(|result| result.playback())
    }

    pub fn screen_playback_source(&self) -> Option<PlaybackSource> {
        self.session
            .result()
            .and_then(|result| result.screen_playback())
    }

    // =========================================================================
    // Devices
    // =========================================================================

    pub async fn devices(&self) -> RecorderResult<Vec<DeviceInfo>> {
        self.ensure_alive()?;
        self.acquisition.devices().await
    }

    /// Switch devices; the new stream replaces the current one
    pub async fn change_devices(&self, constraints: CaptureConstraints) -> RecorderResult<()> {
        self.ensure_alive()?;
        self.ensure_settled("change devices")?;
        *self.constraints.lock() = constraints;
        self.acquire().await.map(|_| ())
    }

    pub async fn start_screen_share(&self) -> RecorderResult<()> {
        self.ensure_alive()?;
        if !self.config.allow_screen_share {
            return Err(RecorderError::Configuration(
                "screen share is not enabled".to_string(),
            ));
        }
        self.ensure_settled("start screen share")?;

        match self.acquisition.acquire_display().await {
            Ok(_) => Ok(()),
            Err(e) => {
                self.session.fail(&e);
                Err(e)
            }
        }
    }

    pub fn stop_screen_share(&self) -> RecorderResult<()> {
        self.ensure_alive()?;
        self.ensure_settled("stop screen share")?;
        self.acquisition.release_display();
        Ok(())
    }

    /// Acquire with the current constraints; failures enter the error state
    async fn acquire(&self) -> RecorderResult<AcquiredStream> {
        let constraints = self.constraints.lock().clone();
        match self.acquisition.acquire(&constraints).await {
            Ok(acquired) => Ok(acquired),
            Err(e) => {
                self.session.fail(&e);
                Err(e)
            }
        }
    }

    // =========================================================================
    // Upload
    // =========================================================================

    /// Upload the reviewed recording. Returns the primary entry id.
    pub async fn upload(&self) -> RecorderResult<String> {
        self.ensure_alive()?;
        let result = self.session.begin_upload()?;

        let cancel = CancelFlag::new();
        *self.upload_cancel.lock() = Some(cancel.clone());
        tracing::info!("Upload started");
        self.events.emit(SessionEvent::MediaUploadStarted);

        let events = self.events.clone();
        let progress: ProgressFn = Arc::new(move |loaded, total| {
            events.emit(SessionEvent::MediaUploadProgress { loaded, total });
        });

        let outcome = self
            .pipeline
            .run(&result, &self.config.entry_template(), &cancel, progress)
            .await;
        self.upload_cancel.lock().take();
        self.session.finish_upload(&outcome);

        if self.session.state().is_destroyed() {
            return Err(RecorderError::Destroyed);
        }

        match outcome {
            Ok(entry_id) => {
                self.events.emit(SessionEvent::MediaUploadEnded {
                    entry_id: entry_id.clone(),
                });
                Ok(entry_id)
            }
            Err(UploadError::Cancelled {
                deleted_entry_ids,
                cleanup_errors,
            }) => {
                self.events.emit(SessionEvent::MediaUploadCancelled {
                    deleted_entry_ids: deleted_entry_ids.clone(),
                    cleanup_errors: cleanup_errors.clone(),
                });
                Err(UploadError::Cancelled {
                    deleted_entry_ids,
                    cleanup_errors,
                }
                .into())
            }
            Err(e) => {
                self.events.emit(SessionEvent::Error {
                    kind: e.kind(),
                    message: e.to_string(),
                });
                Err(e.into())
            }
        }
    }

    /// Cancel a running upload. Returns whether one was running.
    pub fn cancel_upload(&self) -> bool {
        match self.upload_cancel.lock().as_ref() {
            Some(cancel) => {
                tracing::info!("Cancelling upload");
                cancel.cancel();
                true
            }
            None => false,
        }
    }

    pub fn upload_session(&self) -> UploadSession {
        self.pipeline.session()
    }

    // =========================================================================
    // Shortcuts & Events
    // =========================================================================

    /// Run the action bound to `key`, if any
    pub async fn handle_key(&self, key: &KeyPress) -> RecorderResult<Option<ShortcutAction>> {
        if self.session.state().is_destroyed() {
            return Ok(None);
        }
        let Some(action) = self.shortcuts.resolve(key) else {
            return Ok(None);
        };

        tracing::debug!("Shortcut {:?}", action);
        match action {
            ShortcutAction::StartRecording => self.start_recording().await?,
            ShortcutAction::StopRecording => {
                self.stop_recording().await?;
            }
            ShortcutAction::Upload => {
                self.upload().await?;
            }
            ShortcutAction::CancelUpload => {
                self.cancel_upload();
            }
        }
        Ok(Some(action))
    }

    pub fn add_event_listener<F>(&self, kind: EventKind, listener: F) -> ListenerId
    where
        F: Fn(&SessionEvent) + Send + Sync + 'static,
    {
        self.events.add_event_listener(kind, listener)
    }

    pub fn add_any_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&SessionEvent) + Send + Sync + 'static,
    {
        self.events.add_any_listener(listener)
    }

    pub fn remove_event_listener(&self, id: ListenerId) -> bool {
        self.events.remove_event_listener(id)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.session.elapsed_ms()
    }

    /// Message of the current error, localized by its error code when the
    /// host translates that code
    pub fn error_message(&self) -> Option<String> {
        match self.session.state() {
            SessionState::Error { kind, message } => Some(
                self.translator
                    .lookup(kind.code())
                    .map(str::to_string)
                    .unwrap_or(message),
            ),
            _ => None,
        }
    }

    /// Message to confirm before the host page unloads
    pub fn confirm_leave(&self) -> Option<String> {
        self.guard.confirm_message(&self.translator)
    }

    pub fn translate(&self, source: &str) -> String {
        self.translator.translate(source).into_owned()
    }

    pub fn config(&self) -> &RecorderConfig {
        &self.config
    }

    fn ensure_alive(&self) -> RecorderResult<()> {
        if self.session.state().is_destroyed() {
            return Err(RecorderError::Destroyed);
        }
        Ok(())
    }

    /// Device changes are only allowed while nothing is being captured or sent
    fn ensure_settled(&self, action: &'static str) -> RecorderResult<()> {
        match self.session.state() {
            SessionState::Idle | SessionState::Reviewing => Ok(()),
            other => Err(RecorderError::invalid_state(action, other)),
        }
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.destroy();
    }
}
