//! Capture session
//!
//! Drives the countdown, the recording channels and the timers of one
//! recording, and owns the session state every other part reads.

use super::channel::{
    ChannelKind, ChannelOutput, RecordingChannel, AUDIO_MIME_TYPES, VIDEO_MIME_TYPES,
};
use super::countdown::{Countdown, COUNTDOWN_PERIOD, COUNTDOWN_START};
use super::state::{RecordingResult, SessionState};
use crate::capture::acquisition::AcquiredStream;
use crate::capture::traits::{EncoderFactory, MediaStream};
use crate::events::{EventBus, SessionEvent};
use crate::guard::NavigationGuard;
use crate::upload::types::UploadError;
use crate::utils::error::{ErrorKind, RecorderError, RecorderResult};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use uuid::Uuid;

/// Interval of `RecordingProgress` events
pub const RECORDING_TICK: Duration = Duration::from_secs(1);

/// What asked the recording to stop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StopTrigger {
    User,
    Watchdog { epoch: u64 },
}

struct SessionCore {
    state: SessionState,

    /// Bumped whenever a countdown starts or a recording ends; timers carry
    /// the epoch they were started in and give up when it moved on.
    epoch: u64,

    primary: Option<AcquiredStream>,
    screen: Option<Arc<dyn MediaStream>>,
    channels: Vec<RecordingChannel>,

    countdown: Option<Countdown>,
    watchdog: Option<JoinHandle<()>>,
    ticker: Option<JoinHandle<()>>,

    started_at: Option<(Instant, DateTime<Utc>)>,
    stopping: bool,

    result: Option<Arc<RecordingResult>>,

    /// One-shot flag guarding the current result against double submission
    upload_started: bool,
}

impl SessionCore {
    fn new() -> Self {
        Self {
            state: SessionState::Idle,
            epoch: 0,
            primary: None,
            screen: None,
            channels: Vec::new(),
            countdown: None,
            watchdog: None,
            ticker: None,
            started_at: None,
            stopping: false,
            result: None,
            upload_started: false,
        }
    }

    fn clear_timers(&mut self) {
        if let Some(countdown) = self.countdown.take() {
            countdown.cancel();
        }
        if let Some(watchdog) = self.watchdog.take() {
            watchdog.abort();
        }
        if let Some(ticker) = self.ticker.take() {
            ticker.abort();
        }
    }

    fn abort_channels(&mut self) {
        for channel in self.channels.drain(..) {
            channel.abort();
        }
    }

    fn elapsed_ms(&self) -> u64 {
        self.started_at
            .map(|(started, _)| started.elapsed().as_millis() as u64)
            .unwrap_or(0)
    }
}

struct Shared {
    core: Mutex<SessionCore>,
    encoders: Arc<dyn EncoderFactory>,
    events: EventBus,
    guard: NavigationGuard,
    max_duration: Option<Duration>,
}

impl Shared {
    /// Every state change goes through here so the guard never lags behind
    fn transition(&self, core: &mut SessionCore, state: SessionState) {
        tracing::debug!("Session {} -> {}", core.state, state);
        self.guard.follow(&state);
        core.state = state;
    }
}

/// State machine of one recorder session
#[derive(Clone)]
pub struct CaptureSession {
    shared: Arc<Shared>,
}

impl CaptureSession {
    pub fn new(
        encoders: Arc<dyn EncoderFactory>,
        events: EventBus,
        guard: NavigationGuard,
        max_duration: Option<Duration>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                core: Mutex::new(SessionCore::new()),
                encoders,
                events,
                guard,
                max_duration,
            }),
        }
    }

    fn downgrade(&self) -> Weak<Shared> {
        Arc::downgrade(&self.shared)
    }

    fn from_weak(weak: &Weak<Shared>) -> Option<Self> {
        weak.upgrade().map(|shared| Self { shared })
    }

    /// Get the current state
    pub fn state(&self) -> SessionState {
        self.shared.core.lock().state.clone()
    }

    /// The finished recording, if one is being reviewed or uploaded
    pub fn result(&self) -> Option<Arc<RecordingResult>> {
        self.shared.core.lock().result.clone()
    }

    /// Milliseconds since the encoders started
    pub fn elapsed_ms(&self) -> u64 {
        self.shared.core.lock().elapsed_ms()
    }

    pub fn has_upload_started(&self) -> bool {
        self.shared.core.lock().upload_started
    }

    /// Begin the countdown. From `Reviewing` this discards the current
    /// recording first.
    pub fn start(
        &self,
        primary: AcquiredStream,
        screen: Option<Arc<dyn MediaStream>>,
    ) -> RecorderResult<()> {
        let mut guard = self.shared.core.lock();
        let core = &mut *guard;
        match &core.state {
            SessionState::Idle | SessionState::Reviewing => {}
            other => return Err(RecorderError::invalid_state("start recording", other)),
        }

        if core.result.take().is_some() {
            tracing::info!("Discarding previous recording");
        }
        core.upload_started = false;
        core.primary = Some(primary);
        core.screen = screen;
        core.epoch += 1;
        let epoch = core.epoch;

        let tick_weak = self.downgrade();
        let done_weak = self.downgrade();
        core.countdown = Some(Countdown::start(
            COUNTDOWN_START,
            COUNTDOWN_PERIOD,
            move |remaining| {
                if let Some(session) = Self::from_weak(&tick_weak) {
                    session.on_countdown_tick(epoch, remaining);
                }
            },
            move || {
                if let Some(session) = Self::from_weak(&done_weak) {
                    session.begin_recording(epoch);
                }
            },
        ));

        self.shared.transition(
            core,
            SessionState::CountingDown {
                remaining: COUNTDOWN_START,
            },
        );
        tracing::info!("Countdown started");
        Ok(())
    }

    fn on_countdown_tick(&self, epoch: u64, remaining: u32) {
        {
            let mut core = self.shared.core.lock();
            if core.epoch != epoch || !matches!(core.state, SessionState::CountingDown { .. }) {
                return;
            }
            if remaining > 0 {
                core.state = SessionState::CountingDown { remaining };
            }
        }
        self.shared
            .events
            .emit(SessionEvent::CountdownTick { remaining });
    }

    /// Countdown completion: open the encoders and start capturing
    fn begin_recording(&self, epoch: u64) {
        let outcome = {
            let mut guard = self.shared.core.lock();
            let core = &mut *guard;
            if core.epoch != epoch || !matches!(core.state, SessionState::CountingDown { .. }) {
                return;
            }
            // Completion runs inside the countdown task; detach rather than abort it.
            core.countdown.take();

            match self.open_channels(core) {
                Ok(channels) => {
                    core.channels = channels;
                    core.started_at = Some((Instant::now(), Utc::now()));
                    core.stopping = false;
                    self.spawn_timers(core, epoch);
                    self.shared.transition(core, SessionState::Recording);
                    Ok(())
                }
                Err(e) => {
                    core.primary = None;
                    core.screen = None;
                    let state = SessionState::Error {
                        kind: e.kind(),
                        message: e.to_string(),
                    };
                    self.shared.transition(core, state);
                    Err(e)
                }
            }
        };

        match outcome {
            Ok(()) => {
                tracing::info!("Recording started");
                self.shared.events.emit(SessionEvent::RecordingStarted);
            }
            Err(e) => {
                tracing::error!("Failed to start recording: {}", e);
                self.shared.events.emit(SessionEvent::Error {
                    kind: e.kind(),
                    message: e.to_string(),
                });
            }
        }
    }

    fn open_channels(&self, core: &SessionCore) -> RecorderResult<Vec<RecordingChannel>> {
        let primary = core
            .primary
            .as_ref()
            .ok_or_else(|| RecorderError::RecorderInit("no capture stream".to_string()))?;
        let candidates = if primary.constraints.has_video() {
            VIDEO_MIME_TYPES
        } else {
            AUDIO_MIME_TYPES
        };

        let encoders = self.shared.encoders.as_ref();
        let mut channels = vec![RecordingChannel::open(
            ChannelKind::Primary,
            encoders,
            primary.stream.clone(),
            candidates,
        )?];
        if let Some(screen) = &core.screen {
            match RecordingChannel::open(
                ChannelKind::Screen,
                encoders,
                screen.clone(),
                VIDEO_MIME_TYPES,
            ) {
                Ok(channel) => channels.push(channel),
                Err(e) => {
                    for channel in channels {
                        channel.abort();
                    }
                    return Err(e);
                }
            }
        }

        if let Err(e) = channels.iter_mut().try_for_each(|channel| channel.start()) {
            for channel in channels {
                channel.abort();
            }
            return Err(e);
        }
        Ok(channels)
    }

    fn spawn_timers(&self, core: &mut SessionCore, epoch: u64) {
        if let Some(max) = self.shared.max_duration {
            let weak = self.downgrade();
            core.watchdog = Some(tokio::spawn(async move {
                tokio::time::sleep(max).await;
                if let Some(session) = Self::from_weak(&weak) {
                    tracing::info!("Maximum recording time of {:?} reached", max);
                    if let Err(e) = session.stop_with(StopTrigger::Watchdog { epoch }).await {
                        tracing::debug!("Watchdog stop skipped: {}", e);
                    }
                }
            }));
        }

        let weak = self.downgrade();
        core.ticker = Some(tokio::spawn(async move {
            let mut interval =
                tokio::time::interval_at(Instant::now() + RECORDING_TICK, RECORDING_TICK);
            loop {
                interval.tick().await;
                let Some(session) = Self::from_weak(&weak) else {
                    return;
                };
                let elapsed_ms = {
                    let core = session.shared.core.lock();
                    if core.epoch != epoch
                        || core.state != SessionState::Recording
                        || core.stopping
                    {
                        return;
                    }
                    core.elapsed_ms()
                };
                session
                    .shared
                    .events
                    .emit(SessionEvent::RecordingProgress { elapsed_ms });
            }
        }));
    }

    /// Stop recording, or cancel a running countdown.
    ///
    /// Returns the finished recording, or `None` if only a countdown was
    /// cancelled.
    pub async fn stop(&self) -> RecorderResult<Option<Arc<RecordingResult>>> {
        self.stop_with(StopTrigger::User).await
    }

    async fn stop_with(
        &self,
        trigger: StopTrigger,
    ) -> RecorderResult<Option<Arc<RecordingResult>>> {
        let pending = {
            let mut guard = self.shared.core.lock();
            let core = &mut *guard;

            if let StopTrigger::Watchdog { epoch } = trigger {
                if core.epoch != epoch {
                    return Ok(None);
                }
            }

            let recording = match &core.state {
                SessionState::CountingDown { .. } => false,
                SessionState::Recording if !core.stopping => true,
                other => return Err(RecorderError::invalid_state("stop recording", other)),
            };

            if recording {
                core.stopping = true;
                match trigger {
                    // The watchdog is the task running this stop.
                    StopTrigger::Watchdog { .. } => {
                        core.watchdog.take();
                    }
                    StopTrigger::User => {
                        if let Some(watchdog) = core.watchdog.take() {
                            watchdog.abort();
                        }
                    }
                }
                if let Some(ticker) = core.ticker.take() {
                    ticker.abort();
                }
                let started_at = core
                    .started_at
                    .map(|(_, wall)| wall)
                    .unwrap_or_else(Utc::now);
                Some((std::mem::take(&mut core.channels), started_at, core.elapsed_ms()))
            } else {
                core.clear_timers();
                core.primary = None;
                core.screen = None;
                core.epoch += 1;
                self.shared.transition(core, SessionState::Idle);
                None
            }
        };

        let Some((channels, started_at, duration)) = pending else {
            tracing::info!("Countdown cancelled");
            self.shared.events.emit(SessionEvent::RecordingCancelled);
            return Ok(None);
        };

        tracing::info!("Stopping recording after {}ms", duration);

        // Both encoders get their stop request before either is awaited.
        let outputs: Vec<ChannelOutput> =
            futures::future::join_all(channels.into_iter().map(|channel| channel.stop())).await;

        let finished = {
            let mut guard = self.shared.core.lock();
            let core = &mut *guard;
            if core.state != SessionState::Recording || !core.stopping {
                tracing::debug!("Session left recording while encoders stopped");
                return Err(RecorderError::Destroyed);
            }

            let mut primary = None;
            let mut screen = None;
            for output in outputs {
                match output.kind {
                    ChannelKind::Primary => primary = Some(output),
                    ChannelKind::Screen => screen = Some(output),
                }
            }

            let has_video = core
                .primary
                .as_ref()
                .map_or(false, |p| p.constraints.has_video());
            core.stopping = false;
            core.started_at = None;
            core.primary = None;
            core.screen = None;
            core.epoch += 1;

            match primary {
                Some(primary) => {
                    let result = Arc::new(RecordingResult {
                        id: Uuid::new_v4(),
                        primary: primary.data,
                        primary_mime_type: primary.mime_type,
                        screen_mime_type: screen.as_ref().map(|s| s.mime_type.clone()),
                        screen: screen.map(|s| s.data),
                        has_video,
                        duration_ms: duration,
                        started_at,
                    });
                    core.result = Some(result.clone());
                    core.upload_started = false;
                    self.shared.transition(core, SessionState::Reviewing);
                    Ok(result)
                }
                None => {
                    let error = RecorderError::RecorderInit(
                        "primary channel produced no output".to_string(),
                    );
                    let state = SessionState::Error {
                        kind: error.kind(),
                        message: error.to_string(),
                    };
                    self.shared.transition(core, state);
                    Err(error)
                }
            }
        };

        let result = match finished {
            Ok(result) => result,
            Err(e) => {
                self.shared.events.emit(SessionEvent::Error {
                    kind: e.kind(),
                    message: e.to_string(),
                });
                return Err(e);
            }
        };

        tracing::info!(
            "Recording {} stopped: {} bytes primary, {} bytes total, {}ms",
            result.id,
            result.primary.len(),
            result.total_bytes(),
            result.duration_ms
        );
        self.shared.events.emit(SessionEvent::RecordingEnded {
            duration_ms: result.duration_ms,
        });
        Ok(Some(result))
    }

    /// Drop the reviewed recording and return to idle
    pub fn discard(&self) -> RecorderResult<()> {
        {
            let mut guard = self.shared.core.lock();
            let core = &mut *guard;
            if core.state != SessionState::Reviewing {
                return Err(RecorderError::invalid_state("discard", &core.state));
            }
            core.result = None;
            core.upload_started = false;
            self.shared.transition(core, SessionState::Idle);
        }
        tracing::info!("Recording discarded");
        self.shared.events.emit(SessionEvent::RecordingCancelled);
        Ok(())
    }

    /// Claim the reviewed recording for upload. Only succeeds once per result.
    pub fn begin_upload(&self) -> RecorderResult<Arc<RecordingResult>> {
        let mut guard = self.shared.core.lock();
        let core = &mut *guard;
        if core.upload_started {
            return Err(RecorderError::AlreadyUploaded);
        }
        let result = match (&core.state, &core.result) {
            (SessionState::Reviewing, Some(result)) => result.clone(),
            (state, _) => return Err(RecorderError::invalid_state("upload", state)),
        };
        core.upload_started = true;
        self.shared.transition(core, SessionState::Uploading);
        Ok(result)
    }

    /// Apply the outcome of an upload started with `begin_upload`
    pub fn finish_upload(&self, outcome: &Result<String, UploadError>) {
        let mut guard = self.shared.core.lock();
        let core = &mut *guard;
        if core.state != SessionState::Uploading {
            return;
        }
        match outcome {
            Ok(_) => {
                core.result = None;
                self.shared.transition(core, SessionState::Idle);
            }
            Err(UploadError::Cancelled { .. }) => {
                core.upload_started = false;
                self.shared.transition(core, SessionState::Reviewing);
            }
            Err(e) => {
                core.upload_started = false;
                let state = SessionState::Error {
                    kind: e.kind(),
                    message: e.to_string(),
                };
                self.shared.transition(core, state);
            }
        }
    }

    /// Enter the error state and report the error
    pub fn fail(&self, error: &RecorderError) {
        {
            let mut guard = self.shared.core.lock();
            let core = &mut *guard;
            if core.state.is_destroyed() {
                return;
            }
            core.clear_timers();
            core.abort_channels();
            core.stopping = false;
            core.epoch += 1;
            let state = SessionState::Error {
                kind: error.kind(),
                message: error.to_string(),
            };
            self.shared.transition(core, state);
        }
        tracing::error!("Session error: {}", error);
        self.shared.events.emit(SessionEvent::Error {
            kind: error.kind(),
            message: error.to_string(),
        });
    }

    /// Leave the error state.
    ///
    /// Upload failures return to `Reviewing` with the recording intact;
    /// other recoverable failures return to `Idle`.
    pub fn reset(&self) -> RecorderResult<SessionState> {
        let mut guard = self.shared.core.lock();
        let core = &mut *guard;
        let kind = match &core.state {
            SessionState::Error { kind, .. } => *kind,
            SessionState::Destroyed => return Err(RecorderError::Destroyed),
            other => return Ok(other.clone()),
        };
        if kind.is_fatal() {
            return Err(RecorderError::invalid_state("reset", &core.state));
        }

        let next = if kind.is_upload_failure() && core.result.is_some() {
            SessionState::Reviewing
        } else {
            core.result = None;
            core.upload_started = false;
            SessionState::Idle
        };
        self.shared.transition(core, next.clone());
        Ok(next)
    }

    /// Kind of the current error, if the session is in the error state
    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self.shared.core.lock().state {
            SessionState::Error { kind, .. } => Some(kind),
            _ => None,
        }
    }

    /// Stop every timer and encoder. Idempotent.
    pub fn destroy(&self) {
        let mut guard = self.shared.core.lock();
        let core = &mut *guard;
        if core.state.is_destroyed() {
            return;
        }
        core.clear_timers();
        core.abort_channels();
        core.primary = None;
        core.screen = None;
        core.result = None;
        core.stopping = false;
        core.epoch += 1;
        self.shared.transition(core, SessionState::Destroyed);
        tracing::info!("Capture session destroyed");
    }
}
