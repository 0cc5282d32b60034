use std::sync::Arc;

use parking_lot::Mutex;

use crate::models::audio_models::{FrameLevels, LoopDiagnostics, SessionInfo};
use crate::models::config::PipelineConfig;
use crate::models::error::LoopbackError;
use crate::models::state::{CaptureState, LoopState, PlaybackState};
use crate::session::capture_loop::{CaptureLoop, LoopSettings};
use crate::traits::capturer::{Capturer, FrameCallback};
use crate::traits::pipeline_delegate::PipelineDelegate;
use crate::traits::playback_sink::PlaybackSink;

/// Loopback session orchestrator.
///
/// Generic over the capture and playback backends via the `Capturer` and
/// `PlaybackSink` traits. Owns both for its whole lifetime.
///
/// ```text
/// [Capturer] → [CaptureLoop] → FrameCallback → [PlaybackSink]
///                    └→ levels → [PipelineDelegate]
/// ```
///
/// All methods run on the control thread. The only state shared with the
/// capture thread is the sink (behind a mutex) and the loop's own status.
pub struct Pipeline<C: Capturer + 'static, P: PlaybackSink + 'static> {
    config: PipelineConfig,
    capture_loop: CaptureLoop<C>,
    sink: Arc<Mutex<P>>,
    state: CaptureState,
    delegate: Option<Arc<dyn PipelineDelegate>>,
    session: Option<SessionInfo>,
}

impl<C: Capturer + 'static, P: PlaybackSink + 'static> Pipeline<C, P> {
    /// Build an idle pipeline. Invalid configurations are rejected here,
    /// before any device is touched.
    pub fn new(capturer: C, sink: P, config: PipelineConfig) -> Result<Self, LoopbackError> {
        let settings = LoopSettings::from_config(&config)?;
        Ok(Self {
            config,
            capture_loop: CaptureLoop::new(capturer, settings),
            sink: Arc::new(Mutex::new(sink)),
            state: CaptureState::Idle,
            delegate: None,
            session: None,
        })
    }

    pub fn set_delegate(&mut self, delegate: Arc<dyn PipelineDelegate>) {
        self.delegate = Some(delegate);
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// The current session, from a successful start until the next one.
    pub fn session(&self) -> Option<&SessionInfo> {
        self.session.as_ref()
    }

    /// Current capture state.
    ///
    /// A recording or stopping pipeline whose capture thread already exited
    /// reports the outcome of that thread before `join` is called.
    pub fn state(&self) -> CaptureState {
        if self.has_live_session() && self.capture_loop.state() == LoopState::Terminated {
            return match self.capture_loop.failure() {
                Some(err) => CaptureState::Failed(err),
                None => CaptureState::Stopped,
            };
        }
        self.state.clone()
    }

    pub fn playback_state(&self) -> PlaybackState {
        self.sink.lock().state()
    }

    pub fn loop_state(&self) -> LoopState {
        self.capture_loop.state()
    }

    pub fn current_levels(&self) -> FrameLevels {
        self.capture_loop.levels()
    }

    pub fn diagnostics(&self) -> LoopDiagnostics {
        self.capture_loop.diagnostics()
    }

    /// Start a session. Transitions: idle/stopped/failed → initializing → recording.
    ///
    /// Playback is brought up first and may degrade without failing the start.
    /// Capture acquisition failures release everything and are returned.
    pub fn start(&mut self) -> Result<(), LoopbackError> {
        let current = self.state();
        if current.is_recording() {
            return Ok(());
        }
        if !current.can_start() {
            return Err(LoopbackError::InvalidOperation(format!(
                "cannot start from {:?}",
                current
            )));
        }

        // Settle a session that already ended before reopening the devices.
        if self.has_live_session() {
            self.join()?;
        }

        self.set_state(CaptureState::Initializing);
        self.start_playback();

        if let Err(err) = self.acquire_capturer() {
            log::error!("Failed to start capture: {}", err);
            self.sink.lock().stop();
            self.fail(err.clone());
            return Err(err);
        }

        let sink = Arc::clone(&self.sink);
        let callback: FrameCallback = Box::new(move |frame| {
            let expected = frame.len();
            let accepted = sink.lock().write(frame);
            if accepted < expected {
                log::trace!("playback accepted {} of {} bytes", accepted, expected);
            }
        });

        if let Err(err) = self.capture_loop.start(callback, self.delegate.clone()) {
            log::error!("Failed to spawn capture loop: {}", err);
            self.sink.lock().stop();
            self.fail(err.clone());
            return Err(err);
        }

        let session = SessionInfo::new();
        log::info!(
            "Loopback session {} started: {} Hz, {} bit, {} ch, {} ms frames",
            session.id,
            self.config.stream.sample_rate_hz,
            self.config.stream.bits_per_sample,
            self.config.stream.channel_count,
            self.config.stream.period_ms
        );
        self.session = Some(session);
        self.set_state(CaptureState::Recording);
        Ok(())
    }

    /// Ask the capture thread to stop without waiting for it.
    ///
    /// Transitions: recording → stopping. No-op otherwise.
    pub fn request_stop(&mut self) {
        if !self.state.is_recording() {
            return;
        }
        self.capture_loop.request_stop();
        self.set_state(CaptureState::Stopping);
    }

    /// Wait for the capture thread to exit, then release playback.
    ///
    /// Transitions: recording/stopping → stopped, or failed when the loop
    /// ended on an error.
    pub fn join(&mut self) -> Result<(), LoopbackError> {
        let joined = self.capture_loop.join();
        self.sink.lock().stop();

        if self.has_live_session() {
            match self.capture_loop.failure() {
                Some(err) => self.set_state(CaptureState::Failed(err)),
                None => self.set_state(CaptureState::Stopped),
            }

            let diagnostics = self.capture_loop.diagnostics();
            log::info!(
                "Loopback session {} ended: {} frames forwarded, {} anomalous reads",
                self.session.as_ref().map_or("-", |s| s.id.as_str()),
                diagnostics.frames_forwarded,
                diagnostics.anomalies
            );
        }
        joined
    }

    /// Stop and wait. Safe to call in any state, any number of times.
    pub fn stop(&mut self) -> Result<(), LoopbackError> {
        self.request_stop();
        self.join()
    }

    fn start_playback(&self) {
        let mut sink = self.sink.lock();
        if let Err(err) = sink.open(&self.config.stream) {
            log::warn!("Playback unavailable, capturing without it: {}", err);
            drop(sink);
            self.notify_error(&err);
            return;
        }

        sink.start();
        let state = sink.state();
        drop(sink);

        if !state.accepts_writes() {
            let err = LoopbackError::StartFailed(format!("playback stayed {:?}", state));
            log::warn!("Playback did not start, capturing without it: {}", err);
            self.notify_error(&err);
        }
    }

    /// Open the capturer and begin streaming, closing it again on failure.
    fn acquire_capturer(&mut self) -> Result<(), LoopbackError> {
        let stream = self.config.stream;
        let capturer = self.capture_loop.capturer_mut().ok_or_else(|| {
            LoopbackError::Unknown("capturer is held by a running capture thread".into())
        })?;

        let result = capturer
            .open(&stream)
            .and_then(|()| capturer.begin_streaming());
        if result.is_err() {
            capturer.close();
        }
        result
    }

    fn has_live_session(&self) -> bool {
        matches!(self.state, CaptureState::Recording | CaptureState::Stopping)
    }

    fn fail(&mut self, err: LoopbackError) {
        self.notify_error(&err);
        self.set_state(CaptureState::Failed(err));
    }

    fn set_state(&mut self, new_state: CaptureState) {
        self.state = new_state.clone();
        if let Some(ref delegate) = self.delegate {
            delegate.on_state_changed(&new_state);
        }
    }

    fn notify_error(&self, err: &LoopbackError) {
        if let Some(ref delegate) = self.delegate {
            delegate.on_error(err);
        }
    }
}

impl<C: Capturer + 'static, P: PlaybackSink + 'static> Drop for Pipeline<C, P> {
    fn drop(&mut self) {
        if self.has_live_session() {
            if let Err(e) = self.stop() {
                log::error!("Failed to stop pipeline on drop: {}", e);
            }
        }
    }
}
