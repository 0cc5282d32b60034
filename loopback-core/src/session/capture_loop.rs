use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use parking_lot::Mutex;

use crate::models::audio_models::{FrameLevels, LoopDiagnostics};
use crate::models::config::{PipelineConfig, SampleFormat};
use crate::models::error::LoopbackError;
use crate::models::state::LoopState;
use crate::processing::frame_buffer::FrameBuffer;
use crate::processing::loudness;
use crate::traits::capturer::{Capturer, FrameCallback};
use crate::traits::pipeline_delegate::PipelineDelegate;

/// Fixed parameters of a capture loop, derived from a validated `PipelineConfig`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopSettings {
    /// Exact size in bytes of every forwarded frame.
    pub frame_size: usize,
    /// Meter each frame. Only meaningful for 16-bit PCM.
    pub analyze_loudness: bool,
    pub max_consecutive_anomalies: Option<u32>,
    pub thread_name: String,
}

impl LoopSettings {
    pub fn from_config(config: &PipelineConfig) -> Result<Self, LoopbackError> {
        config.validate()?;
        let format = config.stream.sample_format()?;
        Ok(Self {
            frame_size: config.stream.frame_size_bytes()?,
            analyze_loudness: config.analyze_loudness && format == SampleFormat::Pcm16,
            max_consecutive_anomalies: config.max_consecutive_anomalies,
            thread_name: config.capture_thread_name.clone(),
        })
    }

    pub fn validate(&self) -> Result<(), LoopbackError> {
        if self.frame_size == 0 {
            return Err(LoopbackError::InvalidConfiguration(
                "frame size must be positive".into(),
            ));
        }
        if self.max_consecutive_anomalies == Some(0) {
            return Err(LoopbackError::InvalidConfiguration(
                "anomaly limit must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Status visible to the control thread, written by the capture thread.
struct LoopStatus {
    state: LoopState,
    failure: Option<LoopbackError>,
    diagnostics: LoopDiagnostics,
    levels: FrameLevels,
}

impl LoopStatus {
    fn new() -> Self {
        Self {
            state: LoopState::NotStarted,
            failure: None,
            diagnostics: LoopDiagnostics::default(),
            levels: FrameLevels::default(),
        }
    }
}

struct LoopShared {
    stop_requested: AtomicBool,
    status: Mutex<LoopStatus>,
}

/// Dedicated capture thread: read a frame, meter it, copy it out, hand it on.
///
/// ```text
/// [Capturer] → read_frame → [FrameBuffer] ─┬→ loudness (delegate only)
///                                          └→ copy_out → FrameCallback
/// ```
///
/// The loop owns the capturer. While the thread runs the capturer lives on it;
/// `join` hands it back so the next session can reopen it.
pub struct CaptureLoop<C: Capturer + 'static> {
    settings: LoopSettings,
    capturer: Option<C>,
    shared: Arc<LoopShared>,
    handle: Option<thread::JoinHandle<Option<C>>>,
}

impl<C: Capturer + 'static> CaptureLoop<C> {
    pub fn new(capturer: C, settings: LoopSettings) -> Self {
        Self {
            settings,
            capturer: Some(capturer),
            shared: Arc::new(LoopShared {
                stop_requested: AtomicBool::new(false),
                status: Mutex::new(LoopStatus::new()),
            }),
            handle: None,
        }
    }

    pub fn settings(&self) -> &LoopSettings {
        &self.settings
    }

    pub fn state(&self) -> LoopState {
        self.shared.status.lock().state
    }

    /// Why the last session ended, if it ended on its own.
    pub fn failure(&self) -> Option<LoopbackError> {
        self.shared.status.lock().failure.clone()
    }

    pub fn diagnostics(&self) -> LoopDiagnostics {
        self.shared.status.lock().diagnostics.clone()
    }

    /// Levels of the most recently forwarded frame.
    pub fn levels(&self) -> FrameLevels {
        self.shared.status.lock().levels
    }

    /// Whether the capture thread exists and has not exited yet.
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// The capturer, while no thread holds it.
    pub fn capturer_mut(&mut self) -> Option<&mut C> {
        self.capturer.as_mut()
    }

    /// Spawn the capture thread. Transitions: not started/terminated → running.
    ///
    /// The capturer must already be open and streaming. No-op while a thread
    /// is still running. A thread that already exited is joined first.
    /// Invalid settings are rejected before the capturer is touched.
    pub fn start(
        &mut self,
        callback: FrameCallback,
        delegate: Option<Arc<dyn PipelineDelegate>>,
    ) -> Result<(), LoopbackError> {
        if let Some(handle) = &self.handle {
            if !handle.is_finished() {
                log::debug!("capture loop already running");
                return Ok(());
            }
            self.join()?;
        }

        self.settings.validate()?;
        let builder = thread::Builder::new().name(self.settings.thread_name.clone());
        self.spawn_with(builder, callback, delegate)
    }

    fn spawn_with(
        &mut self,
        builder: thread::Builder,
        callback: FrameCallback,
        delegate: Option<Arc<dyn PipelineDelegate>>,
    ) -> Result<(), LoopbackError> {
        let capturer = self.capturer.take().ok_or_else(|| {
            LoopbackError::Unknown("capturer was lost by a previous session".into())
        })?;

        self.shared.stop_requested.store(false, Ordering::SeqCst);
        {
            let mut status = self.shared.status.lock();
            *status = LoopStatus::new();
            status.state = LoopState::Running;
        }

        // The thread takes the capturer from here. A failed spawn leaves it behind.
        let handoff = Arc::new(Mutex::new(Some(capturer)));
        let thread_handoff = Arc::clone(&handoff);
        let shared = Arc::clone(&self.shared);
        let settings = self.settings.clone();

        let spawned = builder.spawn(move || {
            let capturer = thread_handoff.lock().take();
            capturer.map(|c| run_capture_loop(c, settings, shared, callback, delegate))
        });

        match spawned {
            Ok(handle) => {
                self.handle = Some(handle);
                Ok(())
            }
            Err(e) => {
                if let Some(mut capturer) = handoff.lock().take() {
                    capturer.close();
                    self.capturer = Some(capturer);
                }
                self.shared.status.lock().state = LoopState::Terminated;
                Err(LoopbackError::Unknown(format!(
                    "failed to spawn capture thread: {}",
                    e
                )))
            }
        }
    }

    /// Ask the thread to exit at the top of its next iteration. Never blocks on the thread.
    ///
    /// At most the read already in flight completes afterwards.
    pub fn request_stop(&self) {
        self.shared.stop_requested.store(true, Ordering::SeqCst);
        let mut status = self.shared.status.lock();
        if status.state == LoopState::Running {
            status.state = LoopState::StopRequested;
        }
    }

    /// Wait for the capture thread to exit and take the capturer back.
    ///
    /// Returns immediately when no thread was started.
    pub fn join(&mut self) -> Result<(), LoopbackError> {
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };

        match handle.join() {
            Ok(capturer) => {
                if capturer.is_some() {
                    self.capturer = capturer;
                }
                Ok(())
            }
            Err(_) => {
                let err = LoopbackError::Unknown("capture thread panicked".into());
                let mut status = self.shared.status.lock();
                status.state = LoopState::Terminated;
                status.failure = Some(err.clone());
                Err(err)
            }
        }
    }
}

impl<C: Capturer + 'static> Drop for CaptureLoop<C> {
    fn drop(&mut self) {
        self.request_stop();
        if let Err(e) = self.join() {
            log::error!("Capture loop ended abnormally: {}", e);
        }
    }
}

/// Body of the capture thread. Returns the closed capturer.
fn run_capture_loop<C: Capturer>(
    mut capturer: C,
    settings: LoopSettings,
    shared: Arc<LoopShared>,
    mut callback: FrameCallback,
    delegate: Option<Arc<dyn PipelineDelegate>>,
) -> C {
    capturer.promote_current_thread();

    let mut buffer = FrameBuffer::new(settings.frame_size);
    let mut sequence: u64 = 0;

    log::debug!("capture loop started, frame size {} bytes", buffer.len());

    let failure = loop {
        if shared.stop_requested.load(Ordering::SeqCst) {
            break None;
        }

        match capturer.read_frame(buffer.as_mut_slice()) {
            Ok(n) if buffer.is_complete(n) => {
                if shared.stop_requested.load(Ordering::SeqCst) {
                    shared.status.lock().diagnostics.reads += 1;
                    break None;
                }

                let levels = settings
                    .analyze_loudness
                    .then(|| loudness::measure(buffer.as_slice()));
                let frame = buffer.copy_out(sequence);
                sequence += 1;

                {
                    let mut status = shared.status.lock();
                    let diagnostics = &mut status.diagnostics;
                    diagnostics.reads += 1;
                    diagnostics.frames_forwarded += 1;
                    diagnostics.bytes_forwarded += frame.len() as u64;
                    diagnostics.consecutive_anomalies = 0;
                    if let Some(levels) = levels {
                        status.levels = levels;
                    }
                }

                if let (Some(levels), Some(d)) = (levels, &delegate) {
                    d.on_levels(&levels);
                }

                callback(frame);
            }
            Ok(n) => {
                let anomaly = LoopbackError::TransientReadAnomaly {
                    expected: buffer.len(),
                    actual: n,
                };
                if let Some(err) = record_anomaly(&shared, &settings, &anomaly) {
                    break Some(err);
                }
            }
            Err(err @ LoopbackError::InvalidOperation(_)) => {
                shared.status.lock().diagnostics.reads += 1;
                break Some(err);
            }
            Err(err) => {
                if let Some(err) = record_anomaly(&shared, &settings, &err) {
                    break Some(err);
                }
            }
        }
    };

    capturer.close();
    drop(buffer);

    {
        let mut status = shared.status.lock();
        status.state = LoopState::Terminated;
        status.failure = failure.clone();
    }

    match failure {
        Some(err) => {
            log::error!("Capture loop terminated after {} frames: {}", sequence, err);
            if let Some(d) = &delegate {
                d.on_error(&err);
            }
        }
        None => log::info!("Capture loop stopped after {} frames", sequence),
    }

    capturer
}

/// Count a dropped read. Returns the error to terminate with once the limit is reached.
fn record_anomaly(
    shared: &LoopShared,
    settings: &LoopSettings,
    anomaly: &LoopbackError,
) -> Option<LoopbackError> {
    let consecutive = {
        let mut status = shared.status.lock();
        let diagnostics = &mut status.diagnostics;
        diagnostics.reads += 1;
        diagnostics.anomalies += 1;
        diagnostics.consecutive_anomalies += 1;
        diagnostics.max_consecutive_anomalies = diagnostics
            .max_consecutive_anomalies
            .max(diagnostics.consecutive_anomalies);
        diagnostics.consecutive_anomalies
    };

    if consecutive == 1 {
        log::warn!("Dropping anomalous read: {}", anomaly);
    } else {
        log::debug!("Dropping anomalous read ({} in a row): {}", consecutive, anomaly);
    }

    match settings.max_consecutive_anomalies {
        Some(limit) if consecutive >= limit => Some(LoopbackError::AnomalyLimitExceeded(limit)),
        _ => None,
    }
}
