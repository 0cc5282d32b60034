//! In-memory capture and playback doubles shared by the session tests.

use std::collections::VecDeque;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use crate::models::audio_models::{AudioFrame, FrameLevels};
use crate::models::config::StreamConfig;
use crate::models::error::LoopbackError;
use crate::models::state::{CaptureState, PlaybackState};
use crate::traits::capturer::Capturer;
use crate::traits::pipeline_delegate::PipelineDelegate;
use crate::traits::playback_sink::PlaybackSink;

/// One scripted outcome of `read_frame`.
#[derive(Debug, Clone)]
pub enum ReadStep {
    /// Fill the buffer with these bytes and report their length.
    Bytes(Vec<u8>),
    /// Report a short read of this many bytes.
    Short(usize),
    Fail(LoopbackError),
}

/// Observations of a `ScriptedCapturer`, readable after it moved to the capture thread.
#[derive(Debug, Default)]
pub struct CapturerProbe {
    pub opens: usize,
    pub begins: usize,
    pub reads: usize,
    /// Every `close` call, including ones with nothing to release.
    pub close_calls: usize,
    /// Closes that actually released an open device.
    pub closes: usize,
    pub promoted: bool,
    pub is_open: bool,
}

/// Capturer that replays a script of read outcomes.
///
/// When the script runs out it either repeats `idle_frame` every `period`,
/// or fails with `InvalidOperation`.
pub struct ScriptedCapturer {
    script: VecDeque<ReadStep>,
    idle_frame: Option<Vec<u8>>,
    period: Duration,
    open_error: Option<LoopbackError>,
    begin_error: Option<LoopbackError>,
    probe: Arc<Mutex<CapturerProbe>>,
}

impl ScriptedCapturer {
    pub fn new(script: Vec<ReadStep>) -> Self {
        Self {
            script: script.into(),
            idle_frame: None,
            period: Duration::from_millis(1),
            open_error: None,
            begin_error: None,
            probe: Arc::new(Mutex::new(CapturerProbe::default())),
        }
    }

    /// Keep producing `frame` once the script is exhausted.
    pub fn repeating(mut self, frame: Vec<u8>, period: Duration) -> Self {
        self.idle_frame = Some(frame);
        self.period = period;
        self
    }

    pub fn failing_open(mut self, error: LoopbackError) -> Self {
        self.open_error = Some(error);
        self
    }

    pub fn failing_begin(mut self, error: LoopbackError) -> Self {
        self.begin_error = Some(error);
        self
    }

    pub fn probe(&self) -> Arc<Mutex<CapturerProbe>> {
        Arc::clone(&self.probe)
    }

    /// Open and begin streaming, as a pipeline would before handing it to a loop.
    pub fn opened(mut self) -> Self {
        self.open(&StreamConfig::default()).unwrap();
        self.begin_streaming().unwrap();
        self
    }
}

impl Capturer for ScriptedCapturer {
    fn open(&mut self, _config: &StreamConfig) -> Result<(), LoopbackError> {
        let mut probe = self.probe.lock();
        probe.opens += 1;
        if let Some(err) = self.open_error.clone() {
            return Err(err);
        }
        probe.is_open = true;
        Ok(())
    }

    fn begin_streaming(&mut self) -> Result<(), LoopbackError> {
        self.probe.lock().begins += 1;
        match self.begin_error.clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn read_frame(&mut self, buffer: &mut [u8]) -> Result<usize, LoopbackError> {
        self.probe.lock().reads += 1;

        let step = match self.script.pop_front() {
            Some(step) => step,
            None => match &self.idle_frame {
                Some(frame) => {
                    thread::sleep(self.period);
                    ReadStep::Bytes(frame.clone())
                }
                None => ReadStep::Fail(LoopbackError::InvalidOperation("script exhausted".into())),
            },
        };

        match step {
            ReadStep::Bytes(bytes) => {
                let n = bytes.len().min(buffer.len());
                buffer[..n].copy_from_slice(&bytes[..n]);
                Ok(n)
            }
            ReadStep::Short(n) => Ok(n.min(buffer.len())),
            ReadStep::Fail(err) => Err(err),
        }
    }

    fn close(&mut self) {
        let mut probe = self.probe.lock();
        probe.close_calls += 1;
        if probe.is_open {
            probe.closes += 1;
        }
        probe.is_open = false;
    }

    fn promote_current_thread(&mut self) {
        self.probe.lock().promoted = true;
    }
}

/// Observations of a `RecordingSink`.
#[derive(Debug, Default)]
pub struct SinkProbe {
    pub frames: Vec<AudioFrame>,
    pub opens: usize,
    pub releases: usize,
}

/// Playback sink that records every accepted frame.
pub struct RecordingSink {
    state: PlaybackState,
    open_error: Option<LoopbackError>,
    refuse_start: bool,
    probe: Arc<Mutex<SinkProbe>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self {
            state: PlaybackState::Uninitialized,
            open_error: None,
            refuse_start: false,
            probe: Arc::new(Mutex::new(SinkProbe::default())),
        }
    }

    pub fn failing_open(mut self, error: LoopbackError) -> Self {
        self.open_error = Some(error);
        self
    }

    /// Open succeeds but the device never reaches `Playing`.
    pub fn refusing_start(mut self) -> Self {
        self.refuse_start = true;
        self
    }

    pub fn probe(&self) -> Arc<Mutex<SinkProbe>> {
        Arc::clone(&self.probe)
    }
}

impl PlaybackSink for RecordingSink {
    fn open(&mut self, _config: &StreamConfig) -> Result<(), LoopbackError> {
        self.probe.lock().opens += 1;
        if let Some(err) = self.open_error.clone() {
            return Err(err);
        }
        self.state = PlaybackState::Ready;
        Ok(())
    }

    fn start(&mut self) {
        if self.state == PlaybackState::Ready && !self.refuse_start {
            self.state = PlaybackState::Playing;
        }
    }

    fn write(&mut self, frame: AudioFrame) -> usize {
        if !self.state.accepts_writes() {
            return 0;
        }
        let len = frame.len();
        self.probe.lock().frames.push(frame);
        len
    }

    fn stop(&mut self) {
        if matches!(self.state, PlaybackState::Ready | PlaybackState::Playing) {
            self.probe.lock().releases += 1;
            self.state = PlaybackState::Stopped;
        }
    }

    fn state(&self) -> PlaybackState {
        self.state
    }
}

/// Delegate that keeps every notification.
#[derive(Default)]
pub struct RecordingDelegate {
    pub states: Mutex<Vec<CaptureState>>,
    pub levels: Mutex<Vec<FrameLevels>>,
    pub errors: Mutex<Vec<LoopbackError>>,
}

impl PipelineDelegate for RecordingDelegate {
    fn on_state_changed(&self, state: &CaptureState) {
        self.states.lock().push(state.clone());
    }

    fn on_levels(&self, levels: &FrameLevels) {
        self.levels.lock().push(*levels);
    }

    fn on_error(&self, error: &LoopbackError) {
        self.errors.lock().push(error.clone());
    }
}

/// A 16-bit little-endian frame whose every sample equals `value`.
pub fn constant_frame(samples: usize, value: i16) -> Vec<u8> {
    (0..samples).flat_map(|_| value.to_le_bytes()).collect()
}

/// Poll `condition` until it holds, panicking after two seconds.
pub fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = std::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        assert!(std::time::Instant::now() < deadline, "condition not reached in time");
        thread::sleep(Duration::from_millis(1));
    }
}
