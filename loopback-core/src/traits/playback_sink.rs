use crate::models::audio_models::AudioFrame;
use crate::models::config::StreamConfig;
use crate::models::error::LoopbackError;
use crate::models::state::PlaybackState;

/// Interface for platform-specific playback sinks.
///
/// Implemented by:
/// - `WasapiPlaybackSink` (Windows)
///
/// The sink owns its own buffering. Writes happen on the capture thread,
/// everything else on the control thread.
pub trait PlaybackSink: Send {
    /// Acquire the playback device with at least the driver's minimum buffer.
    ///
    /// Transitions: uninitialized/stopped → ready.
    fn open(&mut self, config: &StreamConfig) -> Result<(), LoopbackError>;

    /// Begin consuming written frames. Transitions: ready → playing.
    ///
    /// Best effort: a device that refuses to start leaves the sink in `Ready`
    /// and is only visible through `state()`. No-op when already playing.
    fn start(&mut self);

    /// Stream a frame to the device, blocking while the device buffer is full.
    ///
    /// Returns the bytes accepted. Writes outside `Playing` accept nothing.
    fn write(&mut self, frame: AudioFrame) -> usize;

    /// Halt playback and release the device. Idempotent.
    fn stop(&mut self);

    fn state(&self) -> PlaybackState;
}
