use crate::models::audio_models::AudioFrame;
use crate::models::config::StreamConfig;
use crate::models::error::LoopbackError;

/// Downstream consumer of captured frames.
///
/// Invoked synchronously on the capture thread once per forwarded frame. A slow
/// callback delays the next read, so keep the work bounded.
pub type FrameCallback = Box<dyn FnMut(AudioFrame) + Send + 'static>;

/// Interface for platform-specific capture sources.
///
/// Implemented by:
/// - `WasapiCapturer` (Windows)
///
/// `open`, `begin_streaming` and `close` run on the control thread. Once
/// streaming begins the capturer is moved to the capture thread, which calls
/// `promote_current_thread`, then `read_frame` repeatedly, then `close` once.
pub trait Capturer: Send {
    /// Acquire the capture device with a buffer of at least
    /// `max(2 * driver minimum, frame size)` bytes.
    ///
    /// Fails with `DeviceUnavailable` when no compatible device exists and
    /// `UnsupportedConfig` when the driver rejects the format.
    fn open(&mut self, config: &StreamConfig) -> Result<(), LoopbackError>;

    /// Put the opened device into the active capture state.
    ///
    /// Fails with `StartFailed` if the device does not report itself active
    /// afterwards. Not retried within a session.
    fn begin_streaming(&mut self) -> Result<(), LoopbackError>;

    /// Block until `buffer` is full of new samples or the read fails.
    ///
    /// Returns the number of bytes written. Anything short of `buffer.len()`
    /// is an anomalous read. `InvalidOperation` means the device is gone and
    /// no further reads should be attempted.
    fn read_frame(&mut self, buffer: &mut [u8]) -> Result<usize, LoopbackError>;

    /// Release the device. Safe to call repeatedly or on a never-opened capturer.
    fn close(&mut self);

    /// Request the lowest-latency scheduling class for the calling thread.
    ///
    /// Called first thing on the capture thread.
    fn promote_current_thread(&mut self) {}
}
