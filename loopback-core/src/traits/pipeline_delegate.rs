use crate::models::audio_models::FrameLevels;
use crate::models::error::LoopbackError;
use crate::models::state::CaptureState;

/// Event delegate for pipeline notifications.
///
/// State changes are reported from the control thread; levels and loop errors
/// from the capture thread. Implementations must not block.
pub trait PipelineDelegate: Send + Sync {
    /// Called when the capture state changes.
    fn on_state_changed(&self, state: &CaptureState);

    /// Called with the levels of every forwarded frame.
    fn on_levels(&self, levels: &FrameLevels);

    /// Called when an error occurs, including degraded playback.
    fn on_error(&self, error: &LoopbackError);
}

/// Delegate that writes every notification to the `log` facade.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingDelegate;

impl PipelineDelegate for LoggingDelegate {
    fn on_state_changed(&self, state: &CaptureState) {
        log::info!("capture state: {:?}", state);
    }

    fn on_levels(&self, levels: &FrameLevels) {
        log::trace!("loudness: rms={} peak={}", levels.rms, levels.peak);
    }

    fn on_error(&self, error: &LoopbackError) {
        log::warn!("pipeline error: {}", error);
    }
}
