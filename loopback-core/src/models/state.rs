use super::error::LoopbackError;

/// Capture-side state machine of a pipeline.
///
/// State transitions:
/// ```text
/// idle → initializing → recording → stopping → stopped
///              ↓             ↓           ↓
///            failed ←──────────────────────
/// ```
/// `stopped` and `failed` may start again, which re-enters `initializing`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureState {
    Idle,
    Initializing,
    Recording,
    Stopping,
    Stopped,
    Failed(LoopbackError),
}

impl CaptureState {
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    pub fn is_recording(&self) -> bool {
        matches!(self, Self::Recording)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    /// Whether a start request is accepted from this state.
    pub fn can_start(&self) -> bool {
        matches!(self, Self::Idle | Self::Stopped | Self::Failed(_))
    }

    pub fn failure(&self) -> Option<&LoopbackError> {
        match self {
            Self::Failed(err) => Some(err),
            _ => None,
        }
    }
}

/// Playback-side state of a sink.
///
/// `Ready` requires a successfully acquired device, `Playing` accepts writes,
/// `Stopped` has released the device and ignores writes until reopened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlaybackState {
    Uninitialized,
    Ready,
    Playing,
    Stopped,
}

impl PlaybackState {
    pub fn accepts_writes(self) -> bool {
        matches!(self, Self::Playing)
    }
}

/// Lifecycle of the capture thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoopState {
    NotStarted,
    Running,
    StopRequested,
    Terminated,
}

impl LoopState {
    /// Whether the capture thread may still be executing.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Running | Self::StopRequested)
    }
}
