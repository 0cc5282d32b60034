//! # loopback-core
//!
//! Platform-agnostic core of a real-time audio loopback pipeline.
//!
//! Captures fixed-size frames of microphone audio on a dedicated thread,
//! meters their loudness and forwards an owned copy of every frame to a
//! playback sink. Platform-specific backends (Windows WASAPI) implement the
//! `Capturer` and `PlaybackSink` traits and plug into the generic `Pipeline`.
//!
//! ## Architecture
//!
//! ```text
//! loopback-core (this crate)
//! ├── traits/       ← Capturer, PlaybackSink, PipelineDelegate
//! ├── models/       ← LoopbackError, CaptureState, StreamConfig, AudioFrame, etc.
//! ├── processing/   ← FrameBuffer, RMS/peak loudness
//! └── session/      ← CaptureLoop (capture thread), Pipeline (composition root)
//! ```

pub mod models;
pub mod processing;
pub mod session;
pub mod traits;

#[cfg(test)]
mod test_support;

// Re-export key types at crate root for convenience.
pub use models::audio_models::{AudioFrame, FrameLevels, LoopDiagnostics, SessionInfo};
pub use models::config::{PipelineConfig, SampleFormat, StreamConfig};
pub use models::error::LoopbackError;
pub use models::state::{CaptureState, LoopState, PlaybackState};
pub use processing::frame_buffer::FrameBuffer;
pub use session::capture_loop::{CaptureLoop, LoopSettings};
pub use session::pipeline::Pipeline;
pub use traits::capturer::{Capturer, FrameCallback};
pub use traits::pipeline_delegate::{LoggingDelegate, PipelineDelegate};
pub use traits::playback_sink::PlaybackSink;
