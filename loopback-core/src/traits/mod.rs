pub mod capturer;
pub mod pipeline_delegate;
pub mod playback_sink;
