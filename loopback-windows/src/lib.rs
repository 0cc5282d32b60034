//! # loopback-windows
//!
//! Windows WASAPI backend for the audio loopback pipeline.
//!
//! Provides:
//! - `WasapiCapturer`: microphone capture from the default communications endpoint
//! - `WasapiPlaybackSink`: playback to the default communications render endpoint
//!
//! Both run in shared mode with driver-side format conversion. The capture
//! thread joins the COM MTA and registers with MMCSS ("Pro Audio").
//!
//! ## Platform Requirements
//! - Windows 10 or later
//! - Visual Studio Build Tools 2022 + Windows SDK for linking
//!
//! ## Usage
//! ```ignore
//! use loopback_core::{Pipeline, PipelineConfig};
//! use loopback_windows::{WasapiCapturer, WasapiPlaybackSink};
//!
//! let mut pipeline = Pipeline::new(
//!     WasapiCapturer::new(),
//!     WasapiPlaybackSink::new(),
//!     PipelineConfig::default(),
//! )?;
//! pipeline.start()?;
//! ```

#[cfg(target_os = "windows")]
mod com;
#[cfg(target_os = "windows")]
pub mod wasapi_capturer;
#[cfg(target_os = "windows")]
pub mod wasapi_sink;

#[cfg(target_os = "windows")]
pub use wasapi_capturer::WasapiCapturer;
#[cfg(target_os = "windows")]
pub use wasapi_sink::WasapiPlaybackSink;
