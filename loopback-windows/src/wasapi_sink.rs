//! WASAPI playback sink.
//!
//! Renders frames to the default communications render endpoint in shared
//! mode, waiting for buffer space when the device falls behind.

use std::thread;
use std::time::Duration;

use windows::Win32::Media::Audio::*;

use loopback_core::models::audio_models::AudioFrame;
use loopback_core::models::config::StreamConfig;
use loopback_core::models::error::LoopbackError;
use loopback_core::models::state::PlaybackState;
use loopback_core::traits::playback_sink::PlaybackSink;

use crate::com::{self, WasapiError};

struct RenderStream {
    client: IAudioClient,
    render: IAudioRenderClient,
    block_align: usize,
    buffer_frames: u32,
    poll_interval: Duration,
    // Longest a single write waits for space before truncating.
    write_timeout: Duration,
}

impl RenderStream {
    /// Frames the device can take right now.
    fn free_frames(&self) -> Result<u32, WasapiError> {
        let padding = unsafe { self.client.GetCurrentPadding() }
            .map_err(WasapiError::com("IAudioClient::GetCurrentPadding"))?;
        Ok(self.buffer_frames.saturating_sub(padding))
    }

    fn submit(&self, bytes: &[u8]) -> Result<(), WasapiError> {
        let frames = (bytes.len() / self.block_align) as u32;
        let data = unsafe { self.render.GetBuffer(frames) }
            .map_err(WasapiError::com("IAudioRenderClient::GetBuffer"))?;
        // SAFETY: GetBuffer returned room for `frames` frames of `block_align` bytes.
        unsafe { std::ptr::copy_nonoverlapping(bytes.as_ptr(), data, bytes.len()) };
        unsafe { self.render.ReleaseBuffer(frames, 0) }
            .map_err(WasapiError::com("IAudioRenderClient::ReleaseBuffer"))
    }
}

/// WASAPI render endpoint implementing `PlaybackSink`.
pub struct WasapiPlaybackSink {
    stream: Option<RenderStream>,
    state: PlaybackState,
}

// SAFETY: The COM objects live in the multithreaded apartment. The pipeline
// serializes every call through a mutex, so one thread uses them at a time.
unsafe impl Send for WasapiPlaybackSink {}

impl WasapiPlaybackSink {
    pub fn new() -> Self {
        Self {
            stream: None,
            state: PlaybackState::Uninitialized,
        }
    }

    fn write_bytes(&self, mut bytes: &[u8]) -> Result<usize, WasapiError> {
        let stream = self.stream.as_ref().ok_or(WasapiError::NotOpen)?;
        let mut accepted = 0;
        let mut waited = Duration::ZERO;

        while bytes.len() >= stream.block_align {
            let free = stream.free_frames()? as usize * stream.block_align;
            if free == 0 {
                if waited >= stream.write_timeout {
                    log::debug!("playback buffer stayed full, dropping {} bytes", bytes.len());
                    break;
                }
                thread::sleep(stream.poll_interval);
                waited += stream.poll_interval;
                continue;
            }

            let whole = bytes.len() - bytes.len() % stream.block_align;
            let chunk = &bytes[..whole.min(free)];
            stream.submit(chunk)?;
            accepted += chunk.len();
            bytes = &bytes[chunk.len()..];
        }
        Ok(accepted)
    }
}

impl Default for WasapiPlaybackSink {
    fn default() -> Self {
        Self::new()
    }
}

impl PlaybackSink for WasapiPlaybackSink {
    fn open(&mut self, config: &StreamConfig) -> Result<(), LoopbackError> {
        if self.stream.is_some() {
            self.stop();
        }
        com::ensure_mta()?;

        let format = com::wave_format(config)?;
        let client = com::activate_default_client(eRender)?;

        let min_bytes = com::min_driver_bytes(&client, config)?;
        com::initialize_shared(&client, &format, com::hns_for_bytes(min_bytes, config)?)?;

        let buffer_frames = unsafe { client.GetBufferSize() }
            .map_err(WasapiError::com("IAudioClient::GetBufferSize"))?;
        let render: IAudioRenderClient = unsafe { client.GetService() }
            .map_err(WasapiError::com("IAudioClient::GetService(IAudioRenderClient)"))?;

        log::info!(
            "Opened render endpoint: {} Hz, {} ch, {} frame buffer",
            config.sample_rate_hz,
            config.channel_count,
            buffer_frames
        );

        self.stream = Some(RenderStream {
            client,
            render,
            block_align: format.nBlockAlign as usize,
            buffer_frames,
            poll_interval: com::poll_interval(config),
            write_timeout: config.period() * 2,
        });
        self.state = PlaybackState::Ready;
        Ok(())
    }

    fn start(&mut self) {
        if self.state != PlaybackState::Ready {
            return;
        }
        let Some(stream) = &self.stream else {
            return;
        };
        match unsafe { stream.client.Start() } {
            Ok(()) => {
                self.state = PlaybackState::Playing;
                log::debug!("render stream started");
            }
            Err(e) => log::warn!("IAudioClient::Start (render) failed: {}", e),
        }
    }

    fn write(&mut self, frame: AudioFrame) -> usize {
        if !self.state.accepts_writes() {
            return 0;
        }
        match self.write_bytes(frame.as_bytes()) {
            Ok(accepted) => accepted,
            Err(e) => {
                let err = LoopbackError::from(e);
                log::warn!("Playback write failed: {}", err);
                if err.is_fatal() {
                    self.stop();
                }
                0
            }
        }
    }

    fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            if self.state == PlaybackState::Playing {
                if let Err(e) = unsafe { stream.client.Stop() } {
                    log::warn!("IAudioClient::Stop (render) failed: {}", e);
                }
            }
            log::info!("Closed render endpoint");
            self.state = PlaybackState::Stopped;
        }
    }

    fn state(&self) -> PlaybackState {
        self.state
    }
}

impl Drop for WasapiPlaybackSink {
    fn drop(&mut self) {
        self.stop();
    }
}
