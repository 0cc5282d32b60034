//! WASAPI microphone capturer.
//!
//! Opens the default communications capture endpoint in shared mode and
//! assembles fixed-size frames from the packets WASAPI hands out.

use std::thread;
use std::time::{Duration, Instant};

use windows::Win32::Media::Audio::*;

use loopback_core::models::config::StreamConfig;
use loopback_core::models::error::LoopbackError;
use loopback_core::traits::capturer::Capturer;

use crate::com::{self, ComGuard, MmcssRegistration, WasapiError};

/// Periods without a single packet before a read is given up as short.
const STALL_PERIODS: u32 = 10;

struct CaptureStream {
    client: IAudioClient,
    capture: IAudioCaptureClient,
    block_align: usize,
    poll_interval: Duration,
    stall_timeout: Duration,
    started: bool,
}

/// WASAPI capture endpoint implementing `Capturer`.
///
/// `open` and `begin_streaming` run on the control thread, `read_frame` on
/// the capture thread after `promote_current_thread`.
#[derive(Default)]
pub struct WasapiCapturer {
    stream: Option<CaptureStream>,
    // Bytes of the last packet that did not fit into the previous frame.
    pending: Vec<u8>,
    mmcss: Option<MmcssRegistration>,
    com: Option<ComGuard>,
}

// SAFETY: The COM objects live in the multithreaded apartment and are used by
// one thread at a time: the control thread until streaming begins, then the
// capture thread until `close`.
unsafe impl Send for WasapiCapturer {}

impl WasapiCapturer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    /// Copy from the carry-over into `buffer`, returning bytes copied.
    fn drain_pending(&mut self, buffer: &mut [u8]) -> usize {
        let n = self.pending.len().min(buffer.len());
        buffer[..n].copy_from_slice(&self.pending[..n]);
        self.pending.drain(..n);
        n
    }
}

impl Capturer for WasapiCapturer {
    fn open(&mut self, config: &StreamConfig) -> Result<(), LoopbackError> {
        if self.stream.is_some() {
            self.close();
        }
        com::ensure_mta()?;

        let format = com::wave_format(config)?;
        let client = com::activate_default_client(eCapture)?;

        let buffer_bytes = config.buffer_size_bytes(com::min_driver_bytes(&client, config)?)?;
        com::initialize_shared(&client, &format, com::hns_for_bytes(buffer_bytes, config)?)?;

        let capture: IAudioCaptureClient = unsafe { client.GetService() }
            .map_err(WasapiError::com("IAudioClient::GetService(IAudioCaptureClient)"))?;

        log::info!(
            "Opened capture endpoint: {} Hz, {} bit, {} ch, {} byte buffer",
            config.sample_rate_hz,
            config.bits_per_sample,
            config.channel_count,
            buffer_bytes
        );

        self.pending.clear();
        self.stream = Some(CaptureStream {
            client,
            capture,
            block_align: format.nBlockAlign as usize,
            poll_interval: com::poll_interval(config),
            stall_timeout: config.period() * STALL_PERIODS,
            started: false,
        });
        Ok(())
    }

    fn begin_streaming(&mut self) -> Result<(), LoopbackError> {
        let stream = self.stream.as_mut().ok_or(WasapiError::NotOpen)?;
        if stream.started {
            return Ok(());
        }
        unsafe { stream.client.Start() }.map_err(WasapiError::StartRejected)?;
        stream.started = true;
        log::debug!("capture stream started");
        Ok(())
    }

    fn read_frame(&mut self, buffer: &mut [u8]) -> Result<usize, LoopbackError> {
        let mut filled = self.drain_pending(buffer);
        let stream = self.stream.as_ref().ok_or(WasapiError::NotOpen)?;
        let deadline = Instant::now() + stream.stall_timeout;

        while filled < buffer.len() {
            let packet_frames = unsafe { stream.capture.GetNextPacketSize() }
                .map_err(WasapiError::com("IAudioCaptureClient::GetNextPacketSize"))?;

            if packet_frames == 0 {
                if Instant::now() >= deadline {
                    log::debug!("no capture data for {:?}", stream.stall_timeout);
                    break;
                }
                thread::sleep(stream.poll_interval);
                continue;
            }

            let mut data: *mut u8 = std::ptr::null_mut();
            let mut num_frames: u32 = 0;
            let mut flags: u32 = 0;
            unsafe { stream.capture.GetBuffer(&mut data, &mut num_frames, &mut flags, None, None) }
                .map_err(WasapiError::com("IAudioCaptureClient::GetBuffer"))?;

            let bytes = num_frames as usize * stream.block_align;
            let take = bytes.min(buffer.len() - filled);
            let silent = flags & (AUDCLNT_BUFFERFLAGS_SILENT.0 as u32) != 0;
            if flags & (AUDCLNT_BUFFERFLAGS_DATA_DISCONTINUITY.0 as u32) != 0 {
                log::debug!("capture discontinuity reported");
            }

            if silent || data.is_null() {
                buffer[filled..filled + take].fill(0);
                self.pending.resize(self.pending.len() + bytes - take, 0);
            } else {
                // SAFETY: GetBuffer returned `num_frames` frames of `block_align` bytes,
                // valid until ReleaseBuffer.
                let packet = unsafe { std::slice::from_raw_parts(data, bytes) };
                buffer[filled..filled + take].copy_from_slice(&packet[..take]);
                self.pending.extend_from_slice(&packet[take..]);
            }
            filled += take;

            unsafe { stream.capture.ReleaseBuffer(num_frames) }
                .map_err(WasapiError::com("IAudioCaptureClient::ReleaseBuffer"))?;
        }

        Ok(filled)
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            if stream.started {
                if let Err(e) = unsafe { stream.client.Stop() } {
                    log::warn!("IAudioClient::Stop failed: {}", e);
                }
            }
            log::info!("Closed capture endpoint");
        }
        self.pending.clear();
        self.mmcss = None;
        self.com = None;
    }

    fn promote_current_thread(&mut self) {
        match ComGuard::enter_mta() {
            Ok(guard) => self.com = Some(guard),
            Err(e) => log::warn!("Capture thread could not join COM: {}", e),
        }
        match MmcssRegistration::pro_audio() {
            Ok(registration) => self.mmcss = Some(registration),
            Err(e) => log::warn!("Capture thread runs without MMCSS: {}", e),
        }
    }
}

impl Drop for WasapiCapturer {
    fn drop(&mut self) {
        self.close();
    }
}
