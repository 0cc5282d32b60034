//! COM plumbing shared by the WASAPI capturer and playback sink.

use std::cell::Cell;
use std::time::Duration;

use windows::core::w;
use windows::Win32::Foundation::{HANDLE, RPC_E_CHANGED_MODE};
use windows::Win32::Media::Audio::*;
use windows::Win32::System::Com::*;
use windows::Win32::System::Threading::{AvRevertMmThreadCharacteristics, AvSetMmThreadCharacteristicsW};

use loopback_core::models::config::StreamConfig;
use loopback_core::models::error::LoopbackError;

/// `WAVE_FORMAT_IEEE_FLOAT`, which lives outside the audio feature set.
const WAVE_FORMAT_IEEE_FLOAT_TAG: u16 = 3;

/// WASAPI reference time unit: 100 ns.
const HNS_PER_SECOND: i64 = 10_000_000;

/// Errors raised by the WASAPI layer before they are folded into `LoopbackError`.
#[derive(Debug, thiserror::Error)]
pub enum WasapiError {
    #[error("no default {0} endpoint: {1}")]
    NoEndpoint(&'static str, #[source] windows::core::Error),

    #[error("{call} failed: {source}")]
    Com {
        call: &'static str,
        #[source]
        source: windows::core::Error,
    },

    #[error("device refused to start: {0}")]
    StartRejected(#[source] windows::core::Error),

    #[error("device is not open")]
    NotOpen,
}

impl WasapiError {
    /// Wrap a failed COM call.
    pub fn com(call: &'static str) -> impl FnOnce(windows::core::Error) -> Self {
        move |source| Self::Com { call, source }
    }
}

impl From<WasapiError> for LoopbackError {
    fn from(err: WasapiError) -> Self {
        match &err {
            WasapiError::NoEndpoint(..) => LoopbackError::DeviceUnavailable,
            WasapiError::StartRejected(_) => LoopbackError::StartFailed(err.to_string()),
            WasapiError::NotOpen => LoopbackError::InvalidOperation(err.to_string()),
            WasapiError::Com { source, .. } => {
                let code = source.code();
                if code == AUDCLNT_E_DEVICE_INVALIDATED
                    || code == AUDCLNT_E_SERVICE_NOT_RUNNING
                    || code == AUDCLNT_E_NOT_INITIALIZED
                {
                    LoopbackError::InvalidOperation(err.to_string())
                } else if code == AUDCLNT_E_UNSUPPORTED_FORMAT {
                    LoopbackError::UnsupportedConfig(err.to_string())
                } else if code == AUDCLNT_E_DEVICE_IN_USE {
                    LoopbackError::DeviceUnavailable
                } else {
                    LoopbackError::Unknown(err.to_string())
                }
            }
        }
    }
}

thread_local! {
    static COM_READY: Cell<bool> = const { Cell::new(false) };
}

/// Make COM usable on the calling control thread, once per thread.
///
/// Never balanced: the control thread keeps COM for its lifetime. A thread
/// that already entered a single-threaded apartment keeps it.
pub fn ensure_mta() -> Result<(), WasapiError> {
    if COM_READY.with(Cell::get) {
        return Ok(());
    }
    let hr = unsafe { CoInitializeEx(None, COINIT_MULTITHREADED) };
    if hr == RPC_E_CHANGED_MODE {
        log::debug!("control thread is already in a single-threaded apartment");
    } else {
        hr.ok().map_err(WasapiError::com("CoInitializeEx"))?;
    }
    COM_READY.with(|ready| ready.set(true));
    Ok(())
}

/// RAII guard to call CoUninitialize when dropped.
///
/// Must be dropped on the thread that created it.
pub struct ComGuard(());

impl ComGuard {
    pub fn enter_mta() -> Result<Self, WasapiError> {
        unsafe { CoInitializeEx(None, COINIT_MULTITHREADED) }
            .ok()
            .map_err(WasapiError::com("CoInitializeEx"))?;
        Ok(Self(()))
    }
}

impl Drop for ComGuard {
    fn drop(&mut self) {
        unsafe {
            CoUninitialize();
        }
    }
}

/// MMCSS "Pro Audio" registration of the current thread, reverted on drop.
pub struct MmcssRegistration {
    handle: HANDLE,
}

impl MmcssRegistration {
    pub fn pro_audio() -> Result<Self, WasapiError> {
        let mut task_index: u32 = 0;
        let handle = unsafe { AvSetMmThreadCharacteristicsW(w!("Pro Audio"), &mut task_index) }
            .map_err(WasapiError::com("AvSetMmThreadCharacteristicsW"))?;
        log::debug!("registered thread with MMCSS task {}", task_index);
        Ok(Self { handle })
    }
}

impl Drop for MmcssRegistration {
    fn drop(&mut self) {
        if let Err(e) = unsafe { AvRevertMmThreadCharacteristics(self.handle) } {
            log::warn!("AvRevertMmThreadCharacteristics failed: {}", e);
        }
    }
}

/// Activate an audio client on the default communications endpoint for `flow`.
pub fn activate_default_client(flow: EDataFlow) -> Result<IAudioClient, WasapiError> {
    let direction = if flow == eCapture { "capture" } else { "render" };
    unsafe {
        let enumerator: IMMDeviceEnumerator =
            CoCreateInstance(&MMDeviceEnumerator, None, CLSCTX_ALL)
                .map_err(WasapiError::com("CoCreateInstance(MMDeviceEnumerator)"))?;

        let device = enumerator
            .GetDefaultAudioEndpoint(flow, eCommunications)
            .map_err(|e| WasapiError::NoEndpoint(direction, e))?;

        device
            .Activate(CLSCTX_ALL, None)
            .map_err(WasapiError::com("IMMDevice::Activate"))
    }
}

/// Wave format describing `config`, 32 bits meaning IEEE float.
pub fn wave_format(config: &StreamConfig) -> Result<WAVEFORMATEX, LoopbackError> {
    let format = config.sample_format()?;
    let block_align = config.bytes_per_frame()? as u16;
    Ok(WAVEFORMATEX {
        wFormatTag: if format.is_float() {
            WAVE_FORMAT_IEEE_FLOAT_TAG
        } else {
            WAVE_FORMAT_PCM as u16
        },
        nChannels: config.channel_count,
        nSamplesPerSec: config.sample_rate_hz,
        nAvgBytesPerSec: config.bytes_per_second()? as u32,
        nBlockAlign: block_align,
        wBitsPerSample: format.bits_per_sample(),
        cbSize: 0,
    })
}

/// Smallest buffer the driver will run with, in bytes of `config`'s format.
pub fn min_driver_bytes(client: &IAudioClient, config: &StreamConfig) -> Result<usize, LoopbackError> {
    let mut min_period: i64 = 0;
    unsafe { client.GetDevicePeriod(None, Some(&mut min_period as *mut i64)) }
        .map_err(WasapiError::com("IAudioClient::GetDevicePeriod"))?;
    let bytes_per_second = config.bytes_per_second()? as i64;
    Ok((min_period * bytes_per_second / HNS_PER_SECOND) as usize)
}

/// Duration of `bytes` of `config`'s format in 100 ns units.
pub fn hns_for_bytes(bytes: usize, config: &StreamConfig) -> Result<i64, LoopbackError> {
    let bytes_per_second = config.bytes_per_second()? as i64;
    Ok(bytes as i64 * HNS_PER_SECOND / bytes_per_second)
}

/// Shared-mode initialization with driver-side format conversion.
pub fn initialize_shared(
    client: &IAudioClient,
    format: &WAVEFORMATEX,
    buffer_hns: i64,
) -> Result<(), WasapiError> {
    unsafe {
        client.Initialize(
            AUDCLNT_SHAREMODE_SHARED,
            AUDCLNT_STREAMFLAGS_NOPERSIST
                | AUDCLNT_STREAMFLAGS_AUTOCONVERTPCM
                | AUDCLNT_STREAMFLAGS_SRC_DEFAULT_QUALITY,
            buffer_hns,
            0,
            format,
            None,
        )
    }
    .map_err(WasapiError::com("IAudioClient::Initialize"))
}

/// Interval between buffer polls: a quarter period, at least 1 ms.
pub fn poll_interval(config: &StreamConfig) -> Duration {
    (config.period() / 4).max(Duration::from_millis(1))
}
