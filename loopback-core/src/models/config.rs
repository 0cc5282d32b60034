use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::error::LoopbackError;

/// Encoding of a single PCM sample, derived from the configured bit depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleFormat {
    Pcm8,
    Pcm16,
    Float32,
}

impl SampleFormat {
    /// Map a bit depth onto a sample format. 32 bits means IEEE float.
    pub fn from_bits_per_sample(bits: u16) -> Result<Self, LoopbackError> {
        match bits {
            8 => Ok(Self::Pcm8),
            16 => Ok(Self::Pcm16),
            32 => Ok(Self::Float32),
            other => Err(LoopbackError::InvalidConfiguration(format!(
                "unsupported bit depth: {}",
                other
            ))),
        }
    }

    pub fn bytes_per_sample(self) -> usize {
        match self {
            Self::Pcm8 => 1,
            Self::Pcm16 => 2,
            Self::Float32 => 4,
        }
    }

    pub fn bits_per_sample(self) -> u16 {
        self.bytes_per_sample() as u16 * 8
    }

    pub fn is_float(self) -> bool {
        matches!(self, Self::Float32)
    }
}

/// Shape of the audio stream shared by the capture and playback sides.
///
/// Fixed for the lifetime of a session; changing it requires a full stop/start cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Sample rate in Hz (default: 44100).
    pub sample_rate_hz: u32,

    /// Bit depth (default: 16). Valid values: 8, 16, 32 (float).
    pub bits_per_sample: u16,

    /// Number of interleaved channels (default: 1). Valid values: 1, 2.
    pub channel_count: u16,

    /// Duration of one frame in milliseconds (default: 10).
    pub period_ms: u32,
}

impl StreamConfig {
    pub fn validate(&self) -> Result<(), LoopbackError> {
        self.sample_format()?;
        if ![1, 2].contains(&self.channel_count) {
            return Err(LoopbackError::InvalidConfiguration(format!(
                "unsupported channel count: {}",
                self.channel_count
            )));
        }
        self.frames_per_period()?;
        Ok(())
    }

    pub fn sample_format(&self) -> Result<SampleFormat, LoopbackError> {
        SampleFormat::from_bits_per_sample(self.bits_per_sample)
    }

    pub fn bytes_per_sample(&self) -> Result<usize, LoopbackError> {
        Ok(self.sample_format()?.bytes_per_sample())
    }

    /// Bytes occupied by one sample across all channels.
    pub fn bytes_per_frame(&self) -> Result<usize, LoopbackError> {
        Ok(self.bytes_per_sample()? * self.channel_count as usize)
    }

    /// Samples per channel in one period: `sample_rate_hz * period_ms / 1000`.
    ///
    /// Must come out as a positive integer.
    pub fn frames_per_period(&self) -> Result<usize, LoopbackError> {
        if self.sample_rate_hz == 0 {
            return Err(LoopbackError::InvalidConfiguration(
                "sample rate must be positive".into(),
            ));
        }
        if self.period_ms == 0 {
            return Err(LoopbackError::InvalidConfiguration(
                "period must be positive".into(),
            ));
        }

        let product = self.sample_rate_hz as u64 * self.period_ms as u64;
        if product % 1000 != 0 {
            return Err(LoopbackError::InvalidConfiguration(format!(
                "{} Hz over {} ms is not a whole number of frames",
                self.sample_rate_hz, self.period_ms
            )));
        }
        Ok((product / 1000) as usize)
    }

    /// Size in bytes of one captured frame.
    pub fn frame_size_bytes(&self) -> Result<usize, LoopbackError> {
        Ok(self.frames_per_period()? * self.bytes_per_frame()?)
    }

    pub fn bytes_per_second(&self) -> Result<usize, LoopbackError> {
        Ok(self.sample_rate_hz as usize * self.bytes_per_frame()?)
    }

    pub fn period(&self) -> Duration {
        Duration::from_millis(self.period_ms as u64)
    }

    /// Capture buffer size for a driver that reports `min_driver_bytes` as its minimum.
    ///
    /// Twice the driver minimum, but never smaller than one frame.
    pub fn buffer_size_bytes(&self, min_driver_bytes: usize) -> Result<usize, LoopbackError> {
        Ok((2 * min_driver_bytes).max(self.frame_size_bytes()?))
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            sample_rate_hz: 44100,
            bits_per_sample: 16,
            channel_count: 1,
            period_ms: 10,
        }
    }
}

/// Configuration for a loopback pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub stream: StreamConfig,

    /// Number of consecutive anomalous reads after which the capture loop
    /// gives up (default: 50). `None` tolerates them indefinitely.
    pub max_consecutive_anomalies: Option<u32>,

    /// Compute per-frame loudness for metering (default: true).
    pub analyze_loudness: bool,

    /// Name given to the capture thread (default: "audio-capture").
    pub capture_thread_name: String,
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), LoopbackError> {
        self.stream.validate()?;
        if self.max_consecutive_anomalies == Some(0) {
            return Err(LoopbackError::InvalidConfiguration(
                "anomaly limit must be at least 1".into(),
            ));
        }
        if self.capture_thread_name.trim().is_empty() {
            return Err(LoopbackError::InvalidConfiguration(
                "capture thread name must not be empty".into(),
            ));
        }
        Ok(())
    }

    /// Parse and validate a JSON configuration. Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self, LoopbackError> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| LoopbackError::InvalidConfiguration(format!("failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and validate a JSON configuration file.
    pub fn load(path: &Path) -> Result<Self, LoopbackError> {
        let json = fs::read_to_string(path).map_err(|e| {
            LoopbackError::InvalidConfiguration(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&json)
    }

    pub fn to_json_string(&self) -> Result<String, LoopbackError> {
        serde_json::to_string_pretty(self)
            .map_err(|e| LoopbackError::InvalidConfiguration(format!("failed to serialize config: {}", e)))
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            stream: StreamConfig::default(),
            max_consecutive_anomalies: Some(50),
            analyze_loudness: true,
            capture_thread_name: "audio-capture".into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_ten_ms_mono_pcm16() {
        let config = StreamConfig::default();
        config.validate().unwrap();

        assert_eq!(config.sample_format().unwrap(), SampleFormat::Pcm16);
        assert_eq!(config.frames_per_period().unwrap(), 441);
        assert_eq!(config.frame_size_bytes().unwrap(), 882);
        assert_eq!(config.bytes_per_second().unwrap(), 88200);
        assert_eq!(config.period(), Duration::from_millis(10));
    }

    #[test]
    fn bytes_per_sample_follows_bit_depth() {
        for (bits, bytes) in [(8u16, 1usize), (16, 2), (32, 4)] {
            let config = StreamConfig {
                bits_per_sample: bits,
                ..Default::default()
            };
            assert_eq!(config.bytes_per_sample().unwrap(), bytes);
        }
    }

    #[test]
    fn stereo_float_frame_size() {
        let config = StreamConfig {
            sample_rate_hz: 48000,
            bits_per_sample: 32,
            channel_count: 2,
            period_ms: 20,
        };
        assert_eq!(config.frames_per_period().unwrap(), 960);
        assert_eq!(config.frame_size_bytes().unwrap(), 960 * 8);
        assert!(config.sample_format().unwrap().is_float());
    }

    #[test]
    fn rejects_unsupported_bit_depth() {
        let config = StreamConfig {
            bits_per_sample: 24,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(LoopbackError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn rejects_fractional_frames_per_period() {
        // 44100 Hz * 1 ms = 44.1 frames
        let config = StreamConfig {
            period_ms: 1,
            ..Default::default()
        };
        assert!(config.frames_per_period().is_err());
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_zero_rate_period_and_channels() {
        let zero_rate = StreamConfig {
            sample_rate_hz: 0,
            ..Default::default()
        };
        let zero_period = StreamConfig {
            period_ms: 0,
            ..Default::default()
        };
        let zero_channels = StreamConfig {
            channel_count: 0,
            ..Default::default()
        };
        let many_channels = StreamConfig {
            channel_count: 6,
            ..Default::default()
        };

        for config in [zero_rate, zero_period, zero_channels, many_channels] {
            assert!(config.validate().is_err(), "{:?} should be rejected", config);
        }
    }

    #[test]
    fn buffer_size_is_twice_driver_minimum_or_one_frame() {
        let config = StreamConfig::default();
        assert_eq!(config.buffer_size_bytes(3840).unwrap(), 7680);
        assert_eq!(config.buffer_size_bytes(100).unwrap(), 882);
    }

    #[test]
    fn pipeline_config_from_partial_json() {
        let json = r#"{ "stream": { "sample_rate_hz": 16000, "period_ms": 20 }, "max_consecutive_anomalies": null }"#;
        let config = PipelineConfig::from_json_str(json).unwrap();

        assert_eq!(config.stream.sample_rate_hz, 16000);
        assert_eq!(config.stream.bits_per_sample, 16);
        assert_eq!(config.stream.frames_per_period().unwrap(), 320);
        assert_eq!(config.max_consecutive_anomalies, None);
        assert!(config.analyze_loudness);
        assert_eq!(config.capture_thread_name, "audio-capture");
    }

    #[test]
    fn pipeline_config_json_rejects_invalid_stream() {
        let json = r#"{ "stream": { "bits_per_sample": 12 } }"#;
        assert!(matches!(
            PipelineConfig::from_json_str(json),
            Err(LoopbackError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn pipeline_config_rejects_zero_anomaly_limit() {
        let config = PipelineConfig {
            max_consecutive_anomalies: Some(0),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn pipeline_config_survives_json_round_trip() {
        let config = PipelineConfig {
            max_consecutive_anomalies: Some(7),
            capture_thread_name: "mic".into(),
            ..Default::default()
        };
        let json = config.to_json_string().unwrap();
        assert_eq!(PipelineConfig::from_json_str(&json).unwrap(), config);
    }

    #[test]
    fn load_reads_file() {
        let path = std::env::temp_dir().join("loopback_config_test.json");
        fs::write(&path, r#"{ "analyze_loudness": false }"#).unwrap();

        let config = PipelineConfig::load(&path).unwrap();
        assert!(!config.analyze_loudness);

        fs::remove_file(&path).ok();
    }

    #[test]
    fn load_missing_file_is_configuration_error() {
        let path = std::env::temp_dir().join("loopback_config_does_not_exist.json");
        assert!(matches!(
            PipelineConfig::load(&path),
            Err(LoopbackError::InvalidConfiguration(_))
        ));
    }
}
