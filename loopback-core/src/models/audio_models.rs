use serde::Serialize;

/// One captured period of interleaved PCM audio.
///
/// Always exactly the configured frame size. Each frame owns its bytes, so a
/// consumer may keep or mutate it without touching the capture buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    data: Vec<u8>,
    sequence: u64,
}

impl AudioFrame {
    pub fn new(data: Vec<u8>, sequence: u64) -> Self {
        Self { data, sequence }
    }

    /// Position of this frame in its capture session, starting at 0.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }
}

impl AsRef<[u8]> for AudioFrame {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}

/// Loudness of one frame of signed 16-bit audio, in raw sample units (0–32768).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct FrameLevels {
    /// Rounded root-mean-square amplitude.
    pub rms: u32,
    /// Largest absolute sample value.
    pub peak: u32,
}

impl FrameLevels {
    /// RMS level relative to full scale, in dB. Silence maps to negative infinity.
    pub fn rms_dbfs(&self) -> f32 {
        to_dbfs(self.rms)
    }

    pub fn peak_dbfs(&self) -> f32 {
        to_dbfs(self.peak)
    }
}

fn to_dbfs(level: u32) -> f32 {
    if level == 0 {
        return f32::NEG_INFINITY;
    }
    20.0 * (level as f32 / 32768.0).log10()
}

/// Counters kept by the capture loop for the current session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LoopDiagnostics {
    /// `read_frame` calls that returned (successfully or not).
    pub reads: u64,
    pub frames_forwarded: u64,
    pub bytes_forwarded: u64,
    /// Reads that were dropped because they did not fill a frame.
    pub anomalies: u64,
    pub consecutive_anomalies: u32,
    /// Longest run of consecutive anomalies seen so far.
    pub max_consecutive_anomalies: u32,
}

/// Identity of one started pipeline session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionInfo {
    pub id: String,
    pub started_at: String,
}

impl SessionInfo {
    pub fn new() -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            started_at: chrono::Utc::now().to_rfc3339(),
        }
    }
}

impl Default for SessionInfo {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn frame_hands_out_its_bytes() {
        let frame = AudioFrame::new(vec![1, 2, 3, 4], 7);
        assert_eq!(frame.sequence(), 7);
        assert_eq!(frame.len(), 4);
        assert_eq!(frame.as_bytes(), &[1, 2, 3, 4]);

        let mut bytes = frame.clone().into_bytes();
        bytes[0] = 9;
        assert_eq!(frame.as_bytes()[0], 1);
    }

    #[test]
    fn dbfs_of_full_scale_and_silence() {
        let levels = FrameLevels { rms: 32768, peak: 16384 };
        assert_relative_eq!(levels.rms_dbfs(), 0.0, epsilon = 1e-4);
        assert_relative_eq!(levels.peak_dbfs(), -6.0206, epsilon = 1e-3);
        assert_eq!(FrameLevels::default().rms_dbfs(), f32::NEG_INFINITY);
    }

    #[test]
    fn sessions_get_distinct_ids() {
        let a = SessionInfo::new();
        let b = SessionInfo::new();
        assert_ne!(a.id, b.id);
        assert!(chrono::DateTime::parse_from_rfc3339(&a.started_at).is_ok());
    }
}
