use thiserror::Error;

/// Errors that can occur while acquiring, running or tearing down the loopback pipeline.
///
/// Acquisition failures (`DeviceUnavailable`, `UnsupportedConfig`, `StartFailed`)
/// abort a start sequence before the capture thread exists. `InvalidOperation`
/// and `AnomalyLimitExceeded` end a running session. `TransientReadAnomaly` never
/// leaves the capture loop.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LoopbackError {
    #[error("device not available")]
    DeviceUnavailable,

    #[error("unsupported configuration: {0}")]
    UnsupportedConfig(String),

    #[error("start failed: {0}")]
    StartFailed(String),

    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    #[error("transient read anomaly: expected {expected} bytes, got {actual}")]
    TransientReadAnomaly { expected: usize, actual: usize },

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("gave up after {0} consecutive anomalous reads")]
    AnomalyLimitExceeded(u32),

    #[error("unknown error: {0}")]
    Unknown(String),
}

impl LoopbackError {
    /// Whether this error ends the current capture session.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::InvalidOperation(_) | Self::AnomalyLimitExceeded(_))
    }

    /// Whether this error belongs to the acquisition phase of a start sequence.
    pub fn is_acquisition_failure(&self) -> bool {
        matches!(
            self,
            Self::DeviceUnavailable | Self::UnsupportedConfig(_) | Self::StartFailed(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_classification() {
        assert!(LoopbackError::InvalidOperation("torn down".into()).is_fatal());
        assert!(LoopbackError::AnomalyLimitExceeded(3).is_fatal());
        assert!(!LoopbackError::TransientReadAnomaly { expected: 4, actual: 2 }.is_fatal());
        assert!(!LoopbackError::DeviceUnavailable.is_fatal());
    }

    #[test]
    fn acquisition_classification() {
        assert!(LoopbackError::DeviceUnavailable.is_acquisition_failure());
        assert!(LoopbackError::UnsupportedConfig("rate".into()).is_acquisition_failure());
        assert!(LoopbackError::StartFailed("not active".into()).is_acquisition_failure());
        assert!(!LoopbackError::InvalidOperation("x".into()).is_acquisition_failure());
    }

    #[test]
    fn anomaly_message_names_both_counts() {
        let err = LoopbackError::TransientReadAnomaly { expected: 882, actual: 440 };
        assert_eq!(err.to_string(), "transient read anomaly: expected 882 bytes, got 440");
    }
}
