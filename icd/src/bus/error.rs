//! Message bus error types

use std::time::Duration;
use thiserror::Error;

/// Errors raised by a message bus transport
#[derive(Debug, Error)]
pub enum BusError {
    #[error("Bus disconnected: {0}")]
    Disconnected(String),

    #[error("Bus I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Bus codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Frame too large: {0} bytes")]
    FrameTooLarge(usize),

    #[error("Gave up on channel {channel} after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        channel: String,
        attempts: u32,
        last_error: String,
    },
}

impl BusError {
    /// Check if this error should end the process rather than be retried
    pub fn is_fatal(&self) -> bool {
        matches!(self, BusError::RetriesExhausted { .. })
    }

    /// Check if the same operation may succeed when tried again later
    pub fn is_transient(&self) -> bool {
        matches!(self, BusError::Disconnected(_) | BusError::Io(_) | BusError::Timeout(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_exhausted_retries_are_fatal() {
        assert!(
            BusError::RetriesExhausted {
                channel: "responses".to_string(),
                attempts: 3,
                last_error: "refused".to_string(),
            }
            .is_fatal()
        );
        assert!(!BusError::Disconnected("gone".to_string()).is_fatal());
        assert!(!BusError::Timeout(Duration::from_secs(1)).is_fatal());
    }

    #[test]
    fn test_transient_errors() {
        assert!(BusError::Disconnected("gone".to_string()).is_transient());
        assert!(BusError::Timeout(Duration::from_secs(1)).is_transient());
        assert!(!BusError::FrameTooLarge(10).is_transient());
    }

    #[test]
    fn test_error_display() {
        let err = BusError::RetriesExhausted {
            channel: "alerts".to_string(),
            attempts: 10,
            last_error: "connection refused".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Gave up on channel alerts after 10 attempts: connection refused"
        );
    }
}
