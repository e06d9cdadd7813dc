// Workflow error kinds - every failure a user can see
use crate::transport::TransportError;
use thiserror::Error;

/// Recoverable failures; each one is turned into a message at its workflow boundary
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AnalysisError {
    /// Server refused with 402, or the local quota is already at zero
    #[error("{message}")]
    QuotaExhausted {
        message: String,
        tries_left: Option<i64>,
    },

    #[error("The file is too large. The maximum allowed size is 10 MB.")]
    PayloadTooLarge,

    /// Pre-flight rejection; no request was sent
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Server(String),

    #[error("Could not reach the analysis server: {0}. Check your connection and that the server is running.")]
    Network(String),

    #[error("Report download failed: {0}")]
    ReportGeneration(String),
}

impl AnalysisError {
    pub fn kind(&self) -> &'static str {
        match self {
            AnalysisError::QuotaExhausted { .. } => "quota_exhausted",
            AnalysisError::PayloadTooLarge => "payload_too_large",
            AnalysisError::Validation(_) => "validation",
            AnalysisError::Server(_) => "server",
            AnalysisError::Network(_) => "network",
            AnalysisError::ReportGeneration(_) => "report_generation",
        }
    }
}

impl From<TransportError> for AnalysisError {
    fn from(e: TransportError) -> Self {
        AnalysisError::Network(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_network_wording() {
        let err: AnalysisError = TransportError::Connect("Connection refused".to_string()).into();
        let msg = err.to_string();
        assert!(msg.contains("Connection refused"));
        assert!(msg.contains("Check your connection"));
        assert_eq!(err.kind(), "network");
    }

    #[test]
    fn test_timeout_is_network() {
        let err: AnalysisError = TransportError::Timeout(Duration::from_secs(60)).into();
        assert!(matches!(err, AnalysisError::Network(_)));
        assert!(err.to_string().contains("timed out"));
    }

    #[test]
    fn test_payload_too_large_fixed_message() {
        assert!(AnalysisError::PayloadTooLarge.to_string().contains("10 MB"));
    }
}
