//! Error definitions for ARDLink

use thiserror::Error;

/// ARDLink error types
#[derive(Error, Debug)]
pub enum ArdError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid vehicle address: {0}")]
    Address(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Argument error: {0}")]
    Argument(String),

    #[error("Receiver error: {0}")]
    Receiver(String),
}

impl ArdError {
    pub fn protocol(msg: impl Into<String>) -> Self {
        ArdError::Protocol(msg.into())
    }

    pub fn argument(msg: impl Into<String>) -> Self {
        ArdError::Argument(msg.into())
    }

    /// True for the receive-timeout errors a blocking UDP socket reports
    pub fn is_timeout(&self) -> bool {
        match self {
            ArdError::Io(e) => is_timeout(e),
            _ => false,
        }
    }
}

/// Read timeouts surface as `WouldBlock` on Unix and `TimedOut` on Windows
pub fn is_timeout(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
    )
}

/// Result type alias for ARDLink operations
pub type ArdResult<T> = Result<T, ArdError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ArdError::Config("test".to_string());
        assert_eq!(format!("{}", err), "Configuration error: test");

        let err = ArdError::Address("10.0.x.1".to_string());
        assert_eq!(format!("{}", err), "Invalid vehicle address: 10.0.x.1");
    }

    #[test]
    fn test_timeout_detection() {
        let err = ArdError::from(std::io::Error::from(std::io::ErrorKind::WouldBlock));
        assert!(err.is_timeout());

        let err = ArdError::from(std::io::Error::from(std::io::ErrorKind::TimedOut));
        assert!(err.is_timeout());

        let err = ArdError::from(std::io::Error::from(std::io::ErrorKind::ConnectionRefused));
        assert!(!err.is_timeout());

        assert!(!ArdError::protocol("short").is_timeout());
    }
}
