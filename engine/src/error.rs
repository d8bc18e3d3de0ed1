//! Error types for the Tally sync engine.

use thiserror::Error;

/// All possible errors from the sync engine.
///
/// Only [`Error::AppendFailed`] is fatal to the caller's mutation. Network
/// and relay failures are recoverable and drive the transport's backoff;
/// a decryption failure poisons one batch, never the whole sync.
#[derive(Debug, Error)]
pub enum Error {
    #[error("change log append failed: {0}")]
    AppendFailed(String),

    #[error("network failure: {0}")]
    Network(String),

    #[error("relay unavailable (status {0})")]
    RelayUnavailable(u16),

    #[error("payload encryption failed")]
    Encryption,

    #[error("payload decryption failed: key mismatch or corrupted payload")]
    Decryption,

    #[error("invalid sync cursor: {0}")]
    InvalidCursor(String),

    #[error("serialization failed: {0}")]
    Serialization(String),
}

impl Error {
    /// Whether the transport should retry with backoff rather than give up.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::Network(_) | Error::RelayUnavailable(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = Error::AppendFailed("disk full".into());
        assert_eq!(err.to_string(), "change log append failed: disk full");

        let err = Error::RelayUnavailable(503);
        assert_eq!(err.to_string(), "relay unavailable (status 503)");
    }

    #[test]
    fn recoverability() {
        assert!(Error::Network("timeout".into()).is_recoverable());
        assert!(Error::RelayUnavailable(500).is_recoverable());
        assert!(!Error::Decryption.is_recoverable());
        assert!(!Error::AppendFailed("io".into()).is_recoverable());
    }
}
