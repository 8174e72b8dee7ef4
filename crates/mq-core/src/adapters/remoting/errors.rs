use shared_types::MqError;
use thiserror::Error;

/// Wire-level failures of the remoting protocol.
#[derive(Debug, Error)]
pub(crate) enum RemotingError {
    #[error("frame size {size} exceeds maximum {max}")]
    FrameTooLarge { size: usize, max: usize },

    #[error("frame size {0} too small")]
    FrameTooSmall(usize),

    #[error("unsupported serialize type {0}")]
    UnsupportedSerialization(u8),

    #[error("header length {header} exceeds frame ({remaining} bytes left)")]
    HeaderOverrun { header: usize, remaining: usize },

    #[error("header too large")]
    HeaderTooLarge,

    #[error("bad command header: {0}")]
    Header(#[from] serde_json::Error),

    #[error("truncated message record: {0}")]
    Truncated(&'static str),

    #[error("unknown message magic code {0}")]
    UnknownMagic(i32),

    #[error("cannot decompress message body: {0}")]
    Inflate(#[source] std::io::Error),
}

impl RemotingError {
    /// Errors about a stored message rather than the frame around it.
    pub(crate) fn is_record_corrupt(&self) -> bool {
        matches!(
            self,
            RemotingError::Truncated(_) | RemotingError::UnknownMagic(_) | RemotingError::Inflate(_)
        )
    }
}

impl From<RemotingError> for MqError {
    fn from(err: RemotingError) -> Self {
        MqError::network("remoting protocol error").with_cause(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_types::ErrorKind;

    #[test]
    fn test_converts_to_network_error_with_details() {
        let err: MqError = RemotingError::UnknownMagic(12345).into();
        assert!(err.is_kind(ErrorKind::Network));
        assert_eq!(err.details(), Some("unknown message magic code 12345"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_record_corruption_is_distinguished_from_framing() {
        assert!(RemotingError::Truncated("body").is_record_corrupt());
        assert!(!RemotingError::FrameTooSmall(2).is_record_corrupt());
    }
}
