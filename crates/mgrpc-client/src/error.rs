use std::sync::Arc;
use std::time::Duration;

use mgrpc_frame::ErrorResponse;
use mgrpc_transport::TransportError;

/// Errors returned by [`Client`](crate::Client) operations.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The connection options are unusable.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Establishing or closing the transport failed.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// The receive loop stopped while this request was outstanding.
    #[error("request {id}: connection lost: {source}")]
    ConnectionLost {
        id: i64,
        source: Arc<TransportError>,
    },

    /// Sending the request failed (only with fail-fast sends enabled).
    #[error("request {id}: send failed: {source}")]
    Send { id: i64, source: TransportError },

    /// Another call with the same ID is still outstanding.
    #[error("request {0} is already outstanding")]
    DuplicateId(i64),

    /// The caller cancelled the request.
    #[error("request {0} cancelled")]
    Cancelled(i64),

    /// The caller's deadline passed before a response arrived.
    #[error("request {id} timed out after {timeout:?}")]
    Timeout { id: i64, timeout: Duration },

    /// The peer answered with a nonzero status.
    #[error("request failed: {0}")]
    Status(#[from] ErrorResponse),
}

/// Coarse classification of a [`ClientError`], for retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    Transport,
    Application,
    Cancellation,
    Usage,
}

impl ClientError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ClientError::Config(_) => ErrorKind::Configuration,
            ClientError::Transport(TransportError::InvalidAddress { .. }) => {
                ErrorKind::Configuration
            }
            ClientError::Transport(_)
            | ClientError::ConnectionLost { .. }
            | ClientError::Send { .. } => ErrorKind::Transport,
            ClientError::Status(_) => ErrorKind::Application,
            ClientError::Cancelled(_) | ClientError::Timeout { .. } => ErrorKind::Cancellation,
            ClientError::DuplicateId(_) => ErrorKind::Usage,
        }
    }

    /// Whether repeating the call (possibly on a new connection) may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Transport | ErrorKind::Cancellation)
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_drive_retry_decisions() {
        let lost = ClientError::ConnectionLost {
            id: 1,
            source: Arc::new(TransportError::ConnectionClosed),
        };
        assert_eq!(lost.kind(), ErrorKind::Transport);
        assert!(lost.is_retryable());

        let status = ClientError::from(ErrorResponse {
            status: 500,
            msg: "boom".to_string(),
        });
        assert_eq!(status.kind(), ErrorKind::Application);
        assert!(!status.is_retryable());

        let bad_address = ClientError::from(TransportError::InvalidAddress {
            address: "ws://".to_string(),
            reason: "missing host".to_string(),
        });
        assert_eq!(bad_address.kind(), ErrorKind::Configuration);

        let timeout = ClientError::Timeout {
            id: 3,
            timeout: Duration::from_millis(10),
        };
        assert_eq!(timeout.kind(), ErrorKind::Cancellation);
        assert!(timeout.to_string().contains("request 3 timed out"));
    }
}
