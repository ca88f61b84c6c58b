use mgrpc_frame::FrameError;

/// Errors that can occur in transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The address cannot be used by this transport. Never retried.
    #[error("invalid address {address:?}: {reason}")]
    InvalidAddress { address: String, reason: String },

    /// Failed to connect to the specified address.
    #[error("failed to connect to {address}: {source}")]
    Connect {
        address: String,
        source: std::io::Error,
    },

    /// TLS setup or handshake failed.
    #[cfg(feature = "ws")]
    #[error("tls error: {0}")]
    Tls(#[from] native_tls::Error),

    /// WebSocket handshake or protocol error.
    #[cfg(feature = "ws")]
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// HTTP client error.
    #[cfg(feature = "http")]
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// The HTTP endpoint answered with a non-success status.
    #[error("http status {0}")]
    HttpStatus(u16),

    /// Frame encoding/decoding error.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// An I/O error occurred on the transport stream.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The peer sent a message in an encoding this client does not speak.
    #[error("unsupported encoding: {0}")]
    UnsupportedEncoding(String),

    /// The peer closed the connection.
    #[error("connection closed by peer")]
    ConnectionClosed,

    /// The transport has been closed locally.
    #[error("transport closed")]
    Closed,

    /// The reconnect wrapper gave up.
    #[error("reconnect to {address} failed after {attempts} attempts: {source}")]
    ReconnectFailed {
        address: String,
        attempts: u32,
        #[source]
        source: Box<TransportError>,
    },
}

impl TransportError {
    /// Errors that no amount of reconnecting will fix.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            TransportError::InvalidAddress { .. }
                | TransportError::Closed
                | TransportError::ReconnectFailed { .. }
        )
    }

    pub(crate) fn invalid_address(address: &str, reason: impl Into<String>) -> Self {
        TransportError::InvalidAddress {
            address: address.to_string(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, TransportError>;
