//! Pluggable frame transports for mgrpc.
//!
//! Every transport implements the [`Codec`] trait: send a [`Frame`], receive
//! the next [`Frame`], close. Available transports:
//! - [`TcpCodec`]: length-prefixed JSON over TCP
//! - [`WsCodec`]: JSON text messages over WebSocket, optionally TLS (`ws` feature)
//! - [`HttpCodec`]: one HTTP POST per frame (`http` feature)
//! - [`SerialCodec`]: `"""`-delimited frames over a serial device
//!
//! [`ReconnectCodec`] wraps any of them and rebuilds the underlying
//! transport when it fails.
//!
//! [`Frame`]: mgrpc_frame::Frame

pub mod error;
pub mod keepalive;
pub mod reconnect;
pub mod serial;
pub mod tcp;
pub mod tls;
pub mod traits;

#[cfg(feature = "http")]
pub mod http;
#[cfg(feature = "ws")]
pub mod ws;

pub use error::{Result, TransportError};
pub use keepalive::{enable_keepalive, TCP_KEEPALIVE_INTERVAL};
pub use reconnect::{ReconnectCodec, RetryPolicy};
pub use serial::{JunkHandler, SerialCodec};
pub use tcp::TcpCodec;
pub use tls::{ClientIdentity, TlsSettings};
pub use traits::{Codec, CodecFactory};

#[cfg(feature = "http")]
pub use http::HttpCodec;
#[cfg(feature = "ws")]
pub use ws::{WsCodec, WsConfig, WS_ENCODING_EXTENSION, WS_PROTOCOL};
