//! Request-multiplexing RPC client for mgrpc.
//!
//! [`Client`] correlates concurrent calls with their responses over a single
//! transport. A background receive loop demultiplexes inbound frames by
//! request ID; when the transport dies, every outstanding call is failed
//! with the same error. Transports are chosen from the address scheme by
//! [`connect_codec`] and, for stream transports, wrapped in a
//! reconnecting codec.

pub mod client;
pub mod connector;
pub mod error;
pub mod options;

mod pending;

pub use client::{Client, ConnectionState};
pub use connector::connect_codec;
pub use error::{ClientError, ErrorKind, Result};
pub use options::{ConnectOptions, TransportKind};

pub use mgrpc_frame::{Command, ErrorResponse, Frame, Response};
pub use mgrpc_transport::{Codec, RetryPolicy, TransportError};
