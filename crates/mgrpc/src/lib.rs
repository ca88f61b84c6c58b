//! RPC client for devices speaking the mgrpc frame protocol.
//!
//! A [`Client`] sends [`Command`]s to a peer over one transport and matches
//! each [`Response`] to its caller by request ID. Transports are selected by
//! address scheme: `ws://`/`wss://`, `tcp://`, `http://`/`https://` and
//! serial devices.
//!
//! # Crate Structure
//!
//! - [`frame`]: wire model and framing codecs
//! - [`transport`]: the `Codec` trait, concrete transports and reconnection
//! - [`client`]: connection options and the multiplexing client

/// Re-export frame types.
pub mod frame {
    pub use mgrpc_frame::*;
}

/// Re-export transport types.
pub mod transport {
    pub use mgrpc_transport::*;
}

/// Re-export client types.
pub mod client {
    pub use mgrpc_client::*;
}

pub use mgrpc_client::{
    Client, ClientError, ConnectOptions, ConnectionState, ErrorKind, TransportKind,
};
pub use mgrpc_frame::{Command, ErrorResponse, Frame, Response};
