//! Frame, command and response model for mgrpc.
//!
//! Every exchange on the wire is a [`Frame`] envelope carrying routing
//! metadata (source, destination, key) and either a [`Command`] or a
//! [`Response`]. This crate also provides the stream framings used by the
//! byte-oriented transports:
//! - [`LengthPrefixedCodec`] for TCP (4-byte LE length + JSON)
//! - [`SerialFrameCodec`] for serial lines (`"""` delimiters, junk passthrough)

pub mod codec;
pub mod command;
pub mod error;
pub mod frame;
pub mod response;

pub use codec::{
    LengthPrefixedCodec, SerialFrameCodec, SerialItem, DEFAULT_MAX_PAYLOAD, HEADER_SIZE,
    SERIAL_DELIMITER,
};
pub use command::{next_command_id, Command};
pub use error::{FrameError, Result};
pub use frame::{Frame, PROTOCOL_VERSION};
pub use response::{ErrorResponse, Response, STATUS_OK};
