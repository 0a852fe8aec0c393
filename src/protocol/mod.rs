pub mod codec;
pub mod error;
pub mod handshake;
pub mod messages;

pub use codec::{decode_message, Decoded, MessageReader};
pub use error::{DecodeError, HandshakeError, ReadError};
pub use handshake::{
    exchange_status, validate_status, HandshakeConfig, HandshakeReport, ValidationPolicy,
};
pub use messages::StatusData;
