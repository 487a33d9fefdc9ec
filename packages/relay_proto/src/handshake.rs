//! The id exchange performed on every new peer connection.
//!
//! Both sides write their id as a bare decimal string, with no delimiter, and
//! read a single buffer holding the other side's id.

use thiserror::Error;

use crate::NodeId;

/// Encode a node id for the handshake.
pub fn encode(id: NodeId) -> Vec<u8> {
    id.to_string().into_bytes()
}

/// Decode the payload of a single handshake read.
pub fn decode(payload: &[u8]) -> Result<NodeId, HandshakeError> {
    if payload.is_empty() {
        return Err(HandshakeError::Truncated);
    }

    let text = std::str::from_utf8(payload).map_err(|_| HandshakeError::NotUtf8)?;

    text.parse()
        .map_err(|_| HandshakeError::InvalidId(text.to_owned()))
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HandshakeError {
    #[error("connection closed before the remote id was received")]
    Truncated,

    #[error("remote id is not valid UTF-8")]
    NotUtf8,

    #[error("remote id {0:?} is not a node id")]
    InvalidId(String),
}
