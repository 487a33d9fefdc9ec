//! Wire formats spoken between relay nodes and between a node and its master.
//!
//! Everything here is plain text: peers exchange their decimal ids once and then
//! newline-separated messages, and the master sends newline-separated commands.

pub mod control;
pub mod frame;
pub mod handshake;

pub use control::{Command, Response};

/// Identifier of a node in the cluster.
pub type NodeId = u16;

/// Maximum number of bytes consumed by a single read on any connection.
pub const RECEIVE_SIZE: usize = 4096;

/// The port offset from which every node's peer listening port is derived.
pub const DEFAULT_PEER_BASE_PORT: u16 = 20000;

/// The port on which the node with the given id accepts peer connections.
///
/// Returns `None` if the sum does not fit in a port number.
pub fn peer_port(base_port: u16, id: NodeId) -> Option<u16> {
    base_port.checked_add(id)
}
