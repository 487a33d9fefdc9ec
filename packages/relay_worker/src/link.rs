//! Handshake and receive loop shared by dialed and accepted peer links.

use std::{
    io::{self, Read, Write},
    net::{SocketAddr, TcpStream},
    sync::mpsc::Sender,
};

use miette::Diagnostic;
use relay_control::{Direction, LinkId};
use relay_proto::{
    handshake::{self, HandshakeError},
    NodeId, RECEIVE_SIZE,
};
use thiserror::Error;

use crate::Event;

/// Exchange ids over a freshly opened connection.
///
/// Both sides send their own id first, then read the other's.
pub fn handshake<S: Read + Write>(stream: &mut S, local_id: NodeId) -> Result<NodeId, LinkError> {
    stream
        .write_all(&handshake::encode(local_id))
        .map_err(LinkError::Transport)?;

    let mut buf = [0; RECEIVE_SIZE];
    let n = stream.read(&mut buf).map_err(LinkError::Transport)?;

    Ok(handshake::decode(&buf[..n])?)
}

/// Complete the handshake on a connection and hand it to the driver.
pub fn establish(
    mut stream: TcpStream,
    local_id: NodeId,
    direction: Direction,
    events: &Sender<Event>,
) -> Result<NodeId, LinkError> {
    let peer = handshake(&mut stream, local_id)?;
    let reader = stream.try_clone().map_err(LinkError::Transport)?;

    events
        .send(Event::Established {
            peer,
            direction,
            reader: Box::new(reader),
            writer: Box::new(stream),
        })
        .map_err(|_| LinkError::DriverGone { peer })?;

    Ok(peer)
}

/// Read from a link until it closes or fails, forwarding every read to the driver.
pub fn receive_loop<R: Read>(mut reader: R, link: LinkId, events: &Sender<Event>) {
    let mut buf = [0; RECEIVE_SIZE];

    loop {
        let event = match reader.read(&mut buf) {
            Ok(0) => Event::Closed { link },
            Ok(n) => {
                log::trace!("link {link} read {n} bytes");
                Event::Received {
                    link,
                    chunk: buf[..n].to_vec(),
                }
            }
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(error) => Event::Failed { link, error },
        };

        let last = !matches!(event, Event::Received { .. });
        if events.send(event).is_err() || last {
            return;
        }
    }
}

#[derive(Debug, Error, Diagnostic)]
pub enum LinkError {
    #[error("failed to connect to {addr}")]
    #[diagnostic(code(relay::link::connect_failed))]
    Connect {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("handshake failed")]
    #[diagnostic(code(relay::link::handshake_failed))]
    Handshake(#[from] HandshakeError),

    #[error("driver stopped before the link to peer {peer} could be registered")]
    #[diagnostic(code(relay::link::driver_gone))]
    DriverGone { peer: NodeId },

    #[error("transport error during handshake")]
    #[diagnostic(code(relay::link::transport_failed))]
    Transport(#[source] io::Error),
}
