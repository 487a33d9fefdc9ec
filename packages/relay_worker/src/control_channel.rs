//! The single connection through which the master drives a node.

use std::{
    io::{self, Read},
    net::TcpListener,
    sync::mpsc::Sender,
};

use relay_proto::{frame, NodeId, RECEIVE_SIZE};

use crate::Event;

/// Accept the master's connection, then forward its commands to the driver until it disconnects.
///
/// Only one master is ever accepted; the listener is closed once it attaches.
pub fn serve(listener: TcpListener, local_id: NodeId, events: Sender<Event>) {
    let stream = match listener.accept() {
        Ok((stream, _)) => stream,
        Err(e) => {
            log::error!("node {local_id}: failed to accept master connection: {e}");
            return;
        }
    };
    drop(listener);

    log::info!("node {local_id}: connected by master");

    let writer = match stream.try_clone() {
        Ok(writer) => writer,
        Err(e) => {
            log::error!("node {local_id}: failed to set up master connection: {e}");
            return;
        }
    };
    if events
        .send(Event::MasterAttached {
            writer: Box::new(writer),
        })
        .is_err()
    {
        return;
    }

    read_commands(stream, local_id, &events);
}

/// Forward every command read from `reader`, then report the master gone.
pub fn read_commands<R: Read>(mut reader: R, local_id: NodeId, events: &Sender<Event>) {
    let mut buf = [0; RECEIVE_SIZE];

    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => {
                log::info!("node {local_id}: master disconnected");
                break;
            }
            Ok(n) => n,
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                log::warn!("node {local_id}: master connection broke: {e}");
                break;
            }
        };

        for command in frame::split_units(&buf[..n]) {
            if events.send(Event::Command(command)).is_err() {
                return;
            }
        }
    }

    let _ = events.send(Event::MasterDetached);
}
