//! Establishing peer links: accepting inbound dials and dialing every other node.

use std::{
    net::{IpAddr, SocketAddr, TcpListener, TcpStream},
    sync::mpsc::Sender,
    thread,
    time::Duration,
};

use relay_control::Direction;
use relay_proto::NodeId;

use crate::{
    link::{self, LinkError},
    sockets, Event,
};

/// Accept peer connections forever, handing each one to the driver once its handshake completes.
///
/// A failed accept or handshake abandons that connection only.
pub fn accept_loop(listener: TcpListener, local_id: NodeId, events: Sender<Event>) {
    for stream in listener.incoming() {
        let stream = match stream {
            Ok(stream) => stream,
            Err(e) => {
                log::warn!("node {local_id}: failed to accept peer connection: {e}");
                continue;
            }
        };

        let remote = remote_label(&stream);
        log::info!("node {local_id}: connected by {remote}");

        // a connection that never sends its id must not hold up the next accept
        let events = events.clone();
        let label = remote.clone();
        let spawned = thread::Builder::new()
            .name("handshake".to_owned())
            .spawn(move || {
                match link::establish(stream, local_id, Direction::Accepted, &events) {
                    Ok(peer) => log::info!("node {local_id}: {label} identified as peer {peer}"),
                    Err(e) => log::warn!(
                        "node {local_id}: abandoning connection from {label}: {:?}",
                        miette::Report::new(e)
                    ),
                }
            });

        if let Err(e) = spawned {
            log::warn!("node {local_id}: failed to spawn handshake for {remote}: {e}");
        }
    }
}

/// The remote address of a connection, for narration.
fn remote_label(stream: &TcpStream) -> String {
    match stream.peer_addr() {
        Ok(addr) => addr.to_string(),
        Err(_) => "an unknown address".to_owned(),
    }
}

/// Where and how to dial peers.
#[derive(Debug, Clone, Copy)]
pub struct DialPlan {
    /// Our id.
    pub local_id: NodeId,

    /// Number of nodes in the cluster.
    pub node_count: u16,

    /// Host every node listens on.
    pub host: IpAddr,

    /// Port of node 0's peer listener.
    pub peer_base_port: u16,

    /// Maximum time to wait for a single connection attempt.
    pub connect_timeout: Option<Duration>,
}

impl DialPlan {
    /// Every peer id and its listening address, ourselves excluded.
    pub fn targets(&self) -> impl Iterator<Item = (NodeId, SocketAddr)> + '_ {
        (0..self.node_count)
            .filter(|&id| id != self.local_id)
            .filter_map(|id| {
                let port = relay_proto::peer_port(self.peer_base_port, id);
                if port.is_none() {
                    log::warn!(
                        "node {}: peer {id} has no port above {}, not dialing",
                        self.local_id,
                        self.peer_base_port
                    );
                }
                port.map(|port| (id, SocketAddr::new(self.host, port)))
            })
    }
}

/// Dial every peer once, each on its own thread.
///
/// A peer that cannot be reached is logged and never retried.
pub fn dial_all(plan: DialPlan, events: &Sender<Event>) {
    for (peer, addr) in plan.targets() {
        let events = events.clone();
        let spawned = thread::Builder::new()
            .name(format!("dial-{peer}"))
            .spawn(move || match dial(plan, addr, &events) {
                Ok(remote_id) => log::info!(
                    "node {}: connected to peer {peer} (announced as {remote_id})",
                    plan.local_id
                ),
                Err(e) => log::info!(
                    "node {}: failed to connect to peer {peer}: {:?}",
                    plan.local_id,
                    miette::Report::new(e)
                ),
            });

        if let Err(e) = spawned {
            log::warn!(
                "node {}: failed to spawn dialer for peer {peer}: {e}",
                plan.local_id
            );
        }
    }
}

fn dial(plan: DialPlan, addr: SocketAddr, events: &Sender<Event>) -> Result<NodeId, LinkError> {
    let stream = sockets::connect(addr, plan.connect_timeout)
        .map_err(|source| LinkError::Connect { addr, source })?;

    link::establish(stream, plan.local_id, Direction::Dialed, events)
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use super::*;

    fn plan(local_id: NodeId, node_count: u16, peer_base_port: u16) -> DialPlan {
        DialPlan {
            local_id,
            node_count,
            host: Ipv4Addr::LOCALHOST.into(),
            peer_base_port,
            connect_timeout: None,
        }
    }

    #[test]
    fn targets_exclude_self() {
        let targets: Vec<_> = plan(1, 4, 20000).targets().collect();

        assert_eq!(
            targets,
            vec![
                (0, SocketAddr::from(([127, 0, 0, 1], 20000))),
                (2, SocketAddr::from(([127, 0, 0, 1], 20002))),
                (3, SocketAddr::from(([127, 0, 0, 1], 20003))),
            ]
        );
    }

    #[test]
    fn remote_label_is_plain_address() {
        const PORT: u16 = 42010;

        let addr = SocketAddr::from(([127, 0, 0, 1], PORT));
        let listener = sockets::bind_listener(addr).unwrap();
        let client = TcpStream::connect(addr).unwrap();
        let (server, _) = listener.accept().unwrap();

        assert_eq!(remote_label(&client), addr.to_string());
        assert_eq!(
            remote_label(&server),
            client.local_addr().unwrap().to_string()
        );
    }

    #[test]
    fn single_node_dials_nobody() {
        assert_eq!(plan(0, 1, 20000).targets().count(), 0);
    }

    #[test]
    fn targets_skip_overflowing_ports() {
        let targets: Vec<_> = plan(0, 3, u16::MAX - 1).targets().collect();

        assert_eq!(
            targets,
            vec![(1, SocketAddr::from(([127, 0, 0, 1], u16::MAX)))]
        );
    }
}
