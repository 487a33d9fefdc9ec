//! Blocking I/O for a relay node.
//!
//! Every long-lived loop (the peer listener, each dialer, each link's receive
//! loop and the control channel) runs on its own thread and reports to a single
//! driver through a channel. The driver owns the [`Node`] and the send half of
//! every link, so all shared state is mutated from one place.

use std::{
    collections::HashMap,
    io::{self, Read, Write},
    net::{IpAddr, SocketAddr},
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc::{self, Receiver, RecvTimeoutError, Sender},
    },
    thread,
    time::Duration,
};

use miette::Diagnostic;
use relay_control::{Direction, Events, LinkId, Node, OutgoingLine};
use relay_proto::NodeId;
use thiserror::Error;

pub mod control_channel;
pub mod link;
pub mod mesh;
pub mod sockets;

/// Something that happened on one of the node's connections.
pub enum Event {
    /// A peer completed its handshake.
    Established {
        peer: NodeId,
        direction: Direction,
        reader: Box<dyn Read + Send>,
        writer: Box<dyn Write + Send>,
    },

    /// A link read some bytes.
    Received { link: LinkId, chunk: Vec<u8> },

    /// A link's peer closed the connection.
    Closed { link: LinkId },

    /// A link failed with a transport error.
    Failed { link: LinkId, error: io::Error },

    /// The master connected.
    MasterAttached { writer: Box<dyn Write + Send> },

    /// The master sent a command.
    Command(String),

    /// The master disconnected.
    MasterDetached,
}

/// Startup parameters of a node.
#[derive(Debug, Clone)]
pub struct Config {
    /// Our id.
    pub local_id: NodeId,

    /// Number of nodes in the cluster.
    pub node_count: u16,

    /// Address on which to accept the master.
    pub control_addr: SocketAddr,

    /// Host every node's peer listener is bound to.
    pub host: IpAddr,

    /// Port of node 0's peer listener; node `i` listens on `peer_base_port + i`.
    pub peer_base_port: u16,

    /// Maximum time to wait for a single connection attempt to a peer.
    pub connect_timeout: Option<Duration>,
}

/// The driver of a relay node.
pub struct Worker {
    /// The node state machine.
    node: Node,

    /// Send halves of live links.
    links: HashMap<LinkId, Box<dyn Write + Send>>,

    /// Send half of the master connection, once attached.
    master: Option<Box<dyn Write + Send>>,

    /// Handed to every loop that reports to the driver.
    tx_events: Sender<Event>,

    rx_events: Receiver<Event>,
}

impl Worker {
    /// Create a driver for a node with no connections and no loops running.
    pub fn new(local_id: NodeId) -> Self {
        let (tx_events, rx_events) = mpsc::channel();

        Self {
            node: Node::new(local_id),
            links: HashMap::new(),
            master: None,
            tx_events,
            rx_events,
        }
    }

    /// Bind the node's listeners and start every connection loop.
    ///
    /// The control channel starts first, then the dialers, then the peer listener.
    /// Failing to bind either listener aborts startup.
    pub fn start(config: &Config) -> Result<Self, Error> {
        let local_id = config.local_id;

        let peer_port = relay_proto::peer_port(config.peer_base_port, local_id).ok_or(
            Error::PortOutOfRange {
                id: local_id,
                base_port: config.peer_base_port,
            },
        )?;
        let peer_addr = SocketAddr::new(config.host, peer_port);

        let control_listener =
            sockets::bind_listener(config.control_addr).map_err(|source| Error::BindControl {
                addr: config.control_addr,
                source,
            })?;
        let peer_listener = sockets::bind_listener(peer_addr).map_err(|source| {
            Error::BindPeer {
                addr: peer_addr,
                source,
            }
        })?;

        let worker = Self::new(local_id);

        {
            let events = worker.events();
            spawn("control", move || {
                control_channel::serve(control_listener, local_id, events)
            })?;
        }

        mesh::dial_all(
            mesh::DialPlan {
                local_id,
                node_count: config.node_count,
                host: config.host,
                peer_base_port: config.peer_base_port,
                connect_timeout: config.connect_timeout,
            },
            &worker.tx_events,
        );

        {
            let events = worker.events();
            spawn("accept", move || {
                mesh::accept_loop(peer_listener, local_id, events)
            })?;
        }

        log::info!(
            "node {local_id}: listening for peers on {peer_addr} and for the master on {}",
            config.control_addr
        );

        Ok(worker)
    }

    /// A sender through which events reach this driver.
    pub fn events(&self) -> Sender<Event> {
        self.tx_events.clone()
    }

    /// The node state machine.
    pub fn node(&self) -> &Node {
        &self.node
    }

    /// Number of links whose send half is held.
    pub fn link_count(&self) -> usize {
        self.links.len()
    }

    /// Handle events until `shutdown` is raised.
    pub fn run(&mut self, shutdown: &AtomicBool) {
        while !shutdown.load(Ordering::Relaxed) {
            self.handle_next(Duration::from_millis(10));
        }

        log::info!("node {}: shutting down", self.node.local_id());
    }

    /// Wait up to `timeout` for an event and handle it.
    ///
    /// Returns `true` iff an event was handled.
    pub fn handle_next(&mut self, timeout: Duration) -> bool {
        match self.rx_events.recv_timeout(timeout) {
            Ok(event) => {
                self.handle(event);
                true
            }
            // we hold a sender ourselves, so the channel cannot disconnect
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => false,
        }
    }

    /// Apply a single event to the node and perform the resulting effects.
    pub fn handle(&mut self, event: Event) {
        let local_id = self.node.local_id();

        match event {
            Event::Established {
                peer,
                direction,
                reader,
                writer,
            } => {
                let link = self.node.link_established(peer, direction);
                self.links.insert(link, writer);

                let events = self.events();
                let spawned = thread::Builder::new()
                    .name(format!("link-{peer}"))
                    .spawn(move || link::receive_loop(reader, link, &events));

                if let Err(e) = spawned {
                    log::warn!("node {local_id}: failed to spawn receive loop for link {link}: {e}");
                    self.node.link_failed(link);
                }
            }
            Event::Received { link, chunk } => self.node.link_received(link, &chunk),
            Event::Closed { link } => {
                self.node.link_closed(link);
            }
            Event::Failed { link, error } => {
                log::warn!("node {local_id}: receive on link {link} failed: {error}");
                self.node.link_failed(link);
            }
            Event::MasterAttached { writer } => {
                self.master = Some(writer);
            }
            Event::Command(raw) => self.node.handle_command(&raw),
            Event::MasterDetached => {
                log::info!("node {local_id}: no longer serving master commands");
                self.master = None;
            }
        }

        let events = self.node.poll();
        self.perform(events);
    }

    fn perform(&mut self, events: Events) {
        let local_id = self.node.local_id();

        for OutgoingLine { link, peer, line } in events.outgoing_lines {
            let Some(writer) = self.links.get_mut(&link) else {
                log::debug!("node {local_id}: link {link} to peer {peer} is gone, not sending");
                continue;
            };

            if let Err(e) = writer.write_all(line.as_bytes()) {
                // the link's receive loop reports its own end
                log::warn!("node {local_id}: failed to send to peer {peer} over link {link}: {e}");
            }
        }

        for response in events.responses {
            let encoded = response.encode();
            log::info!("node {local_id}: sending to master: {encoded:?}");

            match &mut self.master {
                Some(master) => {
                    if let Err(e) = master.write_all(encoded.as_bytes()) {
                        log::warn!("node {local_id}: failed to respond to master: {e}");
                    }
                }
                None => log::warn!("node {local_id}: no master to respond to"),
            }
        }

        for link in events.evicted_links {
            self.links.remove(&link);
        }
    }
}

fn spawn<F: FnOnce() + Send + 'static>(name: &str, f: F) -> Result<(), Error> {
    thread::Builder::new()
        .name(name.to_owned())
        .spawn(f)
        .map(drop)
        .map_err(|source| Error::Spawn {
            name: name.to_owned(),
            source,
        })
}

#[derive(Debug, Error, Diagnostic)]
pub enum Error {
    #[error("node {id} has no peer port above base port {base_port}")]
    #[diagnostic(code(relay::worker::port_out_of_range))]
    PortOutOfRange { id: NodeId, base_port: u16 },

    #[error("failed to bind control listener on {addr}")]
    #[diagnostic(code(relay::worker::bind_control_failed))]
    BindControl {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("failed to bind peer listener on {addr}")]
    #[diagnostic(code(relay::worker::bind_peer_failed))]
    BindPeer {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("failed to spawn {name} thread")]
    #[diagnostic(code(relay::worker::spawn_failed))]
    Spawn {
        name: String,
        #[source]
        source: io::Error,
    },
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    const WAIT: Duration = Duration::from_secs(5);

    /// A writer whose output can be inspected after it is handed to the driver.
    #[derive(Clone, Default)]
    struct Recorder(Arc<Mutex<Vec<u8>>>);

    impl Recorder {
        fn contents(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    impl Write for Recorder {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    /// A reader fed chunk by chunk by the test; dropping the feed closes it.
    struct Fed(Receiver<Vec<u8>>);

    impl Read for Fed {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.0.recv() {
                Ok(chunk) => {
                    buf[..chunk.len()].copy_from_slice(&chunk);
                    Ok(chunk.len())
                }
                Err(_) => Ok(0),
            }
        }
    }

    /// Establish a link to `peer` backed by test doubles.
    fn attach_peer(
        worker: &mut Worker,
        peer: NodeId,
        direction: Direction,
    ) -> (Sender<Vec<u8>>, Recorder) {
        let (feed, rx) = mpsc::channel();
        let recorder = Recorder::default();

        worker.handle(Event::Established {
            peer,
            direction,
            reader: Box::new(Fed(rx)),
            writer: Box::new(recorder.clone()),
        });

        (feed, recorder)
    }

    fn attach_master(worker: &mut Worker) -> Recorder {
        let recorder = Recorder::default();
        worker.handle(Event::MasterAttached {
            writer: Box::new(recorder.clone()),
        });
        recorder
    }

    #[test]
    fn broadcast_reaches_every_link() {
        let mut worker = Worker::new(0);
        let (_feed_a, a) = attach_peer(&mut worker, 1, Direction::Dialed);
        let (_feed_b, b) = attach_peer(&mut worker, 2, Direction::Accepted);

        worker.handle(Event::Command("broadcast hello".to_owned()));

        assert_eq!(a.contents(), "hello\n");
        assert_eq!(b.contents(), "hello\n");
        assert_eq!(worker.node().messages(), ["hello"]);
    }

    #[test]
    fn responses_go_to_master() {
        let mut worker = Worker::new(2);
        let master = attach_master(&mut worker);
        let (_feed_0, _) = attach_peer(&mut worker, 0, Direction::Dialed);
        let (_feed_1, _) = attach_peer(&mut worker, 1, Direction::Accepted);

        worker.handle(Event::Command("broadcast first".to_owned()));
        worker.handle(Event::Command("get".to_owned()));
        worker.handle(Event::Command("alive".to_owned()));

        assert_eq!(master.contents(), "14-messages first\n11-alive 0,1,2\n");
    }

    #[test]
    fn received_chunks_are_logged() {
        let mut worker = Worker::new(0);
        let (feed, _) = attach_peer(&mut worker, 1, Direction::Accepted);

        feed.send(b"abc\nde".to_vec()).unwrap();
        assert!(worker.handle_next(WAIT));
        feed.send(b"f\n".to_vec()).unwrap();
        assert!(worker.handle_next(WAIT));

        assert_eq!(worker.node().messages(), ["abc", "f"]);
    }

    #[test]
    fn closed_link_is_released() {
        let mut worker = Worker::new(0);
        let (feed, recorder) = attach_peer(&mut worker, 1, Direction::Dialed);
        assert_eq!(worker.link_count(), 1);

        drop(feed);
        assert!(worker.handle_next(WAIT));

        assert_eq!(worker.link_count(), 0);
        assert!(!worker.node().roster().contains(1));

        worker.handle(Event::Command("broadcast after".to_owned()));
        assert_eq!(recorder.contents(), "", "closed links must not be written");
    }

    #[test]
    fn failed_link_is_released_but_alive() {
        let mut worker = Worker::new(0);
        let (_feed, _) = attach_peer(&mut worker, 1, Direction::Dialed);
        let link = *worker.node().links().keys().next().unwrap();

        worker.handle(Event::Failed {
            link,
            error: io::ErrorKind::ConnectionReset.into(),
        });

        assert_eq!(worker.link_count(), 0);
        assert!(worker.node().roster().contains(1));
    }

    #[test]
    fn detached_master_gets_nothing() {
        let mut worker = Worker::new(0);
        let master = attach_master(&mut worker);

        worker.handle(Event::MasterDetached);
        worker.handle(Event::Command("get".to_owned()));

        assert_eq!(master.contents(), "");
    }
}
