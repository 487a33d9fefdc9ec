//! Pure state machine implementation of a relay node.
//!
//! Performs no I/O, and is intended to be driven by a single owner that feeds it
//! connection events and master commands in arrival order, then performs the
//! effects it returns from [`Node::poll`].

use std::{collections::BTreeMap, fmt};

use relay_proto::{frame, Command, NodeId, Response};

mod roster;

pub use roster::Roster;

/// A relay node, implemented as a pure state machine.
pub struct Node {
    /// Our id.
    local_id: NodeId,

    /// Ids believed to be alive.
    roster: Roster,

    /// Every message seen, in arrival order.
    log: Vec<String>,

    /// Live peer links, by link id.
    links: BTreeMap<LinkId, PeerLink>,

    /// The id to assign to the next established link.
    next_link_id: u64,

    /// Send queue for lines bound to peers.
    send_queue: Vec<OutgoingLine>,

    /// Responses bound to the master.
    responses: Vec<Response>,

    /// Links evicted since the last poll.
    evicted: Vec<LinkId>,
}

/// Identifies one established connection to a peer.
///
/// A peer may be reachable over two links at once, one dialed and one accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LinkId(u64);

impl fmt::Display for LinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Which side opened a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// The peer dialed us.
    Accepted,

    /// We dialed the peer.
    Dialed,
}

/// An established connection to a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerLink {
    /// The id the peer announced in the handshake.
    pub peer: NodeId,

    /// Which side opened the connection.
    pub direction: Direction,
}

/// A line to write to a peer link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingLine {
    /// The link to write on.
    pub link: LinkId,

    /// The peer at the other end of the link.
    pub peer: NodeId,

    /// The line, including its trailing newline.
    pub line: String,
}

/// The result of polling the node for events.
#[derive(Debug, Default)]
pub struct Events {
    /// Lines to write to peer links, in order.
    pub outgoing_lines: Vec<OutgoingLine>,

    /// Responses to write to the master, in order.
    pub responses: Vec<Response>,

    /// Links whose resources should be released.
    pub evicted_links: Vec<LinkId>,
}

impl Node {
    /// Create a node that knows only itself.
    pub fn new(local_id: NodeId) -> Self {
        log::info!("node {local_id}: started");

        Self {
            local_id,
            roster: Roster::new(local_id),
            log: Vec::new(),
            links: BTreeMap::new(),
            next_link_id: 0,
            send_queue: Vec::new(),
            responses: Vec::new(),
            evicted: Vec::new(),
        }
    }

    /// Register a link whose handshake completed, marking the peer alive.
    pub fn link_established(&mut self, peer: NodeId, direction: Direction) -> LinkId {
        let id = LinkId(self.next_link_id);
        self.next_link_id += 1;

        log::info!(
            "node {}: link {id} {} peer {peer}, adding {peer} to alive peers",
            self.local_id,
            match direction {
                Direction::Accepted => "accepted from",
                Direction::Dialed => "dialed to",
            }
        );

        self.roster.add(peer);
        self.links.insert(id, PeerLink { peer, direction });

        id
    }

    /// Handle a single read from a link.
    ///
    /// Only the newline-terminated units of the chunk are recorded.
    pub fn link_received(&mut self, link: LinkId, chunk: &[u8]) {
        let Some(PeerLink { peer, .. }) = self.links.get(&link) else {
            log::warn!(
                "node {}: dropping data from evicted link {link}",
                self.local_id
            );
            return;
        };

        for unit in frame::split_units(chunk) {
            log::debug!(
                "node {}: received from peer {peer}: {unit:?}",
                self.local_id
            );
            self.log.push(unit);
        }
    }

    /// Handle a link whose peer closed the connection.
    ///
    /// The link is evicted and the peer loses one roster membership. Returns
    /// whether the peer left the roster.
    pub fn link_closed(&mut self, link: LinkId) -> bool {
        let Some(PeerLink { peer, .. }) = self.evict(link) else {
            return false;
        };

        let left = self.roster.remove(peer);
        if left {
            log::info!(
                "node {}: peer {peer} closed link {link}, removing {peer} from alive peers",
                self.local_id
            );
        } else {
            log::debug!(
                "node {}: peer {peer} closed link {link} but is still alive over another link",
                self.local_id
            );
        }

        left
    }

    /// Handle a link that failed with a transport error.
    ///
    /// The link is evicted, but the peer stays in the roster.
    pub fn link_failed(&mut self, link: LinkId) {
        if let Some(PeerLink { peer, .. }) = self.evict(link) {
            log::warn!(
                "node {}: link {link} to peer {peer} broke, keeping {peer} in alive peers",
                self.local_id
            );
        }
    }

    /// Handle a single command line from the master.
    pub fn handle_command(&mut self, raw: &str) {
        log::debug!("node {}: command from master: {raw:?}", self.local_id);

        let command = match Command::parse(raw) {
            Ok(command) => command,
            Err(e) => {
                log::warn!("node {}: ignoring command: {e}", self.local_id);
                return;
            }
        };

        match command {
            Command::Get => {
                self.responses
                    .push(Response::messages(self.log.iter().map(String::as_str)));
            }
            Command::Alive => {
                self.responses.push(Response::alive(self.roster.ids()));
            }
            Command::Broadcast { payload } => {
                let line = format!("{payload}\n");

                for (&link, &PeerLink { peer, .. }) in &self.links {
                    log::debug!(
                        "node {}: sending to peer {peer} over link {link}",
                        self.local_id
                    );
                    self.send_queue.push(OutgoingLine {
                        link,
                        peer,
                        line: line.clone(),
                    });
                }

                self.log.push(payload);
            }
        }
    }

    /// Poll for events.
    #[must_use]
    pub fn poll(&mut self) -> Events {
        if !self.send_queue.is_empty() {
            log::trace!("poll resulted in sending lines: {:#?}", self.send_queue);
        }
        if !self.responses.is_empty() {
            log::trace!("poll resulted in responses: {:#?}", self.responses);
        }

        Events {
            outgoing_lines: std::mem::take(&mut self.send_queue),
            responses: std::mem::take(&mut self.responses),
            evicted_links: std::mem::take(&mut self.evicted),
        }
    }

    /// Our id.
    pub fn local_id(&self) -> NodeId {
        self.local_id
    }

    /// The ids believed to be alive.
    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    /// The message log, in arrival order.
    pub fn messages(&self) -> &[String] {
        &self.log
    }

    /// Live links, by link id.
    pub fn links(&self) -> &BTreeMap<LinkId, PeerLink> {
        &self.links
    }

    fn evict(&mut self, link: LinkId) -> Option<PeerLink> {
        let removed = self.links.remove(&link);
        if removed.is_some() {
            self.evicted.push(link);
        }
        removed
    }
}
