use std::collections::BTreeMap;

use relay_proto::NodeId;

/// The set of node ids believed to be alive.
///
/// The local id is always a member. Every other id is a member for as long as
/// at least one handshake with it has not been undone by a disconnect, so a peer
/// that is both dialed and accepted must disconnect twice before it leaves.
#[derive(Debug, Clone)]
pub struct Roster {
    /// Our own id.
    local_id: NodeId,

    /// Remote ids mapped to the number of handshakes that keep them alive.
    memberships: BTreeMap<NodeId, usize>,
}

impl Roster {
    /// Create a roster containing only the local id.
    pub fn new(local_id: NodeId) -> Self {
        Self {
            local_id,
            memberships: BTreeMap::new(),
        }
    }

    /// Record a successful handshake with `id`.
    pub fn add(&mut self, id: NodeId) {
        if id != self.local_id {
            *self.memberships.entry(id).or_default() += 1;
        }
    }

    /// Undo one handshake with `id`.
    ///
    /// Returns `true` iff `id` is no longer a member afterwards.
    pub fn remove(&mut self, id: NodeId) -> bool {
        if id == self.local_id {
            return false;
        }

        match self.memberships.get_mut(&id) {
            Some(count) if *count > 1 => {
                *count -= 1;
                false
            }
            Some(_) => {
                self.memberships.remove(&id);
                true
            }
            None => false,
        }
    }

    /// Whether `id` is a member.
    pub fn contains(&self, id: NodeId) -> bool {
        id == self.local_id || self.memberships.contains_key(&id)
    }

    /// All members, the local id included, in numeric order.
    pub fn ids(&self) -> Vec<NodeId> {
        let mut ids: Vec<_> = self.memberships.keys().copied().collect();
        let at = ids.partition_point(|&id| id < self.local_id);
        ids.insert(at, self.local_id);
        ids
    }

    /// Number of members, the local id included.
    pub fn len(&self) -> usize {
        self.memberships.len() + 1
    }
}
