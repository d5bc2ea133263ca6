use std::sync::Arc;

use crate::key::Key;
use crate::node::node_data::NodeData;
use crate::storage::Bucket;
use crate::FINGER_TABLE_SIZE;

/// The ring state owned by a running node.
///
/// `LocalNode` only performs local state transitions. Everything that needs the network is
/// driven by `Node`, which holds this state behind a single mutex and never keeps the lock
/// across a network call.
#[derive(Clone, Debug)]
pub struct LocalNode {
    node_data: Arc<NodeData>,
    predecessor: Option<NodeData>,
    successors: Vec<NodeData>,
    fingers: Vec<Option<NodeData>>,
    bucket: Bucket,
    successor_list_size: usize,
}

impl LocalNode {
    /// Constructs the state of a node that is alone on its ring: every successor slot points
    /// at itself, the predecessor is unset and the finger table is empty.
    pub fn new(node_data: Arc<NodeData>, successor_list_size: usize) -> Self {
        let successor_list_size = successor_list_size.max(1);
        LocalNode {
            successors: vec![(*node_data).clone(); successor_list_size],
            node_data,
            predecessor: None,
            fingers: vec![None; FINGER_TABLE_SIZE],
            bucket: Bucket::new(),
            successor_list_size,
        }
    }

    pub fn node_data(&self) -> &NodeData {
        &self.node_data
    }

    pub fn id(&self) -> &Key {
        &self.node_data.id
    }

    pub fn predecessor(&self) -> Option<&NodeData> {
        self.predecessor.as_ref()
    }

    pub fn set_predecessor(&mut self, predecessor: Option<NodeData>) {
        self.predecessor = predecessor;
    }

    /// Clears the predecessor if it is still `node_data`. Returns `true` if it was cleared.
    pub fn clear_predecessor_if(&mut self, node_data: &NodeData) -> bool {
        if self.predecessor.as_ref() == Some(node_data) {
            self.predecessor = None;
            true
        } else {
            false
        }
    }

    pub fn successor(&self) -> &NodeData {
        &self.successors[0]
    }

    pub fn successors(&self) -> &[NodeData] {
        &self.successors
    }

    pub fn successor_list_size(&self) -> usize {
        self.successor_list_size
    }

    /// Returns `true` if the node is its own successor.
    pub fn is_alone(&self) -> bool {
        *self.successor() == *self.node_data
    }

    /// Overwrites the first successor slot.
    pub fn set_successor(&mut self, successor: NodeData) {
        self.successors[0] = successor;
    }

    /// Pushes a new first successor, shifting the rest of the list down.
    pub fn push_successor(&mut self, successor: NodeData) {
        self.successors.insert(0, successor);
        self.successors.truncate(self.successor_list_size);
    }

    /// Replaces the whole successor list. Missing slots are filled with the node itself.
    pub fn set_successors(&mut self, mut successors: Vec<NodeData>) {
        successors.truncate(self.successor_list_size);
        while successors.len() < self.successor_list_size {
            successors.push((*self.node_data).clone());
        }
        self.successors = successors;
    }

    /// Purges the successors in `dead` and compacts the list towards the front, refilling the
    /// tail with the node itself.
    pub fn remove_dead_successors(&mut self, dead: &[NodeData]) {
        let remaining = self
            .successors
            .iter()
            .filter(|node_data| !dead.contains(node_data))
            .cloned()
            .collect();
        self.set_successors(remaining);
    }

    pub fn fingers(&self) -> &[Option<NodeData>] {
        &self.fingers
    }

    pub fn set_finger(&mut self, index: usize, finger: Option<NodeData>) {
        if index < FINGER_TABLE_SIZE {
            self.fingers[index] = finger;
        }
    }

    /// Removes every finger that points at `node_data`.
    pub fn remove_finger(&mut self, node_data: &NodeData) {
        for finger in &mut self.fingers {
            if finger.as_ref() == Some(node_data) {
                *finger = None;
            }
        }
    }

    /// Returns the first successor if `id` falls in `(self, successor]`.
    pub fn local_successor(&self, id: &Key) -> Option<NodeData> {
        let successor = self.successor();
        if id.between_inclusive_end(&self.node_data.id, &successor.id) {
            Some(successor.clone())
        } else {
            None
        }
    }

    /// Returns the known nodes strictly inside `(self, id)`, drawn from the finger table and the
    /// successor list, ordered from the closest to `id` to the farthest.
    pub fn preceding_candidates(&self, id: &Key) -> Vec<NodeData> {
        let mut ret: Vec<NodeData> = Vec::new();
        let fingers = self.fingers.iter().rev().filter_map(|finger| finger.as_ref());
        for node_data in fingers.chain(self.successors.iter()) {
            if *node_data == *self.node_data || ret.contains(node_data) {
                continue;
            }
            if node_data.id.between(&self.node_data.id, id) {
                ret.push(node_data.clone());
            }
        }
        ret.sort_by_key(|node_data| node_data.id.distance_to(id));
        ret
    }

    /// Handles a notify from `candidate`. The candidate becomes the predecessor iff the current
    /// predecessor is unset or the candidate lies in `(predecessor, self)`. Returns the previous
    /// predecessor when the candidate was adopted.
    pub fn accept_notify(&mut self, candidate: NodeData) -> Option<Option<NodeData>> {
        if candidate.id == self.node_data.id {
            return None;
        }
        let accepted = match self.predecessor {
            None => true,
            Some(ref predecessor) => candidate.id.between(&predecessor.id, &self.node_data.id),
        };
        if accepted {
            Some(self.predecessor.replace(candidate))
        } else {
            None
        }
    }

    pub fn bucket(&self) -> &Bucket {
        &self.bucket
    }

    pub fn bucket_mut(&mut self) -> &mut Bucket {
        &mut self.bucket
    }
}
