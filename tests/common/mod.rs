#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};
use std::thread;
use std::time::{Duration, Instant};

use chord_dht::{
    Config, Error, Key, Network, Node, NodeData, RequestPayload, ResponsePayload, Result,
};

/// Every node reachable through `MemoryNetwork`, addressed by `NodeData::addr`.
#[derive(Default)]
pub struct Registry {
    nodes: RwLock<HashMap<String, Node<MemoryNetwork>>>,
    failed: RwLock<HashSet<String>>,
    timeouts: Option<(Duration, Duration)>,
}

impl Registry {
    pub fn new() -> Arc<Self> {
        Arc::new(Registry::default())
    }

    /// A registry whose network behaves like a real one with respect to time: a failed node
    /// costs the caller its full timeout, and an answer that takes longer than the caller's
    /// timeout is lost. Nodes get the given request and probe timeouts.
    pub fn timed(request_timeout: Duration, probe_timeout: Duration) -> Arc<Self> {
        Arc::new(Registry {
            timeouts: Some((request_timeout, probe_timeout)),
            ..Registry::default()
        })
    }

    /// Registers a node that is alone on its ring.
    pub fn add_node(self: &Arc<Self>, id: Key, successor_list_size: usize) -> Node<MemoryNetwork> {
        let node_data = Arc::new(NodeData::new(&format!("node-{:?}", id), id));
        let mut config = Config::new(&node_data.addr);
        config.successor_list_size = successor_list_size;
        if let Some((request_timeout, probe_timeout)) = self.timeouts {
            config.request_timeout = request_timeout;
            config.probe_timeout = Some(probe_timeout);
        }
        let network = MemoryNetwork {
            registry: Arc::clone(self),
            calls: Mutex::new(Vec::new()),
        };
        let node = Node::with_network(node_data, config, network);
        self.nodes
            .write()
            .unwrap()
            .insert(node.node_data().addr, node.clone());
        node
    }

    /// Makes every request to `node_data` fail as if it timed out.
    pub fn fail(&self, node_data: &NodeData) {
        self.failed.write().unwrap().insert(node_data.addr.clone());
    }

    pub fn recover(&self, node_data: &NodeData) {
        self.failed.write().unwrap().remove(&node_data.addr);
    }

    fn get(&self, addr: &str) -> Option<Node<MemoryNetwork>> {
        if self.failed.read().unwrap().contains(addr) {
            return None;
        }
        self.nodes.read().unwrap().get(addr).cloned()
    }
}

/// A `Network` that calls the handler of the destination node directly and records every
/// request it sends.
pub struct MemoryNetwork {
    registry: Arc<Registry>,
    calls: Mutex<Vec<(String, RequestPayload)>>,
}

impl MemoryNetwork {
    pub fn calls(&self) -> Vec<(String, RequestPayload)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn replications(&self, key: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|(addr, payload)| match payload {
                RequestPayload::ReplicateKey(ref replicated, _) if replicated == key => Some(addr),
                _ => None,
            })
            .collect()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }
}

impl Network for MemoryNetwork {
    fn send(
        &self,
        dest: &NodeData,
        payload: RequestPayload,
        timeout: Duration,
    ) -> Result<ResponsePayload> {
        self.calls
            .lock()
            .unwrap()
            .push((dest.addr.clone(), payload.clone()));
        let timed = self.registry.timeouts.is_some();
        let timed_out = || Error::Timeout {
            addr: dest.addr.clone(),
            millis: timeout.as_millis(),
        };

        let node = match self.registry.get(&dest.addr) {
            Some(node) => node,
            None if timed => {
                thread::sleep(timeout);
                return Err(timed_out());
            },
            None => return Err(Error::Unreachable(dest.addr.clone())),
        };
        let start = Instant::now();
        let response = node.handle_request(payload);
        if timed && start.elapsed() > timeout {
            return Err(timed_out());
        }
        Ok(response)
    }
}

/// Returns `2^156 * index + 1`, which spaces 16 identifiers evenly around the ring.
pub fn spaced_id(index: u8) -> Key {
    let mut bytes = [0u8; 20];
    bytes[0] = index << 4;
    bytes[19] = 1;
    Key::new(bytes)
}

/// Creates `count` evenly spaced nodes, sorted by id.
pub fn spaced_nodes(
    registry: &Arc<Registry>,
    count: u8,
    successor_list_size: usize,
) -> Vec<Node<MemoryNetwork>> {
    let step = 16 / count;
    (0..count)
        .map(|i| registry.add_node(spaced_id(i * step), successor_list_size))
        .collect()
}

/// Wires correct predecessors and successor lists into `nodes`, which must be sorted by id.
pub fn connect(nodes: &[Node<MemoryNetwork>]) {
    let count = nodes.len();
    for (i, node) in nodes.iter().enumerate() {
        let size = node.snapshot().successor_list_size();
        let successors = (1..=size)
            .map(|offset| nodes[(i + offset) % count].node_data())
            .filter(|node_data| *node_data != node.node_data())
            .collect();
        node.set_successors(successors);
        node.set_predecessor(Some(nodes[(i + count - 1) % count].node_data()));
    }
}

/// Returns the node responsible for `id`: the first node at or after it clockwise.
pub fn true_successor(nodes: &[Node<MemoryNetwork>], id: &Key) -> NodeData {
    nodes
        .iter()
        .map(|node| node.node_data())
        .min_by_key(|node_data| id.distance_to(&node_data.id))
        .unwrap()
}

/// Sets the fingers in `indexes` of every node to their correct values.
pub fn fill_fingers<I>(nodes: &[Node<MemoryNetwork>], indexes: I)
where
    I: IntoIterator<Item = usize> + Clone,
{
    for node in nodes {
        for index in indexes.clone() {
            let start = node.id().jump(index);
            node.set_finger(index, Some(true_successor(nodes, &start)));
        }
    }
}
