mod maintenance;
pub mod node_data;
pub mod task;

use std::collections::HashSet;
use std::net::UdpSocket;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{channel, Receiver};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::key::Key;
use crate::node::node_data::NodeData;
use crate::node::task::PeriodicTask;
use crate::protocol::{
    Message, Network, Protocol, RequestPayload, Response, ResponsePayload, UdpNetwork,
};
use crate::ring::LocalNode;
use crate::{MAX_CONCURRENT_REQUESTS, MAX_LOOKUP_HOPS};

/// The answer to a successor lookup along with the number of relay hops it took.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Lookup {
    pub node: NodeData,
    pub hops: usize,
}

/// A node in the Chord ring.
///
/// Cloning a `Node` is cheap and yields another handle to the same ring state. All reads and
/// writes of the ring state go through one mutex that is never held across a network call.
pub struct Node<N: Network = UdpNetwork> {
    node_data: Arc<NodeData>,
    state: Arc<Mutex<LocalNode>>,
    network: Arc<N>,
    config: Arc<Config>,
    tasks: Arc<Mutex<Vec<PeriodicTask>>>,
    is_active: Arc<AtomicBool>,
}

impl<N: Network> Clone for Node<N> {
    fn clone(&self) -> Self {
        Node {
            node_data: Arc::clone(&self.node_data),
            state: Arc::clone(&self.state),
            network: Arc::clone(&self.network),
            config: Arc::clone(&self.config),
            tasks: Arc::clone(&self.tasks),
            is_active: Arc::clone(&self.is_active),
        }
    }
}

impl Node<UdpNetwork> {
    /// Constructs a new `Node` bound to `config.address`. The node creates a new ring if
    /// `bootstrap` is `None` and joins the ring of the node at `bootstrap` otherwise. The four
    /// maintenance tasks are started before returning.
    pub fn new(config: Config, bootstrap: Option<&str>) -> Result<Self> {
        config.validate()?;
        let socket = UdpSocket::bind(&config.address)?;
        let addr = socket.local_addr()?.to_string();
        let id = config.id.unwrap_or_else(|| Key::hash(addr.as_bytes()));
        let node_data = Arc::new(NodeData::new(&addr, id));

        let (message_tx, message_rx) = channel();
        let protocol = Protocol::new(socket, message_tx);
        let network = UdpNetwork::new(protocol, Arc::clone(&node_data));

        let node = Node::with_network(node_data, config, network);
        node.start_message_handler(message_rx);

        if let Some(bootstrap) = bootstrap {
            if let Err(err) = node.join(bootstrap) {
                node.kill();
                return Err(err);
            }
        }
        node.start_maintenance();
        info!("{} - Started node with id {:?}", node.node_data.addr, node.node_data.id);
        Ok(node)
    }

    /// Starts a thread that dispatches inbound messages. Every request is handled by its own
    /// worker thread.
    fn start_message_handler(&self, rx: Receiver<Message>) {
        let node = self.clone();
        let active_requests = Arc::new(AtomicUsize::new(0));
        thread::spawn(move || {
            for message in rx.iter() {
                match message {
                    Message::Request(request) => {
                        if active_requests.load(Ordering::Acquire) >= MAX_CONCURRENT_REQUESTS {
                            warn!(
                                "{} - Dropping request from {}; too many requests in flight",
                                node.node_data.addr, request.sender.addr,
                            );
                            continue;
                        }
                        active_requests.fetch_add(1, Ordering::AcqRel);
                        let worker = node.clone();
                        let active_requests = Arc::clone(&active_requests);
                        thread::spawn(move || {
                            let payload = worker.handle_request(request.payload);
                            let response = Message::Response(Response {
                                request_id: request.id,
                                receiver: (*worker.node_data).clone(),
                                payload,
                            });
                            let protocol = worker.network.protocol();
                            if let Err(err) = protocol.send_message(&response, &request.sender.addr)
                            {
                                warn!(
                                    "{} - Could not respond to {}: {}",
                                    worker.node_data.addr, request.sender.addr, err
                                );
                            }
                            active_requests.fetch_sub(1, Ordering::AcqRel);
                        });
                    },
                    Message::Response(response) => node.network.complete(response),
                    Message::Kill => {
                        node.is_active.store(false, Ordering::Release);
                        info!("{} - Killed message handler", node.node_data.addr);
                        break;
                    },
                }
            }
        });
    }

    /// Kills the current node: stops the maintenance tasks and the message handler.
    pub fn kill(&self) {
        self.stop_maintenance();
        self.network.protocol().stop();
    }
}

impl<N: Network> Node<N> {
    /// Constructs a `Node` alone on a new ring on top of an existing transport. Nothing is
    /// started; use `join` and `start_maintenance` as needed.
    pub fn with_network(node_data: Arc<NodeData>, config: Config, network: N) -> Self {
        let state = LocalNode::new(Arc::clone(&node_data), config.successor_list_size);
        Node {
            node_data,
            state: Arc::new(Mutex::new(state)),
            network: Arc::new(network),
            config: Arc::new(config),
            tasks: Arc::new(Mutex::new(Vec::new())),
            is_active: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Returns the `NodeData` associated with the node.
    pub fn node_data(&self) -> NodeData {
        (*self.node_data).clone()
    }

    pub fn id(&self) -> Key {
        self.node_data.id
    }

    pub fn network(&self) -> &N {
        &self.network
    }

    pub fn is_active(&self) -> bool {
        self.is_active.load(Ordering::Acquire)
    }

    fn lock_state(&self) -> MutexGuard<LocalNode> {
        match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Returns a copy of the current ring state.
    pub fn snapshot(&self) -> LocalNode {
        self.lock_state().clone()
    }

    pub fn successor(&self) -> NodeData {
        self.lock_state().successor().clone()
    }

    pub fn successors(&self) -> Vec<NodeData> {
        self.lock_state().successors().to_vec()
    }

    pub fn predecessor(&self) -> Option<NodeData> {
        self.lock_state().predecessor().cloned()
    }

    pub fn set_successor(&self, successor: NodeData) {
        self.lock_state().set_successor(successor);
    }

    pub fn set_successors(&self, successors: Vec<NodeData>) {
        self.lock_state().set_successors(successors);
    }

    pub fn set_predecessor(&self, predecessor: Option<NodeData>) {
        self.lock_state().set_predecessor(predecessor);
    }

    pub fn set_finger(&self, index: usize, finger: Option<NodeData>) {
        self.lock_state().set_finger(index, finger);
    }

    /// Records a bucket entry without contacting any peer.
    pub fn insert_entry(&self, key: &str, owner: Key) {
        self.lock_state().bucket_mut().insert(key.to_string(), owner);
    }

    pub fn entry(&self, key: &str) -> Option<Key> {
        self.lock_state().bucket().get(key)
    }

    /// Handles a request and returns the answer of a single hop.
    pub fn handle_request(&self, payload: RequestPayload) -> ResponsePayload {
        debug!("{} - Handling request {:?}", self.node_data.addr, payload);
        match payload {
            RequestPayload::Ping => ResponsePayload::Pong,
            RequestPayload::FindSuccessor(id) => {
                let (node, is_relay) = self.find_successor_step(&id, &HashSet::new());
                ResponsePayload::Successor { node, is_relay }
            },
            RequestPayload::Notify(candidate) => {
                self.handle_notify(candidate);
                ResponsePayload::Ack
            },
            RequestPayload::GetPredecessor => ResponsePayload::Predecessor(self.predecessor()),
            RequestPayload::StoreKey(key, owner) => {
                if key.is_empty() {
                    return ResponsePayload::Error("empty resource key".to_string());
                }
                let successor = {
                    let mut state = self.lock_state();
                    state.bucket_mut().insert(key.clone(), owner);
                    state.successor().clone()
                };
                info!("{} - Stored {} -> {:?}", self.node_data.addr, key, owner);
                if successor != *self.node_data {
                    self.replicate_to(&successor, vec![(key, owner)]);
                }
                ResponsePayload::Ack
            },
            RequestPayload::ReplicateKey(key, owner) => {
                if key.is_empty() {
                    return ResponsePayload::Error("empty resource key".to_string());
                }
                debug!("{} - Replicated {} -> {:?}", self.node_data.addr, key, owner);
                self.lock_state().bucket_mut().insert(key, owner);
                ResponsePayload::Ack
            },
            RequestPayload::LookupKey(key) => {
                if key.is_empty() {
                    return ResponsePayload::Error("empty resource key".to_string());
                }
                ResponsePayload::Owner(self.entry(&key))
            },
        }
    }

    /// Sends a request RPC. Requests addressed to the node itself are handled in place.
    fn send_request(&self, dest: &NodeData, payload: RequestPayload) -> Result<ResponsePayload> {
        self.send_request_within(dest, payload, self.config.request_timeout)
    }

    fn send_request_within(
        &self,
        dest: &NodeData,
        payload: RequestPayload,
        timeout: Duration,
    ) -> Result<ResponsePayload> {
        let response = if dest.addr == self.node_data.addr {
            self.handle_request(payload)
        } else {
            self.network.send(dest, payload, timeout)?
        };
        match response {
            ResponsePayload::Error(reason) => Err(Error::Rejected {
                addr: dest.addr.clone(),
                reason,
            }),
            payload => Ok(payload),
        }
    }

    /// Sends a `PING` RPC bounded by the probe timeout. Returns `true` if `dest` answered in
    /// time.
    pub fn ping(&self, dest: &NodeData) -> bool {
        let probe_timeout = self.config.probe_timeout();
        match self.send_request_within(dest, RequestPayload::Ping, probe_timeout) {
            Ok(ResponsePayload::Pong) => true,
            Ok(payload) => {
                warn!(
                    "{} - Unexpected answer to ping from {}: {:?}",
                    self.node_data.addr, dest.addr, payload
                );
                false
            },
            Err(err) => {
                debug!("{} - Ping to {} failed: {}", self.node_data.addr, dest.addr, err);
                false
            },
        }
    }

    /// Sends a `FIND_SUCCESSOR` RPC.
    fn rpc_find_successor(&self, dest: &NodeData, id: &Key) -> Result<(NodeData, bool)> {
        match self.send_request(dest, RequestPayload::FindSuccessor(*id))? {
            ResponsePayload::Successor { node, is_relay } => Ok((node, is_relay)),
            _ => Err(Error::UnexpectedResponse(dest.addr.clone())),
        }
    }

    /// Sends a `GET_PREDECESSOR` RPC.
    fn rpc_get_predecessor(&self, dest: &NodeData) -> Result<Option<NodeData>> {
        match self.send_request(dest, RequestPayload::GetPredecessor)? {
            ResponsePayload::Predecessor(predecessor) => Ok(predecessor),
            _ => Err(Error::UnexpectedResponse(dest.addr.clone())),
        }
    }

    /// Sends a `NOTIFY` RPC telling `dest` that this node might be its predecessor.
    fn rpc_notify(&self, dest: &NodeData) -> Result<()> {
        match self.send_request(dest, RequestPayload::Notify(self.node_data()))? {
            ResponsePayload::Ack => Ok(()),
            _ => Err(Error::UnexpectedResponse(dest.addr.clone())),
        }
    }

    /// Sends a `STORE_KEY` RPC.
    fn rpc_store_key(&self, dest: &NodeData, key: &str, owner: Key) -> Result<()> {
        match self.send_request(dest, RequestPayload::StoreKey(key.to_string(), owner))? {
            ResponsePayload::Ack => Ok(()),
            _ => Err(Error::UnexpectedResponse(dest.addr.clone())),
        }
    }

    /// Sends a `REPLICATE_KEY` RPC.
    fn rpc_replicate_key(&self, dest: &NodeData, key: &str, owner: Key) -> Result<()> {
        match self.send_request(dest, RequestPayload::ReplicateKey(key.to_string(), owner))? {
            ResponsePayload::Ack => Ok(()),
            _ => Err(Error::UnexpectedResponse(dest.addr.clone())),
        }
    }

    /// Sends a `LOOKUP_KEY` RPC.
    fn rpc_lookup_key(&self, dest: &NodeData, key: &str) -> Result<Option<Key>> {
        match self.send_request(dest, RequestPayload::LookupKey(key.to_string()))? {
            ResponsePayload::Owner(owner) => Ok(owner),
            _ => Err(Error::UnexpectedResponse(dest.addr.clone())),
        }
    }

    /// Drops a node that failed to answer from the fingers and the successor list.
    fn forget(&self, node_data: &NodeData) {
        let mut state = self.lock_state();
        state.remove_finger(node_data);
        if state.successors().contains(node_data) {
            state.remove_dead_successors(&[node_data.clone()]);
        }
    }

    /// Returns the live known node that most closely precedes `id`, or `None` if no known node
    /// improves on this one. Nodes in `excluded` are skipped without probing.
    fn closest_preceding_node(&self, id: &Key, excluded: &HashSet<String>) -> Option<NodeData> {
        let candidates = self.lock_state().preceding_candidates(id);
        for candidate in candidates {
            if excluded.contains(&candidate.addr) {
                continue;
            }
            if self.ping(&candidate) {
                return Some(candidate);
            }
            debug!("{} - Skipping dead candidate {}", self.node_data.addr, candidate.addr);
            self.forget(&candidate);
        }
        None
    }

    /// Resolves one hop of a successor lookup. Returns the successor of `id` if it is known
    /// locally. Otherwise returns the next node to ask with the relay flag set, or this node
    /// itself without the flag if nothing closer is known.
    fn find_successor_step(&self, id: &Key, excluded: &HashSet<String>) -> (NodeData, bool) {
        if let Some(successor) = self.lock_state().local_successor(id) {
            return (successor, false);
        }
        match self.closest_preceding_node(id, excluded) {
            Some(node_data) => (node_data, true),
            None => (self.node_data(), false),
        }
    }

    /// Returns the node responsible for `id`.
    pub fn find_successor(&self, id: &Key) -> NodeData {
        self.find_successor_traced(id).node
    }

    /// Iteratively resolves the node responsible for `id`. Every relay is asked for one hop
    /// until a node answers without the relay flag. Relays that fail to answer are excluded and
    /// the lookup resumes from the local routing state.
    pub fn find_successor_traced(&self, id: &Key) -> Lookup {
        let mut excluded = HashSet::new();
        let (mut node, mut is_relay) = self.find_successor_step(id, &excluded);
        let mut hops = 0;

        while is_relay {
            if hops >= MAX_LOOKUP_HOPS {
                warn!(
                    "{} - Lookup of {:?} gave up after {} hops at {}",
                    self.node_data.addr, id, hops, node.addr
                );
                break;
            }
            hops += 1;

            let next = if node == *self.node_data {
                Ok(self.find_successor_step(id, &excluded))
            } else {
                self.rpc_find_successor(&node, id)
            };
            match next {
                Ok((next_node, next_is_relay))
                    if !(next_is_relay && excluded.contains(&next_node.addr)) =>
                {
                    node = next_node;
                    is_relay = next_is_relay;
                },
                Ok(_) => {
                    let (next_node, next_is_relay) = self.find_successor_step(id, &excluded);
                    node = next_node;
                    is_relay = next_is_relay;
                },
                Err(err) => {
                    debug!("{} - Relay {} failed: {}", self.node_data.addr, node.addr, err);
                    excluded.insert(node.addr.clone());
                    self.forget(&node);
                    let (next_node, next_is_relay) = self.find_successor_step(id, &excluded);
                    node = next_node;
                    is_relay = next_is_relay;
                },
            }
        }

        debug!(
            "{} - Successor of {:?} is {} after {} hops",
            self.node_data.addr, id, node.addr, hops
        );
        Lookup { node, hops }
    }

    /// Joins the ring of the node at `bootstrap` by asking it for this node's successor.
    pub fn join(&self, bootstrap: &str) -> Result<()> {
        let mut node = NodeData::from_address(bootstrap);
        for _ in 0..MAX_LOOKUP_HOPS {
            let (next, is_relay) = self.rpc_find_successor(&node, &self.node_data.id)?;
            if !is_relay {
                info!("{} - Joined ring with successor {}", self.node_data.addr, next);
                let mut state = self.lock_state();
                state.set_predecessor(None);
                state.set_successor(next);
                return Ok(());
            }
            node = next;
        }
        Err(Error::Unreachable(bootstrap.to_string()))
    }

    /// Stores `key` in the ring with this node as the one serving it. Returns the node now
    /// responsible for the entry.
    pub fn store(&self, key: &str) -> Result<NodeData> {
        let responsible = self.find_successor(&Key::hash(key.as_bytes()));
        self.rpc_store_key(&responsible, key, self.node_data.id)?;
        Ok(responsible)
    }

    /// Looks up the identifier of the node serving `key`.
    pub fn lookup(&self, key: &str) -> Result<Option<Key>> {
        let responsible = self.find_successor(&Key::hash(key.as_bytes()));
        self.rpc_lookup_key(&responsible, key)
    }
}

#[cfg(test)]
mod tests {
    use std::net::UdpSocket;
    use std::thread;
    use std::time::Duration;

    use super::Node;
    use crate::config::Config;

    fn config() -> Config {
        let mut config = Config::new("127.0.0.1:0").with_intervals(Duration::from_secs(3600));
        config.request_timeout = Duration::from_millis(500);
        config
    }

    #[test]
    fn test_datagram_cannot_kill_node() {
        let node = Node::new(config(), None).unwrap();
        let peer = Node::new(config(), None).unwrap();

        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        // the tag `Kill` would have if it were encodable
        socket.send_to(&[2u8], &node.node_data().addr).unwrap();
        thread::sleep(Duration::from_millis(100));

        assert!(node.is_active());
        assert!(peer.ping(&node.node_data()));

        node.kill();
        thread::sleep(Duration::from_millis(100));
        assert!(!node.is_active());
        assert!(!peer.ping(&node.node_data()));
        peer.kill();
    }
}
