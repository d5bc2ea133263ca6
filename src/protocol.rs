use bincode::{self, Options};
use std::collections::HashMap;
use std::net::UdpSocket;
use std::sync::mpsc::{channel, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::key::Key;
use crate::node::node_data::NodeData;
use crate::MESSAGE_LENGTH;

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Request {
    pub id: Key,
    pub sender: NodeData,
    pub payload: RequestPayload,
}

/// The peer protocol. Each variant is one remote function.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub enum RequestPayload {
    Ping,
    FindSuccessor(Key),
    Notify(NodeData),
    GetPredecessor,
    StoreKey(String, Key),
    ReplicateKey(String, Key),
    LookupKey(String),
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Response {
    pub request_id: Key,
    pub receiver: NodeData,
    pub payload: ResponsePayload,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub enum ResponsePayload {
    Pong,
    Ack,
    /// One hop of a successor lookup. `is_relay` asks the caller to continue at `node`.
    Successor { node: NodeData, is_relay: bool },
    Predecessor(Option<NodeData>),
    Owner(Option<Key>),
    Error(String),
}

#[derive(Serialize, Deserialize, Debug)]
pub enum Message {
    Request(Request),
    Response(Response),
    /// Stops the message handler. Only ever sent through the in-process channel; it has no
    /// wire encoding, so a datagram can never carry it.
    #[serde(skip)]
    Kill,
}

/// A request-response transport between ring members.
///
/// Implementations must bound every call with a timeout; a peer that does not answer is
/// reported as an error exactly like one that refused.
pub trait Network: Send + Sync + 'static {
    fn send(
        &self,
        dest: &NodeData,
        payload: RequestPayload,
        timeout: Duration,
    ) -> Result<ResponsePayload>;
}

pub(crate) fn codec() -> impl Options {
    bincode::DefaultOptions::new().with_limit(MESSAGE_LENGTH as u64)
}

#[derive(Clone)]
pub struct Protocol {
    socket: Arc<UdpSocket>,
    tx: Arc<Mutex<Sender<Message>>>,
}

impl Protocol {
    pub fn new(socket: UdpSocket, tx: Sender<Message>) -> Protocol {
        let protocol = Protocol {
            socket: Arc::new(socket),
            tx: Arc::new(Mutex::new(tx.clone())),
        };
        let ret = protocol.clone();
        thread::spawn(move || {
            let mut buffer = [0u8; MESSAGE_LENGTH];
            loop {
                let (len, src_addr) = match protocol.socket.recv_from(&mut buffer) {
                    Ok(received) => received,
                    Err(err) => {
                        warn!("Protocol: Could not receive data: {}", err);
                        continue;
                    },
                };
                let message = match codec().deserialize(&buffer[..len]) {
                    Ok(message) => message,
                    Err(err) => {
                        warn!("Protocol: Dropping malformed message from {}: {}", src_addr, err);
                        continue;
                    },
                };

                if tx.send(message).is_err() {
                    warn!("Protocol: Connection closed.");
                    break;
                }
            }
        });
        ret
    }

    pub fn send_message(&self, message: &Message, addr: &str) -> Result<()> {
        let buffer = codec().serialize(message)?;
        self.socket.send_to(&buffer, addr)?;
        Ok(())
    }

    /// Stops the message handler fed by this protocol.
    pub fn stop(&self) {
        let tx = match self.tx.lock() {
            Ok(tx) => tx,
            Err(poisoned) => poisoned.into_inner(),
        };
        if tx.send(Message::Kill).is_err() {
            debug!("Protocol: Message handler already stopped.");
        }
    }
}

/// `Network` over UDP datagrams. Requests carry a random token; responses are matched back to
/// the waiting caller through the pending request table.
pub struct UdpNetwork {
    protocol: Protocol,
    node_data: Arc<NodeData>,
    pending_requests: Mutex<HashMap<Key, Sender<Response>>>,
}

impl UdpNetwork {
    pub fn new(protocol: Protocol, node_data: Arc<NodeData>) -> Self {
        UdpNetwork {
            protocol,
            node_data,
            pending_requests: Mutex::new(HashMap::new()),
        }
    }

    pub fn protocol(&self) -> &Protocol {
        &self.protocol
    }

    /// Hands a response to the caller waiting on it. If the id in the response does not match
    /// any outgoing request, then the response will be ignored.
    pub fn complete(&self, response: Response) {
        let pending_requests = match self.pending_requests.lock() {
            Ok(pending_requests) => pending_requests,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(sender) = pending_requests.get(&response.request_id) {
            debug!(
                "{} - Receiving response from {} {:?}",
                self.node_data.addr, response.receiver.addr, response.payload,
            );
            if sender.send(response).is_err() {
                debug!("{} - Caller stopped waiting.", self.node_data.addr);
            }
        } else {
            warn!(
                "{} - Original request not found; irrelevant response or expired request.",
                self.node_data.addr
            );
        }
    }

    fn remove_pending(&self, token: &Key) {
        let mut pending_requests = match self.pending_requests.lock() {
            Ok(pending_requests) => pending_requests,
            Err(poisoned) => poisoned.into_inner(),
        };
        pending_requests.remove(token);
    }
}

impl Network for UdpNetwork {
    fn send(
        &self,
        dest: &NodeData,
        payload: RequestPayload,
        timeout: Duration,
    ) -> Result<ResponsePayload> {
        debug!(
            "{} - Sending request to {} {:?}",
            self.node_data.addr, dest.addr, payload
        );
        let (response_tx, response_rx) = channel();
        let token = {
            let mut pending_requests = match self.pending_requests.lock() {
                Ok(pending_requests) => pending_requests,
                Err(poisoned) => poisoned.into_inner(),
            };
            let mut token = Key::rand();
            while pending_requests.contains_key(&token) {
                token = Key::rand();
            }
            pending_requests.insert(token, response_tx);
            token
        };

        let message = Message::Request(Request {
            id: token,
            sender: (*self.node_data).clone(),
            payload,
        });
        if let Err(err) = self.protocol.send_message(&message, &dest.addr) {
            self.remove_pending(&token);
            return Err(err);
        }

        let ret = response_rx.recv_timeout(timeout);
        self.remove_pending(&token);
        match ret {
            Ok(Response {
                payload: ResponsePayload::Error(reason),
                ..
            }) => Err(Error::Rejected {
                addr: dest.addr.clone(),
                reason,
            }),
            Ok(response) => Ok(response.payload),
            Err(_) => {
                debug!(
                    "{} - Request to {} timed out after waiting for {} milliseconds",
                    self.node_data.addr,
                    dest.addr,
                    timeout.as_millis()
                );
                Err(Error::Timeout {
                    addr: dest.addr.clone(),
                    millis: timeout.as_millis(),
                })
            },
        }
    }
}
