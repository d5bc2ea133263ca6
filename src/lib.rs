#[macro_use]
extern crate log;
#[macro_use]
extern crate serde_derive;

mod config;
mod error;
mod key;
mod node;
mod protocol;
mod ring;
mod storage;

pub use self::config::Config;
pub use self::error::{Error, Result};
pub use self::key::Key;
pub use self::node::node_data::NodeData;
pub use self::node::task::PeriodicTask;
pub use self::node::{Lookup, Node};
pub use self::protocol::{Network, RequestPayload, ResponsePayload, UdpNetwork};
pub use self::ring::LocalNode;
pub use self::storage::Bucket;

/// The number of bytes in a key.
const KEY_LENGTH: usize = 20;

/// The number of bits in a key, which is also the number of entries in a finger table.
pub const FINGER_TABLE_SIZE: usize = KEY_LENGTH * 8;

/// The maximum length of the message in bytes.
const MESSAGE_LENGTH: usize = 8196;

/// The default number of entries in a successor list.
const SUCCESSOR_LIST_SIZE: usize = 3;

/// The maximum number of relay hops followed by a single lookup.
const MAX_LOOKUP_HOPS: usize = 2 * FINGER_TABLE_SIZE;

/// The maximum number of inbound requests handled at the same time.
const MAX_CONCURRENT_REQUESTS: usize = 64;

/// Request timeout time in milliseconds
const REQUEST_TIMEOUT: u64 = 5000;

/// Stabilize, fix fingers, fix successor list, and check predecessor interval in milliseconds
const MAINTENANCE_INTERVAL: u64 = 500;
