use crate::key::Key;
use std::fmt::{Debug, Display, Formatter, Result};

/// A reference to a ring member. The member is not necessarily alive.
#[derive(PartialEq, Eq, Hash, Clone, Serialize, Deserialize)]
pub struct NodeData {
    pub addr: String,
    pub id: Key,
}

impl Debug for NodeData {
    fn fmt(&self, f: &mut Formatter) -> Result {
        write!(f, "{} - {:?}", self.addr, self.id)
    }
}

impl Display for NodeData {
    fn fmt(&self, f: &mut Formatter) -> Result {
        write!(f, "{} ({})", self.addr, self.id.short())
    }
}

impl NodeData {
    pub fn new(addr: &str, id: Key) -> Self {
        NodeData {
            addr: addr.to_string(),
            id,
        }
    }

    /// Constructs a `NodeData` whose id is the hash of its address.
    pub fn from_address(addr: &str) -> Self {
        NodeData::new(addr, Key::hash(addr.as_bytes()))
    }
}
