//! Error types for the ring.

use std::io;

use thiserror::Error;

/// Result type alias for the ring.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while talking to peers or starting a node.
///
/// Everything except `Config`, `InvalidKey` and a failed bind is recovered locally by treating
/// the peer as dead.
#[derive(Debug, Error)]
pub enum Error {
    /// The peer did not answer before the request timeout.
    #[error("request to {addr} timed out after {millis} ms")]
    Timeout { addr: String, millis: u128 },
    /// Socket level failure.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    /// A message could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(#[from] bincode::Error),
    /// The peer answered with an error response.
    #[error("{addr} rejected request: {reason}")]
    Rejected { addr: String, reason: String },
    /// The peer answered with a payload that does not match the request.
    #[error("unexpected response from {0}")]
    UnexpectedResponse(String),
    /// No route to the peer.
    #[error("peer {0} is unreachable")]
    Unreachable(String),
    /// Malformed identifier.
    #[error("invalid identifier {0:?}")]
    InvalidKey(String),
    /// Invalid startup configuration.
    #[error("invalid configuration: {0}")]
    Config(String),
}
