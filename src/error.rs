use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Connection failure or timeout while talking to the proxy.
    #[error("transport error: {0}")]
    Transport(String),

    /// The proxy answered, but the envelope was malformed or rejected.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Header or body bytes could not be decoded.
    #[error("parse error: {0}")]
    Parse(String),

    /// A key kept across an update moved backwards relative to another kept key.
    /// This is a defect in whoever maintains the rendered list, not a runtime condition.
    #[error("ordering violation: {key} found at position {position}, previous match at {previous}")]
    OrderingViolation {
        key: String,
        position: usize,
        previous: usize,
    },

    #[error("operation cancelled")]
    Cancelled,

    #[error("unknown message {0}")]
    UnknownMessage(String),

    #[error("no mailbox at index {0}")]
    UnknownMailbox(usize),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("secret store error: {0}")]
    Secret(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
