//! Error taxonomy for the streaming engine.
//!
//! Network and codec failures are recovered locally by stopping the affected
//! session; none of these errors is allowed to cross the signaling callback
//! boundary as a panic.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StreamError {
    /// The wire payload could not be decoded.
    #[error("failed to decode streaming packet: {0}")]
    Decode(String),

    /// The wire payload could not be encoded.
    #[error("failed to encode streaming packet: {0}")]
    Encode(String),

    /// The requested byte range is not available from the source.
    #[error("byte range at offset {offset} not found")]
    ItemNotFound { offset: u64 },

    /// The streaming session has already been stopped.
    #[error("streaming session {ident} is not active")]
    SessionInactive { ident: u64 },

    /// Reading the local source file failed.
    #[error("source read failed")]
    SourceIo(#[from] std::io::Error),
}

pub type StreamResult<T> = Result<T, StreamError>;
